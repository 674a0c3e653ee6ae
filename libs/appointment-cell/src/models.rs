// libs/appointment-cell/src/models.rs
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use availability_cell::{AvailabilityError, TimeRange};
use shared_database::SupabaseError;

// ==============================================================================
// CORE APPOINTMENT MODELS
// ==============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    PendingConfirmation,
    Confirmed,
    Completed,
    Cancelled,
}

impl AppointmentStatus {
    /// Statuses that still hold their time range.
    pub const ACTIVE: [AppointmentStatus; 2] = [
        AppointmentStatus::PendingConfirmation,
        AppointmentStatus::Confirmed,
    ];

    pub fn is_terminal(self) -> bool {
        matches!(self, AppointmentStatus::Completed | AppointmentStatus::Cancelled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AppointmentStatus::PendingConfirmation => "pending_confirmation",
            AppointmentStatus::Confirmed => "confirmed",
            AppointmentStatus::Completed => "completed",
            AppointmentStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Appointment {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub professional_id: Uuid,
    pub service: String,
    pub scheduled_at: DateTime<Utc>,
    pub duration_minutes: i64,
    pub status: AppointmentStatus,
    pub meet_link: Option<String>,
    pub note: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Appointment {
    pub fn range(&self) -> Option<TimeRange> {
        TimeRange::starting_at(self.scheduled_at, self.duration_minutes)
    }

    pub fn holds_slot(&self) -> bool {
        self.status != AppointmentStatus::Cancelled
    }
}

/// Post-commit notifications. Delivery is best effort.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", content = "appointment", rename_all = "snake_case")]
pub enum AppointmentEvent {
    Booked(Appointment),
    Confirmed(Appointment),
    Completed(Appointment),
    Cancelled(Appointment),
}

impl AppointmentEvent {
    pub fn appointment(&self) -> &Appointment {
        match self {
            AppointmentEvent::Booked(a)
            | AppointmentEvent::Confirmed(a)
            | AppointmentEvent::Completed(a)
            | AppointmentEvent::Cancelled(a) => a,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            AppointmentEvent::Booked(_) => "booked",
            AppointmentEvent::Confirmed(_) => "confirmed",
            AppointmentEvent::Completed(_) => "completed",
            AppointmentEvent::Cancelled(_) => "cancelled",
        }
    }
}

// ==============================================================================
// REQUEST/RESPONSE MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookAppointmentRequest {
    pub professional_id: Uuid,
    /// Admins may book on a patient's behalf; otherwise the caller is the patient.
    pub patient_id: Option<Uuid>,
    pub service: String,
    pub scheduled_at: DateTime<Utc>,
    pub duration_minutes: Option<i64>,
    pub note: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CancelAppointmentRequest {
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeetLinkRequest {
    pub meet_link: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppointmentListQuery {
    pub status: Option<AppointmentStatus>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub limit: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoCompleteResponse {
    pub professional_id: Uuid,
    pub completed: Vec<Uuid>,
    pub run_at: DateTime<Utc>,
}

// ==============================================================================
// ERROR TYPES
// ==============================================================================

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchedulingError {
    #[error("No availability for the requested time")]
    NoAvailability,

    #[error("The requested time was just booked by someone else")]
    SlotConflict,

    #[error("Appointment is {0}, transition not allowed")]
    WrongState(AppointmentStatus),

    #[error("Confirmation opens at {opens_at}")]
    OutOfWindow { opens_at: DateTime<Utc> },

    #[error("Appointment time has already passed")]
    AlreadyPast,

    #[error("Appointment is already {0}")]
    AlreadyTerminal(AppointmentStatus),

    #[error("Invalid range: {0}")]
    InvalidRange(String),

    #[error("Appointment not found: {0}")]
    NotFound(String),

    #[error("Not allowed: {0}")]
    Forbidden(String),

    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),
}

impl From<AvailabilityError> for SchedulingError {
    fn from(err: AvailabilityError) -> Self {
        match err {
            AvailabilityError::NoAvailability => SchedulingError::NoAvailability,
            AvailabilityError::InvalidRange(msg) => SchedulingError::InvalidRange(msg),
            AvailabilityError::InvalidTimezone(msg) => SchedulingError::UpstreamUnavailable(msg),
            AvailabilityError::NotFound(msg) => SchedulingError::NotFound(msg),
            AvailabilityError::Forbidden(msg) => SchedulingError::Forbidden(msg),
            AvailabilityError::UpstreamUnavailable(msg) => SchedulingError::UpstreamUnavailable(msg),
        }
    }
}

impl From<SupabaseError> for SchedulingError {
    fn from(err: SupabaseError) -> Self {
        // The exclusion constraint on appointments is the only writer-side 409.
        if err.is_conflict() {
            SchedulingError::SlotConflict
        } else {
            SchedulingError::UpstreamUnavailable(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_uses_snake_case_on_the_wire() {
        let json = serde_json::to_string(&AppointmentStatus::PendingConfirmation).unwrap();
        assert_eq!(json, "\"pending_confirmation\"");
        let back: AppointmentStatus = serde_json::from_str("\"cancelled\"").unwrap();
        assert_eq!(back, AppointmentStatus::Cancelled);
    }

    #[test]
    fn terminal_statuses() {
        assert!(!AppointmentStatus::PendingConfirmation.is_terminal());
        assert!(!AppointmentStatus::Confirmed.is_terminal());
        assert!(AppointmentStatus::Completed.is_terminal());
        assert!(AppointmentStatus::Cancelled.is_terminal());
    }

    #[test]
    fn supabase_conflict_becomes_slot_conflict() {
        let err = SchedulingError::from(SupabaseError::Conflict("23P01".to_string()));
        assert_eq!(err, SchedulingError::SlotConflict);

        let err = SchedulingError::from(SupabaseError::Decode("bad json".to_string()));
        assert!(matches!(err, SchedulingError::UpstreamUnavailable(_)));
    }
}
