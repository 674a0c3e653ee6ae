// libs/availability-cell/src/models.rs
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use shared_config::SettingsError;
use shared_database::SupabaseError;

use crate::services::civil_time::WallClock;
use crate::services::intervals::TimeRange;

// ==============================================================================
// AVAILABILITY SOURCES
// ==============================================================================

/// Recurring weekly open window, in the clinic's civil time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeeklyAvailabilityRule {
    pub id: Uuid,
    pub professional_id: Uuid,
    /// 0 = Sunday ... 6 = Saturday.
    pub weekday: u8,
    pub start_time: WallClock,
    pub end_time: WallClock,
}

/// Date-specific exception: adds a window when `is_available`, removes one otherwise.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilityOverride {
    pub id: Uuid,
    pub professional_id: Uuid,
    pub date: NaiveDate,
    pub start_time: WallClock,
    pub end_time: WallClock,
    pub is_available: bool,
}

/// Absolute-time exclusion (vacation, personal commitment).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockedSlot {
    pub id: Uuid,
    pub professional_id: Uuid,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub reason: Option<String>,
}

impl BlockedSlot {
    pub fn range(&self) -> Option<TimeRange> {
        TimeRange::new(self.starts_at, self.ends_at)
    }
}

// ==============================================================================
// REQUEST/RESPONSE MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateWeeklyRuleRequest {
    pub weekday: u8,
    pub start_time: String,
    pub end_time: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateWeeklyRuleRequest {
    pub weekday: Option<u8>,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateOverrideRequest {
    pub date: NaiveDate,
    pub start_time: String,
    pub end_time: String,
    pub is_available: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateBlockedSlotRequest {
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlotQuery {
    pub date: NaiveDate,
    pub duration_minutes: Option<i64>,
    /// When set, free ranges are also cut into fixed-size offerable slots.
    pub step_minutes: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenSlotsResponse {
    pub professional_id: Uuid,
    pub date: NaiveDate,
    pub timezone: String,
    pub duration_minutes: i64,
    pub open_ranges: Vec<TimeRange>,
    pub slots: Option<Vec<TimeRange>>,
}

pub const DEFAULT_SERVICE_DURATION_MINUTES: i64 = 60;

// ==============================================================================
// ERRORS
// ==============================================================================

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AvailabilityError {
    #[error("No availability for the requested time")]
    NoAvailability,

    #[error("Invalid range: {0}")]
    InvalidRange(String),

    #[error("Unknown timezone: {0}")]
    InvalidTimezone(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Not allowed: {0}")]
    Forbidden(String),

    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),
}

impl From<SupabaseError> for AvailabilityError {
    fn from(err: SupabaseError) -> Self {
        AvailabilityError::UpstreamUnavailable(err.to_string())
    }
}

impl From<SettingsError> for AvailabilityError {
    fn from(err: SettingsError) -> Self {
        AvailabilityError::InvalidRange(err.to_string())
    }
}
