// libs/appointment-cell/src/services/lifecycle.rs
//
// Guards for every status transition. Pure: callers pass `now` and the
// settings they read for the request, and persist the returned status.

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, warn};

use shared_config::SchedulingSettings;
use shared_models::auth::Actor;

use crate::models::{Appointment, AppointmentStatus, SchedulingError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Confirm,
    Complete,
    Cancel,
}

impl Transition {
    pub fn target(self) -> AppointmentStatus {
        match self {
            Transition::Confirm => AppointmentStatus::Confirmed,
            Transition::Complete => AppointmentStatus::Completed,
            Transition::Cancel => AppointmentStatus::Cancelled,
        }
    }

    /// Statuses a transition may start from; used as the compare-and-set guard.
    pub fn sources(self) -> &'static [AppointmentStatus] {
        match self {
            Transition::Confirm => &[AppointmentStatus::PendingConfirmation],
            Transition::Complete | Transition::Cancel => &AppointmentStatus::ACTIVE,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AppointmentLifecycleService;

impl AppointmentLifecycleService {
    pub fn new() -> Self {
        Self
    }

    /// Patient confirmation, allowed only inside the window before `scheduled_at`.
    pub fn check_confirm(
        &self,
        appointment: &Appointment,
        actor: &Actor,
        settings: &SchedulingSettings,
        now: DateTime<Utc>,
    ) -> Result<AppointmentStatus, SchedulingError> {
        if !actor.may_act_for(appointment.patient_id) {
            return Err(SchedulingError::Forbidden(
                "only the patient can confirm an appointment".to_string(),
            ));
        }
        if appointment.status != AppointmentStatus::PendingConfirmation {
            warn!("Confirm rejected for {}: status is {}", appointment.id, appointment.status);
            return Err(SchedulingError::WrongState(appointment.status));
        }
        if appointment.scheduled_at <= now {
            return Err(SchedulingError::AlreadyPast);
        }
        settings.validate().map_err(|e| SchedulingError::InvalidRange(e.to_string()))?;

        let opens_at = Duration::try_hours(settings.confirmation_hours_before)
            .and_then(|window| appointment.scheduled_at.checked_sub_signed(window))
            .ok_or_else(|| SchedulingError::InvalidRange(format!(
                "confirmation window of {} hours is out of range",
                settings.confirmation_hours_before
            )))?;
        if now < opens_at {
            debug!("Confirm for {} too early; window opens at {}", appointment.id, opens_at);
            return Err(SchedulingError::OutOfWindow { opens_at });
        }

        Ok(Transition::Confirm.target())
    }

    /// Manual close by the owning professional. No time guard.
    pub fn check_complete(
        &self,
        appointment: &Appointment,
        actor: &Actor,
    ) -> Result<AppointmentStatus, SchedulingError> {
        if !actor.may_act_for(appointment.professional_id) {
            return Err(SchedulingError::Forbidden(
                "only the professional can complete an appointment".to_string(),
            ));
        }
        Self::ensure_active(appointment)?;
        Ok(Transition::Complete.target())
    }

    /// Either party may cancel while the appointment is still active.
    pub fn check_cancel(
        &self,
        appointment: &Appointment,
        actor: &Actor,
    ) -> Result<AppointmentStatus, SchedulingError> {
        if !actor.may_act_for(appointment.patient_id) && !actor.may_act_for(appointment.professional_id) {
            return Err(SchedulingError::Forbidden(
                "only the patient or the professional can cancel".to_string(),
            ));
        }
        Self::ensure_active(appointment)?;
        Ok(Transition::Cancel.target())
    }

    pub fn check_meet_link(&self, appointment: &Appointment, actor: &Actor) -> Result<(), SchedulingError> {
        if !actor.may_act_for(appointment.professional_id) {
            return Err(SchedulingError::Forbidden(
                "only the professional can set the meeting link".to_string(),
            ));
        }
        Self::ensure_active(appointment)
    }

    /// Whether the sweep should close this appointment.
    pub fn is_auto_complete_eligible(&self, appointment: &Appointment, now: DateTime<Utc>) -> bool {
        !appointment.status.is_terminal() && appointment.scheduled_at <= now
    }

    fn ensure_active(appointment: &Appointment) -> Result<(), SchedulingError> {
        if appointment.status.is_terminal() {
            return Err(SchedulingError::AlreadyTerminal(appointment.status));
        }
        Ok(())
    }
}
