// libs/appointment-cell/src/services/booking.rs
use std::sync::Arc;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use availability_cell::services::civil_time::local_date;
use availability_cell::{
    parse_timezone, AvailabilityStore, SlotService, SupabaseAvailabilityStore, TimeRange,
    DEFAULT_SERVICE_DURATION_MINUTES,
};
use shared_config::{AppConfig, SchedulingSettings};
use shared_database::SupabaseClient;
use shared_models::auth::Actor;

use crate::models::{
    Appointment, AppointmentEvent, AppointmentListQuery, AppointmentStatus, BookAppointmentRequest,
    SchedulingError,
};
use crate::services::lifecycle::{AppointmentLifecycleService, Transition};
use crate::services::notifications::{dispatcher_for, NotificationDispatcher, NOTIFICATION_TIMEOUT};
use crate::services::store::{AppointmentStore, SupabaseAppointmentStore};

/// Creates appointments and drives them through their lifecycle. Every
/// write goes through here so the no-overlap invariant has a single owner.
pub struct AppointmentBookingService {
    appointments: Arc<dyn AppointmentStore>,
    slots: SlotService,
    lifecycle: AppointmentLifecycleService,
    notifier: Arc<dyn NotificationDispatcher>,
}

impl AppointmentBookingService {
    pub fn new(
        appointments: Arc<dyn AppointmentStore>,
        availability: Arc<dyn AvailabilityStore>,
        tz: Tz,
        notifier: Arc<dyn NotificationDispatcher>,
    ) -> Self {
        Self {
            appointments,
            slots: SlotService::new(availability, tz),
            lifecycle: AppointmentLifecycleService::new(),
            notifier,
        }
    }

    /// Supabase-backed service acting under the caller's token.
    pub fn from_config(config: &AppConfig, auth_token: Option<String>) -> Result<Self, SchedulingError> {
        let tz = parse_timezone(&config.clinic_timezone)?;
        let supabase = Arc::new(SupabaseClient::new(config));

        Ok(Self::new(
            Arc::new(SupabaseAppointmentStore::new(Arc::clone(&supabase), auth_token.clone())),
            Arc::new(SupabaseAvailabilityStore::new(supabase, auth_token)),
            tz,
            dispatcher_for(config),
        ))
    }

    // ==========================================================================
    // BOOKING
    // ==========================================================================

    #[instrument(skip(self, actor, settings, request), fields(professional_id = %request.professional_id))]
    pub async fn book_appointment(
        &self,
        actor: &Actor,
        settings: &SchedulingSettings,
        request: BookAppointmentRequest,
        now: DateTime<Utc>,
    ) -> Result<Appointment, SchedulingError> {
        let patient_id = match request.patient_id {
            Some(patient_id) if !actor.may_act_for(patient_id) => {
                return Err(SchedulingError::Forbidden(
                    "patients can only book for themselves".to_string(),
                ));
            }
            Some(patient_id) => patient_id,
            None => actor.user_id,
        };

        let service = request.service.trim();
        if service.is_empty() {
            return Err(SchedulingError::InvalidRange("service must not be blank".to_string()));
        }

        let duration_minutes = request.duration_minutes.unwrap_or(DEFAULT_SERVICE_DURATION_MINUTES);
        let requested = TimeRange::starting_at(request.scheduled_at, duration_minutes).ok_or_else(|| {
            SchedulingError::InvalidRange(format!("duration {} is not a usable length", duration_minutes))
        })?;
        if requested.start <= now {
            return Err(SchedulingError::AlreadyPast);
        }

        // Bookings are re-checked against rules, overrides, blocks and business
        // hours here; overlap with other bookings is left to the atomic insert.
        let date = local_date(&self.slots.timezone(), requested.start);
        let envelope = self.slots.envelope(settings, request.professional_id, date).await?;
        if !envelope.iter().any(|open| open.contains(&requested)) {
            debug!("Requested {:?} is outside availability on {}", requested, date);
            return Err(SchedulingError::NoAvailability);
        }

        let appointment = Appointment {
            id: Uuid::new_v4(),
            patient_id,
            professional_id: request.professional_id,
            service: service.to_string(),
            scheduled_at: requested.start,
            duration_minutes,
            status: AppointmentStatus::PendingConfirmation,
            meet_link: None,
            note: request.note.filter(|n| !n.trim().is_empty()),
            created_at: None,
            updated_at: None,
        };

        let created = match self.appointments.insert_if_free(appointment).await {
            Ok(created) => created,
            Err(SchedulingError::SlotConflict) => {
                info!("Slot at {} for professional {} was taken concurrently", requested.start, request.professional_id);
                return Err(SchedulingError::SlotConflict);
            }
            Err(e) => return Err(e),
        };

        info!("Appointment {} booked for patient {} at {}", created.id, created.patient_id, created.scheduled_at);
        self.notify(AppointmentEvent::Booked(created.clone()));
        Ok(created)
    }

    // ==========================================================================
    // QUERIES
    // ==========================================================================

    pub async fn get_appointment(&self, actor: &Actor, id: Uuid) -> Result<Appointment, SchedulingError> {
        let appointment = self.appointments.get(id).await?;
        if !actor.may_act_for(appointment.patient_id) && !actor.may_act_for(appointment.professional_id) {
            return Err(SchedulingError::Forbidden("not a party to this appointment".to_string()));
        }
        Ok(appointment)
    }

    pub async fn list_patient_appointments(
        &self,
        actor: &Actor,
        patient_id: Uuid,
        query: &AppointmentListQuery,
    ) -> Result<Vec<Appointment>, SchedulingError> {
        if !actor.may_act_for(patient_id) {
            return Err(SchedulingError::Forbidden("cannot list another patient's appointments".to_string()));
        }
        self.appointments.list_by_patient(patient_id, query).await
    }

    pub async fn list_professional_appointments(
        &self,
        actor: &Actor,
        professional_id: Uuid,
        query: &AppointmentListQuery,
    ) -> Result<Vec<Appointment>, SchedulingError> {
        if !actor.may_act_for(professional_id) {
            return Err(SchedulingError::Forbidden(
                "cannot list another professional's appointments".to_string(),
            ));
        }
        self.appointments.list_by_professional(professional_id, query).await
    }

    // ==========================================================================
    // TRANSITIONS
    // ==========================================================================

    pub async fn confirm_appointment(
        &self,
        actor: &Actor,
        settings: &SchedulingSettings,
        id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Appointment, SchedulingError> {
        let current = self.appointments.get(id).await?;
        self.lifecycle.check_confirm(&current, actor, settings, now)?;

        let confirmed = self.apply(&current, Transition::Confirm, None).await?;
        info!("Appointment {} confirmed", id);
        self.notify(AppointmentEvent::Confirmed(confirmed.clone()));
        Ok(confirmed)
    }

    pub async fn complete_appointment(&self, actor: &Actor, id: Uuid) -> Result<Appointment, SchedulingError> {
        let current = self.appointments.get(id).await?;
        self.lifecycle.check_complete(&current, actor)?;

        let completed = self.apply(&current, Transition::Complete, None).await?;
        info!("Appointment {} completed by professional", id);
        self.notify(AppointmentEvent::Completed(completed.clone()));
        Ok(completed)
    }

    pub async fn cancel_appointment(
        &self,
        actor: &Actor,
        id: Uuid,
        reason: Option<String>,
    ) -> Result<Appointment, SchedulingError> {
        let current = self.appointments.get(id).await?;
        self.lifecycle.check_cancel(&current, actor)?;

        let note = cancellation_note(current.note.as_deref(), reason.as_deref());
        let cancelled = self.apply(&current, Transition::Cancel, note).await?;
        info!("Appointment {} cancelled", id);
        self.notify(AppointmentEvent::Cancelled(cancelled.clone()));
        Ok(cancelled)
    }

    pub async fn set_meet_link(
        &self,
        actor: &Actor,
        id: Uuid,
        meet_link: String,
    ) -> Result<Appointment, SchedulingError> {
        let meet_link = meet_link.trim().to_string();
        if meet_link.is_empty() {
            return Err(SchedulingError::InvalidRange("meet_link must not be blank".to_string()));
        }

        let current = self.appointments.get(id).await?;
        self.lifecycle.check_meet_link(&current, actor)?;

        match self.appointments.set_meet_link(id, meet_link).await? {
            Some(updated) => Ok(updated),
            None => Err(self.stale_state(id).await?),
        }
    }

    /// Closes every elapsed active appointment of the professional. Running it
    /// again with nothing new elapsed returns an empty list.
    #[instrument(skip(self, actor))]
    pub async fn auto_complete(
        &self,
        actor: &Actor,
        professional_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Vec<Appointment>, SchedulingError> {
        if !actor.may_act_for(professional_id) {
            return Err(SchedulingError::Forbidden(
                "only the professional can run the completion sweep".to_string(),
            ));
        }

        let completed = self.appointments.complete_elapsed(professional_id, now).await?;
        for appointment in &completed {
            self.notify(AppointmentEvent::Completed(appointment.clone()));
        }
        Ok(completed)
    }

    async fn apply(
        &self,
        current: &Appointment,
        transition: Transition,
        note: Option<String>,
    ) -> Result<Appointment, SchedulingError> {
        match self.appointments
            .update_status(current.id, transition.sources(), transition.target(), note)
            .await?
        {
            Some(updated) => Ok(updated),
            None => Err(self.stale_state(current.id).await?),
        }
    }

    // A conditional write matched nothing: another request moved the row first.
    async fn stale_state(&self, id: Uuid) -> Result<SchedulingError, SchedulingError> {
        let fresh = self.appointments.get(id).await?;
        warn!("Appointment {} changed concurrently; now {}", id, fresh.status);
        Ok(if fresh.status.is_terminal() {
            SchedulingError::AlreadyTerminal(fresh.status)
        } else {
            SchedulingError::WrongState(fresh.status)
        })
    }

    // Runs detached from the request; the write has already committed.
    fn notify(&self, event: AppointmentEvent) {
        let notifier = Arc::clone(&self.notifier);
        tokio::spawn(async move {
            let id = event.appointment().id;
            match tokio::time::timeout(NOTIFICATION_TIMEOUT, notifier.dispatch(&event)).await {
                Ok(Ok(())) => debug!("Sent {} notification for {}", event.name(), id),
                Ok(Err(e)) => warn!("Failed to send {} notification for {}: {}", event.name(), id, e),
                Err(_) => warn!("Timed out sending {} notification for {}", event.name(), id),
            }
        });
    }
}

fn cancellation_note(existing: Option<&str>, reason: Option<&str>) -> Option<String> {
    let reason = reason.map(str::trim).filter(|r| !r.is_empty())?;
    Some(match existing.map(str::trim).filter(|n| !n.is_empty()) {
        Some(note) => format!("{}\nCancellation reason: {}", note, reason),
        None => format!("Cancellation reason: {}", reason),
    })
}
