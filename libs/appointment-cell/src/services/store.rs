// libs/appointment-cell/src/services/store.rs
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Method;
use serde_json::{json, Value};
use tracing::{debug, info};
use uuid::Uuid;

use availability_cell::services::store::{ts_param, APPOINTMENTS_TABLE};
use shared_database::SupabaseClient;

use crate::models::{Appointment, AppointmentListQuery, AppointmentStatus, SchedulingError};

/// Persistence for appointments. Every status write is conditional on the
/// current status so concurrent transitions cannot overwrite each other.
#[async_trait]
pub trait AppointmentStore: Send + Sync {
    /// Inserts `appointment` unless a non-cancelled appointment of the same
    /// professional overlaps it. Check and insert are one atomic step;
    /// the loser of a race gets `SlotConflict`.
    async fn insert_if_free(&self, appointment: Appointment) -> Result<Appointment, SchedulingError>;

    async fn get(&self, id: Uuid) -> Result<Appointment, SchedulingError>;

    async fn list_by_patient(
        &self,
        patient_id: Uuid,
        query: &AppointmentListQuery,
    ) -> Result<Vec<Appointment>, SchedulingError>;

    async fn list_by_professional(
        &self,
        professional_id: Uuid,
        query: &AppointmentListQuery,
    ) -> Result<Vec<Appointment>, SchedulingError>;

    /// Sets `to` only while the stored status is one of `from`.
    /// `None` means the guard failed and nothing was written.
    async fn update_status(
        &self,
        id: Uuid,
        from: &[AppointmentStatus],
        to: AppointmentStatus,
        note: Option<String>,
    ) -> Result<Option<Appointment>, SchedulingError>;

    /// Completes every active appointment of the professional with
    /// `scheduled_at <= now` and returns the rows it changed.
    async fn complete_elapsed(
        &self,
        professional_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Vec<Appointment>, SchedulingError>;

    /// Attaches a meeting link while the appointment is still active.
    async fn set_meet_link(&self, id: Uuid, meet_link: String) -> Result<Option<Appointment>, SchedulingError>;
}

fn status_list(statuses: &[AppointmentStatus]) -> String {
    statuses.iter().map(|s| s.as_str()).collect::<Vec<_>>().join(",")
}

fn list_filters(query: &AppointmentListQuery) -> String {
    let mut filters = String::new();
    if let Some(status) = query.status {
        filters.push_str(&format!("&status=eq.{}", status));
    }
    if let Some(from) = query.from {
        filters.push_str(&format!("&scheduled_at=gte.{}", ts_param(from)));
    }
    if let Some(to) = query.to {
        filters.push_str(&format!("&scheduled_at=lt.{}", ts_param(to)));
    }
    filters.push_str("&order=scheduled_at.asc");
    if let Some(limit) = query.limit {
        filters.push_str(&format!("&limit={}", limit));
    }
    filters
}

/// PostgREST-backed store. Double booking is prevented by the exclusion
/// constraint on `appointments`, which PostgREST reports as HTTP 409.
pub struct SupabaseAppointmentStore {
    supabase: Arc<SupabaseClient>,
    auth_token: Option<String>,
}

impl SupabaseAppointmentStore {
    pub fn new(supabase: Arc<SupabaseClient>, auth_token: Option<String>) -> Self {
        Self { supabase, auth_token }
    }

    async fn fetch(&self, path: &str) -> Result<Vec<Appointment>, SchedulingError> {
        let rows: Vec<Appointment> = self.supabase
            .request(Method::GET, path, self.auth_token.as_deref(), None)
            .await?;
        Ok(rows)
    }

    async fn patch(&self, path: &str, body: Value) -> Result<Vec<Appointment>, SchedulingError> {
        let rows: Vec<Appointment> = self.supabase
            .request_with_headers(
                Method::PATCH,
                path,
                self.auth_token.as_deref(),
                Some(body),
                Some(SupabaseClient::return_representation()),
            )
            .await?;
        Ok(rows)
    }
}

#[async_trait]
impl AppointmentStore for SupabaseAppointmentStore {
    async fn insert_if_free(&self, appointment: Appointment) -> Result<Appointment, SchedulingError> {
        debug!("Inserting appointment {} for professional {}", appointment.id, appointment.professional_id);

        let mut rows: Vec<Appointment> = self.supabase
            .request_with_headers(
                Method::POST,
                &format!("/rest/v1/{}", APPOINTMENTS_TABLE),
                self.auth_token.as_deref(),
                Some(json!(appointment)),
                Some(SupabaseClient::return_representation()),
            )
            .await?;

        rows.pop().ok_or_else(|| {
            SchedulingError::UpstreamUnavailable("appointment insert returned no row".to_string())
        })
    }

    async fn get(&self, id: Uuid) -> Result<Appointment, SchedulingError> {
        let path = format!("/rest/v1/{}?id=eq.{}&limit=1", APPOINTMENTS_TABLE, id);
        self.fetch(&path)
            .await?
            .pop()
            .ok_or_else(|| SchedulingError::NotFound(id.to_string()))
    }

    async fn list_by_patient(
        &self,
        patient_id: Uuid,
        query: &AppointmentListQuery,
    ) -> Result<Vec<Appointment>, SchedulingError> {
        let path = format!(
            "/rest/v1/{}?patient_id=eq.{}{}",
            APPOINTMENTS_TABLE, patient_id, list_filters(query)
        );
        self.fetch(&path).await
    }

    async fn list_by_professional(
        &self,
        professional_id: Uuid,
        query: &AppointmentListQuery,
    ) -> Result<Vec<Appointment>, SchedulingError> {
        let path = format!(
            "/rest/v1/{}?professional_id=eq.{}{}",
            APPOINTMENTS_TABLE, professional_id, list_filters(query)
        );
        self.fetch(&path).await
    }

    async fn update_status(
        &self,
        id: Uuid,
        from: &[AppointmentStatus],
        to: AppointmentStatus,
        note: Option<String>,
    ) -> Result<Option<Appointment>, SchedulingError> {
        let path = format!(
            "/rest/v1/{}?id=eq.{}&status=in.({})",
            APPOINTMENTS_TABLE, id, status_list(from)
        );
        let mut body = json!({
            "status": to,
            "updated_at": Utc::now().to_rfc3339(),
        });
        if let Some(note) = note {
            body["note"] = json!(note);
        }

        Ok(self.patch(&path, body).await?.pop())
    }

    async fn complete_elapsed(
        &self,
        professional_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Vec<Appointment>, SchedulingError> {
        let path = format!(
            "/rest/v1/{}?professional_id=eq.{}&status=in.({})&scheduled_at=lte.{}",
            APPOINTMENTS_TABLE,
            professional_id,
            status_list(&AppointmentStatus::ACTIVE),
            ts_param(now)
        );
        let body = json!({
            "status": AppointmentStatus::Completed,
            "updated_at": Utc::now().to_rfc3339(),
        });

        let completed = self.patch(&path, body).await?;
        info!("Auto-completed {} appointment(s) for professional {}", completed.len(), professional_id);
        Ok(completed)
    }

    async fn set_meet_link(&self, id: Uuid, meet_link: String) -> Result<Option<Appointment>, SchedulingError> {
        let path = format!(
            "/rest/v1/{}?id=eq.{}&status=in.({})",
            APPOINTMENTS_TABLE,
            id,
            status_list(&AppointmentStatus::ACTIVE)
        );
        let body = json!({
            "meet_link": meet_link,
            "updated_at": Utc::now().to_rfc3339(),
        });

        Ok(self.patch(&path, body).await?.pop())
    }
}
