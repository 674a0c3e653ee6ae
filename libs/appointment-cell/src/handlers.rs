// libs/appointment-cell/src/handlers.rs
use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query, State},
    http::StatusCode,
    Json,
};
use axum_extra::TypedHeader;
use chrono::Utc;
use headers::{authorization::Bearer, Authorization};
use serde_json::{json, Value};
use uuid::Uuid;

use shared_config::{AppConfig, SchedulingSettings};
use shared_database::{SettingsProvider, SupabaseClient, SupabaseSettingsProvider};
use shared_models::auth::User;
use shared_models::error::AppError;
use shared_utils::extractor::require_actor;

use crate::models::{
    Appointment, AppointmentListQuery, AutoCompleteResponse, BookAppointmentRequest,
    CancelAppointmentRequest, MeetLinkRequest, SchedulingError,
};
use crate::services::booking::AppointmentBookingService;

impl From<SchedulingError> for AppError {
    fn from(err: SchedulingError) -> Self {
        match err {
            SchedulingError::SlotConflict => AppError::Conflict(err.to_string()),
            SchedulingError::NoAvailability => AppError::Conflict(err.to_string()),
            SchedulingError::WrongState(_)
            | SchedulingError::OutOfWindow { .. }
            | SchedulingError::AlreadyPast
            | SchedulingError::AlreadyTerminal(_)
            | SchedulingError::InvalidRange(_) => AppError::BadRequest(err.to_string()),
            SchedulingError::NotFound(_) => AppError::NotFound(err.to_string()),
            SchedulingError::Forbidden(_) => AppError::Forbidden(err.to_string()),
            SchedulingError::UpstreamUnavailable(_) => AppError::ExternalService(err.to_string()),
        }
    }
}

fn booking_service(state: &AppConfig, token: &str) -> Result<AppointmentBookingService, AppError> {
    Ok(AppointmentBookingService::from_config(state, Some(token.to_string()))?)
}

async fn current_settings(state: &AppConfig, token: &str) -> Result<SchedulingSettings, AppError> {
    let supabase = Arc::new(SupabaseClient::new(state));
    SupabaseSettingsProvider::new(supabase, Some(token.to_string()))
        .scheduling_settings()
        .await
        .map_err(|e| AppError::from(SchedulingError::from(e)))
}

// ==============================================================================
// BOOKING AND QUERIES
// ==============================================================================

#[axum::debug_handler]
pub async fn book_appointment(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Json(request): Json<BookAppointmentRequest>,
) -> Result<(StatusCode, Json<Appointment>), AppError> {
    let actor = require_actor(&user)?;
    let settings = current_settings(&state, auth.token()).await?;
    let service = booking_service(&state, auth.token())?;

    let appointment = service.book_appointment(&actor, &settings, request, Utc::now()).await?;

    Ok((StatusCode::CREATED, Json(appointment)))
}

#[axum::debug_handler]
pub async fn get_appointment(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<Appointment>, AppError> {
    let actor = require_actor(&user)?;
    let service = booking_service(&state, auth.token())?;

    Ok(Json(service.get_appointment(&actor, appointment_id).await?))
}

#[axum::debug_handler]
pub async fn get_patient_appointments(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(patient_id): Path<Uuid>,
    Query(query): Query<AppointmentListQuery>,
) -> Result<Json<Value>, AppError> {
    let actor = require_actor(&user)?;
    let service = booking_service(&state, auth.token())?;
    let appointments = service.list_patient_appointments(&actor, patient_id, &query).await?;

    Ok(Json(json!({
        "appointments": appointments,
        "total": appointments.len()
    })))
}

#[axum::debug_handler]
pub async fn get_professional_appointments(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(professional_id): Path<Uuid>,
    Query(query): Query<AppointmentListQuery>,
) -> Result<Json<Value>, AppError> {
    let actor = require_actor(&user)?;
    let service = booking_service(&state, auth.token())?;
    let appointments = service.list_professional_appointments(&actor, professional_id, &query).await?;

    Ok(Json(json!({
        "appointments": appointments,
        "total": appointments.len()
    })))
}

// ==============================================================================
// STATUS TRANSITIONS
// ==============================================================================

#[axum::debug_handler]
pub async fn confirm_appointment(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<Appointment>, AppError> {
    let actor = require_actor(&user)?;
    let settings = current_settings(&state, auth.token()).await?;
    let service = booking_service(&state, auth.token())?;

    Ok(Json(service.confirm_appointment(&actor, &settings, appointment_id, Utc::now()).await?))
}

#[axum::debug_handler]
pub async fn complete_appointment(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<Appointment>, AppError> {
    let actor = require_actor(&user)?;
    let service = booking_service(&state, auth.token())?;

    Ok(Json(service.complete_appointment(&actor, appointment_id).await?))
}

#[axum::debug_handler]
pub async fn cancel_appointment(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(appointment_id): Path<Uuid>,
    Json(request): Json<CancelAppointmentRequest>,
) -> Result<Json<Appointment>, AppError> {
    let actor = require_actor(&user)?;
    let service = booking_service(&state, auth.token())?;

    Ok(Json(service.cancel_appointment(&actor, appointment_id, request.reason).await?))
}

#[axum::debug_handler]
pub async fn set_meet_link(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(appointment_id): Path<Uuid>,
    Json(request): Json<MeetLinkRequest>,
) -> Result<Json<Appointment>, AppError> {
    let actor = require_actor(&user)?;
    let service = booking_service(&state, auth.token())?;

    Ok(Json(service.set_meet_link(&actor, appointment_id, request.meet_link).await?))
}

#[axum::debug_handler]
pub async fn auto_complete_appointments(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(professional_id): Path<Uuid>,
) -> Result<Json<AutoCompleteResponse>, AppError> {
    let actor = require_actor(&user)?;
    let service = booking_service(&state, auth.token())?;
    let run_at = Utc::now();

    let completed = service.auto_complete(&actor, professional_id, run_at).await?;

    Ok(Json(AutoCompleteResponse {
        professional_id,
        completed: completed.iter().map(|a| a.id).collect(),
        run_at,
    }))
}
