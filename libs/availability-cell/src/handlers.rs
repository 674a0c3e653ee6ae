// libs/availability-cell/src/handlers.rs
use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query, State},
    http::StatusCode,
    Json,
};
use axum_extra::TypedHeader;
use headers::{authorization::Bearer, Authorization};
use serde_json::{json, Value};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::{SettingsProvider, SupabaseClient, SupabaseSettingsProvider};
use shared_models::auth::User;
use shared_models::error::AppError;
use shared_utils::extractor::require_actor;

use crate::models::{
    AvailabilityError, CreateBlockedSlotRequest, CreateOverrideRequest, CreateWeeklyRuleRequest,
    OpenSlotsResponse, SlotQuery, UpdateWeeklyRuleRequest, DEFAULT_SERVICE_DURATION_MINUTES,
};
use crate::services::{
    civil_time::parse_timezone,
    management::AvailabilityManagementService,
    slots::{chunk_open_slots, SlotService},
    store::{AvailabilityStore, SupabaseAvailabilityStore},
};

impl From<AvailabilityError> for AppError {
    fn from(err: AvailabilityError) -> Self {
        match err {
            AvailabilityError::NoAvailability => AppError::Conflict(err.to_string()),
            AvailabilityError::InvalidRange(_) => AppError::BadRequest(err.to_string()),
            AvailabilityError::InvalidTimezone(_) => AppError::Internal(err.to_string()),
            AvailabilityError::NotFound(_) => AppError::NotFound(err.to_string()),
            AvailabilityError::Forbidden(_) => AppError::Forbidden(err.to_string()),
            AvailabilityError::UpstreamUnavailable(_) => AppError::ExternalService(err.to_string()),
        }
    }
}

fn store_for(state: &AppConfig, token: Option<String>) -> Arc<dyn AvailabilityStore> {
    let supabase = Arc::new(SupabaseClient::new(state));
    Arc::new(SupabaseAvailabilityStore::new(supabase, token))
}

// ==============================================================================
// PUBLIC HANDLERS
// ==============================================================================

#[axum::debug_handler]
pub async fn get_open_slots(
    State(state): State<Arc<AppConfig>>,
    Path(professional_id): Path<Uuid>,
    Query(query): Query<SlotQuery>,
) -> Result<Json<OpenSlotsResponse>, AppError> {
    let tz = parse_timezone(&state.clinic_timezone)?;
    let supabase = Arc::new(SupabaseClient::new(&state));
    let settings = SupabaseSettingsProvider::new(Arc::clone(&supabase), None)
        .scheduling_settings()
        .await
        .map_err(AvailabilityError::from)?;

    let store: Arc<dyn AvailabilityStore> = Arc::new(SupabaseAvailabilityStore::new(supabase, None));
    let slot_service = SlotService::new(store, tz);

    let duration_minutes = query.duration_minutes.unwrap_or(DEFAULT_SERVICE_DURATION_MINUTES);
    let open_ranges = slot_service
        .open_slots(&settings, professional_id, query.date, duration_minutes)
        .await?;

    let slots = match query.step_minutes {
        Some(step) => Some(chunk_open_slots(&open_ranges, duration_minutes, step)?),
        None => None,
    };

    Ok(Json(OpenSlotsResponse {
        professional_id,
        date: query.date,
        timezone: tz.name().to_string(),
        duration_minutes,
        open_ranges,
        slots,
    }))
}

// ==============================================================================
// PROTECTED HANDLERS: WEEKLY RULES
// ==============================================================================

#[axum::debug_handler]
pub async fn list_rules(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Path(professional_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let service = AvailabilityManagementService::new(store_for(&state, Some(auth.token().to_string())));
    let rules = service.list_rules(professional_id).await?;

    Ok(Json(json!({
        "rules": rules,
        "total": rules.len()
    })))
}

#[axum::debug_handler]
pub async fn create_rule(
    State(state): State<Arc<AppConfig>>,
    Extension(user): Extension<User>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Path(professional_id): Path<Uuid>,
    Json(request): Json<CreateWeeklyRuleRequest>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let actor = require_actor(&user)?;
    let service = AvailabilityManagementService::new(store_for(&state, Some(auth.token().to_string())));
    let rule = service.create_rule(&actor, professional_id, request).await?;

    Ok((StatusCode::CREATED, Json(json!(rule))))
}

#[axum::debug_handler]
pub async fn update_rule(
    State(state): State<Arc<AppConfig>>,
    Extension(user): Extension<User>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Path((professional_id, rule_id)): Path<(Uuid, Uuid)>,
    Json(request): Json<UpdateWeeklyRuleRequest>,
) -> Result<Json<Value>, AppError> {
    let actor = require_actor(&user)?;
    let service = AvailabilityManagementService::new(store_for(&state, Some(auth.token().to_string())));
    let rule = service.update_rule(&actor, professional_id, rule_id, request).await?;

    Ok(Json(json!(rule)))
}

#[axum::debug_handler]
pub async fn delete_rule(
    State(state): State<Arc<AppConfig>>,
    Extension(user): Extension<User>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Path((professional_id, rule_id)): Path<(Uuid, Uuid)>,
) -> Result<StatusCode, AppError> {
    let actor = require_actor(&user)?;
    let service = AvailabilityManagementService::new(store_for(&state, Some(auth.token().to_string())));
    service.delete_rule(&actor, professional_id, rule_id).await?;

    Ok(StatusCode::NO_CONTENT)
}

// ==============================================================================
// PROTECTED HANDLERS: OVERRIDES
// ==============================================================================

#[axum::debug_handler]
pub async fn list_overrides(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Path(professional_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let service = AvailabilityManagementService::new(store_for(&state, Some(auth.token().to_string())));
    let overrides = service.list_overrides(professional_id).await?;

    Ok(Json(json!({
        "overrides": overrides,
        "total": overrides.len()
    })))
}

#[axum::debug_handler]
pub async fn create_override(
    State(state): State<Arc<AppConfig>>,
    Extension(user): Extension<User>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Path(professional_id): Path<Uuid>,
    Json(request): Json<CreateOverrideRequest>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let actor = require_actor(&user)?;
    let service = AvailabilityManagementService::new(store_for(&state, Some(auth.token().to_string())));
    let entry = service.create_override(&actor, professional_id, request).await?;

    Ok((StatusCode::CREATED, Json(json!(entry))))
}

#[axum::debug_handler]
pub async fn delete_override(
    State(state): State<Arc<AppConfig>>,
    Extension(user): Extension<User>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Path((professional_id, override_id)): Path<(Uuid, Uuid)>,
) -> Result<StatusCode, AppError> {
    let actor = require_actor(&user)?;
    let service = AvailabilityManagementService::new(store_for(&state, Some(auth.token().to_string())));
    service.delete_override(&actor, professional_id, override_id).await?;

    Ok(StatusCode::NO_CONTENT)
}

// ==============================================================================
// PROTECTED HANDLERS: BLOCKED SLOTS
// ==============================================================================

#[axum::debug_handler]
pub async fn list_blocked_slots(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Path(professional_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let service = AvailabilityManagementService::new(store_for(&state, Some(auth.token().to_string())));
    let blocks = service.list_blocked_slots(professional_id).await?;

    Ok(Json(json!({
        "blocked_slots": blocks,
        "total": blocks.len()
    })))
}

#[axum::debug_handler]
pub async fn create_blocked_slot(
    State(state): State<Arc<AppConfig>>,
    Extension(user): Extension<User>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Path(professional_id): Path<Uuid>,
    Json(request): Json<CreateBlockedSlotRequest>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let actor = require_actor(&user)?;
    let service = AvailabilityManagementService::new(store_for(&state, Some(auth.token().to_string())));
    let block = service.create_blocked_slot(&actor, professional_id, request).await?;

    Ok((StatusCode::CREATED, Json(json!(block))))
}

#[axum::debug_handler]
pub async fn delete_blocked_slot(
    State(state): State<Arc<AppConfig>>,
    Extension(user): Extension<User>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Path((professional_id, block_id)): Path<(Uuid, Uuid)>,
) -> Result<StatusCode, AppError> {
    let actor = require_actor(&user)?;
    let service = AvailabilityManagementService::new(store_for(&state, Some(auth.token().to_string())));
    service.delete_blocked_slot(&actor, professional_id, block_id).await?;

    Ok(StatusCode::NO_CONTENT)
}
