// libs/availability-cell/src/router.rs
use std::sync::Arc;

use axum::{
    Router,
    routing::{get, put},
    middleware,
};

use shared_config::AppConfig;
use shared_utils::extractor::auth_middleware;

use crate::handlers;

pub fn availability_routes(state: Arc<AppConfig>) -> Router {
    // Patients browse open slots before signing in
    let public_routes = Router::new()
        .route("/{professional_id}/slots", get(handlers::get_open_slots));

    let protected_routes = Router::new()
        .route("/{professional_id}/rules", get(handlers::list_rules).post(handlers::create_rule))
        .route(
            "/{professional_id}/rules/{rule_id}",
            put(handlers::update_rule).delete(handlers::delete_rule),
        )
        .route("/{professional_id}/overrides", get(handlers::list_overrides).post(handlers::create_override))
        .route("/{professional_id}/overrides/{override_id}", axum::routing::delete(handlers::delete_override))
        .route("/{professional_id}/blocks", get(handlers::list_blocked_slots).post(handlers::create_blocked_slot))
        .route("/{professional_id}/blocks/{block_id}", axum::routing::delete(handlers::delete_blocked_slot))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .with_state(state)
}
