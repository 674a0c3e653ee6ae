// libs/appointment-cell/src/router.rs
use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post, patch},
    middleware,
};

use shared_config::AppConfig;
use shared_utils::extractor::auth_middleware;

use crate::handlers;

pub fn appointment_routes(state: Arc<AppConfig>) -> Router {
    // All appointment operations require authentication
    let protected_routes = Router::new()
        .route("/", post(handlers::book_appointment))
        .route("/{appointment_id}", get(handlers::get_appointment))
        .route("/{appointment_id}/confirm", post(handlers::confirm_appointment))
        .route("/{appointment_id}/complete", post(handlers::complete_appointment))
        .route("/{appointment_id}/cancel", post(handlers::cancel_appointment))
        .route("/{appointment_id}/meet-link", patch(handlers::set_meet_link))

        // Listings
        .route("/patients/{patient_id}", get(handlers::get_patient_appointments))
        .route("/professionals/{professional_id}", get(handlers::get_professional_appointments))

        // Externally scheduled sweep
        .route(
            "/professionals/{professional_id}/auto-complete",
            post(handlers::auto_complete_appointments),
        )
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    Router::new()
        .merge(protected_routes)
        .with_state(state)
}
