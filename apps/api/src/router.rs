use std::sync::Arc;

use axum::{
    Router,
    routing::get,
};

use appointment_cell::appointment_routes;
use availability_cell::availability_routes;
use shared_config::AppConfig;

pub fn create_router(state: Arc<AppConfig>) -> Router {
    Router::new()
        .route("/", get(|| async { "Telehealth scheduling API is running!" }))
        .nest("/availability", availability_routes(state.clone()))
        .nest("/appointments", appointment_routes(state))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::{Request, StatusCode}};
    use tower::ServiceExt;

    use shared_utils::test_utils::TestConfig;

    #[tokio::test]
    async fn root_reports_running() {
        let response = create_router(TestConfig::default().to_arc())
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn cells_are_mounted_behind_auth() {
        let app = create_router(TestConfig::default().to_arc());

        let response = app
            .oneshot(Request::builder().uri("/appointments/patients/00000000-0000-0000-0000-000000000001").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
