// libs/availability-cell/tests/handlers_test.rs
use std::sync::Arc;

use assert_matches::assert_matches;
use axum_extra::TypedHeader;
use headers::{authorization::Bearer, Authorization};
use axum::{
    body::Body,
    extract::{Extension, Path, Query, State},
    http::{Request, StatusCode},
    Json,
};
use chrono::NaiveDate;
use serde_json::json;
use tower::ServiceExt;
use uuid::Uuid;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use availability_cell::availability_routes;
use availability_cell::handlers::*;
use availability_cell::models::*;
use shared_models::error::AppError;
use shared_utils::test_utils::{JwtTestUtils, TestConfig, TestUser};

fn rule_row(id: Uuid, professional_id: Uuid, weekday: u8, start: &str, end: &str) -> serde_json::Value {
    json!({
        "id": id,
        "professional_id": professional_id,
        "weekday": weekday,
        "start_time": start,
        "end_time": end
    })
}

fn bearer(token: &str) -> TypedHeader<Authorization<Bearer>> {
    TypedHeader(Authorization::bearer(token).unwrap())
}

async fn mount_empty(server: &MockServer, table: &str) {
    Mock::given(method("GET"))
        .and(path(format!("/rest/v1/{}", table)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(server)
        .await;
}

#[tokio::test]
async fn open_slots_subtract_existing_bookings() {
    let server = MockServer::start().await;
    let professional_id = Uuid::new_v4();

    mount_empty(&server, "system_settings").await;
    mount_empty(&server, "availability_overrides").await;
    mount_empty(&server, "blocked_slots").await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/availability_rules"))
        .and(query_param("weekday", "eq.1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            rule_row(Uuid::new_v4(), professional_id, 1, "08:00:00", "12:00:00")
        ])))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("status", "neq.cancelled"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "scheduled_at": "2025-06-02T13:00:00Z", "duration_minutes": 60 }
        ])))
        .mount(&server)
        .await;

    let config = TestConfig::with_supabase_url(&server.uri()).to_arc();
    let query = SlotQuery {
        date: NaiveDate::from_ymd_opt(2025, 6, 2).unwrap(),
        duration_minutes: Some(60),
        step_minutes: Some(60),
    };

    let Json(response) = get_open_slots(State(config), Path(professional_id), Query(query))
        .await
        .unwrap();

    assert_eq!(response.timezone, "America/Sao_Paulo");
    assert_eq!(response.open_ranges.len(), 2);
    assert_eq!(response.open_ranges[0].start.to_rfc3339(), "2025-06-02T11:00:00+00:00");
    assert_eq!(response.open_ranges[0].end.to_rfc3339(), "2025-06-02T13:00:00+00:00");
    assert_eq!(response.open_ranges[1].start.to_rfc3339(), "2025-06-02T14:00:00+00:00");
    assert_eq!(response.slots.map(|s| s.len()), Some(3));
}

#[tokio::test]
async fn open_slots_reject_out_of_range_lengths() {
    let server = MockServer::start().await;
    let professional_id = Uuid::new_v4();
    for table in ["system_settings", "availability_rules", "availability_overrides", "blocked_slots", "appointments"] {
        mount_empty(&server, table).await;
    }
    let config = TestConfig::with_supabase_url(&server.uri()).to_arc();

    for (duration_minutes, step_minutes) in [(Some(i64::MAX), None), (Some(60), Some(i64::MAX / 60))] {
        let query = SlotQuery {
            date: NaiveDate::from_ymd_opt(2025, 6, 2).unwrap(),
            duration_minutes,
            step_minutes,
        };
        let result = get_open_slots(State(config.clone()), Path(professional_id), Query(query)).await;
        assert_matches!(result, Err(AppError::BadRequest(_)));
    }
}

#[tokio::test]
async fn open_slots_honour_business_hours_from_settings() {
    let server = MockServer::start().await;
    let professional_id = Uuid::new_v4();

    Mock::given(method("GET"))
        .and(path("/rest/v1/system_settings"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "key": "business_start_hour", "value": "10" },
            { "key": "business_end_hour", "value": 11 }
        ])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/availability_rules"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            rule_row(Uuid::new_v4(), professional_id, 1, "08:00:00", "18:00:00")
        ])))
        .mount(&server)
        .await;
    mount_empty(&server, "availability_overrides").await;
    mount_empty(&server, "blocked_slots").await;
    mount_empty(&server, "appointments").await;

    let config = TestConfig::with_supabase_url(&server.uri()).to_arc();
    let query = SlotQuery {
        date: NaiveDate::from_ymd_opt(2025, 6, 2).unwrap(),
        duration_minutes: None,
        step_minutes: None,
    };

    let Json(response) = get_open_slots(State(config), Path(professional_id), Query(query))
        .await
        .unwrap();

    assert_eq!(response.duration_minutes, DEFAULT_SERVICE_DURATION_MINUTES);
    assert_eq!(response.open_ranges.len(), 1);
    assert_eq!(response.open_ranges[0].start.to_rfc3339(), "2025-06-02T13:00:00+00:00");
    assert!(response.slots.is_none());
}

#[tokio::test]
async fn open_slots_surface_store_failures_as_upstream_errors() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .mount(&server)
        .await;

    let config = TestConfig::with_supabase_url(&server.uri()).to_arc();
    let query = SlotQuery {
        date: NaiveDate::from_ymd_opt(2025, 6, 2).unwrap(),
        duration_minutes: Some(30),
        step_minutes: None,
    };

    let result = get_open_slots(State(config), Path(Uuid::new_v4()), Query(query)).await;
    assert_matches!(result, Err(AppError::ExternalService(_)));
}

#[tokio::test]
async fn professional_creates_own_weekly_rule() {
    let server = MockServer::start().await;
    let professional = TestUser::professional("pro@example.com");
    let professional_id = professional.uuid();

    Mock::given(method("POST"))
        .and(path("/rest/v1/availability_rules"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([
            rule_row(Uuid::new_v4(), professional_id, 2, "09:00:00", "17:00:00")
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let config = TestConfig::with_supabase_url(&server.uri()).to_arc();
    let request = CreateWeeklyRuleRequest {
        weekday: 2,
        start_time: "09:00".to_string(),
        end_time: "17:00".to_string(),
    };

    let (status, Json(body)) = create_rule(
        State(config),
        Extension(professional.to_user()),
        bearer("token"),
        Path(professional_id),
        Json(request),
    )
    .await
    .unwrap();

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["weekday"], 2);
    assert_eq!(body["start_time"], "09:00:00");
}

#[tokio::test]
async fn rule_for_someone_else_is_forbidden() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(201))
        .expect(0)
        .mount(&server)
        .await;

    let config = TestConfig::with_supabase_url(&server.uri()).to_arc();
    let intruder = TestUser::professional("other@example.com");
    let request = CreateWeeklyRuleRequest {
        weekday: 1,
        start_time: "08:00".to_string(),
        end_time: "18:00".to_string(),
    };

    let result = create_rule(
        State(config),
        Extension(intruder.to_user()),
        bearer("token"),
        Path(Uuid::new_v4()),
        Json(request),
    )
    .await;

    assert_matches!(result, Err(AppError::Forbidden(_)));
}

#[tokio::test]
async fn inverted_rule_is_a_bad_request() {
    let config = TestConfig::default().to_arc();
    let professional = TestUser::professional("pro@example.com");
    let request = CreateWeeklyRuleRequest {
        weekday: 1,
        start_time: "18:00".to_string(),
        end_time: "08:00".to_string(),
    };

    let result = create_rule(
        State(config),
        Extension(professional.to_user()),
        bearer("token"),
        Path(professional.uuid()),
        Json(request),
    )
    .await;

    assert_matches!(result, Err(AppError::BadRequest(_)));
}

#[tokio::test]
async fn deleting_a_missing_block_is_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/rest/v1/blocked_slots"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    let config = TestConfig::with_supabase_url(&server.uri()).to_arc();
    let professional = TestUser::professional("pro@example.com");

    let result = delete_blocked_slot(
        State(config),
        Extension(professional.to_user()),
        bearer("token"),
        Path((professional.uuid(), Uuid::new_v4())),
    )
    .await;

    assert_matches!(result, Err(AppError::NotFound(_)));
}

#[tokio::test]
async fn management_routes_require_a_bearer_token() {
    let app = availability_routes(TestConfig::default().to_arc());

    let response = app
        .oneshot(
            Request::builder()
                .uri(format!("/{}/rules", Uuid::new_v4()))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn management_routes_accept_a_valid_token() {
    let server = MockServer::start().await;
    let professional = TestUser::professional("pro@example.com");
    Mock::given(method("GET"))
        .and(path("/rest/v1/availability_overrides"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    let app = availability_routes(TestConfig::with_supabase_url(&server.uri()).to_arc());
    let response = app
        .oneshot(
            Request::builder()
                .uri(format!("/{}/overrides", professional.uuid()))
                .header("Authorization", JwtTestUtils::bearer_for(&professional))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}
