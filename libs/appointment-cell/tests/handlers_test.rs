use std::sync::Arc;

use assert_matches::assert_matches;
use axum::{
    body::{to_bytes, Body},
    extract::{Extension, Path, Query, State},
    http::{header, Method, Request, StatusCode},
    Json,
};
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

use appointment_cell::handlers::*;
use appointment_cell::models::*;
use appointment_cell::router::appointment_routes;
use appointment_cell::services::{Clock, ConflictPolicy, InMemoryAppointmentStore, LifecycleManager, ManualClock};
use shared_models::{auth::User, error::AppError};
use shared_utils::test_utils::{JwtTestUtils, TestConfig, TestUser};

fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, 12, 0, 0).unwrap()
}

struct TestApp {
    config: TestConfig,
    state: Arc<AppointmentState>,
    clock: Arc<ManualClock>,
}

impl TestApp {
    fn new() -> Self {
        let config = TestConfig::default();
        let app_config = config.to_arc();
        let clock = Arc::new(ManualClock::new(start_time()));
        let lifecycle = Arc::new(LifecycleManager::new(
            Arc::new(InMemoryAppointmentStore::new(ConflictPolicy::default())),
            clock.clone(),
            &app_config.booking,
        ));
        let state = Arc::new(AppointmentState::new(app_config, lifecycle));
        Self { config, state, clock }
    }

    async fn book_for(&self, owner: &TestUser, offset: Duration) -> Appointment {
        self.state
            .lifecycle
            .create_appointment(Uuid::new_v4(), owner.uuid(), self.clock.now() + offset)
            .await
            .expect("booking should succeed")
    }
}

fn extension(user: &TestUser) -> Extension<User> {
    Extension(user.to_user())
}

// ==============================================================================
// DIRECT HANDLER CALLS
// ==============================================================================

#[tokio::test]
async fn test_book_appointment_for_self() {
    let app = TestApp::new();
    let owner = TestUser::owner("owner@example.com");
    let request = BookAppointmentRequest {
        subject_id: Uuid::new_v4(),
        owner_id: owner.uuid(),
        scheduled_at: start_time() + Duration::days(2),
    };

    let (status, Json(body)) = book_appointment(State(app.state.clone()), extension(&owner), Json(request))
        .await
        .unwrap();

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["success"], true);
    assert_eq!(body["appointment"]["status"], "pending");
    assert_eq!(body["appointment"]["owner_id"], owner.id);
}

#[tokio::test]
async fn test_book_appointment_for_someone_else_is_forbidden() {
    let app = TestApp::new();
    let caller = TestUser::owner("caller@example.com");
    let request = BookAppointmentRequest {
        subject_id: Uuid::new_v4(),
        owner_id: Uuid::new_v4(),
        scheduled_at: start_time() + Duration::days(2),
    };

    let result = book_appointment(State(app.state.clone()), extension(&caller), Json(request)).await;
    assert_matches!(result, Err(AppError::Forbidden(_)));
}

#[tokio::test]
async fn test_admin_books_on_behalf_of_owner() {
    let app = TestApp::new();
    let admin = TestUser::admin("admin@example.com");
    let request = BookAppointmentRequest {
        subject_id: Uuid::new_v4(),
        owner_id: Uuid::new_v4(),
        scheduled_at: start_time() + Duration::hours(5),
    };

    let result = book_appointment(State(app.state.clone()), extension(&admin), Json(request)).await;
    assert!(result.is_ok());
}

#[tokio::test]
async fn test_book_in_past_is_validation_error() {
    let app = TestApp::new();
    let owner = TestUser::owner("owner@example.com");
    let request = BookAppointmentRequest {
        subject_id: Uuid::new_v4(),
        owner_id: owner.uuid(),
        scheduled_at: start_time() - Duration::minutes(1),
    };

    let result = book_appointment(State(app.state.clone()), extension(&owner), Json(request)).await;
    assert_matches!(result, Err(AppError::ValidationError(_)));
}

#[tokio::test]
async fn test_double_booking_is_conflict() {
    let app = TestApp::new();
    let owner = TestUser::owner("owner@example.com");
    let subject_id = Uuid::new_v4();
    let scheduled_at = start_time() + Duration::days(1);

    let first = BookAppointmentRequest { subject_id, owner_id: owner.uuid(), scheduled_at };
    book_appointment(State(app.state.clone()), extension(&owner), Json(first)).await.unwrap();

    let second = BookAppointmentRequest {
        subject_id,
        owner_id: owner.uuid(),
        scheduled_at: scheduled_at + Duration::minutes(10),
    };
    let result = book_appointment(State(app.state.clone()), extension(&owner), Json(second)).await;
    assert_matches!(result, Err(AppError::Conflict(_)));
}

#[tokio::test]
async fn test_get_appointment_checks_ownership() {
    let app = TestApp::new();
    let owner = TestUser::owner("owner@example.com");
    let stranger = TestUser::owner("stranger@example.com");
    let appointment = app.book_for(&owner, Duration::days(1)).await;

    let Json(body) = get_appointment(State(app.state.clone()), extension(&owner), Path(appointment.id))
        .await
        .unwrap();
    assert_eq!(body["appointment"]["id"], appointment.id.to_string());

    let result = get_appointment(State(app.state.clone()), extension(&stranger), Path(appointment.id)).await;
    assert_matches!(result, Err(AppError::Forbidden(_)));

    let missing = get_appointment(State(app.state.clone()), extension(&owner), Path(Uuid::new_v4())).await;
    assert_matches!(missing, Err(AppError::NotFound(_)));
}

#[tokio::test]
async fn test_cancel_by_stranger_is_forbidden_and_leaves_status() {
    let app = TestApp::new();
    let owner = TestUser::owner("owner@example.com");
    let stranger = TestUser::owner("stranger@example.com");
    let appointment = app.book_for(&owner, Duration::days(1)).await;

    let result = cancel_appointment(State(app.state.clone()), extension(&stranger), Path(appointment.id)).await;
    assert_matches!(result, Err(AppError::Forbidden(_)));

    let current = app.state.lifecycle.get_appointment(appointment.id).await.unwrap();
    assert_eq!(current.status, AppointmentStatus::Pending);
}

#[tokio::test]
async fn test_cancel_twice_succeeds() {
    let app = TestApp::new();
    let owner = TestUser::owner("owner@example.com");
    let appointment = app.book_for(&owner, Duration::days(1)).await;

    for _ in 0..2 {
        let Json(body) = cancel_appointment(State(app.state.clone()), extension(&owner), Path(appointment.id))
            .await
            .unwrap();
        assert_eq!(body["appointment"]["status"], "cancelled");
    }
}

#[tokio::test]
async fn test_confirm_then_cancel_after_start_is_conflict() {
    let app = TestApp::new();
    let owner = TestUser::owner("owner@example.com");
    let appointment = app.book_for(&owner, Duration::hours(1)).await;

    let Json(body) = confirm_appointment(State(app.state.clone()), extension(&owner), Path(appointment.id))
        .await
        .unwrap();
    assert_eq!(body["appointment"]["status"], "confirmed");

    app.clock.advance(Duration::hours(2));

    let result = cancel_appointment(State(app.state.clone()), extension(&owner), Path(appointment.id)).await;
    assert_matches!(result, Err(AppError::Conflict(_)));
}

#[tokio::test]
async fn test_failed_notifications_requires_admin() {
    let app = TestApp::new();
    let owner = TestUser::owner("owner@example.com");
    let admin = TestUser::admin("admin@example.com");
    app.book_for(&owner, Duration::days(1)).await;

    let result = list_failed_notifications(
        State(app.state.clone()),
        extension(&owner),
        Query(FailedNotificationsQuery { limit: None }),
    )
    .await;
    assert_matches!(result, Err(AppError::Forbidden(_)));

    let Json(body) = list_failed_notifications(
        State(app.state.clone()),
        extension(&admin),
        Query(FailedNotificationsQuery { limit: Some(0) }),
    )
    .await
    .unwrap();
    assert_eq!(body["count"], 0);
}

// ==============================================================================
// ROUTER
// ==============================================================================

async fn send(app: &TestApp, request: Request<Body>) -> (StatusCode, Value) {
    let response = appointment_routes(app.state.clone()).oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() { Value::Null } else { serde_json::from_slice(&bytes).unwrap() };
    (status, body)
}

#[tokio::test]
async fn test_router_rejects_missing_token() {
    let app = TestApp::new();
    let request = Request::builder()
        .method(Method::GET)
        .uri(format!("/{}", Uuid::new_v4()))
        .body(Body::empty())
        .unwrap();

    let (status, _) = send(&app, request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_router_rejects_bad_signature() {
    let app = TestApp::new();
    let owner = TestUser::owner("owner@example.com");
    let token = JwtTestUtils::create_invalid_signature_token(&owner);
    let request = Request::builder()
        .method(Method::GET)
        .uri(format!("/{}", Uuid::new_v4()))
        .header(header::AUTHORIZATION, format!("Bearer {}", token))
        .body(Body::empty())
        .unwrap();

    let (status, _) = send(&app, request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_router_books_and_confirms() {
    let app = TestApp::new();
    let owner = TestUser::owner("owner@example.com");
    let token = JwtTestUtils::create_test_token(&owner, &app.config.jwt_secret, None);

    let payload = json!({
        "subject_id": Uuid::new_v4(),
        "owner_id": owner.id,
        "scheduled_at": start_time() + Duration::days(3),
    });
    let request = Request::builder()
        .method(Method::POST)
        .uri("/")
        .header(header::AUTHORIZATION, format!("Bearer {}", token))
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(payload.to_string()))
        .unwrap();

    let (status, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::CREATED);
    let id = body["appointment"]["id"].as_str().unwrap().to_string();

    let request = Request::builder()
        .method(Method::POST)
        .uri(format!("/{}/confirm", id))
        .header(header::AUTHORIZATION, format!("Bearer {}", token))
        .body(Body::empty())
        .unwrap();

    let (status, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["appointment"]["status"], "confirmed");
}

#[tokio::test]
async fn test_router_unknown_appointment_is_not_found() {
    let app = TestApp::new();
    let owner = TestUser::owner("owner@example.com");
    let token = JwtTestUtils::create_test_token(&owner, &app.config.jwt_secret, None);
    let request = Request::builder()
        .method(Method::POST)
        .uri(format!("/{}/cancel", Uuid::new_v4()))
        .header(header::AUTHORIZATION, format!("Bearer {}", token))
        .body(Body::empty())
        .unwrap();

    let (status, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].is_string());
}
