//! Operational HTTP surface over the in-memory backends

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

use notify_pipeline::config::Settings;
use notify_pipeline::notification::{Channel, CreateNotification, DispatchOutcome};
use notify_pipeline::server::{create_app, AppState};

const API_KEY: &str = "test-key";

async fn state() -> AppState {
    let mut settings = Settings::default();
    settings.api.key = Some(API_KEY.to_string());
    AppState::build(settings).await.unwrap()
}

async fn pending_notification(state: &AppState) -> Uuid {
    state
        .orchestrator
        .create_and_queue(CreateNotification::direct(
            Channel::Email,
            "ada@example.com",
            "hello",
        ))
        .await
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header("X-API-Key", API_KEY)
        .body(Body::empty())
        .unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    let body = body.to_string();
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("X-API-Key", API_KEY)
        .header("content-type", "application/json")
        .header("content-length", body.len())
        .body(Body::from(body))
        .unwrap()
}

async fn call(app: Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

#[tokio::test]
async fn test_health_reports_memory_backends() {
    let app = create_app(state().await);

    let (status, body) = call(app, Request::get("/health").body(Body::empty()).unwrap()).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["queue"]["backend"], "memory");
    assert_eq!(body["store"]["backend"], "memory");
    assert!(body.get("redis").is_none());
    assert!(body.get("postgres").is_none());
}

#[tokio::test]
async fn test_metrics_endpoint_is_public() {
    let app = create_app(state().await);

    let response = app
        .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_api_key_is_required() {
    let state = state().await;
    let id = pending_notification(&state).await;
    let app = create_app(state);
    let uri = format!("/api/v1/notifications/{id}");

    let missing = Request::get(&uri).body(Body::empty()).unwrap();
    let (status, _) = call(app.clone(), missing).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let wrong = Request::get(&uri)
        .header("X-API-Key", "nope")
        .body(Body::empty())
        .unwrap();
    let (status, _) = call(app.clone(), wrong).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = call(app, get(&uri)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["id"], id.to_string());
    assert_eq!(body["status"], "PENDING");
}

#[tokio::test]
async fn test_unknown_notification_is_404() {
    let app = create_app(state().await);
    let uri = format!("/api/v1/notifications/{}/attempts", Uuid::new_v4());

    let (status, body) = call(app, get(&uri)).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "NOT_FOUND");
}

#[tokio::test]
async fn test_pending_notification_cannot_be_retried_or_confirmed() {
    let state = state().await;
    let id = pending_notification(&state).await;
    let app = create_app(state);

    let (status, body) = call(
        app.clone(),
        post_json(&format!("/api/v1/notifications/{id}/retry"), json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "INVALID_TRANSITION");

    let (status, body) = call(
        app,
        post_json(
            &format!("/api/v1/notifications/{id}/status"),
            json!({"status": "DELIVERED"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "INVALID_TRANSITION");
}

#[tokio::test]
async fn test_callback_rejects_non_terminal_status() {
    let state = state().await;
    let id = pending_notification(&state).await;
    let app = create_app(state);

    let (status, body) = call(
        app,
        post_json(
            &format!("/api/v1/notifications/{id}/status"),
            json!({"status": "SENT"}),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn test_failed_notification_is_retried_over_http() {
    let state = state().await;
    let id = pending_notification(&state).await;

    // No providers configured
    let outcome = state.dispatcher.send_notification(id).await.unwrap();
    assert!(matches!(outcome, DispatchOutcome::Failed { .. }));

    let app = create_app(state);

    let (status, attempts) = call(
        app.clone(),
        get(&format!("/api/v1/notifications/{id}/attempts")),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(attempts.as_array().map(Vec::len), Some(1));
    assert_eq!(attempts[0]["status"], "FAILED");

    let (status, body) = call(
        app,
        post_json(&format!("/api/v1/notifications/{id}/retry"), json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["status"], "PENDING");
    assert_eq!(body["retry_count"], 1);
}

#[tokio::test]
async fn test_oversized_body_is_refused() {
    let state = state().await;
    let id = pending_notification(&state).await;
    let app = create_app(state);

    let padding = "x".repeat(64 * 1024);
    let (status, _) = call(
        app,
        post_json(
            &format!("/api/v1/notifications/{id}/status"),
            json!({"status": "DELIVERED", "padding": padding}),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
}
