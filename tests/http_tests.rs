// Integration tests for the HTTP control API

mod common;

use anyhow::Result;
use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use common::{fast_config, within, Harness, TestCamera};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;
use zynk_live::channel::MemoryTransport;
use zynk_live::{create_router, AppState, StaticIdentity};

fn app(h: &Harness, configured_user: Option<&str>) -> Router {
    let identity = Arc::new(StaticIdentity::new(configured_user.map(str::to_string)));
    create_router(AppState::new(Arc::clone(&h.coordinator), identity))
}

async fn call(app: &Router, request: Request<Body>) -> Result<(StatusCode, Value)> {
    let response = app.clone().oneshot(request).await?;
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await?;
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    Ok((status, body))
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::post(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn empty(method: &str, uri: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

#[tokio::test]
async fn test_health_check() -> Result<()> {
    let h = Harness::new(fast_config());
    let app = app(&h, None);

    let response = app.oneshot(empty("GET", "/health")).await?;
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = to_bytes(response.into_body(), usize::MAX).await?;
    assert_eq!(&bytes[..], b"OK");

    Ok(())
}

#[tokio::test]
async fn test_start_status_stop_teardown() -> Result<()> {
    let h = Harness::new(fast_config());
    let app = app(&h, None);

    let (status, body) = call(&app, post_json("/session/start", json!({"user_id": "u-1"}))).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["user_id"], "u-1");
    assert_eq!(body["status"], "streaming");

    let (status, body) = call(&app, post_json("/session/start", json!({"user_id": "u-2"}))).await?;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["error"].as_str().is_some());

    let mut peer = h.accept().await;
    assert!(within(peer.next_message()).await.is_some_and(|m| m.is_auth()));

    let (status, body) = call(&app, empty("GET", "/session/status")).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["user_id"], "u-1");
    assert_eq!(body["streaming"], true);

    let (status, body) = call(&app, empty("POST", "/session/stop")).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "stopping");
    assert_eq!(body["session"]["streaming"], false);

    let (status, body) = call(&app, empty("DELETE", "/session")).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "closed");
    assert_eq!(body["session"]["status"], "closed");

    let (_, body) = call(&app, empty("POST", "/session/stop")).await?;
    assert_eq!(body["status"], "idle");

    Ok(())
}

#[tokio::test]
async fn test_start_without_body_uses_identity() -> Result<()> {
    let h = Harness::new(fast_config());
    let app = app(&h, Some("configured-user"));

    let (status, body) = call(&app, empty("POST", "/session/start")).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["user_id"], "configured-user");

    h.coordinator.teardown();

    let anonymous = Harness::new(fast_config());
    let app = self::app(&anonymous, None);
    let (_, body) = call(&app, post_json("/session/start", json!({}))).await?;
    assert_eq!(body["user_id"], "anonymous");

    anonymous.coordinator.teardown();
    Ok(())
}

#[tokio::test]
async fn test_permission_denied_maps_to_forbidden() -> Result<()> {
    let h = Harness::with(fast_config(), TestCamera::denying(), MemoryTransport::new());
    let app = app(&h, None);

    let (status, body) = call(&app, post_json("/session/start", json!({"user_id": "u-1"}))).await?;

    assert_eq!(status, StatusCode::FORBIDDEN);
    assert!(body["error"]
        .as_str()
        .is_some_and(|e| e.contains("denied by test")));

    Ok(())
}

#[tokio::test]
async fn test_timeline_query() -> Result<()> {
    let h = Harness::new(fast_config());
    let app = app(&h, None);
    call(&app, post_json("/session/start", json!({"user_id": "u-1"}))).await?;

    let peer = h.accept().await;
    peer.send_json(&json!({
        "type": "ai_feedback",
        "message": "Keep eye contact",
        "startSeconds": 10.0,
        "endSeconds": 15.0,
        "segmentIndex": 4,
        "sessionId": "remote-3"
    }));
    common::eventually(|| h.coordinator.timeline().len() == 1).await;

    let (status, body) = call(&app, empty("GET", "/session/timeline")).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body[0]["id"], "remote-3-4");
    assert_eq!(body[0]["text"], "Keep eye contact");

    let (_, body) = call(&app, empty("GET", "/session/timeline?at=12.5")).await?;
    assert_eq!(body.as_array().map(Vec::len), Some(1));

    let (_, body) = call(&app, empty("GET", "/session/timeline?at=20")).await?;
    assert_eq!(body.as_array().map(Vec::len), Some(0));

    h.coordinator.teardown();
    Ok(())
}
