// SPDX-License-Identifier: MIT OR Apache-2.0
use automn_config::RunnerConfig;
use automn_runner::state::AppState;
use automn_runner::http::build_router;
use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use std::sync::Arc;
use tower::ServiceExt;

fn config(dir: &std::path::Path) -> RunnerConfig {
    RunnerConfig {
        state_file: dir.join("state.json"),
        scripts_dir: dir.join("scripts"),
        workdir_dir: dir.join("workdir"),
        ..RunnerConfig::default()
    }
}

async fn body_json(resp: axum::response::Response) -> serde_json::Value {
    let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn status_reports_uninitialized_before_any_secret_is_set() {
    let dir = tempfile::tempdir().unwrap();
    let state = Arc::new(AppState::new(config(dir.path())).await);
    let app = build_router(state);

    let resp = app
        .oneshot(Request::builder().uri("/status").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let json = body_json(resp).await;
    assert_eq!(json["uninitialized"], true);
    assert_eq!(json["secretStored"], false);
    assert_eq!(json["locked"], false);
}

#[tokio::test]
async fn index_renders_registration_form_when_no_secret_configured() {
    let dir = tempfile::tempdir().unwrap();
    let state = Arc::new(AppState::new(config(dir.path())).await);
    let app = build_router(state);

    let resp = app
        .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let html = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(html.contains("/ui/register"));
}

#[tokio::test]
async fn register_then_status_reports_secret_stored() {
    let dir = tempfile::tempdir().unwrap();
    let state = Arc::new(AppState::new(config(dir.path())).await);
    let app = build_router(state);

    let resp = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/ui/register")
                .header("content-type", "application/x-www-form-urlencoded")
                .body(Body::from("secret=a-stored-secret-123456"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = app
        .oneshot(Request::builder().uri("/status").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let json = body_json(resp).await;
    assert_eq!(json["secretStored"], true);
    assert_eq!(json["uninitialized"], false);
}

#[tokio::test]
async fn run_without_secret_header_is_unauthorized() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = config(dir.path());
    cfg.secret = Some("a-stored-secret-123456".into());
    let state = Arc::new(AppState::new(cfg).await);
    let app = build_router(state);

    let resp = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/run")
                .header("content-type", "application/json")
                .body(Body::from(
                    r#"{"script":{"id":"s1","language":"shell","code":"echo hi"},"reqBody":{}}"#,
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn run_without_a_configured_secret_is_service_unavailable() {
    let dir = tempfile::tempdir().unwrap();
    let state = Arc::new(AppState::new(config(dir.path())).await);
    let app = build_router(state);

    let resp = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/run")
                .header("content-type", "application/json")
                .body(Body::from(
                    r#"{"script":{"id":"s1","language":"shell","code":"echo hi"},"reqBody":{}}"#,
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn reset_is_forbidden_without_a_configured_token() {
    let dir = tempfile::tempdir().unwrap();
    let state = Arc::new(AppState::new(config(dir.path())).await);
    let app = build_router(state);

    let resp = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/internal/reset")
                .header("content-type", "application/json")
                .body(Body::from(r#"{"token":"anything"}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn run_at_capacity_is_rejected_with_429() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = config(dir.path());
    cfg.secret = Some("a-stored-secret-123456".into());
    cfg.local_max_concurrency = Some(0);
    let state = Arc::new(AppState::new(cfg).await);
    let app = build_router(state);

    let resp = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/run")
                .header("content-type", "application/json")
                .header("x-automn-runner-secret", "a-stored-secret-123456")
                .body(Body::from(
                    r#"{"script":{"id":"s1","language":"shell","code":"echo hi"},"reqBody":{}}"#,
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
}
