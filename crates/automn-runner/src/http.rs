// SPDX-License-Identifier: MIT OR Apache-2.0
//! The runner agent's HTTP surface: status/management UI, the secret-gated
//! package and run endpoints, and the internal reset hook.

use crate::middleware::{request_id_middleware, request_logger_middleware};
use crate::state::AppState;
use automn_core::{RunRequest, RunResult, RuntimeExecutables, ScriptDescriptor};
use automn_engine::LogStream;
use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use constant_time_eq::constant_time_eq;
use futures::StreamExt as _;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

const SECRET_HEADER: &str = "x-automn-runner-secret";

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/status", get(get_status))
        .route("/", get(get_index))
        .route("/ui/register", post(post_ui_register))
        .route("/ui/runtime-executables", post(post_ui_runtime_executables))
        .route("/ui/package-cache/clear", post(post_ui_package_cache_clear))
        .route("/api/packages/status", post(post_api_packages_status))
        .route("/api/run", post(post_api_run))
        .route("/internal/reset", post(post_internal_reset))
        .with_state(state)
        .layer(axum::middleware::from_fn(request_logger_middleware))
        .layer(axum::middleware::from_fn(request_id_middleware))
}

struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

fn authenticate(headers: &HeaderMap, secret: Option<&str>) -> Result<(), ApiError> {
    let configured = secret.ok_or_else(|| ApiError::new(StatusCode::SERVICE_UNAVAILABLE, "no secret configured"))?;
    let provided = headers
        .get(SECRET_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::new(StatusCode::UNAUTHORIZED, "missing secret header"))?;
    if constant_time_eq(configured.as_bytes(), provided.as_bytes()) {
        Ok(())
    } else {
        Err(ApiError::new(StatusCode::UNAUTHORIZED, "secret mismatch"))
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusResponse {
    uninitialized: bool,
    secret_stored: bool,
    secret_from_env: bool,
    locked: bool,
    registered_at: Option<chrono::DateTime<chrono::Utc>>,
    last_registration_attempt: Option<chrono::DateTime<chrono::Utc>>,
    last_registration_status: Option<automn_core::RegistrationStatus>,
    last_registration_error: Option<String>,
    runner_id: Option<String>,
    host_url: Option<String>,
    uptime_seconds: u64,
    active_runs: u32,
    local_max_concurrency: Option<u32>,
    runtime_executables: RuntimeExecutables,
}

async fn get_status(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    let snapshot = state.registration.snapshot().await;
    Json(StatusResponse {
        uninitialized: snapshot.is_uninitialized(),
        secret_stored: snapshot.secret.is_some(),
        secret_from_env: state.config.secret_from_env,
        locked: snapshot.is_locked(),
        registered_at: snapshot.registered_at,
        last_registration_attempt: snapshot.last_registration_attempt,
        last_registration_status: snapshot.last_registration_status,
        last_registration_error: snapshot.last_registration_error,
        runner_id: state.config.runner_id.clone(),
        host_url: state.config.host_url.clone(),
        uptime_seconds: state.uptime_seconds(),
        active_runs: state.active_runs(),
        local_max_concurrency: state.config.local_max_concurrency,
        runtime_executables: state.runtime_executables().await,
    })
}

async fn get_index(State(state): State<Arc<AppState>>) -> Html<String> {
    let snapshot = state.registration.snapshot().await;
    if snapshot.secret.is_none() && !state.config.secret_from_env {
        return Html(
            "<html><body><h1>Register runner</h1>\
             <form method=\"post\" action=\"/ui/register\">\
             <input type=\"password\" name=\"secret\" minlength=\"12\" required>\
             <button type=\"submit\">Register</button></form></body></html>"
                .to_string(),
        );
    }

    let mut body = format!(
        "<html><body><h1>Runner status</h1><p>registered: {}</p><p>locked: {}</p>",
        snapshot.registered_at.is_some(),
        snapshot.is_locked()
    );
    if !snapshot.is_locked() {
        body.push_str(
            "<form method=\"post\" action=\"/ui/runtime-executables\">\
             <input name=\"node\" placeholder=\"node path\">\
             <input name=\"python\" placeholder=\"python path\">\
             <input name=\"powershell\" placeholder=\"powershell path\">\
             <button type=\"submit\">Save</button></form>\
             <form method=\"post\" action=\"/ui/package-cache/clear\">\
             <button type=\"submit\">Clear package cache</button></form>",
        );
    }
    body.push_str("</body></html>");
    Html(body)
}

#[derive(Deserialize)]
struct RegisterForm {
    secret: String,
}

async fn post_ui_register(
    State(state): State<Arc<AppState>>,
    axum::Form(form): axum::Form<RegisterForm>,
) -> Result<Html<String>, ApiError> {
    state
        .registration
        .set_secret(form.secret)
        .await
        .map_err(|message| ApiError::new(StatusCode::BAD_REQUEST, message))?;
    state.registration.register_once(false).await;
    Ok(get_index(State(state)).await)
}

#[derive(Deserialize, Default)]
struct RuntimeExecutablesForm {
    node: Option<String>,
    python: Option<String>,
    powershell: Option<String>,
}

async fn post_ui_runtime_executables(
    State(state): State<Arc<AppState>>,
    axum::Form(form): axum::Form<RuntimeExecutablesForm>,
) -> Result<Html<String>, ApiError> {
    let snapshot = state.registration.snapshot().await;
    if snapshot.is_locked() {
        return Err(ApiError::new(
            StatusCode::FORBIDDEN,
            "registration is locked; runtime executables cannot be changed",
        ));
    }
    if state.config.runtime_executables_from_env.all() {
        return Err(ApiError::new(StatusCode::FORBIDDEN, "runtime executables are environment-managed"));
    }
    let env_flags = state.config.runtime_executables_from_env;
    state
        .update_runtime_executables(RuntimeExecutables {
            node: form.node.filter(|_| !env_flags.node),
            python: form.python.filter(|_| !env_flags.python),
            powershell: form.powershell.filter(|_| !env_flags.powershell),
            shell: None,
        })
        .await;
    Ok(get_index(State(state)).await)
}

async fn post_ui_package_cache_clear(State(state): State<Arc<AppState>>) -> Result<Html<String>, ApiError> {
    state
        .package_manager
        .clear_cache()
        .await
        .map_err(|err| ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, err.to_string()))?;
    Ok(get_index(State(state)).await)
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PackagesStatusRequest {
    packages: Vec<String>,
    #[serde(default)]
    script_id: Option<String>,
    #[serde(default)]
    #[allow(dead_code)]
    directory_key: Option<String>,
    #[serde(default)]
    install_missing: bool,
}

async fn post_api_packages_status(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<PackagesStatusRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let snapshot = state.registration.snapshot().await;
    authenticate(&headers, snapshot.secret.as_deref())?;

    let workdir = match &req.script_id {
        Some(id) => state.config.scripts_dir.join(sanitize(id)),
        None => state.config.workdir_dir.clone(),
    };
    match state
        .package_manager
        .check_status(&req.packages, &workdir, req.install_missing)
        .await
    {
        Ok(packages) => Ok(Json(json!({
            "packages": packages,
            "installMissing": req.install_missing,
        }))),
        Err(err) => Ok(Json(json!({
            "packages": Vec::<serde_json::Value>::new(),
            "installMissing": req.install_missing,
            "error": err.to_string(),
        }))),
    }
}

fn sanitize(id: &str) -> String {
    id.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c.to_ascii_lowercase() } else { '-' })
        .collect()
}

async fn post_api_run(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<RunRequest>,
) -> Result<Response, ApiError> {
    let snapshot = state.registration.snapshot().await;
    authenticate(&headers, snapshot.secret.as_deref())?;

    let Some(guard) = state.try_admit() else {
        return Err(ApiError::new(StatusCode::TOO_MANY_REQUESTS, "Runner is at capacity"));
    };

    let run_id = req
        .run_id
        .or_else(|| req.script.preassigned_run_id.clone())
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let (tx, rx) = mpsc::unbounded_channel::<String>();
    let on_log_tx = tx.clone();
    let on_log: automn_engine::OnLog = Arc::new(move |_stream: LogStream, line: &str| {
        let frame = json!({ "type": "log", "line": line });
        let _ = on_log_tx.send(format!("{}\n", frame));
    });

    let engine = state.engine.clone();
    let script: ScriptDescriptor = req.script;
    let req_body = req.req_body;
    tokio::spawn(async move {
        let _guard = guard;
        let result: RunResult = engine.execute_script(script, run_id, req_body, on_log).await;
        let frame = json!({ "type": "result", "data": result });
        let _ = tx.send(format!("{}\n", frame));
    });

    let stream = tokio_stream::wrappers::UnboundedReceiverStream::new(rx)
        .map(|line| Ok::<_, std::io::Error>(line.into_bytes()));
    let body = Body::from_stream(stream);

    Ok(Response::builder()
        .status(StatusCode::OK)
        .header("content-type", "application/jsonl; charset=utf-8")
        .header("x-accel-buffering", "no")
        .header("cache-control", "no-cache")
        .body(body)
        .unwrap())
}

#[derive(Deserialize)]
struct ResetRequest {
    token: String,
    #[serde(default)]
    secret: Option<String>,
}

async fn post_internal_reset(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ResetRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let Some(configured) = state.config.reset_token.as_deref() else {
        return Err(ApiError::new(StatusCode::FORBIDDEN, "reset is disabled"));
    };
    if !constant_time_eq(configured.as_bytes(), req.token.as_bytes()) {
        return Err(ApiError::new(StatusCode::UNAUTHORIZED, "invalid token"));
    }
    state
        .registration
        .reset(req.secret)
        .await
        .map_err(|message| ApiError::new(StatusCode::BAD_REQUEST, message))?;
    Ok(Json(json!({ "ok": true })))
}
