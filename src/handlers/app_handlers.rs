//! HTTP handlers for the app and machine routes that need more than a
//! pass-through. The caller's `Authorization` header is forwarded unchanged
//! to every compute backend call made on their behalf.

use crate::{
    errors::AppError,
    models::app::{CreateAppRequest, DestroyAppResponse},
    services::{compute::UpstreamResponse, orchestrator::LifecycleError},
    state::AppState,
};
use axum::{
    Json,
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde_json::Value;
use tracing::{info, warn};

fn caller_token(headers: &HeaderMap) -> &str {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
}

/// App names become a single upstream path segment; `.` and `..` cannot.
fn app_segment(app: &str) -> Result<&str, AppError> {
    if app == "." || app == ".." {
        return Err(AppError::bad_request(format!("invalid app name `{}`", app)));
    }
    Ok(app)
}

/// Upstream rejections go back to the caller as they were received.
fn relay(result: Result<UpstreamResponse, LifecycleError>) -> Result<Response, AppError> {
    match result {
        Ok(upstream) | Err(LifecycleError::Upstream(upstream)) => Ok(upstream.into_response()),
        Err(err) => Err(err.into()),
    }
}

/// `POST /v1/apps`
///
/// Creates the app upstream, then its bucket and storage secrets. The body is
/// forwarded to the compute backend byte for byte.
pub async fn create_app(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, AppError> {
    let request: CreateAppRequest = serde_json::from_slice(&body)
        .map_err(|e| AppError::bad_request(format!("invalid JSON body: {}", e)))?;
    let app = request
        .app_name()
        .ok_or_else(|| AppError::bad_request("app_name is required in request body"))
        .and_then(app_segment)?;
    let org = request
        .org_slug()
        .ok_or_else(|| AppError::bad_request("org_slug is required in request body"))?;

    let token = caller_token(&headers);
    if !state.gatekeeper.validate(token, org).await? {
        warn!(app, org, "app creation rejected for organization");
        return Err(AppError::forbidden(format!(
            "organization {} is not allowed",
            org
        )));
    }

    info!(app, org, "creating app");
    relay(state.lifecycle.create(token, app, body).await)
}

/// `DELETE /v1/apps/{app}`
pub async fn destroy_app(
    State(state): State<AppState>,
    Path(app): Path<String>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AppError> {
    let app = app_segment(&app)?;
    let outcome = state.lifecycle.destroy(caller_token(&headers), app).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(DestroyAppResponse {
            success: true,
            bucket_deleted: outcome.bucket_deleted,
        }),
    ))
}

/// `POST /v1/apps/{app}/machines`
pub async fn create_machine(
    State(state): State<AppState>,
    Path(app): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, AppError> {
    let app = app_segment(&app)?;
    let body: Value = serde_json::from_slice(&body)
        .map_err(|e| AppError::bad_request(format!("invalid JSON body: {}", e)))?;
    relay(
        state
            .lifecycle
            .create_machine(caller_token(&headers), app, body)
            .await,
    )
}
