use crate::services::{
    compute::ComputeError, orchestrator::LifecycleError, org_gatekeeper::OrgError,
    proxy::ProxyError,
};
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;

/// Error returned to callers as `{"error": <message>, "status": "error"}`.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    /// Create a new AppError with a specific status and message.
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
        }
    }

    /// Shortcut for a 500 Internal Server Error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, msg)
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, msg)
    }

    /// The compute backend could not be reached or answered nonsense.
    pub fn bad_gateway(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_GATEWAY, msg)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(status = %self.status, error = %self.message, "request failed");
        }

        let body = Json(json!({
            "error": self.message,
            "status": "error"
        }));

        (self.status, body).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::internal(err.to_string())
    }
}

impl From<ComputeError> for AppError {
    fn from(err: ComputeError) -> Self {
        AppError::bad_gateway(err.to_string())
    }
}

impl From<OrgError> for AppError {
    fn from(err: OrgError) -> Self {
        AppError::bad_gateway(err.to_string())
    }
}

impl From<ProxyError> for AppError {
    fn from(err: ProxyError) -> Self {
        AppError::bad_gateway(err.to_string())
    }
}

impl From<LifecycleError> for AppError {
    fn from(err: LifecycleError) -> Self {
        match err {
            LifecycleError::InvalidRequest(msg) => AppError::bad_request(msg),
            LifecycleError::Upstream(resp) => {
                AppError::new(resp.status, String::from_utf8_lossy(&resp.body))
            }
            LifecycleError::Compute(err) => err.into(),
            err @ (LifecycleError::Provisioning(_)
            | LifecycleError::Propagation(_)
            | LifecycleError::DeleteApp { .. }) => AppError::internal(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::storage::StorageError;
    use http_body_util::BodyExt;
    use serde_json::Value;

    async fn body_json(err: AppError) -> (StatusCode, Value) {
        let response = err.into_response();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn renders_error_and_status_fields() {
        let (status, body) = body_json(AppError::bad_request("app_name is required in request body")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(
            body,
            json!({ "error": "app_name is required in request body", "status": "error" })
        );
    }

    #[tokio::test]
    async fn setup_failures_are_internal_errors() {
        let err = LifecycleError::Provisioning(StorageError::Unavailable("down".into()));
        let (status, body) = body_json(err.into()).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            body["error"],
            "Failed to set up Tigris: storage backend unavailable: down"
        );
    }

    #[test]
    fn compute_failures_map_to_bad_gateway() {
        let err: AppError = LifecycleError::Compute(ComputeError::Decode {
            op: "list secrets",
            message: "expected object".into(),
        })
        .into();
        assert_eq!(err.status, StatusCode::BAD_GATEWAY);
    }
}
