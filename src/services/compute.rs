//! Client for the compute-orchestration (Machines) API.
//!
//! Every call carries the caller's `Authorization` value unchanged; this
//! service never holds compute credentials of its own.

use crate::models::machine::{ListSecretsResponse, SecretInfo};
use async_trait::async_trait;
use axum::{
    body::Body,
    http::{HeaderMap, Method, StatusCode, header},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use reqwest::{Client, RequestBuilder, Url};
use serde::Deserialize;
use serde_json::{Value, json};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum ComputeError {
    #[error("{op}: request to compute backend failed: {source}")]
    Transport {
        op: &'static str,
        #[source]
        source: reqwest::Error,
    },
    #[error("{op}: compute backend returned {status}: {body}")]
    Status {
        op: &'static str,
        status: StatusCode,
        body: String,
    },
    #[error("{op}: unexpected response from compute backend: {message}")]
    Decode { op: &'static str, message: String },
}

pub type ComputeResult<T> = Result<T, ComputeError>;

/// A compute backend response captured in full so it can be relayed verbatim.
#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl UpstreamResponse {
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    async fn capture(op: &'static str, resp: reqwest::Response) -> ComputeResult<Self> {
        let status = resp.status();
        let headers = resp.headers().clone();
        let body = resp
            .bytes()
            .await
            .map_err(|source| ComputeError::Transport { op, source })?;
        Ok(Self {
            status,
            headers,
            body,
        })
    }
}

impl IntoResponse for UpstreamResponse {
    fn into_response(self) -> Response {
        let mut response = Response::new(Body::from(self.body));
        *response.status_mut() = self.status;
        let headers = response.headers_mut();
        for (name, value) in self.headers.iter() {
            if name == header::CONNECTION
                || name == header::TRANSFER_ENCODING
                || name == header::CONTENT_LENGTH
            {
                continue;
            }
            headers.append(name.clone(), value.clone());
        }
        response
    }
}

/// The compute backend operations the orchestration layer depends on.
#[async_trait]
pub trait ComputeBackend: Send + Sync {
    /// Forward an application-create body; non-2xx responses are returned, not errors.
    async fn create_app(&self, token: &str, body: Bytes) -> ComputeResult<UpstreamResponse>;

    async fn delete_app(&self, token: &str, app: &str) -> ComputeResult<()>;

    /// Slug of the organization that owns `app`.
    async fn app_org(&self, token: &str, app: &str) -> ComputeResult<String>;

    async fn list_secrets(&self, token: &str, app: &str) -> ComputeResult<Vec<SecretInfo>>;

    async fn set_secret(&self, token: &str, app: &str, key: &str, value: &str)
    -> ComputeResult<()>;

    /// Forward a machine-create body; non-2xx responses are returned, not errors.
    async fn create_machine(
        &self,
        token: &str,
        app: &str,
        body: &Value,
    ) -> ComputeResult<UpstreamResponse>;
}

/// `reqwest` implementation of [`ComputeBackend`].
#[derive(Clone, Debug)]
pub struct MachinesClient {
    client: Client,
    base_url: Url,
}

#[derive(Deserialize)]
struct AppInfo {
    organization: OrgInfo,
}

#[derive(Deserialize)]
struct OrgInfo {
    slug: String,
}

impl MachinesClient {
    pub fn new(base_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to create HTTP client: {}", e))?;
        let base_url = Url::parse(base_url)
            .map_err(|e| anyhow::anyhow!("Invalid compute backend URL {}: {}", base_url, e))?;
        if base_url.cannot_be_a_base() {
            anyhow::bail!("Invalid compute backend URL {}: not a base URL", base_url);
        }

        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &str {
        self.base_url.as_str()
    }

    /// Append `segments` to the base URL, percent-encoding each one so a
    /// name containing `/`, `?` or `#` stays a single segment.
    fn build_url(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn request(&self, method: Method, segments: &[&str], token: &str) -> RequestBuilder {
        let mut request = self
            .client
            .request(method, self.build_url(segments))
            .header(header::ACCEPT_ENCODING, "identity");
        if !token.is_empty() {
            request = request.header(header::AUTHORIZATION, token);
        }
        request
    }

    /// Send a read-only request, retrying once if it timed out or never connected.
    async fn send_idempotent<F>(&self, op: &'static str, build: F) -> ComputeResult<reqwest::Response>
    where
        F: Fn() -> RequestBuilder,
    {
        match build().send().await {
            Ok(resp) => Ok(resp),
            Err(err) if err.is_timeout() || err.is_connect() => {
                warn!(op, error = %err, "transient compute backend failure, retrying once");
                build()
                    .send()
                    .await
                    .map_err(|source| ComputeError::Transport { op, source })
            }
            Err(source) => Err(ComputeError::Transport { op, source }),
        }
    }

    async fn send_once(
        &self,
        op: &'static str,
        request: RequestBuilder,
    ) -> ComputeResult<reqwest::Response> {
        request
            .send()
            .await
            .map_err(|source| ComputeError::Transport { op, source })
    }

    async fn ensure_success(
        op: &'static str,
        resp: reqwest::Response,
    ) -> ComputeResult<reqwest::Response> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        Err(ComputeError::Status { op, status, body })
    }
}

#[async_trait]
impl ComputeBackend for MachinesClient {
    async fn create_app(&self, token: &str, body: Bytes) -> ComputeResult<UpstreamResponse> {
        const OP: &str = "create app";
        let request = self
            .request(Method::POST, &["v1", "apps"], token)
            .header(header::CONTENT_TYPE, "application/json")
            .body(body);
        let resp = self.send_once(OP, request).await?;
        debug!(status = %resp.status(), "upstream app creation responded");
        UpstreamResponse::capture(OP, resp).await
    }

    async fn delete_app(&self, token: &str, app: &str) -> ComputeResult<()> {
        const OP: &str = "delete app";
        let resp = self
            .send_once(OP, self.request(Method::DELETE, &["v1", "apps", app], token))
            .await?;
        Self::ensure_success(OP, resp).await?;
        Ok(())
    }

    async fn app_org(&self, token: &str, app: &str) -> ComputeResult<String> {
        const OP: &str = "get app";
        let resp = self
            .send_idempotent(OP, || self.request(Method::GET, &["v1", "apps", app], token))
            .await?;
        let info: AppInfo = Self::ensure_success(OP, resp)
            .await?
            .json()
            .await
            .map_err(|e| ComputeError::Decode {
                op: OP,
                message: e.to_string(),
            })?;
        Ok(info.organization.slug)
    }

    async fn list_secrets(&self, token: &str, app: &str) -> ComputeResult<Vec<SecretInfo>> {
        const OP: &str = "list secrets";
        let path = ["v1", "apps", app, "secrets"];
        let resp = self
            .send_idempotent(OP, || self.request(Method::GET, &path, token))
            .await?;
        let listing: ListSecretsResponse = Self::ensure_success(OP, resp)
            .await?
            .json()
            .await
            .map_err(|e| ComputeError::Decode {
                op: OP,
                message: e.to_string(),
            })?;
        debug!(app, count = listing.secrets.len(), "listed app secrets");
        Ok(listing.secrets)
    }

    async fn set_secret(
        &self,
        token: &str,
        app: &str,
        key: &str,
        value: &str,
    ) -> ComputeResult<()> {
        const OP: &str = "set secret";
        let request = self
            .request(Method::POST, &["v1", "apps", app, "secrets", key], token)
            .json(&json!({ "value": value }));
        let resp = self.send_once(OP, request).await?;
        Self::ensure_success(OP, resp).await?;
        Ok(())
    }

    async fn create_machine(
        &self,
        token: &str,
        app: &str,
        body: &Value,
    ) -> ComputeResult<UpstreamResponse> {
        const OP: &str = "create machine";
        let request = self
            .request(Method::POST, &["v1", "apps", app, "machines"], token)
            .json(body);
        let resp = self.send_once(OP, request).await?;
        UpstreamResponse::capture(OP, resp).await
    }
}
