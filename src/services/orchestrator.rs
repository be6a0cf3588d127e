//! App lifecycle saga: an application, its bucket and its storage secrets are
//! created as one unit and torn down together.
//!
//! Create runs `Start -> AppCreated -> BucketReady -> SecretsSet -> Done`.
//! Every step that succeeds pushes its undo onto a [`Compensations`] stack;
//! any later failure unwinds that stack before the error is returned. Undo
//! failures are logged and never replace the error that caused the abort.

use super::bucket_provisioner::BucketProvisioner;
use super::compensation::Compensations;
use super::compute::{ComputeBackend, ComputeError, UpstreamResponse};
use super::config_merger::{DeploymentTemplate, merge};
use super::secrets::{PropagationError, SecretPropagator, storage_secrets};
use super::storage::StorageError;
use crate::models::machine::MachineConfig;
use bytes::Bytes;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SagaStage {
    Start,
    AppCreated,
    BucketReady,
    SecretsSet,
    Done,
}

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("{0}")]
    InvalidRequest(String),
    /// Non-2xx from the compute backend, relayed to the caller untouched.
    #[error("compute backend rejected the request with {}", .0.status)]
    Upstream(UpstreamResponse),
    #[error(transparent)]
    Compute(#[from] ComputeError),
    #[error("Failed to set up Tigris: {0}")]
    Provisioning(#[source] StorageError),
    #[error("Failed to set up Tigris: {0}")]
    Propagation(#[source] PropagationError),
    #[error("Failed to delete app: {source}")]
    DeleteApp {
        app: String,
        #[source]
        source: ComputeError,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DestroyOutcome {
    pub bucket_deleted: bool,
}

pub struct AppLifecycle {
    compute: Arc<dyn ComputeBackend>,
    buckets: BucketProvisioner,
    secrets: SecretPropagator,
    template: Arc<DeploymentTemplate>,
}

impl AppLifecycle {
    pub fn new(
        compute: Arc<dyn ComputeBackend>,
        buckets: BucketProvisioner,
        template: Arc<DeploymentTemplate>,
    ) -> Self {
        Self {
            secrets: SecretPropagator::new(compute.clone()),
            compute,
            buckets,
            template,
        }
    }

    pub fn buckets(&self) -> &BucketProvisioner {
        &self.buckets
    }

    /// Create `app` upstream from the caller's raw body, then its bucket and
    /// storage secrets. Returns the upstream create response on success.
    pub async fn create(
        &self,
        token: &str,
        app: &str,
        body: Bytes,
    ) -> Result<UpstreamResponse, LifecycleError> {
        let mut stage = SagaStage::Start;

        let created = self.compute.create_app(token, body).await?;
        if !created.is_success() {
            warn!(app, status = %created.status, "upstream app creation rejected");
            return Err(LifecycleError::Upstream(created));
        }
        stage = advance(app, stage, SagaStage::AppCreated);

        let compute = self.compute.as_ref();
        let mut undo = Compensations::new();
        undo.push(format!("delete app {app}"), async move {
            compute.delete_app(token, app).await.map_err(anyhow::Error::from)
        });

        // The provisioner removes its own partial artefacts before returning.
        let credentials = match self.buckets.provision(app).await {
            Ok(credentials) => credentials,
            Err(err) => {
                return Err(abort(app, stage, undo, LifecycleError::Provisioning(err)).await);
            }
        };
        stage = advance(app, stage, SagaStage::BucketReady);

        let buckets = &self.buckets;
        undo.push(format!("delete bucket {app}"), async move {
            buckets.teardown(app).await.map_err(anyhow::Error::from)
        });

        let secrets = storage_secrets(&credentials);
        if let Err(err) = self.secrets.set_many(app, &secrets, token).await {
            return Err(abort(app, stage, undo, LifecycleError::Propagation(err)).await);
        }
        stage = advance(app, stage, SagaStage::SecretsSet);

        undo.disarm();
        advance(app, stage, SagaStage::Done);
        info!(app, bucket = app, "app created with storage");
        Ok(created)
    }

    /// Delete the bucket, then the app. Bucket failure is reported in the
    /// outcome, app failure is an error.
    pub async fn destroy(&self, token: &str, app: &str) -> Result<DestroyOutcome, LifecycleError> {
        let bucket_deleted = match self.buckets.teardown(app).await {
            Ok(()) => true,
            Err(err) => {
                warn!(app, bucket = app, error = %err, "bucket deletion failed, deleting app anyway");
                false
            }
        };

        self.compute
            .delete_app(token, app)
            .await
            .map_err(|source| LifecycleError::DeleteApp {
                app: app.to_string(),
                source,
            })?;

        info!(app, bucket_deleted, "app destroyed");
        Ok(DestroyOutcome { bucket_deleted })
    }

    /// Merge the caller's `config` with the template and live secret names,
    /// then create the machine. Other top-level fields are forwarded as-is.
    pub async fn create_machine(
        &self,
        token: &str,
        app: &str,
        mut body: Value,
    ) -> Result<UpstreamResponse, LifecycleError> {
        let raw = body
            .get("config")
            .filter(|c| !c.is_null())
            .cloned()
            .ok_or_else(|| LifecycleError::InvalidRequest("config is required in request body".into()))?;
        let config: MachineConfig = serde_json::from_value(raw)
            .map_err(|e| LifecycleError::InvalidRequest(format!("invalid machine config: {e}")))?;

        let secrets = self.secrets.list(app, token).await?;
        let processed = merge(&config, &secrets, &self.template);
        debug!(app, secrets = secrets.len(), "machine config merged");

        if let Some(fields) = body.as_object_mut() {
            fields.insert("config".into(), processed);
        }

        let response = self.compute.create_machine(token, app, &body).await?;
        if !response.is_success() {
            warn!(app, status = %response.status, "upstream machine creation rejected");
            return Err(LifecycleError::Upstream(response));
        }
        info!(app, "machine created");
        Ok(response)
    }
}

fn advance(app: &str, from: SagaStage, to: SagaStage) -> SagaStage {
    debug!(app, from = ?from, stage = ?to, "create saga advanced");
    to
}

async fn abort(
    app: &str,
    stage: SagaStage,
    undo: Compensations<'_>,
    cause: LifecycleError,
) -> LifecycleError {
    error!(app, stage = ?stage, error = %cause, "create saga failed, compensating");
    let report = undo.unwind().await;
    if report.is_clean() {
        info!(app, undone = ?report.attempted, "compensation finished");
    } else {
        error!(
            app,
            failed = ?report.failed,
            "compensation incomplete, resources may need manual cleanup"
        );
    }
    cause
}
