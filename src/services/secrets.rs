//! Writes application secrets through the compute backend.

use super::compute::{ComputeBackend, ComputeResult};
use crate::models::{credentials::CredentialSet, machine::SecretInfo};
use futures::future::join_all;
use std::{collections::BTreeMap, fmt, sync::Arc};
use thiserror::Error;
use tracing::{error, info};

/// Prefix shared by every storage-related secret key.
pub const STORAGE_SECRET_PREFIX: &str = "FLY_TIGRIS_";
pub const ACCESS_KEY_ID_SECRET: &str = "FLY_TIGRIS_ACCESS_KEY_ID";
pub const SECRET_ACCESS_KEY_SECRET: &str = "FLY_TIGRIS_SECRET_ACCESS_KEY";
pub const BUCKET_SECRET: &str = "FLY_TIGRIS_BUCKET";

pub fn is_storage_secret(name: &str) -> bool {
    name.starts_with(STORAGE_SECRET_PREFIX)
}

/// The secret entries that expose `credentials` to an application.
pub fn storage_secrets(credentials: &CredentialSet) -> BTreeMap<String, String> {
    BTreeMap::from([
        (
            ACCESS_KEY_ID_SECRET.to_string(),
            credentials.access_key_id.clone(),
        ),
        (
            SECRET_ACCESS_KEY_SECRET.to_string(),
            credentials.secret_access_key.clone(),
        ),
        (BUCKET_SECRET.to_string(), credentials.bucket.clone()),
    ])
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretFailure {
    pub key: String,
    pub reason: String,
}

impl fmt::Display for SecretFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.key, self.reason)
    }
}

/// One or more secret writes failed. Writes that succeeded stay persisted.
#[derive(Debug, Error)]
#[error("failed to set secrets for `{app}`: {}", join_failures(.failures))]
pub struct PropagationError {
    pub app: String,
    pub failures: Vec<SecretFailure>,
}

impl PropagationError {
    pub fn failed_keys(&self) -> Vec<&str> {
        self.failures.iter().map(|f| f.key.as_str()).collect()
    }
}

fn join_failures(failures: &[SecretFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

#[derive(Clone)]
pub struct SecretPropagator {
    compute: Arc<dyn ComputeBackend>,
}

impl SecretPropagator {
    pub fn new(compute: Arc<dyn ComputeBackend>) -> Self {
        Self { compute }
    }

    /// Write every entry concurrently and wait for all of them.
    ///
    /// Returns the keys written, or every failing key with its reason.
    pub async fn set_many(
        &self,
        app: &str,
        secrets: &BTreeMap<String, String>,
        token: &str,
    ) -> Result<Vec<String>, PropagationError> {
        let writes = secrets.iter().map(|(key, value)| async move {
            let outcome = self.compute.set_secret(token, app, key, value).await;
            (key.clone(), outcome)
        });

        let mut written = Vec::with_capacity(secrets.len());
        let mut failures = Vec::new();
        for (key, outcome) in join_all(writes).await {
            match outcome {
                Ok(()) => written.push(key),
                Err(err) => failures.push(SecretFailure {
                    key,
                    reason: err.to_string(),
                }),
            }
        }

        if !failures.is_empty() {
            let err = PropagationError {
                app: app.to_string(),
                failures,
            };
            error!(app, failed = ?err.failed_keys(), "secret propagation failed");
            return Err(err);
        }

        info!(app, count = written.len(), "secrets set");
        Ok(written)
    }

    pub async fn list(&self, app: &str, token: &str) -> ComputeResult<Vec<SecretInfo>> {
        self.compute.list_secrets(token, app).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::credentials::AccessKeyPair;
    use crate::services::testing::FakeCompute;

    fn credentials() -> CredentialSet {
        CredentialSet::new(
            AccessKeyPair {
                access_key_id: "tid_1".into(),
                secret_access_key: "tsec_1".into(),
            },
            "demo-1",
        )
    }

    #[test]
    fn storage_secrets_are_all_prefixed() {
        let secrets = storage_secrets(&credentials());
        assert_eq!(secrets.len(), 3);
        assert!(secrets.keys().all(|k| is_storage_secret(k)));
        assert_eq!(secrets[BUCKET_SECRET], "demo-1");
        assert_eq!(secrets[ACCESS_KEY_ID_SECRET], "tid_1");
        assert_eq!(secrets[SECRET_ACCESS_KEY_SECRET], "tsec_1");
    }

    #[tokio::test]
    async fn set_many_writes_every_entry() {
        let compute = Arc::new(FakeCompute::new().with_app("demo-1", "acme"));
        let propagator = SecretPropagator::new(compute.clone());

        let written = propagator
            .set_many("demo-1", &storage_secrets(&credentials()), "Bearer t")
            .await
            .unwrap();

        assert_eq!(written.len(), 3);
        assert_eq!(compute.secrets_of("demo-1"), storage_secrets(&credentials()));
    }

    #[tokio::test]
    async fn partial_failure_names_failing_keys_and_keeps_the_rest() {
        let compute = Arc::new(
            FakeCompute::new()
                .with_app("demo-1", "acme")
                .failing_secrets(&[SECRET_ACCESS_KEY_SECRET]),
        );
        let propagator = SecretPropagator::new(compute.clone());

        let err = propagator
            .set_many("demo-1", &storage_secrets(&credentials()), "Bearer t")
            .await
            .unwrap_err();

        assert_eq!(err.failed_keys(), vec![SECRET_ACCESS_KEY_SECRET]);
        assert!(err.to_string().contains(SECRET_ACCESS_KEY_SECRET));
        assert!(err.to_string().contains("injected failure"));

        let stored = compute.secrets_of("demo-1");
        assert!(stored.contains_key(ACCESS_KEY_ID_SECRET));
        assert!(stored.contains_key(BUCKET_SECRET));
        assert!(!stored.contains_key(SECRET_ACCESS_KEY_SECRET));
    }

    #[tokio::test]
    async fn list_returns_current_secret_names() {
        let compute = Arc::new(FakeCompute::new().with_secret("demo-1", "DATABASE_URL", "pg://"));
        let propagator = SecretPropagator::new(compute);

        let listed = propagator.list("demo-1", "Bearer t").await.unwrap();
        assert_eq!(listed, vec![SecretInfo::named("DATABASE_URL")]);
    }
}
