//! Creates a bucket together with a least-privilege identity bound to it.
//!
//! The identity is named after the bucket. Its access key is created first,
//! then the scoped policy, and attaching the policy is always the final step
//! so a key never carries object access without the scope being enforced.

use super::compensation::Compensations;
use super::storage::{StorageBackend, StorageError, StorageResult};
use crate::models::credentials::{CredentialSet, ScopedPolicy};
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Clone)]
pub struct BucketProvisioner {
    backend: Arc<dyn StorageBackend>,
}

impl BucketProvisioner {
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &dyn StorageBackend {
        self.backend.as_ref()
    }

    /// Create `bucket` and credentials scoped to it.
    ///
    /// If anything after bucket creation fails, every artefact created so far
    /// is removed (best effort, newest first) before the error is returned.
    pub async fn provision(&self, bucket: &str) -> StorageResult<CredentialSet> {
        let backend = self.backend.as_ref();

        info!(bucket, "creating bucket");
        backend.create_bucket(bucket).await?;

        let mut undo = Compensations::new();
        undo.push(format!("delete bucket {bucket}"), async move {
            backend.delete_bucket(bucket).await.map_err(anyhow::Error::from)
        });

        match issue_credentials(backend, bucket, &mut undo).await {
            Ok(credentials) => {
                undo.disarm();
                info!(bucket, access_key_id = %credentials.access_key_id, "bucket provisioned");
                Ok(credentials)
            }
            Err(err) => {
                error!(bucket, error = %err, "credential setup failed, cleaning up bucket");
                let report = undo.unwind().await;
                if !report.is_clean() {
                    warn!(bucket, failed = ?report.failed, "bucket cleanup incomplete");
                }
                Err(err)
            }
        }
    }

    /// Delete the bucket backing an application.
    ///
    /// The bucket identity, its access key and its policy are left in place.
    pub async fn teardown(&self, bucket: &str) -> StorageResult<()> {
        // TODO: detach `{bucket}-policy`, delete the identity's access keys and
        // the policy, then delete the bucket, once the key id and policy ARN
        // are recorded at provisioning time.
        info!(bucket, "deleting bucket");
        self.backend.delete_bucket(bucket).await
    }
}

async fn issue_credentials<'a>(
    backend: &'a dyn StorageBackend,
    bucket: &'a str,
    undo: &mut Compensations<'a>,
) -> StorageResult<CredentialSet> {
    let keys = backend.create_access_key(bucket).await?;
    let access_key_id = keys.access_key_id.clone();
    undo.push(format!("delete access key {access_key_id}"), async move {
        backend
            .delete_access_key(bucket, &access_key_id)
            .await
            .map_err(anyhow::Error::from)
    });

    let document = ScopedPolicy::for_bucket(bucket)
        .to_json()
        .map_err(|source| StorageError::PolicyDocument {
            bucket: bucket.to_string(),
            source,
        })?;
    let arn = backend
        .create_policy(&ScopedPolicy::policy_name(bucket), &document)
        .await?;
    let policy_arn = arn.clone();
    undo.push(format!("delete policy {arn}"), async move {
        backend
            .delete_policy(&policy_arn)
            .await
            .map_err(anyhow::Error::from)
    });

    backend.attach_user_policy(bucket, &arn).await?;

    Ok(CredentialSet::new(keys, bucket))
}
