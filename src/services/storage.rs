//! Object-storage and identity backend (Tigris, S3 + IAM compatible).
//!
//! Authenticated with system-held static credentials from [`StorageConfig`].

use crate::{config::StorageConfig, models::credentials::AccessKeyPair};
use async_trait::async_trait;
use aws_config::{retry::RetryConfig, timeout::TimeoutConfig};
use aws_sdk_s3::error::DisplayErrorContext;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, error};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("creating bucket `{bucket}`: {message}")]
    CreateBucket { bucket: String, message: String },
    #[error("deleting bucket `{bucket}`: {message}")]
    DeleteBucket { bucket: String, message: String },
    #[error("creating access key for `{user}`: {message}")]
    CreateAccessKey { user: String, message: String },
    #[error("deleting access key `{access_key_id}` of `{user}`: {message}")]
    DeleteAccessKey {
        user: String,
        access_key_id: String,
        message: String,
    },
    #[error("creating policy `{policy}`: {message}")]
    CreatePolicy { policy: String, message: String },
    #[error("deleting policy `{arn}`: {message}")]
    DeletePolicy { arn: String, message: String },
    #[error("attaching policy `{arn}` to `{user}`: {message}")]
    AttachPolicy {
        user: String,
        arn: String,
        message: String,
    },
    #[error("building policy document for `{bucket}`: {source}")]
    PolicyDocument {
        bucket: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("storage backend unavailable: {0}")]
    Unavailable(String),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Bucket and identity operations used by the bucket provisioner.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    async fn create_bucket(&self, bucket: &str) -> StorageResult<()>;

    async fn delete_bucket(&self, bucket: &str) -> StorageResult<()>;

    /// Create an access key for `user`, creating the identity if needed.
    async fn create_access_key(&self, user: &str) -> StorageResult<AccessKeyPair>;

    async fn delete_access_key(&self, user: &str, access_key_id: &str) -> StorageResult<()>;

    /// Create a managed policy and return its ARN.
    async fn create_policy(&self, name: &str, document: &str) -> StorageResult<String>;

    async fn delete_policy(&self, arn: &str) -> StorageResult<()>;

    async fn attach_user_policy(&self, user: &str, arn: &str) -> StorageResult<()>;

    /// Cheap round trip used by readiness checks.
    async fn ping(&self) -> StorageResult<()>;
}

/// AWS SDK implementation talking to the Tigris S3 and IAM endpoints.
#[derive(Clone, Debug)]
pub struct TigrisBackend {
    s3: aws_sdk_s3::Client,
    iam: aws_sdk_iam::Client,
}

impl TigrisBackend {
    /// Build clients for both endpoints.
    ///
    /// S3 calls get standard retries except `CreateBucket`, which runs once
    /// (see [`StorageBackend::create_bucket`]). IAM retries are disabled: a
    /// retried `CreateAccessKey` or `CreatePolicy` whose first attempt landed
    /// would mint a second key or fail on a duplicate name.
    pub fn new(cfg: &StorageConfig, timeout: Duration) -> Self {
        let timeouts = TimeoutConfig::builder().operation_timeout(timeout).build();

        let s3_config = aws_sdk_s3::Config::builder()
            .behavior_version(aws_sdk_s3::config::BehaviorVersion::latest())
            .endpoint_url(&cfg.s3_endpoint)
            .region(aws_sdk_s3::config::Region::new(cfg.region.clone()))
            .credentials_provider(aws_sdk_s3::config::Credentials::new(
                &cfg.access_key_id,
                &cfg.secret_access_key,
                None,
                None,
                "machines-proxy",
            ))
            .retry_config(RetryConfig::standard().with_max_attempts(3))
            .timeout_config(timeouts.clone())
            .force_path_style(cfg.force_path_style)
            .build();

        let iam_config = aws_sdk_iam::Config::builder()
            .behavior_version(aws_sdk_iam::config::BehaviorVersion::latest())
            .endpoint_url(&cfg.iam_endpoint)
            .region(aws_sdk_iam::config::Region::new(cfg.region.clone()))
            .credentials_provider(aws_sdk_iam::config::Credentials::new(
                &cfg.access_key_id,
                &cfg.secret_access_key,
                None,
                None,
                "machines-proxy",
            ))
            .retry_config(RetryConfig::disabled())
            .timeout_config(timeouts)
            .build();

        Self {
            s3: aws_sdk_s3::Client::from_conf(s3_config),
            iam: aws_sdk_iam::Client::from_conf(iam_config),
        }
    }
}

fn describe<E>(err: &E) -> String
where
    E: std::error::Error,
{
    DisplayErrorContext(err).to_string()
}

#[async_trait]
impl StorageBackend for TigrisBackend {
    /// Sent once: a retry after a lost response would answer
    /// `BucketAlreadyOwnedByYou` and the saga would unwind a bucket it created.
    async fn create_bucket(&self, bucket: &str) -> StorageResult<()> {
        let start = Instant::now();
        self.s3
            .create_bucket()
            .bucket(bucket)
            .customize()
            .config_override(
                aws_sdk_s3::config::Builder::default().retry_config(RetryConfig::disabled()),
            )
            .send()
            .await
            .map_err(|e| {
                error!(bucket, error = %describe(&e), "create bucket failed");
                StorageError::CreateBucket {
                    bucket: bucket.to_string(),
                    message: describe(&e),
                }
            })?;
        debug!(
            bucket,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "bucket created"
        );
        Ok(())
    }

    async fn delete_bucket(&self, bucket: &str) -> StorageResult<()> {
        self.s3
            .delete_bucket()
            .bucket(bucket)
            .send()
            .await
            .map_err(|e| {
                error!(bucket, error = %describe(&e), "delete bucket failed");
                StorageError::DeleteBucket {
                    bucket: bucket.to_string(),
                    message: describe(&e),
                }
            })?;
        debug!(bucket, "bucket deleted");
        Ok(())
    }

    async fn create_access_key(&self, user: &str) -> StorageResult<AccessKeyPair> {
        let output = self
            .iam
            .create_access_key()
            .user_name(user)
            .send()
            .await
            .map_err(|e| StorageError::CreateAccessKey {
                user: user.to_string(),
                message: describe(&e),
            })?;

        let key = output.access_key().ok_or_else(|| StorageError::CreateAccessKey {
            user: user.to_string(),
            message: "missing access key information in response".into(),
        })?;
        if key.access_key_id().is_empty() || key.secret_access_key().is_empty() {
            return Err(StorageError::CreateAccessKey {
                user: user.to_string(),
                message: "missing access key information in response".into(),
            });
        }

        debug!(user, access_key_id = %key.access_key_id(), "access key created");
        Ok(AccessKeyPair {
            access_key_id: key.access_key_id().to_string(),
            secret_access_key: key.secret_access_key().to_string(),
        })
    }

    async fn delete_access_key(&self, user: &str, access_key_id: &str) -> StorageResult<()> {
        self.iam
            .delete_access_key()
            .user_name(user)
            .access_key_id(access_key_id)
            .send()
            .await
            .map_err(|e| StorageError::DeleteAccessKey {
                user: user.to_string(),
                access_key_id: access_key_id.to_string(),
                message: describe(&e),
            })?;
        Ok(())
    }

    async fn create_policy(&self, name: &str, document: &str) -> StorageResult<String> {
        let output = self
            .iam
            .create_policy()
            .policy_name(name)
            .policy_document(document)
            .send()
            .await
            .map_err(|e| StorageError::CreatePolicy {
                policy: name.to_string(),
                message: describe(&e),
            })?;

        let arn = output
            .policy()
            .and_then(|p| p.arn())
            .ok_or_else(|| StorageError::CreatePolicy {
                policy: name.to_string(),
                message: "missing policy ARN in response".into(),
            })?;
        debug!(policy = name, arn, "policy created");
        Ok(arn.to_string())
    }

    async fn delete_policy(&self, arn: &str) -> StorageResult<()> {
        self.iam
            .delete_policy()
            .policy_arn(arn)
            .send()
            .await
            .map_err(|e| StorageError::DeletePolicy {
                arn: arn.to_string(),
                message: describe(&e),
            })?;
        Ok(())
    }

    async fn attach_user_policy(&self, user: &str, arn: &str) -> StorageResult<()> {
        self.iam
            .attach_user_policy()
            .user_name(user)
            .policy_arn(arn)
            .send()
            .await
            .map_err(|e| StorageError::AttachPolicy {
                user: user.to_string(),
                arn: arn.to_string(),
                message: describe(&e),
            })?;
        debug!(user, arn, "policy attached");
        Ok(())
    }

    async fn ping(&self) -> StorageResult<()> {
        self.s3
            .list_buckets()
            .send()
            .await
            .map_err(|e| StorageError::Unavailable(describe(&e)))?;
        Ok(())
    }
}
