//! Storage credentials and the policy document that scopes them.

use serde::Serialize;
use std::fmt;

/// Access key material returned by the identity backend.
///
/// The secret half is only ever exposed at creation time.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessKeyPair {
    pub access_key_id: String,
    pub secret_access_key: String,
}

impl fmt::Debug for AccessKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessKeyPair")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .finish()
    }
}

/// Credentials bound to exactly one bucket.
#[derive(Clone, PartialEq, Eq)]
pub struct CredentialSet {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub bucket: String,
}

impl CredentialSet {
    pub fn new(keys: AccessKeyPair, bucket: impl Into<String>) -> Self {
        Self {
            access_key_id: keys.access_key_id,
            secret_access_key: keys.secret_access_key,
            bucket: bucket.into(),
        }
    }
}

impl fmt::Debug for CredentialSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialSet")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("bucket", &self.bucket)
            .finish()
    }
}

/// IAM policy document granting object access inside a single bucket.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct ScopedPolicy {
    pub version: &'static str,
    pub statement: Vec<PolicyStatement>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct PolicyStatement {
    pub sid: &'static str,
    pub effect: &'static str,
    pub action: Vec<&'static str>,
    pub resource: Vec<String>,
}

impl ScopedPolicy {
    /// Listing on the bucket itself, every object action under `bucket/*`.
    pub fn for_bucket(bucket: &str) -> Self {
        Self {
            version: "2012-10-17",
            statement: vec![
                PolicyStatement {
                    sid: "ListObjectsInBucket",
                    effect: "Allow",
                    action: vec!["s3:ListObjects", "s3:ListObjectsV2"],
                    resource: vec![format!("arn:aws:s3:::{}", bucket)],
                },
                PolicyStatement {
                    sid: "ManageAllObjectsInBucketWildcard",
                    effect: "Allow",
                    action: vec!["s3:*"],
                    resource: vec![format!("arn:aws:s3:::{}/*", bucket)],
                },
            ],
        }
    }

    pub fn policy_name(bucket: &str) -> String {
        format!("{}-policy", bucket)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
