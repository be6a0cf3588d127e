//! Decides whether a caller may create apps in a given organization.

use super::compute::{ComputeBackend, ComputeError};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::{error, info};

/// Which organizations are accepted, resolved once from the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrgPolicy {
    /// Not running inside a host app; every organization is accepted.
    Unrestricted,
    /// `FLY_ALLOWED_ORGS=*`
    Wildcard,
    AllowList(Vec<String>),
    /// Only the organization that owns `host_app`.
    CurrentOrg { host_app: String },
}

impl OrgPolicy {
    pub fn from_env(host_app: Option<String>, allowed_orgs: Option<String>) -> Self {
        let Some(host_app) = host_app else {
            return Self::Unrestricted;
        };
        match allowed_orgs.as_deref().map(str::trim) {
            Some("*") => Self::Wildcard,
            Some(list) => {
                let orgs: Vec<String> = list
                    .split(',')
                    .map(str::trim)
                    .filter(|org| !org.is_empty())
                    .map(String::from)
                    .collect();
                if orgs.is_empty() {
                    Self::CurrentOrg { host_app }
                } else {
                    Self::AllowList(orgs)
                }
            }
            None => Self::CurrentOrg { host_app },
        }
    }
}

#[derive(Debug, Error)]
#[error("looking up organization of `{app}`: {source}")]
pub struct OrgError {
    pub app: String,
    #[source]
    pub source: ComputeError,
}

pub struct OrgGatekeeper {
    policy: OrgPolicy,
    compute: Arc<dyn ComputeBackend>,
    current_org: OnceCell<String>,
}

impl OrgGatekeeper {
    pub fn new(policy: OrgPolicy, compute: Arc<dyn ComputeBackend>) -> Self {
        Self {
            policy,
            compute,
            current_org: OnceCell::new(),
        }
    }

    /// Returns `Ok(false)` for a rejected org, `Err` only if the lookup failed.
    pub async fn validate(&self, token: &str, org: &str) -> Result<bool, OrgError> {
        match &self.policy {
            OrgPolicy::Unrestricted | OrgPolicy::Wildcard => Ok(true),
            OrgPolicy::AllowList(allowed) => {
                let ok = allowed.iter().any(|a| a == org);
                if !ok {
                    error!(
                        requested = org,
                        allowed = %allowed.join(","),
                        "org check failed"
                    );
                }
                Ok(ok)
            }
            OrgPolicy::CurrentOrg { host_app } => {
                let current = self.current_org(token, host_app).await?;
                let ok = current == org;
                if !ok {
                    error!(requested = org, current = %current, "org check failed");
                }
                Ok(ok)
            }
        }
    }

    /// Organization of the host app, fetched on first use and kept for the
    /// life of the process. A failed lookup is not cached.
    async fn current_org(&self, token: &str, host_app: &str) -> Result<&String, OrgError> {
        self.current_org
            .get_or_try_init(|| async {
                info!(app = host_app, "looking up org for host app");
                let org = self
                    .compute
                    .app_org(token, host_app)
                    .await
                    .map_err(|source| OrgError {
                        app: host_app.to_string(),
                        source,
                    })?;
                info!(org = %org, "looked up host org");
                Ok(org)
            })
            .await
    }
}
