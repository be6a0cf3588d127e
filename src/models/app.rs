//! Request and response bodies for application lifecycle routes.

use serde::{Deserialize, Serialize};

/// The fields of `POST /v1/apps` this service inspects.
///
/// The raw body is forwarded upstream untouched, so anything else the caller
/// sends still reaches the compute backend.
#[derive(Debug, Default, Deserialize)]
pub struct CreateAppRequest {
    pub app_name: Option<String>,
    pub org_slug: Option<String>,
}

impl CreateAppRequest {
    /// Application name, if present and non-blank.
    pub fn app_name(&self) -> Option<&str> {
        self.app_name.as_deref().filter(|name| !name.trim().is_empty())
    }

    /// Organization slug, if present and non-blank.
    pub fn org_slug(&self) -> Option<&str> {
        self.org_slug.as_deref().filter(|slug| !slug.trim().is_empty())
    }
}

/// Body of a successful `DELETE /v1/apps/{app}`.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct DestroyAppResponse {
    pub success: bool,
    #[serde(rename = "bucketDeleted")]
    pub bucket_deleted: bool,
}
