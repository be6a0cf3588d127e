//! Application state management

use std::sync::Arc;

use crate::services::{
    orchestrator::AppLifecycle, org_gatekeeper::OrgGatekeeper, proxy::UpstreamProxy,
};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub lifecycle: Arc<AppLifecycle>,
    pub gatekeeper: Arc<OrgGatekeeper>,
    pub proxy: Arc<UpstreamProxy>,
}
