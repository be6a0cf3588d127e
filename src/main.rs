use anyhow::{Context, Result};
use axum::Router;
use std::{io::ErrorKind, sync::Arc};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

mod config;
mod errors;
mod handlers;
mod models;
mod routes;
mod services;
mod state;

use services::{
    bucket_provisioner::BucketProvisioner, compute::MachinesClient,
    config_merger::DeploymentTemplate, orchestrator::AppLifecycle, org_gatekeeper::OrgGatekeeper,
    proxy::UpstreamProxy, storage::TigrisBackend,
};
use state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config ---
    let cfg = config::AppConfig::from_env_and_args()?;

    tracing::info!("Starting machines-proxy with config: {:?}", cfg);

    // --- Deployment template, validated once ---
    let template = DeploymentTemplate::load(&cfg.template_path).with_context(|| {
        format!(
            "Invalid deployment template {}",
            cfg.template_path.display()
        )
    })?;
    tracing::info!(path = %cfg.template_path.display(), "Loaded deployment template");

    // --- Backends ---
    let compute = Arc::new(MachinesClient::new(&cfg.upstream_url, cfg.upstream_timeout)?);
    let storage = Arc::new(TigrisBackend::new(&cfg.storage, cfg.upstream_timeout));
    let proxy = UpstreamProxy::new(&cfg.upstream_url, cfg.upstream_timeout)?;
    tracing::info!(upstream = compute.base_url(), policy = ?cfg.orgs, "Compute backend ready");

    let state = AppState {
        lifecycle: Arc::new(AppLifecycle::new(
            compute.clone(),
            BucketProvisioner::new(storage),
            Arc::new(template),
        )),
        gatekeeper: Arc::new(OrgGatekeeper::new(cfg.orgs.clone(), compute)),
        proxy: Arc::new(proxy),
    };

    // --- Build router ---
    let app: Router = routes::routes::routes().with_state(state);

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}
