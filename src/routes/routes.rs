//! Defines routes for the Machines API proxy.
//!
//! ## Structure
//! - **Handled locally**
//!   - `POST   /v1/apps`: create app, bucket and storage secrets
//!   - `DELETE /v1/apps/{app}`: delete bucket, then app
//!   - `POST   /v1/apps/{app}/machines`: create machine from the merged config
//!
//! - **Probes**
//!   - `GET    /healthz`, `GET /readyz`
//!
//! Every other method or path, including other methods on the paths above,
//! is streamed to the compute backend unchanged.

use crate::{
    handlers::{
        app_handlers::{create_app, create_machine, destroy_app},
        health_handlers::{healthz, readyz},
        proxy_handlers::forward,
    },
    state::AppState,
};
use axum::{
    Router,
    routing::{delete, get, post},
};

/// Build and return the router; the caller supplies [`AppState`].
pub fn routes() -> Router<AppState> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/v1/apps", post(create_app).fallback(forward))
        .route("/v1/apps/{app}", delete(destroy_app).fallback(forward))
        .route(
            "/v1/apps/{app}/machines",
            post(create_machine).fallback(forward),
        )
        .fallback(forward)
}
