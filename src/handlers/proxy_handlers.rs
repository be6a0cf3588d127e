use crate::{errors::AppError, state::AppState};
use axum::{extract::Request, extract::State, response::Response};

/// Router fallback: anything not handled locally goes to the compute backend.
pub async fn forward(State(state): State<AppState>, req: Request) -> Result<Response, AppError> {
    Ok(state.proxy.forward(req).await?)
}
