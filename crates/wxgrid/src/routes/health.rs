use axum::{extract::State, http::StatusCode};
use log::error;
use std::sync::Arc;

use crate::AppState;

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = OK, description = "Shard store and state database are reachable"),
        (status = SERVICE_UNAVAILABLE, description = "A backing store failed its check")
    ))]
pub async fn health(State(state): State<Arc<AppState>>) -> Result<&'static str, (StatusCode, String)> {
    state.weather.health().await.map_err(|e| {
        error!("health check failed: {}", e);
        (StatusCode::SERVICE_UNAVAILABLE, e.to_string())
    })?;
    Ok("ok")
}
