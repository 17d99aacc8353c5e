use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use log::{error, warn};
use std::sync::Arc;

use crate::{
    engine::{self, WeatherResponse},
    location,
    request::{Endpoint, QueryParams},
    AppState,
};

/// Body returned in place of rows when a `where` or `stats` fragment is rejected.
pub const REJECTED: &str = "ERROR";

#[utoipa::path(
    get,
    path = "/hourly",
    params(QueryParams),
    responses(
        (status = OK, description = "Hourly rows, or the `no data` status", body = WeatherResponse),
        (status = BAD_REQUEST, description = "Invalid request, or `ERROR` for a rejected expression"),
        (status = BAD_GATEWAY, description = "Location service failed"),
        (status = INTERNAL_SERVER_ERROR, description = "Failed to read the shard store")
    ))]
pub async fn hourly(
    State(state): State<Arc<AppState>>,
    Query(params): Query<QueryParams>,
) -> Result<Json<WeatherResponse>, (StatusCode, String)> {
    run(&state, Endpoint::Hourly, params).await
}

#[utoipa::path(
    get,
    path = "/daily",
    params(QueryParams),
    responses(
        (status = OK, description = "Bucketed rows, degree days and statistics", body = WeatherResponse),
        (status = BAD_REQUEST, description = "Invalid request, or `ERROR` for a rejected expression"),
        (status = BAD_GATEWAY, description = "Location service failed"),
        (status = INTERNAL_SERVER_ERROR, description = "Failed to read the shard store")
    ))]
pub async fn daily(
    State(state): State<Arc<AppState>>,
    Query(params): Query<QueryParams>,
) -> Result<Json<WeatherResponse>, (StatusCode, String)> {
    run(&state, Endpoint::Daily, params).await
}

#[utoipa::path(
    get,
    path = "/averages",
    params(QueryParams),
    responses(
        (status = OK, description = "Climatology rows for a calendar-day range in the current year", body = WeatherResponse),
        (status = BAD_REQUEST, description = "Invalid request, or `ERROR` for a rejected expression"),
        (status = BAD_GATEWAY, description = "Location service failed"),
        (status = INTERNAL_SERVER_ERROR, description = "Failed to read the shard store")
    ))]
pub async fn averages(
    State(state): State<Arc<AppState>>,
    Query(params): Query<QueryParams>,
) -> Result<Json<WeatherResponse>, (StatusCode, String)> {
    run(&state, Endpoint::Averages, params).await
}

async fn run(
    state: &AppState,
    endpoint: Endpoint,
    params: QueryParams,
) -> Result<Json<WeatherResponse>, (StatusCode, String)> {
    state
        .weather
        .query(endpoint, &params)
        .await
        .map(Json)
        .map_err(|e| to_status(endpoint, e))
}

fn to_status(endpoint: Endpoint, err: engine::Error) -> (StatusCode, String) {
    if err.is_rejection() {
        warn!("/{} rejected expression: {}", endpoint, err);
        return (StatusCode::BAD_REQUEST, REJECTED.to_string());
    }
    match err {
        engine::Error::Input(e) => (StatusCode::BAD_REQUEST, e.to_string()),
        engine::Error::Location(location::Error::NotFound(place)) => (
            StatusCode::BAD_REQUEST,
            format!("no location found for `{}`", place),
        ),
        engine::Error::Location(location::Error::Cache(e)) => {
            error!("/{} location cache failed: {}", endpoint, e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to read location cache".to_string(),
            )
        }
        engine::Error::Location(e) => {
            error!("/{} location lookup failed: {}", endpoint, e);
            (StatusCode::BAD_GATEWAY, e.to_string())
        }
        e => {
            error!("/{} failed: {}", endpoint, e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to answer /{}", endpoint),
            )
        }
    }
}
