use crate::{
    averages, daily, engine, health, hourly, routes, Database, Geocoder,
    GoogleMapsClient, GridAccess, GridData, WeatherService,
};
use anyhow::anyhow;
use axum::{
    body::Body,
    extract::Request,
    middleware::{self, Next},
    response::IntoResponse,
    routing::get,
    Router,
};
use hyper::{
    header::{ACCEPT, CONTENT_TYPE},
    Method,
};
use log::{error, info};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use utoipa::OpenApi;
use utoipa_scalar::{Scalar, Servable};

#[derive(Clone)]
pub struct AppState {
    pub weather: Arc<WeatherService>,
}

#[derive(OpenApi)]
#[openapi(
    paths(
        routes::weather::data_routes::hourly,
        routes::weather::data_routes::daily,
        routes::weather::data_routes::averages,
        routes::health::health,
    ),
    components(
        schemas(
            engine::WeatherResponse,
            engine::Status,
        )
    ),
    tags(
        (name = "wxgrid api", description = "hourly, daily and climatological weather for points and regions from sharded grid data")
    )
)]
struct ApiDoc;

/// Everything `build_app_state` needs, already resolved from config.
pub struct Settings {
    pub data_dir: String,
    pub state_dir: String,
    pub geocoder_url: String,
    pub geocoder_key: String,
    pub user_agent: String,
    pub max_concurrent_queries: usize,
    pub shard_recheck: std::time::Duration,
    pub radar_lag: time::Duration,
    pub cache_retention: time::Duration,
    pub cache_sweep_interval: std::time::Duration,
}

pub async fn build_app_state(settings: Settings) -> Result<AppState, anyhow::Error> {
    let grid: Arc<dyn GridData> = Arc::new(GridAccess::new(
        &settings.data_dir,
        settings.shard_recheck,
        settings.max_concurrent_queries,
    ));
    let geocoder: Arc<dyn Geocoder> = Arc::new(
        GoogleMapsClient::new(
            settings.geocoder_url,
            settings.geocoder_key,
            &settings.user_agent,
        )
        .map_err(|e| anyhow!("error setting up geocoder: {}", e))?,
    );
    let db = Arc::new(
        Database::new(&settings.state_dir)
            .await
            .map_err(|e| anyhow!("error setting up SQLite database: {}", e))?,
    );

    spawn_cache_sweeper(
        db.clone(),
        settings.cache_retention,
        settings.cache_sweep_interval,
    );

    Ok(AppState {
        weather: Arc::new(WeatherService::new(grid, db, geocoder, settings.radar_lag)),
    })
}

/// Periodically drop cached results nobody has read within `retention`.
pub fn spawn_cache_sweeper(
    db: Arc<Database>,
    retention: time::Duration,
    every: std::time::Duration,
) -> tokio::task::JoinHandle<()> {
    let every = every.max(std::time::Duration::from_secs(1));
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        loop {
            interval.tick().await;
            match db.sweep_result_cache(retention).await {
                Ok(0) => {}
                Ok(removed) => info!("evicted {} cached results", removed),
                Err(e) => error!("result cache sweep failed: {}", e),
            }
        }
    })
}

pub fn app(app_state: AppState) -> Router {
    let api_docs = ApiDoc::openapi();
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers([ACCEPT, CONTENT_TYPE])
        .allow_origin(Any);

    Router::new()
        .route("/hourly", get(hourly))
        .route("/daily", get(daily))
        .route("/averages", get(averages))
        .route("/health", get(health))
        .with_state(Arc::new(app_state))
        .layer(middleware::from_fn(log_request))
        .merge(Scalar::with_url("/docs", api_docs))
        .layer(cors)
}

async fn log_request(request: Request<Body>, next: Next) -> impl IntoResponse {
    let now = time::OffsetDateTime::now_utc();
    let path = request
        .uri()
        .path_and_query()
        .map(|p| p.as_str())
        .unwrap_or_default();
    info!(target: "http_request","new request, {} {}", request.method().as_str(), path);

    let response = next.run(request).await;
    let response_time = time::OffsetDateTime::now_utc() - now;
    info!(target: "http_response", "response, code: {}, time: {}", response.status().as_str(), response_time);

    response
}
