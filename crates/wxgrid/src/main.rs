use anyhow::anyhow;
use axum::serve;
use futures::TryFutureExt;
use log::{error, info, warn};
use std::{net::SocketAddr, str::FromStr};
use tokio::{net::TcpListener, signal};
use wxgrid::{
    app, build_app_state, create_dir_all, get_config_info, get_log_level, is_directory,
    setup_logger, Settings,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = get_config_info();
    let log_level = get_log_level(&cli);

    setup_logger()
        .level(log_level)
        .level_for("duckdb", log_level)
        .level_for("wxgrid", log_level)
        .level_for("http_response", log_level)
        .level_for("http_request", log_level)
        .apply()?;

    let data_dir = cli.data_dir();
    let state_dir = cli.state_dir();
    let host = cli.host();
    let port = cli.port();

    if !is_directory(&data_dir) {
        warn!("shard directory {} does not exist yet, every query will be empty", data_dir);
    }
    create_dir_all(&state_dir)?;
    if cli.geocoder_key().is_empty() {
        warn!("no geocoder key configured, place names and local offsets will not resolve");
    }

    let socket_addr = SocketAddr::from_str(&format!("{}:{}", host, port))
        .map_err(|e| anyhow!("invalid address: {}", e))?;

    let listener = TcpListener::bind(socket_addr)
        .map_err(|e| anyhow!("error binding to socket: {}", e))
        .await?;

    info!("wxgrid starting...");
    info!("  Listen: http://{}", socket_addr);
    info!("  Docs:   http://{}/docs", socket_addr);
    info!("  Shards: {}", data_dir);
    info!("  State:  {}", state_dir);

    let settings = Settings {
        data_dir,
        state_dir,
        geocoder_url: cli.geocoder_url(),
        geocoder_key: cli.geocoder_key(),
        user_agent: cli.user_agent(),
        max_concurrent_queries: cli.max_concurrent_queries(),
        shard_recheck: cli.shard_recheck(),
        radar_lag: cli.radar_lag(),
        cache_retention: cli.cache_retention(),
        cache_sweep_interval: cli.cache_sweep_interval(),
    };

    let app_state = build_app_state(settings).await.map_err(|e| {
        error!("error building app: {}", e);
        e
    })?;
    let weather = app_state.weather.clone();

    let app = app(app_state);

    serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    weather.shutdown().await;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
