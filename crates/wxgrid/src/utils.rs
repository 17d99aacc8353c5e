use clap::Parser;
use fern::{
    colors::{Color, ColoredLevelConfig},
    Dispatch,
};
use log::LevelFilter;
use std::env;
use time::{format_description::well_known::Iso8601, OffsetDateTime};
use wxgrid_core::{find_config_file, load_config, ConfigSource, DEFAULT_PORT};

pub use wxgrid_core::{create_dir_all, is_directory};

#[derive(Parser, Clone, Debug, serde::Deserialize, Default)]
#[command(
    author,
    version,
    about = "wxgrid - hourly gridded weather for points and regions"
)]
pub struct Cli {
    /// Path to config file (TOML format)
    /// Searched in order: this flag, $WXGRID_CONFIG, ./wxgrid.toml,
    /// $XDG_CONFIG_HOME/wxgrid/wxgrid.toml, /etc/wxgrid/wxgrid.toml
    #[arg(short, long)]
    #[serde(skip)]
    pub config: Option<String>,

    /// Log level: trace, debug, info, warn, error
    #[arg(short, long, env = "WXGRID_LEVEL")]
    pub level: Option<String>,

    /// Host to listen on (use 0.0.0.0 for all interfaces)
    #[arg(long, env = "WXGRID_HOST")]
    #[serde(alias = "domain")]
    pub host: Option<String>,

    /// Port to listen on
    #[arg(short, long, env = "WXGRID_PORT")]
    pub port: Option<String>,

    /// Root of the parquet shard tree ({family}/{tile}/{period}.parquet)
    #[arg(short, long, env = "WXGRID_DATA_DIR")]
    pub data_dir: Option<String>,

    /// Directory holding the SQLite state database
    #[arg(short, long, env = "WXGRID_STATE_DIR")]
    pub state_dir: Option<String>,

    /// Google Maps API key for geocoding and time zone lookups
    #[arg(long, env = "WXGRID_GEOCODER_KEY")]
    pub geocoder_key: Option<String>,

    /// Base URL of the maps API
    #[arg(long, env = "WXGRID_GEOCODER_URL")]
    pub geocoder_url: Option<String>,

    /// User agent sent to the maps API
    #[arg(long, env = "WXGRID_USER_AGENT")]
    pub user_agent: Option<String>,

    /// Store queries allowed to run at once
    #[arg(long, env = "WXGRID_MAX_CONCURRENT_QUERIES")]
    pub max_concurrent_queries: Option<usize>,

    /// Days an unused cached result is kept
    #[arg(long, env = "WXGRID_CACHE_RETENTION_DAYS")]
    pub cache_retention_days: Option<i64>,

    /// Minutes between result cache sweeps
    #[arg(long, env = "WXGRID_CACHE_SWEEP_MINUTES")]
    pub cache_sweep_minutes: Option<u64>,

    /// Hours the radar feed may trail real time
    #[arg(long, env = "WXGRID_RADAR_LAG_HOURS")]
    pub radar_lag_hours: Option<i64>,

    /// Seconds before a missing shard is looked for again
    #[arg(long, env = "WXGRID_SHARD_RECHECK_SECS")]
    pub shard_recheck_secs: Option<u64>,
}

impl Cli {
    pub fn host(&self) -> String {
        self.host.clone().unwrap_or_else(|| "127.0.0.1".to_string())
    }

    pub fn port(&self) -> String {
        self.port
            .clone()
            .unwrap_or_else(|| DEFAULT_PORT.to_string())
    }

    pub fn data_dir(&self) -> String {
        self.data_dir
            .clone()
            .unwrap_or_else(|| "./grid_data".to_string())
    }

    pub fn state_dir(&self) -> String {
        self.state_dir
            .clone()
            .unwrap_or_else(|| "./state".to_string())
    }

    pub fn geocoder_key(&self) -> String {
        self.geocoder_key.clone().unwrap_or_default()
    }

    pub fn geocoder_url(&self) -> String {
        self.geocoder_url
            .clone()
            .unwrap_or_else(|| "https://maps.googleapis.com/maps/api".to_string())
    }

    pub fn user_agent(&self) -> String {
        self.user_agent
            .clone()
            .unwrap_or_else(|| format!("wxgrid/{}", env!("CARGO_PKG_VERSION")))
    }

    pub fn max_concurrent_queries(&self) -> usize {
        self.max_concurrent_queries.unwrap_or(8)
    }

    pub fn cache_retention(&self) -> time::Duration {
        time::Duration::days(self.cache_retention_days.unwrap_or(30))
    }

    /// At least one minute; zero would spin the sweeper.
    pub fn cache_sweep_interval(&self) -> std::time::Duration {
        let minutes = self.cache_sweep_minutes.unwrap_or(60).max(1);
        std::time::Duration::from_secs(minutes * 60)
    }

    pub fn radar_lag(&self) -> time::Duration {
        time::Duration::hours(self.radar_lag_hours.unwrap_or(3))
    }

    pub fn shard_recheck(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.shard_recheck_secs.unwrap_or(3600))
    }
}

/// Load configuration from CLI args, config file, and environment
pub fn get_config_info() -> Cli {
    let cli_args = Cli::parse();

    let source = if let Some(ref path) = cli_args.config {
        ConfigSource::Explicit(path.into())
    } else {
        find_config_file()
    };

    if let Some(path) = source.path() {
        log::info!("Loading config from: {}", path.display());
    }

    let file_config: Cli = load_config(&source).unwrap_or_else(|e| {
        log::warn!("ignoring config file: {:#}", e);
        Cli::default()
    });

    // CLI args override file config (env vars are handled by clap)
    Cli {
        config: cli_args.config,
        level: cli_args.level.or(file_config.level),
        host: cli_args.host.or(file_config.host),
        port: cli_args.port.or(file_config.port),
        data_dir: cli_args.data_dir.or(file_config.data_dir),
        state_dir: cli_args.state_dir.or(file_config.state_dir),
        geocoder_key: cli_args.geocoder_key.or(file_config.geocoder_key),
        geocoder_url: cli_args.geocoder_url.or(file_config.geocoder_url),
        user_agent: cli_args.user_agent.or(file_config.user_agent),
        max_concurrent_queries: cli_args
            .max_concurrent_queries
            .or(file_config.max_concurrent_queries),
        cache_retention_days: cli_args
            .cache_retention_days
            .or(file_config.cache_retention_days),
        cache_sweep_minutes: cli_args
            .cache_sweep_minutes
            .or(file_config.cache_sweep_minutes),
        radar_lag_hours: cli_args.radar_lag_hours.or(file_config.radar_lag_hours),
        shard_recheck_secs: cli_args
            .shard_recheck_secs
            .or(file_config.shard_recheck_secs),
    }
}

pub fn get_log_level(cli: &Cli) -> LevelFilter {
    let level_str = cli
        .level
        .clone()
        .or_else(|| env::var("RUST_LOG").ok())
        .unwrap_or_else(|| "info".to_string());

    match level_str.to_lowercase().as_str() {
        "trace" => LevelFilter::Trace,
        "debug" => LevelFilter::Debug,
        "info" => LevelFilter::Info,
        "warn" => LevelFilter::Warn,
        "error" => LevelFilter::Error,
        _ => LevelFilter::Info,
    }
}

pub fn setup_logger() -> Dispatch {
    let colors = ColoredLevelConfig::new()
        .trace(Color::White)
        .debug(Color::Cyan)
        .info(Color::Blue)
        .warn(Color::Yellow)
        .error(Color::Magenta);

    fern::Dispatch::new()
        .format(move |out, message, record| {
            let now = OffsetDateTime::now_utc()
                .format(&Iso8601::DEFAULT)
                .unwrap_or_default();
            out.finish(format_args!(
                "[{} {}] {}: {}",
                now,
                colors.color(record.level()),
                record.target(),
                message
            ));
        })
        .chain(std::io::stdout())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accessors_fall_back_to_defaults() {
        let cli = Cli::default();
        assert_eq!(cli.port(), DEFAULT_PORT.to_string());
        assert_eq!(cli.cache_retention(), time::Duration::days(30));
        assert_eq!(cli.radar_lag(), time::Duration::hours(3));
        assert_eq!(cli.shard_recheck(), std::time::Duration::from_secs(3600));
    }

    #[test]
    fn zero_sweep_interval_is_raised_to_a_minute() {
        let cli = Cli {
            cache_sweep_minutes: Some(0),
            ..Default::default()
        };
        assert_eq!(cli.cache_sweep_interval(), std::time::Duration::from_secs(60));
    }

    #[test]
    fn explicit_level_wins_over_environment() {
        let cli = Cli {
            level: Some("DEBUG".to_string()),
            ..Default::default()
        };
        assert_eq!(get_log_level(&cli), LevelFilter::Debug);
    }
}
