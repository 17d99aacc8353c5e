//! Locating and reading the wxgrid TOML settings file.
//!
//! Command line flags and `WXGRID_*` environment variables are resolved by
//! clap in the service crate; the file only fills in what those leave unset.

use std::env;
use std::path::{Path, PathBuf};

use anyhow::Context;
use log::warn;
use serde::de::DeserializeOwned;

use crate::APP_NAME;

/// Environment variable naming the settings file explicitly.
pub const CONFIG_ENV: &str = "WXGRID_CONFIG";

/// File name looked for in each search location.
pub const CONFIG_FILE: &str = "wxgrid.toml";

#[derive(Debug, Clone, PartialEq)]
pub enum ConfigSource {
    /// Named by `--config` or `$WXGRID_CONFIG`.
    Explicit(PathBuf),
    /// First existing file among [`search_locations`].
    Discovered(PathBuf),
    Defaults,
}

impl ConfigSource {
    pub fn path(&self) -> Option<&Path> {
        match self {
            ConfigSource::Explicit(path) | ConfigSource::Discovered(path) => Some(path),
            ConfigSource::Defaults => None,
        }
    }
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.path() {
            Some(path) => write!(f, "{}", path.display()),
            None => write!(f, "(defaults)"),
        }
    }
}

/// Where a settings file is looked for when none is named, in order:
/// the working directory, the XDG config home, then `/etc/wxgrid`.
pub fn search_locations() -> Vec<PathBuf> {
    let mut locations = vec![PathBuf::from(CONFIG_FILE)];
    let config_home = env::var_os("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|| env::var_os("HOME").map(|home| PathBuf::from(home).join(".config")));
    if let Some(dir) = config_home {
        locations.push(dir.join(APP_NAME).join(CONFIG_FILE));
    }
    locations.push(Path::new("/etc").join(APP_NAME).join(CONFIG_FILE));
    locations
}

/// Resolve the settings file when no `--config` flag was given.
pub fn find_config_file() -> ConfigSource {
    if let Some(path) = env::var_os(CONFIG_ENV).map(PathBuf::from) {
        if path.is_file() {
            return ConfigSource::Explicit(path);
        }
        warn!("{} names {}, which is not a file", CONFIG_ENV, path.display());
    }
    search_locations()
        .into_iter()
        .find(|path| path.is_file())
        .map(ConfigSource::Discovered)
        .unwrap_or(ConfigSource::Defaults)
}

/// Parse the file behind `source`, or `T::default()` when there is none.
pub fn load_config<T: DeserializeOwned + Default>(source: &ConfigSource) -> anyhow::Result<T> {
    let Some(path) = source.path() else {
        return Ok(T::default());
    };
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    toml::from_str(&text).with_context(|| format!("failed to parse {}", path.display()))
}
