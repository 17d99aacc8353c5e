//! wxgrid core library
//!
//! Shared utilities for the wxgrid service:
//! - Settings file discovery and parsing
//! - State and data directory helpers

mod config;
pub mod fs;

pub use config::{find_config_file, load_config, ConfigSource};
pub use fs::{create_dir_all, is_directory};

/// Directory name under the XDG config home and `/etc`
pub const APP_NAME: &str = "wxgrid";

/// Default service port
pub const DEFAULT_PORT: u16 = 9900;
