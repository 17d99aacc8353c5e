//! Directory checks for the shard tree and the state directory.

use std::fs;
use std::path::Path;

use log::info;

/// Create `path` and its parents unless it is already there.
pub fn create_dir_all(path: impl AsRef<Path>) -> std::io::Result<()> {
    let path = path.as_ref();
    if path.is_dir() {
        return Ok(());
    }
    fs::create_dir_all(path)?;
    info!("created directory {}", path.display());
    Ok(())
}

pub fn is_directory(path: impl AsRef<Path>) -> bool {
    path.as_ref().is_dir()
}
