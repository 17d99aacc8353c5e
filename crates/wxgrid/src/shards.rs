use log::debug;
use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::RwLock,
    time::{Duration, Instant},
};

use crate::{Family, GridCell, ShardPeriod};

/// Identity of one physical shard.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ShardKey {
    pub family: Family,
    /// Model-grid cell the shard covers.
    pub tile: GridCell,
    pub period: ShardPeriod,
}

impl ShardKey {
    pub fn new(family: Family, cell: GridCell, period: ShardPeriod) -> Self {
        Self {
            family,
            tile: cell.tile(),
            period,
        }
    }

    /// `{family}/{tile_lat}_{tile_lon}/{period}.parquet`
    pub fn relative_path(&self) -> PathBuf {
        PathBuf::from(self.family.dir_name())
            .join(self.tile.to_string())
            .join(format!("{}.parquet", self.period))
    }
}

#[derive(Clone, Debug)]
enum Entry {
    Present(PathBuf),
    Absent { checked: Instant },
}

/// Maps shard keys to files on disk and remembers the answer. Missing shards
/// are looked for again after `recheck`, so a shard ingestion creates later
/// is picked up without a restart.
pub struct ShardRegistry {
    root: PathBuf,
    recheck: Duration,
    entries: RwLock<HashMap<ShardKey, Entry>>,
}

impl ShardRegistry {
    pub fn new(root: impl AsRef<Path>, recheck: Duration) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            recheck,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn resolve(&self, key: &ShardKey) -> Option<PathBuf> {
        let cached = self
            .entries
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(key)
            .cloned();
        match cached {
            Some(Entry::Present(path)) => return Some(path),
            Some(Entry::Absent { checked }) if checked.elapsed() < self.recheck => return None,
            _ => {}
        }

        let path = self.root.join(key.relative_path());
        let entry = if path.is_file() {
            debug!("found shard {}", path.display());
            Entry::Present(path.clone())
        } else {
            Entry::Absent {
                checked: Instant::now(),
            }
        };
        let found = matches!(entry, Entry::Present(_));
        self.entries
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(*key, entry);
        found.then_some(path)
    }

    /// Existing shard files for every tile touched by `cells`, in a stable order.
    pub fn resolve_all(
        &self,
        family: Family,
        cells: &[GridCell],
        periods: &[ShardPeriod],
    ) -> Vec<PathBuf> {
        let mut tiles: Vec<GridCell> = cells.iter().map(|cell| cell.tile()).collect();
        tiles.sort();
        tiles.dedup();

        let mut paths = Vec::new();
        for tile in tiles {
            for period in periods {
                if let Some(path) = self.resolve(&ShardKey::new(family, tile, *period)) {
                    paths.push(path);
                }
            }
        }
        paths
    }
}
