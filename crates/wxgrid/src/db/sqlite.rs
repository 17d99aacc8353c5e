use anyhow::{Context, Result};
use log::{debug, info, warn};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions},
    Row,
};
use std::{collections::HashSet, future::Future, path::Path, str::FromStr, time::Duration};
use time::OffsetDateTime;
use tokio::{
    fs::create_dir_all,
    sync::{mpsc, oneshot},
};

use crate::{BoundingBox, Coordinate};

type WriteOperation = std::pin::Pin<Box<dyn Future<Output = ()> + Send>>;

/// Serializes every write through one task so SQLite never sees two writers.
pub struct DatabaseWriter {
    write_tx: mpsc::UnboundedSender<WriteOperation>,
    _handle: tokio::task::JoinHandle<()>,
}

impl Default for DatabaseWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl DatabaseWriter {
    pub fn new() -> Self {
        let (write_tx, mut write_rx) = mpsc::unbounded_channel::<WriteOperation>();

        let handle = tokio::spawn(async move {
            while let Some(future) = write_rx.recv().await {
                future.await;
            }
        });

        Self {
            write_tx,
            _handle: handle,
        }
    }

    pub async fn execute<T, F, Fut>(&self, pool: SqlitePool, operation: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(SqlitePool) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let (result_tx, result_rx) = oneshot::channel::<Result<T>>();

        let write_op = Box::pin(async move {
            let result = operation(pool).await;
            let _ = result_tx.send(result);
        });

        self.write_tx
            .send(write_op)
            .map_err(|_| anyhow::anyhow!("Database writer channel closed"))?;

        result_rx
            .await
            .map_err(|_| anyhow::anyhow!("Failed to receive write result"))?
    }

    /// Queue a write without waiting for it. Failures are logged.
    pub fn submit<F, Fut>(&self, pool: SqlitePool, what: &'static str, operation: F)
    where
        F: FnOnce(SqlitePool) -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let write_op = Box::pin(async move {
            if let Err(e) = operation(pool).await {
                warn!("background write `{}` failed: {}", what, e);
            }
        });

        if self.write_tx.send(write_op).is_err() {
            warn!("Database writer channel closed, dropped `{}`", what);
        }
    }
}

/// A resolved place name as stored in the address cache.
#[derive(Clone, Debug, PartialEq)]
pub struct AddressRecord {
    /// Normalized query text.
    pub name: String,
    pub coordinate: Coordinate,
    pub viewport: Option<BoundingBox>,
}

pub struct Database {
    pool: SqlitePool,
    writer: DatabaseWriter,
}

impl Database {
    pub async fn new(path: &str) -> Result<Self> {
        let db_path = format!("{}/wxgrid.sqlite", path);

        if let Some(parent) = Path::new(&db_path).parent() {
            create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create database directory: {parent:?}"))?;
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path))?
            .create_if_missing(true)
            .pragma("journal_mode", "WAL")
            .pragma("synchronous", "NORMAL")
            .pragma("busy_timeout", "5000")
            .pragma("cache_size", "-64000")
            .pragma("temp_store", "MEMORY");

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(30))
            .connect_with(options)
            .await
            .context("Failed to create database connection pool")?;

        let db = Self {
            pool,
            writer: DatabaseWriter::new(),
        };

        db.run_migrations().await?;
        info!("SQLite database initialized at: {}", db_path);

        Ok(db)
    }

    async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("Failed to run database migrations")?;
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Check database connectivity and integrity.
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("Database connectivity check failed")?;

        let result: String = sqlx::query_scalar("PRAGMA quick_check;")
            .fetch_one(&self.pool)
            .await
            .context("Database integrity check failed")?;
        if result != "ok" {
            return Err(anyhow::anyhow!(
                "Database integrity check failed: {}",
                result
            ));
        }

        Ok(())
    }

    /// Checkpoint WAL to main database file before shutdown.
    pub async fn checkpoint(&self) {
        match sqlx::query("PRAGMA wal_checkpoint(TRUNCATE);")
            .execute(&self.pool)
            .await
        {
            Ok(_) => info!("WAL checkpoint completed successfully"),
            Err(e) => log::error!("WAL checkpoint failed: {}", e),
        }
    }

    /// Wait until every write queued so far has run.
    pub async fn flush(&self) -> Result<()> {
        self.writer
            .execute(self.pool.clone(), |_| async { Ok(()) })
            .await
    }

    pub async fn get_address(&self, name: &str) -> Result<Option<AddressRecord>> {
        let row = sqlx::query(
            "SELECT name, lat, lon, south, north, west, east
             FROM address_cache WHERE name = ?",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let viewport = match (
            row.get::<Option<f64>, _>("south"),
            row.get::<Option<f64>, _>("north"),
            row.get::<Option<f64>, _>("west"),
            row.get::<Option<f64>, _>("east"),
        ) {
            (Some(south), Some(north), Some(west), Some(east)) => Some(BoundingBox {
                south,
                north,
                west,
                east,
            }),
            _ => None,
        };
        Ok(Some(AddressRecord {
            name: row.get("name"),
            coordinate: Coordinate {
                lat: row.get("lat"),
                lon: row.get("lon"),
            },
            viewport,
        }))
    }

    /// Remember a geocoded place. Racing inserts of the same name are harmless.
    pub fn save_address(&self, record: AddressRecord) {
        let now = OffsetDateTime::now_utc().unix_timestamp();
        self.writer
            .submit(self.pool.clone(), "save address", move |pool| async move {
                sqlx::query(
                    "INSERT INTO address_cache (name, lat, lon, south, north, west, east, created_at)
                     VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                     ON CONFLICT(name) DO NOTHING",
                )
                .bind(&record.name)
                .bind(record.coordinate.lat)
                .bind(record.coordinate.lon)
                .bind(record.viewport.map(|v| v.south))
                .bind(record.viewport.map(|v| v.north))
                .bind(record.viewport.map(|v| v.west))
                .bind(record.viewport.map(|v| v.east))
                .bind(now)
                .execute(&pool)
                .await?;
                Ok(())
            });
    }

    pub async fn get_timezone(&self, cell_id: i64) -> Result<Option<i32>> {
        let offset: Option<i64> =
            sqlx::query_scalar("SELECT utc_offset FROM timezone_cache WHERE cell_id = ?")
                .bind(cell_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(offset.map(|seconds| seconds as i32))
    }

    pub fn save_timezone(&self, cell_id: i64, utc_offset: i32) {
        let now = OffsetDateTime::now_utc().unix_timestamp();
        self.writer
            .submit(self.pool.clone(), "save timezone", move |pool| async move {
                sqlx::query(
                    "INSERT INTO timezone_cache (cell_id, utc_offset, created_at)
                     VALUES (?, ?, ?)
                     ON CONFLICT(cell_id) DO NOTHING",
                )
                .bind(cell_id)
                .bind(utc_offset as i64)
                .bind(now)
                .execute(&pool)
                .await?;
                Ok(())
            });
    }

    /// Cached payload for a request signature. A hit refreshes the entry's
    /// recency, never its payload.
    pub async fn get_cached_result(&self, signature: &str) -> Result<Option<String>> {
        let payload: Option<String> =
            sqlx::query_scalar("SELECT payload FROM result_cache WHERE signature = ?")
                .bind(signature)
                .fetch_optional(&self.pool)
                .await?;

        if payload.is_some() {
            let signature = signature.to_string();
            let now = OffsetDateTime::now_utc().unix_timestamp();
            self.writer
                .submit(self.pool.clone(), "touch cached result", move |pool| async move {
                    sqlx::query("UPDATE result_cache SET last_used = ? WHERE signature = ?")
                        .bind(now)
                        .bind(&signature)
                        .execute(&pool)
                        .await?;
                    Ok(())
                });
        }
        Ok(payload)
    }

    pub fn save_result(&self, signature: String, payload: String) {
        let now = OffsetDateTime::now_utc().unix_timestamp();
        self.writer
            .submit(self.pool.clone(), "save cached result", move |pool| async move {
                sqlx::query(
                    "INSERT INTO result_cache (signature, payload, created_at, last_used)
                     VALUES (?, ?, ?, ?)
                     ON CONFLICT(signature) DO NOTHING",
                )
                .bind(&signature)
                .bind(&payload)
                .bind(now)
                .bind(now)
                .execute(&pool)
                .await?;
                Ok(())
            });
    }

    /// Drop cache entries untouched for longer than `retention`.
    pub async fn sweep_result_cache(&self, retention: time::Duration) -> Result<u64> {
        let cutoff = (OffsetDateTime::now_utc() - retention).unix_timestamp();
        let removed = self
            .writer
            .execute(self.pool.clone(), move |pool| async move {
                let result = sqlx::query("DELETE FROM result_cache WHERE last_used < ?")
                    .bind(cutoff)
                    .execute(&pool)
                    .await?;
                Ok(result.rows_affected())
            })
            .await?;
        debug!("swept {} cached results", removed);
        Ok(removed)
    }

    /// Hours (unix seconds) inside `[start, end]` the radar feed flagged as missing.
    pub async fn missing_radar_hours(
        &self,
        start: OffsetDateTime,
        end: OffsetDateTime,
    ) -> Result<HashSet<i64>> {
        let hours: Vec<i64> = sqlx::query_scalar(
            "SELECT hour FROM missing_radar_hours WHERE hour >= ? AND hour <= ? ORDER BY hour",
        )
        .bind(start.unix_timestamp())
        .bind(end.unix_timestamp())
        .fetch_all(&self.pool)
        .await?;
        Ok(hours.into_iter().collect())
    }

    pub async fn add_missing_radar_hours(&self, hours: Vec<OffsetDateTime>) -> Result<()> {
        if hours.is_empty() {
            return Ok(());
        }

        self.writer
            .execute(self.pool.clone(), move |pool| async move {
                let mut tx = pool.begin().await?;

                for hour in hours {
                    sqlx::query(
                        "INSERT INTO missing_radar_hours (hour) VALUES (?)
                         ON CONFLICT(hour) DO NOTHING",
                    )
                    .bind(hour.unix_timestamp())
                    .execute(&mut *tx)
                    .await?;
                }

                tx.commit().await?;
                Ok(())
            })
            .await
    }
}
