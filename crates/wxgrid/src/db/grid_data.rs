use async_trait::async_trait;
use duckdb::{
    arrow::array::{Array, Float64Array, Int64Array, RecordBatch},
    params_from_iter, Connection,
};
use log::{debug, error};
use std::{collections::BTreeMap, path::Path, sync::Arc, time::Duration};
use time::{OffsetDateTime, UtcOffset};
use tokio::sync::Semaphore;

use super::{
    assembler::{self, Assembled},
    ResultRow,
};
use crate::{
    expression::Expr, plan_periods, Attribute, Coordinate, Family, GridCell, ShardPeriod,
    ShardRegistry,
};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Failed to query duckdb: {0}")]
    Query(#[from] duckdb::Error),
    #[error("Failed to assemble query: {0}")]
    Assemble(#[from] assembler::Error),
    #[error("Unexpected result layout: {0}")]
    Layout(String),
    #[error("Invalid timestamp in shard: {0}")]
    Timestamp(#[from] time::error::ComponentRange),
    #[error("Store admission closed: {0}")]
    Admission(#[from] tokio::sync::AcquireError),
    #[error("Store task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SeriesSource {
    Live(Family),
    Climatology,
}

/// One hourly series read for one target.
#[derive(Clone, Debug, PartialEq)]
pub struct SeriesRequest {
    pub source: SeriesSource,
    /// Cells of the source family, or model tiles when `aggregate_to_tiles` is set.
    pub cells: Vec<GridCell>,
    /// Average fine radar cells up to their model tile.
    pub aggregate_to_tiles: bool,
    pub start: OffsetDateTime,
    pub end: OffsetDateTime,
    /// Clock rows are reported in.
    pub offset: UtcOffset,
    /// Coordinate reported for every row of a point series.
    pub label: Option<Coordinate>,
    pub attributes: Vec<Attribute>,
    pub filter: Option<Expr>,
}

impl SeriesRequest {
    fn family(&self) -> Family {
        match self.source {
            SeriesSource::Live(family) => family,
            SeriesSource::Climatology => Family::Model,
        }
    }

    /// Grid the returned cell indices are on.
    fn grid_family(&self) -> Family {
        if self.aggregate_to_tiles {
            Family::Model
        } else {
            self.family()
        }
    }
}

#[async_trait]
pub trait GridData: Send + Sync {
    /// Hourly rows ordered by (timestamp, cell).
    async fn series(&self, request: &SeriesRequest) -> Result<Vec<ResultRow>, Error>;
    /// Newest live timestamp for the given cells, if any shard holds one.
    async fn live_extent(
        &self,
        family: Family,
        cells: &[GridCell],
    ) -> Result<Option<OffsetDateTime>, Error>;
    async fn health(&self) -> Result<(), Error>;
}

pub struct GridAccess {
    registry: Arc<ShardRegistry>,
    permits: Arc<Semaphore>,
}

impl GridAccess {
    pub fn new(data_dir: impl AsRef<Path>, recheck: Duration, max_concurrent: usize) -> Self {
        Self {
            registry: Arc::new(ShardRegistry::new(data_dir, recheck)),
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
        }
    }

    /// Creates new in-memory connection, making it so we always start with a fresh slate and no possible locking issues
    pub fn open_connection() -> Result<Connection, duckdb::Error> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("INSTALL parquet; LOAD parquet;")?;
        Ok(conn)
    }

    /// Run one statement once a store permit is free.
    async fn query(&self, assembled: Assembled) -> Result<Vec<RecordBatch>, Error> {
        let _permit = self.permits.clone().acquire_owned().await?;
        let Assembled { sql, params } = assembled;
        let statement = sql.clone();
        let result = tokio::task::spawn_blocking(move || -> Result<Vec<RecordBatch>, duckdb::Error> {
            let conn = Self::open_connection()?;
            let mut stmt = conn.prepare(&statement)?;
            let batches: Vec<RecordBatch> = stmt.query_arrow(params_from_iter(params.iter()))?.collect();
            Ok(batches)
        })
        .await?;
        result.map_err(|e| {
            error!("store query failed: {}\n{}", e, sql);
            Error::from(e)
        })
    }
}

#[async_trait]
impl GridData for GridAccess {
    async fn series(&self, request: &SeriesRequest) -> Result<Vec<ResultRow>, Error> {
        let family = request.family();
        let periods = match request.source {
            SeriesSource::Live(family) => plan_periods(
                family,
                request.start,
                request.end,
                request.offset,
                OffsetDateTime::now_utc().year(),
            ),
            SeriesSource::Climatology => vec![ShardPeriod::Climatology],
        };
        let files = self.registry.resolve_all(family, &request.cells, &periods);
        if files.is_empty() {
            debug!("no {} shards for {:?}", family, periods);
            return Ok(vec![]);
        }
        debug!("reading {} {} shards", files.len(), family);

        let assembled = assembler::series_query(request, &files)?;
        let batches = self.query(assembled).await?;
        let mut rows = Vec::new();
        for batch in &batches {
            rows.extend(decode_series(batch, request)?);
        }
        Ok(rows)
    }

    async fn live_extent(
        &self,
        family: Family,
        cells: &[GridCell],
    ) -> Result<Option<OffsetDateTime>, Error> {
        let year = OffsetDateTime::now_utc().year();
        // newest shards first; the first one holding rows for these cells wins
        let mut groups = vec![vec![ShardPeriod::Current, ShardPeriod::Year(year)]];
        groups.extend(
            (family.coverage_floor()..year)
                .rev()
                .map(|older| vec![ShardPeriod::Year(older)]),
        );
        for periods in groups {
            let files = self.registry.resolve_all(family, cells, &periods);
            if files.is_empty() {
                continue;
            }
            let batches = self
                .query(assembler::live_extent_query(cells, &files)?)
                .await?;
            let mut newest = None;
            for batch in &batches {
                let ts = int_column(batch, "ts")?;
                for row in 0..batch.num_rows() {
                    if ts.is_null(row) {
                        continue;
                    }
                    let at = OffsetDateTime::from_unix_timestamp(ts.value(row))?;
                    newest = newest.max(Some(at));
                }
            }
            if newest.is_some() {
                return Ok(newest);
            }
        }
        Ok(None)
    }

    async fn health(&self) -> Result<(), Error> {
        let _permit = self.permits.clone().acquire_owned().await?;
        tokio::task::spawn_blocking(|| -> Result<(), duckdb::Error> {
            let conn = Self::open_connection()?;
            conn.execute_batch("SELECT 1")?;
            Ok(())
        })
        .await??;
        Ok(())
    }
}

fn int_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a Int64Array, Error> {
    batch
        .column_by_name(name)
        .and_then(|column| column.as_any().downcast_ref::<Int64Array>())
        .ok_or_else(|| Error::Layout(format!("expected BIGINT column `{}`", name)))
}

fn float_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a Float64Array, Error> {
    batch
        .column_by_name(name)
        .and_then(|column| column.as_any().downcast_ref::<Float64Array>())
        .ok_or_else(|| Error::Layout(format!("expected DOUBLE column `{}`", name)))
}

fn decode_series(batch: &RecordBatch, request: &SeriesRequest) -> Result<Vec<ResultRow>, Error> {
    let ts = int_column(batch, "ts")?;
    let cell_lat = int_column(batch, "cell_lat")?;
    let cell_lon = int_column(batch, "cell_lon")?;
    let columns = request
        .attributes
        .iter()
        .map(|attribute| Ok((*attribute, float_column(batch, attribute.name())?)))
        .collect::<Result<Vec<_>, Error>>()?;

    let grid_family = request.grid_family();
    let mut rows = Vec::with_capacity(batch.num_rows());
    for row in 0..batch.num_rows() {
        let coordinate = match request.label {
            Some(label) => label,
            None => GridCell {
                family: grid_family,
                lat_index: cell_lat.value(row) as i32,
                lon_index: cell_lon.value(row) as i32,
            }
            .center(),
        };
        let values: BTreeMap<Attribute, Option<f64>> = columns
            .iter()
            .map(|(attribute, array)| {
                let value = (!array.is_null(row)).then(|| array.value(row));
                (*attribute, value)
            })
            .collect();
        rows.push(ResultRow {
            timestamp: OffsetDateTime::from_unix_timestamp(ts.value(row))?
                .to_offset(request.offset),
            coordinate,
            values,
            source: None,
            predicted: matches!(request.source, SeriesSource::Climatology),
        });
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::{parse_filter, Vocabulary};
    use std::path::PathBuf;
    use time::macros::{datetime, offset};

    fn scratch_store() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("wxgrid-store-{}", uuid::Uuid::now_v7()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn write_shard(root: &Path, relative: &str, select: &str) {
        let path = root.join(relative);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(&format!(
            "COPY ({}) TO '{}' (FORMAT PARQUET)",
            select,
            path.display()
        ))
        .unwrap();
    }

    /// Two neighbouring model cells, six hours each, tmp = 20 + hour, apcp = hour / 2.
    fn seed_model(root: &Path) {
        write_shard(
            root,
            "model/312_615/2019.parquet",
            "SELECT TIMESTAMP '2019-06-01 00:00:00' + to_hours(i) AS date, \
             c AS cell_lat, 615 AS cell_lon, 20.0 + i AS tmp, i * 0.5 AS apcp, 50.0 AS rh \
             FROM range(6) t(i), (VALUES (312), (313)) cells(c)",
        );
        write_shard(
            root,
            "model/312_615/climatology.parquet",
            "SELECT 6 AS month, 1 AS day, h AS hour, 312 AS cell_lat, 615 AS cell_lon, \
             10.0 + h AS tmp, 0.1 AS apcp, 60.0 AS rh FROM range(24) t(h)",
        );
    }

    fn point() -> Coordinate {
        Coordinate::new(39.03, -76.94).unwrap()
    }

    fn request(source: SeriesSource) -> SeriesRequest {
        SeriesRequest {
            source,
            cells: vec![GridCell::snap(Family::Model, point())],
            aggregate_to_tiles: false,
            start: datetime!(2019-06-01 0:00 UTC),
            end: datetime!(2019-06-01 23:00 UTC),
            offset: offset!(-4),
            label: Some(point()),
            attributes: vec![Attribute::AirTemperature, Attribute::Precipitation],
            filter: None,
        }
    }

    #[tokio::test]
    async fn point_series_reads_only_the_snapped_cell() {
        let root = scratch_store();
        seed_model(&root);
        let store = GridAccess::new(&root, Duration::from_secs(3600), 2);

        let rows = store
            .series(&request(SeriesSource::Live(Family::Model)))
            .await
            .unwrap();
        assert_eq!(rows.len(), 6);
        assert_eq!(rows[0].timestamp, datetime!(2019-05-31 20:00 -4));
        assert_eq!(rows[0].coordinate, point());
        assert_eq!(rows[5].value(Attribute::AirTemperature), Some(25.0));
        assert_eq!(rows[5].value(Attribute::Precipitation), Some(2.5));
        assert!(rows.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
    }

    #[tokio::test]
    async fn window_and_filter_are_pushed_into_the_store() {
        let root = scratch_store();
        seed_model(&root);
        let store = GridAccess::new(&root, Duration::from_secs(3600), 2);

        let mut req = request(SeriesSource::Live(Family::Model));
        req.start = datetime!(2019-06-01 1:00 UTC);
        req.end = datetime!(2019-06-01 4:00 UTC);
        req.filter = Some(parse_filter("tmp > 22", &Vocabulary::filter()).unwrap());
        let rows = store.series(&req).await.unwrap();
        let temps: Vec<Option<f64>> = rows
            .iter()
            .map(|r| r.value(Attribute::AirTemperature))
            .collect();
        assert_eq!(temps, vec![Some(23.0), Some(24.0)]);
    }

    #[tokio::test]
    async fn climatology_is_mapped_onto_requested_hours() {
        let root = scratch_store();
        seed_model(&root);
        let store = GridAccess::new(&root, Duration::from_secs(3600), 2);

        let mut req = request(SeriesSource::Climatology);
        req.start = datetime!(2031-06-01 2:00 UTC);
        req.end = datetime!(2031-06-01 4:00 UTC);
        let rows = store.series(&req).await.unwrap();
        assert_eq!(rows.len(), 3);
        assert!(rows.iter().all(|r| r.predicted));
        assert_eq!(rows[0].timestamp, datetime!(2031-06-01 2:00 UTC));
        assert_eq!(rows[0].value(Attribute::AirTemperature), Some(12.0));
    }

    #[tokio::test]
    async fn missing_shards_yield_no_rows() {
        let root = scratch_store();
        let store = GridAccess::new(&root, Duration::from_secs(3600), 2);
        let rows = store
            .series(&request(SeriesSource::Live(Family::Radar)))
            .await
            .unwrap();
        assert!(rows.is_empty());
        assert_eq!(
            store
                .live_extent(Family::Model, &[GridCell::snap(Family::Model, point())])
                .await
                .unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn live_extent_reaches_back_to_older_shards() {
        let root = scratch_store();
        seed_model(&root);
        let store = GridAccess::new(&root, Duration::from_secs(3600), 2);
        let newest = store
            .live_extent(Family::Model, &[GridCell::snap(Family::Model, point())])
            .await
            .unwrap();
        assert_eq!(newest, Some(datetime!(2019-06-01 5:00 UTC)));
    }

    #[tokio::test]
    async fn radar_rectangle_rows_are_averaged_per_tile() {
        let root = scratch_store();
        write_shard(
            &root,
            "radar/312_615/2019.parquet",
            "SELECT TIMESTAMP '2019-06-01 00:00:00' AS date, 3903 AS cell_lat, l AS cell_lon, \
             l - 7690.0 AS qpe FROM (VALUES (7690), (7692)) t(l)",
        );
        let store = GridAccess::new(&root, Duration::from_secs(3600), 2);
        let tile = GridCell::snap(Family::Model, point());
        let req = SeriesRequest {
            source: SeriesSource::Live(Family::Radar),
            cells: vec![tile],
            aggregate_to_tiles: true,
            start: datetime!(2019-06-01 0:00 UTC),
            end: datetime!(2019-06-01 1:00 UTC),
            offset: UtcOffset::UTC,
            label: None,
            attributes: vec![Attribute::Precipitation],
            filter: None,
        };
        let rows = store.series(&req).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].coordinate, tile.center());
        assert_eq!(rows[0].value(Attribute::Precipitation), Some(1.0));
    }
}
