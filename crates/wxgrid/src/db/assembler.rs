//! SQL text for the shard store.
//!
//! Every query is a stack of CTEs over `read_parquet`:
//! `source_rows` (shard rows for the cells and window), `projected` (canonical
//! attribute names, local clock, cell centers) and a final select that applies
//! the caller's filter and fixes the row order the merge steps rely on.

use regex::Regex;
use scooby::postgres::{select, with, Parameters, Select};
use std::path::PathBuf;
use time::{macros::format_description, Duration, OffsetDateTime, UtcOffset};

use super::grid_data::{SeriesRequest, SeriesSource};
use crate::{Family, GridCell, CELL_ID_STRIDE};

/// Statement text with DuckDB `?` placeholders and their values in order.
#[derive(Clone, Debug, PartialEq)]
pub struct Assembled {
    pub sql: String,
    pub params: Vec<String>,
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("failed to format timestamp: {0}")]
    TimeFormat(#[from] time::error::Format),
    #[error("failed to rewrite placeholders: {0}")]
    Placeholders(#[from] regex::Error),
}

pub fn series_query(request: &SeriesRequest, files: &[PathBuf]) -> Result<Assembled, Error> {
    let mut placeholders = Parameters::new();
    let mut values = vec![];

    let (source, grid_family) = match request.source {
        SeriesSource::Climatology => {
            let start = placeholders.next();
            let end = placeholders.next();
            values.push(timestamp_param(ceil_hour(request.start))?);
            values.push(timestamp_param(request.end)?);
            let source = select(("hours.date", "c.* EXCLUDE (month, day, hour)"))
                .from(format!(
                    "(SELECT generate_series AS date FROM generate_series(CAST({} AS TIMESTAMP), CAST({} AS TIMESTAMP), INTERVAL 1 HOUR)) AS hours \
                     JOIN {} AS c ON c.month = month(hours.date) AND c.day = day(hours.date) AND c.hour = hour(hours.date)",
                    start,
                    end,
                    read_parquet(files)
                ))
                .where_(cell_filter("c.", &request.cells));
            (source, Family::Model)
        }
        SeriesSource::Live(family) => {
            let mut base = select("*").from(read_parquet(files));
            if !request.aggregate_to_tiles {
                base = base.where_(cell_filter("", &request.cells));
            }
            base = base
                .where_(format!("date >= CAST({} AS TIMESTAMP)", placeholders.next()))
                .where_(format!("date <= CAST({} AS TIMESTAMP)", placeholders.next()));
            values.push(timestamp_param(request.start)?);
            values.push(timestamp_param(request.end)?);

            if request.aggregate_to_tiles && family == Family::Radar {
                // shards are per tile, so every fine cell in them belongs to a requested tile
                let ratio = Family::Radar.step() / Family::Model.step();
                let tile_lat = format!("floor((cell_lat + 0.5) * {} + 1e-9)::BIGINT", ratio);
                let tile_lon = format!("floor((cell_lon + 0.5) * {} + 1e-9)::BIGINT", ratio);
                let tiles = with("shard_rows").as_(base).select(format!(
                    "date, {} AS cell_lat, {} AS cell_lon, AVG(qpe) AS qpe",
                    tile_lat, tile_lon
                ));
                (tiles.from("shard_rows").group_by("ALL"), Family::Model)
            } else {
                (base, family)
            }
        }
    };

    let family = match request.source {
        SeriesSource::Climatology => Family::Model,
        SeriesSource::Live(family) => family,
    };
    let mut projection = vec![
        "epoch(date)::BIGINT AS ts".to_string(),
        "CAST(cell_lat AS BIGINT) AS cell_lat".to_string(),
        "CAST(cell_lon AS BIGINT) AS cell_lon".to_string(),
        format!(
            "date + to_seconds({}) AS \"date\"",
            request.offset.whole_seconds()
        ),
    ];
    match request.label {
        Some(label) => {
            projection.push(format!("{} AS \"lat\"", label.lat));
            projection.push(format!("{} AS \"lon\"", label.lon));
        }
        None => {
            let step = grid_family.step();
            projection.push(format!("(cell_lat + 0.5) * {} AS \"lat\"", step));
            projection.push(format!("-((cell_lon + 0.5) * {}) AS \"lon\"", step));
        }
    }
    for attribute in &request.attributes {
        let expression = attribute.source_expression(family).unwrap_or("NULL");
        projection.push(format!(
            "CAST({} AS DOUBLE) AS \"{}\"",
            expression,
            attribute.name()
        ));
    }
    let projected = with("source_rows")
        .as_(source)
        .select(projection.join(", "))
        .from("source_rows");

    let mut output = vec![
        "ts".to_string(),
        "cell_lat".to_string(),
        "cell_lon".to_string(),
    ];
    output.extend(
        request
            .attributes
            .iter()
            .map(|attribute| format!("\"{}\"", attribute.name())),
    );
    let mut final_query = with("projected")
        .as_(projected)
        .select(output.join(", "))
        .from("projected");
    if let Some(filter) = &request.filter {
        final_query = final_query.where_(filter.to_sql());
    }
    let final_query = final_query.order_by(("ts", "cell_lat", "cell_lon"));

    finalize(final_query, values)
}

/// Newest live timestamp among `cells`.
pub fn live_extent_query(cells: &[GridCell], files: &[PathBuf]) -> Result<Assembled, Error> {
    let query = select("epoch(MAX(date))::BIGINT AS ts")
        .from(read_parquet(files))
        .where_(cell_filter("", cells));
    finalize(query, vec![])
}

fn finalize(query: Select, params: Vec<String>) -> Result<Assembled, Error> {
    let re = Regex::new(r"\$(\d+)")?;
    let text = query.to_string();
    Ok(Assembled {
        sql: re.replace_all(&text, "?").into_owned(),
        params,
    })
}

fn read_parquet(files: &[PathBuf]) -> String {
    let quoted: Vec<String> = files
        .iter()
        .map(|file| file.display().to_string().replace('\'', "''"))
        .collect();
    format!(
        "read_parquet(['{}'], union_by_name = true)",
        quoted.join("', '")
    )
}

/// Membership test against precomputed cell ids instead of per-row distance math.
fn cell_filter(prefix: &str, cells: &[GridCell]) -> String {
    let mut ids: Vec<i64> = cells.iter().map(|cell| cell.id()).collect();
    ids.sort_unstable();
    ids.dedup();
    let ids: Vec<String> = ids.iter().map(|id| id.to_string()).collect();
    format!(
        "(CAST({p}cell_lat AS BIGINT) * {} + {p}cell_lon) IN ({})",
        CELL_ID_STRIDE,
        ids.join(", "),
        p = prefix
    )
}

fn timestamp_param(at: OffsetDateTime) -> Result<String, time::error::Format> {
    at.to_offset(UtcOffset::UTC)
        .format(format_description!("[year]-[month]-[day] [hour]:[minute]:[second]"))
}

fn ceil_hour(at: OffsetDateTime) -> OffsetDateTime {
    let floored = at
        .replace_minute(0)
        .and_then(|t| t.replace_second(0))
        .and_then(|t| t.replace_nanosecond(0))
        .unwrap_or(at);
    if floored == at {
        at
    } else {
        floored + Duration::hours(1)
    }
}
