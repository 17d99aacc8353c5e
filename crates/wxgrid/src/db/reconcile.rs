use log::debug;
use serde::Serialize;
use std::{cmp::Ordering, collections::{BTreeMap, HashSet}};
use time::{Duration, OffsetDateTime};

use super::ResultRow;
use crate::{Attribute, Coordinate};

/// Where a reconciled precipitation value came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PrecipitationSource {
    Radar,
    Model,
    /// Radar row existed but the hour is flagged missing; model value used.
    MissingRadar,
    /// Placeholder for hours the feeds have not delivered yet.
    Extrapolated,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Reconciled {
    pub rows: Vec<ResultRow>,
    /// Hours where a flagged radar gap forced the model value.
    pub overrides: Vec<OffsetDateTime>,
}

/// Merge a model series with a radar series for the same target.
///
/// Both inputs must be sorted by [`ResultRow::key`]. Every model row appears
/// exactly once in the output. Radar precipitation replaces the model value
/// unless the hour (unix seconds) is in `missing_hours`. Radar rows with no
/// model counterpart are kept with only precipitation set.
pub fn reconcile(
    model: Vec<ResultRow>,
    radar: Vec<ResultRow>,
    missing_hours: &HashSet<i64>,
) -> Reconciled {
    let mut merged = Reconciled {
        rows: Vec::with_capacity(model.len().max(radar.len())),
        overrides: vec![],
    };
    let mut model = model.into_iter().peekable();
    let mut radar = radar.into_iter().peekable();

    loop {
        let order = match (model.peek(), radar.peek()) {
            (None, None) => break,
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (Some(m), Some(r)) => m.key().cmp(&r.key()),
        };
        match order {
            Ordering::Less => {
                let Some(mut row) = model.next() else { break };
                row.source = Some(PrecipitationSource::Model);
                merged.rows.push(row);
            }
            Ordering::Equal => {
                let (Some(mut row), Some(gauge)) = (model.next(), radar.next()) else {
                    break;
                };
                if missing_hours.contains(&row.timestamp.unix_timestamp()) {
                    debug!("radar flagged missing at {}, keeping model value", row.timestamp);
                    row.source = Some(PrecipitationSource::MissingRadar);
                    merged.overrides.push(row.timestamp);
                } else {
                    row.values.insert(
                        Attribute::Precipitation,
                        gauge.value(Attribute::Precipitation),
                    );
                    row.source = Some(PrecipitationSource::Radar);
                }
                merged.rows.push(row);
            }
            Ordering::Greater => {
                let Some(mut row) = radar.next() else { break };
                if missing_hours.contains(&row.timestamp.unix_timestamp()) {
                    row.values.insert(Attribute::Precipitation, None);
                    row.source = Some(PrecipitationSource::MissingRadar);
                    merged.overrides.push(row.timestamp);
                } else {
                    row.source = Some(PrecipitationSource::Radar);
                }
                merged.rows.push(row);
            }
        }
    }
    merged
}

/// Extend each coordinate's series hour by hour up to `min(end, now)` when the
/// window ends within `lag` of now. Only live rows are extended, and hours
/// already present are skipped. Placeholders carry zero precipitation and no
/// other values.
pub fn extrapolate(
    rows: &mut Vec<ResultRow>,
    attributes: &[Attribute],
    end: OffsetDateTime,
    now: OffsetDateTime,
    lag: Duration,
) {
    if end <= now - lag {
        return;
    }
    let until = end.min(now);

    let mut latest: BTreeMap<(i64, i64), (OffsetDateTime, Coordinate)> = BTreeMap::new();
    let mut present = HashSet::new();
    for row in rows.iter() {
        present.insert((row.coordinate.sort_key(), row.timestamp.unix_timestamp()));
        if row.predicted {
            continue;
        }
        let entry = latest
            .entry(row.coordinate.sort_key())
            .or_insert((row.timestamp, row.coordinate));
        if row.timestamp > entry.0 {
            *entry = (row.timestamp, row.coordinate);
        }
    }

    let mut added = 0;
    for (key, (last, coordinate)) in latest {
        let mut at = last + Duration::hours(1);
        while at <= until {
            if !present.contains(&(key, at.unix_timestamp())) {
                let values = attributes
                    .iter()
                    .map(|attribute| {
                        let value = (*attribute == Attribute::Precipitation).then_some(0.0);
                        (*attribute, value)
                    })
                    .collect();
                rows.push(ResultRow {
                    timestamp: at,
                    coordinate,
                    values,
                    source: Some(PrecipitationSource::Extrapolated),
                    predicted: false,
                });
                added += 1;
            }
            at += Duration::hours(1);
        }
    }
    if added > 0 {
        debug!("extrapolated {} hours up to {}", added, until);
        rows.sort_by_key(|row| row.key());
    }
}
