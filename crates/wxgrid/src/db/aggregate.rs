use std::collections::BTreeMap;
use time::{Date, Month};

use super::ResultRow;
use crate::{
    expression::{Scope, StatItem, Value},
    Attribute, Coordinate, GddParams, GroupKey, Kind,
};

/// Calendar labels of a bucket. Only the requested keys are set.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct BucketKey {
    pub year: Option<i32>,
    pub growyear: Option<i32>,
    pub month: Option<u8>,
    pub doy: Option<u16>,
    pub date: Option<Date>,
}

impl BucketKey {
    pub fn for_date(date: Date, keys: &[GroupKey]) -> Self {
        let mut key = BucketKey::default();
        for group in keys {
            match group {
                GroupKey::Day => key.date = Some(date),
                GroupKey::Month => key.month = Some(u8::from(date.month())),
                GroupKey::Year => key.year = Some(date.year()),
                GroupKey::GrowYear => key.growyear = Some(growing_year(date)),
                GroupKey::Doy => key.doy = Some(date.ordinal()),
            }
        }
        key
    }
}

/// Growing years run from August 1 and are named for the year they end in.
pub fn growing_year(date: Date) -> i32 {
    if date.month() >= Month::August {
        date.year() + 1
    } else {
        date.year()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Bucket {
    pub coordinate: Coordinate,
    pub key: BucketKey,
    pub values: BTreeMap<String, Option<f64>>,
}

impl Scope for Bucket {
    fn column(&self, name: &str) -> Value {
        match name {
            "lat" => Value::Number(self.coordinate.lat),
            "lon" => Value::Number(self.coordinate.lon),
            other => self
                .values
                .get(other)
                .copied()
                .flatten()
                .map(Value::Number)
                .unwrap_or(Value::Null),
        }
    }
}

#[derive(Clone, Copy, Debug, Default)]
struct Accumulator {
    sum: f64,
    count: usize,
    min: Option<f64>,
    max: Option<f64>,
}

impl Accumulator {
    fn push(&mut self, value: f64) {
        self.sum += value;
        self.count += 1;
        self.min = Some(self.min.map_or(value, |m| m.min(value)));
        self.max = Some(self.max.map_or(value, |m| m.max(value)));
    }

    fn merge(&mut self, other: &Accumulator) {
        self.sum += other.sum;
        self.count += other.count;
        self.min = match (self.min, other.min) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        self.max = match (self.max, other.max) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
    }
}

#[derive(Clone, Debug)]
struct Group {
    coordinate: Coordinate,
    key: BucketKey,
    accumulators: BTreeMap<Attribute, Accumulator>,
    gdd: Option<f64>,
}

impl Group {
    fn new(coordinate: Coordinate, key: BucketKey) -> Self {
        Self {
            coordinate,
            key,
            accumulators: BTreeMap::new(),
            gdd: None,
        }
    }

    fn into_bucket(self, attributes: &[Attribute], with_gdd: bool) -> Bucket {
        let mut values = BTreeMap::new();
        for attribute in attributes {
            let acc = self.accumulators.get(attribute).copied().unwrap_or_default();
            let present = acc.count > 0;
            match attribute.kind() {
                Kind::Flux => {
                    values.insert(attribute.name().to_string(), present.then_some(acc.sum));
                }
                Kind::State => {
                    values.insert(format!("min_{}", attribute.name()), acc.min);
                    values.insert(format!("max_{}", attribute.name()), acc.max);
                    values.insert(
                        format!("avg_{}", attribute.name()),
                        present.then(|| acc.sum / acc.count as f64),
                    );
                }
            }
        }
        if with_gdd {
            values.insert("gdd".to_string(), self.gdd);
        }
        Bucket {
            coordinate: self.coordinate,
            key: self.key,
            values,
        }
    }
}

/// Bucket hourly rows by their local calendar day.
fn daily_groups(
    rows: &[ResultRow],
    attributes: &[Attribute],
    gdd: Option<GddParams>,
) -> Vec<(Date, Group)> {
    let mut days: BTreeMap<((i64, i64), Date), Group> = BTreeMap::new();
    for row in rows {
        let date = row.timestamp.date();
        let group = days
            .entry((row.coordinate.sort_key(), date))
            .or_insert_with(|| Group::new(row.coordinate, BucketKey::default()));
        for attribute in attributes {
            if let Some(value) = row.value(*attribute) {
                group.accumulators.entry(*attribute).or_default().push(value);
            }
        }
        if gdd.is_some() && !attributes.contains(&Attribute::AirTemperature) {
            if let Some(value) = row.value(Attribute::AirTemperature) {
                group
                    .accumulators
                    .entry(Attribute::AirTemperature)
                    .or_default()
                    .push(value);
            }
        }
    }

    days.into_iter()
        .map(|((_, date), mut group)| {
            if let Some(params) = gdd {
                let temps = group.accumulators.get(&Attribute::AirTemperature);
                if let Some(Accumulator {
                    min: Some(min),
                    max: Some(max),
                    ..
                }) = temps
                {
                    group.gdd = Some(params.degree_days(*min, *max));
                }
            }
            (date, group)
        })
        .collect()
}

/// First pass: calendar buckets with sums for flux attributes, min/max/avg
/// for state attributes and degree days summed from daily extremes.
pub fn bucket(
    rows: &[ResultRow],
    attributes: &[Attribute],
    keys: &[GroupKey],
    gdd: Option<GddParams>,
) -> Vec<Bucket> {
    let mut buckets: BTreeMap<((i64, i64), BucketKey), Group> = BTreeMap::new();
    for (date, day) in daily_groups(rows, attributes, gdd) {
        let key = BucketKey::for_date(date, keys);
        let group = buckets
            .entry((day.coordinate.sort_key(), key))
            .or_insert_with(|| Group::new(day.coordinate, key));
        for (attribute, acc) in &day.accumulators {
            group.accumulators.entry(*attribute).or_default().merge(acc);
        }
        if let Some(degree_days) = day.gdd {
            group.gdd = Some(group.gdd.unwrap_or(0.0) + degree_days);
        }
    }
    buckets
        .into_values()
        .map(|group| group.into_bucket(attributes, gdd.is_some()))
        .collect()
}

/// Second pass: evaluate `stats` over daily buckets grouped by coordinate and
/// the requested non-day keys.
pub fn statistics(
    rows: &[ResultRow],
    attributes: &[Attribute],
    keys: &[GroupKey],
    gdd: Option<GddParams>,
    stats: &[StatItem],
) -> Vec<Bucket> {
    let outer: Vec<GroupKey> = keys.iter().copied().filter(|k| *k != GroupKey::Day).collect();
    let daily = bucket(rows, attributes, &[GroupKey::Day], gdd);

    let mut groups: BTreeMap<((i64, i64), BucketKey), (Coordinate, Vec<&Bucket>)> =
        BTreeMap::new();
    for day in &daily {
        let Some(date) = day.key.date else { continue };
        let key = BucketKey::for_date(date, &outer);
        groups
            .entry((day.coordinate.sort_key(), key))
            .or_insert_with(|| (day.coordinate, vec![]))
            .1
            .push(day);
    }

    groups
        .into_iter()
        .map(|((_, key), (coordinate, days))| {
            let values = stats
                .iter()
                .map(|item| {
                    let inputs: Vec<f64> = days
                        .iter()
                        .filter_map(|day| item.expr.eval(*day).number())
                        .collect();
                    (item.label(), item.aggregate.apply(&inputs))
                })
                .collect();
            Bucket {
                coordinate,
                key,
                values,
            }
        })
        .collect()
}
