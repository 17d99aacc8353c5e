pub mod aggregate;
pub mod assembler;
pub mod grid_data;
pub mod predicted;
pub mod reconcile;
pub mod sqlite;

pub use aggregate::{Bucket, BucketKey};
pub use grid_data::{Error, GridAccess, GridData, SeriesRequest, SeriesSource};
pub use predicted::{CalendarHour, Segment};
pub use reconcile::{PrecipitationSource, Reconciled};
pub use sqlite::{AddressRecord, Database, DatabaseWriter};

use std::collections::BTreeMap;
use time::{OffsetDateTime, PrimitiveDateTime};

use crate::{
    expression::{Scope, Value},
    Attribute, Coordinate,
};

/// One hourly observation at one coordinate.
#[derive(Clone, Debug, PartialEq)]
pub struct ResultRow {
    /// Carries the clock the row is reported in (target offset, or UTC).
    pub timestamp: OffsetDateTime,
    pub coordinate: Coordinate,
    pub values: BTreeMap<Attribute, Option<f64>>,
    /// Set once precipitation has been reconciled across sources.
    pub source: Option<PrecipitationSource>,
    /// Value came from climatology rather than live shards.
    pub predicted: bool,
}

impl ResultRow {
    /// Merge and sort key.
    pub fn key(&self) -> (i64, (i64, i64)) {
        (self.timestamp.unix_timestamp(), self.coordinate.sort_key())
    }

    pub fn value(&self, attribute: Attribute) -> Option<f64> {
        self.values.get(&attribute).copied().flatten()
    }

    pub fn local_time(&self) -> PrimitiveDateTime {
        PrimitiveDateTime::new(self.timestamp.date(), self.timestamp.time())
    }
}

impl Scope for ResultRow {
    fn column(&self, name: &str) -> Value {
        match name {
            "date" => Value::Date(self.local_time()),
            "lat" => Value::Number(self.coordinate.lat),
            "lon" => Value::Number(self.coordinate.lon),
            other => match other.parse::<Attribute>() {
                Ok(attribute) => self.value(attribute).map(Value::Number).unwrap_or(Value::Null),
                Err(_) => Value::Null,
            },
        }
    }
}
