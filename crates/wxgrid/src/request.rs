use serde::Deserialize;
use std::fmt;
use time::{
    macros::{format_description, time},
    Date, Duration, Month, OffsetDateTime, PrimitiveDateTime, UtcOffset,
};
use utoipa::IntoParams;

use crate::{
    expression::{self, Expr, Rejected, StatItem, Vocabulary},
    grid, parse_attributes, Attribute, BoundingBox, Coordinate, Family, GridCell,
    UnknownAttribute,
};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("lat has {0} values but lon has {1}")]
    CoordinateLists(usize, usize),
    #[error("either lat/lon or location is required")]
    MissingLocation,
    #[error("invalid number `{0}`")]
    Number(String),
    #[error(transparent)]
    Grid(#[from] grid::Error),
    #[error(transparent)]
    Attribute(#[from] UnknownAttribute),
    #[error("unknown option `{0}`")]
    UnknownOption(String),
    #[error("options `{0}` and `{1}` cannot be combined")]
    ConflictingOptions(&'static str, &'static str),
    #[error("unknown group key `{0}`")]
    UnknownGroup(String),
    #[error("cannot order by `{0}`")]
    UnknownOrder(String),
    #[error("invalid date `{0}`, expected YYYY-MM-DD or YYYY-MM-DDTHH:MM")]
    Date(String),
    #[error("date `{0}` is outside the supported years 1000 to 9998")]
    DateRange(String),
    #[error("start {0} is after end {1}")]
    Window(PrimitiveDateTime, PrimitiveDateTime),
    #[error("unsupported output `{0}`, only json is served")]
    Output(String),
    #[error("`{0}` is only valid on /daily and /averages")]
    NotBucketed(&'static str),
    #[error("invalid growing degree day parameters: {0}")]
    Gdd(String),
    #[error(transparent)]
    Expression(#[from] Rejected),
}

/// Query string accepted by every data endpoint.
#[derive(Clone, Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct QueryParams {
    /// Comma separated latitudes
    pub lat: Option<String>,
    /// Comma separated longitudes, same length as `lat`
    pub lon: Option<String>,
    /// Free text place name or postal code, used instead of lat/lon
    pub location: Option<String>,
    /// Window start, YYYY-MM-DD or YYYY-MM-DDTHH:MM
    pub start: Option<String>,
    /// Window end (inclusive), YYYY-MM-DD or YYYY-MM-DDTHH:MM
    pub end: Option<String>,
    /// Comma separated attribute names or short codes
    #[serde(alias = "attr")]
    pub attributes: Option<String>,
    /// Comma separated flags: rect, utc, predicted, live, radar, noradar, units, nocache, nosave
    pub options: Option<String>,
    /// Row filter expression
    #[serde(rename = "where")]
    pub filter: Option<String>,
    /// Comma separated aggregate expressions applied over daily rows
    pub stats: Option<String>,
    /// Comma separated bucket keys: day, month, year, growyear, doy
    pub group: Option<String>,
    /// Comma separated output columns, each optionally followed by `desc`
    pub order: Option<String>,
    pub gddbase: Option<f64>,
    pub gddmin: Option<f64>,
    pub gddmax: Option<f64>,
    /// Response encoding, only `json`
    pub output: Option<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Endpoint {
    Hourly,
    Daily,
    Averages,
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Endpoint::Hourly => "hourly",
            Endpoint::Daily => "daily",
            Endpoint::Averages => "averages",
        };
        write!(f, "{}", name)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Prediction {
    /// Climatology only when the whole window lies outside live coverage.
    #[default]
    Auto,
    /// Live rows up to the newest live hour, climatology after it.
    Predicted,
    LiveOnly,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RadarPreference {
    #[default]
    Auto,
    Include,
    Exclude,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Options {
    pub rect: bool,
    pub utc: bool,
    pub prediction: Prediction,
    pub radar: RadarPreference,
    pub units: bool,
    pub nocache: bool,
    pub nosave: bool,
}

impl Options {
    pub fn parse(raw: Option<&str>) -> Result<Self, Error> {
        let mut options = Options::default();
        let Some(raw) = raw else {
            return Ok(options);
        };
        for flag in raw.split(',').map(|f| f.trim().to_lowercase()) {
            match flag.as_str() {
                "" => {}
                "rect" => options.rect = true,
                "utc" => options.utc = true,
                "units" => options.units = true,
                "nocache" => options.nocache = true,
                "nosave" => options.nosave = true,
                "predicted" => {
                    if options.prediction == Prediction::LiveOnly {
                        return Err(Error::ConflictingOptions("predicted", "live"));
                    }
                    options.prediction = Prediction::Predicted;
                }
                "live" => {
                    if options.prediction == Prediction::Predicted {
                        return Err(Error::ConflictingOptions("predicted", "live"));
                    }
                    options.prediction = Prediction::LiveOnly;
                }
                "radar" | "mrms" => {
                    if options.radar == RadarPreference::Exclude {
                        return Err(Error::ConflictingOptions("radar", "noradar"));
                    }
                    options.radar = RadarPreference::Include;
                }
                "noradar" | "nomrms" => {
                    if options.radar == RadarPreference::Include {
                        return Err(Error::ConflictingOptions("radar", "noradar"));
                    }
                    options.radar = RadarPreference::Exclude;
                }
                _ => return Err(Error::UnknownOption(flag)),
            }
        }
        Ok(options)
    }

    /// Flags that change the rows returned. Cache flags are left out.
    fn canonical(&self) -> String {
        format!(
            "rect={},utc={},prediction={:?},radar={:?},units={}",
            self.rect, self.utc, self.prediction, self.radar, self.units
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum GroupKey {
    Day,
    Month,
    Year,
    /// Twelve months starting August 1, labelled by the year they end in.
    GrowYear,
    Doy,
}

impl GroupKey {
    pub fn name(&self) -> &'static str {
        match self {
            GroupKey::Day => "day",
            GroupKey::Month => "month",
            GroupKey::Year => "year",
            GroupKey::GrowYear => "growyear",
            GroupKey::Doy => "doy",
        }
    }

    fn parse(raw: &str) -> Result<Self, Error> {
        match raw.trim().to_lowercase().as_str() {
            "day" | "date" => Ok(GroupKey::Day),
            "month" => Ok(GroupKey::Month),
            "year" => Ok(GroupKey::Year),
            "growyear" => Ok(GroupKey::GrowYear),
            "doy" => Ok(GroupKey::Doy),
            other => Err(Error::UnknownGroup(other.to_string())),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OrderKey {
    pub column: String,
    pub descending: bool,
}

impl fmt::Display for OrderKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.descending {
            write!(f, "{} desc", self.column)
        } else {
            write!(f, "{}", self.column)
        }
    }
}

/// Growing degree day parameters, all in degC.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GddParams {
    pub base: f64,
    pub floor: f64,
    pub cap: f64,
}

impl GddParams {
    pub const UNCAPPED: f64 = 1.0e9;

    fn parse(base: Option<f64>, floor: Option<f64>, cap: Option<f64>) -> Result<Option<Self>, Error> {
        let Some(base) = base else {
            if floor.is_some() || cap.is_some() {
                return Err(Error::Gdd("gddmin/gddmax need gddbase".to_string()));
            }
            return Ok(None);
        };
        let params = GddParams {
            base,
            floor: floor.unwrap_or(base),
            cap: cap.unwrap_or(Self::UNCAPPED),
        };
        if !(params.base.is_finite() && params.floor.is_finite() && params.cap.is_finite()) {
            return Err(Error::Gdd("values must be finite".to_string()));
        }
        if params.floor > params.cap {
            return Err(Error::Gdd(format!(
                "gddmin {} is above gddmax {}",
                params.floor, params.cap
            )));
        }
        Ok(Some(params))
    }

    /// Daily value from the day's temperature extremes.
    pub fn degree_days(&self, min: f64, max: f64) -> f64 {
        let clamp = |t: f64| t.max(self.floor).min(self.cap);
        ((clamp(max) + clamp(min)) / 2.0 - self.base).max(0.0)
    }
}

/// How rows leave the aggregator.
#[derive(Clone, Debug, PartialEq)]
pub enum Shape {
    Raw,
    Bucketed {
        keys: Vec<GroupKey>,
        gdd: Option<GddParams>,
        stats: Vec<StatItem>,
    },
}

#[derive(Clone, Debug, PartialEq)]
pub enum Locator {
    Points(Vec<Coordinate>),
    Place(String),
}

/// A request after validation, before any location is resolved.
#[derive(Clone, Debug)]
pub struct QueryRequest {
    pub endpoint: Endpoint,
    pub locator: Locator,
    pub start: Option<PrimitiveDateTime>,
    pub end: Option<PrimitiveDateTime>,
    pub attributes: Vec<Attribute>,
    pub options: Options,
    pub filter: Option<Expr>,
    pub shape: Shape,
    pub order: Vec<OrderKey>,
    pub limit: Option<usize>,
    pub offset: usize,
}

impl QueryRequest {
    pub fn parse(endpoint: Endpoint, params: &QueryParams) -> Result<Self, Error> {
        if let Some(output) = params.output.as_deref() {
            if !output.trim().eq_ignore_ascii_case("json") {
                return Err(Error::Output(output.to_string()));
            }
        }

        let locator = match (&params.lat, &params.lon, &params.location) {
            (Some(lat), Some(lon), _) => Locator::Points(parse_coordinates(lat, lon)?),
            (None, None, Some(place)) if !place.trim().is_empty() => {
                Locator::Place(place.to_string())
            }
            _ => return Err(Error::MissingLocation),
        };

        let options = Options::parse(params.options.as_deref())?;

        let attributes = match params.attributes.as_deref() {
            Some(list) if !list.trim().is_empty() => parse_attributes(list)?,
            _ => Attribute::ALL.to_vec(),
        };

        let start = params.start.as_deref().map(|s| parse_bound(s, false)).transpose()?;
        let end = params.end.as_deref().map(|s| parse_bound(s, true)).transpose()?;
        if let (Some(start), Some(end)) = (start, end) {
            if endpoint != Endpoint::Averages && start > end {
                return Err(Error::Window(start, end));
            }
        }

        let filter = params
            .filter
            .as_deref()
            .filter(|f| !f.trim().is_empty())
            .map(|f| expression::parse_filter(f, &Vocabulary::filter()))
            .transpose()?;

        let gdd = GddParams::parse(params.gddbase, params.gddmin, params.gddmax)?;
        let wants_buckets = params.group.is_some() || params.stats.is_some() || gdd.is_some();
        let shape = match endpoint {
            Endpoint::Hourly if wants_buckets => {
                let offending = if params.group.is_some() {
                    "group"
                } else if params.stats.is_some() {
                    "stats"
                } else {
                    "gddbase"
                };
                return Err(Error::NotBucketed(offending));
            }
            Endpoint::Averages if !wants_buckets => Shape::Raw,
            Endpoint::Hourly => Shape::Raw,
            _ => {
                let keys = parse_group(params.group.as_deref())?;
                let mut columns: Vec<String> =
                    attributes.iter().flat_map(|a| a.bucket_columns()).collect();
                if gdd.is_some() {
                    columns.push("gdd".to_string());
                }
                let stats = params
                    .stats
                    .as_deref()
                    .filter(|s| !s.trim().is_empty())
                    .map(|s| expression::parse_stats(s, &Vocabulary::buckets(columns)))
                    .transpose()?
                    .unwrap_or_default();
                Shape::Bucketed { keys, gdd, stats }
            }
        };

        let mut request = QueryRequest {
            endpoint,
            locator,
            start,
            end,
            attributes,
            options,
            filter,
            shape,
            order: vec![],
            limit: params.limit,
            offset: params.offset.unwrap_or(0),
        };
        request.order = parse_order(params.order.as_deref(), &request.output_columns())?;
        Ok(request)
    }

    /// Attributes the store has to deliver: requested ones plus whatever
    /// the filter and degree days read.
    pub fn fetched_attributes(&self) -> Vec<Attribute> {
        let mut attributes = self.attributes.clone();
        let mut extra: Vec<Attribute> = self
            .filter
            .iter()
            .flat_map(|f| f.columns())
            .filter_map(|column| column.parse::<Attribute>().ok())
            .collect();
        if let Shape::Bucketed { gdd: Some(_), .. } = self.shape {
            extra.push(Attribute::AirTemperature);
        }
        for attribute in extra {
            if !attributes.contains(&attribute) {
                attributes.push(attribute);
            }
        }
        attributes
    }

    /// Names of the value columns a response row can carry.
    pub fn output_columns(&self) -> Vec<String> {
        let mut columns: Vec<String> = ["date", "lat", "lon"].map(String::from).to_vec();
        match &self.shape {
            Shape::Raw => {
                columns.extend(self.attributes.iter().map(|a| a.name().to_string()));
            }
            Shape::Bucketed { keys, gdd, stats } => {
                columns.extend(keys.iter().map(|k| k.name().to_string()));
                if stats.is_empty() {
                    columns.extend(self.attributes.iter().flat_map(|a| a.bucket_columns()));
                    if gdd.is_some() {
                        columns.push("gdd".to_string());
                    }
                } else {
                    columns.extend(stats.iter().map(|s| s.label()));
                }
            }
        }
        columns
    }

    /// Cache key. Covers every parameter that changes the returned rows.
    pub fn signature(&self) -> String {
        let locator = match &self.locator {
            Locator::Points(points) => points
                .iter()
                .map(|p| p.to_string())
                .collect::<Vec<_>>()
                .join(";"),
            Locator::Place(place) => format!("place:{}", crate::PlaceQuery::parse(place).key()),
        };
        let bound = |b: Option<PrimitiveDateTime>| {
            b.map(|b| b.to_string()).unwrap_or_else(|| "default".to_string())
        };
        let shape = match &self.shape {
            Shape::Raw => "raw".to_string(),
            Shape::Bucketed { keys, gdd, stats } => format!(
                "group={:?};gdd={:?};stats={}",
                keys,
                gdd,
                stats.iter().map(|s| s.to_string()).collect::<Vec<_>>().join(",")
            ),
        };
        format!(
            "{}|{}|{}|{}|{}|{}|{}|{}|{}|{}|{}",
            self.endpoint,
            locator,
            bound(self.start),
            bound(self.end),
            self.attributes.iter().map(|a| a.name()).collect::<Vec<_>>().join(","),
            self.options.canonical(),
            self.filter.as_ref().map(|f| f.to_sql()).unwrap_or_default(),
            shape,
            self.order.iter().map(|o| o.to_string()).collect::<Vec<_>>().join(","),
            self.limit.map(|l| l.to_string()).unwrap_or_default(),
            self.offset,
        )
    }

    /// Inclusive UTC window for a target whose clock runs at `offset`.
    pub fn window(&self, offset: UtcOffset, now: OffsetDateTime) -> Result<Window, Error> {
        let window = match self.endpoint {
            Endpoint::Averages => averages_window(self.start, self.end, offset, now),
            _ => Window {
                start: self
                    .start
                    .unwrap_or(PrimitiveDateTime::new(Family::Model.coverage_start(), time!(0:00)))
                    .assume_offset(offset)
                    .to_offset(UtcOffset::UTC),
                end: self
                    .end
                    .map(|end| end.assume_offset(offset).to_offset(UtcOffset::UTC))
                    .unwrap_or(now),
            },
        };
        if window.start > window.end {
            let local = |t: OffsetDateTime| {
                let t = t.to_offset(offset);
                PrimitiveDateTime::new(t.date(), t.time())
            };
            return Err(Error::Window(local(window.start), local(window.end)));
        }
        Ok(window)
    }
}

/// Inclusive UTC instants.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Window {
    pub start: OffsetDateTime,
    pub end: OffsetDateTime,
}

/// Calendar-day range mapped onto the current local year. A range that
/// crosses New Year ends in the following year.
fn averages_window(
    start: Option<PrimitiveDateTime>,
    end: Option<PrimitiveDateTime>,
    offset: UtcOffset,
    now: OffsetDateTime,
) -> Window {
    let today = now.to_offset(offset).date();
    let year = today.year();
    // Feb 29 lands on Feb 28 in common years
    let on_year = |t: PrimitiveDateTime, year: i32| {
        t.replace_year(year).unwrap_or_else(|_| {
            let feb_28 = Date::from_calendar_date(year, Month::February, 28).unwrap_or(t.date());
            PrimitiveDateTime::new(feb_28, t.time())
        })
    };
    let start = start
        .map(|s| on_year(s, year))
        .unwrap_or(PrimitiveDateTime::new(today, time!(0:00)));
    let mut end = end
        .map(|e| on_year(e, year))
        .unwrap_or(PrimitiveDateTime::new(today + Duration::days(7), time!(23:59:59)));
    if end < start {
        end = on_year(end, end.year() + 1);
    }
    Window {
        start: start.assume_offset(offset).to_offset(UtcOffset::UTC),
        end: end.assume_offset(offset).to_offset(UtcOffset::UTC),
    }
}

/// One resolved place a request asks about.
#[derive(Clone, Debug, PartialEq)]
pub enum Target {
    Point {
        coordinate: Coordinate,
        offset: UtcOffset,
        window: Window,
    },
    Rectangle {
        bbox: BoundingBox,
        offset: UtcOffset,
        window: Window,
    },
}

impl Target {
    pub fn offset(&self) -> UtcOffset {
        match self {
            Target::Point { offset, .. } | Target::Rectangle { offset, .. } => *offset,
        }
    }

    pub fn window(&self) -> Window {
        match self {
            Target::Point { window, .. } | Target::Rectangle { window, .. } => *window,
        }
    }

    /// Model-grid cell whose clock the target uses.
    pub fn anchor(&self) -> GridCell {
        match self {
            Target::Point { coordinate, .. } => GridCell::snap(Family::Model, *coordinate),
            Target::Rectangle { bbox, .. } => GridCell::snap(Family::Model, bbox.center()),
        }
    }
}

/// Everything one request needs, fixed once locations are resolved.
#[derive(Clone, Debug)]
pub struct QueryContext {
    pub request: QueryRequest,
    pub targets: Vec<Target>,
    pub now: OffsetDateTime,
}

impl QueryContext {
    /// Coordinates are only echoed when they tell rows apart.
    pub fn labels_coordinates(&self) -> bool {
        self.targets.len() > 1 || matches!(self.targets.first(), Some(Target::Rectangle { .. }))
    }
}

fn parse_number(raw: &str) -> Result<f64, Error> {
    raw.trim()
        .parse::<f64>()
        .ok()
        .filter(|n| n.is_finite())
        .ok_or_else(|| Error::Number(raw.trim().to_string()))
}

fn parse_coordinates(lat: &str, lon: &str) -> Result<Vec<Coordinate>, Error> {
    let lats: Vec<&str> = lat.split(',').collect();
    let lons: Vec<&str> = lon.split(',').collect();
    if lats.len() != lons.len() {
        return Err(Error::CoordinateLists(lats.len(), lons.len()));
    }
    let mut points = Vec::with_capacity(lats.len());
    for (lat, lon) in lats.iter().zip(lons.iter()) {
        let point = Coordinate::new(parse_number(lat)?, parse_number(lon)?)?;
        let domain = Family::domain();
        if !domain.contains(&point) {
            return Err(grid::Error::OutsideDomain(point, domain).into());
        }
        points.push(point);
    }
    Ok(points)
}

/// Bounds outside these years are refused so shifting by any UTC offset stays
/// representable.
const MIN_YEAR: i32 = 1000;
const MAX_YEAR: i32 = 9998;

/// Parse a window bound. A bare date as an end bound covers the whole day.
fn parse_bound(raw: &str, is_end: bool) -> Result<PrimitiveDateTime, Error> {
    let text = raw.trim().replace('T', " ");
    let day = format_description!("[year]-[month]-[day]");
    let minutes = format_description!("[year]-[month]-[day] [hour]:[minute]");
    let seconds = format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");
    let bound = match Date::parse(&text, &day) {
        Ok(date) => {
            let at = if is_end { time!(23:59:59) } else { time!(0:00) };
            PrimitiveDateTime::new(date, at)
        }
        Err(_) => PrimitiveDateTime::parse(&text, &seconds)
            .or_else(|_| PrimitiveDateTime::parse(&text, &minutes))
            .map_err(|_| Error::Date(raw.to_string()))?,
    };
    if !(MIN_YEAR..=MAX_YEAR).contains(&bound.year()) {
        return Err(Error::DateRange(raw.to_string()));
    }
    Ok(bound)
}

fn parse_group(raw: Option<&str>) -> Result<Vec<GroupKey>, Error> {
    let mut keys = Vec::new();
    for piece in raw.unwrap_or_default().split(',').filter(|p| !p.trim().is_empty()) {
        let key = GroupKey::parse(piece)?;
        if !keys.contains(&key) {
            keys.push(key);
        }
    }
    if keys.is_empty() {
        keys.push(GroupKey::Day);
    }
    keys.sort();
    Ok(keys)
}

fn parse_order(raw: Option<&str>, columns: &[String]) -> Result<Vec<OrderKey>, Error> {
    let mut order = Vec::new();
    for piece in raw.unwrap_or_default().split(',').filter(|p| !p.trim().is_empty()) {
        let words: Vec<String> = piece.split_whitespace().map(|w| w.to_lowercase()).collect();
        let (column, descending) = match words.as_slice() {
            [column] => (column.clone(), false),
            [column, dir] if dir == "desc" => (column.clone(), true),
            [column, dir] if dir == "asc" => (column.clone(), false),
            _ => return Err(Error::UnknownOrder(piece.trim().to_string())),
        };
        let column = match column.parse::<Attribute>() {
            Ok(attribute) => attribute.name().to_string(),
            Err(_) => column,
        };
        if !columns.contains(&column) {
            return Err(Error::UnknownOrder(column));
        }
        order.push(OrderKey { column, descending });
    }
    Ok(order)
}
