use futures::future::try_join_all;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use std::{cmp::Ordering, sync::Arc};
use time::{
    format_description::well_known::Rfc3339, macros::format_description, Duration,
    OffsetDateTime, UtcOffset,
};
use utoipa::ToSchema;

use crate::{
    db::{
        aggregate, grid_data,
        predicted::{needs_live_extent, plan_segments},
        reconcile::{extrapolate, reconcile},
        Bucket, BucketKey, Database, GridData, ResultRow, Segment, SeriesRequest, SeriesSource,
    },
    grid,
    location::{self, Geocoder, LocationResolver},
    request::{self, Endpoint, Locator, QueryContext, QueryParams, QueryRequest, Shape, Target},
    Attribute, BoundingBox, Coordinate, Family, GridCell, RadarPreference, Window,
};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Input(#[from] request::Error),
    #[error(transparent)]
    Location(#[from] location::Error),
    #[error(transparent)]
    Store(#[from] grid_data::Error),
    #[error("state database failed: {0}")]
    Cache(anyhow::Error),
    #[error("failed to encode rows: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("failed to format timestamp: {0}")]
    Format(#[from] time::error::Format),
}

impl Error {
    /// A `where`/`stats` fragment outside the grammar.
    pub fn is_rejection(&self) -> bool {
        matches!(self, Error::Input(request::Error::Expression(_)))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub enum Status {
    #[serde(rename = "ok")]
    Ok,
    #[serde(rename = "no data")]
    NoData,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct WeatherResponse {
    pub status: Status,
    #[schema(value_type = Vec<Object>)]
    pub rows: Vec<Map<String, Value>>,
}

impl WeatherResponse {
    fn from_rows(rows: Vec<Map<String, Value>>) -> Self {
        let status = if rows.is_empty() {
            Status::NoData
        } else {
            Status::Ok
        };
        Self { status, rows }
    }
}

pub struct WeatherService {
    grid: Arc<dyn GridData>,
    db: Arc<Database>,
    locations: LocationResolver,
    radar_lag: Duration,
}

impl WeatherService {
    pub fn new(
        grid: Arc<dyn GridData>,
        db: Arc<Database>,
        geocoder: Arc<dyn Geocoder>,
        radar_lag: Duration,
    ) -> Self {
        Self {
            grid,
            locations: LocationResolver::new(db.clone(), geocoder),
            db,
            radar_lag,
        }
    }

    pub async fn query(
        &self,
        endpoint: Endpoint,
        params: &QueryParams,
    ) -> Result<WeatherResponse, Error> {
        let request = QueryRequest::parse(endpoint, params)?;
        let signature = request.signature();

        if !request.options.nocache {
            let cached = self
                .db
                .get_cached_result(&signature)
                .await
                .map_err(Error::Cache)?;
            if let Some(payload) = cached {
                debug!("result cache hit for {}", signature);
                return Ok(WeatherResponse::from_rows(serde_json::from_str(&payload)?));
            }
            debug!("result cache miss for {}", signature);
        }

        let context = self.resolve(request, OffsetDateTime::now_utc()).await?;
        let per_target = try_join_all(
            context
                .targets
                .iter()
                .map(|target| self.fetch_target(&context, target)),
        )
        .await?;
        let rows: Vec<ResultRow> = per_target.into_iter().flatten().collect();
        let lines = shape(&context, rows)?;
        let rows = arrange(&context.request, lines);

        if !rows.is_empty() && self.should_save(&context) {
            self.db.save_result(signature, serde_json::to_string(&rows)?);
        }
        Ok(WeatherResponse::from_rows(rows))
    }

    pub async fn health(&self) -> Result<(), Error> {
        self.grid.health().await?;
        self.db.health_check().await.map_err(Error::Cache)?;
        Ok(())
    }

    /// Drain queued state writes and checkpoint the WAL.
    pub async fn shutdown(&self) {
        if let Err(e) = self.db.flush().await {
            warn!("pending state writes lost on shutdown: {}", e);
        }
        self.db.checkpoint().await;
    }

    /// Results for windows the feeds may still fill in are never stored.
    /// Averages are anchored to today, so they are not stored either.
    fn should_save(&self, context: &QueryContext) -> bool {
        let request = &context.request;
        !request.options.nosave
            && request.endpoint != Endpoint::Averages
            && context
                .targets
                .iter()
                .all(|target| target.window().end <= context.now - self.radar_lag)
    }

    async fn resolve(&self, request: QueryRequest, now: OffsetDateTime) -> Result<QueryContext, Error> {
        let (points, viewport) = match &request.locator {
            Locator::Points(points) => (points.clone(), None),
            Locator::Place(place) => {
                let place = self.locations.resolve_place(place).await?;
                let domain = Family::domain();
                if !domain.contains(&place.coordinate) {
                    return Err(request::Error::from(grid::Error::OutsideDomain(
                        place.coordinate,
                        domain,
                    ))
                    .into());
                }
                (vec![place.coordinate], place.viewport)
            }
        };

        let targets = if request.options.rect {
            let bbox = viewport
                .or_else(|| BoundingBox::around(&points))
                .ok_or(request::Error::MissingLocation)?;
            // reject oversized rectangles before any lookup
            bbox.cells(Family::Model).map_err(request::Error::from)?;
            let offset = self
                .offset(&request, GridCell::snap(Family::Model, bbox.center()))
                .await?;
            vec![Target::Rectangle {
                bbox,
                offset,
                window: request.window(offset, now)?,
            }]
        } else {
            try_join_all(points.iter().map(|coordinate| {
                let request = &request;
                async move {
                    let offset = self
                        .offset(request, GridCell::snap(Family::Model, *coordinate))
                        .await?;
                    Ok::<_, Error>(Target::Point {
                        coordinate: *coordinate,
                        offset,
                        window: request.window(offset, now)?,
                    })
                }
            }))
            .await?
        };

        Ok(QueryContext {
            request,
            targets,
            now,
        })
    }

    async fn offset(&self, request: &QueryRequest, cell: GridCell) -> Result<UtcOffset, Error> {
        if request.options.utc {
            return Ok(UtcOffset::UTC);
        }
        Ok(self.locations.offset_for(cell).await?)
    }

    async fn fetch_target(
        &self,
        context: &QueryContext,
        target: &Target,
    ) -> Result<Vec<ResultRow>, Error> {
        let request = &context.request;
        let window = target.window();
        let offset = target.offset();
        let attributes = request.fetched_attributes();
        let (model_cells, radar_cells, to_tiles, label) = match target {
            Target::Point { coordinate, .. } => (
                vec![GridCell::snap(Family::Model, *coordinate)],
                vec![GridCell::snap(Family::Radar, *coordinate)],
                false,
                Some(*coordinate),
            ),
            Target::Rectangle { bbox, .. } => {
                let tiles = bbox.cells(Family::Model).map_err(request::Error::from)?;
                (tiles.clone(), tiles, true, None)
            }
        };
        let with_radar = uses_radar(request.options.radar, &attributes, window);
        // after reconciliation the filter has to see the merged values
        let pushdown = if with_radar {
            None
        } else {
            request.filter.clone()
        };

        let prediction = request.options.prediction;
        let live_max = if needs_live_extent(prediction) {
            self.grid.live_extent(Family::Model, &model_cells).await?
        } else {
            None
        };

        let series = |source: SeriesSource, segment: Window| SeriesRequest {
            source,
            cells: model_cells.clone(),
            aggregate_to_tiles: false,
            start: segment.start,
            end: segment.end,
            offset,
            label,
            attributes: attributes.clone(),
            filter: pushdown.clone(),
        };

        let mut model = Vec::new();
        let mut radar = Vec::new();
        for segment in plan_segments(prediction, window, live_max, context.now) {
            match segment {
                Segment::Live(part) => {
                    model.extend(
                        self.grid
                            .series(&series(SeriesSource::Live(Family::Model), part))
                            .await?,
                    );
                    if with_radar {
                        let radar_request = SeriesRequest {
                            source: SeriesSource::Live(Family::Radar),
                            cells: radar_cells.clone(),
                            aggregate_to_tiles: to_tiles,
                            attributes: vec![Attribute::Precipitation],
                            filter: None,
                            ..series(SeriesSource::Live(Family::Radar), part)
                        };
                        radar.extend(self.grid.series(&radar_request).await?);
                    }
                }
                Segment::Climatology(part) => {
                    model.extend(
                        self.grid
                            .series(&series(SeriesSource::Climatology, part))
                            .await?,
                    );
                }
            }
        }

        if !with_radar {
            return Ok(model);
        }

        model.sort_by_key(|row| row.key());
        radar.sort_by_key(|row| row.key());
        let missing = self
            .db
            .missing_radar_hours(window.start, window.end)
            .await
            .map_err(Error::Cache)?;
        let merged = reconcile(model, radar, &missing);
        if !merged.overrides.is_empty() {
            info!(
                "{} flagged radar hours fell back to model precipitation",
                merged.overrides.len()
            );
        }
        let mut rows = merged.rows;
        extrapolate(&mut rows, &attributes, window.end, context.now, self.radar_lag);
        if let Some(filter) = &request.filter {
            rows.retain(|row| filter.matches(row));
        }
        Ok(rows)
    }
}

/// Radar is consulted for precipitation unless excluded, and by default only
/// when the window reaches into radar coverage.
fn uses_radar(preference: RadarPreference, attributes: &[Attribute], window: Window) -> bool {
    if !attributes.contains(&Attribute::Precipitation) {
        return false;
    }
    match preference {
        RadarPreference::Exclude => false,
        RadarPreference::Include => true,
        RadarPreference::Auto => {
            window.end >= Family::Radar.coverage_start().midnight().assume_utc()
        }
    }
}

/// A rendered row plus what it sorts by.
#[derive(Clone, Debug, PartialEq)]
struct Line {
    when: (i64, BucketKey),
    coordinate: Coordinate,
    fields: Map<String, Value>,
}

fn number(value: Option<f64>) -> Value {
    value
        .and_then(Number::from_f64)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

fn shape(context: &QueryContext, rows: Vec<ResultRow>) -> Result<Vec<Line>, Error> {
    let request = &context.request;
    let labels = context.labels_coordinates();
    let units = request.options.units;

    match &request.shape {
        Shape::Raw => rows
            .iter()
            .map(|row| {
                let mut fields = Map::new();
                fields.insert("date".into(), Value::String(row.timestamp.format(&Rfc3339)?));
                if labels {
                    fields.insert("lat".into(), number(Some(row.coordinate.lat)));
                    fields.insert("lon".into(), number(Some(row.coordinate.lon)));
                }
                for attribute in &request.attributes {
                    fields.insert(attribute.name().into(), number(row.value(*attribute)));
                    if units {
                        fields.insert(
                            format!("{}_unit", attribute.name()),
                            Value::String(attribute.unit().into()),
                        );
                    }
                }
                if let Some(source) = row.source {
                    fields.insert("precipitation_source".into(), serde_json::to_value(source)?);
                }
                fields.insert("predicted".into(), Value::Bool(row.predicted));
                Ok::<_, Error>(Line {
                    when: (row.timestamp.unix_timestamp(), BucketKey::default()),
                    coordinate: row.coordinate,
                    fields,
                })
            })
            .collect(),
        Shape::Bucketed { keys, gdd, stats } => {
            let buckets = if stats.is_empty() {
                aggregate::bucket(&rows, &request.attributes, keys, *gdd)
            } else {
                aggregate::statistics(&rows, &request.attributes, keys, *gdd, stats)
            };
            buckets
                .into_iter()
                .map(|bucket| {
                    render_bucket(bucket, labels, units && stats.is_empty(), &request.attributes)
                })
                .collect()
        }
    }
}

fn render_bucket(
    bucket: Bucket,
    labels: bool,
    units: bool,
    attributes: &[Attribute],
) -> Result<Line, Error> {
    let mut fields = Map::new();
    let key = bucket.key;
    if let Some(date) = key.date {
        fields.insert(
            "date".into(),
            Value::String(date.format(format_description!("[year]-[month]-[day]"))?),
        );
    }
    if let Some(year) = key.year {
        fields.insert("year".into(), Value::from(year));
    }
    if let Some(growyear) = key.growyear {
        fields.insert("growyear".into(), Value::from(growyear));
    }
    if let Some(month) = key.month {
        fields.insert("month".into(), Value::from(month));
    }
    if let Some(doy) = key.doy {
        fields.insert("doy".into(), Value::from(doy));
    }
    if labels {
        fields.insert("lat".into(), number(Some(bucket.coordinate.lat)));
        fields.insert("lon".into(), number(Some(bucket.coordinate.lon)));
    }
    for (column, value) in bucket.values {
        fields.insert(column, number(value));
    }
    if units {
        for attribute in attributes {
            fields.insert(
                format!("{}_unit", attribute.name()),
                Value::String(attribute.unit().into()),
            );
        }
    }
    Ok(Line {
        when: (0, key),
        coordinate: bucket.coordinate,
        fields,
    })
}

fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(Value::Number(a)), Some(Value::Number(b))) => a
            .as_f64()
            .partial_cmp(&b.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(Value::String(a)), Some(Value::String(b))) => a.cmp(b),
        (Some(Value::Null) | None, Some(Value::Null) | None) => Ordering::Equal,
        // nulls last
        (Some(Value::Null) | None, _) => Ordering::Greater,
        (_, Some(Value::Null) | None) => Ordering::Less,
        _ => Ordering::Equal,
    }
}

/// Order, collapse repeated rows, then paginate.
fn arrange(request: &QueryRequest, mut lines: Vec<Line>) -> Vec<Map<String, Value>> {
    let default_order = |a: &Line, b: &Line| {
        a.when
            .cmp(&b.when)
            .then_with(|| a.coordinate.sort_key().cmp(&b.coordinate.sort_key()))
    };
    lines.sort_by(|a, b| {
        for key in &request.order {
            let ordering = match key.column.as_str() {
                "date" => a.when.cmp(&b.when),
                "lat" => a.coordinate.sort_key().0.cmp(&b.coordinate.sort_key().0),
                "lon" => a.coordinate.sort_key().1.cmp(&b.coordinate.sort_key().1),
                column => compare_values(a.fields.get(column), b.fields.get(column)),
            };
            let ordering = if key.descending {
                ordering.reverse()
            } else {
                ordering
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        default_order(a, b)
    });
    lines.dedup_by(|next, kept| next.fields == kept.fields);

    let rows = lines.into_iter().map(|line| line.fields).skip(request.offset);
    match request.limit {
        Some(limit) => rows.take(limit).collect(),
        None => rows.collect(),
    }
}
