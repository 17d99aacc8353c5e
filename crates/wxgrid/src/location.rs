use async_trait::async_trait;
use log::{debug, warn};
use reqwest::Client;
use serde::Deserialize;
use std::{sync::Arc, time::Duration};
use time::{OffsetDateTime, UtcOffset};

use crate::{AddressRecord, BoundingBox, Coordinate, Database, GridCell};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("location service returned {0}")]
    Service(String),
    #[error("location service unreachable: {0}")]
    Request(#[from] reqwest::Error),
    #[error("no location found for `{0}`")]
    NotFound(String),
    #[error("location cache failed: {0}")]
    Cache(anyhow::Error),
}

/// Case-folded place text with punctuation dropped and runs of whitespace
/// collapsed to one space.
pub fn normalize_place(raw: &str) -> String {
    raw.chars()
        .map(|c| {
            if c.is_alphanumeric() {
                c.to_lowercase().next().unwrap_or(c)
            } else {
                ' '
            }
        })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PlaceQuery {
    PostalCode(String),
    Name(String),
}

impl PlaceQuery {
    pub fn parse(raw: &str) -> Self {
        Self::from_normalized(&normalize_place(raw))
    }

    /// Expects text already passed through [`normalize_place`].
    pub fn from_normalized(name: &str) -> Self {
        let first = name.split(' ').next().unwrap_or_default();
        if !first.is_empty() && name.chars().all(|c| c.is_ascii_digit() || c == ' ') {
            PlaceQuery::PostalCode(first.to_string())
        } else {
            PlaceQuery::Name(name.to_string())
        }
    }

    /// Address cache key. Every spelling of a postal code shares one entry.
    pub fn key(&self) -> &str {
        match self {
            PlaceQuery::PostalCode(code) => code,
            PlaceQuery::Name(name) => name,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Place {
    pub coordinate: Coordinate,
    pub viewport: Option<BoundingBox>,
}

#[async_trait]
pub trait Geocoder: Send + Sync {
    async fn geocode(&self, query: &PlaceQuery) -> Result<Option<Place>, Error>;
    /// Standard (non-DST) offset in seconds, `None` where no zone applies.
    async fn utc_offset(&self, coordinate: Coordinate) -> Result<Option<i32>, Error>;
}

/// Google Maps geocoding and time zone APIs.
pub struct GoogleMapsClient {
    client: Client,
    base_url: String,
    api_key: String,
}

#[derive(Deserialize)]
struct GeocodeResponse {
    status: String,
    #[serde(default)]
    results: Vec<GeocodeResult>,
}

#[derive(Deserialize)]
struct GeocodeResult {
    geometry: Geometry,
}

#[derive(Deserialize)]
struct Geometry {
    location: LatLng,
    viewport: Option<Viewport>,
}

#[derive(Deserialize, Clone, Copy)]
struct LatLng {
    lat: f64,
    lng: f64,
}

#[derive(Deserialize)]
struct Viewport {
    northeast: LatLng,
    southwest: LatLng,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TimeZoneResponse {
    status: String,
    raw_offset: Option<f64>,
}

impl GoogleMapsClient {
    pub fn new(base_url: String, api_key: String, user_agent: &str) -> Result<Self, Error> {
        let client = Client::builder()
            .user_agent(user_agent)
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }
}

#[async_trait]
impl Geocoder for GoogleMapsClient {
    async fn geocode(&self, query: &PlaceQuery) -> Result<Option<Place>, Error> {
        let url = format!("{}/geocode/json", self.base_url);
        let mut params = vec![("key", self.api_key.clone())];
        match query {
            PlaceQuery::PostalCode(code) => {
                params.push(("components", format!("postal_code:{}|country:US", code)))
            }
            PlaceQuery::Name(name) => params.push(("address", name.clone())),
        }
        debug!("geocoding {:?}", query);
        let response: GeocodeResponse = self
            .client
            .get(url)
            .query(&params)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        match response.status.as_str() {
            "OK" => {}
            "ZERO_RESULTS" => return Ok(None),
            other => return Err(Error::Service(other.to_string())),
        }
        let Some(result) = response.results.into_iter().next() else {
            return Ok(None);
        };
        let location = result.geometry.location;
        let coordinate = Coordinate::new(location.lat, location.lng)
            .map_err(|e| Error::Service(e.to_string()))?;
        let viewport = result.geometry.viewport.map(|v| BoundingBox {
            south: v.southwest.lat,
            north: v.northeast.lat,
            west: v.southwest.lng,
            east: v.northeast.lng,
        });
        Ok(Some(Place {
            coordinate,
            viewport,
        }))
    }

    async fn utc_offset(&self, coordinate: Coordinate) -> Result<Option<i32>, Error> {
        let url = format!("{}/timezone/json", self.base_url);
        let timestamp = OffsetDateTime::now_utc().unix_timestamp();
        debug!("looking up time zone at {}", coordinate);
        let response: TimeZoneResponse = self
            .client
            .get(url)
            .query(&[
                ("location", format!("{},{}", coordinate.lat, coordinate.lon)),
                ("timestamp", timestamp.to_string()),
                ("key", self.api_key.clone()),
            ])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        match response.status.as_str() {
            "OK" => Ok(response.raw_offset.map(|seconds| seconds as i32)),
            "ZERO_RESULTS" => Ok(None),
            other => Err(Error::Service(other.to_string())),
        }
    }
}

/// Cache-first place and offset lookups.
pub struct LocationResolver {
    db: Arc<Database>,
    geocoder: Arc<dyn Geocoder>,
}

impl LocationResolver {
    pub fn new(db: Arc<Database>, geocoder: Arc<dyn Geocoder>) -> Self {
        Self { db, geocoder }
    }

    pub async fn resolve_place(&self, raw: &str) -> Result<Place, Error> {
        let query = PlaceQuery::parse(raw);
        let key = query.key();
        if let Some(record) = self.db.get_address(key).await.map_err(Error::Cache)? {
            debug!("address cache hit for `{}`", key);
            return Ok(Place {
                coordinate: record.coordinate,
                viewport: record.viewport,
            });
        }

        let place = self
            .geocoder
            .geocode(&query)
            .await?
            .ok_or_else(|| Error::NotFound(raw.trim().to_string()))?;
        self.db.save_address(AddressRecord {
            name: key.to_string(),
            coordinate: place.coordinate,
            viewport: place.viewport,
        });
        Ok(place)
    }

    /// Offset for a model cell. Places with no zone get UTC and are cached
    /// as such; a failing service also yields UTC but nothing is stored.
    pub async fn offset_for(&self, cell: GridCell) -> Result<UtcOffset, Error> {
        let cell_id = cell.id();
        let seconds = match self.db.get_timezone(cell_id).await.map_err(Error::Cache)? {
            Some(seconds) => seconds,
            None => match self.geocoder.utc_offset(cell.center()).await {
                Ok(found) => {
                    let seconds = found.unwrap_or(0);
                    self.db.save_timezone(cell_id, seconds);
                    seconds
                }
                Err(e) => {
                    warn!("time zone lookup for cell {} failed, using UTC: {}", cell, e);
                    0
                }
            },
        };
        Ok(UtcOffset::from_whole_seconds(seconds).unwrap_or_else(|e| {
            warn!("offset {}s for cell {} out of range: {}", seconds, cell, e);
            UtcOffset::UTC
        }))
    }
}
