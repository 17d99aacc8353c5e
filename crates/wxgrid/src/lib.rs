pub mod attributes;
pub mod db;
pub mod engine;
pub mod expression;
pub mod grid;
pub mod location;
pub mod planner;
pub mod request;
pub mod routes;
pub mod shards;
mod startup;
mod utils;

pub use attributes::{parse_attributes, Attribute, Kind, UnknownAttribute};
pub use db::{
    AddressRecord, Database, DatabaseWriter, GridAccess, GridData, PrecipitationSource,
    ResultRow, SeriesRequest, SeriesSource,
};
pub use engine::{Status, WeatherResponse, WeatherService};
pub use grid::{snap, BoundingBox, Coordinate, Family, GridCell, CELL_ID_STRIDE, MAX_RECTANGLE_CELLS};
pub use location::{normalize_place, Geocoder, GoogleMapsClient, LocationResolver, Place, PlaceQuery};
pub use planner::{plan_periods, ShardPeriod};
pub use request::{
    Endpoint, GddParams, GroupKey, Options, Prediction, QueryContext, QueryParams, QueryRequest,
    RadarPreference, Target, Window,
};
pub use routes::*;
pub use shards::{ShardKey, ShardRegistry};
pub use startup::*;
pub use utils::*;
