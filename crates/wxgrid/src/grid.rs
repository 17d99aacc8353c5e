use serde::{Deserialize, Serialize};
use std::fmt;
use time::{Date, Month};
use utoipa::ToSchema;

/// Keeps a coordinate that sits on a cell edge (within float noise) in the cell above it.
const BOUNDARY_NUDGE: f64 = 1e-9;

/// Multiplier used to fold a (lat, lon) index pair into one integer cell id.
/// Longitude indices stay well inside +/-50_000 for both grids.
pub const CELL_ID_STRIDE: i64 = 100_000;

/// Upper bound on the number of cells a rectangle query may enumerate.
pub const MAX_RECTANGLE_CELLS: usize = 40_000;

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum Error {
    #[error("latitude {0} is outside [-90, 90]")]
    Latitude(f64),
    #[error("longitude {0} is outside [-180, 180]")]
    Longitude(f64),
    #[error("coordinate {0} is outside any known shard (grid domain {1})")]
    OutsideDomain(Coordinate, BoundingBox),
    #[error("rectangle spans {0} cells, more than the {1} allowed")]
    RectangleTooLarge(usize, usize),
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Coordinate {
    pub lat: f64,
    pub lon: f64,
}

impl Coordinate {
    pub fn new(lat: f64, lon: f64) -> Result<Self, Error> {
        if !(-90.0..=90.0).contains(&lat) {
            return Err(Error::Latitude(lat));
        }
        if !(-180.0..=180.0).contains(&lon) {
            return Err(Error::Longitude(lon));
        }
        Ok(Self { lat, lon })
    }

    /// Total ordering used when rows are merged or sorted by position.
    pub fn sort_key(&self) -> (i64, i64) {
        (
            (self.lat * 1_000_000.0).round() as i64,
            (self.lon * 1_000_000.0).round() as i64,
        )
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.6},{:.6}", self.lat, self.lon)
    }
}

/// The two gridded data families. Each has its own quantization step,
/// coverage floor and shard directory.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Family {
    /// Hourly land-surface model forcing on the coarse grid.
    Model,
    /// Radar/gauge precipitation estimate on the fine grid.
    Radar,
}

impl Family {
    pub fn step(&self) -> f64 {
        match self {
            Family::Model => 0.125,
            Family::Radar => 0.01,
        }
    }

    /// First calendar year with rows in this family.
    pub fn coverage_floor(&self) -> i32 {
        match self {
            Family::Model => 2005,
            Family::Radar => 2015,
        }
    }

    pub fn coverage_start(&self) -> Date {
        Date::from_calendar_date(self.coverage_floor(), Month::January, 1)
            .unwrap_or(Date::MIN)
    }

    pub fn dir_name(&self) -> &'static str {
        match self {
            Family::Model => "model",
            Family::Radar => "radar",
        }
    }

    /// Region covered by the gridded datasets. Coordinates outside it can never
    /// resolve to a shard.
    pub fn domain() -> BoundingBox {
        BoundingBox {
            south: 25.0,
            north: 53.0,
            west: -125.0,
            east: -67.0,
        }
    }
}

impl fmt::Display for Family {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.dir_name())
    }
}

/// A coordinate snapped onto one of the grids. Latitude indices grow to the
/// north; longitude indices are taken from the negated longitude so they grow
/// to the west, matching the shard naming convention.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GridCell {
    pub family: Family,
    pub lat_index: i32,
    pub lon_index: i32,
}

impl GridCell {
    pub fn snap(family: Family, coordinate: Coordinate) -> Self {
        Self {
            family,
            lat_index: lat_index(family, coordinate.lat),
            lon_index: lon_index(family, coordinate.lon),
        }
    }

    pub fn center(&self) -> Coordinate {
        let step = self.family.step();
        Coordinate {
            lat: (self.lat_index as f64 + 0.5) * step,
            lon: -((self.lon_index as f64 + 0.5) * step),
        }
    }

    /// Model-grid cell that contains this cell. Shards are partitioned by tile.
    pub fn tile(&self) -> GridCell {
        match self.family {
            Family::Model => *self,
            Family::Radar => GridCell::snap(Family::Model, self.center()),
        }
    }

    pub fn id(&self) -> i64 {
        self.lat_index as i64 * CELL_ID_STRIDE + self.lon_index as i64
    }
}

impl fmt::Display for GridCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.lat_index, self.lon_index)
    }
}

fn lat_index(family: Family, lat: f64) -> i32 {
    (lat / family.step() + BOUNDARY_NUDGE).floor() as i32
}

fn lon_index(family: Family, lon: f64) -> i32 {
    (-lon / family.step() + BOUNDARY_NUDGE).floor() as i32
}

/// Snap a coordinate to the center of its grid cell.
pub fn snap(family: Family, coordinate: Coordinate) -> Coordinate {
    GridCell::snap(family, coordinate).center()
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct BoundingBox {
    pub south: f64,
    pub north: f64,
    pub west: f64,
    pub east: f64,
}

impl BoundingBox {
    pub fn around(points: &[Coordinate]) -> Option<Self> {
        let first = points.first()?;
        let mut bbox = BoundingBox {
            south: first.lat,
            north: first.lat,
            west: first.lon,
            east: first.lon,
        };
        for point in points.iter().skip(1) {
            bbox.south = bbox.south.min(point.lat);
            bbox.north = bbox.north.max(point.lat);
            bbox.west = bbox.west.min(point.lon);
            bbox.east = bbox.east.max(point.lon);
        }
        Some(bbox)
    }

    pub fn contains(&self, coordinate: &Coordinate) -> bool {
        (self.south..=self.north).contains(&coordinate.lat)
            && (self.west..=self.east).contains(&coordinate.lon)
    }

    pub fn center(&self) -> Coordinate {
        Coordinate {
            lat: (self.south + self.north) / 2.0,
            lon: (self.west + self.east) / 2.0,
        }
    }

    /// Every cell of `family` touched by the rectangle, walked at the grid step.
    pub fn cells(&self, family: Family) -> Result<Vec<GridCell>, Error> {
        let south = lat_index(family, self.south);
        let north = lat_index(family, self.north);
        // west is the larger longitude index
        let east = lon_index(family, self.east);
        let west = lon_index(family, self.west);

        let count = (north - south + 1) as usize * (west - east + 1) as usize;
        if count > MAX_RECTANGLE_CELLS {
            return Err(Error::RectangleTooLarge(count, MAX_RECTANGLE_CELLS));
        }

        let mut cells = Vec::with_capacity(count);
        for lat_index in south..=north {
            for lon_index in east..=west {
                cells.push(GridCell {
                    family,
                    lat_index,
                    lon_index,
                });
            }
        }
        Ok(cells)
    }
}

impl fmt::Display for BoundingBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}..{}, {}..{}]",
            self.south, self.north, self.west, self.east
        )
    }
}
