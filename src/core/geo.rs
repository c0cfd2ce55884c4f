use crate::constants::{MAX_ADDRESSABLE_ZOOM, MAX_MERCATOR_LATITUDE};
use serde::{Deserialize, Serialize};

/// Represents a geographical coordinate with latitude and longitude
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatLng {
    pub lat: f64,
    pub lng: f64,
}

impl LatLng {
    /// Creates a new LatLng coordinate
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    /// Validates that the coordinates are within valid ranges
    pub fn is_valid(&self) -> bool {
        self.lat >= -90.0 && self.lat <= 90.0 && self.lng >= -180.0 && self.lng <= 180.0
    }

    /// Wraps longitude to [-180, 180] range
    pub fn wrap_lng(lng: f64) -> f64 {
        let wrapped = lng % 360.0;
        if wrapped > 180.0 {
            wrapped - 360.0
        } else if wrapped < -180.0 {
            wrapped + 360.0
        } else {
            wrapped
        }
    }

    /// Clamps latitude to the range spherical mercator can represent
    pub fn clamp_lat(lat: f64) -> f64 {
        lat.clamp(-MAX_MERCATOR_LATITUDE, MAX_MERCATOR_LATITUDE)
    }
}

impl Default for LatLng {
    fn default() -> Self {
        Self::new(0.0, 0.0)
    }
}

/// Represents a point in screen (pixel) coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn add(&self, other: &Point) -> Point {
        Point::new(self.x + other.x, self.y + other.y)
    }
}

impl Default for Point {
    fn default() -> Self {
        Self::new(0.0, 0.0)
    }
}

/// A point on the projected plane, in projection units (usually meters).
///
/// Northing grows towards the north, unlike pixel `y`.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ProjectedPoint {
    pub easting: f64,
    pub northing: f64,
}

impl ProjectedPoint {
    pub fn new(easting: f64, northing: f64) -> Self {
        Self { easting, northing }
    }

    pub fn offset(&self, d_easting: f64, d_northing: f64) -> Self {
        Self::new(self.easting + d_easting, self.northing + d_northing)
    }
}

/// Extent on the projected plane. Both components are non-negative.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ProjectedSize {
    pub width: f64,
    pub height: f64,
}

impl ProjectedSize {
    pub fn new(width: f64, height: f64) -> Self {
        Self {
            width: width.max(0.0),
            height: height.max(0.0),
        }
    }
}

/// Axis-aligned rectangle on the projected plane; `origin` is the south-west
/// corner.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ProjectedRect {
    pub origin: ProjectedPoint,
    pub size: ProjectedSize,
}

impl ProjectedRect {
    pub fn new(origin: ProjectedPoint, size: ProjectedSize) -> Self {
        Self { origin, size }
    }

    pub fn from_coords(
        min_easting: f64,
        min_northing: f64,
        max_easting: f64,
        max_northing: f64,
    ) -> Self {
        Self::new(
            ProjectedPoint::new(min_easting, min_northing),
            ProjectedSize::new(max_easting - min_easting, max_northing - min_northing),
        )
    }

    pub fn min_easting(&self) -> f64 {
        self.origin.easting
    }

    pub fn max_easting(&self) -> f64 {
        self.origin.easting + self.size.width
    }

    pub fn min_northing(&self) -> f64 {
        self.origin.northing
    }

    pub fn max_northing(&self) -> f64 {
        self.origin.northing + self.size.height
    }

    pub fn center(&self) -> ProjectedPoint {
        ProjectedPoint::new(
            self.origin.easting + self.size.width / 2.0,
            self.origin.northing + self.size.height / 2.0,
        )
    }

    /// Whether `point` lies inside or on the edge of the rectangle
    pub fn contains_point(&self, point: &ProjectedPoint) -> bool {
        point.easting >= self.min_easting()
            && point.easting <= self.max_easting()
            && point.northing >= self.min_northing()
            && point.northing <= self.max_northing()
    }

    /// Whether `other` lies entirely inside this rectangle
    pub fn contains_rect(&self, other: &ProjectedRect) -> bool {
        other.min_easting() >= self.min_easting()
            && other.max_easting() <= self.max_easting()
            && other.min_northing() >= self.min_northing()
            && other.max_northing() <= self.max_northing()
    }

    /// Returns the rectangle grown by `margin` on every side
    pub fn expanded(&self, margin: f64) -> ProjectedRect {
        ProjectedRect::from_coords(
            self.min_easting() - margin,
            self.min_northing() - margin,
            self.max_easting() + margin,
            self.max_northing() + margin,
        )
    }

    /// Returns the rectangle shifted east by `d_easting`
    pub fn shifted_east(&self, d_easting: f64) -> ProjectedRect {
        ProjectedRect::new(self.origin.offset(d_easting, 0.0), self.size)
    }
}

/// Represents a bounding box of geographical coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatLngBounds {
    pub south_west: LatLng,
    pub north_east: LatLng,
}

impl LatLngBounds {
    pub fn new(south_west: LatLng, north_east: LatLng) -> Self {
        Self {
            south_west,
            north_east,
        }
    }

    /// Creates bounds from individual coordinates
    pub fn from_coords(south: f64, west: f64, north: f64, east: f64) -> Self {
        Self::new(LatLng::new(south, west), LatLng::new(north, east))
    }

    /// The whole globe
    pub fn world() -> Self {
        Self::from_coords(-90.0, -180.0, 90.0, 180.0)
    }

    /// Checks if the bounds contain a point
    pub fn contains(&self, point: &LatLng) -> bool {
        point.lat >= self.south_west.lat
            && point.lat <= self.north_east.lat
            && point.lng >= self.south_west.lng
            && point.lng <= self.north_east.lng
    }

    /// Gets the center point of the bounds
    pub fn center(&self) -> LatLng {
        LatLng::new(
            (self.south_west.lat + self.north_east.lat) / 2.0,
            (self.south_west.lng + self.north_east.lng) / 2.0,
        )
    }
}

/// Represents a tile coordinate in the quadtree tile system.
///
/// Row `y = 0` is the northernmost row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TileCoord {
    pub x: u32,
    pub y: u32,
    pub z: u8,
}

impl TileCoord {
    pub fn new(x: u32, y: u32, z: u8) -> Self {
        Self { x, y, z }
    }

    /// Number of tiles along one axis at zoom `z`
    pub fn tiles_per_axis(z: u8) -> u64 {
        1u64 << z.min(MAX_ADDRESSABLE_ZOOM)
    }

    /// Gets the parent tile at a lower zoom level
    pub fn parent(&self) -> Option<TileCoord> {
        if self.z == 0 {
            None
        } else {
            Some(TileCoord::new(self.x / 2, self.y / 2, self.z - 1))
        }
    }

    /// Gets the child tiles at the next zoom level
    pub fn children(&self) -> Vec<TileCoord> {
        if self.z >= MAX_ADDRESSABLE_ZOOM {
            Vec::new()
        } else {
            vec![
                TileCoord::new(self.x * 2, self.y * 2, self.z + 1),
                TileCoord::new(self.x * 2 + 1, self.y * 2, self.z + 1),
                TileCoord::new(self.x * 2, self.y * 2 + 1, self.z + 1),
                TileCoord::new(self.x * 2 + 1, self.y * 2 + 1, self.z + 1),
            ]
        }
    }

    /// The tile at zoom `z <= self.z` whose footprint contains this one
    pub fn ancestor_at(&self, z: u8) -> Option<TileCoord> {
        if z > self.z {
            return None;
        }
        let shift = self.z - z;
        Some(TileCoord::new(self.x >> shift, self.y >> shift, z))
    }

    /// Whether this tile's footprint fully contains `other`'s.
    /// A tile contains itself.
    pub fn contains(&self, other: &TileCoord) -> bool {
        other.ancestor_at(self.z) == Some(*self)
    }

    /// Whether the footprints of the two tiles intersect. In a quadtree two
    /// tiles either nest or are disjoint.
    pub fn overlaps(&self, other: &TileCoord) -> bool {
        self.contains(other) || other.contains(self)
    }

    /// Checks if the tile is valid for its zoom level
    pub fn is_valid(&self) -> bool {
        if self.z > MAX_ADDRESSABLE_ZOOM {
            return false;
        }
        let max_coord = Self::tiles_per_axis(self.z);
        (self.x as u64) < max_coord && (self.y as u64) < max_coord
    }
}

impl std::fmt::Display for TileCoord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.z, self.x, self.y)
    }
}
