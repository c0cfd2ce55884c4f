use crate::core::geo::Point;
use serde::{Deserialize, Serialize};

/// Represents a bounding box in screen/pixel coordinates
///
/// Pixel space has its origin at the top-left of the view with `y` growing
/// downwards.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub min: Point,
    pub max: Point,
}

impl Bounds {
    /// Creates new bounds from two points
    pub fn new(min: Point, max: Point) -> Self {
        Self { min, max }
    }

    /// Creates bounds from individual coordinates
    pub fn from_coords(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self::new(Point::new(min_x, min_y), Point::new(max_x, max_y))
    }

    /// Gets the width of the bounds
    pub fn width(&self) -> f64 {
        self.max.x - self.min.x
    }

    /// Gets the height of the bounds
    pub fn height(&self) -> f64 {
        self.max.y - self.min.y
    }

    /// Gets the center point of the bounds
    pub fn center(&self) -> Point {
        Point::new(
            (self.min.x + self.max.x) / 2.0,
            (self.min.y + self.max.y) / 2.0,
        )
    }

    /// Checks if the bounds contain a point
    pub fn contains(&self, point: &Point) -> bool {
        point.x >= self.min.x
            && point.x <= self.max.x
            && point.y >= self.min.y
            && point.y <= self.max.y
    }

    /// Checks if the bounds fully contain another bounds
    pub fn contains_bounds(&self, other: &Bounds) -> bool {
        self.contains(&other.min) && self.contains(&other.max)
    }

    /// Checks if the bounds are valid (min <= max)
    pub fn is_valid(&self) -> bool {
        self.min.x <= self.max.x && self.min.y <= self.max.y
    }

    /// Whether the bounds cover no area
    pub fn is_empty(&self) -> bool {
        !self.is_valid() || self.width() == 0.0 || self.height() == 0.0
    }

    /// Returns a new bounds that extends this bounds with another bounds
    pub fn extend_with(&self, other: &Bounds) -> Bounds {
        if !self.is_valid() {
            return *other;
        }
        if !other.is_valid() {
            return *self;
        }

        Bounds::new(
            Point::new(self.min.x.min(other.min.x), self.min.y.min(other.min.y)),
            Point::new(self.max.x.max(other.max.x), self.max.y.max(other.max.y)),
        )
    }

    /// Returns the bounds shifted by `delta` pixels
    pub fn translated(&self, delta: Point) -> Bounds {
        Bounds::new(self.min.add(&delta), self.max.add(&delta))
    }

    /// Returns the bounds scaled by `factor` about `pivot`.
    ///
    /// A point sitting on `pivot` stays put; everything else moves away from
    /// (factor > 1) or towards (factor < 1) it.
    pub fn scaled_about(&self, factor: f64, pivot: Point) -> Bounds {
        let scale = |p: &Point| {
            Point::new(
                pivot.x + (p.x - pivot.x) * factor,
                pivot.y + (p.y - pivot.y) * factor,
            )
        };
        Bounds::new(scale(&self.min), scale(&self.max))
    }
}

impl Default for Bounds {
    fn default() -> Self {
        Self::new(Point::new(0.0, 0.0), Point::new(0.0, 0.0))
    }
}
