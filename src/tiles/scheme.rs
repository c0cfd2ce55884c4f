//! Quadtree tile addressing over the projected plane.
//!
//! At zoom `z` the planet bounds are split into `2^z × 2^z` equal tiles.
//! Column 0 is the western edge, row 0 the northern edge.

use crate::core::geo::{ProjectedPoint, ProjectedRect, ProjectedSize, TileCoord};
use crate::core::projection::Projection;
use crate::constants::MAX_ADDRESSABLE_ZOOM;
use crate::{MapError, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Fraction of a tile a rectangle may poke into a neighbour before that
/// neighbour counts as covered. Absorbs rounding on exact tile edges.
const EDGE_EPSILON: f64 = 1e-9;

/// A rectangle of tiles at one zoom level.
///
/// `origin` is the north-west tile. When the projection wraps, the rectangle
/// may run past the eastern edge and continue at column 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TileRect {
    pub origin: TileCoord,
    pub count_x: u32,
    pub count_y: u32,
}

impl TileRect {
    pub fn new(origin: TileCoord, count_x: u32, count_y: u32) -> Self {
        Self {
            origin,
            count_x,
            count_y,
        }
    }

    pub fn zoom(&self) -> u8 {
        self.origin.z
    }

    pub fn is_empty(&self) -> bool {
        self.count_x == 0 || self.count_y == 0
    }

    /// Number of tiles in the rectangle
    pub fn len(&self) -> usize {
        self.count_x as usize * self.count_y as usize
    }

    /// Iterates over the tiles, row by row, with columns wrapped into range.
    pub fn iter(&self) -> impl Iterator<Item = TileCoord> + '_ {
        self.slots().map(|(coord, _)| coord)
    }

    /// Like [`TileRect::iter`], also yielding the unwrapped column index so a
    /// caller can place wrapped tiles east of the antimeridian.
    pub fn slots(&self) -> impl Iterator<Item = (TileCoord, u64)> + '_ {
        let n = TileCoord::tiles_per_axis(self.zoom());
        let origin = self.origin;
        (0..self.count_y).flat_map(move |dy| {
            (0..self.count_x).map(move |dx| {
                let column = origin.x as u64 + dx as u64;
                (
                    TileCoord::new((column % n) as u32, origin.y + dy, origin.z),
                    column,
                )
            })
        })
    }

    /// Whether `coord` is one of the rectangle's tiles (same zoom only)
    pub fn contains(&self, coord: &TileCoord) -> bool {
        if coord.z != self.zoom() || self.is_empty() {
            return false;
        }
        let n = TileCoord::tiles_per_axis(coord.z);
        let dx = (coord.x as u64 + n - self.origin.x as u64 % n) % n;
        let in_rows = coord.y >= self.origin.y && coord.y - self.origin.y < self.count_y;
        in_rows && dx < self.count_x as u64
    }

    /// Whether the ground covered by `coord`, at any zoom, intersects the
    /// ground covered by the rectangle.
    pub fn overlaps(&self, coord: &TileCoord) -> bool {
        if self.is_empty() {
            return false;
        }
        let z = self.zoom();
        if coord.z >= z {
            return coord
                .ancestor_at(z)
                .map(|ancestor| self.contains(&ancestor))
                .unwrap_or(false);
        }

        // Coarser tile: compare its footprint, expressed in this zoom's
        // columns and rows, against the rectangle.
        let shift = z - coord.z;
        let block = 1u64 << shift;
        let (bx, by) = ((coord.x as u64) << shift, (coord.y as u64) << shift);

        let (oy, cy) = (self.origin.y as u64, self.count_y as u64);
        let rows_hit = by < oy + cy && oy < by + block;
        if !rows_hit {
            return false;
        }

        let n = TileCoord::tiles_per_axis(z);
        let (ox, cx) = (self.origin.x as u64, self.count_x as u64);
        let end = ox + cx;
        let hits = |start: u64, stop: u64| bx < stop && start < bx + block;
        if end <= n {
            hits(ox, end)
        } else {
            hits(ox, n) || hits(0, end - n)
        }
    }
}

/// Maps projected rectangles to quadtree tiles and back for one projection
/// and one tile source zoom range.
#[derive(Debug, Clone)]
pub struct TileScheme {
    projection: Arc<Projection>,
    min_zoom: u8,
    max_zoom: u8,
    tile_size: u32,
}

impl TileScheme {
    pub fn new(
        projection: Arc<Projection>,
        min_zoom: u8,
        max_zoom: u8,
        tile_size: u32,
    ) -> Result<Self> {
        if max_zoom > MAX_ADDRESSABLE_ZOOM || min_zoom > max_zoom {
            return Err(MapError::ZoomOutOfRange {
                zoom: max_zoom.max(min_zoom),
                min: 0,
                max: MAX_ADDRESSABLE_ZOOM,
            });
        }
        if tile_size == 0 {
            return Err(MapError::InvalidCoordinates("tile size must be positive".to_string()));
        }
        Ok(Self {
            projection,
            min_zoom,
            max_zoom,
            tile_size,
        })
    }

    pub fn projection(&self) -> &Arc<Projection> {
        &self.projection
    }

    pub fn min_zoom(&self) -> u8 {
        self.min_zoom
    }

    pub fn max_zoom(&self) -> u8 {
        self.max_zoom
    }

    pub fn tile_size(&self) -> u32 {
        self.tile_size
    }

    /// Fails with [`MapError::ZoomOutOfRange`] outside the source's zoom range.
    /// Callers clamp before addressing; this never clamps.
    pub fn check_zoom(&self, zoom: u8) -> Result<()> {
        if zoom < self.min_zoom || zoom > self.max_zoom {
            return Err(MapError::ZoomOutOfRange {
                zoom,
                min: self.min_zoom,
                max: self.max_zoom,
            });
        }
        Ok(())
    }

    /// Projected size of one tile at `zoom`
    pub fn tile_extent(&self, zoom: u8) -> ProjectedSize {
        let planet = self.projection.planet_bounds();
        let n = TileCoord::tiles_per_axis(zoom) as f64;
        ProjectedSize::new(planet.size.width / n, planet.size.height / n)
    }

    /// Projected units per pixel when tiles of `zoom` are drawn at their
    /// native size
    pub fn meters_per_pixel_at(&self, zoom: u8) -> f64 {
        self.tile_extent(zoom).width / self.tile_size as f64
    }

    /// The continuous zoom level at which one pixel spans `meters_per_pixel`
    pub fn zoom_for_scale(&self, meters_per_pixel: f64) -> f64 {
        let planet_width = self.projection.planet_bounds().size.width;
        (planet_width / (self.tile_size as f64 * meters_per_pixel)).log2()
    }

    /// The smallest rectangle of tiles at `zoom` covering `rect`.
    ///
    /// Tile indices are clamped to the valid range, except horizontally when
    /// the projection wraps: then columns wrap modulo `2^zoom`.
    pub fn tile_rect_covering(&self, rect: &ProjectedRect, zoom: u8) -> Result<TileRect> {
        self.check_zoom(zoom)?;

        let planet = self.projection.planet_bounds();
        let extent = self.tile_extent(zoom);
        let n = TileCoord::tiles_per_axis(zoom) as i64;

        // Offsets beyond a couple of planets clamp to the same tiles; bounding
        // them keeps the integer arithmetic below far from overflow.
        let bound = 2.0 * n as f64 + 1.0;
        let first = |offset: f64| (offset.clamp(-bound, bound) + EDGE_EPSILON).floor() as i64;
        let last = |offset: f64| (offset.clamp(-bound, bound) - EDGE_EPSILON).ceil() as i64 - 1;

        let min_row = first((planet.max_northing() - rect.max_northing()) / extent.height);
        let max_row =
            last((planet.max_northing() - rect.min_northing()) / extent.height).max(min_row);
        let (origin_y, count_y) = clamp_span(min_row, max_row, n);

        let west = (rect.min_easting() - planet.min_easting()) / extent.width;
        let east = (rect.max_easting() - planet.min_easting()) / extent.width;
        let (origin_x, count_x) = if self.projection.wraps_horizontally() {
            let span = east - west;
            if span >= n as f64 {
                (0, n)
            } else {
                // Bring the west edge onto the first planet copy, then the
                // east edge lies less than one planet further on
                let west = west.rem_euclid(n as f64);
                let min_col = first(west);
                let max_col = last(west + span).max(min_col);
                (min_col.rem_euclid(n), (max_col - min_col + 1).min(n))
            }
        } else {
            let min_col = first(west);
            let max_col = last(east).max(min_col);
            clamp_span(min_col, max_col, n)
        };

        Ok(TileRect::new(
            TileCoord::new(origin_x as u32, origin_y as u32, zoom),
            count_x as u32,
            count_y as u32,
        ))
    }

    /// The projected area covered by `coord`. Tiles at one zoom tile the
    /// plane exactly.
    pub fn projected_rect_for_tile(&self, coord: &TileCoord) -> Result<ProjectedRect> {
        self.check_zoom(coord.z)?;
        if !coord.is_valid() {
            return Err(MapError::InvalidCoordinates(format!("tile {} out of range", coord)));
        }
        Ok(self.projected_rect_for_column(coord.x as u64, coord.y, coord.z))
    }

    /// Like [`TileScheme::projected_rect_for_tile`], but when the projection
    /// wraps the result is shifted by whole planet widths to the copy closest
    /// to `reference_easting`.
    pub fn projected_rect_for_tile_near(
        &self,
        coord: &TileCoord,
        reference_easting: f64,
    ) -> Result<ProjectedRect> {
        let rect = self.projected_rect_for_tile(coord)?;
        if !self.projection.wraps_horizontally() {
            return Ok(rect);
        }
        let width = self.projection.planet_bounds().size.width;
        let turns = ((reference_easting - rect.center().easting) / width).round();
        Ok(rect.shifted_east(turns * width))
    }

    fn projected_rect_for_column(&self, column: u64, row: u32, zoom: u8) -> ProjectedRect {
        let planet = self.projection.planet_bounds();
        let extent = self.tile_extent(zoom);
        ProjectedRect::new(
            ProjectedPoint::new(
                planet.min_easting() + column as f64 * extent.width,
                planet.max_northing() - (row as f64 + 1.0) * extent.height,
            ),
            extent,
        )
    }

    /// The tile at `zoom` containing `point`, after wrapping and clamping the
    /// point onto the planet.
    pub fn tile_for_projected_point(&self, point: ProjectedPoint, zoom: u8) -> Result<TileCoord> {
        self.check_zoom(zoom)?;
        let point = self.projection.constrain_to_bounds(point);
        let planet = self.projection.planet_bounds();
        let extent = self.tile_extent(zoom);
        let last = TileCoord::tiles_per_axis(zoom) as i64 - 1;

        let col = ((point.easting - planet.min_easting()) / extent.width).floor() as i64;
        let row = ((planet.max_northing() - point.northing) / extent.height).floor() as i64;
        Ok(TileCoord::new(col.clamp(0, last) as u32, row.clamp(0, last) as u32, zoom))
    }

    /// Brings an out-of-range column back into range when the projection
    /// wraps. Returns `None` for tiles that do not exist.
    pub fn normalise_tile(&self, x: i64, y: i64, zoom: u8) -> Option<TileCoord> {
        if zoom > MAX_ADDRESSABLE_ZOOM {
            return None;
        }
        let n = TileCoord::tiles_per_axis(zoom) as i64;
        if y < 0 || y >= n {
            return None;
        }
        let x = if self.projection.wraps_horizontally() {
            x.rem_euclid(n)
        } else if (0..n).contains(&x) {
            x
        } else {
            return None;
        };
        Some(TileCoord::new(x as u32, y as u32, zoom))
    }
}

/// Clamps the inclusive span `[min, max]` into `[0, n)`; returns origin and
/// count, with a zero count when the span misses the range entirely.
fn clamp_span(min: i64, max: i64, n: i64) -> (i64, i64) {
    if max < 0 || min >= n {
        return (min.clamp(0, n - 1), 0);
    }
    let lo = min.max(0);
    let hi = max.min(n - 1);
    (lo, hi - lo + 1)
}
