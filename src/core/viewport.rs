use crate::core::bounds::Bounds;
use crate::core::geo::{LatLng, LatLngBounds, Point, ProjectedPoint, ProjectedRect, ProjectedSize};
use crate::core::projection::Projection;
use crate::prelude::Arc;
use crate::{MapError, Result};
use serde::{Deserialize, Serialize};

/// Everything needed to map between the projected plane and the screen.
///
/// `origin` is the projected point under the bottom-left corner of
/// `view_bounds`. Screen y grows downwards.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ViewportState {
    pub origin: ProjectedPoint,
    pub meters_per_pixel: f64,
    pub view_bounds: Bounds,
}

/// Stateful projected <-> pixel mapping for the current view.
///
/// Only touched from the sequence driving the map; every mutation replaces
/// the whole [`ViewportState`] at once.
#[derive(Debug, Clone)]
pub struct ViewportProjection {
    projection: Arc<Projection>,
    state: ViewportState,
}

impl ViewportProjection {
    /// Creates a viewport showing `center` at `meters_per_pixel` in
    /// `view_bounds`.
    pub fn new(
        projection: Arc<Projection>,
        view_bounds: Bounds,
        center: ProjectedPoint,
        meters_per_pixel: f64,
    ) -> Result<Self> {
        check_scale(meters_per_pixel)?;
        check_view_bounds(&view_bounds)?;

        let mut viewport = Self {
            projection,
            state: ViewportState {
                origin: center,
                meters_per_pixel,
                view_bounds,
            },
        };
        viewport.set_projected_center(center);
        Ok(viewport)
    }

    pub fn projection(&self) -> &Arc<Projection> {
        &self.projection
    }

    pub fn state(&self) -> ViewportState {
        self.state
    }

    pub fn origin(&self) -> ProjectedPoint {
        self.state.origin
    }

    pub fn meters_per_pixel(&self) -> f64 {
        self.state.meters_per_pixel
    }

    pub fn view_bounds(&self) -> Bounds {
        self.state.view_bounds
    }

    /// Resizes the view, keeping the projected center where it was.
    /// Inverted or empty bounds are rejected and leave the view unchanged.
    pub fn set_view_bounds(&mut self, view_bounds: Bounds) -> Result<()> {
        check_view_bounds(&view_bounds)?;
        let center = self.projected_center();
        self.state.view_bounds = view_bounds;
        self.set_projected_center(center);
        Ok(())
    }

    pub fn pixel_to_projected(&self, pixel: Point) -> ProjectedPoint {
        let s = &self.state;
        let bottom = s.view_bounds.min.y + s.view_bounds.height();
        ProjectedPoint::new(
            s.origin.easting + (pixel.x - s.view_bounds.min.x) * s.meters_per_pixel,
            s.origin.northing + (bottom - pixel.y) * s.meters_per_pixel,
        )
    }

    pub fn projected_to_pixel(&self, point: ProjectedPoint) -> Point {
        let s = &self.state;
        let bottom = s.view_bounds.min.y + s.view_bounds.height();
        Point::new(
            s.view_bounds.min.x + (point.easting - s.origin.easting) / s.meters_per_pixel,
            bottom - (point.northing - s.origin.northing) / s.meters_per_pixel,
        )
    }

    /// Screen rectangle occupied by a projected rectangle
    pub fn projected_rect_to_pixels(&self, rect: &ProjectedRect) -> Bounds {
        let top_left =
            self.projected_to_pixel(ProjectedPoint::new(rect.min_easting(), rect.max_northing()));
        let bottom_right =
            self.projected_to_pixel(ProjectedPoint::new(rect.max_easting(), rect.min_northing()));
        Bounds::new(top_left, bottom_right)
    }

    pub fn pixels_to_projected_size(&self, width: f64, height: f64) -> ProjectedSize {
        let scale = self.state.meters_per_pixel;
        ProjectedSize::new(width * scale, height * scale)
    }

    /// Drags the content by `delta` pixels and returns the new origin.
    ///
    /// A point that was under pixel `p` is under `p + delta` afterwards.
    pub fn pan(&mut self, delta: Point) -> ProjectedPoint {
        let mpp = self.state.meters_per_pixel;
        self.state.origin = self.state.origin.offset(-delta.x * mpp, delta.y * mpp);
        self.state.origin
    }

    /// Scales by `factor` (greater than one zooms in) about `pivot`, which
    /// keeps showing the same projected point.
    pub fn zoom(&mut self, factor: f64, pivot: Point) -> Result<ViewportState> {
        if !(factor > 0.0 && factor.is_finite()) {
            return Err(MapError::InvalidZoomFactor(factor));
        }
        let meters_per_pixel = self.state.meters_per_pixel / factor;
        check_scale(meters_per_pixel)?;

        let anchor = self.pixel_to_projected(pivot);
        let bounds = self.state.view_bounds;
        let bottom = bounds.min.y + bounds.height();
        self.state = ViewportState {
            origin: ProjectedPoint::new(
                anchor.easting - (pivot.x - bounds.min.x) * meters_per_pixel,
                anchor.northing - (bottom - pivot.y) * meters_per_pixel,
            ),
            meters_per_pixel,
            view_bounds: bounds,
        };
        Ok(self.state)
    }

    pub fn visible_projected_rect(&self) -> ProjectedRect {
        let bounds = self.state.view_bounds;
        ProjectedRect::new(
            self.state.origin,
            self.pixels_to_projected_size(bounds.width(), bounds.height()),
        )
    }

    /// Shows `rect`, centered, at the largest scale that fits it entirely in
    /// the view.
    pub fn set_visible_projected_rect(&mut self, rect: ProjectedRect) -> Result<()> {
        let bounds = self.state.view_bounds;
        if bounds.is_empty() {
            return Err(MapError::InvalidCoordinates("view bounds are empty".to_string()));
        }
        let meters_per_pixel =
            (rect.size.width / bounds.width()).max(rect.size.height / bounds.height());
        check_scale(meters_per_pixel)?;

        self.state.meters_per_pixel = meters_per_pixel;
        self.set_projected_center(rect.center());
        Ok(())
    }

    pub fn projected_center(&self) -> ProjectedPoint {
        self.visible_projected_rect().center()
    }

    pub fn set_projected_center(&mut self, center: ProjectedPoint) {
        let bounds = self.state.view_bounds;
        let half = self.pixels_to_projected_size(bounds.width() / 2.0, bounds.height() / 2.0);
        self.state.origin =
            ProjectedPoint::new(center.easting - half.width, center.northing - half.height);
    }

    /// Pixel position of `lat_lng`. With a wrapping projection the copy of the
    /// point closest to the view center is used.
    pub fn lat_lng_to_pixel(&self, lat_lng: LatLng) -> Point {
        let mut point = self.projection.to_projected(lat_lng);
        if self.projection.wraps_horizontally() {
            let width = self.projection.planet_bounds().size.width;
            let turns = ((self.projected_center().easting - point.easting) / width).round();
            point.easting += turns * width;
        }
        self.projected_to_pixel(point)
    }

    pub fn pixel_to_lat_lng(&self, pixel: Point) -> LatLng {
        let point = self.projection.constrain_to_bounds(self.pixel_to_projected(pixel));
        self.projection.to_geo(point)
    }

    pub fn lat_lng_bounding_box_for_screen(&self) -> LatLngBounds {
        self.lat_lng_bounding_box_for(&self.state.view_bounds)
    }

    /// Geographic box spanned by a screen rectangle
    pub fn lat_lng_bounding_box_for(&self, rect: &Bounds) -> LatLngBounds {
        let south_west = self.pixel_to_lat_lng(Point::new(rect.min.x, rect.max.y));
        let north_east = self.pixel_to_lat_lng(Point::new(rect.max.x, rect.min.y));
        LatLngBounds::new(south_west, north_east)
    }
}

fn check_view_bounds(bounds: &Bounds) -> Result<()> {
    let finite = [bounds.min.x, bounds.min.y, bounds.max.x, bounds.max.y]
        .iter()
        .all(|v| v.is_finite());
    if finite && !bounds.is_empty() {
        Ok(())
    } else {
        Err(MapError::InvalidCoordinates(format!(
            "view bounds {:?} are inverted or empty",
            bounds
        )))
    }
}

fn check_scale(meters_per_pixel: f64) -> Result<()> {
    if meters_per_pixel > 0.0 && meters_per_pixel.is_finite() {
        Ok(())
    } else {
        Err(MapError::InvalidCoordinates(format!(
            "meters per pixel must be positive, got {}",
            meters_per_pixel
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64, tolerance: f64) -> bool {
        (a - b).abs() <= tolerance
    }

    fn sydney_viewport() -> ViewportProjection {
        let projection = Arc::new(Projection::google());
        let center = projection.to_projected(LatLng::new(-33.858771, 151.201596));
        let view = Bounds::from_coords(0.0, 0.0, 320.0, 480.0);
        ViewportProjection::new(projection, view, center, 19.109).unwrap()
    }

    #[test]
    fn test_center_is_in_the_middle_of_the_view() {
        let viewport = sydney_viewport();
        let pixel = viewport.lat_lng_to_pixel(LatLng::new(-33.858771, 151.201596));
        assert!(approx(pixel.x, 160.0, 1e-6));
        assert!(approx(pixel.y, 240.0, 1e-6));

        // North is up
        let north = viewport.lat_lng_to_pixel(LatLng::new(-33.85, 151.201596));
        assert!(north.y < pixel.y);
    }

    #[test]
    fn test_pixel_projected_round_trip() {
        let mut viewport = sydney_viewport();
        viewport.pan(Point::new(-37.5, 12.25));
        viewport.zoom(1.7, Point::new(10.0, 400.0)).unwrap();
        viewport.zoom(0.3, Point::new(300.0, 5.0)).unwrap();

        for pixel in [Point::new(0.0, 0.0), Point::new(123.4, 456.7), Point::new(-50.0, 900.0)] {
            let back = viewport.projected_to_pixel(viewport.pixel_to_projected(pixel));
            assert!(approx(back.x, pixel.x, 1e-6));
            assert!(approx(back.y, pixel.y, 1e-6));
        }
    }

    #[test]
    fn test_zoom_keeps_pivot_anchored() {
        let mut viewport = sydney_viewport();
        for (factor, pivot) in [
            (2.0, Point::new(17.0, 33.0)),
            (0.25, Point::new(320.0, 480.0)),
            (1.0001, Point::new(160.0, 240.0)),
        ] {
            let before = viewport.pixel_to_projected(pivot);
            let mpp = viewport.meters_per_pixel();
            viewport.zoom(factor, pivot).unwrap();
            let after = viewport.pixel_to_projected(pivot);
            assert!(approx(before.easting, after.easting, 1e-6));
            assert!(approx(before.northing, after.northing, 1e-6));
            assert!(approx(viewport.meters_per_pixel(), mpp / factor, 1e-12));
        }
    }

    #[test]
    fn test_invalid_zoom_factor() {
        let mut viewport = sydney_viewport();
        let before = viewport.state();
        let pivot = Point::new(0.0, 0.0);
        assert!(matches!(viewport.zoom(0.0, pivot), Err(MapError::InvalidZoomFactor(_))));
        assert!(matches!(viewport.zoom(f64::NAN, pivot), Err(MapError::InvalidZoomFactor(_))));
        assert!(viewport.zoom(-2.0, pivot).is_err());
        assert_eq!(viewport.state(), before);
    }

    #[test]
    fn test_pan_drags_content() {
        let mut viewport = sydney_viewport();
        let target = viewport.pixel_to_projected(Point::new(100.0, 100.0));
        viewport.pan(Point::new(15.0, -20.0));
        let moved = viewport.projected_to_pixel(target);
        assert!(approx(moved.x, 115.0, 1e-6));
        assert!(approx(moved.y, 80.0, 1e-6));

        let origin = viewport.origin();
        viewport.pan(Point::new(0.0, 0.0));
        assert_eq!(viewport.origin(), origin);
    }

    #[test]
    fn test_set_visible_rect_fits_and_centers() {
        let mut viewport = sydney_viewport();
        let rect = ProjectedRect::from_coords(0.0, 0.0, 3200.0, 1000.0);
        viewport.set_visible_projected_rect(rect).unwrap();

        assert!(approx(viewport.meters_per_pixel(), 10.0, 1e-12));
        let visible = viewport.visible_projected_rect();
        assert!(visible.contains_rect(&rect));
        assert!(approx(visible.center().easting, 1600.0, 1e-6));
        assert!(approx(visible.center().northing, 500.0, 1e-6));

        let empty = ProjectedRect::from_coords(5.0, 5.0, 5.0, 5.0);
        assert!(viewport.set_visible_projected_rect(empty).is_err());
    }

    #[test]
    fn test_bounding_box_for_screen() {
        let viewport = sydney_viewport();
        let bbox = viewport.lat_lng_bounding_box_for_screen();
        assert!(bbox.contains(&LatLng::new(-33.858771, 151.201596)));
        assert!(bbox.south_west.lat < bbox.north_east.lat);
        assert!(bbox.south_west.lng < bbox.north_east.lng);

        let center = viewport.pixel_to_lat_lng(Point::new(160.0, 240.0));
        assert!(approx(center.lat, -33.858771, 1e-6));
        assert!(approx(center.lng, 151.201596, 1e-6));
    }

    #[test]
    fn test_resize_keeps_center() {
        let mut viewport = sydney_viewport();
        let center = viewport.projected_center();
        viewport.set_view_bounds(Bounds::from_coords(0.0, 0.0, 1024.0, 768.0)).unwrap();
        let after = viewport.projected_center();
        assert!(approx(center.easting, after.easting, 1e-6));
        assert!(approx(center.northing, after.northing, 1e-6));
    }

    #[test]
    fn test_degenerate_view_bounds_are_rejected() {
        let mut viewport = sydney_viewport();
        let before = viewport.state();
        for bounds in [
            Bounds::from_coords(0.0, 0.0, -10.0, 480.0),
            Bounds::from_coords(0.0, 0.0, 320.0, 0.0),
            Bounds::from_coords(0.0, 0.0, f64::INFINITY, 480.0),
        ] {
            assert!(matches!(
                viewport.set_view_bounds(bounds),
                Err(MapError::InvalidCoordinates(_))
            ));
            assert!(ViewportProjection::new(
                Arc::clone(viewport.projection()),
                bounds,
                before.origin,
                before.meters_per_pixel
            )
            .is_err());
        }
        assert_eq!(viewport.state(), before);
    }
}
