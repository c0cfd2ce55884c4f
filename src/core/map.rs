//! High-level map facade
//!
//! [`MapContents`] is what an embedding view talks to: it owns the tile
//! loader (and through it the viewport and the tile set), enforces the zoom
//! limits, and offers navigation in geographic terms.

use crate::core::bounds::Bounds;
use crate::core::config::MapOptions;
use crate::core::geo::{LatLng, LatLngBounds, Point, ProjectedPoint, ProjectedRect};
use crate::core::projection::Projection;
use crate::core::viewport::ViewportProjection;
use crate::prelude::Arc;
use crate::tiles::cache::TileObserver;
use crate::tiles::fetch::FetchDispatcher;
use crate::tiles::loader::TileLoader;
use crate::tiles::scheme::TileScheme;
use crate::tiles::source::TileSource;
use crate::{MapError, Result};

/// Zooms closer than this to an integer count as sitting on it
const NATIVE_ZOOM_EPSILON: f64 = 1e-6;

pub struct MapContents {
    loader: TileLoader,
    min_zoom: f64,
    max_zoom: f64,
}

impl MapContents {
    /// A spherical mercator map showing tiles from `source`
    pub fn new(options: MapOptions, source: Arc<dyn TileSource>) -> Result<Self> {
        options.validate()?;
        let projection = Arc::new(Projection::google());
        let viewport = initial_viewport(&options, projection, source.tile_size())?;
        let loader = TileLoader::new(source, viewport, options.tile_loading.clone())?;
        Self::finish(options, loader)
    }

    /// A map whose fetches go through `dispatcher` instead of a tile source
    pub fn with_dispatcher(
        options: MapOptions,
        scheme: TileScheme,
        dispatcher: Arc<dyn FetchDispatcher>,
    ) -> Result<Self> {
        options.validate()?;
        let viewport =
            initial_viewport(&options, Arc::clone(scheme.projection()), scheme.tile_size())?;
        let loader =
            TileLoader::with_dispatcher(scheme, dispatcher, viewport, options.tile_loading.clone());
        Self::finish(options, loader)
    }

    fn finish(options: MapOptions, loader: TileLoader) -> Result<Self> {
        let mut map = Self {
            loader,
            min_zoom: options.min_zoom,
            max_zoom: options.max_zoom,
        };
        map.loader.update_loaded_images()?;
        log::info!(
            "map ready at {:?}, zoom {:.2}, {} tiles requested",
            options.center,
            map.zoom(),
            map.loader.cache().count()
        );
        Ok(map)
    }

    pub fn loader(&self) -> &TileLoader {
        &self.loader
    }

    pub fn loader_mut(&mut self) -> &mut TileLoader {
        &mut self.loader
    }

    pub fn viewport(&self) -> &ViewportProjection {
        self.loader.viewport()
    }

    pub fn projection(&self) -> &Arc<Projection> {
        self.loader.viewport().projection()
    }

    pub fn set_observer(&mut self, observer: Box<dyn TileObserver>) {
        self.loader.set_observer(observer);
    }

    pub fn min_zoom(&self) -> f64 {
        self.min_zoom
    }

    pub fn max_zoom(&self) -> f64 {
        self.max_zoom
    }

    pub fn set_zoom_limits(&mut self, min_zoom: f64, max_zoom: f64) -> Result<()> {
        if !(min_zoom <= max_zoom) {
            return Err(MapError::InvalidCoordinates(format!(
                "min zoom {} is above max zoom {}",
                min_zoom, max_zoom
            )));
        }
        self.min_zoom = min_zoom;
        self.max_zoom = max_zoom;
        let zoom = self.zoom();
        let clamped = zoom.clamp(min_zoom, max_zoom);
        if clamped != zoom {
            self.set_zoom(clamped)?;
        }
        Ok(())
    }

    /// Current continuous zoom level
    pub fn zoom(&self) -> f64 {
        self.loader.continuous_zoom()
    }

    /// Zooms about the view center to `zoom`, clamped to the limits
    pub fn set_zoom(&mut self, zoom: f64) -> Result<()> {
        if !zoom.is_finite() {
            return Err(MapError::InvalidCoordinates(format!("zoom {} is not finite", zoom)));
        }
        let target = zoom.clamp(self.min_zoom, self.max_zoom);
        let center = self.viewport().view_bounds().center();
        self.loader.zoom_by_factor((target - self.zoom()).exp2(), center)
    }

    pub fn center(&self) -> LatLng {
        let viewport = self.viewport();
        viewport.pixel_to_lat_lng(viewport.view_bounds().center())
    }

    /// Zooms about `pivot`, limiting the factor so the result stays within the
    /// zoom limits.
    pub fn zoom_by_factor(&mut self, factor: f64, pivot: Point) -> Result<()> {
        if !(factor > 0.0 && factor.is_finite()) {
            return Err(MapError::InvalidZoomFactor(factor));
        }
        let zoom = self.zoom();
        let target = (zoom + factor.log2()).clamp(self.min_zoom, self.max_zoom);
        let allowed = (target - zoom).exp2();
        if (allowed - 1.0).abs() < NATIVE_ZOOM_EPSILON {
            return Ok(());
        }
        self.loader.zoom_by_factor(allowed, pivot)
    }

    /// Zooms in about `pivot` to the next integer zoom
    pub fn zoom_in_to_next_native_zoom_at(&mut self, pivot: Point) -> Result<()> {
        let zoom = self.zoom();
        let next = if (zoom - zoom.round()).abs() < NATIVE_ZOOM_EPSILON {
            zoom.round() + 1.0
        } else {
            zoom.ceil()
        };
        self.zoom_by_factor((next - zoom).exp2(), pivot)
    }

    /// Zooms out about `pivot` to the previous integer zoom
    pub fn zoom_out_to_next_native_zoom_at(&mut self, pivot: Point) -> Result<()> {
        let zoom = self.zoom();
        let next = if (zoom - zoom.round()).abs() < NATIVE_ZOOM_EPSILON {
            zoom.round() - 1.0
        } else {
            zoom.floor()
        };
        self.zoom_by_factor((next - zoom).exp2(), pivot)
    }

    pub fn move_by(&mut self, delta: Point) -> Result<()> {
        self.loader.move_by(delta)
    }

    pub fn move_to_lat_lng(&mut self, lat_lng: LatLng) -> Result<()> {
        if !lat_lng.is_valid() {
            return Err(MapError::InvalidCoordinates(format!("{:?} is off the globe", lat_lng)));
        }
        let point = self.projection().to_projected(lat_lng);
        self.move_to_projected_point(point)
    }

    pub fn move_to_projected_point(&mut self, point: ProjectedPoint) -> Result<()> {
        self.loader.update_viewport(|viewport| viewport.set_projected_center(point))
    }

    /// Fits `bounds` in the view, within the zoom limits. Degenerate bounds
    /// just recenter the map.
    pub fn zoom_with_lat_lng_bounds(&mut self, bounds: LatLngBounds) -> Result<()> {
        let projection = self.projection();
        let south_west = projection.to_projected(bounds.south_west);
        let north_east = projection.to_projected(bounds.north_east);
        let rect = ProjectedRect::from_coords(
            south_west.easting,
            south_west.northing,
            north_east.easting,
            north_east.northing,
        );

        if rect.size.width == 0.0 && rect.size.height == 0.0 {
            return self.move_to_projected_point(rect.center());
        }
        self.loader
            .update_viewport(|viewport| viewport.set_visible_projected_rect(rect))??;

        let zoom = self.zoom();
        if zoom < self.min_zoom || zoom > self.max_zoom {
            self.set_zoom(zoom)?;
        }
        Ok(())
    }

    /// Resizes the view, keeping the center
    pub fn set_view_size(&mut self, width: f64, height: f64) -> Result<()> {
        if !(width > 0.0 && height > 0.0) {
            return Err(MapError::InvalidCoordinates(format!(
                "view size {}x{} is empty",
                width, height
            )));
        }
        let bounds = Bounds::from_coords(0.0, 0.0, width, height);
        self.loader.update_viewport(|viewport| viewport.set_view_bounds(bounds))?
    }

    pub fn lat_lng_bounding_box_for_screen(&self) -> LatLngBounds {
        self.viewport().lat_lng_bounding_box_for_screen()
    }

    /// Skips tile reconciliation while set; clearing it reconciles at once.
    pub fn set_suppress_loading(&mut self, suppress: bool) -> Result<()> {
        self.loader.suppress_loading = suppress;
        if suppress {
            Ok(())
        } else {
            self.loader.update_loaded_images()
        }
    }

    /// Applies fetch results received so far
    pub fn process_completions(&mut self) -> usize {
        self.loader.process_completions()
    }

    /// Stops all fetches in flight to free memory.
    pub fn did_receive_memory_warning(&mut self) {
        log::warn!("memory warning: cancelling tile loads");
        self.loader.cancel_loading();
    }

    pub fn set_tile_source(&mut self, source: Arc<dyn TileSource>) -> Result<()> {
        log::info!("switching tile source to {}", source.unique_cache_key());
        self.loader.set_tile_source(source)
    }

    pub fn reload(&mut self) -> Result<()> {
        self.loader.reload()
    }
}

impl std::fmt::Debug for MapContents {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MapContents")
            .field("min_zoom", &self.min_zoom)
            .field("max_zoom", &self.max_zoom)
            .field("loader", &self.loader)
            .finish()
    }
}

fn initial_viewport(
    options: &MapOptions,
    projection: Arc<Projection>,
    tile_size: u32,
) -> Result<ViewportProjection> {
    let (width, height) = options.view_size;
    let zoom = options.zoom.clamp(options.min_zoom, options.max_zoom);
    let planet_width = projection.planet_bounds().size.width;
    let meters_per_pixel = planet_width / (tile_size as f64 * zoom.exp2());
    let center = projection.to_projected(options.center);
    ViewportProjection::new(
        projection,
        Bounds::from_coords(0.0, 0.0, width, height),
        center,
        meters_per_pixel,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::{TileLoadingConfig, TileLoadingProfile};
    use crate::runtime::AsyncHandle;
    use crate::tiles::fetch::{FetchCompletion, FetchTicket};
    use crossbeam_channel::Sender;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Idle;

    impl AsyncHandle for Idle {
        fn is_finished(&self) -> bool {
            false
        }

        fn cancel(&self) {}
    }

    #[derive(Default)]
    struct Counting(AtomicUsize);

    impl FetchDispatcher for Counting {
        fn dispatch(
            &self,
            _ticket: FetchTicket,
            _reply: Sender<FetchCompletion>,
        ) -> Box<dyn AsyncHandle> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Box::new(Idle)
        }
    }

    fn map(options: MapOptions) -> MapContents {
        let scheme = TileScheme::new(Arc::new(Projection::google()), 0, 18, 256).unwrap();
        MapContents::with_dispatcher(options, scheme, Arc::new(Counting::default())).unwrap()
    }

    fn options() -> MapOptions {
        MapOptions::default().with_tile_loading(TileLoadingProfile::Custom(TileLoadingConfig {
            prefetch_buffer: 0,
            ..TileLoadingConfig::default()
        }))
    }

    #[test]
    fn test_initial_state() {
        let map = map(options());
        assert!((map.zoom() - 13.0).abs() < 1e-9);
        let center = map.center();
        assert!((center.lat + 33.858771).abs() < 1e-6);
        assert!((center.lng - 151.201596).abs() < 1e-6);
        assert_eq!(map.loader().loaded_zoom(), Some(13));
        assert!(map.loader().cache().count() > 0);
    }

    #[test]
    fn test_zoom_is_clamped_to_limits() {
        let mut map = map(options().with_zoom_limits(3.0, 14.0));
        let pivot = map.viewport().view_bounds().center();
        map.zoom_by_factor(16.0, pivot).unwrap();
        assert!((map.zoom() - 14.0).abs() < 1e-9);

        // Already at the limit: nothing moves
        let state = map.viewport().state();
        map.zoom_by_factor(2.0, Point::new(3.0, 4.0)).unwrap();
        assert_eq!(map.viewport().state(), state);

        map.set_zoom(0.0).unwrap();
        assert!((map.zoom() - 3.0).abs() < 1e-9);
        assert!(matches!(map.zoom_by_factor(0.0, pivot), Err(MapError::InvalidZoomFactor(_))));
    }

    #[test]
    fn test_next_native_zoom() {
        let mut map = map(options());
        let pivot = Point::new(100.0, 100.0);
        map.zoom_in_to_next_native_zoom_at(pivot).unwrap();
        assert!((map.zoom() - 14.0).abs() < 1e-9);

        map.zoom_by_factor(1.5, pivot).unwrap();
        map.zoom_out_to_next_native_zoom_at(pivot).unwrap();
        assert!((map.zoom() - 14.0).abs() < 1e-9);
        map.zoom_out_to_next_native_zoom_at(pivot).unwrap();
        assert!((map.zoom() - 13.0).abs() < 1e-9);
    }

    #[test]
    fn test_move_to_lat_lng() {
        let mut map = map(options());
        let before = map.loader().loaded_tiles();
        map.move_to_lat_lng(LatLng::new(51.5074, -0.1278)).unwrap();
        let center = map.center();
        assert!((center.lat - 51.5074).abs() < 1e-6);
        assert!((center.lng + 0.1278).abs() < 1e-6);
        assert_ne!(map.loader().loaded_tiles(), before);

        assert!(map.move_to_lat_lng(LatLng::new(120.0, 0.0)).is_err());
    }

    #[test]
    fn test_zoom_with_lat_lng_bounds() {
        let mut map = map(options());
        let bounds = LatLngBounds::from_coords(-34.0, 150.9, -33.7, 151.3);
        map.zoom_with_lat_lng_bounds(bounds).unwrap();

        let visible = map.lat_lng_bounding_box_for_screen();
        let slack = 1e-9;
        assert!(visible.south_west.lat <= bounds.south_west.lat + slack);
        assert!(visible.south_west.lng <= bounds.south_west.lng + slack);
        assert!(visible.north_east.lat >= bounds.north_east.lat - slack);
        assert!(visible.north_east.lng >= bounds.north_east.lng - slack);
        assert!(map.zoom() < 13.0);
    }

    #[test]
    fn test_suppress_loading_defers_reconciliation() {
        let mut map = map(options());
        let before = map.loader().loaded_tiles();
        map.set_suppress_loading(true).unwrap();
        map.move_by(Point::new(600.0, 0.0)).unwrap();
        assert_eq!(map.loader().loaded_tiles(), before);

        map.set_suppress_loading(false).unwrap();
        assert_ne!(map.loader().loaded_tiles(), before);
    }
}
