//! Keeps the tile set in step with the viewport.

use std::time::Duration;

use super::cache::{TileImageSet, TileObserver};
use super::fetch::{FetchDispatcher, SourceFetcher};
use super::scheme::{TileRect, TileScheme};
use super::source::TileSource;
use crate::core::bounds::Bounds;
use crate::core::config::TileLoadingConfig;
use crate::core::geo::Point;
use crate::core::viewport::ViewportProjection;
use crate::prelude::Arc;
use crate::Result;

/// Continuous zooms within this distance below `n + 0.5` still round up.
/// Absorbs the error of taking `log2` of a scale.
const ROUNDING_TOLERANCE: f64 = 1e-9;

/// Reconciles the tile set with the viewport after every change.
///
/// Owns the [`ViewportProjection`]; all viewport changes go through the
/// loader so it can keep `loaded_tiles` and the cache consistent.
pub struct TileLoader {
    cache: TileImageSet,
    viewport: ViewportProjection,
    loaded_bounds: Bounds,
    loaded_zoom: Option<u8>,
    loaded_tiles: Option<TileRect>,
    /// Skip reconciliation, e.g. while a gesture is in progress
    pub suppress_loading: bool,
}

impl TileLoader {
    /// Loader fetching from `source` on the global runtime
    pub fn new(
        source: Arc<dyn TileSource>,
        viewport: ViewportProjection,
        config: TileLoadingConfig,
    ) -> Result<Self> {
        let scheme = scheme_for(source.as_ref(), &viewport)?;
        Ok(Self::with_dispatcher(
            scheme,
            Arc::new(SourceFetcher::new(source)),
            viewport,
            config,
        ))
    }

    /// Loader using an arbitrary [`FetchDispatcher`]
    pub fn with_dispatcher(
        scheme: TileScheme,
        dispatcher: Arc<dyn FetchDispatcher>,
        viewport: ViewportProjection,
        config: TileLoadingConfig,
    ) -> Self {
        Self {
            cache: TileImageSet::new(scheme, dispatcher, config),
            viewport,
            loaded_bounds: Bounds::default(),
            loaded_zoom: None,
            loaded_tiles: None,
            suppress_loading: false,
        }
    }

    pub fn cache(&self) -> &TileImageSet {
        &self.cache
    }

    pub fn cache_mut(&mut self) -> &mut TileImageSet {
        &mut self.cache
    }

    pub fn viewport(&self) -> &ViewportProjection {
        &self.viewport
    }

    pub fn set_observer(&mut self, observer: Box<dyn TileObserver>) {
        self.cache.set_observer(observer);
    }

    pub fn loaded_bounds(&self) -> Bounds {
        self.loaded_bounds
    }

    pub fn loaded_zoom(&self) -> Option<u8> {
        self.loaded_zoom
    }

    pub fn loaded_tiles(&self) -> Option<TileRect> {
        self.loaded_tiles
    }

    /// The zoom at which tiles would be drawn at their native size for the
    /// current scale. Not clamped.
    pub fn continuous_zoom(&self) -> f64 {
        self.cache.scheme().zoom_for_scale(self.viewport.meters_per_pixel())
    }

    /// The native zoom to load: the continuous zoom rounded half up, clamped
    /// to what the source serves.
    pub fn target_zoom(&self) -> u8 {
        let scheme = self.cache.scheme();
        native_zoom(self.continuous_zoom(), scheme.min_zoom(), scheme.max_zoom())
    }

    /// Brings the tile set in line with the viewport.
    ///
    /// Does nothing while `suppress_loading` is set, or when the covering
    /// tile rectangle has not changed since the last call.
    pub fn update_loaded_images(&mut self) -> Result<()> {
        if self.suppress_loading {
            return Ok(());
        }

        let zoom = self.target_zoom();
        let scheme = self.cache.scheme();
        let margin = self.cache.config().prefetch_buffer as f64 * scheme.tile_extent(zoom).width;
        let wanted = self.viewport.visible_projected_rect().expanded(margin);
        let rect = scheme.tile_rect_covering(&wanted, zoom)?;

        if self.loaded_tiles == Some(rect) {
            return Ok(());
        }

        let previous = self.loaded_tiles;
        let viewport = &self.viewport;
        let display = viewport.view_bounds();
        let covered = self.cache.batch(|cache| {
            // With no previous rectangle on record, whatever references the
            // cache still holds belong to a forgotten one
            if previous.is_none() {
                cache.release_all_references();
            }
            let covered = cache.add_tiles(&rect, display, viewport);
            if let Some(previous) = previous {
                cache.remove_tiles(&previous);
            }
            cache.remove_tiles_outside_of(&rect);
            covered
        });

        log::debug!(
            "loaded {}x{} tiles from {} at zoom {} (continuous {:.3}), {} cached",
            rect.count_x,
            rect.count_y,
            rect.origin,
            zoom,
            self.continuous_zoom(),
            self.cache.count()
        );

        self.loaded_bounds = covered;
        self.loaded_zoom = Some(zoom);
        self.loaded_tiles = Some(rect);
        Ok(())
    }

    /// Drags the map by `delta` pixels, then reconciles.
    pub fn move_by(&mut self, delta: Point) -> Result<()> {
        self.viewport.pan(delta);
        self.loaded_bounds = self.loaded_bounds.translated(delta);
        self.cache.move_by(delta);
        self.update_loaded_images()
    }

    /// Zooms by `factor` about `pivot`, then reconciles.
    pub fn zoom_by_factor(&mut self, factor: f64, pivot: Point) -> Result<()> {
        self.viewport.zoom(factor, pivot)?;
        self.loaded_bounds = self.loaded_bounds.scaled_about(factor, pivot);
        self.cache.zoom_by_factor(factor, pivot);
        self.update_loaded_images()
    }

    /// Runs `f` against the viewport, then reconciles. For changes other than
    /// a plain pan or zoom, where tile screen locations are recomputed.
    pub fn update_viewport<R>(
        &mut self,
        f: impl FnOnce(&mut ViewportProjection) -> R,
    ) -> Result<R> {
        let result = f(&mut self.viewport);
        self.cache.reposition(&self.viewport);
        if let Some(rect) = self.loaded_tiles {
            self.loaded_bounds = self.cache.covered_bounds(&rect, self.viewport.view_bounds());
        }
        self.update_loaded_images()?;
        Ok(result)
    }

    /// Evicts everything and loads from scratch
    pub fn reload(&mut self) -> Result<()> {
        self.cache.remove_all_tiles();
        self.reset();
        self.update_loaded_images()
    }

    /// Forgets what was loaded without touching the cache; the next update
    /// treats every tile as new, re-taking one reference per tile it wants.
    pub fn reset(&mut self) {
        self.loaded_bounds = Bounds::default();
        self.loaded_zoom = None;
        self.loaded_tiles = None;
    }

    pub fn clear_loaded_bounds(&mut self) {
        self.loaded_bounds = Bounds::default();
    }

    /// Swaps the tile source and reloads
    pub fn set_tile_source(&mut self, source: Arc<dyn TileSource>) -> Result<()> {
        let scheme = scheme_for(source.as_ref(), &self.viewport)?;
        self.cache.set_source(scheme, Arc::new(SourceFetcher::new(source)));
        self.reload()
    }

    /// Applies fetch results received so far
    pub fn process_completions(&mut self) -> usize {
        self.cache.process_completions()
    }

    pub fn wait_for_completions(&mut self, timeout: Duration) -> usize {
        self.cache.wait_for_completions(timeout)
    }

    /// Stops every fetch in flight, e.g. on a memory warning
    pub fn cancel_loading(&mut self) {
        self.cache.cancel_loading();
    }
}

impl std::fmt::Debug for TileLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TileLoader")
            .field("viewport", &self.viewport.state())
            .field("loaded_zoom", &self.loaded_zoom)
            .field("loaded_tiles", &self.loaded_tiles)
            .field("suppress_loading", &self.suppress_loading)
            .field("cache", &self.cache)
            .finish()
    }
}

fn scheme_for(source: &dyn TileSource, viewport: &ViewportProjection) -> Result<TileScheme> {
    TileScheme::new(
        Arc::clone(viewport.projection()),
        source.min_zoom(),
        source.max_zoom(),
        source.tile_size(),
    )
}

/// Rounds half up and clamps into `[min, max]`
pub(crate) fn native_zoom(continuous: f64, min: u8, max: u8) -> u8 {
    if continuous.is_nan() {
        return min;
    }
    (continuous + 0.5 + ROUNDING_TOLERANCE)
        .floor()
        .clamp(min as f64, max as f64) as u8
}
