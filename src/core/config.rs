//! Configuration for tile loading and map construction
//!
//! Tile loading behaviour comes from a preset profile or a custom
//! [`TileLoadingConfig`]. [`MapOptions`] gathers everything needed to build a
//! map and can be loaded from JSON.

use crate::constants::{
    DEFAULT_INITIAL_LATITUDE, DEFAULT_INITIAL_LONGITUDE, DEFAULT_INITIAL_ZOOM, DEFAULT_MAXIMUM_ZOOM,
    DEFAULT_MINIMUM_ZOOM,
};
use crate::core::geo::LatLng;
use crate::{MapError, Result};
use serde::{Deserialize, Serialize};

/// Which different-zoom tiles a freshly loaded tile pushes out of the cache
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CompetingOverlap {
    /// Any tile whose footprint intersects the loaded tile's
    #[default]
    Intersecting,
    /// Only tiles lying wholly inside the loaded tile's footprint
    Contained,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TileLoadingProfile {
    Balanced,
    LowMemory,
    Aggressive,
    Custom(TileLoadingConfig),
}

impl TileLoadingProfile {
    pub fn resolve(&self) -> TileLoadingConfig {
        match self {
            Self::Balanced => TileLoadingConfig {
                prefetch_buffer: 1,
                competing_overlap: CompetingOverlap::Intersecting,
                cancel_on_evict: true,
            },
            Self::LowMemory => TileLoadingConfig {
                prefetch_buffer: 0,
                competing_overlap: CompetingOverlap::Intersecting,
                cancel_on_evict: true,
            },
            Self::Aggressive => TileLoadingConfig {
                prefetch_buffer: 2,
                competing_overlap: CompetingOverlap::Contained,
                cancel_on_evict: false,
            },
            Self::Custom(config) => config.clone(),
        }
    }
}

impl Default for TileLoadingProfile {
    fn default() -> Self {
        Self::Balanced
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TileLoadingConfig {
    /// Tiles of margin loaded around the visible area on every side
    pub prefetch_buffer: u32,
    pub competing_overlap: CompetingOverlap,
    /// Abort in-flight fetches of evicted tiles. When off, the fetch runs to
    /// completion and its result is dropped as stale.
    pub cancel_on_evict: bool,
}

impl Default for TileLoadingConfig {
    fn default() -> Self {
        TileLoadingProfile::default().resolve()
    }
}

/// Everything needed to put a map on screen
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MapOptions {
    pub center: LatLng,
    pub zoom: f64,
    pub min_zoom: f64,
    pub max_zoom: f64,
    /// Width and height of the view in pixels
    pub view_size: (f64, f64),
    pub tile_loading: TileLoadingConfig,
}

impl Default for MapOptions {
    fn default() -> Self {
        Self {
            center: LatLng::new(DEFAULT_INITIAL_LATITUDE, DEFAULT_INITIAL_LONGITUDE),
            zoom: DEFAULT_INITIAL_ZOOM,
            min_zoom: DEFAULT_MINIMUM_ZOOM,
            max_zoom: DEFAULT_MAXIMUM_ZOOM,
            view_size: (320.0, 480.0),
            tile_loading: TileLoadingConfig::default(),
        }
    }
}

impl MapOptions {
    pub fn from_json(json: &str) -> Result<Self> {
        let options: MapOptions = serde_json::from_str(json)?;
        options.validate()?;
        Ok(options)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.center.is_valid() {
            return Err(MapError::InvalidCoordinates(format!(
                "center {:?} is off the globe",
                self.center
            )));
        }
        if !(self.min_zoom <= self.max_zoom) {
            return Err(MapError::InvalidCoordinates(format!(
                "min zoom {} is above max zoom {}",
                self.min_zoom, self.max_zoom
            )));
        }
        let (width, height) = self.view_size;
        if !(width > 0.0 && height > 0.0) {
            return Err(MapError::InvalidCoordinates(format!(
                "view size {}x{} is empty",
                width, height
            )));
        }
        Ok(())
    }

    pub fn with_center(mut self, center: LatLng) -> Self {
        self.center = center;
        self
    }

    pub fn with_zoom(mut self, zoom: f64) -> Self {
        self.zoom = zoom;
        self
    }

    pub fn with_zoom_limits(mut self, min_zoom: f64, max_zoom: f64) -> Self {
        self.min_zoom = min_zoom;
        self.max_zoom = max_zoom;
        self
    }

    pub fn with_view_size(mut self, width: f64, height: f64) -> Self {
        self.view_size = (width, height);
        self
    }

    pub fn with_tile_loading(mut self, profile: TileLoadingProfile) -> Self {
        self.tile_loading = profile.resolve();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profiles_resolve() {
        assert_eq!(TileLoadingConfig::default(), TileLoadingProfile::Balanced.resolve());
        assert_eq!(TileLoadingProfile::LowMemory.resolve().prefetch_buffer, 0);

        let custom = TileLoadingConfig {
            prefetch_buffer: 5,
            competing_overlap: CompetingOverlap::Contained,
            cancel_on_evict: true,
        };
        assert_eq!(TileLoadingProfile::Custom(custom.clone()).resolve(), custom);
    }

    #[test]
    fn test_defaults() {
        let options = MapOptions::default();
        assert_eq!(options.zoom, 13.0);
        assert_eq!((options.min_zoom, options.max_zoom), (0.0, 25.0));
        assert!((options.center.lat + 33.858771).abs() < 1e-9);
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_from_json_fills_defaults() {
        let options = MapOptions::from_json(
            r#"{
                "zoom": 4.5,
                "view_size": [1024, 768],
                "tile_loading": { "prefetch_buffer": 3 }
            }"#,
        )
        .unwrap();
        assert_eq!(options.zoom, 4.5);
        assert_eq!(options.view_size, (1024.0, 768.0));
        assert_eq!(options.tile_loading.prefetch_buffer, 3);
        assert_eq!(options.tile_loading.competing_overlap, CompetingOverlap::Intersecting);
        assert!(options.tile_loading.cancel_on_evict);
    }

    #[test]
    fn test_from_json_rejects_bad_input() {
        assert!(matches!(MapOptions::from_json("{ zoom: }"), Err(MapError::Serialization(_))));
        assert!(matches!(
            MapOptions::from_json(r#"{ "min_zoom": 10, "max_zoom": 2 }"#),
            Err(MapError::InvalidCoordinates(_))
        ));
    }
}
