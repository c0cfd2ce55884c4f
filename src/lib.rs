//! # Tilelet
//!
//! The tile addressing and tile lifecycle engine behind a pannable, zoomable
//! raster map.
//!
//! The crate turns a viewport (origin, scale, pixel bounds) into the
//! rectangle of quadtree tiles it needs, keeps a reference-counted set of
//! loading and loaded tiles keyed by coordinate, evicts tiles as the viewport
//! moves, and coordinates asynchronous tile fetches with cancellation.
//! Rendering, gesture handling and image decoding live outside; they talk to
//! the engine through [`tiles::TileObserver`], [`tiles::TileSource`] and
//! [`tiles::ImageDecoder`].

pub mod core;
pub mod prelude;
pub mod runtime;
pub mod tiles;

pub use crate::core::constants;

// Re-export public API
pub use core::{
    bounds::Bounds,
    config::{CompetingOverlap, MapOptions, TileLoadingConfig, TileLoadingProfile},
    geo::{LatLng, LatLngBounds, Point, ProjectedPoint, ProjectedRect, ProjectedSize, TileCoord},
    map::MapContents,
    projection::Projection,
    viewport::{ViewportProjection, ViewportState},
};

pub use tiles::{
    cache::{TileImageSet, TileObserver},
    fetch::{FetchCompletion, FetchDispatcher, FetchTicket, SourceFetcher},
    image::{ImageDecoder, PassthroughDecoder, TileImage},
    loader::TileLoader,
    scheme::{TileRect, TileScheme},
    source::{TileSource, UrlTileSource},
    tile::{Completion, Tile, TileState},
};

/// Result type used throughout the library
pub type Result<T> = std::result::Result<T, MapError>;

/// Common error types
#[derive(Debug, thiserror::Error)]
pub enum MapError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid projection spec: {0}")]
    InvalidProjectionSpec(String),

    #[error("Zoom {zoom} outside tile source range [{min}, {max}]")]
    ZoomOutOfRange { zoom: u8, min: u8, max: u8 },

    #[error("Tile fetch failed: {0}")]
    FetchFailed(String),

    #[error("Invalid zoom factor: {0}")]
    InvalidZoomFactor(f64),

    #[error("Invalid coordinates: {0}")]
    InvalidCoordinates(String),
}

/// Error type alias for convenience
pub type Error = MapError;

/// Install `env_logger` as the `log` backend.
///
/// Safe to call more than once; later calls are ignored.
#[cfg(feature = "debug")]
pub fn init_logging() {
    let _ = env_logger::Builder::from_default_env().try_init();
}
