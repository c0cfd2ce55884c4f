//! Prelude module for common tilelet types and traits
//!
//! This module re-exports the most commonly used types, traits, and functions
//! for easy importing with `use tilelet::prelude::*;`

pub use crate::core::{
    bounds::Bounds,
    config::{CompetingOverlap, MapOptions, TileLoadingConfig, TileLoadingProfile},
    geo::{LatLng, LatLngBounds, Point, ProjectedPoint, ProjectedRect, ProjectedSize, TileCoord},
    map::MapContents,
    projection::Projection,
    viewport::{ViewportProjection, ViewportState},
};

pub use crate::tiles::{
    cache::{TileImageSet, TileObserver},
    fetch::{FetchCompletion, FetchDispatcher, FetchTicket, SourceFetcher},
    image::{ImageDecoder, PassthroughDecoder, TileImage},
    loader::TileLoader,
    scheme::{TileRect, TileScheme},
    source::{OpenStreetMapSource, TileSource, UrlTileSource},
    tile::{Completion, Tile, TileState},
};

#[cfg(feature = "tokio-runtime")]
pub use crate::tiles::source::FileTileSource;

pub use crate::runtime::{init_runtime, runtime, spawn, AsyncHandle, AsyncSpawner};

pub use crate::{Error as MapError, Result};

pub use std::sync::{Arc, Mutex};

pub use fxhash::{FxHashMap as HashMap, FxHashSet as HashSet};

pub use futures::Future;
pub use std::pin::Pin;
