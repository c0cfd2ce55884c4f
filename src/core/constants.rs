//! Core constants derived from the defaults of classic slippy-map frameworks.
//! Keeping them in a single place makes it easier to tweak engine-wide magic numbers.

/// Default square tile size in pixels.
pub const TILE_SIZE: u32 = 256;

/// Default minimum zoom served by a tile source.
pub const DEFAULT_MIN_TILE_ZOOM: u8 = 0;

/// Default maximum zoom served by a tile source.
pub const DEFAULT_MAX_TILE_ZOOM: u8 = 18;

/// Deepest zoom a `TileCoord` can address (2^30 tiles per axis fits in `u32`).
pub const MAX_ADDRESSABLE_ZOOM: u8 = 30;

/// Initial map center, latitude (Sydney Harbour).
pub const DEFAULT_INITIAL_LATITUDE: f64 = -33.858771;

/// Initial map center, longitude (Sydney Harbour).
pub const DEFAULT_INITIAL_LONGITUDE: f64 = 151.201596;

/// Initial continuous zoom level.
pub const DEFAULT_INITIAL_ZOOM: f64 = 13.0;

/// Continuous zoom limits of the map itself (independent of the tile source).
pub const DEFAULT_MINIMUM_ZOOM: f64 = 0.0;
pub const DEFAULT_MAXIMUM_ZOOM: f64 = 25.0;

/// Sphere radius used by spherical (web) mercator, in meters.
pub const EARTH_RADIUS: f64 = 6_378_137.0;

/// Half the planet width in spherical mercator meters (PI * EARTH_RADIUS).
pub const MERCATOR_HALF_EXTENT: f64 = 20_037_508.342789244;

/// Latitude at which spherical mercator becomes square.
pub const MAX_MERCATOR_LATITUDE: f64 = 85.0511287798;
