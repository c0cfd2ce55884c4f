//! Tile sources: where tile bytes come from.
//!
//! The engine only needs a zoom range and a way to fetch the encoded bytes
//! for a coordinate. URL building and transport live here.

use async_trait::async_trait;
use once_cell::sync::Lazy;

use crate::core::constants::{DEFAULT_MAX_TILE_ZOOM, DEFAULT_MIN_TILE_ZOOM, TILE_SIZE};
use crate::core::geo::{LatLngBounds, TileCoord};
use crate::{MapError, Result};

/// Shared async HTTP client for tile fetching
pub(crate) static HTTP_CLIENT: Lazy<reqwest::Client> = Lazy::new(|| {
    reqwest::Client::builder()
        .user_agent(concat!("tilelet/", env!("CARGO_PKG_VERSION")))
        .timeout(std::time::Duration::from_secs(30))
        .tcp_keepalive(std::time::Duration::from_secs(30))
        .pool_idle_timeout(std::time::Duration::from_secs(90))
        .pool_max_idle_per_host(16)
        .build()
        .unwrap_or_else(|e| {
            log::warn!("falling back to default HTTP client: {}", e);
            reqwest::Client::new()
        })
});

/// Anything that can produce encoded tile bytes for a coordinate.
#[async_trait]
pub trait TileSource: Send + Sync {
    fn min_zoom(&self) -> u8;

    fn max_zoom(&self) -> u8;

    /// Edge length of a tile image, in pixels
    fn tile_size(&self) -> u32 {
        TILE_SIZE
    }

    /// Area the source has tiles for
    fn lat_lng_bounding_box(&self) -> LatLngBounds {
        LatLngBounds::world()
    }

    /// Distinguishes this source's tiles from any other source's
    fn unique_cache_key(&self) -> String;

    /// Name to show in a layer picker
    fn short_name(&self) -> String {
        self.unique_cache_key()
    }

    /// One-line credit for the map corner
    fn short_attribution(&self) -> Option<String> {
        None
    }

    /// Full credit and licence text
    fn long_attribution(&self) -> Option<String> {
        self.short_attribution()
    }

    async fn fetch_tile(&self, coord: TileCoord) -> Result<Vec<u8>>;
}

/// Fetches tiles over HTTP from a URL template.
///
/// The template may contain `{z}`, `{x}`, `{y}` and `{s}`; `{s}` cycles
/// through the configured subdomains.
#[derive(Debug, Clone)]
pub struct UrlTileSource {
    template: String,
    subdomains: Vec<String>,
    min_zoom: u8,
    max_zoom: u8,
    tile_size: u32,
    bounds: LatLngBounds,
    name: Option<String>,
    attribution: Option<String>,
    long_attribution: Option<String>,
}

impl UrlTileSource {
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
            subdomains: Vec::new(),
            min_zoom: DEFAULT_MIN_TILE_ZOOM,
            max_zoom: DEFAULT_MAX_TILE_ZOOM,
            tile_size: TILE_SIZE,
            bounds: LatLngBounds::world(),
            name: None,
            attribution: None,
            long_attribution: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Sets the short credit line and, optionally, a longer licence text
    pub fn with_attribution(mut self, short: impl Into<String>, long: Option<String>) -> Self {
        self.attribution = Some(short.into());
        self.long_attribution = long;
        self
    }

    pub fn with_subdomains<I, S>(mut self, subdomains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.subdomains = subdomains.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_zoom_range(mut self, min_zoom: u8, max_zoom: u8) -> Self {
        self.min_zoom = min_zoom;
        self.max_zoom = max_zoom;
        self
    }

    pub fn with_tile_size(mut self, tile_size: u32) -> Self {
        self.tile_size = tile_size;
        self
    }

    pub fn with_bounds(mut self, bounds: LatLngBounds) -> Self {
        self.bounds = bounds;
        self
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    /// Builds the URL for `coord`
    pub fn url(&self, coord: TileCoord) -> String {
        let subdomain = if self.subdomains.is_empty() {
            ""
        } else {
            let idx = ((coord.x as usize) + (coord.y as usize)) % self.subdomains.len();
            self.subdomains[idx].as_str()
        };

        self.template
            .replace("{s}", subdomain)
            .replace("{z}", &coord.z.to_string())
            .replace("{x}", &coord.x.to_string())
            .replace("{y}", &coord.y.to_string())
    }
}

#[async_trait]
impl TileSource for UrlTileSource {
    fn min_zoom(&self) -> u8 {
        self.min_zoom
    }

    fn max_zoom(&self) -> u8 {
        self.max_zoom
    }

    fn tile_size(&self) -> u32 {
        self.tile_size
    }

    fn lat_lng_bounding_box(&self) -> LatLngBounds {
        self.bounds
    }

    fn unique_cache_key(&self) -> String {
        self.template.clone()
    }

    fn short_name(&self) -> String {
        self.name.clone().unwrap_or_else(|| self.template.clone())
    }

    fn short_attribution(&self) -> Option<String> {
        self.attribution.clone()
    }

    fn long_attribution(&self) -> Option<String> {
        self.long_attribution.clone().or_else(|| self.attribution.clone())
    }

    async fn fetch_tile(&self, coord: TileCoord) -> Result<Vec<u8>> {
        let url = self.url(coord);
        let response = HTTP_CLIENT.get(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(MapError::FetchFailed(format!("{} returned {}", url, status)));
        }
        let bytes = response.bytes().await?;
        Ok(bytes.to_vec())
    }
}

const OSM_LICENCE: &str =
    "Map data © OpenStreetMap contributors, available under the Open Database Licence";

/// The standard OpenStreetMap tile server
pub struct OpenStreetMapSource;

impl OpenStreetMapSource {
    #[allow(clippy::new_ret_no_self)]
    pub fn new() -> UrlTileSource {
        UrlTileSource::new("https://{s}.tile.openstreetmap.org/{z}/{x}/{y}.png")
            .with_subdomains(["a", "b", "c"])
            .with_zoom_range(DEFAULT_MIN_TILE_ZOOM, DEFAULT_MAX_TILE_ZOOM)
            .with_name("OpenStreetMap")
            .with_attribution("© OpenStreetMap contributors", Some(OSM_LICENCE.to_string()))
    }
}

/// Reads tiles laid out on disk as `{root}/{z}/{x}/{y}.{extension}`.
#[cfg(feature = "tokio-runtime")]
#[derive(Debug, Clone)]
pub struct FileTileSource {
    root: std::path::PathBuf,
    extension: String,
    min_zoom: u8,
    max_zoom: u8,
}

#[cfg(feature = "tokio-runtime")]
impl FileTileSource {
    pub fn new(root: impl Into<std::path::PathBuf>, extension: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            extension: extension.into(),
            min_zoom: DEFAULT_MIN_TILE_ZOOM,
            max_zoom: DEFAULT_MAX_TILE_ZOOM,
        }
    }

    pub fn with_zoom_range(mut self, min_zoom: u8, max_zoom: u8) -> Self {
        self.min_zoom = min_zoom;
        self.max_zoom = max_zoom;
        self
    }

    pub fn path_for(&self, coord: TileCoord) -> std::path::PathBuf {
        self.root
            .join(coord.z.to_string())
            .join(coord.x.to_string())
            .join(format!("{}.{}", coord.y, self.extension))
    }
}

#[cfg(feature = "tokio-runtime")]
#[async_trait]
impl TileSource for FileTileSource {
    fn min_zoom(&self) -> u8 {
        self.min_zoom
    }

    fn max_zoom(&self) -> u8 {
        self.max_zoom
    }

    fn unique_cache_key(&self) -> String {
        format!("file://{}", self.root.display())
    }

    async fn fetch_tile(&self, coord: TileCoord) -> Result<Vec<u8>> {
        Ok(tokio::fs::read(self.path_for(coord)).await?)
    }
}
