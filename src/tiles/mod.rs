pub mod cache;
pub mod fetch;
pub mod image;
pub mod loader;
pub mod scheme;
pub mod source;
pub mod tile;

pub use cache::{TileImageSet, TileObserver};
pub use fetch::{FetchCompletion, FetchDispatcher, FetchTicket, SourceFetcher};
pub use image::{ImageDecoder, PassthroughDecoder, TileImage};
pub use loader::TileLoader;
pub use scheme::{TileRect, TileScheme};
#[cfg(feature = "tokio-runtime")]
pub use source::FileTileSource;
pub use source::{OpenStreetMapSource, TileSource, UrlTileSource};
pub use tile::{Completion, Tile, TileState};
