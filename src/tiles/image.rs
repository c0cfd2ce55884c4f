//! Displayable tile images.
//!
//! Decoding encoded bytes into pixels belongs to the renderer. The engine
//! only needs a cheap, shareable handle it can pass to observers.

use crate::prelude::Arc;
use crate::Result;

/// A decoded (or still encoded) tile image, cheap to clone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileImage {
    data: Arc<Vec<u8>>,
    dimensions: Option<(u32, u32)>,
}

impl TileImage {
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data: Arc::new(data),
            dimensions: None,
        }
    }

    pub fn with_dimensions(data: Vec<u8>, width: u32, height: u32) -> Self {
        Self {
            data: Arc::new(data),
            dimensions: Some((width, height)),
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn shared_data(&self) -> Arc<Vec<u8>> {
        Arc::clone(&self.data)
    }

    pub fn dimensions(&self) -> Option<(u32, u32)> {
        self.dimensions
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Turns fetched bytes into a [`TileImage`].
///
/// A decode error fails the tile the same way a fetch error does.
pub trait ImageDecoder: Send + Sync {
    fn decode(&self, bytes: Vec<u8>) -> Result<TileImage>;
}

/// Keeps the encoded bytes as-is and leaves decoding to whoever draws them.
#[derive(Debug, Default, Clone, Copy)]
pub struct PassthroughDecoder;

impl ImageDecoder for PassthroughDecoder {
    fn decode(&self, bytes: Vec<u8>) -> Result<TileImage> {
        Ok(TileImage::new(bytes))
    }
}
