//! Lifecycle of a single tile's image.

use crossbeam_channel::Sender;

use super::fetch::{FetchCompletion, FetchDispatcher, FetchTicket};
use super::image::TileImage;
use crate::core::bounds::Bounds;
use crate::core::geo::TileCoord;
use crate::runtime::AsyncHandle;

/// Where a tile is in its lifecycle.
///
/// `Unloaded -> Loading -> Loaded | Failed`, and `Loading -> Unloaded` on
/// cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TileState {
    Unloaded,
    Loading,
    Loaded,
    Failed,
}

/// What applying a fetch result did to a tile
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    Loaded,
    Failed,
    /// The result belonged to a fetch that was cancelled or superseded and
    /// was dropped.
    Stale,
}

struct PendingFetch {
    generation: u64,
    handle: Box<dyn AsyncHandle>,
}

/// One cache entry: a tile's state, image and placement on screen.
pub struct Tile {
    coord: TileCoord,
    state: TileState,
    screen_location: Bounds,
    image: Option<TileImage>,
    failure: Option<String>,
    pending: Option<PendingFetch>,
    multiplicity: u32,
    marked: bool,
}

impl Tile {
    pub fn new(coord: TileCoord) -> Self {
        Self {
            coord,
            state: TileState::Unloaded,
            screen_location: Bounds::default(),
            image: None,
            failure: None,
            pending: None,
            multiplicity: 0,
            marked: false,
        }
    }

    pub fn coord(&self) -> TileCoord {
        self.coord
    }

    pub fn state(&self) -> TileState {
        self.state
    }

    pub fn is_loaded(&self) -> bool {
        self.state == TileState::Loaded
    }

    pub fn is_loading(&self) -> bool {
        self.state == TileState::Loading
    }

    pub fn image(&self) -> Option<&TileImage> {
        self.image.as_ref()
    }

    /// Why the last fetch failed, while the tile is `Failed`
    pub fn failure_reason(&self) -> Option<&str> {
        self.failure.as_deref()
    }

    pub fn screen_location(&self) -> Bounds {
        self.screen_location
    }

    pub fn set_screen_location(&mut self, location: Bounds) {
        self.screen_location = location;
    }

    /// Generation of the fetch in flight, if any
    pub fn pending_generation(&self) -> Option<u64> {
        self.pending.as_ref().map(|p| p.generation)
    }

    /// Whether the fetch in flight has run to completion, its result possibly
    /// still waiting to be applied
    pub fn is_fetch_finished(&self) -> bool {
        self.pending.as_ref().is_some_and(|p| p.handle.is_finished())
    }

    /// Number of outstanding references held by tile rectangles
    pub fn multiplicity(&self) -> u32 {
        self.multiplicity
    }

    /// Set once nothing references the tile any more but it is kept around
    /// as a placeholder.
    pub fn is_marked(&self) -> bool {
        self.marked
    }

    pub(crate) fn retain(&mut self) {
        self.multiplicity = self.multiplicity.saturating_add(1);
        self.marked = false;
    }

    /// Drops one reference and returns the remaining count. Never goes
    /// below zero.
    pub(crate) fn release(&mut self) -> u32 {
        self.multiplicity = self.multiplicity.saturating_sub(1);
        self.multiplicity
    }

    pub(crate) fn clear_references(&mut self) {
        self.multiplicity = 0;
    }

    pub(crate) fn mark(&mut self) {
        self.marked = true;
    }

    /// Dispatches a fetch tagged with `generation` and moves to `Loading`.
    ///
    /// Only acts on an `Unloaded` tile; returns whether a fetch was started.
    pub fn start_load(
        &mut self,
        generation: u64,
        dispatcher: &dyn FetchDispatcher,
        reply: &Sender<FetchCompletion>,
    ) -> bool {
        if self.state != TileState::Unloaded {
            return false;
        }

        let ticket = FetchTicket {
            coord: self.coord,
            generation,
        };
        let handle = dispatcher.dispatch(ticket, reply.clone());
        self.pending = Some(PendingFetch { generation, handle });
        self.state = TileState::Loading;
        true
    }

    /// Cancels the fetch in flight and returns to `Unloaded`.
    ///
    /// Only acts on a `Loading` tile; returns whether anything was cancelled.
    /// A result for the cancelled fetch that arrives later is stale.
    pub fn cancel(&mut self) -> bool {
        if self.state != TileState::Loading {
            return false;
        }
        if let Some(pending) = self.pending.take() {
            pending.handle.cancel();
        }
        self.state = TileState::Unloaded;
        true
    }

    /// Like [`Tile::cancel`] but lets the fetch run to completion; its result
    /// will be stale.
    pub fn abandon(&mut self) -> bool {
        if self.state != TileState::Loading {
            return false;
        }
        self.pending = None;
        self.state = TileState::Unloaded;
        true
    }

    pub fn complete_with_image(&mut self, generation: u64, image: TileImage) -> Completion {
        if !self.accepts(generation) {
            return Completion::Stale;
        }
        self.pending = None;
        self.failure = None;
        self.image = Some(image);
        self.state = TileState::Loaded;
        Completion::Loaded
    }

    pub fn complete_with_failure(
        &mut self,
        generation: u64,
        reason: impl Into<String>,
    ) -> Completion {
        if !self.accepts(generation) {
            return Completion::Stale;
        }
        self.pending = None;
        self.failure = Some(reason.into());
        self.state = TileState::Failed;
        Completion::Failed
    }

    fn accepts(&self, generation: u64) -> bool {
        self.state == TileState::Loading && self.pending_generation() == Some(generation)
    }
}

impl std::fmt::Debug for Tile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tile")
            .field("coord", &self.coord)
            .field("state", &self.state)
            .field("screen_location", &self.screen_location)
            .field("pending_generation", &self.pending_generation())
            .field("multiplicity", &self.multiplicity)
            .field("marked", &self.marked)
            .finish()
    }
}
