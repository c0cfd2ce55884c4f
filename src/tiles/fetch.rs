//! Fetch dispatch.
//!
//! A fetch runs off the interaction sequence and reports back over a
//! channel. Each dispatched fetch carries the generation it was issued with,
//! so the cache can tell a current result from one that lost a race with
//! cancellation.

use crossbeam_channel::Sender;

use super::source::TileSource;
use crate::core::geo::TileCoord;
use crate::prelude::Arc;
use crate::runtime::{self, AsyncHandle};
use crate::Result;

/// Identity of one dispatched fetch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FetchTicket {
    pub coord: TileCoord,
    pub generation: u64,
}

/// The outcome of a fetch, delivered back to the cache
#[derive(Debug)]
pub struct FetchCompletion {
    pub ticket: FetchTicket,
    pub result: Result<Vec<u8>>,
}

/// Starts fetches on behalf of tiles.
///
/// Implementations must deliver at most one [`FetchCompletion`] per ticket
/// through `reply`, from any thread. They must never touch the cache
/// directly.
pub trait FetchDispatcher: Send + Sync {
    fn dispatch(&self, ticket: FetchTicket, reply: Sender<FetchCompletion>) -> Box<dyn AsyncHandle>;
}

/// Fetches tile bytes from a [`TileSource`] on the global runtime.
pub struct SourceFetcher {
    source: Arc<dyn TileSource>,
}

impl SourceFetcher {
    pub fn new(source: Arc<dyn TileSource>) -> Self {
        Self { source }
    }

    pub fn source(&self) -> &Arc<dyn TileSource> {
        &self.source
    }
}

impl FetchDispatcher for SourceFetcher {
    fn dispatch(
        &self,
        ticket: FetchTicket,
        reply: Sender<FetchCompletion>,
    ) -> Box<dyn AsyncHandle> {
        let source = Arc::clone(&self.source);
        log::debug!("fetching tile {} (generation {})", ticket.coord, ticket.generation);

        runtime::spawn(async move {
            let result = source.fetch_tile(ticket.coord).await;
            if reply.send(FetchCompletion { ticket, result }).is_err() {
                // Receiver gone: the cache was dropped while we were in flight
                log::debug!("dropping result for tile {}, cache is gone", ticket.coord);
            }
        })
    }
}

impl std::fmt::Debug for SourceFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceFetcher")
            .field("source", &self.source.unique_cache_key())
            .finish()
    }
}
