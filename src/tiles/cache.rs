//! The set of tiles currently wanted on screen.
//!
//! [`TileImageSet`] holds at most one [`Tile`] per coordinate, with an
//! explicit reference count per entry. Tile rectangles add and release
//! references; a tile is evicted once nothing references it, with one
//! exception: a loaded tile at a zoom other than the one being requested is
//! kept as a placeholder while it still overlaps the requested area, until a
//! better tile replaces it.
//!
//! Fetch results come back through a channel and are applied by
//! [`TileImageSet::process_completions`], on the same sequence that mutates
//! the set.

use crossbeam_channel::{unbounded, Receiver, Sender};
use std::time::Duration;

use super::fetch::{FetchCompletion, FetchDispatcher};
use super::image::{ImageDecoder, PassthroughDecoder, TileImage};
use super::scheme::{TileRect, TileScheme};
use super::tile::{Completion, Tile, TileState};
use crate::core::bounds::Bounds;
use crate::core::config::{CompetingOverlap, TileLoadingConfig};
use crate::core::geo::{Point, TileCoord};
use crate::core::viewport::ViewportProjection;
use crate::prelude::{Arc, HashMap};

/// Receives tiles as they become displayable and as they go away.
pub trait TileObserver: Send {
    /// A tile finished loading and can be drawn
    fn tile_added(&mut self, _coord: TileCoord, _image: &TileImage) {}

    /// A previously added tile was evicted
    fn tile_removed(&mut self, _coord: TileCoord) {}
}

#[derive(Debug, Clone)]
enum TileEvent {
    Added(TileCoord, TileImage),
    Removed(TileCoord),
}

/// Reference-counted collection of tiles keyed by coordinate.
pub struct TileImageSet {
    tiles: HashMap<TileCoord, Tile>,
    scheme: TileScheme,
    dispatcher: Arc<dyn FetchDispatcher>,
    decoder: Box<dyn ImageDecoder>,
    observer: Option<Box<dyn TileObserver>>,
    config: TileLoadingConfig,
    next_generation: u64,
    requested_zoom: Option<u8>,
    reply_tx: Sender<FetchCompletion>,
    reply_rx: Receiver<FetchCompletion>,
    events: Vec<TileEvent>,
    batch_depth: u32,
}

impl TileImageSet {
    pub fn new(
        scheme: TileScheme,
        dispatcher: Arc<dyn FetchDispatcher>,
        config: TileLoadingConfig,
    ) -> Self {
        let (reply_tx, reply_rx) = unbounded();
        Self {
            tiles: HashMap::default(),
            scheme,
            dispatcher,
            decoder: Box::new(PassthroughDecoder),
            observer: None,
            config,
            next_generation: 0,
            requested_zoom: None,
            reply_tx,
            reply_rx,
            events: Vec::new(),
            batch_depth: 0,
        }
    }

    pub fn with_decoder(mut self, decoder: Box<dyn ImageDecoder>) -> Self {
        self.decoder = decoder;
        self
    }

    pub fn set_observer(&mut self, observer: Box<dyn TileObserver>) {
        self.observer = Some(observer);
    }

    pub fn take_observer(&mut self) -> Option<Box<dyn TileObserver>> {
        self.observer.take()
    }

    pub fn scheme(&self) -> &TileScheme {
        &self.scheme
    }

    pub fn config(&self) -> &TileLoadingConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: TileLoadingConfig) {
        self.config = config;
    }

    /// Points the set at a new source. Existing tiles are evicted first since
    /// they belong to the old one.
    pub fn set_source(&mut self, scheme: TileScheme, dispatcher: Arc<dyn FetchDispatcher>) {
        self.remove_all_tiles();
        self.scheme = scheme;
        self.dispatcher = dispatcher;
        self.requested_zoom = None;
    }

    /// Zoom of the most recently added tile rectangle
    pub fn requested_zoom(&self) -> Option<u8> {
        self.requested_zoom
    }

    /// Runs `f` with observer notifications held back, then delivers them
    /// all at once. Batches nest.
    pub fn batch<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> R {
        self.batch_depth += 1;
        let result = f(self);
        self.batch_depth -= 1;
        self.flush_events();
        result
    }

    /// Takes one reference on every tile of `rect`, creating and starting to
    /// load tiles that are missing, and places them on screen.
    ///
    /// Returns the screen area covered by the rectangle's tiles, extended to
    /// include `display_bounds`.
    pub fn add_tiles(
        &mut self,
        rect: &TileRect,
        display_bounds: Bounds,
        viewport: &ViewportProjection,
    ) -> Bounds {
        self.requested_zoom = Some(rect.zoom());
        let reference = viewport.projected_center().easting;
        let mut covered = display_bounds;
        let mut started = 0usize;

        for coord in rect.iter() {
            let location = match self.scheme.projected_rect_for_tile_near(&coord, reference) {
                Ok(projected) => viewport.projected_rect_to_pixels(&projected),
                Err(e) => {
                    log::warn!("skipping tile {}: {}", coord, e);
                    continue;
                }
            };
            covered = covered.extend_with(&location);

            let tile = self.tiles.entry(coord).or_insert_with(|| Tile::new(coord));
            tile.retain();
            tile.set_screen_location(location);
            if tile.state() == TileState::Unloaded {
                self.next_generation += 1;
                if tile.start_load(self.next_generation, self.dispatcher.as_ref(), &self.reply_tx) {
                    started += 1;
                }
            }
        }

        log::debug!(
            "added {} tiles at zoom {} ({} fetches started, {} cached)",
            rect.len(),
            rect.zoom(),
            started,
            self.tiles.len()
        );
        self.flush_events();
        covered
    }

    /// Releases one reference on every tile of `rect`
    pub fn remove_tiles(&mut self, rect: &TileRect) {
        for coord in rect.iter() {
            self.release(coord);
        }
        self.flush_events();
    }

    /// Releases one reference on `coord`
    pub fn remove_tile(&mut self, coord: TileCoord) {
        self.release(coord);
        self.flush_events();
    }

    /// Drops every reference without evicting anything. Loaded tiles become
    /// placeholders; the next [`TileImageSet::add_tiles`] takes references
    /// afresh and [`TileImageSet::remove_tiles_outside_of`] clears the rest.
    pub fn release_all_references(&mut self) {
        for tile in self.tiles.values_mut() {
            tile.clear_references();
            if tile.is_loaded() {
                tile.mark();
            }
        }
    }

    /// Evicts every tile that does not belong to `rect`.
    ///
    /// Loaded tiles at another zoom survive while their footprint overlaps
    /// `rect`; they are what is shown until the tiles of `rect` arrive. Such
    /// survivors hold no references and are marked as placeholders.
    pub fn remove_tiles_outside_of(&mut self, rect: &TileRect) {
        let zoom = rect.zoom();
        let doomed: Vec<TileCoord> = self
            .tiles
            .values()
            .filter(|tile| {
                let coord = tile.coord();
                if coord.z == zoom {
                    !rect.contains(&coord)
                } else {
                    !rect.overlaps(&coord) || !tile.is_loaded()
                }
            })
            .map(Tile::coord)
            .collect();

        if !doomed.is_empty() {
            log::debug!("evicting {} tiles outside of zoom {} rect", doomed.len(), zoom);
        }
        for coord in doomed {
            self.evict(coord);
        }
        for tile in self.tiles.values_mut().filter(|tile| tile.coord().z != zoom) {
            tile.clear_references();
            tile.mark();
        }
        self.flush_events();
    }

    /// Evicts every tile
    pub fn remove_all_tiles(&mut self) {
        let all: Vec<TileCoord> = self.tiles.keys().copied().collect();
        for coord in all {
            self.evict(coord);
        }
        self.flush_events();
    }

    /// Removes tiles at other zooms that cover the same ground as `coord`,
    /// which has just loaded.
    ///
    /// Whichever of two competing tiles has its zoom closer to
    /// `requested_zoom` wins; on a tie the tile at `coord` wins. Only
    /// unreferenced competitors are removed. A closer competitor only pushes
    /// `coord` out when `coord` is unreferenced and the competitor is loaded.
    pub fn remove_competing_tiles(&mut self, coord: TileCoord, requested_zoom: u8) {
        let Some(winner) = self.tiles.get(&coord) else {
            return;
        };
        let winner_unreferenced = winner.multiplicity() == 0;
        let own_distance = zoom_distance(coord.z, requested_zoom);
        let policy = self.config.competing_overlap;

        let mut losers = Vec::new();
        let mut evict_self = false;
        for tile in self.tiles.values() {
            let other = tile.coord();
            if other.z == coord.z || !competes(policy, &coord, &other) {
                continue;
            }
            if zoom_distance(other.z, requested_zoom) >= own_distance {
                if tile.multiplicity() == 0 {
                    losers.push(other);
                }
            } else if winner_unreferenced && tile.is_loaded() {
                evict_self = true;
            }
        }

        if evict_self {
            self.evict(coord);
        } else {
            for loser in losers {
                self.evict(loser);
            }
        }
        self.flush_events();
    }

    /// Applies every fetch result received so far; returns how many changed
    /// a tile.
    pub fn process_completions(&mut self) -> usize {
        let completions: Vec<FetchCompletion> = self.reply_rx.try_iter().collect();
        if completions.is_empty() {
            return 0;
        }
        self.batch(|set| {
            completions
                .into_iter()
                .map(|completion| set.apply(completion))
                .filter(|outcome| *outcome != Completion::Stale)
                .count()
        })
    }

    /// Blocks until at least one fetch result arrives or `timeout` passes,
    /// then applies everything received. Returns how many results changed a
    /// tile.
    pub fn wait_for_completions(&mut self, timeout: Duration) -> usize {
        match self.reply_rx.recv_timeout(timeout) {
            Ok(first) => self.batch(|set| {
                let mut applied = usize::from(set.apply(first) != Completion::Stale);
                while let Ok(next) = set.reply_rx.try_recv() {
                    applied += usize::from(set.apply(next) != Completion::Stale);
                }
                applied
            }),
            Err(_) => 0,
        }
    }

    fn apply(&mut self, completion: FetchCompletion) -> Completion {
        let FetchCompletion { ticket, result } = completion;
        let Some(tile) = self.tiles.get_mut(&ticket.coord) else {
            log::debug!("dropping stale result for evicted tile {}", ticket.coord);
            return Completion::Stale;
        };

        let outcome = match result.and_then(|bytes| self.decoder.decode(bytes)) {
            Ok(image) => tile.complete_with_image(ticket.generation, image),
            Err(e) => tile.complete_with_failure(ticket.generation, e.to_string()),
        };

        match outcome {
            Completion::Loaded => {
                if let Some(image) = tile.image() {
                    self.events.push(TileEvent::Added(ticket.coord, image.clone()));
                }
                let requested = self.requested_zoom.unwrap_or(ticket.coord.z);
                self.remove_competing_tiles(ticket.coord, requested);
            }
            Completion::Failed => {
                log::warn!(
                    "tile {} failed: {}",
                    ticket.coord,
                    tile.failure_reason().unwrap_or("unknown error")
                );
            }
            Completion::Stale => {
                log::debug!(
                    "dropping stale result for tile {} (generation {})",
                    ticket.coord,
                    ticket.generation
                );
            }
        }
        outcome
    }

    /// Cancels every fetch in flight. The tiles stay in the set, unloaded,
    /// and start loading again the next time a rectangle adds them.
    pub fn cancel_loading(&mut self) {
        let mut cancelled = 0usize;
        for tile in self.tiles.values_mut() {
            if tile.cancel() {
                cancelled += 1;
            }
        }
        log::info!("cancelled {} tile fetches", cancelled);
    }

    pub fn image_for(&self, coord: &TileCoord) -> Option<&Tile> {
        self.tiles.get(coord)
    }

    pub fn contains(&self, coord: &TileCoord) -> bool {
        self.tiles.contains_key(coord)
    }

    /// Number of distinct coordinates held
    pub fn count(&self) -> usize {
        self.tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    /// References held on `coord`, zero if absent
    pub fn multiplicity(&self, coord: &TileCoord) -> u32 {
        self.tiles.get(coord).map(Tile::multiplicity).unwrap_or(0)
    }

    pub fn tiles(&self) -> impl Iterator<Item = &Tile> {
        self.tiles.values()
    }

    pub fn is_loading(&self) -> bool {
        self.tiles.values().any(Tile::is_loading)
    }

    /// Shifts every tile's screen location by `delta` pixels
    pub fn move_by(&mut self, delta: Point) {
        for tile in self.tiles.values_mut() {
            let moved = tile.screen_location().translated(delta);
            tile.set_screen_location(moved);
        }
    }

    /// Scales every tile's screen location by `factor` about `pivot`
    pub fn zoom_by_factor(&mut self, factor: f64, pivot: Point) {
        for tile in self.tiles.values_mut() {
            let scaled = tile.screen_location().scaled_about(factor, pivot);
            tile.set_screen_location(scaled);
        }
    }

    /// Recomputes every tile's screen location from `viewport`
    pub fn reposition(&mut self, viewport: &ViewportProjection) {
        let reference = viewport.projected_center().easting;
        for tile in self.tiles.values_mut() {
            let projected = self.scheme.projected_rect_for_tile_near(&tile.coord(), reference);
            if let Ok(projected) = projected {
                tile.set_screen_location(viewport.projected_rect_to_pixels(&projected));
            }
        }
    }

    /// Union of `display_bounds` and the screen locations of the cached
    /// tiles of `rect`
    pub fn covered_bounds(&self, rect: &TileRect, display_bounds: Bounds) -> Bounds {
        rect.iter()
            .filter_map(|coord| self.tiles.get(&coord))
            .fold(display_bounds, |covered, tile| covered.extend_with(&tile.screen_location()))
    }

    pub fn log_debugging_information(&self) {
        let mut per_zoom: Vec<(u8, usize)> = Vec::new();
        let (mut unloaded, mut loading, mut loaded, mut failed) = (0, 0, 0, 0);
        for tile in self.tiles.values() {
            match tile.state() {
                TileState::Unloaded => unloaded += 1,
                TileState::Loading => loading += 1,
                TileState::Loaded => loaded += 1,
                TileState::Failed => failed += 1,
            }
            let z = tile.coord().z;
            match per_zoom.iter_mut().find(|(zoom, _)| *zoom == z) {
                Some((_, count)) => *count += 1,
                None => per_zoom.push((z, 1)),
            }
        }
        per_zoom.sort_unstable();

        log::debug!(
            "tile set: {} tiles ({} unloaded, {} loading, {} loaded, {} failed), \
             requested zoom {:?}",
            self.tiles.len(),
            unloaded,
            loading,
            loaded,
            failed,
            self.requested_zoom
        );
        for (zoom, count) in per_zoom {
            log::debug!("  zoom {}: {} tiles", zoom, count);
        }
    }

    fn release(&mut self, coord: TileCoord) {
        let requested = self.requested_zoom;
        let Some(tile) = self.tiles.get_mut(&coord) else {
            return;
        };
        if tile.release() > 0 {
            return;
        }
        if tile.is_loaded() && requested.is_some_and(|z| z != coord.z) {
            tile.mark();
        } else {
            self.evict(coord);
        }
    }

    fn evict(&mut self, coord: TileCoord) {
        let Some(mut tile) = self.tiles.remove(&coord) else {
            return;
        };
        if self.config.cancel_on_evict {
            tile.cancel();
        } else {
            tile.abandon();
        }
        if tile.is_loaded() {
            self.events.push(TileEvent::Removed(coord));
        }
    }

    fn flush_events(&mut self) {
        if self.batch_depth > 0 || self.events.is_empty() {
            return;
        }
        let events = std::mem::take(&mut self.events);
        let Some(observer) = self.observer.as_mut() else {
            return;
        };
        for event in events {
            match event {
                TileEvent::Added(coord, image) => observer.tile_added(coord, &image),
                TileEvent::Removed(coord) => observer.tile_removed(coord),
            }
        }
    }
}

impl std::fmt::Debug for TileImageSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TileImageSet")
            .field("tiles", &self.tiles.len())
            .field("requested_zoom", &self.requested_zoom)
            .field("next_generation", &self.next_generation)
            .field("config", &self.config)
            .finish()
    }
}

fn zoom_distance(zoom: u8, requested: u8) -> u8 {
    zoom.abs_diff(requested)
}

fn competes(policy: CompetingOverlap, loaded: &TileCoord, other: &TileCoord) -> bool {
    match policy {
        CompetingOverlap::Intersecting => loaded.overlaps(other),
        CompetingOverlap::Contained => loaded.contains(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::geo::{LatLng, ProjectedRect};
    use crate::core::projection::Projection;
    use crate::runtime::AsyncHandle;
    use crate::tiles::fetch::FetchTicket;
    use crate::MapError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct Handle {
        coord: TileCoord,
        cancels: Arc<Mutex<Vec<TileCoord>>>,
    }

    impl AsyncHandle for Handle {
        fn is_finished(&self) -> bool {
            false
        }

        fn cancel(&self) {
            self.cancels.lock().unwrap().push(self.coord);
        }
    }

    #[derive(Default)]
    struct Recording {
        dispatched: Mutex<Vec<(FetchTicket, Sender<FetchCompletion>)>>,
        cancels: Arc<Mutex<Vec<TileCoord>>>,
    }

    impl Recording {
        fn dispatched(&self) -> usize {
            self.dispatched.lock().unwrap().len()
        }

        fn ticket_for(&self, coord: TileCoord) -> FetchTicket {
            self.dispatched
                .lock()
                .unwrap()
                .iter()
                .rev()
                .find(|(ticket, _)| ticket.coord == coord)
                .map(|(ticket, _)| *ticket)
                .unwrap()
        }

        fn complete(&self, coord: TileCoord, bytes: &[u8]) {
            let dispatched = self.dispatched.lock().unwrap();
            let (ticket, reply) = dispatched.iter().rev().find(|(t, _)| t.coord == coord).unwrap();
            reply
                .send(FetchCompletion {
                    ticket: *ticket,
                    result: Ok(bytes.to_vec()),
                })
                .unwrap();
        }

        fn fail(&self, coord: TileCoord) {
            let dispatched = self.dispatched.lock().unwrap();
            let (ticket, reply) = dispatched.iter().rev().find(|(t, _)| t.coord == coord).unwrap();
            reply
                .send(FetchCompletion {
                    ticket: *ticket,
                    result: Err(MapError::FetchFailed("404".to_string())),
                })
                .unwrap();
        }
    }

    impl FetchDispatcher for Recording {
        fn dispatch(
            &self,
            ticket: FetchTicket,
            reply: Sender<FetchCompletion>,
        ) -> Box<dyn AsyncHandle> {
            self.dispatched.lock().unwrap().push((ticket, reply));
            Box::new(Handle {
                coord: ticket.coord,
                cancels: Arc::clone(&self.cancels),
            })
        }
    }

    #[derive(Default, Clone)]
    struct Events {
        added: Arc<Mutex<Vec<TileCoord>>>,
        removed: Arc<Mutex<Vec<TileCoord>>>,
        calls: Arc<AtomicUsize>,
    }

    impl TileObserver for Events {
        fn tile_added(&mut self, coord: TileCoord, _image: &TileImage) {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.added.lock().unwrap().push(coord);
        }

        fn tile_removed(&mut self, coord: TileCoord) {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.removed.lock().unwrap().push(coord);
        }
    }

    struct Fixture {
        set: TileImageSet,
        recording: Arc<Recording>,
        viewport: ViewportProjection,
        events: Events,
    }

    fn fixture(config: TileLoadingConfig) -> Fixture {
        let projection = Arc::new(Projection::google());
        let scheme = TileScheme::new(Arc::clone(&projection), 0, 18, 256).unwrap();
        let recording = Arc::new(Recording::default());
        let mut set = TileImageSet::new(scheme, recording.clone(), config);
        let events = Events::default();
        set.set_observer(Box::new(events.clone()));

        let center = projection.to_projected(LatLng::new(-33.8588, 151.2016));
        let viewport = ViewportProjection::new(
            projection,
            Bounds::from_coords(0.0, 0.0, 320.0, 480.0),
            center,
            19.109,
        )
        .unwrap();
        Fixture {
            set,
            recording,
            viewport,
            events,
        }
    }

    fn rect(x: u32, y: u32, z: u8, count_x: u32, count_y: u32) -> TileRect {
        TileRect::new(TileCoord::new(x, y, z), count_x, count_y)
    }

    #[test]
    fn test_add_tiles_starts_each_fetch_once() {
        let mut f = fixture(TileLoadingConfig::default());
        let display = f.viewport.view_bounds();
        let r = rect(100, 200, 10, 3, 2);

        let covered = f.set.add_tiles(&r, display, &f.viewport);
        assert_eq!(f.set.count(), 6);
        assert_eq!(f.recording.dispatched(), 6);
        assert!(covered.contains_bounds(&display));
        assert!(f.set.is_loading());

        // Overlapping request bumps multiplicity, no new fetches
        f.set.add_tiles(&rect(101, 200, 10, 3, 2), display, &f.viewport);
        assert_eq!(f.set.count(), 8);
        assert_eq!(f.recording.dispatched(), 8);
        assert_eq!(f.set.multiplicity(&TileCoord::new(101, 200, 10)), 2);
        assert_eq!(f.set.multiplicity(&TileCoord::new(100, 200, 10)), 1);
    }

    #[test]
    fn test_release_never_goes_negative() {
        let mut f = fixture(TileLoadingConfig::default());
        let r = rect(5, 5, 4, 2, 2);
        f.set.add_tiles(&r, f.viewport.view_bounds(), &f.viewport);
        f.set.add_tiles(&r, f.viewport.view_bounds(), &f.viewport);

        f.set.remove_tiles(&r);
        assert_eq!(f.set.count(), 4);
        assert_eq!(f.set.multiplicity(&TileCoord::new(5, 5, 4)), 1);

        f.set.remove_tiles(&r);
        assert_eq!(f.set.count(), 0);
        assert_eq!(f.recording.cancels.lock().unwrap().len(), 4);

        // Releasing what is no longer there is harmless
        f.set.remove_tiles(&r);
        f.set.remove_tile(TileCoord::new(5, 5, 4));
        assert_eq!(f.set.count(), 0);
    }

    #[test]
    fn test_disjoint_removal_empties_and_cancels_once() {
        let mut f = fixture(TileLoadingConfig::default());
        let r = rect(10, 10, 6, 4, 3);
        f.set.add_tiles(&r, f.viewport.view_bounds(), &f.viewport);

        f.set.remove_tiles_outside_of(&rect(40, 40, 6, 2, 2));
        assert_eq!(f.set.count(), 0);

        let mut cancels = f.recording.cancels.lock().unwrap().clone();
        cancels.sort();
        let mut expected: Vec<TileCoord> = r.iter().collect();
        expected.sort();
        assert_eq!(cancels, expected);
    }

    #[test]
    fn test_completion_loads_and_notifies() {
        let mut f = fixture(TileLoadingConfig::default());
        let r = rect(3, 3, 3, 1, 1);
        let coord = TileCoord::new(3, 3, 3);
        f.set.add_tiles(&r, f.viewport.view_bounds(), &f.viewport);

        f.recording.complete(coord, b"png");
        assert_eq!(f.set.process_completions(), 1);
        let tile = f.set.image_for(&coord).unwrap();
        assert_eq!(tile.state(), TileState::Loaded);
        assert_eq!(tile.image().unwrap().data(), b"png");
        assert_eq!(*f.events.added.lock().unwrap(), vec![coord]);

        f.set.remove_tiles(&r);
        assert_eq!(*f.events.removed.lock().unwrap(), vec![coord]);
        // Loaded tiles have nothing to cancel
        assert!(f.recording.cancels.lock().unwrap().is_empty());
    }

    #[test]
    fn test_failure_does_not_stop_other_tiles() {
        let mut f = fixture(TileLoadingConfig::default());
        f.set.add_tiles(&rect(0, 0, 2, 2, 1), f.viewport.view_bounds(), &f.viewport);
        f.recording.fail(TileCoord::new(0, 0, 2));
        f.recording.complete(TileCoord::new(1, 0, 2), b"ok");

        assert_eq!(f.set.process_completions(), 2);
        let failed = f.set.image_for(&TileCoord::new(0, 0, 2)).unwrap();
        assert_eq!(failed.state(), TileState::Failed);
        assert!(failed.failure_reason().unwrap().contains("404"));
        assert!(f.set.image_for(&TileCoord::new(1, 0, 2)).unwrap().is_loaded());
    }

    #[test]
    fn test_result_after_eviction_is_dropped() {
        let mut f = fixture(TileLoadingConfig::default());
        let r = rect(7, 3, 13, 1, 1);
        let coord = TileCoord::new(7, 3, 13);
        f.set.add_tiles(&r, f.viewport.view_bounds(), &f.viewport);
        let old = f.recording.ticket_for(coord);

        f.set.remove_tiles(&r);
        f.recording.complete(coord, b"late");
        assert_eq!(f.set.process_completions(), 0);
        assert!(!f.set.contains(&coord));

        // Re-adding gets a fresh generation; the old result still does not apply
        f.set.add_tiles(&r, f.viewport.view_bounds(), &f.viewport);
        let new = f.recording.ticket_for(coord);
        assert!(new.generation > old.generation);
        let dispatched = f.recording.dispatched.lock().unwrap();
        dispatched[0]
            .1
            .send(FetchCompletion {
                ticket: old,
                result: Ok(b"late".to_vec()),
            })
            .unwrap();
        drop(dispatched);
        assert_eq!(f.set.process_completions(), 0);
        assert!(f.set.image_for(&coord).unwrap().is_loading());
    }

    #[test]
    fn test_cancel_loading_keeps_tiles_unloaded() {
        let mut f = fixture(TileLoadingConfig::default());
        let r = rect(0, 0, 3, 2, 2);
        f.set.add_tiles(&r, f.viewport.view_bounds(), &f.viewport);
        f.recording.complete(TileCoord::new(0, 0, 3), b"x");
        f.set.process_completions();

        f.set.cancel_loading();
        assert!(!f.set.is_loading());
        assert_eq!(f.set.count(), 4);
        assert_eq!(f.recording.cancels.lock().unwrap().len(), 3);
        assert!(f.set.image_for(&TileCoord::new(0, 0, 3)).unwrap().is_loaded());

        // Next add restarts the cancelled ones
        f.set.add_tiles(&r, f.viewport.view_bounds(), &f.viewport);
        assert_eq!(f.recording.dispatched(), 7);
    }

    #[test]
    fn test_placeholder_survives_until_replaced() {
        let mut f = fixture(TileLoadingConfig::default());
        let display = f.viewport.view_bounds();
        let coarse = rect(1, 1, 2, 1, 1);
        f.set.add_tiles(&coarse, display, &f.viewport);
        f.recording.complete(TileCoord::new(1, 1, 2), b"z2");
        f.set.process_completions();

        // Zoom in: the zoom 3 children take over
        let fine = rect(2, 2, 3, 2, 2);
        f.set.batch(|set| {
            set.add_tiles(&fine, display, &f.viewport);
            set.remove_tiles(&coarse);
            set.remove_tiles_outside_of(&fine);
        });
        let parent = f.set.image_for(&TileCoord::new(1, 1, 2)).unwrap();
        assert!(parent.is_marked());
        assert_eq!(f.set.count(), 5);

        // First child to load replaces the overlapping parent
        f.recording.complete(TileCoord::new(2, 2, 3), b"z3");
        f.set.process_completions();
        assert!(!f.set.contains(&TileCoord::new(1, 1, 2)));
        assert_eq!(*f.events.removed.lock().unwrap(), vec![TileCoord::new(1, 1, 2)]);
        assert_eq!(f.set.count(), 4);
    }

    #[test]
    fn test_leftover_references_do_not_pin_placeholders() {
        let mut f = fixture(TileLoadingConfig::default());
        let display = f.viewport.view_bounds();
        let coarse = rect(1, 1, 2, 1, 1);
        let parent = TileCoord::new(1, 1, 2);
        f.set.add_tiles(&coarse, display, &f.viewport);
        f.set.add_tiles(&coarse, display, &f.viewport);
        f.recording.complete(parent, b"z2");
        f.set.process_completions();
        assert_eq!(f.set.multiplicity(&parent), 2);

        let fine = rect(2, 2, 3, 2, 2);
        f.set.batch(|set| {
            set.add_tiles(&fine, display, &f.viewport);
            set.remove_tiles(&coarse);
            set.remove_tiles_outside_of(&fine);
        });
        assert_eq!(f.set.multiplicity(&parent), 0);
        assert!(f.set.image_for(&parent).unwrap().is_marked());

        f.recording.complete(TileCoord::new(3, 3, 3), b"z3");
        f.set.process_completions();
        assert!(!f.set.contains(&parent));
    }

    #[test]
    fn test_release_all_references_keeps_tiles() {
        let mut f = fixture(TileLoadingConfig::default());
        let display = f.viewport.view_bounds();
        let r = rect(10, 10, 5, 2, 1);
        f.set.add_tiles(&r, display, &f.viewport);
        f.set.add_tiles(&r, display, &f.viewport);
        f.recording.complete(TileCoord::new(10, 10, 5), b"loaded");
        f.set.process_completions();

        f.set.release_all_references();
        assert_eq!(f.set.count(), 2);
        assert!(f.set.tiles().all(|tile| tile.multiplicity() == 0));
        assert!(f.set.image_for(&TileCoord::new(10, 10, 5)).unwrap().is_marked());
        assert!(!f.set.image_for(&TileCoord::new(11, 10, 5)).unwrap().is_marked());
        assert!(f.recording.cancels.lock().unwrap().is_empty());

        f.set.add_tiles(&r, display, &f.viewport);
        assert!(f.set.tiles().all(|tile| tile.multiplicity() == 1 && !tile.is_marked()));
        assert_eq!(f.recording.dispatched(), 2);
    }

    #[test]
    fn test_contained_policy_keeps_coarser_placeholder() {
        let config = TileLoadingConfig {
            competing_overlap: CompetingOverlap::Contained,
            ..TileLoadingConfig::default()
        };
        let mut f = fixture(config);
        let display = f.viewport.view_bounds();
        let coarse = rect(1, 1, 2, 1, 1);
        f.set.add_tiles(&coarse, display, &f.viewport);
        f.recording.complete(TileCoord::new(1, 1, 2), b"z2");
        f.set.process_completions();

        let fine = rect(2, 2, 3, 2, 2);
        f.set.add_tiles(&fine, display, &f.viewport);
        f.set.remove_tiles(&coarse);
        f.recording.complete(TileCoord::new(2, 2, 3), b"z3");
        f.set.process_completions();

        // The parent is not inside the child, so it stays
        assert!(f.set.contains(&TileCoord::new(1, 1, 2)));
    }

    #[test]
    fn test_competing_tie_prefers_newly_loaded() {
        let mut f = fixture(TileLoadingConfig::default());
        let display = f.viewport.view_bounds();
        let coarse = TileCoord::new(1, 1, 2);
        let fine = TileCoord::new(4, 4, 4);
        f.set.add_tiles(&rect(1, 1, 2, 1, 1), display, &f.viewport);
        f.set.add_tiles(&rect(4, 4, 4, 1, 1), display, &f.viewport);
        f.recording.complete(coarse, b"z2");
        f.recording.complete(fine, b"z4");
        f.set.process_completions();
        // Both are still referenced, so neither pushed the other out
        assert!(f.set.contains(&coarse) && f.set.contains(&fine));

        // Move on to zoom 3; both become placeholders
        f.set.add_tiles(&rect(2, 2, 3, 1, 1), display, &f.viewport);
        f.set.remove_tile(coarse);
        f.set.remove_tile(fine);
        assert!(f.set.image_for(&coarse).unwrap().is_marked());
        assert!(f.set.image_for(&fine).unwrap().is_marked());

        // Zoom 2 and zoom 4 are equally far from 3: the tile passed in wins
        f.set.remove_competing_tiles(fine, 3);
        assert!(f.set.contains(&fine));
        assert!(!f.set.contains(&coarse));
        assert!(f.set.contains(&TileCoord::new(2, 2, 3)));

        // The requested zoom tile loads and replaces the remaining placeholder
        f.recording.complete(TileCoord::new(2, 2, 3), b"z3");
        f.set.process_completions();
        assert!(!f.set.contains(&fine));
        assert_eq!(f.set.count(), 1);
    }

    #[test]
    fn test_closer_loaded_competitor_evicts_unreferenced_tile() {
        let mut f = fixture(TileLoadingConfig::default());
        let display = f.viewport.view_bounds();
        let coarse = TileCoord::new(1, 1, 2);
        f.set.add_tiles(&rect(1, 1, 2, 1, 1), display, &f.viewport);
        f.set.add_tiles(&rect(2, 2, 3, 1, 1), display, &f.viewport);
        f.recording.complete(TileCoord::new(2, 2, 3), b"z3");
        f.recording.complete(coarse, b"z2");
        f.set.process_completions();
        f.set.remove_tile(coarse);
        assert!(f.set.image_for(&coarse).unwrap().is_marked());

        f.set.remove_competing_tiles(coarse, 3);
        assert!(!f.set.contains(&coarse));
        assert!(f.set.contains(&TileCoord::new(2, 2, 3)));
    }

    #[test]
    fn test_batch_delivers_events_together() {
        let mut f = fixture(TileLoadingConfig::default());
        let r = rect(0, 0, 1, 2, 1);
        f.set.add_tiles(&r, f.viewport.view_bounds(), &f.viewport);
        f.recording.complete(TileCoord::new(0, 0, 1), b"a");
        f.recording.complete(TileCoord::new(1, 0, 1), b"b");

        let calls = Arc::clone(&f.events.calls);
        f.set.batch(|set| {
            set.process_completions();
            assert_eq!(calls.load(Ordering::SeqCst), 0);
            set.remove_all_tiles();
            assert_eq!(calls.load(Ordering::SeqCst), 0);
        });
        assert_eq!(f.events.calls.load(Ordering::SeqCst), 4);
        assert!(f.set.is_empty());
    }

    #[test]
    fn test_screen_locations_follow_viewport() {
        let mut f = fixture(TileLoadingConfig::default());
        let center = f.viewport.projected_center();
        let tile = f.set.scheme().tile_for_projected_point(center, 13).unwrap();
        f.set.add_tiles(&TileRect::new(tile, 1, 1), f.viewport.view_bounds(), &f.viewport);

        let location = f.set.image_for(&tile).unwrap().screen_location();
        assert!(location.contains(&Point::new(160.0, 240.0)));
        let extent: ProjectedRect = f.set.scheme().projected_rect_for_tile(&tile).unwrap();
        let expected_width = extent.size.width / f.viewport.meters_per_pixel();
        assert!((location.width() - expected_width).abs() < 1e-6);

        f.set.move_by(Point::new(10.0, -5.0));
        let moved = f.set.image_for(&tile).unwrap().screen_location();
        assert!((moved.min.x - location.min.x - 10.0).abs() < 1e-9);
        assert!((moved.min.y - location.min.y + 5.0).abs() < 1e-9);

        f.set.zoom_by_factor(2.0, moved.min);
        let zoomed = f.set.image_for(&tile).unwrap().screen_location();
        assert_eq!(zoomed.min, moved.min);
        assert!((zoomed.width() - 2.0 * moved.width()).abs() < 1e-9);
    }

    #[test]
    fn test_evict_without_cancel_leaves_fetch_running() {
        let config = TileLoadingConfig {
            cancel_on_evict: false,
            ..TileLoadingConfig::default()
        };
        let mut f = fixture(config);
        let r = rect(0, 0, 2, 1, 1);
        f.set.add_tiles(&r, f.viewport.view_bounds(), &f.viewport);
        f.set.remove_tiles(&r);
        assert!(f.set.is_empty());
        assert!(f.recording.cancels.lock().unwrap().is_empty());

        f.recording.complete(TileCoord::new(0, 0, 2), b"late");
        assert_eq!(f.set.process_completions(), 0);
    }
}
