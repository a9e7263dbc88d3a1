use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, trace, warn};

use super::height::{HeightSource, TileOutput, compute_height_range};
use super::tile::{TileData, TileDataReference, TileId, TileState};
use crate::core::id::{IdManager, NULL_ID};
use crate::core::tasks::{PoolHandle, TaskError, TaskFuture};
use crate::core::time::Clock;

type Tile = Rc<RefCell<TileData>>;

/// Tile cache tuning.
#[derive(Debug, Clone, PartialEq)]
pub struct SupplierConfig {
    /// Disuse after which an active tile is demoted to idle.
    pub idle_timeout: Duration,
    /// Time spent idle after which a tile is deleted.
    pub expire_timeout: Duration,
    /// Upper bound on tiles produced (or dispatched) per `update`.
    pub max_tiles_per_frame: usize,
    /// Number of texture slots handed out to available tiles.
    pub texture_slots: u32,
    /// Keep a CPU copy of each tile's samples.
    pub keep_samples: bool,
}

impl SupplierConfig {
    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    pub fn with_expire_timeout(mut self, expire_timeout: Duration) -> Self {
        self.expire_timeout = expire_timeout;
        self
    }

    pub fn with_max_tiles_per_frame(mut self, max_tiles_per_frame: usize) -> Self {
        self.max_tiles_per_frame = max_tiles_per_frame;
        self
    }

    pub fn with_texture_slots(mut self, texture_slots: u32) -> Self {
        self.texture_slots = texture_slots;
        self
    }

    pub fn with_keep_samples(mut self, keep_samples: bool) -> Self {
        self.keep_samples = keep_samples;
        self
    }
}

impl Default for SupplierConfig {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(5),
            expire_timeout: Duration::from_secs(30),
            max_tiles_per_frame: 8,
            texture_slots: 1024,
            keep_samples: false,
        }
    }
}

/// Counters describing the cache at one point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SupplierStats {
    pub active: usize,
    pub idle: usize,
    pub pending: usize,
    pub in_flight: usize,
    /// Tiles that reached `Available` since creation.
    pub produced: u64,
    /// Tiles deleted by `update`, whether expired or released while idle.
    pub expired: u64,
}

/// A tile being computed on the pool.
struct InFlight {
    tile: Tile,
    output: TaskFuture<TileOutput>,
}

/// Cache of height-field tiles keyed by their snapped texel bounds.
///
/// Tiles are handed out as [`TileDataReference`]s. While a tile is *active* the supplier
/// holds one reference of its own, which keeps it alive between frames even when no caller
/// does. A tile unused for `idle_timeout` goes *idle*: the supplier lets go of its reference,
/// so an idle tile survives only as long as callers still hold references, and only until
/// `expire_timeout` has passed since it went idle. Asking for an idle tile brings it back.
///
/// Production is driven from [`update`](Self::update): requested tiles are queued, and each
/// frame the nearest few are computed, inline or on the thread pool when one was given.
///
/// ```rust,ignore
/// let mut supplier = TileSupplier::new(source, clock, SupplierConfig::default());
/// let tile = supplier.get_tile([0.0, 0.0], [0.25, 0.25]);
/// supplier.update();
/// assert!(tile.is_available());
/// ```
pub struct TileSupplier {
    source: Arc<dyn HeightSource>,
    clock: Arc<dyn Clock>,
    config: SupplierConfig,
    pool: Option<PoolHandle>,
    /// Active tiles, each with the supplier's own keep-alive reference.
    active: HashMap<TileId, TileDataReference>,
    idle: HashMap<TileId, Tile>,
    /// Sorted by distance, farthest first.
    pending: Vec<Tile>,
    /// Keyed by tile serial, so a result always lands on the tile it was computed for.
    in_flight: HashMap<u64, InFlight>,
    slots: IdManager,
    viewer: [f32; 2],
    next_serial: u64,
    produced: u64,
    expired: u64,
}

impl TileSupplier {
    pub fn new(source: Arc<dyn HeightSource>, clock: Arc<dyn Clock>, config: SupplierConfig) -> Self {
        let slots = IdManager::with_limit(config.texture_slots.saturating_add(1));
        Self {
            source,
            clock,
            config,
            pool: None,
            active: HashMap::new(),
            idle: HashMap::new(),
            pending: Vec::new(),
            in_flight: HashMap::new(),
            slots,
            viewer: [0.0, 0.0],
            next_serial: 1,
            produced: 0,
            expired: 0,
        }
    }

    /// Compute tiles on `pool` instead of inline. Results are picked up by later updates.
    pub fn with_pool(mut self, pool: PoolHandle) -> Self {
        self.pool = Some(pool);
        self
    }

    pub fn config(&self) -> &SupplierConfig {
        &self.config
    }

    /// Viewer position in normalized terrain space. Nearer tiles are produced first.
    pub fn set_viewer(&mut self, position: [f32; 2]) {
        self.viewer = position;
    }

    /// A reference to the tile covering the given rectangle, creating it if needed.
    ///
    /// A new tile is not available yet; it gets produced by a later [`update`](Self::update).
    pub fn get_tile(&mut self, offset: [f32; 2], size: [f32; 2]) -> TileDataReference {
        let id = TileId::from_rect(offset, size, self.source.resolution());
        let now = self.clock.now();
        let distance = self.distance_to(offset, size);

        if let Some(tile) = self.active.get(&id).and_then(TileDataReference::tile) {
            trace!("tile {} hit", id);
            {
                let mut data = tile.borrow_mut();
                touch(&mut data, now, distance);
                // Production failed earlier; asking again retries it.
                if data.state == TileState::None {
                    data.state = TileState::Requested;
                }
            }
            return TileDataReference::acquire(tile);
        }

        if let Some(tile) = self.idle.remove(&id) {
            if !tile.borrow().deleted {
                debug!("tile {} reactivated", id);
                {
                    let mut data = tile.borrow_mut();
                    data.idle = false;
                    touch(&mut data, now, distance);
                    if data.state == TileState::None {
                        data.state = TileState::Requested;
                    }
                }
                self.active.insert(id, TileDataReference::acquire(&tile));
                return TileDataReference::acquire(&tile);
            }
            debug!("tile {} released while idle", id);
            self.delete(&tile);
            self.expired += 1;
        }

        let serial = self.next_serial;
        self.next_serial += 1;
        let mut data = TileData::new(id, serial, offset, size, now);
        data.distance = distance;
        let tile = Rc::new(RefCell::new(data));
        trace!("tile {} created", id);
        self.active.insert(id, TileDataReference::acquire(&tile));
        TileDataReference::acquire(&tile)
    }

    /// Advance the cache by one frame.
    pub fn update(&mut self) {
        let now = self.clock.now();
        self.collect_completed();
        self.expire_idle(now);
        self.demote_unused(now);
        self.schedule();
    }

    /// Fold in background results. A result for a tile deleted in the meantime is dropped.
    /// Work the pool abandoned is requested again, and gets produced inline once the pool
    /// has stopped.
    fn collect_completed(&mut self) {
        let finished: Vec<(u64, Result<TileOutput, TaskError>)> = self
            .in_flight
            .iter()
            .filter_map(|(serial, flight)| match flight.output.try_wait() {
                Ok(None) => None,
                Ok(Some(output)) => Some((*serial, Ok(output))),
                Err(err) => Some((*serial, Err(err))),
            })
            .collect();

        for (serial, result) in finished {
            let Some(InFlight { tile, .. }) = self.in_flight.remove(&serial) else {
                continue;
            };
            if tile.borrow().deleted {
                trace!("dropping result for deleted tile {}", tile.borrow().id);
                continue;
            }
            match result {
                Ok(output) => self.make_available(&tile, output),
                Err(TaskError::Abandoned) => {
                    let mut data = tile.borrow_mut();
                    debug!("tile {} abandoned by the pool, requesting again", data.id);
                    data.state = if data.idle {
                        TileState::None
                    } else {
                        TileState::Requested
                    };
                }
                Err(TaskError::Panicked(message)) => {
                    let mut data = tile.borrow_mut();
                    warn!("producing tile {} failed: {}", data.id, message);
                    data.state = TileState::None;
                }
            }
        }
    }

    fn expire_idle(&mut self, now: Duration) {
        let expire_timeout = self.config.expire_timeout;
        let expired: Vec<TileId> = self
            .idle
            .iter()
            .filter(|(_, tile)| {
                let data = tile.borrow();
                data.deleted || now.saturating_sub(data.idle_since) > expire_timeout
            })
            .map(|(id, _)| *id)
            .collect();

        for id in expired {
            if let Some(tile) = self.idle.remove(&id) {
                debug!("tile {} expired", id);
                self.delete(&tile);
                self.expired += 1;
            }
        }
    }

    fn demote_unused(&mut self, now: Duration) {
        let idle_timeout = self.config.idle_timeout;
        let unused: Vec<TileId> = self
            .active
            .iter()
            .filter(|(_, keep_alive)| {
                keep_alive.with(|data| now.saturating_sub(data.last_used) > idle_timeout) == Some(true)
            })
            .map(|(id, _)| *id)
            .collect();

        for id in unused {
            let Some(mut keep_alive) = self.active.remove(&id) else {
                continue;
            };
            let Some(tile) = keep_alive.tile().cloned() else {
                continue;
            };
            {
                let mut data = tile.borrow_mut();
                data.idle = true;
                data.idle_since = now;
                if data.state == TileState::Requested {
                    data.state = TileState::None;
                }
            }
            keep_alive.release();

            if tile.borrow().deleted {
                debug!("tile {} dropped, no references left", id);
                self.delete(&tile);
                self.expired += 1;
            } else {
                debug!("tile {} idle", id);
                self.idle.insert(id, tile);
            }
        }
    }

    /// Queue requested tiles and produce the nearest ones.
    fn schedule(&mut self) {
        for keep_alive in self.active.values() {
            if let Some(tile) = keep_alive.tile() {
                let mut data = tile.borrow_mut();
                if data.state == TileState::Requested {
                    data.state = TileState::Pending;
                    self.pending.push(Rc::clone(tile));
                }
            }
        }

        self.pending.retain(|tile| !tile.borrow().deleted);
        if self.pending.is_empty() {
            return;
        }
        self.pending
            .sort_by(|a, b| b.borrow().distance.total_cmp(&a.borrow().distance));

        let take = self.config.max_tiles_per_frame.min(self.pending.len());
        let batch = self.pending.split_off(self.pending.len() - take);

        match self.pool.clone().filter(PoolHandle::is_running) {
            Some(pool) => self.dispatch(&pool, batch),
            None => {
                let keep_samples = self.config.keep_samples;
                for tile in batch.into_iter().rev() {
                    let id = tile.borrow().id;
                    let output = compute_height_range(self.source.as_ref(), id, keep_samples);
                    self.make_available(&tile, output);
                }
            }
        }
    }

    /// Submit one frame's tiles as a batch of our own, so other users of the pool are free to
    /// batch at the same time.
    fn dispatch(&mut self, pool: &PoolHandle, tiles: Vec<Tile>) {
        let keep_samples = self.config.keep_samples;
        let mut batch = pool.task_batch();
        for tile in tiles.into_iter().rev() {
            let (id, serial) = {
                let data = tile.borrow();
                (data.id, data.serial)
            };
            let source = Arc::clone(&self.source);
            let output = batch.run(move || compute_height_range(source.as_ref(), id, keep_samples));
            self.in_flight.insert(serial, InFlight { tile, output });
        }
        trace!("dispatched {} tiles", batch.len());
        batch.publish();
    }

    fn make_available(&mut self, tile: &Tile, output: TileOutput) {
        let slot = self.slots.get_id();
        let mut data = tile.borrow_mut();
        data.apply(output);
        if slot == NULL_ID {
            warn!("no texture slot left for tile {}", data.id);
        } else {
            data.texture_slot = Some(slot - 1);
        }
        self.produced += 1;
        trace!("tile {} available", data.id);
    }

    /// Delete a tile for good and give back its texture slot.
    fn delete(&mut self, tile: &Tile) {
        let mut data = tile.borrow_mut();
        data.deleted = true;
        if let Some(slot) = data.texture_slot.take() {
            self.slots.free_id(slot + 1);
        }
    }

    fn distance_to(&self, offset: [f32; 2], size: [f32; 2]) -> f32 {
        let dx = offset[0] + size[0] * 0.5 - self.viewer[0];
        let dy = offset[1] + size[1] * 0.5 - self.viewer[1];
        dx.hypot(dy)
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn idle_count(&self) -> usize {
        self.idle.len()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    pub fn stats(&self) -> SupplierStats {
        SupplierStats {
            active: self.active.len(),
            idle: self.idle.len(),
            pending: self.pending.len(),
            in_flight: self.in_flight.len(),
            produced: self.produced,
            expired: self.expired,
        }
    }
}

fn touch(data: &mut TileData, now: Duration, distance: f32) {
    data.last_used = now;
    data.distance = distance;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::tasks::ThreadPool;
    use crate::core::time::ManualClock;
    use crate::terrain::{HeightField, HeightRange};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;

    const IDLE: Duration = Duration::from_secs(5);
    const EXPIRE: Duration = Duration::from_secs(30);

    fn ramp() -> Arc<HeightField> {
        Arc::new(HeightField::from_fn(16, 16, |x, y| (x + y) as f32))
    }

    fn supplier_with(config: SupplierConfig) -> (TileSupplier, ManualClock) {
        let clock = ManualClock::new();
        let supplier = TileSupplier::new(ramp(), Arc::new(clock.clone()), config);
        (supplier, clock)
    }

    fn supplier() -> (TileSupplier, ManualClock) {
        supplier_with(SupplierConfig::default())
    }

    #[test]
    fn new_tile_becomes_available_on_update() {
        // Given
        let (mut supplier, _clock) = supplier();
        let tile = supplier.get_tile([0.0, 0.0], [0.25, 0.25]);
        assert!(tile.valid());
        assert_eq!(tile.state(), TileState::Requested);

        // When
        supplier.update();

        // Then - 0..4 on both axes of h = x + y
        assert!(tile.is_available());
        assert_eq!(tile.height_range(), Some(HeightRange { min: 0.0, max: 6.0 }));
        assert_eq!(tile.texture_slot(), Some(0));
        assert_eq!(supplier.stats().produced, 1);
    }

    #[test]
    fn held_reference_survives_idle_and_expiry_invalidates_it() {
        // Given
        let (mut supplier, clock) = supplier();
        let first = supplier.get_tile([0.5, 0.5], [0.25, 0.25]);
        let second = first.clone();
        assert!(!first.is_available());

        // When - idle timeout passes while the references are held
        clock.advance(IDLE + Duration::from_secs(1));
        supplier.update();

        // Then - demoted but not deleted
        assert!(first.valid());
        assert!(second.valid());
        assert_eq!(supplier.idle_count(), 1);
        assert_eq!(supplier.active_count(), 0);

        // When - one reference goes and the tile sits idle past the expire timeout
        drop(first);
        clock.advance(IDLE + Duration::from_secs(1));
        supplier.update();
        assert!(second.valid());
        clock.advance(EXPIRE);
        supplier.update();

        // Then
        assert!(!second.valid());
        assert_eq!(supplier.idle_count(), 0);
        assert_eq!(supplier.stats().expired, 1);
    }

    #[test]
    fn same_rect_while_active_shares_one_tile() {
        // Given
        let (mut supplier, _clock) = supplier();
        let a = supplier.get_tile([0.25, 0.25], [0.25, 0.25]);

        // When
        let b = supplier.get_tile([0.25, 0.25], [0.25, 0.25]);
        supplier.update();

        // Then
        assert_eq!(a.with(TileData::serial), b.with(TileData::serial));
        assert_eq!(a.with(TileData::reference_count), Some(3));
        assert_eq!(supplier.active_count(), 1);
        assert_eq!(supplier.stats().produced, 1);
    }

    #[test]
    fn unreferenced_tile_is_dropped_when_demoted() {
        // Given
        let (mut supplier, clock) = supplier();
        let tile = supplier.get_tile([0.0, 0.0], [0.5, 0.5]);
        supplier.update();
        assert_eq!(tile.texture_slot(), Some(0));
        drop(tile);

        // When
        clock.advance(IDLE + Duration::from_millis(1));
        supplier.update();

        // Then - nothing kept it, and its slot is free again
        assert_eq!(supplier.active_count(), 0);
        assert_eq!(supplier.idle_count(), 0);
        let next = supplier.get_tile([0.5, 0.5], [0.5, 0.5]);
        supplier.update();
        assert_eq!(next.texture_slot(), Some(0));
    }

    #[test]
    fn idle_tile_is_reactivated_on_request() {
        // Given - an available tile that went idle while a caller held it
        let (mut supplier, clock) = supplier();
        let held = supplier.get_tile([0.0, 0.5], [0.25, 0.25]);
        supplier.update();
        clock.advance(IDLE + Duration::from_secs(1));
        supplier.update();
        assert_eq!(supplier.idle_count(), 1);

        // When
        let again = supplier.get_tile([0.0, 0.5], [0.25, 0.25]);

        // Then - same tile, active again, no new production
        assert_eq!(held.with(TileData::serial), again.with(TileData::serial));
        assert_eq!(supplier.active_count(), 1);
        assert_eq!(supplier.idle_count(), 0);
        assert!(again.is_available());
        assert_eq!(again.with(TileData::is_idle), Some(false));
        supplier.update();
        assert_eq!(supplier.stats().produced, 1);
    }

    #[test]
    fn requested_tile_reverts_to_none_when_idle_and_is_rerequested() {
        // Given - a request that never got scheduled
        let (mut supplier, clock) = supplier();
        let held = supplier.get_tile([0.75, 0.75], [0.25, 0.25]);

        // When - no update happens until it went idle
        clock.advance(IDLE + Duration::from_secs(1));
        supplier.update();

        // Then
        assert_eq!(held.state(), TileState::None);

        // When
        let again = supplier.get_tile([0.75, 0.75], [0.25, 0.25]);
        assert_eq!(again.state(), TileState::Requested);
        supplier.update();

        // Then
        assert!(held.is_available());
    }

    #[test]
    fn released_idle_tile_is_replaced_by_a_new_one() {
        // Given - an idle tile held by a single caller
        let (mut supplier, clock) = supplier();
        let held = supplier.get_tile([0.0, 0.0], [0.25, 0.25]);
        supplier.update();
        let serial = held.with(TileData::serial);
        clock.advance(IDLE + Duration::from_secs(1));
        supplier.update();

        // When - the last reference goes
        drop(held);
        let fresh = supplier.get_tile([0.0, 0.0], [0.25, 0.25]);

        // Then
        assert_ne!(fresh.with(TileData::serial), serial);
        assert_eq!(fresh.state(), TileState::Requested);
        assert_eq!(supplier.idle_count(), 0);
        assert_eq!(supplier.stats().expired, 1);
    }

    #[test]
    fn nearest_tiles_are_produced_first() {
        // Given - one tile per frame, viewer in the bottom-right corner
        let (mut supplier, _clock) = supplier_with(
            SupplierConfig::default().with_max_tiles_per_frame(1),
        );
        supplier.set_viewer([1.0, 1.0]);
        let far = supplier.get_tile([0.0, 0.0], [0.25, 0.25]);
        let near = supplier.get_tile([0.75, 0.75], [0.25, 0.25]);
        let middle = supplier.get_tile([0.5, 0.5], [0.25, 0.25]);

        // When / Then
        supplier.update();
        assert!(near.is_available());
        assert!(!middle.is_available());
        assert_eq!(supplier.pending_count(), 2);

        supplier.update();
        assert!(middle.is_available());
        assert!(!far.is_available());

        supplier.update();
        assert!(far.is_available());
        assert_eq!(supplier.pending_count(), 0);
    }

    #[test]
    fn exhausted_texture_slots_leave_tile_without_slot() {
        let (mut supplier, _clock) = supplier_with(SupplierConfig::default().with_texture_slots(1));
        let a = supplier.get_tile([0.0, 0.0], [0.25, 0.25]);
        let b = supplier.get_tile([0.5, 0.5], [0.25, 0.25]);

        supplier.update();

        assert!(a.is_available());
        assert!(b.is_available());
        let slots = [a.texture_slot(), b.texture_slot()];
        assert!(slots.contains(&Some(0)));
        assert!(slots.contains(&None));
    }

    #[test]
    fn samples_are_kept_when_configured() {
        let (mut supplier, _clock) = supplier_with(SupplierConfig::default().with_keep_samples(true));
        let tile = supplier.get_tile([0.0, 0.0], [0.125, 0.0625]);

        supplier.update();

        assert_eq!(
            tile.with(|data| data.samples().map(<[f32]>::to_vec)).flatten(),
            Some(vec![0.0, 1.0])
        );
    }

    #[test]
    fn pool_production_reaches_available_after_wait_idle() {
        // Given
        let pool = ThreadPool::new(2);
        let (supplier, _clock) = supplier();
        let mut supplier = supplier.with_pool(pool.handle());
        let tiles: Vec<_> = (0..4)
            .map(|i| supplier.get_tile([0.25 * i as f32, 0.0], [0.25, 0.25]))
            .collect();

        // When
        supplier.update();
        assert_eq!(supplier.in_flight_count(), 4);
        pool.wait_idle();
        supplier.update();

        // Then
        assert!(tiles.iter().all(TileDataReference::is_available));
        assert_eq!(supplier.in_flight_count(), 0);
        assert_eq!(supplier.stats().produced, 4);
    }

    /// Blocks every sample until opened.
    struct GatedSource {
        field: HeightField,
        open: AtomicBool,
    }

    impl HeightSource for GatedSource {
        fn resolution(&self) -> (u32, u32) {
            self.field.resolution()
        }

        fn sample_height(&self, x: u32, y: u32) -> f32 {
            while !self.open.load(Ordering::Acquire) {
                thread::yield_now();
            }
            self.field.sample_height(x, y)
        }
    }

    #[test]
    fn result_for_tile_deleted_in_flight_is_ignored() {
        // Given - a tile whose production is stuck on the gate
        let pool = ThreadPool::new(1);
        let source = Arc::new(GatedSource {
            field: HeightField::flat(8, 8, 1.0),
            open: AtomicBool::new(false),
        });
        let clock = ManualClock::new();
        let mut supplier = TileSupplier::new(
            Arc::clone(&source) as Arc<dyn HeightSource>,
            Arc::new(clock.clone()),
            SupplierConfig::default(),
        )
        .with_pool(pool.handle());
        let tile = supplier.get_tile([0.0, 0.0], [0.5, 0.5]);
        supplier.update();
        assert_eq!(supplier.in_flight_count(), 1);

        // When - the tile is dropped while its result is outstanding
        drop(tile);
        clock.advance(IDLE + Duration::from_secs(1));
        supplier.update();
        source.open.store(true, Ordering::Release);
        pool.wait_idle();
        supplier.update();

        // Then
        assert_eq!(supplier.in_flight_count(), 0);
        assert_eq!(supplier.stats().produced, 0);
        assert_eq!(supplier.active_count(), 0);
    }

    #[test]
    fn tiles_abandoned_by_a_stopped_pool_are_produced_inline() {
        // Given - the only worker is held until the pool stops, so both tiles stay queued
        let pool = ThreadPool::new(1);
        let watcher = pool.handle();
        pool.execute(move || {
            while watcher.is_running() {
                thread::yield_now();
            }
        });
        let (supplier, _clock) = supplier();
        let mut supplier = supplier.with_pool(pool.handle());
        let a = supplier.get_tile([0.0, 0.0], [0.25, 0.25]);
        let b = supplier.get_tile([0.5, 0.5], [0.25, 0.25]);
        supplier.update();
        assert_eq!(supplier.in_flight_count(), 2);

        // When
        drop(pool);
        supplier.update();

        // Then
        assert!(a.is_available());
        assert!(b.is_available());
        assert_eq!(supplier.in_flight_count(), 0);
        assert_eq!(supplier.pending_count(), 0);
        assert_eq!(supplier.stats().produced, 2);
    }

    #[test]
    fn update_inside_a_pool_wide_batch_does_not_conflict() {
        // Given
        let pool = ThreadPool::new(2);
        let (supplier, _clock) = supplier();
        let mut supplier = supplier.with_pool(pool.handle());
        let tile = supplier.get_tile([0.25, 0.25], [0.25, 0.25]);

        // When - the caller batches its own work around the frame update
        pool.batch(|pool| {
            pool.execute(|| {});
            supplier.update();
        });
        pool.wait_idle();
        supplier.update();

        // Then
        assert!(tile.is_available());
        assert!(!pool.batch_open());
    }

    /// Panics on the first sample, then behaves.
    struct FlakySource {
        field: HeightField,
        failed: AtomicBool,
    }

    impl HeightSource for FlakySource {
        fn resolution(&self) -> (u32, u32) {
            self.field.resolution()
        }

        fn sample_height(&self, x: u32, y: u32) -> f32 {
            if !self.failed.swap(true, Ordering::AcqRel) {
                panic!("sample read failed");
            }
            self.field.sample_height(x, y)
        }
    }

    #[test]
    fn failed_production_is_retried_when_asked_again() {
        // Given
        let pool = ThreadPool::new(1);
        let source = Arc::new(FlakySource {
            field: HeightField::flat(8, 8, 2.0),
            failed: AtomicBool::new(false),
        });
        let clock = ManualClock::new();
        let mut supplier =
            TileSupplier::new(source, Arc::new(clock), SupplierConfig::default()).with_pool(pool.handle());
        let tile = supplier.get_tile([0.0, 0.0], [0.5, 0.5]);

        // When - the first attempt panics
        supplier.update();
        pool.wait_idle();
        supplier.update();

        // Then
        assert_eq!(tile.state(), TileState::None);
        assert_eq!(supplier.in_flight_count(), 0);

        // When
        let again = supplier.get_tile([0.0, 0.0], [0.5, 0.5]);
        assert_eq!(again.state(), TileState::Requested);
        supplier.update();
        pool.wait_idle();
        supplier.update();

        // Then
        assert!(tile.is_available());
        assert_eq!(tile.height_range(), Some(HeightRange { min: 2.0, max: 2.0 }));
    }
}
