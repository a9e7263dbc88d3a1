use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::time::Duration;

use log::trace;

use super::height::{HeightRange, TileOutput};

/// Canonical key of a tile: its texel bounds `[x0, y0, x1, y1]`, max corner exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileId([u32; 4]);

impl TileId {
    pub const fn new(bounds: [u32; 4]) -> Self {
        Self(bounds)
    }

    /// Snap a rectangle in normalized terrain space onto the sample grid.
    ///
    /// The min corner is rounded down and the max corner up, so every rectangle that touches
    /// the same texels maps to the same id. Bounds are clamped to the grid and cover at least
    /// one texel per axis on a non-empty grid.
    pub fn from_rect(offset: [f32; 2], size: [f32; 2], resolution: (u32, u32)) -> Self {
        let (x0, x1) = snap(offset[0], size[0], resolution.0);
        let (y0, y1) = snap(offset[1], size[1], resolution.1);
        Self([x0, y0, x1, y1])
    }

    pub fn bounds(&self) -> [u32; 4] {
        self.0
    }

    pub fn width(&self) -> u32 {
        self.0[2] - self.0[0]
    }

    pub fn height(&self) -> u32 {
        self.0[3] - self.0[1]
    }

    pub fn texel_count(&self) -> usize {
        self.width() as usize * self.height() as usize
    }
}

impl fmt::Display for TileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [x0, y0, x1, y1] = self.0;
        write!(f, "[{x0},{y0}..{x1},{y1}]")
    }
}

fn snap(offset: f32, size: f32, samples: u32) -> (u32, u32) {
    if samples == 0 {
        return (0, 0);
    }
    let scale = samples as f32;
    let lo = (offset * scale).floor().clamp(0.0, scale - 1.0) as u32;
    let hi = ((offset + size) * scale).ceil().clamp(0.0, scale) as u32;
    (lo, hi.max(lo + 1))
}

/// Production state of a tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TileState {
    /// Nothing requested. An idle tile whose request never got scheduled falls back here.
    #[default]
    None,
    /// Wanted, not yet queued.
    Requested,
    /// Queued or being computed.
    Pending,
    /// Height range computed.
    Available,
}

/// One cached tile.
///
/// The production state and the two lifecycle flags are independent: an idle tile can be in
/// any state, and deletion is final whatever the state.
#[derive(Debug)]
pub struct TileData {
    pub(super) id: TileId,
    pub(super) serial: u64,
    pub(super) state: TileState,
    pub(super) idle: bool,
    pub(super) deleted: bool,
    pub(super) reference_count: usize,
    pub(super) texture_slot: Option<u32>,
    pub(super) offset: [f32; 2],
    pub(super) size: [f32; 2],
    pub(super) height_range: Option<HeightRange>,
    pub(super) samples: Option<Vec<f32>>,
    pub(super) last_used: Duration,
    pub(super) idle_since: Duration,
    pub(super) distance: f32,
}

impl TileData {
    pub(super) fn new(id: TileId, serial: u64, offset: [f32; 2], size: [f32; 2], now: Duration) -> Self {
        Self {
            id,
            serial,
            state: TileState::Requested,
            idle: false,
            deleted: false,
            reference_count: 0,
            texture_slot: None,
            offset,
            size,
            height_range: None,
            samples: None,
            last_used: now,
            idle_since: now,
            distance: 0.0,
        }
    }

    pub(super) fn apply(&mut self, output: TileOutput) {
        self.height_range = Some(output.range);
        self.samples = output.samples;
        self.state = TileState::Available;
    }

    pub fn id(&self) -> TileId {
        self.id
    }

    /// Distinguishes this tile from earlier tiles that had the same id.
    pub fn serial(&self) -> u64 {
        self.serial
    }

    pub fn state(&self) -> TileState {
        self.state
    }

    pub fn is_idle(&self) -> bool {
        self.idle
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted
    }

    pub fn reference_count(&self) -> usize {
        self.reference_count
    }

    pub fn texture_slot(&self) -> Option<u32> {
        self.texture_slot
    }

    pub fn offset(&self) -> [f32; 2] {
        self.offset
    }

    pub fn size(&self) -> [f32; 2] {
        self.size
    }

    pub fn height_range(&self) -> Option<HeightRange> {
        self.height_range
    }

    pub fn samples(&self) -> Option<&[f32]> {
        self.samples.as_deref()
    }

    pub fn last_used(&self) -> Duration {
        self.last_used
    }

    pub fn distance(&self) -> f32 {
        self.distance
    }
}

/// A counted reference to a cached tile.
///
/// Each reference adds one to the tile's reference count. When the count drops to zero the
/// tile is deleted for good, and every other reference still around reports `valid() ==
/// false` from then on. References are confined to the thread driving the supplier.
#[derive(Default)]
pub struct TileDataReference {
    tile: Option<Rc<RefCell<TileData>>>,
}

impl TileDataReference {
    /// An empty reference, never valid.
    pub const fn empty() -> Self {
        Self { tile: None }
    }

    pub(super) fn acquire(tile: &Rc<RefCell<TileData>>) -> Self {
        tile.borrow_mut().reference_count += 1;
        Self {
            tile: Some(Rc::clone(tile)),
        }
    }

    pub(super) fn tile(&self) -> Option<&Rc<RefCell<TileData>>> {
        self.tile.as_ref()
    }

    /// True while the tile behind this reference has not been deleted.
    pub fn valid(&self) -> bool {
        self.tile.as_ref().is_some_and(|tile| !tile.borrow().deleted)
    }

    pub fn id(&self) -> Option<TileId> {
        self.with(TileData::id)
    }

    /// The tile's production state, `None` for an empty reference.
    pub fn state(&self) -> TileState {
        self.with(TileData::state).unwrap_or_default()
    }

    pub fn is_available(&self) -> bool {
        self.valid() && self.state() == TileState::Available
    }

    pub fn height_range(&self) -> Option<HeightRange> {
        self.with(TileData::height_range).flatten()
    }

    pub fn texture_slot(&self) -> Option<u32> {
        self.with(TileData::texture_slot).flatten()
    }

    /// Read the tile. Deleted tiles can still be read; check [`valid`](Self::valid) first
    /// when that matters.
    pub fn with<R>(&self, f: impl FnOnce(&TileData) -> R) -> Option<R> {
        self.tile.as_ref().map(|tile| f(&tile.borrow()))
    }

    /// Give up this reference now instead of at drop.
    pub fn release(&mut self) {
        let Some(tile) = self.tile.take() else {
            return;
        };
        let mut data = tile.borrow_mut();
        data.reference_count = data.reference_count.saturating_sub(1);
        if data.reference_count == 0 && !data.deleted {
            data.deleted = true;
            trace!("tile {} lost its last reference", data.id);
        }
    }
}

impl Clone for TileDataReference {
    fn clone(&self) -> Self {
        match &self.tile {
            Some(tile) => Self::acquire(tile),
            None => Self::empty(),
        }
    }
}

impl Drop for TileDataReference {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for TileDataReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TileDataReference")
            .field("id", &self.id())
            .field("state", &self.state())
            .field("valid", &self.valid())
            .finish()
    }
}
