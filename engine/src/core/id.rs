//! Interval based id allocation.
//!
//! [`IdManager`] hands out unique, non-zero `u32` ids and takes them back for reuse. Free ids
//! are tracked as a set of disjoint half-open intervals rather than one entry per id, so a
//! fresh manager covering the whole id space costs a single interval.
//!
//! ```rust,ignore
//! let mut ids = IdManager::new();
//! let a = ids.get_id(); // 1
//! let b = ids.get_id(); // 2
//! assert!(ids.free_id(a));
//! assert!(!ids.free_id(a)); // already free
//! assert_eq!(ids.get_id(), a); // lowest free id is reused first
//! ```
//!
//! The manager itself requires `&mut self`. [`SyncIdManager`] is the thread-safe policy: the
//! same operations behind a mutex held for their whole duration.

use std::collections::BTreeMap;
use std::sync::Mutex;

/// The null id. Never issued; returned by [`IdManager::get_id`] when the id space is exhausted.
pub const NULL_ID: u32 = 0;

/// Exclusive upper bound of the default id space.
pub const MAX_ID: u32 = u32::MAX;

/// Allocator of unique integer ids backed by a free list of intervals.
///
/// # Invariant
///
/// `free` maps interval start to exclusive end. Intervals are non-empty, sorted,
/// non-overlapping and never adjacent: two touching intervals are always merged.
#[derive(Debug, Clone)]
pub struct IdManager {
    free: BTreeMap<u32, u32>,
    limit: u32,
}

impl IdManager {
    /// A manager issuing ids from `1..MAX_ID`.
    pub fn new() -> Self {
        Self::with_limit(MAX_ID)
    }

    /// A manager issuing ids from `1..limit`. A limit of 0 or 1 yields an empty manager.
    pub fn with_limit(limit: u32) -> Self {
        let mut free = BTreeMap::new();
        if limit > 1 {
            free.insert(1, limit);
        }
        Self { free, limit }
    }

    /// Take the lowest free id, or [`NULL_ID`] when none are left.
    pub fn get_id(&mut self) -> u32 {
        let Some(mut first) = self.free.first_entry() else {
            return NULL_ID;
        };
        let id = *first.key();
        let end = *first.get();
        first.remove();
        if id + 1 < end {
            self.free.insert(id + 1, end);
        }
        id
    }

    /// Return an id to the free list.
    ///
    /// Fails for [`NULL_ID`], for ids outside the managed range and for ids that are already
    /// free.
    pub fn free_id(&mut self, id: u32) -> bool {
        if id == NULL_ID || id >= self.limit {
            return false;
        }

        // The interval starting at or before `id`, if any.
        let before = self
            .free
            .range(..=id)
            .next_back()
            .map(|(&start, &end)| (start, end));
        if let Some((_, end)) = before
            && id < end
        {
            return false;
        }

        // `id + 1` cannot overflow: id < limit <= u32::MAX.
        let after_end = self.free.remove(&(id + 1));

        match (before, after_end) {
            // Bridges two intervals.
            (Some((start, end)), Some(next_end)) if end == id => {
                self.free.insert(start, next_end);
            }
            // Extends the previous interval upwards.
            (Some((start, end)), None) if end == id => {
                self.free.insert(start, id + 1);
            }
            // Extends the next interval downwards.
            (_, Some(next_end)) => {
                self.free.insert(id, next_end);
            }
            _ => {
                self.free.insert(id, id + 1);
            }
        }
        true
    }

    /// Whether `id` is currently free (and inside the managed range).
    pub fn is_free(&self, id: u32) -> bool {
        self.free
            .range(..=id)
            .next_back()
            .is_some_and(|(_, &end)| id < end)
    }

    /// Number of ids that can still be issued.
    pub fn available(&self) -> u64 {
        self.free
            .iter()
            .map(|(&start, &end)| (end - start) as u64)
            .sum()
    }

    /// Number of disjoint free intervals. Mostly useful to observe merging.
    pub fn intervals(&self) -> usize {
        self.free.len()
    }
}

impl Default for IdManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Thread-safe [`IdManager`]: each operation holds the lock for its full duration.
#[derive(Debug, Default)]
pub struct SyncIdManager {
    inner: Mutex<IdManager>,
}

impl SyncIdManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limit(limit: u32) -> Self {
        Self {
            inner: Mutex::new(IdManager::with_limit(limit)),
        }
    }

    /// See [`IdManager::get_id`].
    pub fn get_id(&self) -> u32 {
        self.lock().get_id()
    }

    /// See [`IdManager::free_id`].
    pub fn free_id(&self, id: u32) -> bool {
        self.lock().free_id(id)
    }

    /// See [`IdManager::available`].
    pub fn available(&self) -> u64 {
        self.lock().available()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, IdManager> {
        // The free list is always left consistent between statements, so a panic elsewhere
        // while holding the lock does not corrupt it.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
