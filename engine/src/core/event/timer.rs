use std::cell::Cell;
use std::hash::{Hash, Hasher};
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Source of timer ids. Id 0 is reserved for the empty timer.
static NEXT_TIMER_ID: AtomicU64 = AtomicU64::new(1);

/// Liveness shared by every copy of one timer id.
#[derive(Debug)]
struct Tracker {
    valid: Cell<bool>,
}

/// Handle to a scheduled timeout or interval.
///
/// Copies share one tracker, so when the owning dispatcher fires or clears the timer every copy
/// observes it through [`TimerId::is_valid`]. The tracker lives until the last copy is dropped.
///
/// A `TimerId` belongs to the thread of the dispatcher that issued it.
#[derive(Debug, Clone, Default)]
pub struct TimerId {
    id: u64,
    tracker: Option<Rc<Tracker>>,
}

impl TimerId {
    /// Allocate a fresh, valid timer id.
    pub(crate) fn new() -> Self {
        Self {
            id: NEXT_TIMER_ID.fetch_add(1, Ordering::Relaxed),
            tracker: Some(Rc::new(Tracker {
                valid: Cell::new(true),
            })),
        }
    }

    /// The empty timer id. Never valid; clearing it always succeeds.
    pub fn empty() -> Self {
        Self::default()
    }

    /// The raw id. Zero for the empty timer.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// True if this is the empty timer.
    pub fn is_empty(&self) -> bool {
        self.id == 0 || self.tracker.is_none()
    }

    /// True while the timer is still scheduled with its dispatcher.
    pub fn is_valid(&self) -> bool {
        self.id != 0 && self.tracker.as_ref().is_some_and(|t| t.valid.get())
    }

    /// Mark every copy of this id as no longer scheduled.
    pub(crate) fn invalidate(&self) {
        if let Some(tracker) = &self.tracker {
            tracker.valid.set(false);
        }
    }

    /// Number of live copies sharing this id's tracker.
    pub fn share_count(&self) -> usize {
        self.tracker.as_ref().map_or(0, Rc::strong_count)
    }
}

impl PartialEq for TimerId {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for TimerId {}

impl Hash for TimerId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_ids_are_valid_and_unique() {
        let a = TimerId::new();
        let b = TimerId::new();
        assert!(a.is_valid());
        assert!(b.is_valid());
        assert_ne!(a, b);
        assert!(b.id() > a.id());
    }

    #[test]
    fn empty_id_is_never_valid() {
        let empty = TimerId::empty();
        assert!(empty.is_empty());
        assert!(!empty.is_valid());
        assert_eq!(empty.id(), 0);
        assert_eq!(empty.share_count(), 0);
        // Invalidating nothing is harmless.
        empty.invalidate();
    }

    #[test]
    fn invalidation_is_seen_by_every_copy() {
        // Given
        let timer = TimerId::new();
        let copy = timer.clone();
        assert_eq!(timer.share_count(), 2);

        // When
        timer.invalidate();

        // Then
        assert!(!timer.is_valid());
        assert!(!copy.is_valid());
        assert_eq!(timer, copy);

        drop(copy);
        assert_eq!(timer.share_count(), 1);
    }
}
