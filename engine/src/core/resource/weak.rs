use std::fmt;
use std::ptr::NonNull;

use super::SharedResource;
use super::tracker::{self, Tracker};

/// A non-owning handle to a [`SharedResource`].
///
/// A weak handle keeps the bookkeeping alive but not the value. Before use it has to be
/// promoted with [`lock`](Self::lock), which fails once every shared handle is gone.
pub struct WeakResource<T> {
    tracker: Option<NonNull<Tracker<T>>>,
}

impl<T> WeakResource<T> {
    /// A weak handle to nothing; always expired.
    pub const fn new() -> Self {
        Self { tracker: None }
    }

    pub(super) fn register(tracker: NonNull<Tracker<T>>) -> Self {
        // SAFETY: callers pass a tracker kept alive by a handle they hold.
        unsafe { tracker.as_ref() }.acquire_weak();
        Self {
            tracker: Some(tracker),
        }
    }

    fn tracker(&self) -> Option<&Tracker<T>> {
        // SAFETY: this handle's weak reference keeps the tracker alive.
        self.tracker.map(|t| unsafe { &*t.as_ptr() })
    }

    /// True once the resource has been dropped (or if this handle never pointed at one).
    pub fn expired(&self) -> bool {
        self.use_count() == 0
    }

    /// Number of shared handles still alive.
    pub fn use_count(&self) -> usize {
        self.tracker().map_or(0, Tracker::strong)
    }

    /// Promote to a shared handle registered under `name`, or `None` if the resource is gone.
    pub fn lock(&self, name: &str) -> Option<SharedResource<T>> {
        let tracker = self.tracker?;
        if self.expired() {
            return None;
        }
        Some(SharedResource::register(tracker, name))
    }

    /// Stop observing.
    pub fn reset(&mut self) {
        if let Some(tracker) = self.tracker.take() {
            // SAFETY: this handle owned one weak reference and is now detached.
            unsafe { tracker::release_weak(tracker) };
        }
    }
}

impl<T> Default for WeakResource<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for WeakResource<T> {
    fn clone(&self) -> Self {
        match self.tracker {
            Some(tracker) => Self::register(tracker),
            None => Self::new(),
        }
    }
}

impl<T> Drop for WeakResource<T> {
    fn drop(&mut self) {
        self.reset();
    }
}

impl<T> fmt::Debug for WeakResource<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakResource")
            .field("use_count", &self.use_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::resource::ResourceError;
    use std::cell::Cell;
    use std::rc::Rc;

    struct Probe(Rc<Cell<usize>>);

    impl Drop for Probe {
        fn drop(&mut self) {
            self.0.set(self.0.get() + 1);
        }
    }

    #[test]
    fn lock_succeeds_while_shared_handles_live() {
        // Given
        let shared = SharedResource::new(42u32, "owner");
        let weak = shared.downgrade();
        assert_eq!(shared.weak_count(), 1);

        // When
        let promoted = weak.lock("promoted").unwrap();

        // Then
        assert_eq!(*promoted, 42);
        assert_eq!(shared.use_count(), 2);
        assert!(promoted.ptr_eq(&shared));
    }

    #[test]
    fn lock_fails_after_last_shared_handle_drops() {
        // Given
        let drops = Rc::new(Cell::new(0));
        let shared = SharedResource::new(Probe(Rc::clone(&drops)), "owner");
        let copy = shared.clone();
        let weak = shared.downgrade();

        // When
        drop(shared);
        drop(copy);

        // Then
        assert_eq!(drops.get(), 1);
        assert!(weak.expired());
        assert!(weak.lock("late").is_none());
        assert!(matches!(
            SharedResource::from_weak(&weak, "late"),
            Err(ResourceError::Stale)
        ));
    }

    #[test]
    fn from_weak_promotes_live_resource() {
        let shared = SharedResource::new(String::from("atlas"), "owner");
        let weak = shared.downgrade();
        let promoted = SharedResource::from_weak(&weak, "pass").unwrap();
        assert_eq!(promoted.as_str(), "atlas");
        assert_eq!(weak.use_count(), 2);
    }

    #[test]
    fn weak_outliving_value_keeps_tracker_until_dropped() {
        // Given
        let shared = SharedResource::new(1u8, "owner");
        let weak = shared.downgrade();
        let weak_copy = weak.clone();
        assert_eq!(shared.weak_count(), 2);

        // When
        drop(shared);

        // Then - both weak handles still observe the dead tracker
        assert!(weak.expired());
        assert!(weak_copy.expired());
        drop(weak);
        assert!(weak_copy.lock("x").is_none());
    }

    #[test]
    fn value_holding_weak_to_itself_is_released() {
        use std::cell::RefCell;

        struct Node {
            this: RefCell<WeakResource<Node>>,
        }

        // Given - a value that observes its own tracker
        let shared = SharedResource::new(
            Node {
                this: RefCell::new(WeakResource::new()),
            },
            "node",
        );
        *shared.this.borrow_mut() = shared.downgrade();
        let outside = shared.downgrade();
        assert_eq!(shared.weak_count(), 2);

        // When - dropping the value drops the inner weak handle mid-release
        drop(shared);

        // Then
        assert!(outside.expired());
        assert!(outside.lock("late").is_none());
    }

    #[test]
    fn empty_weak_is_expired() {
        let weak: WeakResource<u32> = WeakResource::default();
        assert!(weak.expired());
        assert!(weak.lock("x").is_none());
        assert_eq!(weak.clone().use_count(), 0);
    }
}
