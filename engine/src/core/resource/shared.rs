use std::fmt;
use std::ops::Deref;
use std::ptr::NonNull;

use super::tracker::{self, Tracker};
use super::{ResourceError, WeakResource};

/// A shared, reference-counted handle to a resource, with a named owner per handle.
///
/// Every handle is registered under an owner name (typically the field or system holding it).
/// In debug builds [`owner_names`](Self::owner_names) lists the owners of every live handle,
/// which is how a resource that refuses to die gets traced back to whoever still holds it.
///
/// The value is dropped exactly once, when the last shared handle goes away. Weak handles
/// ([`WeakResource`]) observe without keeping the value alive.
///
/// Handles are neither `Send` nor `Sync`: the counters are plain integers and a resource is
/// managed from one thread, typically the render thread.
///
/// ```rust,ignore
/// let texture = SharedResource::new(Texture::new(..), "terrain.heightmap");
/// let pass_copy = texture.share_as("shadow_pass.input");
/// assert_eq!(texture.use_count(), 2);
/// ```
pub struct SharedResource<T> {
    tracker: Option<NonNull<Tracker<T>>>,
    owner: u64,
}

impl<T> SharedResource<T> {
    /// A handle to nothing. Not tracked; `use_count()` is zero.
    pub const fn empty() -> Self {
        Self {
            tracker: None,
            owner: 0,
        }
    }

    /// A tracked handle without a value, registered under `name`. Used for slots that are
    /// assigned a real resource later.
    pub fn named(name: &str) -> Self {
        let (tracker, owner) = Tracker::allocate(None, name);
        Self {
            tracker: Some(tracker),
            owner,
        }
    }

    /// Take ownership of `value` with a use count of one.
    pub fn new(value: T, name: &str) -> Self {
        let (tracker, owner) = Tracker::allocate(Some(value), name);
        Self {
            tracker: Some(tracker),
            owner,
        }
    }

    /// Promote a weak handle, failing with [`ResourceError::Stale`] if every shared handle is
    /// already gone.
    pub fn from_weak(weak: &WeakResource<T>, name: &str) -> Result<Self, ResourceError> {
        weak.lock(name).ok_or(ResourceError::Stale)
    }

    /// Build a handle for an existing tracker after registering a new strong reference on it.
    pub(super) fn register(tracker: NonNull<Tracker<T>>, name: &str) -> Self {
        // SAFETY: callers pass a tracker kept alive by a handle they hold.
        let owner = unsafe { tracker.as_ref() }.acquire_strong(name);
        Self {
            tracker: Some(tracker),
            owner,
        }
    }

    fn tracker(&self) -> Option<&Tracker<T>> {
        // SAFETY: a tracker stays alive while this handle's strong reference is registered.
        self.tracker.map(|t| unsafe { &*t.as_ptr() })
    }

    /// Another handle to the same resource, registered under a different owner name.
    pub fn share_as(&self, name: &str) -> Self {
        match self.tracker {
            Some(tracker) => Self::register(tracker, name),
            None => Self::empty(),
        }
    }

    /// Re-register this handle under a new owner name without touching the resource.
    pub fn rename(&mut self, name: &str) {
        if let Some(tracker) = self.tracker() {
            tracker.rename(self.owner, name);
        }
    }

    /// Move the resource out of this handle, leaving it empty. Counts are unchanged.
    pub fn take(&mut self) -> Self {
        std::mem::take(self)
    }

    /// The managed value, if there is one.
    pub fn get(&self) -> Option<&T> {
        self.tracker().and_then(Tracker::value)
    }

    /// True if there is no value behind this handle (empty or named-empty).
    pub fn is_empty(&self) -> bool {
        self.get().is_none()
    }

    /// True if this handle shares a tracker, even one without a value.
    pub fn is_tracked(&self) -> bool {
        self.tracker.is_some()
    }

    /// Drop this handle's share and become empty.
    pub fn reset(&mut self) {
        if let Some(tracker) = self.tracker.take() {
            // SAFETY: this handle owned the strong reference registered as `self.owner` and
            // has just been detached from the tracker.
            unsafe { tracker::release_strong(tracker, self.owner) };
        }
    }

    /// Number of shared handles, zero if untracked.
    pub fn use_count(&self) -> usize {
        self.tracker().map_or(0, Tracker::strong)
    }

    /// Number of weak handles observing the resource.
    pub fn weak_count(&self) -> usize {
        self.tracker().map_or(0, Tracker::weak_handles)
    }

    /// The owner name of this handle. Empty in release builds.
    pub fn owner_name(&self) -> String {
        self.tracker()
            .map(|t| t.owner_name(self.owner))
            .unwrap_or_default()
    }

    /// Owner names of every live shared handle, oldest first. Empty in release builds.
    pub fn owner_names(&self) -> Vec<String> {
        self.tracker().map(Tracker::owner_names).unwrap_or_default()
    }

    /// A weak handle to the same resource.
    pub fn downgrade(&self) -> WeakResource<T> {
        match self.tracker {
            Some(tracker) => WeakResource::register(tracker),
            None => WeakResource::new(),
        }
    }

    /// True if both handles share one tracker (or both are empty).
    pub fn ptr_eq(&self, other: &Self) -> bool {
        self.tracker == other.tracker
    }
}

impl<T> Default for SharedResource<T> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<T> Clone for SharedResource<T> {
    /// Share under the same owner name.
    fn clone(&self) -> Self {
        match self.tracker {
            Some(tracker) => Self::register(tracker, &self.owner_name()),
            None => Self::empty(),
        }
    }
}

impl<T> Drop for SharedResource<T> {
    fn drop(&mut self) {
        self.reset();
    }
}

impl<T> Deref for SharedResource<T> {
    type Target = T;

    /// # Panics
    ///
    /// Panics if the handle has no value.
    fn deref(&self) -> &T {
        match self.get() {
            Some(value) => value,
            None => panic!("dereferenced an empty SharedResource"),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for SharedResource<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedResource")
            .field("value", &self.get())
            .field("use_count", &self.use_count())
            .field("owner", &self.owner_name())
            .finish()
    }
}
