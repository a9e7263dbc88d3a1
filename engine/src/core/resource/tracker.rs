use std::cell::{Cell, UnsafeCell};
use std::ptr::NonNull;

#[cfg(debug_assertions)]
use std::{cell::RefCell, collections::BTreeMap};

/// Shared bookkeeping behind a group of [`SharedResource`](super::SharedResource) and
/// [`WeakResource`](super::WeakResource) handles.
///
/// # Counting
///
/// - `strong` counts live shared handles. When it reaches zero the value is dropped.
/// - `weak` counts live weak handles plus one reference held collectively by the strong
///   handles. That reference is released right after the value is dropped, so `weak` can only
///   reach zero once `strong` is zero. When it does, the tracker itself is freed.
///
/// Counters are plain cells: a tracker and every handle to it stay on one thread.
pub(super) struct Tracker<T> {
    value: UnsafeCell<Option<T>>,
    strong: Cell<usize>,
    weak: Cell<usize>,
    next_owner: Cell<u64>,
    /// Owner key of each live shared handle mapped to its owner name.
    #[cfg(debug_assertions)]
    owners: RefCell<BTreeMap<u64, String>>,
}

impl<T> Tracker<T> {
    /// Allocate a tracker with one strong handle registered under `name`. Returns the tracker
    /// and that handle's owner key.
    pub(super) fn allocate(value: Option<T>, name: &str) -> (NonNull<Tracker<T>>, u64) {
        let tracker = Box::new(Tracker {
            value: UnsafeCell::new(value),
            strong: Cell::new(0),
            weak: Cell::new(1),
            next_owner: Cell::new(0),
            #[cfg(debug_assertions)]
            owners: RefCell::new(BTreeMap::new()),
        });
        let owner = tracker.acquire_strong(name);
        (NonNull::from(Box::leak(tracker)), owner)
    }

    /// Register one more strong handle, returning its owner key.
    pub(super) fn acquire_strong(&self, #[allow(unused_variables)] name: &str) -> u64 {
        self.strong.set(self.strong.get() + 1);
        let owner = self.next_owner.get();
        self.next_owner.set(owner + 1);
        #[cfg(debug_assertions)]
        self.owners.borrow_mut().insert(owner, name.to_string());
        owner
    }

    pub(super) fn acquire_weak(&self) {
        self.weak.set(self.weak.get() + 1);
    }

    pub(super) fn strong(&self) -> usize {
        self.strong.get()
    }

    /// Weak handles, not counting the reference held by the strong group.
    pub(super) fn weak_handles(&self) -> usize {
        let weak = self.weak.get();
        if self.strong.get() > 0 { weak - 1 } else { weak }
    }

    /// The managed value, if any.
    ///
    /// The value is only written at allocation and when the last strong handle goes away, so
    /// a reference taken while a strong handle is alive stays valid for as long as that handle.
    pub(super) fn value(&self) -> Option<&T> {
        // SAFETY: see above; callers hold a strong handle for the lifetime of the borrow.
        unsafe { (*self.value.get()).as_ref() }
    }

    #[cfg(debug_assertions)]
    pub(super) fn rename(&self, owner: u64, name: &str) {
        if let Some(entry) = self.owners.borrow_mut().get_mut(&owner) {
            *entry = name.to_string();
        }
    }

    #[cfg(not(debug_assertions))]
    pub(super) fn rename(&self, _owner: u64, _name: &str) {}

    #[cfg(debug_assertions)]
    pub(super) fn owner_name(&self, owner: u64) -> String {
        self.owners
            .borrow()
            .get(&owner)
            .cloned()
            .unwrap_or_default()
    }

    #[cfg(not(debug_assertions))]
    pub(super) fn owner_name(&self, _owner: u64) -> String {
        String::new()
    }

    #[cfg(debug_assertions)]
    pub(super) fn owner_names(&self) -> Vec<String> {
        self.owners.borrow().values().cloned().collect()
    }

    #[cfg(not(debug_assertions))]
    pub(super) fn owner_names(&self) -> Vec<String> {
        Vec::new()
    }
}

/// Drop one strong handle.
///
/// # Safety
///
/// `tracker` must be live and the caller must own the strong handle registered as `owner`.
/// The handle must not be used afterwards.
pub(super) unsafe fn release_strong<T>(tracker: NonNull<Tracker<T>>, #[allow(unused_variables)] owner: u64) {
    // SAFETY: the caller's strong handle keeps the tracker alive until the end of this block.
    let value = unsafe {
        let t = tracker.as_ref();
        #[cfg(debug_assertions)]
        t.owners.borrow_mut().remove(&owner);
        debug_assert!(t.strong.get() > 0, "strong count underflow");
        t.strong.set(t.strong.get() - 1);
        if t.strong.get() > 0 {
            return;
        }
        (*t.value.get()).take()
    };

    // Dropping the value may drop weak handles to this same tracker; the strong group's weak
    // reference keeps it alive until after.
    drop(value);

    // SAFETY: the strong group's weak reference is still held.
    unsafe { release_weak(tracker) };
}

/// Drop one weak reference, freeing the tracker when it was the last.
///
/// # Safety
///
/// `tracker` must be live and the caller must own the weak reference being released.
pub(super) unsafe fn release_weak<T>(tracker: NonNull<Tracker<T>>) {
    // SAFETY: the caller's weak reference keeps the tracker alive.
    let remaining = unsafe {
        let t = tracker.as_ref();
        debug_assert!(t.weak.get() > 0, "weak count underflow");
        t.weak.set(t.weak.get() - 1);
        t.weak.get()
    };
    if remaining == 0 {
        // SAFETY: no strong or weak handles remain; the allocation came from `Box::leak`.
        drop(unsafe { Box::from_raw(tracker.as_ptr()) });
    }
}
