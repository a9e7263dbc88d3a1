//! Per-owner timers and typed events.
//!
//! An [`EventDispatcher`] owns two kinds of timed callbacks, both processed by
//! [`update()`](EventDispatcher::update) once per frame on the owning thread:
//!
//! - **Timeouts** fire once after a delay. They are kept in a deadline-ordered queue so each
//!   update only looks at the expired prefix. Equal deadlines fire in scheduling order.
//! - **Intervals** fire periodically with fixed-step catch-up. A long frame fires the callback
//!   once per elapsed period, but a backlog above [`MAX_CATCH_UP_TICKS`] is discarded rather
//!   than replayed.
//!
//! On top of that a dispatcher carries typed events: listeners registered per event type, and
//! *repeat* registrations that forward triggered events to other dispatchers, either every
//! event ([`repeat_all`](EventDispatcher::repeat_all)) or a single type
//! ([`repeat`](EventDispatcher::repeat)).
//!
//! # Teardown
//!
//! Repeat registrations are weak. In addition, dropping a dispatcher notifies every dispatcher
//! that repeats into it so they prune the registration right away.
//!
//! # Cycles
//!
//! A forward that comes back to a dispatcher already on the path of the same trigger is dropped,
//! so `A -> B -> A` delivers each event to each dispatcher once. Listeners may trigger other
//! events, and add or remove listeners, on their own dispatcher.

use std::any::{Any, TypeId};
use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::rc::{Rc, Weak};
use std::sync::Arc;
use std::time::Duration;

use log::{trace, warn};

use crate::core::event::TimerId;
use crate::core::time::{Clock, FixedStep};

/// Whole interval ticks an interval may fall behind before its backlog is dropped.
pub const MAX_CATCH_UP_TICKS: u64 = 10;

struct TimeoutEvent {
    callback: Box<dyn FnOnce()>,
    timer: TimerId,
    end: Duration,
}

struct IntervalEvent {
    callback: Box<dyn FnMut()>,
    timer: TimerId,
    step: FixedStep,
}

struct ListenerSlot {
    /// Cleared by `remove_listeners`, so a dispatch already under way skips it.
    live: Cell<bool>,
    callback: RefCell<Box<dyn FnMut(&dyn Any)>>,
}

type Listener = Rc<ListenerSlot>;

/// The part of a dispatcher other dispatchers can point at.
#[derive(Default)]
struct Node {
    listeners: RefCell<HashMap<TypeId, Vec<Listener>>>,
    repeat_all: RefCell<Vec<Weak<Node>>>,
    repeat_typed: RefCell<HashMap<TypeId, Vec<Weak<Node>>>>,
    /// Dispatchers that repeat into this one.
    sources: RefCell<Vec<Weak<Node>>>,
}

fn points_at(weak: &Weak<Node>, node: &Rc<Node>) -> bool {
    std::ptr::eq(weak.as_ptr(), Rc::as_ptr(node))
}

fn points_at_ptr(weak: &Weak<Node>, node: *const Node) -> bool {
    std::ptr::eq(weak.as_ptr(), node)
}

impl Node {
    /// `path` holds the dispatchers this trigger has already passed through.
    fn dispatch(&self, type_id: TypeId, event: &dyn Any, path: &mut Vec<*const Node>) {
        let this: *const Node = self;
        if path.contains(&this) {
            warn!("event repeat cycle detected, dropping re-entrant forward");
            return;
        }
        path.push(this);

        // Snapshot, so listeners can register or remove listeners while being called.
        let listeners: Vec<Listener> = self
            .listeners
            .borrow()
            .get(&type_id)
            .cloned()
            .unwrap_or_default();
        for listener in listeners {
            if !listener.live.get() {
                continue;
            }
            match listener.callback.try_borrow_mut() {
                Ok(mut callback) => (*callback)(event),
                Err(_) => trace!("listener already running, skipping nested delivery"),
            }
        }

        // Collect first: a forward may reach a dispatcher that registers or prunes on us.
        let mut targets: Vec<Rc<Node>> = self
            .repeat_all
            .borrow()
            .iter()
            .filter_map(Weak::upgrade)
            .collect();
        if let Some(typed) = self.repeat_typed.borrow().get(&type_id) {
            targets.extend(typed.iter().filter_map(Weak::upgrade));
        }
        for target in targets {
            target.dispatch(type_id, event, path);
        }
        path.pop();
    }

    /// Drop every registration pointing at `target`. Returns how many were removed.
    fn forget(&self, target: *const Node) -> usize {
        let mut removed = 0;
        let mut all = self.repeat_all.borrow_mut();
        let before = all.len();
        all.retain(|w| !points_at_ptr(w, target));
        removed += before - all.len();

        let mut typed = self.repeat_typed.borrow_mut();
        for list in typed.values_mut() {
            let before = list.len();
            list.retain(|w| !points_at_ptr(w, target));
            removed += before - list.len();
        }
        typed.retain(|_, list| !list.is_empty());
        removed
    }

    fn add_source(&self, source: &Rc<Node>) {
        let mut sources = self.sources.borrow_mut();
        if !sources.iter().any(|w| points_at(w, source)) {
            sources.push(Rc::downgrade(source));
        }
    }

    fn remove_source(&self, source: *const Node) {
        self.sources
            .borrow_mut()
            .retain(|w| !points_at_ptr(w, source));
    }

    fn targets_node(&self, target: &Rc<Node>) -> bool {
        self.repeat_all.borrow().iter().any(|w| points_at(w, target))
            || self
                .repeat_typed
                .borrow()
                .values()
                .any(|list| list.iter().any(|w| points_at(w, target)))
    }
}

/// Registry of timed callbacks and typed events for one owner. See the module docs.
///
/// Not thread-safe: a dispatcher, its timer ids and its callbacks stay on one thread.
pub struct EventDispatcher {
    clock: Arc<dyn Clock>,
    last_update: Option<Duration>,
    /// Pending timeouts as `(end, id)`, sorted by end. Ties keep insertion order.
    deadlines: VecDeque<(Duration, u64)>,
    timeouts: HashMap<u64, TimeoutEvent>,
    intervals: HashMap<u64, IntervalEvent>,
    node: Rc<Node>,
}

impl EventDispatcher {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            last_update: None,
            deadlines: VecDeque::new(),
            timeouts: HashMap::new(),
            intervals: HashMap::new(),
            node: Rc::new(Node::default()),
        }
    }

    /// Run `callback` once, on the first update at or after `now + duration`.
    pub fn set_timeout<F>(&mut self, callback: F, duration: Duration) -> TimerId
    where
        F: FnOnce() + 'static,
    {
        let timer = TimerId::new();
        let end = self.clock.now() + duration;

        // Upper bound keeps equal deadlines in insertion order.
        let index = self.deadlines.partition_point(|&(e, _)| e <= end);
        self.deadlines.insert(index, (end, timer.id()));
        self.timeouts.insert(
            timer.id(),
            TimeoutEvent {
                callback: Box::new(callback),
                timer: timer.clone(),
                end,
            },
        );
        timer
    }

    /// Run `callback` once per `duration`, with catch-up capped at [`MAX_CATCH_UP_TICKS`].
    pub fn set_interval<F>(&mut self, callback: F, duration: Duration) -> TimerId
    where
        F: FnMut() + 'static,
    {
        let timer = TimerId::new();
        self.intervals.insert(
            timer.id(),
            IntervalEvent {
                callback: Box::new(callback),
                timer: timer.clone(),
                step: FixedStep::new(duration),
            },
        );
        timer
    }

    /// Cancel a pending timeout.
    ///
    /// The empty timer clears trivially. A timeout that already fired, was already cleared or
    /// was never issued by this dispatcher fails.
    pub fn clear_timeout(&mut self, timer: &TimerId) -> bool {
        if timer.is_empty() {
            return true;
        }
        let Some(event) = self.timeouts.remove(&timer.id()) else {
            return false;
        };

        // Find the first entry with this deadline, then scan the run of equal deadlines.
        let start = self.deadlines.partition_point(|&(e, _)| e < event.end);
        let position = self
            .deadlines
            .iter()
            .skip(start)
            .take_while(|&&(e, _)| e == event.end)
            .position(|&(_, id)| id == timer.id());
        match position {
            Some(offset) => {
                self.deadlines.remove(start + offset);
            }
            None => debug_assert!(false, "timeout {} missing from deadline queue", timer.id()),
        }

        event.timer.invalidate();
        true
    }

    /// Cancel an interval. Same contract as [`clear_timeout`](Self::clear_timeout).
    pub fn clear_interval(&mut self, timer: &TimerId) -> bool {
        if timer.is_empty() {
            return true;
        }
        match self.intervals.remove(&timer.id()) {
            Some(event) => {
                event.timer.invalidate();
                true
            }
            None => false,
        }
    }

    /// Advance intervals and fire expired timeouts. The first call only records the current
    /// time.
    pub fn update(&mut self) {
        let now = self.clock.now();
        let Some(last) = self.last_update.replace(now) else {
            return;
        };
        let elapsed = now.saturating_sub(last);

        for event in self.intervals.values_mut() {
            event.step.accumulate(elapsed);
            while event.step.take_tick() {
                (event.callback)();
                if event.step.whole_ticks() > MAX_CATCH_UP_TICKS {
                    trace!(
                        "interval {} dropped {} ticks of backlog",
                        event.timer.id(),
                        event.step.whole_ticks()
                    );
                    event.step.clear();
                }
            }
        }

        while let Some(&(end, id)) = self.deadlines.front()
            && end <= now
        {
            self.deadlines.pop_front();
            if let Some(event) = self.timeouts.remove(&id) {
                event.timer.invalidate();
                (event.callback)();
            }
        }
    }

    /// Number of timeouts waiting to fire.
    pub fn pending_timeouts(&self) -> usize {
        self.timeouts.len()
    }

    /// Number of registered intervals.
    pub fn active_intervals(&self) -> usize {
        self.intervals.len()
    }

    /// Call `listener` for every event of type `E` triggered on (or forwarded to) this
    /// dispatcher.
    pub fn add_listener<E, F>(&self, mut listener: F)
    where
        E: 'static,
        F: FnMut(&E) + 'static,
    {
        let erased: Listener = Rc::new(ListenerSlot {
            live: Cell::new(true),
            callback: RefCell::new(Box::new(move |event: &dyn Any| {
                if let Some(event) = event.downcast_ref::<E>() {
                    listener(event);
                }
            })),
        });
        self.node
            .listeners
            .borrow_mut()
            .entry(TypeId::of::<E>())
            .or_default()
            .push(erased);
    }

    /// Remove every listener for `E`, returning how many there were.
    pub fn remove_listeners<E: 'static>(&self) -> usize {
        self.node
            .listeners
            .borrow_mut()
            .remove(&TypeId::of::<E>())
            .map_or(0, |list| {
                for listener in &list {
                    listener.live.set(false);
                }
                list.len()
            })
    }

    /// Deliver `event` to this dispatcher's listeners, then to every repeat target.
    pub fn trigger<E: 'static>(&self, event: &E) {
        self.node.dispatch(TypeId::of::<E>(), event, &mut Vec::new());
    }

    /// Forward every triggered event to `other`.
    ///
    /// Supersedes any per-type registration to the same target. Returns false if `other` is
    /// this dispatcher or already receives everything.
    pub fn repeat_all(&self, other: &EventDispatcher) -> bool {
        if Rc::ptr_eq(&self.node, &other.node) {
            return false;
        }
        if self
            .node
            .repeat_all
            .borrow()
            .iter()
            .any(|w| points_at(w, &other.node))
        {
            return false;
        }

        {
            let mut typed = self.node.repeat_typed.borrow_mut();
            for list in typed.values_mut() {
                list.retain(|w| !points_at(w, &other.node));
            }
            typed.retain(|_, list| !list.is_empty());
        }
        self.node
            .repeat_all
            .borrow_mut()
            .push(Rc::downgrade(&other.node));
        other.node.add_source(&self.node);
        true
    }

    /// Forward triggered events of type `E` to `other`.
    ///
    /// Returns false if `other` is this dispatcher, already receives everything, or already
    /// receives `E`.
    pub fn repeat<E: 'static>(&self, other: &EventDispatcher) -> bool {
        if Rc::ptr_eq(&self.node, &other.node) {
            return false;
        }
        if self
            .node
            .repeat_all
            .borrow()
            .iter()
            .any(|w| points_at(w, &other.node))
        {
            return false;
        }

        let mut typed = self.node.repeat_typed.borrow_mut();
        let list = typed.entry(TypeId::of::<E>()).or_default();
        if list.iter().any(|w| points_at(w, &other.node)) {
            return false;
        }
        list.push(Rc::downgrade(&other.node));
        other.node.add_source(&self.node);
        true
    }

    /// Remove every repeat registration to `other`. Returns true if any existed.
    pub fn stop_repeating(&self, other: &EventDispatcher) -> bool {
        let removed = self.node.forget(Rc::as_ptr(&other.node));
        other.node.remove_source(Rc::as_ptr(&self.node));
        removed > 0
    }

    /// Whether events of any kind are forwarded to `other`.
    pub fn repeats_to(&self, other: &EventDispatcher) -> bool {
        self.node.targets_node(&other.node)
    }

    /// Whether `other` receives every event through [`repeat_all`](Self::repeat_all).
    pub fn repeats_all_to(&self, other: &EventDispatcher) -> bool {
        self.node
            .repeat_all
            .borrow()
            .iter()
            .any(|w| points_at(w, &other.node))
    }

    /// Number of repeat registrations held, across repeat-all and per-type lists.
    pub fn repeat_registrations(&self) -> usize {
        self.node.repeat_all.borrow().len()
            + self
                .node
                .repeat_typed
                .borrow()
                .values()
                .map(Vec::len)
                .sum::<usize>()
    }
}

impl Drop for EventDispatcher {
    fn drop(&mut self) {
        let this = Rc::as_ptr(&self.node);

        // Everyone repeating into us prunes their registrations.
        let sources = std::mem::take(&mut *self.node.sources.borrow_mut());
        for source in sources.iter().filter_map(Weak::upgrade) {
            source.forget(this);
        }

        // Our targets no longer list us as a source.
        let mut targets: Vec<Rc<Node>> = self
            .node
            .repeat_all
            .borrow()
            .iter()
            .filter_map(Weak::upgrade)
            .collect();
        targets.extend(
            self.node
                .repeat_typed
                .borrow()
                .values()
                .flatten()
                .filter_map(Weak::upgrade),
        );
        for target in targets {
            target.remove_source(this);
        }

        for event in self.timeouts.values() {
            event.timer.invalidate();
        }
        for event in self.intervals.values() {
            event.timer.invalidate();
        }
    }
}
