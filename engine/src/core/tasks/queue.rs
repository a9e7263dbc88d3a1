//! Queues and counters shared between the pool, its handles and its workers.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

use crossbeam::utils::Backoff;
use log::{debug, trace};
use rand::Rng;

pub(super) type Job = Box<dyn FnOnce() + Send + 'static>;

/// Jobs never run while a queue or counter lock is held, and panics are caught inside the job,
/// so a poisoned lock still guards consistent data.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Default, Clone, Copy)]
struct Counters {
    /// Jobs sitting in worker queues.
    queued: usize,
    /// Jobs picked up by a worker and not finished yet.
    active: usize,
    /// Jobs staged in an open batch.
    unsynced: usize,
}

impl Counters {
    fn outstanding(&self) -> usize {
        self.queued + self.active + self.unsynced
    }
}

pub(super) struct Shared {
    queues: Vec<Mutex<VecDeque<Job>>>,
    counters: Mutex<Counters>,
    /// Signalled when jobs become visible or the pool stops.
    work: Condvar,
    /// Signalled when the outstanding count drops to zero.
    idle: Condvar,
    running: AtomicBool,
    next_queue: AtomicUsize,
    batch: Mutex<Option<Vec<Job>>>,
    steal_rounds: usize,
}

impl Shared {
    pub(super) fn new(workers: usize, steal_rounds: usize) -> Self {
        Self {
            queues: (0..workers).map(|_| Mutex::new(VecDeque::new())).collect(),
            counters: Mutex::new(Counters::default()),
            work: Condvar::new(),
            idle: Condvar::new(),
            running: AtomicBool::new(true),
            next_queue: AtomicUsize::new(0),
            batch: Mutex::new(None),
            steal_rounds,
        }
    }

    pub(super) fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Submit a job: staged if a batch is open, otherwise published to the next queue.
    pub(super) fn push(&self, job: Job) {
        if !self.is_running() {
            return;
        }
        {
            let mut batch = lock(&self.batch);
            if let Some(staged) = batch.as_mut() {
                staged.push(job);
                lock(&self.counters).unsynced += 1;
                return;
            }
        }
        let index = self.next_queue.fetch_add(1, Ordering::Relaxed) % self.queues.len();
        self.publish_to(index, job);
    }

    /// Count first, then enqueue: a worker decrements `queued` only after popping, so the
    /// count can never go below the number of jobs actually taken.
    pub(super) fn publish_to(&self, index: usize, job: Job) {
        lock(&self.counters).queued += 1;
        lock(&self.queues[index]).push_back(job);
        self.work.notify_one();
        self.abandon_if_stopped();
    }

    /// A push can race with shutdown; whoever sees the pool stopped last drops what is left.
    fn abandon_if_stopped(&self) {
        if !self.is_running() {
            self.abandon_queued();
        }
    }

    pub(super) fn begin_batch(&self) {
        let mut batch = lock(&self.batch);
        assert!(batch.is_none(), "a task batch is already open");
        *batch = Some(Vec::new());
    }

    /// Close the open batch and publish what it staged.
    pub(super) fn end_batch(&self) {
        let staged = {
            let mut batch = lock(&self.batch);
            match batch.take() {
                Some(staged) => staged,
                None => panic!("end_batch called without an open task batch"),
            }
        };
        self.publish_staged(staged);
    }

    /// Record a job staged outside the shared queues, so `wait_idle` waits for it.
    pub(super) fn stage(&self) {
        lock(&self.counters).unsynced += 1;
    }

    /// Publish jobs previously counted with [`stage`](Self::stage), spreading them round-robin
    /// and taking each queue lock once.
    pub(super) fn publish_staged(&self, staged: Vec<Job>) {
        let count = staged.len();
        if count == 0 {
            return;
        }

        {
            let mut counters = lock(&self.counters);
            counters.queued += count;
            counters.unsynced -= count;
        }

        let workers = self.queues.len();
        let start = self.next_queue.fetch_add(count, Ordering::Relaxed);
        let mut buckets: Vec<Vec<Job>> = (0..workers).map(|_| Vec::new()).collect();
        for (offset, job) in staged.into_iter().enumerate() {
            buckets[(start + offset) % workers].push(job);
        }
        for (index, bucket) in buckets.into_iter().enumerate() {
            if !bucket.is_empty() {
                lock(&self.queues[index]).extend(bucket);
            }
        }
        debug!("published batch of {} tasks", count);
        self.work.notify_all();
        self.abandon_if_stopped();
    }

    pub(super) fn batch_open(&self) -> bool {
        lock(&self.batch).is_some()
    }

    /// Find a job for worker `index`: its own queue first, then peers.
    pub(super) fn pop(&self, index: usize) -> Option<Job> {
        // The own-queue guard must be gone before stealing, which locks this queue again.
        let own = lock(&self.queues[index]).pop_front();
        let job = match own {
            Some(job) => job,
            None => self.steal(index)?,
        };
        let mut counters = lock(&self.counters);
        counters.queued -= 1;
        counters.active += 1;
        Some(job)
    }

    /// Bounded steal scan. Each round starts at a random peer and only try-locks, so a busy
    /// queue is skipped rather than waited on. Between rounds the worker backs off, spinning
    /// first and yielding once spinning stops paying off.
    fn steal(&self, index: usize) -> Option<Job> {
        let workers = self.queues.len();
        if workers < 2 {
            return None;
        }
        let backoff = Backoff::new();
        let mut rng = rand::thread_rng();
        for _ in 0..self.steal_rounds {
            let start = rng.gen_range(0..workers);
            for offset in 0..workers {
                let victim = (start + offset) % workers;
                if victim == index {
                    continue;
                }
                if let Ok(mut queue) = self.queues[victim].try_lock()
                    && let Some(job) = queue.pop_back()
                {
                    trace!("worker {} stole from worker {}", index, victim);
                    return Some(job);
                }
            }
            // New work may have landed in our own queue meanwhile.
            if let Some(job) = lock(&self.queues[index]).pop_front() {
                return Some(job);
            }
            backoff.snooze();
        }
        None
    }

    pub(super) fn finish(&self) {
        let mut counters = lock(&self.counters);
        counters.active -= 1;
        if counters.outstanding() == 0 {
            self.idle.notify_all();
        }
    }

    /// Park until jobs are queued or the pool stops. Returns whether the pool is still running.
    pub(super) fn wait_for_work(&self) -> bool {
        let mut counters = lock(&self.counters);
        while self.is_running() && counters.queued == 0 {
            counters = self
                .work
                .wait(counters)
                .unwrap_or_else(PoisonError::into_inner);
        }
        self.is_running()
    }

    pub(super) fn wait_idle(&self) {
        let mut counters = lock(&self.counters);
        while counters.outstanding() > 0 {
            counters = self
                .idle
                .wait(counters)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    pub(super) fn pending(&self) -> usize {
        lock(&self.counters).outstanding()
    }

    pub(super) fn stop(&self) {
        // Flip under the counters lock so a worker between its check and its wait cannot miss
        // the wakeup.
        let _counters = lock(&self.counters);
        self.running.store(false, Ordering::Release);
        self.work.notify_all();
    }

    /// Drop every queued and staged job without running it. Returns how many were dropped.
    pub(super) fn abandon_queued(&self) -> usize {
        let mut dropped = 0;
        for queue in &self.queues {
            let jobs: Vec<Job> = lock(queue).drain(..).collect();
            dropped += jobs.len();
            if !jobs.is_empty() {
                lock(&self.counters).queued -= jobs.len();
            }
        }
        let staged = lock(&self.batch).take().unwrap_or_default();
        if !staged.is_empty() {
            lock(&self.counters).unsynced -= staged.len();
            dropped += staged.len();
        }
        if dropped > 0 {
            let counters = lock(&self.counters);
            if counters.outstanding() == 0 {
                self.idle.notify_all();
            }
        }
        dropped
    }

    pub(super) fn workers(&self) -> usize {
        self.queues.len()
    }
}
