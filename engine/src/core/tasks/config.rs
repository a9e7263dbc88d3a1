use std::thread;

/// Thread pool configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    /// Number of worker threads. Must be at least one.
    pub workers: usize,
    /// Rounds of stealing across peer queues before an idle worker parks. Rounds are separated
    /// by a spin-then-yield backoff.
    pub steal_rounds: usize,
    /// Prefix for worker thread names; the worker index is appended.
    pub thread_name: String,
}

impl PoolConfig {
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_steal_rounds(mut self, steal_rounds: usize) -> Self {
        self.steal_rounds = steal_rounds;
        self
    }

    pub fn with_thread_name(mut self, thread_name: impl Into<String>) -> Self {
        self.thread_name = thread_name.into();
        self
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: thread::available_parallelism().map_or(1, |n| n.get()),
            steal_rounds: 4,
            thread_name: String::from("terrain-worker"),
        }
    }
}
