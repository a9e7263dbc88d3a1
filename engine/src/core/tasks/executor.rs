use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;

use crossbeam::channel::bounded;
use log::{debug, info, warn};

use super::future::{TaskFuture, panic_message};
use super::queue::{Job, Shared};
use super::{PoolConfig, PoolError};

/// A fixed set of worker threads pulling tasks from per-worker queues.
///
/// Submissions are spread round-robin across the worker queues. A worker drains its own queue
/// from the front and, once it runs dry, steals from the back of its peers before parking.
/// Tasks can be staged in a batch and published together, which keeps workers from waking
/// once per task while a frame's worth of work is being queued.
///
/// Dropping the pool stops it: running tasks finish, queued tasks are dropped without running
/// and their futures resolve to [`TaskError::Abandoned`](super::TaskError::Abandoned).
pub struct ThreadPool {
    shared: Arc<Shared>,
    workers: Vec<Worker>,
}

struct Worker {
    id: usize,
    handle: Option<thread::JoinHandle<()>>,
}

impl ThreadPool {
    /// Creates a pool with `workers` threads and default settings otherwise.
    ///
    /// # Panics
    ///
    /// Panics if `workers` is zero or a worker thread can not be spawned.
    pub fn new(workers: usize) -> Self {
        match Self::with_config(PoolConfig::default().with_workers(workers)) {
            Ok(pool) => pool,
            Err(err) => panic!("failed to start thread pool: {err}"),
        }
    }

    /// Creates a pool from a full configuration.
    ///
    /// # Panics
    ///
    /// Panics if `config.workers` is zero.
    pub fn with_config(config: PoolConfig) -> Result<Self, PoolError> {
        assert!(config.workers > 0, "thread pool size must be greater than 0");

        let shared = Arc::new(Shared::new(config.workers, config.steal_rounds));
        let mut pool = ThreadPool {
            shared,
            workers: Vec::with_capacity(config.workers),
        };
        for id in 0..config.workers {
            // On failure the partially built pool is dropped, which stops and joins the
            // workers spawned so far.
            let worker = Worker::spawn(id, &config.thread_name, Arc::clone(&pool.shared))?;
            pool.workers.push(worker);
        }
        info!("thread pool started with {} workers", config.workers);
        Ok(pool)
    }

    /// Schedules `f` and returns a future for its result.
    pub fn run<F, T>(&self, f: F) -> TaskFuture<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        run_on(&self.shared, f)
    }

    /// Schedules `f` without a way to observe its result. A panic is logged.
    pub fn execute<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        execute_on(&self.shared, f)
    }

    /// Returns a handle that can submit tasks from other threads.
    pub fn handle(&self) -> PoolHandle {
        PoolHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Opens a batch: tasks submitted from now on are staged until [`end_batch`](Self::end_batch).
    ///
    /// # Panics
    ///
    /// Panics if a batch is already open.
    pub fn begin_batch(&self) {
        self.shared.begin_batch();
    }

    /// Publishes every staged task and wakes the workers.
    ///
    /// # Panics
    ///
    /// Panics if no batch is open.
    pub fn end_batch(&self) {
        self.shared.end_batch();
    }

    /// Runs `f` with a batch open and publishes the batch afterwards, even if `f` panics.
    pub fn batch<R>(&self, f: impl FnOnce(&Self) -> R) -> R {
        self.begin_batch();
        let _publish = BatchGuard(&self.shared);
        f(self)
    }

    /// True while a batch is open.
    pub fn batch_open(&self) -> bool {
        self.shared.batch_open()
    }

    /// Starts a batch owned by the caller. Unlike [`begin_batch`](Self::begin_batch) it does
    /// not capture other submissions, and any number of them can be open at once.
    pub fn task_batch(&self) -> TaskBatch<'_> {
        TaskBatch::new(&self.shared)
    }

    /// Blocks until every submitted task, staged ones included, has finished.
    ///
    /// Must not be called from a worker, nor with a batch open on this thread: both wait on
    /// work that can not make progress.
    pub fn wait_idle(&self) {
        self.shared.wait_idle();
    }

    /// Number of tasks queued, running or staged.
    pub fn pending(&self) -> usize {
        self.shared.pending()
    }

    /// Number of worker threads.
    pub fn workers(&self) -> usize {
        self.workers.len()
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.shared.stop();

        for worker in &mut self.workers {
            if let Some(handle) = worker.handle.take()
                && handle.join().is_err()
            {
                warn!("worker {} exited abnormally", worker.id);
            }
        }

        let abandoned = self.shared.abandon_queued();
        if abandoned > 0 {
            debug!("thread pool dropped {} queued tasks", abandoned);
        }
        info!("thread pool stopped");
    }
}

impl Worker {
    fn spawn(id: usize, name: &str, shared: Arc<Shared>) -> Result<Self, PoolError> {
        let handle = thread::Builder::new()
            .name(format!("{name}-{id}"))
            .spawn(move || Worker::run(id, &shared))?;
        Ok(Worker {
            id,
            handle: Some(handle),
        })
    }

    fn run(id: usize, shared: &Shared) {
        debug!("worker {} started", id);
        while shared.is_running() {
            match shared.pop(id) {
                Some(job) => {
                    job();
                    shared.finish();
                }
                None => {
                    if !shared.wait_for_work() {
                        break;
                    }
                }
            }
        }
        debug!("worker {} stopped", id);
    }
}

/// Publishes the open batch when dropped.
struct BatchGuard<'a>(&'a Shared);

impl Drop for BatchGuard<'_> {
    fn drop(&mut self) {
        self.0.end_batch();
    }
}

/// A cloneable submitter for a [`ThreadPool`], usable from any thread.
///
/// A handle does not keep the workers alive: once the pool is dropped, tasks submitted
/// through a handle are abandoned immediately.
#[derive(Clone)]
pub struct PoolHandle {
    shared: Arc<Shared>,
}

impl PoolHandle {
    /// See [`ThreadPool::run`].
    pub fn run<F, T>(&self, f: F) -> TaskFuture<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        run_on(&self.shared, f)
    }

    /// See [`ThreadPool::execute`].
    pub fn execute<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        execute_on(&self.shared, f)
    }

    /// See [`ThreadPool::begin_batch`].
    pub fn begin_batch(&self) {
        self.shared.begin_batch();
    }

    /// See [`ThreadPool::end_batch`].
    pub fn end_batch(&self) {
        self.shared.end_batch();
    }

    /// See [`ThreadPool::batch`].
    pub fn batch<R>(&self, f: impl FnOnce(&Self) -> R) -> R {
        self.begin_batch();
        let _publish = BatchGuard(&self.shared);
        f(self)
    }

    /// See [`ThreadPool::task_batch`].
    pub fn task_batch(&self) -> TaskBatch<'_> {
        TaskBatch::new(&self.shared)
    }

    /// See [`ThreadPool::wait_idle`].
    pub fn wait_idle(&self) {
        self.shared.wait_idle();
    }

    /// See [`ThreadPool::pending`].
    pub fn pending(&self) -> usize {
        self.shared.pending()
    }

    /// See [`ThreadPool::workers`].
    pub fn workers(&self) -> usize {
        self.shared.workers()
    }

    /// False once the pool has been dropped.
    pub fn is_running(&self) -> bool {
        self.shared.is_running()
    }

    #[cfg(test)]
    fn publish_to(&self, index: usize, job: Job) {
        self.shared.publish_to(index, job);
    }
}

/// Tasks staged by one caller and published together when the batch is dropped.
///
/// Staged tasks count as pending work, so [`ThreadPool::wait_idle`] must not be called on the
/// thread holding an unpublished batch.
pub struct TaskBatch<'a> {
    shared: &'a Shared,
    staged: Vec<Job>,
}

impl<'a> TaskBatch<'a> {
    fn new(shared: &'a Shared) -> Self {
        Self {
            shared,
            staged: Vec::new(),
        }
    }

    /// See [`ThreadPool::run`].
    pub fn run<F, T>(&mut self, f: F) -> TaskFuture<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let (job, future) = future_job(f);
        self.stage(job);
        future
    }

    /// See [`ThreadPool::execute`].
    pub fn execute<F>(&mut self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.stage(logged_job(f));
    }

    pub fn len(&self) -> usize {
        self.staged.len()
    }

    pub fn is_empty(&self) -> bool {
        self.staged.is_empty()
    }

    /// Publish now instead of on drop.
    pub fn publish(self) {}

    fn stage(&mut self, job: Job) {
        // A stopped pool drops the job, which abandons its future.
        if self.shared.is_running() {
            self.shared.stage();
            self.staged.push(job);
        }
    }
}

impl Drop for TaskBatch<'_> {
    fn drop(&mut self) {
        self.shared.publish_staged(std::mem::take(&mut self.staged));
    }
}

fn future_job<F, T>(f: F) -> (Job, TaskFuture<T>)
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    let (tx, rx) = bounded(1);
    let job: Job = Box::new(move || {
        let result = panic::catch_unwind(AssertUnwindSafe(f))
            .map_err(|payload| super::TaskError::Panicked(panic_message(payload.as_ref())));
        // The caller may have dropped the future.
        let _ = tx.send(result);
    });
    (job, TaskFuture::new(rx))
}

fn logged_job<F>(f: F) -> Job
where
    F: FnOnce() + Send + 'static,
{
    Box::new(move || {
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(f)) {
            warn!("task panicked: {}", panic_message(payload.as_ref()));
        }
    })
}

fn run_on<F, T>(shared: &Shared, f: F) -> TaskFuture<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    let (job, future) = future_job(f);
    shared.push(job);
    future
}

fn execute_on<F>(shared: &Shared, f: F)
where
    F: FnOnce() + Send + 'static,
{
    shared.push(logged_job(f));
}
