//! Work-stealing thread pool.
//!
//! [`ThreadPool`] owns a fixed set of workers. Each worker has its own queue; idle workers
//! steal from their peers. Results come back through [`TaskFuture`], and a task that panics
//! reports [`TaskError::Panicked`] instead of taking its worker down.
//!
//! ```rust,ignore
//! let pool = ThreadPool::new(4);
//! let futures = pool.batch(|pool| {
//!     tiles.iter().map(|id| pool.run(move || compute(id))).collect::<Vec<_>>()
//! });
//! for future in futures {
//!     let output = future.wait()?;
//! }
//! ```

mod config;
mod executor;
mod future;
mod queue;

use thiserror::Error;

pub use config::PoolConfig;
pub use executor::{PoolHandle, TaskBatch, ThreadPool};
pub use future::{TaskError, TaskFuture};

/// Failure to build a [`ThreadPool`].
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),
}
