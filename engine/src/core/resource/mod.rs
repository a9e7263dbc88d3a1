//! Intrusive shared/weak ownership with named owners.
//!
//! [`SharedResource`] and [`WeakResource`] work like `Rc`/`Weak` with one addition: every
//! shared handle carries an owner name, and in debug builds the full list of owners of a
//! resource can be queried. GPU objects are handed out this way so that a leak report can say
//! *who* still holds a buffer instead of only how many.
//!
//! The handles are confined to one thread. Work that runs on the thread pool shares data
//! through `Arc` instead.

mod shared;
mod tracker;
mod weak;

pub use shared::SharedResource;
pub use weak::WeakResource;

use thiserror::Error;

/// Errors raised by strong promotion of a weak handle.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ResourceError {
    /// Every shared handle was already dropped.
    #[error("resource is stale: no shared handles remain")]
    Stale,
}
