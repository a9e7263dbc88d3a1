//! Timers and typed events driven once per frame.
//!
//! See [`EventDispatcher`] for the update model and [`TimerId`] for how scheduled callbacks are
//! referenced and invalidated.

mod dispatcher;
mod timer;

pub use dispatcher::{EventDispatcher, MAX_CATCH_UP_TICKS};
pub use timer::TimerId;
