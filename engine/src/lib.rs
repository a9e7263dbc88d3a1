//! Core runtime pieces of a terrain renderer: a work-stealing thread pool, named shared
//! resources, per-owner timers and events, and the terrain tile cache built on top of them.

pub mod core;
pub mod terrain;
