//! Benchmark utilities for the terrain core.
//!
//! - **Pool benchmarks**: per-task vs. batched submission across worker counts
//! - **Tile benchmarks**: supplier frame churn with a moving viewer, inline and on the pool
//! - **Frame timing**: per-frame statistics for scenario runs
//!
//! # Running Benchmarks
//!
//! ```bash
//! cargo bench -p rusty_terrain_bench
//!
//! # Run specific benchmark group
//! cargo bench -p rusty_terrain_bench -- submit
//! ```
//!
//! Results are written to `target/criterion/` with HTML reports.

pub mod frame_timer;
pub mod inputs;
pub mod scenarios;
