//! Tile supplier churn: a camera moves over the terrain and asks for the tiles around it each
//! frame, while simulated time drives demotion and expiry.

use std::sync::Arc;
use std::time::Duration;

use rusty_terrain::core::tasks::PoolHandle;
use rusty_terrain::core::time::ManualClock;
use rusty_terrain::terrain::{SupplierConfig, SupplierStats, TileDataReference, TileSupplier};

use crate::frame_timer::{FrameStats, measure_frames};
use crate::inputs::{camera_path, heightfield};

/// Configuration for the churn scenario.
#[derive(Debug, Clone)]
pub struct ChurnConfig {
    /// Height field resolution per axis.
    pub resolution: u32,
    /// Tiles per axis of the terrain.
    pub cells: u32,
    /// Tiles requested around the viewer, per axis, every frame.
    pub view_radius: i32,
    pub frames: usize,
    /// Simulated time per frame.
    pub frame_time: Duration,
    pub seed: u64,
}

impl Default for ChurnConfig {
    fn default() -> Self {
        Self {
            resolution: 512,
            cells: 32,
            view_radius: 2,
            frames: 300,
            frame_time: Duration::from_millis(16),
            seed: 12345,
        }
    }
}

/// Outcome of one churn run.
#[derive(Debug, Clone)]
pub struct ChurnResult {
    pub frames: FrameStats,
    pub supplier: SupplierStats,
}

/// Run the churn scenario, producing tiles inline or on `pool`.
pub fn tile_churn(config: &ChurnConfig, pool: Option<PoolHandle>) -> ChurnResult {
    let clock = ManualClock::new();
    let source = Arc::new(heightfield(config.resolution, config.seed));
    let supplier_config = SupplierConfig::default()
        .with_idle_timeout(Duration::from_millis(500))
        .with_expire_timeout(Duration::from_secs(2));
    let mut supplier = TileSupplier::new(source, Arc::new(clock.clone()), supplier_config);
    if let Some(pool) = pool.clone() {
        supplier = supplier.with_pool(pool);
    }

    let path = camera_path(config.frames, config.seed);
    let cell = 1.0 / config.cells as f32;
    let mut held: Vec<TileDataReference> = Vec::new();

    let frames = measure_frames(config.frames, |frame| {
        let viewer = path[frame];
        supplier.set_viewer(viewer);
        let cx = (viewer[0] / cell) as i32;
        let cy = (viewer[1] / cell) as i32;

        held.clear();
        for dy in -config.view_radius..=config.view_radius {
            for dx in -config.view_radius..=config.view_radius {
                let (x, y) = (cx + dx, cy + dy);
                if x < 0 || y < 0 || x >= config.cells as i32 || y >= config.cells as i32 {
                    continue;
                }
                let offset = [x as f32 * cell, y as f32 * cell];
                held.push(supplier.get_tile(offset, [cell, cell]));
            }
        }

        supplier.update();
        clock.advance(config.frame_time);
    });

    if let Some(pool) = pool {
        pool.wait_idle();
        supplier.update();
    }

    ChurnResult {
        frames,
        supplier: supplier.stats(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn churn_produces_and_retires_tiles() {
        // Given - long enough for early tiles to go idle and expire
        let config = ChurnConfig {
            resolution: 64,
            cells: 8,
            view_radius: 1,
            frames: 400,
            frame_time: Duration::from_millis(20),
            seed: 1,
        };

        // When
        let result = tile_churn(&config, None);

        // Then
        assert_eq!(result.frames.frame_count, 400);
        assert!(result.supplier.produced > 0);
        assert!(result.supplier.active > 0);
    }
}
