//! Seeded input generators, so that every benchmark run sees the same terrain and the same
//! camera path.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rusty_terrain::terrain::HeightField;

/// A bumpy height field: a few random sine hills on top of per-sample noise.
pub fn heightfield(size: u32, seed: u64) -> HeightField {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let hills: Vec<(f32, f32, f32)> = (0..6)
        .map(|_| {
            (
                rng.gen_range(1.0..8.0),
                rng.gen_range(1.0..8.0),
                rng.gen_range(5.0..50.0),
            )
        })
        .collect();
    let scale = size.max(1) as f32;

    HeightField::from_fn(size, size, |x, y| {
        let u = x as f32 / scale;
        let v = y as f32 / scale;
        let base: f32 = hills
            .iter()
            .map(|(fu, fv, amp)| amp * (u * fu).sin() * (v * fv).cos())
            .sum();
        base + rng.gen_range(-0.5..0.5)
    })
}

/// Random tile rectangles on a regular grid of `cells x cells` in normalized space.
pub fn grid_rects(cells: u32, count: usize, seed: u64) -> Vec<([f32; 2], [f32; 2])> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let cell = 1.0 / cells.max(1) as f32;
    (0..count)
        .map(|_| {
            let x = rng.gen_range(0..cells) as f32 * cell;
            let y = rng.gen_range(0..cells) as f32 * cell;
            ([x, y], [cell, cell])
        })
        .collect()
}

/// A camera wandering across the terrain, one position per frame.
pub fn camera_path(frames: usize, seed: u64) -> Vec<[f32; 2]> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut position = [0.5f32, 0.5f32];
    (0..frames)
        .map(|_| {
            position[0] = (position[0] + rng.gen_range(-0.02..0.02)).clamp(0.0, 1.0);
            position[1] = (position[1] + rng.gen_range(-0.02..0.02)).clamp(0.0, 1.0);
            position
        })
        .collect()
}
