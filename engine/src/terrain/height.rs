use super::tile::TileId;

/// A bounded grid of height samples. Implementations are read from worker threads while
/// tiles are produced in the background, so they must be immutable or internally
/// synchronized.
pub trait HeightSource: Send + Sync {
    /// Number of samples along x and y.
    fn resolution(&self) -> (u32, u32);

    /// Height at integer sample coordinates. Callers stay inside [`resolution`](Self::resolution).
    fn sample_height(&self, x: u32, y: u32) -> f32;
}

/// Owned row-major height grid.
#[derive(Debug, Clone, PartialEq)]
pub struct HeightField {
    width: u32,
    height: u32,
    samples: Vec<f32>,
}

impl HeightField {
    /// # Panics
    ///
    /// Panics if `samples` does not hold exactly `width * height` values.
    pub fn new(width: u32, height: u32, samples: Vec<f32>) -> Self {
        assert_eq!(
            samples.len(),
            width as usize * height as usize,
            "height field of {width}x{height} needs {} samples",
            width as usize * height as usize
        );
        Self {
            width,
            height,
            samples,
        }
    }

    pub fn from_fn(width: u32, height: u32, mut f: impl FnMut(u32, u32) -> f32) -> Self {
        let mut samples = Vec::with_capacity(width as usize * height as usize);
        for y in 0..height {
            for x in 0..width {
                samples.push(f(x, y));
            }
        }
        Self {
            width,
            height,
            samples,
        }
    }

    pub fn flat(width: u32, height: u32, value: f32) -> Self {
        Self::new(width, height, vec![value; width as usize * height as usize])
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }
}

impl HeightSource for HeightField {
    fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn sample_height(&self, x: u32, y: u32) -> f32 {
        self.samples[y as usize * self.width as usize + x as usize]
    }
}

/// Minimum and maximum height inside a tile.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HeightRange {
    pub min: f32,
    pub max: f32,
}

impl HeightRange {
    pub fn extent(&self) -> f32 {
        self.max - self.min
    }
}

/// Everything computed for one tile.
#[derive(Debug, Clone, PartialEq)]
pub struct TileOutput {
    pub range: HeightRange,
    /// The tile's samples, row-major, when requested.
    pub samples: Option<Vec<f32>>,
}

/// Scan the samples covered by `id` and record their range. This is the unit of work that
/// tile production runs inline or on the pool.
///
/// An empty tile (possible only for an empty source) yields a zero range.
pub fn compute_height_range(source: &dyn HeightSource, id: TileId, keep_samples: bool) -> TileOutput {
    let [x0, y0, x1, y1] = id.bounds();
    let mut min = f32::INFINITY;
    let mut max = f32::NEG_INFINITY;
    let mut samples = keep_samples.then(|| Vec::with_capacity(id.texel_count()));

    for y in y0..y1 {
        for x in x0..x1 {
            let value = source.sample_height(x, y);
            min = min.min(value);
            max = max.max(value);
            if let Some(samples) = samples.as_mut() {
                samples.push(value);
            }
        }
    }

    if min > max {
        min = 0.0;
        max = 0.0;
    }
    TileOutput {
        range: HeightRange { min, max },
        samples,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp() -> HeightField {
        // Height grows with x and y: h(x, y) = x + 10 * y
        HeightField::from_fn(8, 8, |x, y| x as f32 + 10.0 * y as f32)
    }

    #[test]
    fn from_fn_is_row_major() {
        let field = ramp();
        assert_eq!(field.resolution(), (8, 8));
        assert_eq!(field.sample_height(3, 2), 23.0);
        assert_eq!(field.samples()[2 * 8 + 3], 23.0);
    }

    #[test]
    #[should_panic(expected = "needs 4 samples")]
    fn new_checks_sample_count() {
        let _ = HeightField::new(2, 2, vec![0.0; 3]);
    }

    #[test]
    fn range_covers_tile_bounds_only() {
        // Given - the top-left quarter
        let field = ramp();
        let id = TileId::from_rect([0.0, 0.0], [0.5, 0.5], field.resolution());

        // When
        let output = compute_height_range(&field, id, false);

        // Then - x and y in 0..4
        assert_eq!(output.range, HeightRange { min: 0.0, max: 33.0 });
        assert!(output.samples.is_none());
    }

    #[test]
    fn samples_are_kept_on_request() {
        let field = ramp();
        let id = TileId::from_rect([0.5, 0.75], [0.25, 0.25], field.resolution());

        let output = compute_height_range(&field, id, true);

        assert_eq!(output.samples, Some(vec![64.0, 65.0, 74.0, 75.0]));
        assert_eq!(output.range.extent(), 11.0);
    }

    #[test]
    fn flat_field_has_zero_extent() {
        let field = HeightField::flat(4, 4, 2.5);
        let id = TileId::from_rect([0.0, 0.0], [1.0, 1.0], field.resolution());
        let output = compute_height_range(&field, id, false);
        assert_eq!(output.range, HeightRange { min: 2.5, max: 2.5 });
    }
}
