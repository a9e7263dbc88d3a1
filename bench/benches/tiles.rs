//! Tile supplier benchmarks.
//!
//! - Height range computation per tile size
//! - Lookup cost for hot tiles
//! - Frame churn with a moving viewer, inline and on the pool

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use rusty_terrain::core::tasks::ThreadPool;
use rusty_terrain::core::time::ManualClock;
use rusty_terrain::terrain::{SupplierConfig, TileId, TileSupplier, compute_height_range};
use rusty_terrain_bench::inputs::{grid_rects, heightfield};
use rusty_terrain_bench::scenarios::{ChurnConfig, tile_churn};
use std::sync::Arc;

fn bench_height_range(c: &mut Criterion) {
    let mut group = c.benchmark_group("height_range");
    let field = heightfield(1024, 42);

    for texels in [16u32, 64, 256] {
        let id = TileId::new([0, 0, texels, texels]);
        group.throughput(Throughput::Elements(id.texel_count() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(texels), &id, |b, &id| {
            b.iter(|| black_box(compute_height_range(&field, id, false)));
        });
    }

    group.finish();
}

fn bench_lookup(c: &mut Criterion) {
    let mut group = c.benchmark_group("lookup");
    let rects = grid_rects(16, 1_000, 7);
    group.throughput(Throughput::Elements(rects.len() as u64));

    group.bench_function("hot", |b| {
        let clock = ManualClock::new();
        let mut supplier = TileSupplier::new(
            Arc::new(heightfield(256, 7)),
            Arc::new(clock),
            SupplierConfig::default(),
        );
        for (offset, size) in &rects {
            drop(supplier.get_tile(*offset, *size));
        }
        supplier.update();

        b.iter(|| {
            for (offset, size) in &rects {
                black_box(supplier.get_tile(*offset, *size));
            }
        });
    });

    group.finish();
}

fn bench_churn(c: &mut Criterion) {
    let mut group = c.benchmark_group("churn");
    group.sample_size(10);
    let config = ChurnConfig::default();

    group.bench_function("inline", |b| {
        b.iter(|| black_box(tile_churn(&config, None)));
    });

    for workers in [2, 4] {
        let pool = ThreadPool::new(workers);
        group.bench_with_input(BenchmarkId::new("pool", workers), &workers, |b, _| {
            b.iter(|| black_box(tile_churn(&config, Some(pool.handle()))));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_height_range, bench_lookup, bench_churn);
criterion_main!(benches);
