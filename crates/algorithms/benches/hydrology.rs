//! Benchmarks for the flow-routing hot path

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use hydrorisk_algorithms::hydrology::{
    fill_depressions, flow_accumulation, flow_direction, resolve_flats, FillParams, FlatParams,
    FlowAccumulationParams,
};
use hydrorisk_core::{GeoTransform, Raster};

/// Deterministic rough terrain: a tilted plane with sinusoidal relief
fn synthetic_dem(size: usize) -> Raster<f64> {
    let mut dem = Raster::new(size, size);
    dem.set_transform(GeoTransform::new(0.0, size as f64, 1.0, -1.0));
    for row in 0..size {
        for col in 0..size {
            let base = (2 * size - row - col) as f64;
            let relief = (row as f64 * 0.7).sin() * 2.0 + (col as f64 * 0.3).cos() * 1.5;
            dem.set(row, col, base + relief).unwrap();
        }
    }
    dem
}

fn bench_fill(c: &mut Criterion) {
    let dem = synthetic_dem(256);
    c.bench_function("fill_depressions_256", |b| {
        b.iter(|| fill_depressions(black_box(&dem), FillParams::default()).unwrap())
    });
}

fn bench_routing(c: &mut Criterion) {
    let dem = synthetic_dem(256);
    let filled = fill_depressions(&dem, FillParams::default()).unwrap();
    let resolved = resolve_flats(&filled, FlatParams::default()).unwrap();

    c.bench_function("flow_direction_256", |b| {
        b.iter(|| flow_direction(black_box(&resolved)).unwrap())
    });

    let fdir = flow_direction(&resolved).unwrap();
    c.bench_function("flow_accumulation_256", |b| {
        b.iter(|| flow_accumulation(black_box(&fdir), FlowAccumulationParams::default()).unwrap())
    });
}

criterion_group!(benches, bench_fill, bench_routing);
criterion_main!(benches);
