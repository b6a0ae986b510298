//! # Feature Benchmarks
//!
//! Performance benchmarks for agrs-core index computation and aggregation.
//!
//! Run with: `cargo bench -p agrs-core`

use agrs_core::{
    BandCode, BandSet, IndexSample, IndexTimeSeries, Raster, SeasonWindow, StageAggregator,
    compute_indices,
};
use chrono::{TimeZone, Utc};
use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use std::hint::black_box;

/// Every band as a `size x size` raster with a smooth gradient.
fn create_band_set(size: usize) -> BandSet {
    BandCode::ALL
        .iter()
        .enumerate()
        .map(|(b, band)| {
            let raster = Raster::from_shape_fn((size, size), |(r, c)| {
                0.02 * (b as f64 + 1.0) + 0.001 * ((r + c) % 50) as f64
            });
            (*band, raster)
        })
        .collect()
}

fn season() -> SeasonWindow {
    let start = Utc.with_ymd_and_hms(2023, 4, 1, 0, 0, 0).single().expect("start");
    let end = Utc.with_ymd_and_hms(2023, 10, 1, 0, 0, 0).single().expect("end");
    SeasonWindow::new(start, end).expect("season")
}

/// Ten samples per series spread across the season.
fn create_series(size: usize, names: &[&str]) -> IndexTimeSeries {
    let season = season();
    let mut series = IndexTimeSeries::with_names(names.iter().copied());
    for name in names {
        for i in 0..10 {
            let fraction = i as f64 / 9.0;
            let raster = Raster::from_elem((size, size), 0.1 * i as f64);
            series.push(
                *name,
                IndexSample::new(season.at_fraction(fraction), fraction, raster),
            );
        }
    }
    series
}

// =============================================================================
// BENCHMARKS
// =============================================================================

fn bench_compute_indices(c: &mut Criterion) {
    let mut group = c.benchmark_group("compute_indices");

    for size in [16, 64, 256].iter() {
        let bands = create_band_set(*size);
        group.bench_with_input(BenchmarkId::from_parameter(size), &bands, |b, bands| {
            b.iter(|| black_box(compute_indices(bands)));
        });
    }

    group.finish();
}

fn bench_aggregate(c: &mut Criterion) {
    let mut group = c.benchmark_group("aggregate");
    let aggregator = StageAggregator::default();
    let season = season();

    for size in [16, 64, 256].iter() {
        let series = create_series(*size, &["NDVI", "EVI", "NDWI", "NBR"]);
        group.bench_with_input(BenchmarkId::from_parameter(size), &series, |b, series| {
            b.iter(|| black_box(aggregator.aggregate("bench", series, &season)));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_compute_indices, bench_aggregate);
criterion_main!(benches);
