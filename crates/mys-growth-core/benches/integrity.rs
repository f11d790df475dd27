#![allow(missing_docs)]

use criterion::{BatchSize, BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use mys_growth_core::{DataPoint, Inspection, TimeSeries, merge_point};
use time::Duration;
use time::macros::date;

fn build_series(days: i64) -> TimeSeries {
    let start = date!(2020 - 01 - 01);
    TimeSeries::from_points((0..days).map(|offset| {
        let count = 1_000 + u64::try_from(offset).unwrap_or_default();
        DataPoint::new(start + Duration::days(offset), count)
    }))
}

fn inspect_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("inspect_encoded_series");
    for &days in &[30i64, 365, 1_825] {
        let encoded = build_series(days).encode();
        group.bench_with_input(BenchmarkId::from_parameter(days), &encoded, |b, raw| {
            b.iter(|| black_box(Inspection::inspect(Some(raw.as_str()))).into_valid());
        });
    }
    group.finish();
}

fn merge_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("merge_existing_date");
    for &days in &[30i64, 365, 1_825] {
        let point = DataPoint::new(date!(2020 - 01 - 01), 1);
        group.bench_with_input(BenchmarkId::from_parameter(days), &days, |b, &days| {
            b.iter_batched(
                || build_series(days),
                |series| {
                    black_box(merge_point(Some(series), &point));
                },
                BatchSize::SmallInput,
            );
        });
    }
    group.finish();
}

criterion_group!(benches, inspect_benchmark, merge_benchmark);
criterion_main!(benches);
