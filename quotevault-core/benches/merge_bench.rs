//! Criterion benchmarks for ingestion hot paths.
//!
//! Benchmarks:
//! 1. Deduplicator::merge with a growing overlap
//! 2. Validator::validate over a clean batch
//! 3. CSV and Parquet encoding

use chrono::{TimeZone, Utc};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use quotevault_core::data::{Deduplicator, SeriesFormat, Validator};
use quotevault_core::domain::{CanonicalRecord, Period, RecordSeries};

// ── Helpers ──────────────────────────────────────────────────────────

fn make_series(start: usize, n: usize, provider: &str) -> RecordSeries {
    let base = Utc.with_ymd_and_hms(2015, 1, 2, 0, 0, 0).unwrap();
    let records = (start..start + n)
        .map(|i| {
            let close = 100.0 + (i as f64 * 0.1).sin() * 2.0;
            CanonicalRecord {
                timestamp: base + chrono::Duration::days(i as i64),
                open: close - 0.3,
                high: close + 1.5,
                low: close - 1.5,
                close,
                volume: 1_000_000 + (i as i64 % 500_000),
                symbol: "SPY".into(),
                provider: provider.into(),
            }
        })
        .collect();
    RecordSeries::new("SPY", Period::Daily, records)
}

// ── Benchmarks ───────────────────────────────────────────────────────

fn bench_merge(c: &mut Criterion) {
    let dedup = Deduplicator::default();
    let existing = make_series(0, 2_520, "yahoo");

    let mut group = c.benchmark_group("dedup_merge");
    for overlap in [0usize, 250, 2_520] {
        let incoming = make_series(2_520 - overlap, 250.max(overlap), "ibkr");
        group.bench_with_input(BenchmarkId::from_parameter(overlap), &incoming, |b, incoming| {
            b.iter(|| dedup.merge(black_box(&existing), black_box(incoming)))
        });
    }
    group.finish();
}

fn bench_validate(c: &mut Criterion) {
    let validator = Validator::default();
    let series = make_series(0, 2_520, "yahoo");
    c.bench_function("validate_10y_daily", |b| {
        b.iter(|| validator.validate(black_box(&series)))
    });
}

fn bench_encode(c: &mut Criterion) {
    let series = make_series(0, 2_520, "yahoo");
    let mut group = c.benchmark_group("encode");
    for format in [SeriesFormat::Csv, SeriesFormat::Parquet] {
        group.bench_with_input(
            BenchmarkId::from_parameter(format),
            &series.records,
            |b, records| b.iter(|| format.encode(black_box(records))),
        );
    }
    group.finish();
}

criterion_group!(benches, bench_merge, bench_validate, bench_encode);
criterion_main!(benches);
