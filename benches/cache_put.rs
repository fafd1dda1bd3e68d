//! Cache insert and lookup benchmarks
//!
//! ## What We Benchmark
//!
//! - `cache_put_sequential`: backfill-style inserts, each chunk adjacent to
//!   the previous one so every put merges
//! - `cache_put_over_budget`: inserts into a cache whose budget forces a
//!   purge on every put
//! - `cache_get_best`: joining gappy wave segments for display
//!
//! ## Running Benchmarks
//!
//! ```bash
//! cargo bench --bench cache_put
//! ```

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use seisgulp::cache::TimeSeriesCache;
use seisgulp::core::WaveSegment;

const RATE: f64 = 100.0;

fn chunk(start: f64, secs: f64) -> WaveSegment {
    let n = (secs * RATE) as usize;
    WaveSegment::new(start, RATE, (0..n).map(|i| (i % 2048) as i32).collect())
}

fn bench_put_sequential(c: &mut Criterion) {
    let mut group = c.benchmark_group("cache_put_sequential");
    for chunks in [10usize, 60, 240] {
        group.throughput(Throughput::Elements(chunks as u64));
        group.bench_with_input(BenchmarkId::from_parameter(chunks), &chunks, |b, &chunks| {
            b.iter(|| {
                let cache = TimeSeriesCache::new(u64::MAX);
                // newest first, the way a gulper walks backwards
                for i in (0..chunks).rev() {
                    cache.put("AB CH", chunk(i as f64 * 60.0, 60.0));
                }
                black_box(cache.estimate_size())
            });
        });
    }
    group.finish();
}

fn bench_put_over_budget(c: &mut Criterion) {
    let budget = chunk(0.0, 60.0).samples.len() as u64 * 4 * 20;
    c.bench_function("cache_put_over_budget", |b| {
        b.iter(|| {
            let cache = TimeSeriesCache::new(budget);
            for i in 0..100 {
                cache.put(&format!("CH{i}"), chunk(0.0, 60.0));
            }
            black_box(cache.stats().purge_runs)
        });
    });
}

fn bench_get_best(c: &mut Criterion) {
    let cache = TimeSeriesCache::new(u64::MAX);
    // every other minute of an hour, so the joined view has 30 gaps
    for i in (0..60).step_by(2) {
        cache.put("AB CH", chunk(i as f64 * 60.0, 60.0));
    }
    c.bench_function("cache_get_best", |b| {
        b.iter(|| black_box(cache.get_best("AB CH", 0.0, 3600.0)))
    });
}

criterion_group!(benches, bench_put_sequential, bench_put_over_budget, bench_get_best);
criterion_main!(benches);
