use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use licensegate::{
    AuthorizationCache, AuthorizationSnapshot, CheckKey, ConcurrencyLedger, QuotaInfo,
    RateWindow, SlotKey, acquire_slot, consumption_gate,
};
use std::hint::black_box;
use std::time::{Duration, Instant};

/// Cache lookups on a warm cache
fn benchmark_cache_hit(c: &mut Criterion) {
    let mut group = c.benchmark_group("cache");
    group.throughput(Throughput::Elements(1));

    let cache = AuthorizationCache::new(Duration::from_secs(3600));
    let now = Instant::now();
    let keys: Vec<CheckKey> = (0..1_000)
        .map(|i| CheckKey::feature(format!("feature_{}", i)))
        .collect();

    for key in &keys {
        cache.put(
            key.clone(),
            AuthorizationSnapshot::admitted().with_quota(QuotaInfo::new(1000, 0, 0)),
            cache.default_ttl(),
            now,
        );
    }

    group.bench_function("hit_then_consume", |b| {
        let mut counter = 0usize;
        b.iter(|| {
            let key = &keys[counter % keys.len()];
            counter += 1;

            let snapshot = cache.get(black_box(key), black_box(now)).unwrap();
            black_box(consumption_gate(&snapshot, 1))
        });
    });

    group.bench_function("miss", |b| {
        let missing = CheckKey::feature("not_cached");
        b.iter(|| black_box(cache.get(black_box(&missing), black_box(now))));
    });

    group.finish();
}

/// Recording and reading the sliding window at steady state
fn benchmark_rate_window(c: &mut Criterion) {
    let mut group = c.benchmark_group("rate_window");
    group.throughput(Throughput::Elements(1));

    group.bench_function("record_and_read", |b| {
        let window = RateWindow::new();
        let start = Instant::now();
        let mut tick = 0u64;

        b.iter(|| {
            // 10k events per simulated second keeps the window populated
            let now = start + Duration::from_micros(tick * 100);
            tick += 1;

            window.record_event(black_box(now));
            black_box(window.current_rate(now))
        });
    });

    group.finish();
}

/// Acquire and release one slot under an uncontended ledger
fn benchmark_ledger(c: &mut Criterion) {
    let mut group = c.benchmark_group("ledger");
    group.throughput(Throughput::Elements(1));

    let ledger = ConcurrencyLedger::new();
    let snapshot = AuthorizationSnapshot::admitted().with_max_concurrency(64);
    let key = SlotKey::new("bench-instance", CheckKey::product());

    group.bench_function("acquire_release", |b| {
        b.iter(|| {
            let outcome = acquire_slot(&snapshot, &ledger, black_box(key.clone()));
            black_box(outcome.is_acquired())
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    benchmark_cache_hit,
    benchmark_rate_window,
    benchmark_ledger
);
criterion_main!(benches);
