use super::{
    AuthorizationCache, AuthorizationSnapshot, CheckKey, ConcurrencyLedger, DenialReason,
    MeasurementProviders, ProviderRegistry, QuotaInfo, RateWindow, SlotKey, acquire_slot,
    capacity_gate, consumption_gate, rate_gate,
};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

#[test]
fn test_cache_freshness_window() {
    let cache = AuthorizationCache::new(Duration::from_secs(10));
    let t = Instant::now();
    let ttl = Duration::from_millis(250);

    for i in 0..20 {
        let key = CheckKey::feature(format!("feature_{}", i));
        cache.put(key.clone(), AuthorizationSnapshot::admitted(), ttl, t);

        // Every query inside [t, t + ttl) is a hit
        for ms in [0, 1, 100, 249] {
            assert!(
                cache.get(&key, t + Duration::from_millis(ms)).is_some(),
                "key {} should be fresh at +{}ms",
                key,
                ms
            );
        }

        // Every query at or after t + ttl is a miss
        for ms in [250, 251, 10_000] {
            assert!(cache.get(&key, t + Duration::from_millis(ms)).is_none());
        }
    }
}

#[test]
fn test_cache_returns_same_snapshot_instance() {
    let cache = AuthorizationCache::default();
    let key = CheckKey::product();
    let now = Instant::now();
    let snapshot = Arc::new(AuthorizationSnapshot::admitted().with_max_concurrency(4));

    cache.put(key.clone(), Arc::clone(&snapshot), cache.default_ttl(), now);

    let first = cache.get(&key, now).unwrap();
    let second = cache.get(&key, now).unwrap();
    assert!(Arc::ptr_eq(&first, &snapshot));
    assert!(Arc::ptr_eq(&first, &second));
}

#[test]
fn test_rate_window_then_rate_gate() {
    let window = RateWindow::new();
    let registry = ProviderRegistry::new();
    let snapshot = AuthorizationSnapshot::admitted().with_max_rate(3.0);
    let t0 = Instant::now();

    // Three events in the window: exactly at the limit
    for ms in [0, 300, 600] {
        window.record_event(t0 + Duration::from_millis(ms));
    }
    let now = t0 + Duration::from_millis(600);
    let outcome = rate_gate(&snapshot, registry.current_rate(&window, now));
    assert!(outcome.admitted);
    assert_eq!(outcome.current_rate, 3.0);

    // A fourth pushes it over
    window.record_event(now);
    let outcome = rate_gate(&snapshot, registry.current_rate(&window, now));
    assert!(!outcome.admitted);
    assert_eq!(outcome.max_rate, 3.0);

    // After the window slides past the burst, the rate drops again
    let later = t0 + Duration::from_millis(1700);
    let outcome = rate_gate(&snapshot, registry.current_rate(&window, later));
    assert!(outcome.admitted);
    assert_eq!(outcome.current_rate, 0.0);
}

#[test]
fn test_capacity_from_registered_counter() {
    let registry = ProviderRegistry::new();
    let in_use = Arc::new(std::sync::atomic::AtomicU64::new(0));
    let counter = Arc::clone(&in_use);
    registry
        .register(
            MeasurementProviders::new()
                .with_capacity_counter(move || counter.load(std::sync::atomic::Ordering::SeqCst)),
        )
        .unwrap();

    let snapshot = AuthorizationSnapshot::admitted().with_max_capacity(2);

    for (used, expected) in [(0, true), (1, true), (2, false), (5, false)] {
        in_use.store(used, std::sync::atomic::Ordering::SeqCst);
        let outcome = capacity_gate(&snapshot, registry.capacity_usage().unwrap());
        assert_eq!(outcome.admitted, expected, "used = {}", used);
        assert_eq!(outcome.current_used, used);
    }
}

#[test]
fn test_consume_arithmetic() {
    let snapshot = AuthorizationSnapshot::admitted().with_quota(QuotaInfo::new(10, 0, 0));
    assert_eq!(snapshot.remaining_quota(), 10);

    let outcome = consumption_gate(&snapshot, 3);
    assert!(outcome.admitted);
    assert_eq!(outcome.remaining, 7);
    assert!(outcome.reason.is_none());

    let denied = AuthorizationSnapshot::denied("quota_exceeded");
    let outcome = consumption_gate(&denied, 1);
    assert!(!outcome.admitted);
    assert_eq!(outcome.remaining, 0);
    assert_eq!(
        outcome.reason,
        Some(DenialReason::Authority("quota_exceeded".to_string()))
    );
}

#[test]
fn test_sequential_slot_acquisition() {
    let ledger = ConcurrencyLedger::new();
    let key = SlotKey::new("instance", CheckKey::product());
    let snapshot = AuthorizationSnapshot::admitted().with_max_concurrency(2);

    let first = acquire_slot(&snapshot, &ledger, key.clone());
    let second = acquire_slot(&snapshot, &ledger, key.clone());
    let third = acquire_slot(&snapshot, &ledger, key.clone());

    assert!(first.is_acquired());
    assert!(second.is_acquired());
    assert!(!third.is_acquired());
    assert_eq!(third.reason(), Some(&DenialReason::ConcurrencyExceeded));

    // Release slot 1; the fourth attempt now fits
    let first = first.into_guard().unwrap();
    first.release();

    let fourth = acquire_slot(&snapshot, &ledger, key.clone());
    assert!(fourth.is_acquired());
    assert_eq!(ledger.in_use(&key), 2);
}

#[test]
fn test_concurrent_slots_never_exceed_limit() {
    let ledger = ConcurrencyLedger::new();
    let key = SlotKey::new("instance", CheckKey::product());
    let snapshot = Arc::new(AuthorizationSnapshot::admitted().with_max_concurrency(4));
    let peak = Arc::new(std::sync::atomic::AtomicU64::new(0));

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let ledger = ledger.clone();
            let key = key.clone();
            let snapshot = Arc::clone(&snapshot);
            let peak = Arc::clone(&peak);
            thread::spawn(move || {
                for _ in 0..200 {
                    if let Some(guard) = acquire_slot(&snapshot, &ledger, key.clone()).into_guard()
                    {
                        let held = ledger.in_use(&key);
                        peak.fetch_max(held, std::sync::atomic::Ordering::SeqCst);
                        drop(guard);
                    }
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    assert!(peak.load(std::sync::atomic::Ordering::SeqCst) <= 4);
    assert_eq!(ledger.in_use(&key), 0);
    assert!(ledger.is_empty());
}
