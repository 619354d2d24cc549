mod common;

use common::{engine, T0};
use gavel_lib::cache::{ExpiringCache, SharedCache, TtlStatus};
use gavel_lib::clock::ManualClock;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(T0))
}

#[test]
fn scenario_a_entry_expires_after_ttl() {
    let clock = clock();
    let mut cache = ExpiringCache::new("nicknames", clock.clone());

    cache.set("u1", "A".to_string(), Some(Duration::from_secs(5)));

    clock.advance(Duration::from_secs(3));
    assert_eq!(cache.get("u1").map(String::as_str), Some("A"));

    clock.advance(Duration::from_secs(3));
    assert_eq!(cache.get("u1"), None);
    assert_eq!(cache.ttl("u1"), TtlStatus::NotExist);
}

#[test]
fn fresh_entry_reports_remaining_within_ttl() {
    let clock = clock();
    let mut cache = ExpiringCache::new("c", clock.clone());

    for secs in [1u64, 5, 60, 86_400] {
        let key = format!("k{secs}");
        let ttl = Duration::from_secs(secs);
        cache.set(key.clone(), secs, Some(ttl));

        let left = cache
            .ttl(&key)
            .remaining()
            .unwrap_or_else(|| panic!("{key} should have a remaining ttl"));
        assert!(!left.is_zero() && left <= ttl, "{key}: {left:?} not in (0, {ttl:?}]");
        assert_eq!(cache.get(&key), Some(&secs));
    }
}

#[test]
fn ttl_reports_expired_once_then_not_exist() {
    let clock = clock();
    let mut cache = ExpiringCache::new("c", clock.clone());
    cache.set("k", 1, Some(Duration::from_secs(1)));

    clock.advance(Duration::from_secs(1));
    assert_eq!(cache.ttl("k"), TtlStatus::Expired);
    assert_eq!(cache.ttl("k"), TtlStatus::NotExist);
    assert!(cache.is_empty());
}

#[test]
fn set_without_ttl_makes_entry_permanent() {
    let clock = clock();
    let mut cache = ExpiringCache::new("c", clock.clone());
    cache.set("k", 1, Some(Duration::from_secs(1)));
    cache.set("k", 2, None);

    clock.advance(Duration::from_secs(3600));
    assert_eq!(cache.ttl("k"), TtlStatus::NoExpiry);
    assert_eq!(cache.get("k"), Some(&2));
}

#[test]
fn delete_is_idempotent() {
    let clock = clock();
    let mut cache = ExpiringCache::new("c", clock);
    cache.set("k", 1, Some(Duration::from_secs(10)));

    assert!(cache.delete("k"));
    assert!(!cache.delete("k"));
    assert_eq!(cache.ttl("k"), TtlStatus::NotExist);
}

#[test]
fn union_prefers_self_and_adds_other_only_keys() {
    let clock = clock();
    let mut a = ExpiringCache::new("a", clock.clone());
    let mut b = ExpiringCache::new("b", clock.clone());
    a.set("shared", "from-a", None);
    a.set("only-a", "a", None);
    b.set("shared", "from-b", None);
    b.set("only-b", "b", None);

    let mut merged = a.union(&b);
    assert_eq!(merged.get("shared"), Some(&"from-a"));
    assert_eq!(merged.get("only-a"), Some(&"a"));
    assert_eq!(merged.get("only-b"), Some(&"b"));
    assert_eq!(merged.len(), 3);
}

#[test]
fn union_merges_expiries_independently() {
    let clock = clock();
    let mut a = ExpiringCache::new("a", clock.clone());
    let mut b = ExpiringCache::new("b", clock.clone());
    a.set("k", "permanent", None);
    b.set("k", "expiring", Some(Duration::from_secs(5)));

    // The value comes from `a`, the expiry from `b`.
    let mut merged = a.union(&b);
    assert!(matches!(merged.ttl("k"), TtlStatus::Remaining(_)));
    assert_eq!(merged.get("k"), Some(&"permanent"));

    clock.advance(Duration::from_secs(5));
    assert_eq!(merged.get("k"), None);
}

#[test]
fn difference_removes_keys_regardless_of_value() {
    let clock = clock();
    let mut a = ExpiringCache::new("a", clock.clone());
    let mut b = ExpiringCache::new("b", clock.clone());
    a.set("same", 1, Some(Duration::from_secs(10)));
    a.set("different", 1, None);
    a.set("kept", 3, Some(Duration::from_secs(10)));
    b.set("same", 1, None);
    b.set("different", 2, None);

    let mut result = a.difference(&b);
    assert_eq!(result.get("same"), None);
    assert_eq!(result.get("different"), None);
    assert_eq!(result.get("kept"), Some(&3));
    assert_eq!(result.len(), 1);
}

#[test]
fn compaction_drops_unread_expired_entries() {
    let clock = clock();
    let mut cache = ExpiringCache::new("c", clock.clone());
    cache.set("short", 1, Some(Duration::from_secs(1)));
    cache.set("long", 2, Some(Duration::from_secs(100)));
    cache.set("forever", 3, None);

    clock.advance(Duration::from_secs(2));
    // Lazy: nothing was read, so the expired entry still occupies memory.
    assert_eq!(cache.len(), 3);
    assert_eq!(cache.evict_expired(), 1);
    assert_eq!(cache.len(), 2);
}

#[test]
fn shared_cache_serializes_concurrent_writers() {
    let clock = clock();
    let cache = Arc::new(SharedCache::new("counter", clock));
    cache.set("n", 0u64, None);

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let cache = cache.clone();
            thread::spawn(move || {
                for _ in 0..1000 {
                    cache.with(|c| {
                        let n = c.get("n").copied().unwrap_or(0);
                        c.set("n", n + 1, None);
                    });
                }
            })
        })
        .collect();
    for handle in handles {
        handle
            .join()
            .unwrap_or_else(|_| panic!("writer thread panicked"));
    }

    assert_eq!(cache.get("n"), Some(8000));
}

#[test]
fn engine_named_caches_are_independent() {
    let (engine, clock, _) = engine();

    engine.cache_set("nicknames", "g1:u1", "alice", Some(Duration::from_secs(10)));
    engine.cache_set("notes", "g1:u1", "watch", None);

    assert_eq!(engine.cache_get("nicknames", "g1:u1").as_deref(), Some("alice"));
    assert_eq!(engine.cache_get("notes", "g1:u1").as_deref(), Some("watch"));
    assert_eq!(engine.cache_get("missing", "g1:u1"), None);
    assert_eq!(engine.cache_ttl("missing", "g1:u1"), TtlStatus::NotExist);

    clock.advance(Duration::from_secs(10));
    assert_eq!(engine.cache_get("nicknames", "g1:u1"), None);
    assert_eq!(engine.cache_ttl("notes", "g1:u1"), TtlStatus::NoExpiry);

    assert!(engine.cache_delete("notes", "g1:u1"));
    assert!(!engine.cache_delete("notes", "g1:u1"));
}
