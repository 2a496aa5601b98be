use super::*;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

const T0: i64 = 1_700_000_000;

#[test]
fn test_evaluate_persists_state() {
    let store = ShardedStore::new();
    let key = BucketKey::new("user:1", "login");

    assert!(store.snapshot(&key).unwrap().is_none());

    let outcome = store
        .evaluate(&key, Limits::new(5, 1), Policy::default(), T0)
        .unwrap();
    assert_eq!(outcome, Outcome::Admitted);

    let state = store.snapshot(&key).unwrap().unwrap();
    assert_eq!(state.tokens, 4.0);
    assert_eq!(state.last_refill, T0);
    assert_eq!(store.len(), 1);
}

#[test]
fn test_keys_are_independent() {
    let store = ShardedStore::new();
    let limits = Limits::new(2, 0);
    let policy = Policy::default();
    let alice = BucketKey::new("alice", "login");
    let bob = BucketKey::new("bob", "login");
    let alice_search = BucketKey::new("alice", "search");

    for _ in 0..2 {
        assert!(store.evaluate(&alice, limits, policy, T0).unwrap().is_admitted());
    }
    assert_eq!(
        store.evaluate(&alice, limits, policy, T0).unwrap(),
        Outcome::Denied
    );

    assert!(store.evaluate(&bob, limits, policy, T0).unwrap().is_admitted());
    assert!(
        store
            .evaluate(&alice_search, limits, policy, T0)
            .unwrap()
            .is_admitted()
    );
}

#[test]
fn test_separator_in_identity_does_not_collide() {
    let store = ShardedStore::new();
    let limits = Limits::new(1, 0);
    let policy = Policy::default();

    let first = BucketKey::new("a:b", "c");
    let second = BucketKey::new("a", "b:c");
    assert_eq!(first.to_string(), second.to_string());

    assert!(store.evaluate(&first, limits, policy, T0).unwrap().is_admitted());
    assert!(store.evaluate(&second, limits, policy, T0).unwrap().is_admitted());
    assert_eq!(store.len(), 2);
}

#[test]
fn test_shard_count_rounds_up() {
    assert_eq!(ShardedStore::builder().shards(0).build().shard_count(), 1);
    assert_eq!(ShardedStore::builder().shards(3).build().shard_count(), 4);
    assert_eq!(ShardedStore::builder().shards(64).build().shard_count(), 64);
    assert_eq!(ShardedStore::new().shard_count(), 64);
}

#[test]
fn test_no_over_admission_under_contention() {
    const THREADS: usize = 16;
    const PER_THREAD: usize = 50;
    const CAPACITY: i64 = 25;

    let store = Arc::new(ShardedStore::builder().shards(4).build());
    let barrier = Arc::new(Barrier::new(THREADS));
    let key = BucketKey::new("hot", "checkout");

    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let store = Arc::clone(&store);
            let barrier = Arc::clone(&barrier);
            let key = key.clone();
            thread::spawn(move || {
                barrier.wait();
                let mut admitted = 0;
                for _ in 0..PER_THREAD {
                    // Fixed clock: no refill during the test window
                    let outcome = store
                        .evaluate(&key, Limits::new(CAPACITY, 1), Policy::new(u32::MAX, 60), T0)
                        .unwrap();
                    if outcome.is_admitted() {
                        admitted += 1;
                    }
                }
                admitted
            })
        })
        .collect();

    let admitted: i64 = handles.into_iter().map(|h| h.join().unwrap()).sum();
    assert_eq!(admitted, CAPACITY);

    let state = store.snapshot(&key).unwrap().unwrap();
    assert_eq!(state.tokens, 0.0);
    assert_eq!(
        state.consecutive_violations as usize,
        THREADS * PER_THREAD - CAPACITY as usize
    );
}

#[test]
fn test_ban_is_shared_by_all_callers() {
    let store = Arc::new(ShardedStore::new());
    let key = BucketKey::new("abuser", "login");
    let limits = Limits::new(1, 1);
    let policy = Policy::new(3, 60);

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let store = Arc::clone(&store);
            let key = key.clone();
            thread::spawn(move || {
                (0..10)
                    .map(|_| store.evaluate(&key, limits, policy, T0).unwrap())
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    let outcomes: Vec<Outcome> = handles
        .into_iter()
        .flat_map(|h| h.join().unwrap())
        .collect();

    // One admission, two denials, then banned for the rest of the second
    assert_eq!(outcomes.iter().filter(|o| **o == Outcome::Admitted).count(), 1);
    assert_eq!(outcomes.iter().filter(|o| **o == Outcome::Denied).count(), 2);
    assert_eq!(outcomes.iter().filter(|o| **o == Outcome::Banned).count(), 77);
}

#[test]
fn test_cleanup_drops_settled_buckets() {
    let store = ShardedStore::builder()
        .shards(1)
        .cleanup_interval(Duration::from_secs(10))
        .build();
    let limits = Limits::new(5, 1);
    let policy = Policy::default();

    let idle = BucketKey::new("idle", "read");
    let busy = BucketKey::new("busy", "read");

    store.evaluate(&idle, limits, policy, T0).unwrap();
    for _ in 0..5 {
        store.evaluate(&busy, limits, policy, T0 + 9).unwrap();
    }
    assert_eq!(store.len(), 2);

    // First sweep at T0 + 10: `idle` refilled at T0 + 1, `busy` needs until T0 + 14
    store.evaluate(&busy, limits, policy, T0 + 10).unwrap();
    assert!(store.snapshot(&idle).unwrap().is_none());
    assert!(store.snapshot(&busy).unwrap().is_some());
    assert_eq!(store.evicted(), 1);
}

#[test]
fn test_cleanup_keeps_banned_buckets() {
    let store = ShardedStore::builder()
        .shards(1)
        .cleanup_interval(Duration::from_secs(1))
        .build();
    let limits = Limits::new(1, 1);
    let policy = Policy::new(1, 600);
    let key = BucketKey::new("jailed", "post");
    let other = BucketKey::new("other", "post");

    store.evaluate(&key, limits, policy, T0).unwrap();
    assert_eq!(
        store.evaluate(&key, limits, policy, T0).unwrap(),
        Outcome::Banned
    );

    // Sweeps triggered through another key must not release the ban
    for t in 1..10 {
        store.evaluate(&other, limits, policy, T0 + t).unwrap();
    }
    assert_eq!(
        store.evaluate(&key, limits, policy, T0 + 10).unwrap(),
        Outcome::Banned
    );
}

#[test]
fn test_cleanup_does_not_change_outcomes() {
    let policy = Policy::new(3, 5);
    let limits = Limits::new(3, 1);
    let swept = ShardedStore::builder()
        .shards(1)
        .cleanup_interval(Duration::from_secs(1))
        .build();
    let kept = ShardedStore::builder()
        .shards(1)
        .cleanup_interval(Duration::from_secs(u32::MAX as u64))
        .build();

    let keys: Vec<_> = (0..5).map(|i| BucketKey::new(format!("u{i}"), "op")).collect();
    let mut now = T0;

    for step in 0..400usize {
        now += (step % 7 == 0) as i64 * 3 + (step % 3 == 0) as i64;
        let key = &keys[(step * 7 + step / 5) % keys.len()];
        assert_eq!(
            swept.evaluate(key, limits, policy, now).unwrap(),
            kept.evaluate(key, limits, policy, now).unwrap(),
            "diverged at step {step}"
        );
    }

    assert!(swept.evicted() > 0);
}
