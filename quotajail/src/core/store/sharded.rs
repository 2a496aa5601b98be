use super::{Store, StoreError};
use crate::core::bucket::{BucketKey, BucketState, Limits, Outcome, Policy};
use crate::core::engine::decide;
use ahash::{AHashMap as HashMap, RandomState};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

// Configuration constants
const DEFAULT_SHARDS: usize = 64;
const DEFAULT_CAPACITY: usize = 1000;
const CAPACITY_OVERHEAD_FACTOR: f64 = 1.3;
const DEFAULT_CLEANUP_INTERVAL_SECS: u64 = 60;

/// In-memory store that serializes evaluations per key
///
/// Keys are spread over a fixed set of shards, each guarded by its own mutex.
/// An evaluation locks only the shard owning its key, so the read, the
/// decision and the write for one key can never interleave with another
/// evaluation of the same key, while keys in other shards proceed in parallel.
///
/// Settled buckets (ban over, tokens back at capacity) are indistinguishable
/// from missing ones and are swept out of a shard at most once per
/// `cleanup_interval`.
///
/// # Example
///
/// ```
/// use quotajail::{BucketKey, Limits, Outcome, Policy, ShardedStore, Store};
///
/// let store = ShardedStore::builder()
///     .shards(16)
///     .capacity(10_000)
///     .cleanup_interval(std::time::Duration::from_secs(30))
///     .build();
///
/// let key = BucketKey::new("user:1", "search");
/// let outcome = store
///     .evaluate(&key, Limits::new(10, 1), Policy::default(), 1_700_000_000)
///     .unwrap();
/// assert_eq!(outcome, Outcome::Admitted);
/// ```
pub struct ShardedStore {
    shards: Box<[Mutex<Shard>]>,
    mask: usize,
    hasher: RandomState,
    cleanup_interval: i64,
    evicted: AtomicU64,
}

struct Shard {
    entries: HashMap<BucketKey, Entry>,
    // Unix second of the next sweep, scheduled on first write
    next_cleanup: Option<i64>,
}

struct Entry {
    state: BucketState,
    settles_at: Option<i64>,
}

/// Builder for configuring a ShardedStore
///
/// # Example
///
/// ```
/// use quotajail::ShardedStore;
/// use std::time::Duration;
///
/// let store = ShardedStore::builder()
///     .shards(128)
///     .capacity(1_000_000)
///     .cleanup_interval(Duration::from_secs(120))
///     .build();
/// assert_eq!(store.shard_count(), 128);
/// ```
pub struct ShardedStoreBuilder {
    shards: usize,
    capacity: usize,
    cleanup_interval: Duration,
}

impl ShardedStore {
    /// Create a store with 64 shards and a 60 second cleanup interval
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Create a new builder for configuring a ShardedStore
    pub fn builder() -> ShardedStoreBuilder {
        ShardedStoreBuilder::default()
    }

    fn with_config(shards: usize, capacity: usize, cleanup_interval: Duration) -> Self {
        let shards = shards.max(1).next_power_of_two();
        let per_shard = ((capacity as f64 * CAPACITY_OVERHEAD_FACTOR) as usize).div_ceil(shards);

        ShardedStore {
            shards: (0..shards)
                .map(|_| {
                    Mutex::new(Shard {
                        entries: HashMap::with_capacity(per_shard),
                        next_cleanup: None,
                    })
                })
                .collect(),
            mask: shards - 1,
            hasher: RandomState::new(),
            cleanup_interval: cleanup_interval.as_secs().min(i64::MAX as u64) as i64,
            evicted: AtomicU64::new(0),
        }
    }

    /// Number of shards, always a power of two
    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Number of buckets currently held
    pub fn len(&self) -> usize {
        self.shards.iter().map(|shard| shard.lock().entries.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total settled buckets dropped by cleanup sweeps
    pub fn evicted(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
    }

    fn shard_for(&self, key: &BucketKey) -> &Mutex<Shard> {
        let index = self.hasher.hash_one(key) as usize & self.mask;
        &self.shards[index]
    }
}

impl Shard {
    fn maybe_clean_settled(&mut self, now: i64, interval: i64) -> usize {
        let due = match self.next_cleanup {
            Some(at) => now >= at,
            None => {
                self.next_cleanup = Some(now.saturating_add(interval));
                false
            }
        };
        if !due {
            return 0;
        }

        let before = self.entries.len();
        self.entries
            .retain(|_, entry| !matches!(entry.settles_at, Some(at) if at <= now));
        self.next_cleanup = Some(now.saturating_add(interval));
        before - self.entries.len()
    }
}

impl Default for ShardedStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Store for ShardedStore {
    fn evaluate(
        &self,
        key: &BucketKey,
        limits: Limits,
        policy: Policy,
        now: i64,
    ) -> Result<Outcome, StoreError> {
        let mut shard = self.shard_for(key).lock();

        let evicted = shard.maybe_clean_settled(now, self.cleanup_interval);
        if evicted > 0 {
            self.evicted.fetch_add(evicted as u64, Ordering::Relaxed);
        }

        let previous = shard.entries.get(key).map(|entry| entry.state);
        let decision = decide(previous, limits, policy, now);
        let entry = Entry {
            state: decision.state,
            settles_at: decision.state.settles_at(limits.capacity, limits.refill_rate),
        };

        match shard.entries.get_mut(key) {
            Some(slot) => *slot = entry,
            None => {
                shard.entries.insert(key.clone(), entry);
            }
        }

        Ok(decision.outcome)
    }

    fn snapshot(&self, key: &BucketKey) -> Result<Option<BucketState>, StoreError> {
        Ok(self
            .shard_for(key)
            .lock()
            .entries
            .get(key)
            .map(|entry| entry.state))
    }
}

impl Default for ShardedStoreBuilder {
    fn default() -> Self {
        Self {
            shards: DEFAULT_SHARDS,
            capacity: DEFAULT_CAPACITY,
            cleanup_interval: Duration::from_secs(DEFAULT_CLEANUP_INTERVAL_SECS),
        }
    }
}

impl ShardedStoreBuilder {
    /// Create a new builder with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of shards, rounded up to a power of two
    ///
    /// More shards mean less contention between unrelated keys.
    pub fn shards(mut self, shards: usize) -> Self {
        self.shards = shards;
        self
    }

    /// Set the expected number of buckets across all shards
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Set the minimum time between two cleanup sweeps of a shard
    pub fn cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = interval;
        self
    }

    /// Build the ShardedStore with the configured settings
    pub fn build(self) -> ShardedStore {
        ShardedStore::with_config(self.shards, self.capacity, self.cleanup_interval)
    }
}
