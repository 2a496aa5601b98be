//! Shared state store access for the admission service
//!
//! The admission service talks to bucket state only through [`StateStore`].
//! Two backends exist:
//!
//! ## Local
//! - Buckets live in this process, in a [`ShardedStore`]
//! - No network hop, no failure mode
//! - Best for: a single replica, or the replica acting as store node
//!
//! ## Remote
//! - Buckets live in a store node reached over RESP
//! - Every replica pointing at the same node sees the same buckets
//! - Best for: a fleet of replicas behind a load balancer

mod remote;

pub use remote::{RemoteStore, RemoteStoreConfig};

use crate::config::{StoreBackend, StoreConfig};
use async_trait::async_trait;
use quotajail::{BucketKey, Limits, Outcome, Policy, ShardedStore, Store, StoreError};
use std::sync::Arc;
use std::time::Duration;

/// Atomic bucket evaluation, as seen by the admission service
///
/// Implementations must run the whole read-decide-write sequence for a key
/// as one isolated step. The admission service adds no locking or retries of
/// its own.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn evaluate(
        &self,
        key: &BucketKey,
        limits: Limits,
        policy: Policy,
        now: i64,
    ) -> Result<Outcome, StoreError>;

    /// Check that the store can be reached
    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

/// In-process store backed by a [`ShardedStore`]
#[derive(Clone)]
pub struct LocalStore {
    inner: Arc<ShardedStore>,
}

impl LocalStore {
    pub fn new(inner: Arc<ShardedStore>) -> Self {
        Self { inner }
    }

    /// The underlying store, shared with the store-node transport
    pub fn sharded(&self) -> &Arc<ShardedStore> {
        &self.inner
    }
}

#[async_trait]
impl StateStore for LocalStore {
    async fn evaluate(
        &self,
        key: &BucketKey,
        limits: Limits,
        policy: Policy,
        now: i64,
    ) -> Result<Outcome, StoreError> {
        // Runs to completion under the shard lock even if the caller goes away
        self.inner.evaluate(key, limits, policy, now)
    }
}

/// Build the in-memory store described by `config`
pub fn create_sharded_store(config: &StoreConfig) -> Arc<ShardedStore> {
    Arc::new(
        ShardedStore::builder()
            .shards(config.shards)
            .capacity(config.capacity)
            .cleanup_interval(Duration::from_secs(config.cleanup_interval))
            .build(),
    )
}

/// Create the state store selected by configuration
///
/// For the local backend the returned store shares `sharded`, so a store
/// node started in the same process serves the very same buckets.
pub fn create_state_store(
    config: &StoreConfig,
    sharded: Arc<ShardedStore>,
) -> Arc<dyn StateStore> {
    match config.backend {
        StoreBackend::Local => Arc::new(LocalStore::new(sharded)),
        StoreBackend::Remote => Arc::new(RemoteStore::new(
            config.addr.clone(),
            RemoteStoreConfig {
                request_timeout: Duration::from_millis(config.timeout_ms),
                connect_timeout: Duration::from_millis(config.timeout_ms),
                ..RemoteStoreConfig::default()
            },
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_local_store_shares_buckets() {
        let sharded = Arc::new(ShardedStore::new());
        let first = LocalStore::new(Arc::clone(&sharded));
        let second = LocalStore::new(Arc::clone(&sharded));
        let key = BucketKey::new("user:1", "login");
        let limits = Limits::new(2, 0);
        let policy = Policy::default();

        assert_eq!(
            first.evaluate(&key, limits, policy, 100).await.unwrap(),
            Outcome::Admitted
        );
        assert_eq!(
            second.evaluate(&key, limits, policy, 100).await.unwrap(),
            Outcome::Admitted
        );
        assert_eq!(
            first.evaluate(&key, limits, policy, 100).await.unwrap(),
            Outcome::Denied
        );
        assert_eq!(first.sharded().len(), 1);
    }
}
