use super::bucket::{BucketKey, BucketState, Limits, Outcome, Policy};
use thiserror::Error;

mod sharded;

pub use sharded::{ShardedStore, ShardedStoreBuilder};

#[cfg(test)]
mod tests;

/// Failure to reach or use the shared state store
///
/// Every variant means the decision could not be made; none of them is a
/// decision in disguise.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store could not be reached or the connection broke
    #[error("store unavailable: {0}")]
    Unavailable(#[from] std::io::Error),

    /// The store did not answer in time
    #[error("store timed out")]
    Timeout,

    /// The store answered with something that is not a valid reply
    #[error("store protocol error: {0}")]
    Protocol(String),

    /// The store refused to run the evaluation
    #[error("store rejected evaluation: {0}")]
    Rejected(String),
}

/// Authoritative holder of bucket state
///
/// `evaluate` must run read, [`decide`](crate::decide), write for one key as a
/// single isolated step: two concurrent calls for the same key never see the
/// same previous state. Calls for different keys may run in parallel.
pub trait Store: Send + Sync {
    /// Atomically apply one admission decision to `key`
    fn evaluate(
        &self,
        key: &BucketKey,
        limits: Limits,
        policy: Policy,
        now: i64,
    ) -> Result<Outcome, StoreError>;

    /// Current stored state of `key`, if any
    fn snapshot(&self, key: &BucketKey) -> Result<Option<BucketState>, StoreError>;
}
