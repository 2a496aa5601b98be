//! Core components of the quotajail admission library
//!
//! This module contains the fundamental building blocks:
//! - [`bucket`]: Bucket identity, stored state and per-call parameters
//! - [`engine`]: The token-bucket and ban decision function
//! - [`store`]: The atomic evaluation contract and the sharded in-memory store

pub mod bucket;
pub mod engine;
pub mod store;

pub use bucket::{BucketKey, BucketState, Limits, Outcome, Phase, Policy};
pub use engine::{Decision, decide};
pub use store::{ShardedStore, ShardedStoreBuilder, Store, StoreError};
