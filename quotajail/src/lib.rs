//! # quotajail
//!
//! Token-bucket admission decisions with automatic bans for repeat offenders.
//!
//! ## Overview
//!
//! Every `(subject, action)` pair owns a bucket of tokens that refills at a
//! fixed rate per second. A request is admitted when a token is available.
//! A key that keeps getting denied is banned for a while, and a banned key is
//! rejected without looking at its tokens at all.
//!
//! The library is split in two:
//! - [`decide`]: the pure decision function, from previous state to new state
//!   and [`Outcome`]
//! - [`Store`]: the contract for applying `decide` atomically per key, with
//!   [`ShardedStore`] as the in-memory implementation
//!
//! ## Quick Start
//!
//! ```
//! use quotajail::{BucketKey, Limits, Outcome, Policy, ShardedStore, Store};
//!
//! let store = ShardedStore::new();
//! let key = BucketKey::new("user:123", "login");
//!
//! // Bucket of 5, one token back per second, ban after 5 denials in a row
//! let limits = Limits::new(5, 1);
//! let policy = Policy::new(5, 60);
//! let now = 1_700_000_000;
//!
//! match store.evaluate(&key, limits, policy, now)? {
//!     Outcome::Admitted => println!("go ahead"),
//!     Outcome::Denied => println!("slow down"),
//!     Outcome::Banned => println!("banned"),
//! }
//! # Ok::<(), quotajail::StoreError>(())
//! ```
//!
//! ## Ban State Machine
//!
//! ```text
//!            max_violations-th consecutive denial
//!   Active ───────────────────────────────────────▶ Banned
//!     ▲                                               │
//!     └──────── first request at or after ────────────┘
//!                     banned_until
//! ```
//!
//! Expiry is lazy: nothing happens when the ban ends, the next request for the
//! key notices it and resets the violation counter.
//!
//! ## Thread Safety
//!
//! [`ShardedStore`] is `Send + Sync` and meant to be shared behind an `Arc`.
//! Evaluations of the same key are serialized by the shard lock; evaluations
//! of keys in different shards run in parallel.
//!
//! ```
//! use std::sync::Arc;
//! use quotajail::ShardedStore;
//!
//! let store = Arc::new(ShardedStore::builder().shards(256).build());
//! ```

pub mod core;

pub use crate::core::{
    BucketKey, BucketState, Decision, Limits, Outcome, Phase, Policy, ShardedStore,
    ShardedStoreBuilder, Store, StoreError, decide,
};
