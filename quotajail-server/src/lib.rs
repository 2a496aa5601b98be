//! # Quotajail Server
//!
//! Admission control for a fleet of stateless service replicas: every request
//! spends a token from a per-subject, per-action bucket, and subjects that keep
//! hitting an empty bucket are jailed for a while.
//!
//! ## Quick Start
//!
//! ```bash
//! # Show all available options
//! quotajail --help
//!
//! # Single replica: gRPC on 50051, metrics on 2112
//! quotajail
//!
//! # Also accept HTTP/JSON
//! quotajail --http --http-port 8080
//! ```
//!
//! ## Running a Fleet
//!
//! Replicas share nothing but bucket state. One replica serves its buckets as
//! a store node, the others point at it:
//!
//! ```bash
//! # Replica A: owns the buckets
//! quotajail --store-node --store-node-port 6379
//!
//! # Replicas B, C, ...
//! quotajail --store remote --store-addr 10.0.0.5:6379
//! ```
//!
//! All replicas must run with the same `--max-violations` and
//! `--ban-duration`.
//!
//! ## Configuration
//!
//! Configure via CLI arguments or environment variables (CLI takes precedence):
//!
//! ```bash
//! export QUOTAJAIL_MAX_VIOLATIONS=3
//! export QUOTAJAIL_BAN_DURATION=300
//! export QUOTAJAIL_ON_STORE_ERROR=closed
//! quotajail
//!
//! # List all available environment variables
//! quotajail --list-env-vars
//! ```
//!
//! ## How It Works
//!
//! - Each `(user_id, action_key)` pair owns a bucket of `capacity` tokens
//! - Tokens refill at `refill_rate` per second, never above `capacity`
//! - An admitted request spends one token
//! - A request finding the bucket empty is a violation; `max_violations`
//!   consecutive violations jail the subject for `ban_duration` seconds
//! - While jailed, every request for that bucket is rejected
//!
//! If the state store cannot be reached, `--on-store-error` decides: `open`
//! (the default) admits, `closed` rejects.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌─────────────┐
//! │    gRPC     │   │    HTTP     │
//! │  Transport  │   │  Transport  │
//! └──────┬──────┘   └──────┬──────┘
//!        └────────┬────────┘
//!           ┌─────▼─────┐      ┌──────────┐
//!           │ Admission │─────▶│ Metrics  │◀── GET /metrics
//!           │  Service  │      └──────────┘
//!           └─────┬─────┘
//!           ┌─────▼─────┐
//!           │StateStore │
//!           └──┬─────┬──┘
//!      local   │     │  remote (RESP)
//!  ┌───────────▼┐   ┌▼────────────┐
//!  │ShardedStore│   │ Store node  │
//!  └────────────┘   └─────────────┘
//! ```
//!
//! ### Client Examples
//!
//! #### HTTP Protocol (curl)
//! ```bash
//! curl -X POST http://localhost:8080/allow \
//!   -H "Content-Type: application/json" \
//!   -d '{"user_id": "user:123", "action_key": "login", "capacity": 5, "refill_rate": 1}'
//! ```
//!
//! #### gRPC Protocol
//! Use any gRPC client library with `proto/quotajail.proto`.

pub mod admission;
pub mod clock;
pub mod config;
pub mod error;
pub mod metrics;
pub mod store;
pub mod transport;
pub mod types;


// Re-export grpc types for tests
pub mod grpc {
    pub use crate::transport::grpc::quotajail_proto::*;
}
