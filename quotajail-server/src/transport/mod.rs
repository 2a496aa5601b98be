//! Network listeners of a replica
//!
//! Every listener implements the [`Transport`] trait. The request-facing
//! ones (gRPC and HTTP) share one [`AdmissionService`](crate::admission::AdmissionService)
//! and therefore one view of the buckets.
//!
//! # Available Transports
//!
//! - [`grpc`]: `quotajail.RateLimiter/Allow`, always enabled
//! - [`http`]: JSON `POST /allow`, enabled with `--http`
//! - [`metrics`]: Prometheus `GET /metrics`
//! - [`store_node`]: RESP access to the local store, enabled with `--store-node`

pub mod grpc;
pub mod http;
pub mod metrics;
pub mod store_node;



use anyhow::Result;
use async_trait::async_trait;

/// Common interface for all transport implementations
///
/// A transport owns everything it serves, so starting it only needs the
/// transport itself.
#[async_trait]
pub trait Transport {
    /// Bind the configured address and serve until an error occurs
    async fn start(self) -> Result<()>;
}
