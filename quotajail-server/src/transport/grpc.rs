use crate::admission::AdmissionService;
use crate::error::AdmissionError;
use crate::transport::Transport;
use crate::types::AllowRequest as ServiceRequest;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::Arc;
use tonic::{Request, Response, Status, transport::Server};

// Include the generated protobuf code
pub mod quotajail_proto {
    tonic::include_proto!("quotajail");
}

use quotajail_proto::rate_limiter_server::{RateLimiter, RateLimiterServer};
use quotajail_proto::{AllowRequest, AllowResponse};

pub struct GrpcTransport {
    addr: SocketAddr,
    service: Arc<AdmissionService>,
}

impl GrpcTransport {
    pub fn new(host: &str, port: u16, service: Arc<AdmissionService>) -> Result<Self> {
        let addr = format!("{host}:{port}")
            .parse()
            .with_context(|| format!("Invalid address: {host}:{port}"))?;
        Ok(Self { addr, service })
    }
}

#[async_trait]
impl Transport for GrpcTransport {
    async fn start(self) -> Result<()> {
        let service = RateLimiterService {
            service: self.service,
        };

        tracing::info!("gRPC server listening on {}", self.addr);

        Server::builder()
            .add_service(RateLimiterServer::new(service))
            .serve(self.addr)
            .await
            .with_context(|| format!("gRPC server on {} failed", self.addr))?;

        Ok(())
    }
}

pub struct RateLimiterService {
    service: Arc<AdmissionService>,
}

#[tonic::async_trait]
impl RateLimiter for RateLimiterService {
    async fn allow(
        &self,
        request: Request<AllowRequest>,
    ) -> Result<Response<AllowResponse>, Status> {
        let req = request.into_inner();

        let verdict = self
            .service
            .allow(ServiceRequest {
                user_id: req.user_id,
                action_key: req.action_key,
                capacity: req.capacity,
                refill_rate: req.refill_rate,
            })
            .await
            .map_err(|e| match e {
                AdmissionError::InvalidRequest(message) => Status::invalid_argument(message),
            })?;

        Ok(Response::new(AllowResponse {
            allowed: verdict.allowed,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::Metrics;
    use crate::store::LocalStore;
    use crate::types::Status as DecisionStatus;
    use quotajail::ShardedStore;
    use quotajail_proto::rate_limiter_client::RateLimiterClient;
    use tokio::time::{Duration, sleep};

    fn admission_service() -> Arc<AdmissionService> {
        Arc::new(
            AdmissionService::builder(
                Arc::new(LocalStore::new(Arc::new(ShardedStore::new()))),
                Arc::new(Metrics::new()),
            )
            .build(),
        )
    }

    async fn start_server(
        service: Arc<AdmissionService>,
    ) -> RateLimiterClient<tonic::transport::Channel> {
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let transport = GrpcTransport::new("127.0.0.1", port, service).unwrap();

        tokio::spawn(async move {
            transport.start().await.unwrap();
        });

        let url = format!("http://127.0.0.1:{port}");
        for _ in 0..50 {
            if let Ok(client) = RateLimiterClient::connect(url.clone()).await {
                return client;
            }
            sleep(Duration::from_millis(10)).await;
        }
        panic!("gRPC server did not start on port {port}");
    }

    #[tokio::test]
    async fn test_grpc_burst_and_deny() {
        let service = admission_service();
        let mut client = start_server(Arc::clone(&service)).await;

        let mut allowed_count = 0;
        for _ in 0..8 {
            let response = client
                .allow(tonic::Request::new(AllowRequest {
                    user_id: "user:grpc".to_string(),
                    action_key: "login".to_string(),
                    capacity: 5,
                    refill_rate: 0,
                }))
                .await
                .unwrap();

            if response.into_inner().allowed {
                allowed_count += 1;
            }
        }

        assert_eq!(allowed_count, 5);
        let metrics = service.metrics();
        assert_eq!(metrics.requests(DecisionStatus::Admitted, "login"), 5);
        assert_eq!(metrics.requests(DecisionStatus::Denied, "login"), 3);
    }

    #[tokio::test]
    async fn test_grpc_invalid_argument() {
        let mut client = start_server(admission_service()).await;

        let status = client
            .allow(tonic::Request::new(AllowRequest {
                user_id: "user:grpc".to_string(),
                action_key: "login".to_string(),
                capacity: 0,
                refill_rate: 1,
            }))
            .await
            .unwrap_err();

        assert_eq!(status.code(), tonic::Code::InvalidArgument);
        assert!(status.message().contains("capacity"));
    }
}
