//! Prometheus scrape endpoint
//!
//! Serves `GET /metrics` in the Prometheus text exposition format on its own
//! port, independent of the request-facing transports.

use super::Transport;
use crate::metrics::Metrics;
use anyhow::{Context, Result};
use async_trait::async_trait;
use axum::{Router, extract::State, http::header, response::IntoResponse, routing::get};
use std::net::SocketAddr;
use std::sync::Arc;

const CONTENT_TYPE: &str = "text/plain; version=0.0.4";

pub struct MetricsTransport {
    addr: SocketAddr,
    metrics: Arc<Metrics>,
}

impl MetricsTransport {
    pub fn new(host: &str, port: u16, metrics: Arc<Metrics>) -> Result<Self> {
        let addr = format!("{host}:{port}")
            .parse()
            .with_context(|| format!("Invalid address: {host}:{port}"))?;
        Ok(Self { addr, metrics })
    }
}

#[async_trait]
impl Transport for MetricsTransport {
    async fn start(self) -> Result<()> {
        let app = router(self.metrics);

        tracing::info!("Metrics endpoint listening on {}", self.addr);

        let listener = tokio::net::TcpListener::bind(self.addr)
            .await
            .with_context(|| format!("Failed to bind to {}", self.addr))?;
        axum::serve(listener, app).await?;

        Ok(())
    }
}

pub fn router(metrics: Arc<Metrics>) -> Router {
    Router::new()
        .route("/metrics", get(handle_metrics))
        .with_state(metrics)
}

async fn handle_metrics(State(metrics): State<Arc<Metrics>>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, CONTENT_TYPE)],
        metrics.export_prometheus(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Status;
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode};
    use std::time::Duration;
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_metrics_endpoint() {
        let metrics = Arc::new(Metrics::new());
        metrics.record(Status::Denied, "login", Duration::from_millis(1));

        let response = router(Arc::clone(&metrics))
            .oneshot(
                Request::builder()
                    .uri("/metrics")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], CONTENT_TYPE);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains("requests_total{status=\"denied\",action_key=\"login\"} 1"));
        assert!(text.contains("decision_duration_seconds_count 1"));
    }
}
