//! HTTP/JSON transport for easy integration
//!
//! # API Endpoints
//!
//! ## POST /allow
//!
//! Ask whether a subject may perform an action.
//!
//! ### Request Body
//!
//! ```json
//! {
//!   "user_id": "user:123",
//!   "action_key": "login",
//!   "capacity": 5,
//!   "refill_rate": 1
//! }
//! ```
//!
//! ### Response
//!
//! ```json
//! { "allowed": true }
//! ```
//!
//! A malformed request is answered with 400 and `{"error": "..."}`.
//!
//! ## GET /health
//!
//! Health check endpoint. Returns "OK" with 200 status.

use super::Transport;
use crate::admission::AdmissionService;
use crate::error::AdmissionError;
use crate::types::{AllowRequest, AllowResponse};
use anyhow::{Context, Result};
use async_trait::async_trait;
use axum::{
    Router,
    extract::State,
    http::StatusCode,
    response::Json,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;

/// Error response format
#[derive(Debug, Serialize, Deserialize)]
pub struct HttpErrorResponse {
    /// Error message
    pub error: String,
}

/// HTTP transport implementation
pub struct HttpTransport {
    addr: SocketAddr,
    service: Arc<AdmissionService>,
}

impl HttpTransport {
    pub fn new(host: &str, port: u16, service: Arc<AdmissionService>) -> Result<Self> {
        let addr = format!("{host}:{port}")
            .parse()
            .with_context(|| format!("Invalid address: {host}:{port}"))?;
        Ok(Self { addr, service })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn start(self) -> Result<()> {
        let app = router(self.service);

        tracing::info!("HTTP server listening on {}", self.addr);

        let listener = tokio::net::TcpListener::bind(self.addr)
            .await
            .with_context(|| format!("Failed to bind to {}", self.addr))?;
        axum::serve(listener, app).await?;

        Ok(())
    }
}

/// Routes of the HTTP transport
pub fn router(service: Arc<AdmissionService>) -> Router {
    Router::new()
        .route("/allow", post(handle_allow))
        .route("/health", get(|| async { "OK" }))
        .with_state(service)
}

async fn handle_allow(
    State(service): State<Arc<AdmissionService>>,
    Json(req): Json<AllowRequest>,
) -> Result<Json<AllowResponse>, (StatusCode, Json<HttpErrorResponse>)> {
    match service.allow(req).await {
        Ok(verdict) => Ok(Json(verdict.into())),
        Err(AdmissionError::InvalidRequest(message)) => {
            tracing::debug!("Rejected malformed request: {}", message);
            Err((
                StatusCode::BAD_REQUEST,
                Json(HttpErrorResponse { error: message }),
            ))
        }
    }
}
