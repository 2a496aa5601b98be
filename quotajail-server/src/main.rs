use anyhow::Result;
use quotajail_server::admission::AdmissionService;
use quotajail_server::config::Config;
use quotajail_server::metrics::Metrics;
use quotajail_server::store::{self, StateStore};
use quotajail_server::transport::{
    Transport, grpc::GrpcTransport, http::HttpTransport, metrics::MetricsTransport,
    store_node::StoreNodeTransport,
};
use std::sync::Arc;
use tokio::task::JoinSet;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse configuration from environment variables and CLI arguments
    let config = Config::from_env_and_args()?;

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(format!("quotajail={}", config.log_level).parse()?)
                .add_directive(format!("quotajail_server={}", config.log_level).parse()?),
        )
        .init();

    let sharded = store::create_sharded_store(&config.store);
    let state_store = store::create_state_store(&config.store, Arc::clone(&sharded));

    // Replicas may start before the store node; requests are covered by the
    // failure policy until it is reachable
    if let Err(e) = state_store.ping().await {
        tracing::warn!(
            "State store at {} is not reachable yet: {}",
            config.store.addr,
            e
        );
    }

    let metrics = Arc::new(Metrics::new());
    let service = Arc::new(
        AdmissionService::builder(state_store, Arc::clone(&metrics))
            .policy(config.policy())
            .failure_policy(config.failure_policy)
            .build(),
    );

    let host = &config.listen.host;
    let mut transport_tasks = JoinSet::new();

    let grpc = GrpcTransport::new(host, config.listen.grpc_port, Arc::clone(&service))?;
    transport_tasks.spawn(grpc.start());

    if let Some(port) = config.listen.http_port {
        let http = HttpTransport::new(host, port, Arc::clone(&service))?;
        transport_tasks.spawn(http.start());
    }

    let metrics_endpoint = MetricsTransport::new(host, config.listen.metrics_port, metrics)?;
    transport_tasks.spawn(metrics_endpoint.start());

    if let Some(node) = &config.store_node {
        let store_node = StoreNodeTransport::new(host, node.port, Arc::clone(&sharded))?;
        transport_tasks.spawn(store_node.start());
    }

    tracing::info!(
        "Quotajail started with {:?} store, max violations: {}, ban duration: {}s, on store error: {}",
        config.store.backend,
        config.max_violations,
        config.ban_duration,
        config.failure_policy
    );

    // Wait for all transport tasks to complete (they run indefinitely)
    while let Some(result) = transport_tasks.join_next().await {
        match result {
            Ok(Ok(())) => {
                tracing::info!("Transport task completed successfully");
            }
            Ok(Err(e)) => {
                tracing::error!("Transport task failed: {:#}", e);
                return Err(e);
            }
            Err(e) => {
                tracing::error!("Transport task panicked: {}", e);
                return Err(anyhow::anyhow!("Transport task panicked"));
            }
        }
    }

    Ok(())
}
