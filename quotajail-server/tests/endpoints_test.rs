use quotajail::ShardedStore;
use quotajail_server::admission::AdmissionService;
use quotajail_server::grpc::rate_limiter_client::RateLimiterClient;
use quotajail_server::metrics::Metrics;
use quotajail_server::store::LocalStore;
use quotajail_server::transport::{
    Transport, grpc::GrpcTransport, http::HttpTransport, metrics::MetricsTransport,
};
use serde_json::json;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::time::{Duration, sleep};

struct Replica {
    grpc_port: u16,
    http_port: u16,
    metrics_port: u16,
}

async fn free_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

async fn start_replica() -> Replica {
    let replica = Replica {
        grpc_port: free_port().await,
        http_port: free_port().await,
        metrics_port: free_port().await,
    };

    let metrics = Arc::new(Metrics::new());
    let service = Arc::new(
        AdmissionService::builder(
            Arc::new(LocalStore::new(Arc::new(ShardedStore::new()))),
            Arc::clone(&metrics),
        )
        .build(),
    );

    let grpc = GrpcTransport::new("127.0.0.1", replica.grpc_port, Arc::clone(&service)).unwrap();
    let http = HttpTransport::new("127.0.0.1", replica.http_port, service).unwrap();
    let metrics = MetricsTransport::new("127.0.0.1", replica.metrics_port, metrics).unwrap();
    tokio::spawn(grpc.start());
    tokio::spawn(http.start());
    tokio::spawn(metrics.start());

    // Give servers time to start
    sleep(Duration::from_millis(200)).await;
    replica
}

#[tokio::test]
async fn test_grpc_and_http_share_buckets_and_metrics() {
    let replica = start_replica().await;
    let client = reqwest::Client::new();

    let mut grpc = RateLimiterClient::connect(format!("http://127.0.0.1:{}", replica.grpc_port))
        .await
        .unwrap();

    for _ in 0..2 {
        let response = grpc
            .allow(quotajail_server::grpc::AllowRequest {
                user_id: "user:42".to_string(),
                action_key: "checkout".to_string(),
                capacity: 3,
                refill_rate: 0,
            })
            .await
            .unwrap();
        assert!(response.into_inner().allowed);
    }

    let body = json!({
        "user_id": "user:42",
        "action_key": "checkout",
        "capacity": 3,
        "refill_rate": 0,
    });
    let allow_url = format!("http://127.0.0.1:{}/allow", replica.http_port);

    let response: serde_json::Value = client
        .post(&allow_url)
        .json(&body)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(response, json!({ "allowed": true }));

    // Third token spent over gRPC and HTTP together
    let response: serde_json::Value = client
        .post(&allow_url)
        .json(&body)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(response, json!({ "allowed": false }));

    let scrape = client
        .get(format!("http://127.0.0.1:{}/metrics", replica.metrics_port))
        .send()
        .await
        .unwrap();
    assert!(scrape.status().is_success());

    let text = scrape.text().await.unwrap();
    assert!(text.contains("requests_total{status=\"admitted\",action_key=\"checkout\"} 3"));
    assert!(text.contains("requests_total{status=\"denied\",action_key=\"checkout\"} 1"));
    assert!(text.contains("decision_duration_seconds_count 4"));
    assert!(text.contains("# TYPE uptime_seconds gauge"));
}

#[tokio::test]
async fn test_http_rejects_invalid_request() {
    let replica = start_replica().await;

    let response = reqwest::Client::new()
        .post(format!("http://127.0.0.1:{}/allow", replica.http_port))
        .json(&json!({
            "user_id": "user:1",
            "action_key": "login",
            "capacity": -1,
            "refill_rate": 1,
        }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
    let body: serde_json::Value = response.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("capacity"));

    let health = reqwest::get(format!("http://127.0.0.1:{}/health", replica.http_port))
        .await
        .unwrap();
    assert_eq!(health.text().await.unwrap(), "OK");
}
