use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{HeaderMap, Request, StatusCode};
use http_body_util::BodyExt;
use tower::ServiceExt;

use grindmap_client::CodeforcesClient;
use grindmap_core::backoff::BackoffPolicy;
use grindmap_core::job::WorkerConfig;
use grindmap_core::testutil::MockLauncher;
use grindmap_server::{GrindMap, ServerConfig, routes};

pub struct TestApp {
    pub router: Router,
    pub grindmap: GrindMap<MockLauncher>,
    pub launcher: MockLauncher,
}

pub fn test_config() -> ServerConfig {
    ServerConfig {
        concurrency: 2,
        request_timeout: Duration::from_secs(5),
        max_retries: 0,
        ..ServerConfig::default()
    }
}

/// Build the app around a scripted browser and start its workers.
pub fn setup_test_app(launcher: MockLauncher, config: ServerConfig) -> TestApp {
    // Nothing listens on port 9; Codeforces is not exercised here.
    let codeforces = CodeforcesClient::new(Duration::from_secs(1))
        .unwrap()
        .with_api_base("http://127.0.0.1:9/api/")
        .unwrap();
    let worker = WorkerConfig::default()
        .with_poll_interval(Duration::from_millis(20))
        .with_backoff(
            BackoffPolicy::new(Duration::from_millis(10), Duration::from_millis(50))
                .with_jitter(Duration::ZERO),
        );

    let grindmap = GrindMap::with_worker_config(config, launcher.clone(), codeforces, worker);
    grindmap.start_workers().unwrap();

    TestApp {
        router: routes::router(grindmap.state()),
        grindmap,
        launcher,
    }
}

pub async fn send(router: &Router, request: Request<Body>) -> (StatusCode, HeaderMap, serde_json::Value) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json = if body.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&body).unwrap()
    };
    (status, headers, json)
}

pub async fn get(router: &Router, uri: &str) -> (StatusCode, serde_json::Value) {
    let (status, _, json) = send(router, Request::get(uri).body(Body::empty()).unwrap()).await;
    (status, json)
}
