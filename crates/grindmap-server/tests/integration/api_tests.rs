use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use uuid::Uuid;

use grindmap_client::platforms::codechef;
use grindmap_core::error::Failure;
use grindmap_core::testutil::MockLauncher;

use crate::integration::common::{get, send, setup_test_app, test_config};

const ALICE_PROFILE: &str = r#"
    <html><head><title>alice | CodeChef</title></head>
    <body>
      <div class="rating-number">1850</div>
      <div class="problems-solved">Total Problems Solved: 212</div>
    </body></html>"#;

fn alice_launcher() -> MockLauncher {
    MockLauncher::new().with_page(&codechef::profile_url("alice"), ALICE_PROFILE)
}

#[tokio::test]
async fn health_reports_pool_and_queue() {
    let app = setup_test_app(MockLauncher::new(), test_config());

    let (status, json) = get(&app.router, "/health").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["processing"], true);
    assert_eq!(json["pool"]["browsers"], 0);
    assert_eq!(json["queue"]["pending"], 0);
}

#[tokio::test]
async fn health_is_unavailable_after_shutdown() {
    let app = setup_test_app(MockLauncher::new(), test_config());
    app.grindmap.shutdown().await;

    let (status, json) = get(&app.router, "/health").await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(json["status"], "shutting_down");
    assert_eq!(json["processing"], false);
}

#[tokio::test]
async fn lists_supported_platforms() {
    let app = setup_test_app(MockLauncher::new(), test_config());

    let (status, json) = get(&app.router, "/api/scrape/platforms").await;

    assert_eq!(status, StatusCode::OK);
    let names: Vec<&str> = json["platforms"]
        .as_array()
        .unwrap()
        .iter()
        .map(|p| p["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["CODECHEF", "ATCODER", "CODEFORCES"]);
}

// ---------------------------------------------------------------------------
// Scrape endpoint
// ---------------------------------------------------------------------------

#[tokio::test]
async fn scrape_returns_stats_and_echoes_request_id() {
    let app = setup_test_app(alice_launcher(), test_config());

    let (status, headers, json) = send(
        &app.router,
        Request::get("/api/scrape/codechef/alice")
            .header("x-request-id", "req-123")
            .body(Body::empty())
            .unwrap(),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["success"], true);
    assert_eq!(json["cached"], false);
    assert_eq!(json["trace_id"], "req-123");
    assert_eq!(headers["x-request-id"], "req-123");
    assert_eq!(json["data"]["platform"], "CODECHEF");
    assert_eq!(json["data"]["data"]["rating"], 1850);
    assert_eq!(json["data"]["data"]["problems_solved"], 212);
    assert_eq!(app.launcher.pages_closed(), 1);
}

#[tokio::test]
async fn scrape_serves_cache_until_refresh() {
    let app = setup_test_app(alice_launcher(), test_config());

    let (status, first) = get(&app.router, "/api/scrape/CODECHEF/alice").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["cached"], false);
    assert!(Uuid::parse_str(first["trace_id"].as_str().unwrap()).is_ok());

    let (_, second) = get(&app.router, "/api/scrape/CODECHEF/Alice").await;
    assert_eq!(second["cached"], true);
    assert_eq!(second["data"], first["data"]);
    assert_eq!(app.launcher.visited().len(), 1);

    let (_, refreshed) = get(&app.router, "/api/scrape/CODECHEF/alice?refresh=true").await;
    assert_eq!(refreshed["cached"], false);
    assert_eq!(app.launcher.visited().len(), 2);
}

#[tokio::test]
async fn scrape_unknown_user_is_404() {
    let launcher = MockLauncher::new().with_page(
        &codechef::profile_url("ghost"),
        "<html><head><title>404 Page Not Found</title></head><body></body></html>",
    );
    let mut config = test_config();
    config.max_retries = 3;
    let app = setup_test_app(launcher, config);

    let (status, json) = get(&app.router, "/api/scrape/codechef/ghost").await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["success"], false);
    assert_eq!(json["error"]["kind"], "user_not_found");
    assert!(json.get("data").is_none());
    // Not retried despite the retry budget.
    assert_eq!(app.launcher.visited().len(), 1);
}

#[tokio::test]
async fn scrape_rate_limit_maps_to_429() {
    let launcher = MockLauncher::new().with_page_error(
        &codechef::profile_url("alice"),
        Failure::http(429, "Too many requests"),
    );
    let app = setup_test_app(launcher, test_config());

    let (status, json) = get(&app.router, "/api/scrape/codechef/alice").await;

    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(json["error"]["kind"], "rate_limit");
}

#[tokio::test]
async fn scrape_retries_transient_failures() {
    let launcher = MockLauncher::new().with_responses(
        &codechef::profile_url("alice"),
        vec![
            Err(Failure::network("Network error: connection reset")),
            Ok(ALICE_PROFILE.to_string()),
        ],
    );
    let mut config = test_config();
    config.max_retries = 2;
    let app = setup_test_app(launcher, config);

    let (status, json) = get(&app.router, "/api/scrape/codechef/alice").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["data"]["rating"], 1850);
    assert_eq!(app.launcher.visited().len(), 2);
}

#[tokio::test]
async fn scrape_rejects_bad_input() {
    let app = setup_test_app(MockLauncher::new(), test_config());

    let (status, json) = get(&app.router, "/api/scrape/leetcode/alice").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"]["kind"], "validation");

    let (status, json) = get(&app.router, "/api/scrape/codechef/bad%21name").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"]["kind"], "validation");

    assert!(app.launcher.visited().is_empty());
}

#[tokio::test]
async fn scrape_times_out_with_504() {
    let launcher = alice_launcher().with_navigation_delay(Duration::from_millis(500));
    let mut config = test_config();
    config.request_timeout = Duration::from_millis(100);
    let app = setup_test_app(launcher, config);

    let (status, json) = get(&app.router, "/api/scrape/codechef/alice").await;

    assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(json["error"]["kind"], "timeout");
    assert_eq!(json["error"]["message"], "Timed out after 100ms");
}

// ---------------------------------------------------------------------------
// Jobs endpoints
// ---------------------------------------------------------------------------

fn post_job(body: serde_json::Value) -> Request<Body> {
    Request::post("/api/jobs")
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(&body).unwrap()))
        .unwrap()
}

#[tokio::test]
async fn create_and_poll_job() {
    let app = setup_test_app(MockLauncher::new(), test_config());

    let (status, _, json) = send(&app.router, post_job(serde_json::json!({"job_type": "analytics"}))).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let job_id: Uuid = json["job_id"].as_str().unwrap().parse().unwrap();

    app.grindmap
        .engine()
        .wait_for(job_id, Duration::from_secs(5))
        .await
        .unwrap();

    let (status, json) = get(&app.router, &format!("/api/jobs/{job_id}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["id"], job_id.to_string());
    assert_eq!(json["job_type"], "analytics");
    assert_eq!(json["status"], "succeeded");
    assert_eq!(json["attempts"], 1);

    let (status, json) = get(&app.router, "/api/jobs/stats").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["counts"]["succeeded"], 1);
    assert!(json["analytics"]["taken_at"].is_string());
}

#[tokio::test]
async fn delayed_job_stays_pending() {
    let app = setup_test_app(MockLauncher::new(), test_config());

    let (status, _, json) = send(
        &app.router,
        post_job(serde_json::json!({"job_type": "cleanup", "delay_ms": 60_000, "max_retries": 1})),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(json["status"], "pending");

    let (status, json) = get(&app.router, "/api/jobs?status=pending").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["total"], 1);
    assert_eq!(json["jobs"][0]["max_retries"], 1);
}

#[tokio::test]
async fn create_job_rejects_unknown_type() {
    let app = setup_test_app(MockLauncher::new(), test_config());

    let (status, _, json) = send(&app.router, post_job(serde_json::json!({"job_type": "mine_bitcoin"}))).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "unknown_job_type");
}

#[tokio::test]
async fn unknown_job_is_404() {
    let app = setup_test_app(MockLauncher::new(), test_config());

    let (status, json) = get(&app.router, &format!("/api/jobs/{}", Uuid::new_v4())).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["error"], "not_found");
}

#[tokio::test]
async fn list_jobs_rejects_unknown_status() {
    let app = setup_test_app(MockLauncher::new(), test_config());

    let (status, json) = get(&app.router, "/api/jobs?status=cancelled").await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "validation_error");
}

#[tokio::test]
async fn openapi_document_is_served() {
    let app = setup_test_app(MockLauncher::new(), test_config());

    let (status, json) = get(&app.router, "/api-docs/openapi.json").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["info"]["title"], "GrindMap API");
}
