/// Smoke-test for the Chromium-backed browser pool.
///
/// Launches a headless Chromium, scrapes one profile through the same
/// handler the worker uses, and prints the resulting stats.
///
/// Run with:
///   cargo run --example browser_smoke --features browser -- ATCODER tourist
use std::time::Duration;

use grindmap_client::{ChromeLauncher, CodeforcesClient, Platform, PlatformScrapeHandler, ScrapeRequest};
use grindmap_core::pool::{BrowserPool, PoolConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    let mut args = std::env::args().skip(1);
    let platform: Platform = args
        .next()
        .unwrap_or_else(|| "ATCODER".to_string())
        .parse()
        .map_err(anyhow::Error::msg)?;
    let username = args.next().unwrap_or_else(|| "tourist".to_string());

    println!("Launching headless browser…");
    let pool = BrowserPool::new(
        ChromeLauncher::new(),
        PoolConfig::default().with_max_browsers(1),
    );
    let handler = PlatformScrapeHandler::new(
        pool.clone(),
        CodeforcesClient::new(Duration::from_secs(10))?,
    );

    println!("Scraping {platform} profile of {username} …");
    let result = handler.scrape(&ScrapeRequest::new(platform, username)).await;
    pool.shutdown().await;

    let stats = result.map_err(|f| anyhow::anyhow!("scrape failed: {f}"))?;
    println!("{}", serde_json::to_string_pretty(&stats)?);
    println!("Pool after shutdown: {:?}", pool.stats());
    Ok(())
}
