use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use grindmap_client::{ChromeLauncher, Platform, SCRAPE_JOB_TYPE, ScrapeRequest};
use grindmap_core::job::{EnqueueOptions, JobStatus};
use grindmap_server::{GrindMap, ServerConfig, ShutdownSignal};

#[derive(Parser)]
#[command(name = "grindmap", version, about = "Competitive-programming profile scraper")]
struct Cli {
    /// Maximum concurrent browser processes
    #[arg(long, global = true, env = "GRINDMAP_MAX_BROWSERS")]
    max_browsers: Option<usize>,

    /// Chrome/Chromium binary (auto-detected when omitted)
    #[arg(long, global = true, env = "CHROME_BIN")]
    chrome: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scrape one profile through the job engine and print the stats
    Scrape {
        /// CODECHEF, ATCODER or CODEFORCES
        #[arg(short, long)]
        platform: Platform,

        /// Profile handle
        #[arg(short, long)]
        username: String,

        /// Retry ceiling for transient failures
        #[arg(long, env = "GRINDMAP_MAX_RETRIES")]
        max_retries: Option<u32>,

        /// Give up after this many seconds
        #[arg(long, default_value_t = 120)]
        timeout_secs: u64,
    },

    /// Run workers and the housekeeping scheduler until interrupted
    Worker {
        /// Number of concurrent workers
        #[arg(short, long, env = "GRINDMAP_CONCURRENCY")]
        concurrency: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("grindmap=info".parse()?))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = ServerConfig::from_env().context("Invalid GRINDMAP_* configuration")?;
    if let Some(max) = cli.max_browsers {
        config.max_browsers = max.max(1);
    }
    let launcher = match cli.chrome {
        Some(path) => ChromeLauncher::new().with_executable(path),
        None => ChromeLauncher::new(),
    };

    match cli.command {
        Commands::Scrape {
            platform,
            username,
            max_retries,
            timeout_secs,
        } => {
            if let Some(max) = max_retries {
                config.max_retries = max;
            }
            // One-off scrapes only need a single worker.
            config.concurrency = 1;
            let grindmap = GrindMap::new(config, launcher)?;
            let outcome = cmd_scrape(
                &grindmap,
                ScrapeRequest::new(platform, username),
                Duration::from_secs(timeout_secs),
            )
            .await;
            grindmap.shutdown().await;
            outcome?;
        }
        Commands::Worker { concurrency } => {
            if let Some(n) = concurrency {
                config.concurrency = n;
            }
            let grindmap = GrindMap::new(config, launcher)?;
            cmd_worker(&grindmap).await?;
        }
    }

    Ok(())
}

async fn cmd_scrape(
    grindmap: &GrindMap<ChromeLauncher>,
    request: ScrapeRequest,
    timeout: Duration,
) -> Result<()> {
    grindmap.start_workers()?;

    let engine = grindmap.engine();
    let job_id = engine
        .enqueue(
            SCRAPE_JOB_TYPE,
            request.to_payload(),
            EnqueueOptions::default().with_max_retries(grindmap.config().max_retries),
        )
        .await?;

    tracing::info!(%job_id, platform = %request.platform, username = %request.username, "Scraping");

    let job = engine
        .wait_for(job_id, timeout)
        .await
        .with_context(|| format!("Scrape of {} did not finish", request.username))?;

    match job.status {
        JobStatus::Succeeded => {
            let stats = job.result.unwrap_or_default();
            println!("{}", serde_json::to_string_pretty(&stats)?);
            Ok(())
        }
        _ => {
            let reason = job
                .last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "unknown error".to_string());
            anyhow::bail!(
                "Scrape failed after {} attempt(s): {reason}",
                job.attempts
            )
        }
    }
}

async fn cmd_worker(grindmap: &GrindMap<ChromeLauncher>) -> Result<()> {
    let signal = ShutdownSignal::install().context("Failed to install signal handlers")?;
    grindmap.start_workers()?;
    grindmap.start_scheduler()?;

    let config = grindmap.config();
    tracing::info!(
        concurrency = config.concurrency,
        max_browsers = config.max_browsers,
        watchlist = config.watchlist.len(),
        "Worker running; press Ctrl+C to stop"
    );

    signal.recv().await;
    grindmap.shutdown().await;
    Ok(())
}
