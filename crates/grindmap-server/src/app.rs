//! Service wiring shared by the server binary, the CLI, and integration tests.

use std::sync::Arc;

use grindmap_client::{CodeforcesClient, PlatformScrapeHandler, SCRAPE_JOB_TYPE};
use grindmap_core::error::AppError;
use grindmap_core::job::{ProcessingOptions, WorkerConfig};
use grindmap_core::memory_queue::InMemoryJobQueue;
use grindmap_core::pool::{BrowserPool, PoolConfig};
use grindmap_core::scheduler::Scheduler;
use grindmap_core::traits::BrowserLauncher;
use grindmap_core::worker::JobEngine;
use tokio_util::sync::CancellationToken;

use crate::cache::StatsCache;
use crate::config::ServerConfig;
use crate::jobs::{
    ANALYTICS_JOB_TYPE, AnalyticsHandler, AnalyticsStore, CACHE_WARMUP_JOB_TYPE,
    CLEANUP_JOB_TYPE, CacheWarmupHandler, CachingScrapeHandler, CleanupHandler,
    install_default_schedules,
};
use crate::state::AppState;

/// The assembled engine: browser pool, queue, workers, scheduler, and cache.
pub struct GrindMap<L: BrowserLauncher> {
    config: ServerConfig,
    pool: BrowserPool<L>,
    engine: JobEngine<InMemoryJobQueue>,
    scheduler: Scheduler<InMemoryJobQueue>,
    cache: StatsCache,
    analytics: AnalyticsStore,
    cancel: CancellationToken,
}

impl ServerConfig {
    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig::default()
            .with_max_browsers(self.max_browsers)
            .with_navigation_timeout(self.navigation_timeout)
    }

    pub fn worker_config(&self) -> WorkerConfig {
        WorkerConfig::default()
            .with_worker_prefix("grindmap")
            .with_job_timeout(self.job_timeout)
    }
}

impl<L: BrowserLauncher> GrindMap<L> {
    pub fn new(config: ServerConfig, launcher: L) -> Result<Self, AppError> {
        let codeforces = CodeforcesClient::new(config.navigation_timeout)?;
        Ok(Self::with_codeforces(config, launcher, codeforces))
    }

    pub fn with_codeforces(config: ServerConfig, launcher: L, codeforces: CodeforcesClient) -> Self {
        Self::build(config, launcher, codeforces, None)
    }

    /// Like [`with_codeforces`](Self::with_codeforces) with explicit worker settings.
    pub fn with_worker_config(
        config: ServerConfig,
        launcher: L,
        codeforces: CodeforcesClient,
        worker: WorkerConfig,
    ) -> Self {
        Self::build(config, launcher, codeforces, Some(worker))
    }

    fn build(
        config: ServerConfig,
        launcher: L,
        codeforces: CodeforcesClient,
        worker: Option<WorkerConfig>,
    ) -> Self {
        let pool = BrowserPool::new(launcher, config.pool_config());
        let queue = InMemoryJobQueue::new();
        let engine = JobEngine::new(
            queue.clone(),
            worker.unwrap_or_else(|| config.worker_config()),
        );
        let cache = StatsCache::new(config.cache_ttl);
        let analytics = AnalyticsStore::default();

        engine.register_handler(
            SCRAPE_JOB_TYPE,
            CachingScrapeHandler::new(PlatformScrapeHandler::new(pool.clone(), codeforces), cache.clone()),
        );
        engine.register_handler(
            CLEANUP_JOB_TYPE,
            CleanupHandler::new(queue.clone(), config.retention),
        );
        engine.register_handler(
            CACHE_WARMUP_JOB_TYPE,
            CacheWarmupHandler::new(queue.clone(), config.watchlist.clone(), config.max_retries),
        );
        engine.register_handler(
            ANALYTICS_JOB_TYPE,
            AnalyticsHandler::new(queue.clone(), analytics.clone()),
        );

        Self {
            scheduler: Scheduler::new(queue),
            config,
            pool,
            engine,
            cache,
            analytics,
            cancel: CancellationToken::new(),
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn pool(&self) -> &BrowserPool<L> {
        &self.pool
    }

    pub fn engine(&self) -> &JobEngine<InMemoryJobQueue> {
        &self.engine
    }

    pub fn scheduler(&self) -> &Scheduler<InMemoryJobQueue> {
        &self.scheduler
    }

    pub fn cache(&self) -> &StatsCache {
        &self.cache
    }

    /// Start `concurrency` workers.
    pub fn start_workers(&self) -> Result<(), AppError> {
        self.engine
            .start_processing(ProcessingOptions::new(self.config.concurrency))
    }

    /// Install the housekeeping schedules and start firing them.
    pub fn start_scheduler(&self) -> Result<(), AppError> {
        install_default_schedules(&self.scheduler, !self.config.watchlist.is_empty())?;
        self.scheduler.start(self.cancel.clone())
    }

    pub fn state(&self) -> Arc<AppState> {
        Arc::new(AppState {
            engine: self.engine.clone(),
            cache: self.cache.clone(),
            analytics: self.analytics.clone(),
            pool: Arc::new(self.pool.clone()),
            request_timeout: self.config.request_timeout,
            max_retries: self.config.max_retries,
        })
    }

    /// Stop the scheduler, drain the workers, then close every browser.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        self.scheduler.stop().await;
        self.engine.stop().await;
        self.pool.shutdown().await;
        tracing::info!("GrindMap shut down");
    }
}
