use std::sync::Arc;
use std::time::Duration;

use grindmap_core::memory_queue::InMemoryJobQueue;
use grindmap_core::pool::{BrowserPool, PoolStats};
use grindmap_core::traits::BrowserLauncher;
use grindmap_core::worker::JobEngine;

use crate::cache::StatsCache;
use crate::jobs::AnalyticsStore;

/// Read-only view of a browser pool, independent of its launcher type.
pub trait PoolMonitor: Send + Sync {
    fn stats(&self) -> PoolStats;
}

impl<L: BrowserLauncher> PoolMonitor for BrowserPool<L> {
    fn stats(&self) -> PoolStats {
        BrowserPool::stats(self)
    }
}

/// Shared application state, available to all route handlers via `State<Arc<AppState>>`.
pub struct AppState {
    pub engine: JobEngine<InMemoryJobQueue>,
    pub cache: StatsCache,
    pub analytics: AnalyticsStore,
    pub pool: Arc<dyn PoolMonitor>,
    /// Upper bound on how long a scrape request waits for its job.
    pub request_timeout: Duration,
    /// Retry ceiling for jobs enqueued over HTTP.
    pub max_retries: u32,
}
