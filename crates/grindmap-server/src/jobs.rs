//! Housekeeping job handlers and their default schedules.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use grindmap_client::{SCRAPE_JOB_TYPE, ScrapeRequest};
use grindmap_core::error::{AppError, Failure};
use grindmap_core::handler::JobHandler;
use grindmap_core::job::{EnqueueOptions, EnqueueRequest, JobStatus};
use grindmap_core::job_queue::JobQueue;
use grindmap_core::scheduler::Scheduler;
use serde::Serialize;
use serde_json::{Value, json};
use uuid::Uuid;

use crate::cache::StatsCache;

pub const CLEANUP_JOB_TYPE: &str = "cleanup";
pub const CACHE_WARMUP_JOB_TYPE: &str = "cache_warmup";
pub const ANALYTICS_JOB_TYPE: &str = "analytics";

pub const CLEANUP_SCHEDULE: &str = "0 0 * * * *";
pub const CACHE_WARMUP_SCHEDULE: &str = "0 */30 * * * *";
pub const ANALYTICS_SCHEDULE: &str = "0 */5 * * * *";

/// Failed jobs sampled when tallying failure kinds.
const FAILURE_SAMPLE: usize = 1000;

/// Wraps the scrape handler so every successful scrape lands in the stats cache.
pub struct CachingScrapeHandler<H> {
    inner: H,
    cache: StatsCache,
}

impl<H: JobHandler> CachingScrapeHandler<H> {
    pub fn new(inner: H, cache: StatsCache) -> Self {
        Self { inner, cache }
    }
}

#[async_trait]
impl<H: JobHandler> JobHandler for CachingScrapeHandler<H> {
    async fn handle(&self, payload: Value) -> Result<Value, Failure> {
        let request = serde_json::from_value::<ScrapeRequest>(payload.clone()).ok();
        let stats = self.inner.handle(payload).await?;
        if let Some(request) = request {
            self.cache
                .insert(request.platform, &request.username, stats.clone())
                .await;
        }
        Ok(stats)
    }
}

/// Purges terminal jobs that finished before the retention window.
pub struct CleanupHandler<Q> {
    queue: Q,
    retention: Duration,
}

impl<Q: JobQueue> CleanupHandler<Q> {
    pub fn new(queue: Q, retention: Duration) -> Self {
        Self { queue, retention }
    }
}

#[async_trait]
impl<Q: JobQueue> JobHandler for CleanupHandler<Q> {
    async fn handle(&self, _payload: Value) -> Result<Value, Failure> {
        let retention = TimeDelta::from_std(self.retention)
            .map_err(|e| Failure::new(format!("Retention window out of range: {e}")))?;
        let cutoff = Utc::now() - retention;
        let purged = self.queue.purge_finished(cutoff).await?;
        tracing::info!(purged, %cutoff, "Purged finished jobs");
        Ok(json!({ "purged": purged, "cutoff": cutoff }))
    }
}

/// Enqueues a `scrape` job for each watched profile.
pub struct CacheWarmupHandler<Q> {
    queue: Q,
    watchlist: Vec<ScrapeRequest>,
    max_retries: u32,
}

impl<Q: JobQueue> CacheWarmupHandler<Q> {
    pub fn new(queue: Q, watchlist: Vec<ScrapeRequest>, max_retries: u32) -> Self {
        Self {
            queue,
            watchlist,
            max_retries,
        }
    }
}

#[async_trait]
impl<Q: JobQueue> JobHandler for CacheWarmupHandler<Q> {
    async fn handle(&self, _payload: Value) -> Result<Value, Failure> {
        let mut job_ids = Vec::with_capacity(self.watchlist.len());
        for request in &self.watchlist {
            let job = self
                .queue
                .enqueue(
                    EnqueueRequest::new(SCRAPE_JOB_TYPE, request.to_payload()).with_options(
                        EnqueueOptions::default().with_max_retries(self.max_retries),
                    ),
                )
                .await?;
            job_ids.push(job.id);
        }
        tracing::info!(enqueued = job_ids.len(), "Cache warmup enqueued scrapes");
        Ok(json!({ "enqueued": job_ids.len(), "job_ids": job_ids }))
    }
}

/// Point-in-time view of the queue.
#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
pub struct AnalyticsSnapshot {
    pub taken_at: DateTime<Utc>,
    /// Job count per status.
    pub counts: BTreeMap<String, u64>,
    /// Failed jobs per error kind of their last attempt.
    pub failure_kinds: BTreeMap<String, u64>,
}

/// Latest analytics snapshot, shared with the HTTP layer.
#[derive(Clone, Default)]
pub struct AnalyticsStore {
    latest: Arc<RwLock<Option<AnalyticsSnapshot>>>,
}

impl AnalyticsStore {
    pub fn latest(&self) -> Option<AnalyticsSnapshot> {
        self.latest
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn set(&self, snapshot: AnalyticsSnapshot) {
        *self
            .latest
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(snapshot);
    }
}

/// Counts jobs by status and the kinds of recent failures.
pub async fn take_snapshot<Q: JobQueue>(queue: &Q) -> Result<AnalyticsSnapshot, AppError> {
    let mut counts = BTreeMap::new();
    for status in JobStatus::ALL {
        counts.insert(status.to_string(), queue.count_by_status(status).await?);
    }

    let mut failure_kinds = BTreeMap::new();
    for job in queue.list_jobs(Some(JobStatus::Failed), FAILURE_SAMPLE).await? {
        if let Some(error) = job.last_error {
            *failure_kinds.entry(error.kind.to_string()).or_insert(0) += 1;
        }
    }

    Ok(AnalyticsSnapshot {
        taken_at: Utc::now(),
        counts,
        failure_kinds,
    })
}

pub struct AnalyticsHandler<Q> {
    queue: Q,
    store: AnalyticsStore,
}

impl<Q: JobQueue> AnalyticsHandler<Q> {
    pub fn new(queue: Q, store: AnalyticsStore) -> Self {
        Self { queue, store }
    }
}

#[async_trait]
impl<Q: JobQueue> JobHandler for AnalyticsHandler<Q> {
    async fn handle(&self, _payload: Value) -> Result<Value, Failure> {
        let snapshot = take_snapshot(&self.queue).await?;
        let value = serde_json::to_value(&snapshot)
            .map_err(|e| Failure::new(format!("Could not encode snapshot: {e}")))?;
        self.store.set(snapshot);
        Ok(value)
    }
}

/// Register the periodic housekeeping schedules.
///
/// Cache warmup is only scheduled when there is something to warm.
pub fn install_default_schedules<Q: JobQueue>(
    scheduler: &Scheduler<Q>,
    warm_cache: bool,
) -> Result<Vec<Uuid>, AppError> {
    let mut ids = vec![
        scheduler.schedule_exclusive(CLEANUP_SCHEDULE, CLEANUP_JOB_TYPE, || json!({}))?,
        scheduler.schedule_exclusive(ANALYTICS_SCHEDULE, ANALYTICS_JOB_TYPE, || json!({}))?,
    ];
    if warm_cache {
        ids.push(scheduler.schedule_exclusive(
            CACHE_WARMUP_SCHEDULE,
            CACHE_WARMUP_JOB_TYPE,
            || json!({}),
        )?);
    }
    Ok(ids)
}
