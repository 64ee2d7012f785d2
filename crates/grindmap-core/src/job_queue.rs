use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::AppError;
use crate::job::{EnqueueRequest, Job, JobError, JobStatus};

/// Job queue owning every job for its entire lifetime.
///
/// Implementations must serialize claims so that two workers never claim the
/// same job. Completion and failure calls carry the attempt number that was
/// claimed; a call for an attempt that is no longer running is stale and must
/// be ignored (returning `Ok(false)`), so every attempt resolves exactly once
/// even when the watchdog and a slow worker race.
pub trait JobQueue: Send + Sync + Clone + 'static {
    fn enqueue(&self, request: EnqueueRequest) -> impl Future<Output = Result<Job, AppError>> + Send;

    /// Atomically claim the oldest eligible job.
    ///
    /// Eligible means `pending`/`retrying` with `next_run_at <= now` and a type
    /// in `types` (empty = any). Ordering is by `next_run_at`, then enqueue
    /// order. The claim increments `attempts` and grants a lease of `lease`.
    /// Returns `None` if no job is eligible.
    fn claim_job(
        &self,
        worker_id: &str,
        types: &[String],
        lease: Duration,
    ) -> impl Future<Output = Result<Option<Job>, AppError>> + Send;

    fn complete_job(
        &self,
        job_id: Uuid,
        attempt: u32,
        result: serde_json::Value,
    ) -> impl Future<Output = Result<bool, AppError>> + Send;

    /// Record a failed attempt. If `next_run_at` is provided the job moves to
    /// `retrying`; otherwise it is marked permanently `failed`.
    fn fail_job(
        &self,
        job_id: Uuid,
        attempt: u32,
        error: JobError,
        next_run_at: Option<DateTime<Utc>>,
    ) -> impl Future<Output = Result<bool, AppError>> + Send;

    fn get_job(&self, job_id: Uuid)
    -> impl Future<Output = Result<Option<Job>, AppError>> + Send;

    /// Jobs newest first, optionally filtered by status.
    fn list_jobs(
        &self,
        status: Option<JobStatus>,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<Job>, AppError>> + Send;

    fn count_by_status(
        &self,
        status: JobStatus,
    ) -> impl Future<Output = Result<u64, AppError>> + Send;

    /// Running jobs whose lease expired before `now`.
    fn expired_leases(
        &self,
        now: DateTime<Utc>,
    ) -> impl Future<Output = Result<Vec<Job>, AppError>> + Send;

    /// Hand jobs still held by a worker back to the queue (graceful shutdown).
    ///
    /// The interrupted attempt stays counted; a job that has no attempts left
    /// is marked `failed` instead.
    fn release_worker_jobs(
        &self,
        worker_id: &str,
    ) -> impl Future<Output = Result<u64, AppError>> + Send;

    /// Delete terminal jobs that finished before `older_than`.
    fn purge_finished(
        &self,
        older_than: DateTime<Utc>,
    ) -> impl Future<Output = Result<u64, AppError>> + Send;

    /// Wait until the job reaches a terminal state.
    ///
    /// Fails with `JobNotFound` for unknown ids and `Timeout` when `timeout`
    /// elapses first.
    fn wait_for_terminal(
        &self,
        job_id: Uuid,
        timeout: Duration,
    ) -> impl Future<Output = Result<Job, AppError>> + Send;

    /// Resolves when new work may have become available.
    ///
    /// Workers race this against their poll interval, so implementations
    /// without push notifications may simply never resolve.
    fn job_available(&self) -> impl Future<Output = ()> + Send;
}
