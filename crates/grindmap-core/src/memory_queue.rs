//! In-process job queue.
//!
//! All bookkeeping sits behind one mutex, which serializes claims. Two
//! `Notify` handles wake idle workers on enqueue and waiters on terminal
//! transitions.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use tokio::sync::Notify;
use uuid::Uuid;

use crate::classify::ErrorKind;
use crate::error::AppError;
use crate::job::{DEFAULT_MAX_RETRIES, EnqueueRequest, Job, JobError, JobStatus};
use crate::job_queue::JobQueue;

#[derive(Default)]
struct QueueState {
    jobs: HashMap<Uuid, Job>,
    sequence: u64,
}

impl QueueState {
    fn promote_due_retries(&mut self, now: DateTime<Utc>) {
        for job in self.jobs.values_mut() {
            if job.status == JobStatus::Retrying && job.next_run_at <= now {
                job.status = JobStatus::Pending;
                job.updated_at = now;
            }
        }
    }
}

#[derive(Default)]
struct QueueInner {
    state: Mutex<QueueState>,
    work: Notify,
    finished: Notify,
}

/// Single-process, best-effort job queue.
#[derive(Clone, Default)]
pub struct InMemoryJobQueue {
    inner: Arc<QueueInner>,
}

impl InMemoryJobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquires the state lock, recovering from poison if necessary.
    ///
    /// Retrying jobs whose delay has elapsed are moved back to `Pending`
    /// before the guard is handed out, so every reader sees the same view.
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        let mut state = self.inner.state.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("Recovered from poisoned job queue mutex");
            poisoned.into_inner()
        });
        state.promote_due_retries(Utc::now());
        state
    }

    fn snapshot(&self, job_id: Uuid) -> Option<Job> {
        self.lock().jobs.get(&job_id).cloned()
    }
}

fn to_time_delta(duration: Duration) -> TimeDelta {
    TimeDelta::from_std(duration).unwrap_or(TimeDelta::days(365))
}

impl JobQueue for InMemoryJobQueue {
    async fn enqueue(&self, request: EnqueueRequest) -> Result<Job, AppError> {
        let now = Utc::now();
        let delay = request
            .options
            .delay
            .map(to_time_delta)
            .unwrap_or_default();

        let job = {
            let mut state = self.lock();
            state.sequence += 1;
            let job = Job {
                id: Uuid::new_v4(),
                job_type: request.job_type,
                payload: request.payload,
                status: JobStatus::Pending,
                attempts: 0,
                max_retries: request.options.max_retries.unwrap_or(DEFAULT_MAX_RETRIES),
                next_run_at: now + delay,
                last_error: None,
                result: None,
                created_at: now,
                updated_at: now,
                started_at: None,
                finished_at: None,
                worker_id: None,
                lease_expires_at: None,
                sequence: state.sequence,
            };
            state.jobs.insert(job.id, job.clone());
            job
        };

        tracing::debug!(job_id = %job.id, job_type = %job.job_type, "Job enqueued");
        self.inner.work.notify_one();
        Ok(job)
    }

    async fn claim_job(
        &self,
        worker_id: &str,
        types: &[String],
        lease: Duration,
    ) -> Result<Option<Job>, AppError> {
        let now = Utc::now();
        let mut state = self.lock();

        let candidate = state
            .jobs
            .values()
            .filter(|j| j.status.is_dispatchable() && j.next_run_at <= now)
            .filter(|j| types.is_empty() || types.iter().any(|t| *t == j.job_type))
            .min_by_key(|j| (j.next_run_at, j.sequence))
            .map(|j| j.id);

        let Some(job) = candidate.and_then(|id| state.jobs.get_mut(&id)) else {
            return Ok(None);
        };

        job.status = JobStatus::Running;
        job.attempts += 1;
        job.worker_id = Some(worker_id.to_string());
        job.started_at = Some(now);
        job.updated_at = now;
        job.lease_expires_at = Some(now + to_time_delta(lease));

        Ok(Some(job.clone()))
    }

    async fn complete_job(
        &self,
        job_id: Uuid,
        attempt: u32,
        result: serde_json::Value,
    ) -> Result<bool, AppError> {
        {
            let mut state = self.lock();
            let job = state
                .jobs
                .get_mut(&job_id)
                .ok_or(AppError::JobNotFound(job_id))?;

            if job.status != JobStatus::Running || job.attempts != attempt {
                tracing::debug!(%job_id, attempt, status = %job.status, "Ignoring stale completion");
                return Ok(false);
            }

            let now = Utc::now();
            job.status = JobStatus::Succeeded;
            job.result = Some(result);
            job.finished_at = Some(now);
            job.updated_at = now;
            job.lease_expires_at = None;
        }

        self.inner.finished.notify_waiters();
        Ok(true)
    }

    async fn fail_job(
        &self,
        job_id: Uuid,
        attempt: u32,
        error: JobError,
        next_run_at: Option<DateTime<Utc>>,
    ) -> Result<bool, AppError> {
        let terminal = {
            let mut state = self.lock();
            let job = state
                .jobs
                .get_mut(&job_id)
                .ok_or(AppError::JobNotFound(job_id))?;

            if job.status != JobStatus::Running || job.attempts != attempt {
                tracing::debug!(%job_id, attempt, status = %job.status, "Ignoring stale failure");
                return Ok(false);
            }

            let now = Utc::now();
            job.last_error = Some(error);
            job.updated_at = now;
            job.lease_expires_at = None;
            job.worker_id = None;
            match next_run_at {
                Some(at) => {
                    job.status = JobStatus::Retrying;
                    job.next_run_at = at;
                    false
                }
                None => {
                    job.status = JobStatus::Failed;
                    job.finished_at = Some(now);
                    true
                }
            }
        };

        if terminal {
            self.inner.finished.notify_waiters();
        }
        Ok(true)
    }

    async fn get_job(&self, job_id: Uuid) -> Result<Option<Job>, AppError> {
        Ok(self.snapshot(job_id))
    }

    async fn list_jobs(
        &self,
        status: Option<JobStatus>,
        limit: usize,
    ) -> Result<Vec<Job>, AppError> {
        let state = self.lock();
        let mut jobs: Vec<Job> = state
            .jobs
            .values()
            .filter(|j| status.is_none_or(|s| j.status == s))
            .cloned()
            .collect();
        jobs.sort_by(|a, b| b.sequence.cmp(&a.sequence));
        jobs.truncate(limit);
        Ok(jobs)
    }

    async fn count_by_status(&self, status: JobStatus) -> Result<u64, AppError> {
        let state = self.lock();
        Ok(state.jobs.values().filter(|j| j.status == status).count() as u64)
    }

    async fn expired_leases(&self, now: DateTime<Utc>) -> Result<Vec<Job>, AppError> {
        let state = self.lock();
        Ok(state
            .jobs
            .values()
            .filter(|j| j.status == JobStatus::Running)
            .filter(|j| j.lease_expires_at.is_some_and(|at| at < now))
            .cloned()
            .collect())
    }

    async fn release_worker_jobs(&self, worker_id: &str) -> Result<u64, AppError> {
        let mut released = 0u64;
        let mut failed = 0u64;
        {
            let mut state = self.lock();
            let now = Utc::now();
            for job in state.jobs.values_mut() {
                if job.status != JobStatus::Running || job.worker_id.as_deref() != Some(worker_id) {
                    continue;
                }
                job.worker_id = None;
                job.lease_expires_at = None;
                job.updated_at = now;
                if job.can_retry() {
                    job.status = JobStatus::Pending;
                    job.next_run_at = now;
                    released += 1;
                } else {
                    job.status = JobStatus::Failed;
                    job.finished_at = Some(now);
                    job.last_error = Some(JobError::new(
                        ErrorKind::Timeout,
                        "Worker stopped before the final attempt finished",
                    ));
                    failed += 1;
                }
            }
        }

        if released > 0 {
            self.inner.work.notify_one();
        }
        if failed > 0 {
            self.inner.finished.notify_waiters();
        }
        Ok(released + failed)
    }

    async fn purge_finished(&self, older_than: DateTime<Utc>) -> Result<u64, AppError> {
        let mut state = self.lock();
        let before = state.jobs.len();
        state.jobs.retain(|_, j| {
            !(j.status.is_terminal() && j.finished_at.is_some_and(|at| at < older_than))
        });
        Ok((before - state.jobs.len()) as u64)
    }

    async fn wait_for_terminal(&self, job_id: Uuid, timeout: Duration) -> Result<Job, AppError> {
        let wait = async {
            loop {
                let notified = self.inner.finished.notified();
                tokio::pin!(notified);
                // Register interest before checking so a transition between
                // the check and the await is not missed.
                notified.as_mut().enable();

                match self.snapshot(job_id) {
                    None => return Err(AppError::JobNotFound(job_id)),
                    Some(job) if job.status.is_terminal() => return Ok(job),
                    Some(_) => {}
                }

                notified.await;
            }
        };

        tokio::time::timeout(timeout, wait)
            .await
            .unwrap_or_else(|_| Err(AppError::Timeout(timeout)))
    }

    async fn job_available(&self) {
        self.inner.work.notified().await;
    }
}
