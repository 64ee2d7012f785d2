//! Cron-driven periodic enqueueing.
//!
//! Each schedule owns one loop that sleeps until the next cron occurrence
//! and enqueues a job with a freshly built payload. Firing only enqueues;
//! the work itself runs on the engine's workers.

use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use cron::Schedule;
use serde::Serialize;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::AppError;
use crate::job::{EnqueueOptions, EnqueueRequest};
use crate::job_queue::JobQueue;

/// Builds the payload for each firing.
pub type PayloadFactory = Arc<dyn Fn() -> serde_json::Value + Send + Sync>;

struct ScheduleEntry {
    id: Uuid,
    expression: String,
    schedule: Schedule,
    job_type: String,
    payload: PayloadFactory,
    options: EnqueueOptions,
    exclusive: bool,
    last_job: Mutex<Option<Uuid>>,
}

impl ScheduleEntry {
    fn last_job(&self) -> MutexGuard<'_, Option<Uuid>> {
        self.last_job
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Public view of a registered schedule.
#[derive(Debug, Clone, Serialize)]
pub struct ScheduleInfo {
    pub id: Uuid,
    pub expression: String,
    pub job_type: String,
    pub exclusive: bool,
    pub next_fire_at: Option<DateTime<Utc>>,
    pub last_job_id: Option<Uuid>,
}

struct Running {
    cancel: CancellationToken,
    tasks: JoinSet<()>,
}

struct SchedulerInner<Q: JobQueue> {
    queue: Q,
    entries: Mutex<Vec<Arc<ScheduleEntry>>>,
    running: Mutex<Option<Running>>,
}

/// Periodic trigger over a [`JobQueue`].
pub struct Scheduler<Q: JobQueue> {
    inner: Arc<SchedulerInner<Q>>,
}

impl<Q: JobQueue> Clone for Scheduler<Q> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<Q: JobQueue> Scheduler<Q> {
    pub fn new(queue: Q) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                queue,
                entries: Mutex::new(Vec::new()),
                running: Mutex::new(None),
            }),
        }
    }

    fn entries(&self) -> MutexGuard<'_, Vec<Arc<ScheduleEntry>>> {
        self.inner
            .entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn running(&self) -> MutexGuard<'_, Option<Running>> {
        self.inner
            .running
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Enqueue `job_type` on every occurrence of `expression`.
    ///
    /// Uses the `cron` crate's syntax: six fields (seconds first) with an
    /// optional trailing year.
    pub fn schedule<F>(
        &self,
        expression: &str,
        job_type: impl Into<String>,
        payload: F,
    ) -> Result<Uuid, AppError>
    where
        F: Fn() -> serde_json::Value + Send + Sync + 'static,
    {
        self.add(expression, job_type.into(), Arc::new(payload), EnqueueOptions::default(), false)
    }

    /// Like [`schedule`](Self::schedule), but a firing is skipped while the
    /// job from the previous firing has not finished.
    pub fn schedule_exclusive<F>(
        &self,
        expression: &str,
        job_type: impl Into<String>,
        payload: F,
    ) -> Result<Uuid, AppError>
    where
        F: Fn() -> serde_json::Value + Send + Sync + 'static,
    {
        self.add(expression, job_type.into(), Arc::new(payload), EnqueueOptions::default(), true)
    }

    /// Register a schedule with explicit enqueue options.
    pub fn schedule_with_options(
        &self,
        expression: &str,
        job_type: impl Into<String>,
        payload: PayloadFactory,
        options: EnqueueOptions,
        exclusive: bool,
    ) -> Result<Uuid, AppError> {
        self.add(expression, job_type.into(), payload, options, exclusive)
    }

    fn add(
        &self,
        expression: &str,
        job_type: String,
        payload: PayloadFactory,
        options: EnqueueOptions,
        exclusive: bool,
    ) -> Result<Uuid, AppError> {
        let schedule = Schedule::from_str(expression).map_err(|e| AppError::InvalidSchedule {
            expression: expression.to_string(),
            message: e.to_string(),
        })?;

        let entry = Arc::new(ScheduleEntry {
            id: Uuid::new_v4(),
            expression: expression.to_string(),
            schedule,
            job_type,
            payload,
            options,
            exclusive,
            last_job: Mutex::new(None),
        });
        let id = entry.id;

        tracing::info!(
            schedule_id = %id,
            expression,
            job_type = %entry.job_type,
            exclusive,
            "Schedule registered"
        );

        // Lock order matches start(): running, then entries. Schedules added
        // after start() get their loop immediately.
        let mut running = self.running();
        if let Some(running) = running.as_mut() {
            running.tasks.spawn(run_schedule(
                Arc::clone(&self.inner),
                Arc::clone(&entry),
                running.cancel.clone(),
            ));
        }
        self.entries().push(entry);
        Ok(id)
    }

    #[cfg(test)]
    fn running_loops(&self) -> usize {
        self.running().as_ref().map_or(0, |r| r.tasks.len())
    }

    pub fn schedules(&self) -> Vec<ScheduleInfo> {
        self.entries()
            .iter()
            .map(|e| ScheduleInfo {
                id: e.id,
                expression: e.expression.clone(),
                job_type: e.job_type.clone(),
                exclusive: e.exclusive,
                next_fire_at: e.schedule.upcoming(Utc).next(),
                last_job_id: *e.last_job(),
            })
            .collect()
    }

    /// Spawn one loop per schedule. The loops end when `cancel` fires or
    /// [`stop`](Self::stop) is called.
    pub fn start(&self, cancel: CancellationToken) -> Result<(), AppError> {
        let mut running = self.running();
        if running.is_some() {
            return Err(AppError::Generic("Scheduler is already running".to_string()));
        }

        let cancel = cancel.child_token();
        let mut tasks = JoinSet::new();
        for entry in self.entries().iter() {
            tasks.spawn(run_schedule(
                Arc::clone(&self.inner),
                Arc::clone(entry),
                cancel.clone(),
            ));
        }

        tracing::info!(schedules = tasks.len(), "Scheduler started");
        *running = Some(Running { cancel, tasks });
        Ok(())
    }

    pub async fn stop(&self) {
        let Some(mut running) = self.running().take() else {
            return;
        };
        running.cancel.cancel();
        while running.tasks.join_next().await.is_some() {}
        tracing::info!("Scheduler stopped");
    }

    /// Fire a schedule now, outside its cron cadence.
    ///
    /// Returns the enqueued job id, or `None` if an exclusive schedule
    /// skipped because its previous job is still in flight.
    pub async fn trigger(&self, schedule_id: Uuid) -> Result<Option<Uuid>, AppError> {
        let entry = self
            .entries()
            .iter()
            .find(|e| e.id == schedule_id)
            .cloned()
            .ok_or_else(|| AppError::Generic(format!("Unknown schedule: {schedule_id}")))?;
        fire(&self.inner.queue, &entry).await
    }
}

async fn run_schedule<Q: JobQueue>(
    inner: Arc<SchedulerInner<Q>>,
    entry: Arc<ScheduleEntry>,
    cancel: CancellationToken,
) {
    loop {
        let Some(next) = entry.schedule.upcoming(Utc).next() else {
            tracing::info!(schedule_id = %entry.id, "Schedule has no further occurrences");
            break;
        };
        let wait = (next - Utc::now()).to_std().unwrap_or(Duration::ZERO);

        tokio::select! {
            () = tokio::time::sleep(wait) => {}
            () = cancel.cancelled() => break,
        }

        if let Err(e) = fire(&inner.queue, &entry).await {
            tracing::error!(schedule_id = %entry.id, job_type = %entry.job_type, error = %e, "Scheduled enqueue failed");
        }
    }
}

async fn fire<Q: JobQueue>(queue: &Q, entry: &ScheduleEntry) -> Result<Option<Uuid>, AppError> {
    if entry.exclusive {
        let previous = *entry.last_job();
        if let Some(job_id) = previous
            && let Some(job) = queue.get_job(job_id).await?
            && !job.status.is_terminal()
        {
            tracing::debug!(
                schedule_id = %entry.id,
                %job_id,
                status = %job.status,
                "Previous scheduled job still in flight; skipping"
            );
            return Ok(None);
        }
    }

    let request = EnqueueRequest::new(entry.job_type.clone(), (entry.payload)())
        .with_options(entry.options.clone());
    let job = queue.enqueue(request).await?;
    *entry.last_job() = Some(job.id);

    tracing::info!(
        schedule_id = %entry.id,
        job_id = %job.id,
        job_type = %job.job_type,
        "Scheduled job enqueued"
    );
    Ok(Some(job.id))
}
