use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Duration;

use chrono::{TimeDelta, Utc};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tokio_util::task::AbortOnDropHandle;
use uuid::Uuid;

use crate::classify::{ErrorKind, classify};
use crate::error::AppError;
use crate::handler::JobHandler;
use crate::job::{EnqueueOptions, EnqueueRequest, Job, JobError, ProcessingOptions, WorkerConfig};
use crate::job_queue::JobQueue;
use crate::traits::{NoopNotifier, Notifier};

/// Events emitted by the engine for monitoring/logging.
#[derive(Debug, Clone)]
pub enum WorkerEvent<'a> {
    Started {
        worker_id: &'a str,
    },
    JobClaimed {
        worker_id: &'a str,
        job: &'a Job,
    },
    JobCompleted {
        job_id: Uuid,
        job_type: &'a str,
        attempt: u32,
    },
    JobFailed {
        job_id: Uuid,
        job_type: &'a str,
        attempt: u32,
        kind: ErrorKind,
        error: &'a str,
        will_retry: bool,
    },
    LeaseExpired {
        job_id: Uuid,
        worker_id: Option<&'a str>,
    },
    ShuttingDown {
        worker_id: &'a str,
        jobs_released: u64,
    },
    Stopped {
        worker_id: &'a str,
    },
}

impl WorkerEvent<'_> {
    pub fn label(&self) -> &'static str {
        match self {
            WorkerEvent::Started { .. } => "started",
            WorkerEvent::JobClaimed { .. } => "job_claimed",
            WorkerEvent::JobCompleted { .. } => "job_completed",
            WorkerEvent::JobFailed { .. } => "job_failed",
            WorkerEvent::LeaseExpired { .. } => "lease_expired",
            WorkerEvent::ShuttingDown { .. } => "shutting_down",
            WorkerEvent::Stopped { .. } => "stopped",
        }
    }
}

/// Trait for receiving worker events (decoupled logging).
pub trait WorkerReporter: Send + Sync {
    fn report(&self, event: WorkerEvent<'_>) {
        let _ = event;
    }
}

/// Reporter that uses the `tracing` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingWorkerReporter;

impl WorkerReporter for TracingWorkerReporter {
    fn report(&self, event: WorkerEvent<'_>) {
        match event {
            WorkerEvent::Started { worker_id } => {
                tracing::debug!(%worker_id, "Worker started");
            }
            WorkerEvent::JobClaimed { worker_id, job } => {
                tracing::info!(
                    %worker_id,
                    job_id = %job.id,
                    job_type = %job.job_type,
                    attempt = job.attempts,
                    "Job claimed"
                );
            }
            WorkerEvent::JobCompleted {
                job_id,
                job_type,
                attempt,
            } => {
                tracing::info!(%job_id, %job_type, attempt, "Job completed");
            }
            WorkerEvent::JobFailed {
                job_id,
                job_type,
                attempt,
                kind,
                error,
                will_retry,
            } => {
                tracing::warn!(%job_id, %job_type, attempt, %kind, %error, %will_retry, "Job failed");
            }
            WorkerEvent::LeaseExpired { job_id, worker_id } => {
                tracing::warn!(%job_id, ?worker_id, "Job lease expired");
            }
            WorkerEvent::ShuttingDown {
                worker_id,
                jobs_released,
            } => {
                tracing::info!(%worker_id, %jobs_released, "Worker shutting down");
            }
            WorkerEvent::Stopped { worker_id } => {
                tracing::debug!(%worker_id, "Worker stopped");
            }
        }
    }
}

struct Processing {
    cancel: CancellationToken,
    tasks: JoinSet<()>,
    worker_ids: Vec<String>,
}

struct EngineInner<Q: JobQueue> {
    queue: Q,
    config: WorkerConfig,
    handlers: RwLock<HashMap<String, Arc<dyn JobHandler>>>,
    reporter: Arc<dyn WorkerReporter>,
    notifier: Arc<dyn Notifier>,
    processing: Mutex<Option<Processing>>,
}

/// Job engine: handler registry, worker loops, and lease watchdog over a [`JobQueue`].
///
/// Cloning is cheap; clones share the same registry and workers.
pub struct JobEngine<Q: JobQueue> {
    inner: Arc<EngineInner<Q>>,
}

impl<Q: JobQueue> Clone for JobEngine<Q> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<Q: JobQueue> JobEngine<Q> {
    pub fn new(queue: Q, config: WorkerConfig) -> Self {
        Self::with_observers(
            queue,
            config,
            Arc::new(TracingWorkerReporter),
            Arc::new(NoopNotifier),
        )
    }

    pub fn with_observers(
        queue: Q,
        config: WorkerConfig,
        reporter: Arc<dyn WorkerReporter>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                queue,
                config,
                handlers: RwLock::new(HashMap::new()),
                reporter,
                notifier,
                processing: Mutex::new(None),
            }),
        }
    }

    pub fn queue(&self) -> &Q {
        &self.inner.queue
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.inner.config
    }

    /// Register the handler for `job_type`, replacing any previous one.
    pub fn register_handler<H>(&self, job_type: impl Into<String>, handler: H)
    where
        H: JobHandler + 'static,
    {
        let job_type = job_type.into();
        let mut handlers = self
            .inner
            .handlers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if handlers.insert(job_type.clone(), Arc::new(handler)).is_some() {
            tracing::debug!(%job_type, "Replaced job handler");
        }
    }

    pub fn registered_types(&self) -> Vec<String> {
        let handlers = self
            .inner
            .handlers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut types: Vec<String> = handlers.keys().cloned().collect();
        types.sort();
        types
    }

    /// Enqueue a job and return its id.
    pub async fn enqueue(
        &self,
        job_type: impl Into<String>,
        payload: serde_json::Value,
        options: EnqueueOptions,
    ) -> Result<Uuid, AppError> {
        let request = EnqueueRequest::new(job_type, payload).with_options(options);
        let job = self.inner.queue.enqueue(request).await?;
        Ok(job.id)
    }

    /// Wait for a job to succeed or fail permanently.
    pub async fn wait_for(&self, job_id: Uuid, timeout: Duration) -> Result<Job, AppError> {
        self.inner.queue.wait_for_terminal(job_id, timeout).await
    }

    pub fn is_processing(&self) -> bool {
        self.lock_processing().is_some()
    }

    fn lock_processing(&self) -> MutexGuard<'_, Option<Processing>> {
        self.inner
            .processing
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Spawn `concurrency` worker loops and one lease watchdog.
    pub fn start_processing(&self, options: ProcessingOptions) -> Result<(), AppError> {
        if options.concurrency == 0 {
            return Err(AppError::ConfigError(
                "concurrency must be at least 1".to_string(),
            ));
        }

        let mut processing = self.lock_processing();
        if processing.is_some() {
            return Err(AppError::Generic(
                "Job engine is already processing".to_string(),
            ));
        }

        let cancel = CancellationToken::new();
        let mut tasks = JoinSet::new();
        let types: Arc<[String]> = options.types.into();
        let mut worker_ids = Vec::with_capacity(options.concurrency);

        for n in 0..options.concurrency {
            let worker_id = format!("{}-{}", self.inner.config.worker_prefix, n);
            worker_ids.push(worker_id.clone());
            tasks.spawn(Arc::clone(&self.inner).run_worker(
                worker_id,
                Arc::clone(&types),
                cancel.clone(),
            ));
        }
        tasks.spawn(Arc::clone(&self.inner).run_watchdog(cancel.clone()));

        tracing::info!(
            concurrency = options.concurrency,
            types = ?types,
            "Job processing started"
        );

        *processing = Some(Processing {
            cancel,
            tasks,
            worker_ids,
        });
        Ok(())
    }

    /// Stop all loops.
    ///
    /// In-flight jobs get `drain_timeout` to finish. Anything still running
    /// afterwards is aborted and handed back to the queue.
    pub async fn stop(&self) {
        let Some(mut processing) = self.lock_processing().take() else {
            return;
        };

        processing.cancel.cancel();

        let drained = tokio::time::timeout(self.inner.config.drain_timeout, async {
            while processing.tasks.join_next().await.is_some() {}
        })
        .await
        .is_ok();

        if !drained {
            tracing::warn!(
                in_flight = processing.tasks.len(),
                "Drain timeout elapsed; abandoning in-flight jobs"
            );
            processing.tasks.shutdown().await;
        }

        for worker_id in &processing.worker_ids {
            match self.inner.queue.release_worker_jobs(worker_id).await {
                Ok(released) => self.inner.reporter.report(WorkerEvent::ShuttingDown {
                    worker_id,
                    jobs_released: released,
                }),
                Err(e) => {
                    tracing::error!(%worker_id, error = %e, "Failed to release worker jobs");
                }
            }
        }

        tracing::info!("Job processing stopped");
    }
}

impl<Q: JobQueue> EngineInner<Q> {
    fn handler(&self, job_type: &str) -> Option<Arc<dyn JobHandler>> {
        self.handlers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(job_type)
            .cloned()
    }

    async fn run_worker(
        self: Arc<Self>,
        worker_id: String,
        types: Arc<[String]>,
        cancel: CancellationToken,
    ) {
        self.reporter.report(WorkerEvent::Started {
            worker_id: &worker_id,
        });

        loop {
            if cancel.is_cancelled() {
                break;
            }

            match self
                .queue
                .claim_job(&worker_id, &types, self.config.lease_timeout())
                .await
            {
                Ok(Some(job)) => {
                    self.reporter.report(WorkerEvent::JobClaimed {
                        worker_id: &worker_id,
                        job: &job,
                    });
                    self.process_job(&job).await;
                }
                Ok(None) => {
                    tokio::select! {
                        () = tokio::time::sleep(self.config.poll_interval) => {}
                        () = self.queue.job_available() => {}
                        () = cancel.cancelled() => break,
                    }
                }
                Err(e) => {
                    tracing::error!(%worker_id, error = %e, "Failed to claim job");
                    tokio::select! {
                        () = tokio::time::sleep(self.config.poll_interval * 2) => {}
                        () = cancel.cancelled() => break,
                    }
                }
            }
        }

        self.reporter.report(WorkerEvent::Stopped {
            worker_id: &worker_id,
        });
    }

    async fn process_job(&self, job: &Job) {
        let Some(handler) = self.handler(&job.job_type) else {
            let error = JobError::new(
                ErrorKind::Unknown,
                format!("No handler registered for job type '{}'", job.job_type),
            );
            self.resolve_failure(job, error, false).await;
            return;
        };

        // The handler runs in its own task so a panic is contained and
        // dropping the handle on timeout aborts it.
        let payload = job.payload.clone();
        let task = AbortOnDropHandle::new(tokio::spawn(async move {
            handler.handle(payload).await
        }));

        match tokio::time::timeout(self.config.job_timeout, task).await {
            Ok(Ok(Ok(result))) => self.resolve_success(job, result).await,
            Ok(Ok(Err(failure))) => {
                let classification = classify(&failure);
                let error = JobError::new(classification.kind, failure.message);
                self.resolve_failure(job, error, classification.retryable)
                    .await;
            }
            Ok(Err(join_error)) => {
                let error = JobError::new(
                    ErrorKind::Unknown,
                    format!("Handler panicked: {join_error}"),
                );
                self.resolve_failure(job, error, true).await;
            }
            Err(_) => {
                let error = JobError::new(
                    ErrorKind::Timeout,
                    format!(
                        "Job timed out after {}ms",
                        self.config.job_timeout.as_millis()
                    ),
                );
                self.resolve_failure(job, error, true).await;
            }
        }
    }

    async fn resolve_success(&self, job: &Job, result: serde_json::Value) {
        match self.queue.complete_job(job.id, job.attempts, result).await {
            Ok(true) => self.reporter.report(WorkerEvent::JobCompleted {
                job_id: job.id,
                job_type: &job.job_type,
                attempt: job.attempts,
            }),
            Ok(false) => {
                tracing::debug!(job_id = %job.id, attempt = job.attempts, "Completion arrived after the attempt was resolved");
            }
            Err(e) => {
                tracing::error!(job_id = %job.id, error = %e, "Failed to mark job completed");
            }
        }
    }

    /// Record a failed attempt, scheduling a retry when the failure is
    /// retryable and attempts remain.
    async fn resolve_failure(&self, job: &Job, error: JobError, retryable: bool) {
        let will_retry = retryable && job.can_retry();
        let next_run_at = will_retry.then(|| {
            let delay = self.config.backoff.delay(job.attempts.saturating_sub(1));
            Utc::now() + TimeDelta::from_std(delay).unwrap_or_default()
        });

        self.reporter.report(WorkerEvent::JobFailed {
            job_id: job.id,
            job_type: &job.job_type,
            attempt: job.attempts,
            kind: error.kind,
            error: &error.message,
            will_retry,
        });

        match self
            .queue
            .fail_job(job.id, job.attempts, error, next_run_at)
            .await
        {
            Ok(true) if !will_retry => match self.queue.get_job(job.id).await {
                Ok(Some(failed)) => self.notifier.job_failed(&failed).await,
                Ok(None) => {}
                Err(e) => tracing::error!(job_id = %job.id, error = %e, "Failed to load failed job"),
            },
            Ok(true) => {}
            Ok(false) => {
                tracing::debug!(job_id = %job.id, attempt = job.attempts, "Failure arrived after the attempt was resolved");
            }
            Err(e) => {
                tracing::error!(job_id = %job.id, error = %e, "Failed to mark job as failed");
            }
        }
    }

    async fn run_watchdog(self: Arc<Self>, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.config.reap_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => {}
                () = cancel.cancelled() => break,
            }
            self.reap_expired().await;
        }
    }

    /// Fail every running job whose lease ran out, as a timeout.
    async fn reap_expired(&self) -> usize {
        let expired = match self.queue.expired_leases(Utc::now()).await {
            Ok(jobs) => jobs,
            Err(e) => {
                tracing::error!(error = %e, "Failed to scan for expired leases");
                return 0;
            }
        };

        for job in &expired {
            self.reporter.report(WorkerEvent::LeaseExpired {
                job_id: job.id,
                worker_id: job.worker_id.as_deref(),
            });
            let error = JobError::new(
                ErrorKind::Timeout,
                format!(
                    "Lease expired after {}s without a result",
                    self.config.lease_timeout().as_secs()
                ),
            );
            self.resolve_failure(job, error, true).await;
        }
        expired.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Instant;

    use serde_json::{Value, json};

    use crate::backoff::BackoffPolicy;
    use crate::error::Failure;
    use crate::handler::handler_fn;
    use crate::job::JobStatus;
    use crate::memory_queue::InMemoryJobQueue;
    use crate::testutil::{MockReporter, RecordingNotifier};

    const WAIT: Duration = Duration::from_secs(5);

    fn fast_config() -> WorkerConfig {
        WorkerConfig::default()
            .with_worker_prefix("test")
            .with_poll_interval(Duration::from_millis(10))
            .with_job_timeout(Duration::from_secs(2))
            .with_reap_interval(Duration::from_millis(20))
            .with_drain_timeout(Duration::from_millis(200))
            .with_backoff(BackoffPolicy::new(
                Duration::from_millis(1),
                Duration::from_millis(5),
            ))
    }

    fn engine(config: WorkerConfig) -> (JobEngine<InMemoryJobQueue>, MockReporter, RecordingNotifier) {
        let reporter = MockReporter::new();
        let notifier = RecordingNotifier::new();
        let engine = JobEngine::with_observers(
            InMemoryJobQueue::new(),
            config,
            Arc::new(reporter.clone()),
            Arc::new(notifier.clone()),
        );
        (engine, reporter, notifier)
    }

    fn codechef_alice() -> Value {
        json!({"platform": "CODECHEF", "username": "alice"})
    }

    #[tokio::test]
    async fn test_retryable_failure_is_attempted_max_retries_plus_one_times() {
        let (engine, _, notifier) = engine(fast_config());
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        engine.register_handler(
            "scrape",
            handler_fn(move |_| {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(Failure::network("Network error occurred"))
                }
            }),
        );

        engine.start_processing(ProcessingOptions::new(2)).unwrap();
        let id = engine
            .enqueue("scrape", codechef_alice(), EnqueueOptions::default().with_max_retries(3))
            .await
            .unwrap();
        let job = engine.wait_for(id, WAIT).await.unwrap();
        engine.stop().await;

        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.attempts, 4);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(job.last_error.unwrap().kind, ErrorKind::Network);
        assert_eq!(notifier.failed_jobs().len(), 1);
    }

    #[tokio::test]
    async fn test_not_found_fails_after_one_attempt() {
        let (engine, reporter, notifier) = engine(fast_config());
        engine.register_handler(
            "scrape",
            handler_fn(|_| async { Err(Failure::http(404, "User not found")) }),
        );

        engine.start_processing(ProcessingOptions::new(1)).unwrap();
        let id = engine
            .enqueue("scrape", codechef_alice(), EnqueueOptions::default())
            .await
            .unwrap();
        let job = engine.wait_for(id, WAIT).await.unwrap();
        engine.stop().await;

        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.attempts, 1);
        assert_eq!(job.last_error.unwrap().kind, ErrorKind::UserNotFound);
        assert_eq!(notifier.failed_jobs()[0].id, id);
        assert_eq!(reporter.count("job_failed"), 1);
    }

    #[tokio::test]
    async fn test_network_failure_then_success() {
        let base = Duration::from_millis(80);
        let config = fast_config().with_backoff(BackoffPolicy::new(base, Duration::from_secs(1)));
        let (engine, _, notifier) = engine(config);

        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        engine.register_handler(
            "scrape",
            handler_fn(move |payload: Value| {
                let counter = Arc::clone(&counter);
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                        return Err(Failure::network("connection refused"));
                    }
                    Ok(json!({
                        "platform": payload["platform"],
                        "username": payload["username"],
                        "data": {"rating": 1850},
                    }))
                }
            }),
        );

        engine.start_processing(ProcessingOptions::new(1)).unwrap();
        let started = Instant::now();
        let id = engine
            .enqueue("scrape", codechef_alice(), EnqueueOptions::default())
            .await
            .unwrap();
        let job = engine.wait_for(id, WAIT).await.unwrap();
        let elapsed = started.elapsed();
        engine.stop().await;

        assert_eq!(job.status, JobStatus::Succeeded);
        assert_eq!(job.attempts, 2);
        assert!(elapsed >= base, "elapsed {elapsed:?} shorter than backoff");
        assert_eq!(job.result.unwrap()["data"]["rating"], 1850);
        assert_eq!(job.last_error.unwrap().kind, ErrorKind::Network);
        assert!(notifier.failed_jobs().is_empty());
    }

    #[tokio::test]
    async fn test_concurrency_one_runs_jobs_sequentially() {
        let (engine, _, _) = engine(fast_config());
        let log = Arc::new(Mutex::new(Vec::new()));
        let recorder = Arc::clone(&log);
        engine.register_handler(
            "scrape",
            handler_fn(move |payload: Value| {
                let recorder = Arc::clone(&recorder);
                async move {
                    let name = payload["username"].as_str().unwrap_or_default().to_string();
                    recorder.lock().unwrap().push(format!("start:{name}"));
                    tokio::time::sleep(Duration::from_millis(30)).await;
                    recorder.lock().unwrap().push(format!("end:{name}"));
                    Ok(json!({}))
                }
            }),
        );

        let first = engine
            .enqueue("scrape", json!({"username": "a"}), EnqueueOptions::default())
            .await
            .unwrap();
        let second = engine
            .enqueue("scrape", json!({"username": "b"}), EnqueueOptions::default())
            .await
            .unwrap();

        engine.start_processing(ProcessingOptions::new(1)).unwrap();
        engine.wait_for(first, WAIT).await.unwrap();
        engine.wait_for(second, WAIT).await.unwrap();
        engine.stop().await;

        let log = log.lock().unwrap().clone();
        assert_eq!(log, vec!["start:a", "end:a", "start:b", "end:b"]);
    }

    #[tokio::test]
    async fn test_each_job_dispatched_once() {
        let (engine, _, _) = engine(fast_config());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let recorder = Arc::clone(&seen);
        engine.register_handler(
            "scrape",
            handler_fn(move |payload: Value| {
                let recorder = Arc::clone(&recorder);
                async move {
                    recorder.lock().unwrap().push(payload["n"].as_u64().unwrap_or_default());
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    Ok(json!({}))
                }
            }),
        );

        engine.start_processing(ProcessingOptions::new(4)).unwrap();
        let mut ids = Vec::new();
        for n in 0..20u64 {
            ids.push(
                engine
                    .enqueue("scrape", json!({"n": n}), EnqueueOptions::default())
                    .await
                    .unwrap(),
            );
        }
        for id in ids {
            let job = engine.wait_for(id, WAIT).await.unwrap();
            assert_eq!(job.status, JobStatus::Succeeded);
            assert_eq!(job.attempts, 1);
        }
        engine.stop().await;

        let mut seen = seen.lock().unwrap().clone();
        seen.sort_unstable();
        assert_eq!(seen, (0..20).collect::<Vec<u64>>());
    }

    #[tokio::test]
    async fn test_unregistered_type_fails_without_retry() {
        let (engine, _, _) = engine(fast_config());
        engine.start_processing(ProcessingOptions::new(1)).unwrap();

        let id = engine
            .enqueue("export", json!({}), EnqueueOptions::default())
            .await
            .unwrap();
        let job = engine.wait_for(id, WAIT).await.unwrap();
        engine.stop().await;

        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.attempts, 1);
        let error = job.last_error.unwrap();
        assert_eq!(error.kind, ErrorKind::Unknown);
        assert!(error.message.contains("export"));
    }

    #[tokio::test]
    async fn test_panicking_handler_is_retried_as_unknown() {
        let (engine, reporter, _) = engine(fast_config());
        engine.register_handler(
            "scrape",
            handler_fn(|_| async {
                if true {
                    panic!("selector blew up");
                }
                Ok(json!({}))
            }),
        );

        engine.start_processing(ProcessingOptions::new(1)).unwrap();
        let id = engine
            .enqueue("scrape", codechef_alice(), EnqueueOptions::default().with_max_retries(1))
            .await
            .unwrap();
        let job = engine.wait_for(id, WAIT).await.unwrap();
        engine.stop().await;

        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.attempts, 2);
        assert_eq!(job.last_error.unwrap().kind, ErrorKind::Unknown);
        // The worker loop survived both panics.
        assert_eq!(reporter.count("job_failed"), 2);
    }

    #[tokio::test]
    async fn test_job_timeout_is_a_timeout_failure() {
        let config = fast_config().with_job_timeout(Duration::from_millis(30));
        let (engine, _, _) = engine(config);
        engine.register_handler(
            "scrape",
            handler_fn(|_| async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok(json!({}))
            }),
        );

        engine.start_processing(ProcessingOptions::new(1)).unwrap();
        let id = engine
            .enqueue("scrape", codechef_alice(), EnqueueOptions::default().with_max_retries(0))
            .await
            .unwrap();
        let job = engine.wait_for(id, WAIT).await.unwrap();
        engine.stop().await;

        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.last_error.unwrap().kind, ErrorKind::Timeout);
    }

    #[tokio::test]
    async fn test_watchdog_reclaims_expired_lease() {
        let (engine, reporter, _) = engine(fast_config());
        let queue = engine.queue().clone();
        queue
            .enqueue(EnqueueRequest::new("scrape", codechef_alice()))
            .await
            .unwrap();
        let stuck = queue
            .claim_job("ghost-worker", &[], Duration::ZERO)
            .await
            .unwrap()
            .unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;

        let reaped = engine.inner.reap_expired().await;
        assert_eq!(reaped, 1);
        assert_eq!(reporter.count("lease_expired"), 1);

        // Back in dispatch: retrying, or already pending once the short backoff elapsed.
        let job = queue.get_job(stuck.id).await.unwrap().unwrap();
        assert!(matches!(job.status, JobStatus::Retrying | JobStatus::Pending));
        assert_eq!(job.last_error.unwrap().kind, ErrorKind::Timeout);

        // The first worker finishing late is ignored.
        assert!(!queue.complete_job(stuck.id, stuck.attempts, json!({})).await.unwrap());
    }

    #[tokio::test]
    async fn test_stop_releases_in_flight_jobs() {
        let (engine, reporter, _) = engine(fast_config());
        engine.register_handler(
            "scrape",
            handler_fn(|_| async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok(json!({}))
            }),
        );

        engine.start_processing(ProcessingOptions::new(1)).unwrap();
        let id = engine
            .enqueue("scrape", codechef_alice(), EnqueueOptions::default())
            .await
            .unwrap();

        for _ in 0..100 {
            if engine.queue().count_by_status(JobStatus::Running).await.unwrap() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        engine.stop().await;
        assert!(!engine.is_processing());

        let job = engine.queue().get_job(id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.attempts, 1);
        assert!(job.worker_id.is_none());
        assert_eq!(reporter.count("shutting_down"), 1);
    }

    #[tokio::test]
    async fn test_register_handler_overwrites() {
        let (engine, _, _) = engine(fast_config());
        engine.register_handler("scrape", handler_fn(|_| async { Ok(json!("old")) }));
        engine.register_handler("scrape", handler_fn(|_| async { Ok(json!("new")) }));
        assert_eq!(engine.registered_types(), vec!["scrape".to_string()]);

        engine.start_processing(ProcessingOptions::new(1)).unwrap();
        let id = engine
            .enqueue("scrape", json!({}), EnqueueOptions::default())
            .await
            .unwrap();
        let job = engine.wait_for(id, WAIT).await.unwrap();
        engine.stop().await;

        assert_eq!(job.result, Some(json!("new")));
    }

    #[tokio::test]
    async fn test_start_twice_and_zero_concurrency_are_rejected() {
        let (engine, _, _) = engine(fast_config());
        assert!(matches!(
            engine.start_processing(ProcessingOptions::new(0)),
            Err(AppError::ConfigError(_))
        ));

        engine.start_processing(ProcessingOptions::new(1)).unwrap();
        assert!(engine.start_processing(ProcessingOptions::new(1)).is_err());
        engine.stop().await;
        engine.stop().await;
    }

    #[tokio::test]
    async fn test_type_filter_leaves_other_jobs_pending() {
        let (engine, _, _) = engine(fast_config());
        engine.register_handler("cleanup", handler_fn(|_| async { Ok(json!({})) }));
        engine.register_handler("scrape", handler_fn(|_| async { Ok(json!({})) }));

        engine
            .start_processing(ProcessingOptions::new(1).with_types(["cleanup"]))
            .unwrap();
        let scrape = engine
            .enqueue("scrape", json!({}), EnqueueOptions::default())
            .await
            .unwrap();
        let cleanup = engine
            .enqueue("cleanup", json!({}), EnqueueOptions::default())
            .await
            .unwrap();

        engine.wait_for(cleanup, WAIT).await.unwrap();
        engine.stop().await;

        let job = engine.queue().get_job(scrape).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Pending);
    }
}
