use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::backoff::BackoffPolicy;
use crate::classify::ErrorKind;

/// Default ceiling on retry attempts for a job.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Status of a job in the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Retrying,
    Succeeded,
    Failed,
}

impl JobStatus {
    pub const ALL: [JobStatus; 5] = [
        JobStatus::Pending,
        JobStatus::Running,
        JobStatus::Retrying,
        JobStatus::Succeeded,
        JobStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Retrying => "retrying",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Failed)
    }

    /// Pending and retrying jobs may be claimed once `next_run_at` has passed.
    pub fn is_dispatchable(&self) -> bool {
        matches!(self, JobStatus::Pending | JobStatus::Retrying)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(JobStatus::Pending),
            "running" => Ok(JobStatus::Running),
            "retrying" => Ok(JobStatus::Retrying),
            "succeeded" => Ok(JobStatus::Succeeded),
            "failed" => Ok(JobStatus::Failed),
            _ => Err(format!("Unknown job status: {}", s)),
        }
    }
}

/// Classified failure recorded on a job after a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobError {
    pub kind: ErrorKind,
    pub message: String,
}

impl JobError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for JobError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// A unit of deferred work tracked by the queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub job_type: String,
    pub payload: serde_json::Value,
    pub status: JobStatus,
    /// Execution attempts so far, incremented on every claim.
    pub attempts: u32,
    pub max_retries: u32,
    pub next_run_at: DateTime<Utc>,
    pub last_error: Option<JobError>,
    pub result: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub worker_id: Option<String>,
    /// Watchdog deadline while the job is running.
    pub lease_expires_at: Option<DateTime<Utc>>,
    /// Enqueue order, used to break ties between equally eligible jobs.
    #[serde(skip)]
    pub sequence: u64,
}

impl Job {
    /// Whether a failure of the current attempt may still be retried.
    pub fn can_retry(&self) -> bool {
        self.attempts <= self.max_retries
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

/// Per-job enqueue options.
#[derive(Debug, Clone, Default)]
pub struct EnqueueOptions {
    pub max_retries: Option<u32>,
    /// Initial delay before the job becomes eligible.
    pub delay: Option<Duration>,
}

impl EnqueueOptions {
    pub fn with_max_retries(mut self, max: u32) -> Self {
        self.max_retries = Some(max);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

/// Request to create a new job.
#[derive(Debug, Clone)]
pub struct EnqueueRequest {
    pub job_type: String,
    pub payload: serde_json::Value,
    pub options: EnqueueOptions,
}

impl EnqueueRequest {
    pub fn new(job_type: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            job_type: job_type.into(),
            payload,
            options: EnqueueOptions::default(),
        }
    }

    pub fn with_options(mut self, options: EnqueueOptions) -> Self {
        self.options = options;
        self
    }
}

/// Configuration for the worker engine.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Prefix for worker ids (`{prefix}-{n}`).
    pub worker_prefix: String,
    /// Upper bound on how long an idle worker sleeps before polling again.
    pub poll_interval: Duration,
    /// Hard time budget for one handler invocation.
    pub job_timeout: Duration,
    /// Extra time on top of `job_timeout` before the watchdog reclaims a running job.
    pub lease_margin: Duration,
    pub reap_interval: Duration,
    /// How long `stop()` waits for in-flight jobs before abandoning them.
    pub drain_timeout: Duration,
    pub backoff: BackoffPolicy,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_prefix: format!("worker-{}", &Uuid::new_v4().to_string()[..8]),
            poll_interval: Duration::from_millis(500),
            job_timeout: Duration::from_secs(60),
            lease_margin: Duration::from_secs(30),
            reap_interval: Duration::from_secs(15),
            drain_timeout: Duration::from_secs(10),
            backoff: BackoffPolicy::default(),
        }
    }
}

impl WorkerConfig {
    pub fn with_worker_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.worker_prefix = prefix.into();
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_job_timeout(mut self, timeout: Duration) -> Self {
        self.job_timeout = timeout;
        self
    }

    pub fn with_lease_margin(mut self, margin: Duration) -> Self {
        self.lease_margin = margin;
        self
    }

    pub fn with_reap_interval(mut self, interval: Duration) -> Self {
        self.reap_interval = interval;
        self
    }

    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    /// Lease granted to a worker when it claims a job.
    pub fn lease_timeout(&self) -> Duration {
        self.job_timeout + self.lease_margin
    }
}

/// Options for `JobEngine::start_processing`.
#[derive(Debug, Clone)]
pub struct ProcessingOptions {
    pub concurrency: usize,
    /// Job types this engine processes. Empty means all types.
    pub types: Vec<String>,
}

impl Default for ProcessingOptions {
    fn default() -> Self {
        Self {
            concurrency: 3,
            types: Vec::new(),
        }
    }
}

impl ProcessingOptions {
    pub fn new(concurrency: usize) -> Self {
        Self {
            concurrency,
            types: Vec::new(),
        }
    }

    pub fn with_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.types = types.into_iter().map(Into::into).collect();
        self
    }
}
