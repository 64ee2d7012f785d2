pub mod backoff;
pub mod classify;
pub mod error;
pub mod handler;
pub mod job;
pub mod job_queue;
pub mod memory_queue;
pub mod pool;
pub mod scheduler;
pub mod traits;
pub mod worker;

#[cfg(any(test, feature = "testutil"))]
pub mod testutil;

pub use backoff::BackoffPolicy;
pub use classify::{Classification, ErrorKind, classify};
pub use error::{AppError, Failure};
pub use handler::{JobHandler, handler_fn};
pub use job::{EnqueueOptions, Job, JobError, JobStatus, ProcessingOptions, WorkerConfig};
pub use job_queue::JobQueue;
pub use memory_queue::InMemoryJobQueue;
pub use pool::{BrowserPool, PageHandle, PoolConfig, PoolStats};
pub use scheduler::Scheduler;
pub use traits::{BrowserLauncher, BrowserProcess, NoopNotifier, Notifier, PageSession};
pub use worker::{JobEngine, TracingWorkerReporter, WorkerReporter};
