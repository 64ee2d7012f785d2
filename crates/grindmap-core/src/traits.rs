use std::future::Future;

use async_trait::async_trait;

use crate::error::{AppError, Failure};
use crate::job::Job;

/// Starts headless browser processes for the pool.
pub trait BrowserLauncher: Send + Sync + 'static {
    type Browser: BrowserProcess;

    fn launch(&self) -> impl Future<Output = Result<Self::Browser, AppError>> + Send;
}

/// A running browser process that can open pages.
pub trait BrowserProcess: Send + Sync + 'static {
    type Page: PageSession;

    fn new_page(&self) -> impl Future<Output = Result<Self::Page, AppError>> + Send;

    /// Terminate the process. Called once, by the pool, on shutdown.
    fn close(&self) -> impl Future<Output = Result<(), AppError>> + Send;
}

/// One browser tab.
///
/// Cloning yields another reference to the same tab, not a new one.
pub trait PageSession: Clone + Send + Sync + 'static {
    /// Navigate and wait for the load event.
    fn goto(&self, url: &str) -> impl Future<Output = Result<(), Failure>> + Send;

    /// Serialized DOM of the current document.
    fn content(&self) -> impl Future<Output = Result<String, Failure>> + Send;

    fn close(self) -> impl Future<Output = Result<(), AppError>> + Send;
}

/// Receives terminal job failures.
///
/// Delivery (email, chat, push) lives behind this trait; the engine only
/// calls it after a job has been marked `failed`.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn job_failed(&self, job: &Job);
}

/// A notifier that drops every notification.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn job_failed(&self, _job: &Job) {}
}
