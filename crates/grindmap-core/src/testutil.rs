//! Test utilities: mock browser stack, reporter, and notifier.
//!
//! Handwritten mocks for dependency injection in unit tests.
//! All mocks use `Arc<Mutex<_>>` for interior mutability, allowing
//! test assertions on recorded calls.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{AppError, Failure};
use crate::job::Job;
use crate::traits::{BrowserLauncher, BrowserProcess, Notifier, PageSession};
use crate::worker::{WorkerEvent, WorkerReporter};

// ---------------------------------------------------------------------------
// MockLauncher / MockBrowser / MockPage
// ---------------------------------------------------------------------------

#[derive(Default)]
struct MockBrowserState {
    launches: usize,
    launch_failures: usize,
    launch_delay: Duration,
    browsers_closed: usize,
    pages_opened: usize,
    pages_closed: usize,
    fail_page_close: bool,
    page_open_delay: Duration,
    navigation_delay: Duration,
    /// Scripted responses per URL. Each navigation pops the first entry; the
    /// last one sticks.
    responses: HashMap<String, Vec<Result<String, Failure>>>,
    visited: Vec<String>,
}

/// Mock browser launcher with scripted pages.
///
/// Unscripted URLs render an empty document.
#[derive(Clone, Default)]
pub struct MockLauncher {
    state: Arc<Mutex<MockBrowserState>>,
}

impl MockLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_launch_delay(self, delay: Duration) -> Self {
        self.state.lock().unwrap().launch_delay = delay;
        self
    }

    /// The next `n` launches fail.
    pub fn with_launch_failures(self, n: usize) -> Self {
        self.state.lock().unwrap().launch_failures = n;
        self
    }

    pub fn with_page_open_delay(self, delay: Duration) -> Self {
        self.state.lock().unwrap().page_open_delay = delay;
        self
    }

    pub fn with_navigation_delay(self, delay: Duration) -> Self {
        self.state.lock().unwrap().navigation_delay = delay;
        self
    }

    pub fn with_failing_page_close(self) -> Self {
        self.state.lock().unwrap().fail_page_close = true;
        self
    }

    /// Serve `html` for `url`.
    pub fn with_page(self, url: &str, html: &str) -> Self {
        self.with_responses(url, vec![Ok(html.to_string())])
    }

    /// Fail navigation to `url`.
    pub fn with_page_error(self, url: &str, failure: Failure) -> Self {
        self.with_responses(url, vec![Err(failure)])
    }

    pub fn with_responses(self, url: &str, responses: Vec<Result<String, Failure>>) -> Self {
        self.state
            .lock()
            .unwrap()
            .responses
            .insert(url.to_string(), responses);
        self
    }

    pub fn launches(&self) -> usize {
        self.state.lock().unwrap().launches
    }

    pub fn browsers_closed(&self) -> usize {
        self.state.lock().unwrap().browsers_closed
    }

    pub fn pages_opened(&self) -> usize {
        self.state.lock().unwrap().pages_opened
    }

    pub fn pages_closed(&self) -> usize {
        self.state.lock().unwrap().pages_closed
    }

    pub fn visited(&self) -> Vec<String> {
        self.state.lock().unwrap().visited.clone()
    }
}

impl BrowserLauncher for MockLauncher {
    type Browser = MockBrowser;

    async fn launch(&self) -> Result<MockBrowser, AppError> {
        let (delay, fail) = {
            let mut state = self.state.lock().unwrap();
            let fail = state.launch_failures > 0;
            if fail {
                state.launch_failures -= 1;
            }
            (state.launch_delay, fail)
        };

        tokio::time::sleep(delay).await;
        if fail {
            return Err(AppError::BrowserError("mock launch failure".to_string()));
        }

        self.state.lock().unwrap().launches += 1;
        Ok(MockBrowser {
            state: Arc::clone(&self.state),
        })
    }
}

pub struct MockBrowser {
    state: Arc<Mutex<MockBrowserState>>,
}

impl BrowserProcess for MockBrowser {
    type Page = MockPage;

    async fn new_page(&self) -> Result<MockPage, AppError> {
        let delay = self.state.lock().unwrap().page_open_delay;
        tokio::time::sleep(delay).await;
        self.state.lock().unwrap().pages_opened += 1;
        Ok(MockPage {
            state: Arc::clone(&self.state),
            current: Arc::new(Mutex::new(None)),
        })
    }

    async fn close(&self) -> Result<(), AppError> {
        self.state.lock().unwrap().browsers_closed += 1;
        Ok(())
    }
}

#[derive(Clone)]
pub struct MockPage {
    state: Arc<Mutex<MockBrowserState>>,
    current: Arc<Mutex<Option<String>>>,
}

impl PageSession for MockPage {
    async fn goto(&self, url: &str) -> Result<(), Failure> {
        let delay = self.state.lock().unwrap().navigation_delay;
        tokio::time::sleep(delay).await;

        let response = {
            let mut state = self.state.lock().unwrap();
            state.visited.push(url.to_string());
            match state.responses.get_mut(url) {
                Some(queue) if queue.len() > 1 => queue.remove(0),
                Some(queue) => queue
                    .first()
                    .cloned()
                    .unwrap_or_else(|| Ok(String::new())),
                None => Ok("<html><body></body></html>".to_string()),
            }
        };

        *self.current.lock().unwrap() = Some(response?);
        Ok(())
    }

    async fn content(&self) -> Result<String, Failure> {
        self.current
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| Failure::new("No document loaded"))
    }

    async fn close(self) -> Result<(), AppError> {
        let mut state = self.state.lock().unwrap();
        state.pages_closed += 1;
        if state.fail_page_close {
            return Err(AppError::BrowserError("Target closed".to_string()));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MockReporter
// ---------------------------------------------------------------------------

/// Reporter that records event labels.
#[derive(Clone, Default)]
pub struct MockReporter {
    events: Arc<Mutex<Vec<String>>>,
}

impl MockReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    pub fn count(&self, label: &str) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.as_str() == label)
            .count()
    }
}

impl WorkerReporter for MockReporter {
    fn report(&self, event: WorkerEvent<'_>) {
        self.events.lock().unwrap().push(event.label().to_string());
    }
}

// ---------------------------------------------------------------------------
// RecordingNotifier
// ---------------------------------------------------------------------------

/// Notifier that keeps every terminally failed job it is told about.
#[derive(Clone, Default)]
pub struct RecordingNotifier {
    failed: Arc<Mutex<Vec<Job>>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failed_jobs(&self) -> Vec<Job> {
        self.failed.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn job_failed(&self, job: &Job) {
        self.failed.lock().unwrap().push(job.clone());
    }
}
