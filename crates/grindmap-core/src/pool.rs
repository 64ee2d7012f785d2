//! Bounded pool of headless browser processes.
//!
//! At most `max_browsers` processes are ever alive. Below the ceiling every
//! acquisition launches a new browser; at the ceiling callers share the
//! existing ones in round-robin order, each opening its own page. A launch
//! reserves its slot under the pool lock before the slow launch runs outside
//! of it, so a burst of concurrent acquisitions cannot overshoot.

use std::future::Future;
use std::pin::pin;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Notify;

use crate::error::{AppError, Failure};
use crate::traits::{BrowserLauncher, BrowserProcess, PageSession};

/// Pool limits and timeouts.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub max_browsers: usize,
    /// Per-navigation budget handlers should apply through [`BrowserPool::with_page`].
    pub navigation_timeout: Duration,
    /// How long `shutdown()` waits for pages still in use.
    pub shutdown_grace: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_browsers: 3,
            navigation_timeout: Duration::from_secs(10),
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

impl PoolConfig {
    pub fn with_max_browsers(mut self, max: usize) -> Self {
        self.max_browsers = max;
        self
    }

    pub fn with_navigation_timeout(mut self, timeout: Duration) -> Self {
        self.navigation_timeout = timeout;
        self
    }

    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }
}

/// Point-in-time pool counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub browsers: usize,
    pub busy_browsers: usize,
    pub pages_in_use: usize,
    pub launching: usize,
    pub total_launches: u64,
    pub closed: bool,
}

struct BrowserSlot {
    id: usize,
    pages_in_use: AtomicUsize,
    last_used_at: Mutex<DateTime<Utc>>,
}

impl BrowserSlot {
    fn touch(&self) {
        let mut last = self
            .last_used_at
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *last = Utc::now();
    }
}

/// A pooled browser process.
pub struct BrowserHandle<B> {
    slot: Arc<BrowserSlot>,
    browser: Arc<B>,
}

impl<B> Clone for BrowserHandle<B> {
    fn clone(&self) -> Self {
        Self {
            slot: Arc::clone(&self.slot),
            browser: Arc::clone(&self.browser),
        }
    }
}

impl<B> BrowserHandle<B> {
    pub fn id(&self) -> usize {
        self.slot.id
    }

    /// True while at least one page derived from this browser is open.
    pub fn is_busy(&self) -> bool {
        self.pages_in_use() > 0
    }

    pub fn pages_in_use(&self) -> usize {
        self.slot.pages_in_use.load(Ordering::Acquire)
    }

    pub fn last_used_at(&self) -> DateTime<Utc> {
        *self
            .slot
            .last_used_at
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Counts a page against its browser until dropped.
struct PageLease {
    slot: Arc<BrowserSlot>,
    changed: Arc<Notify>,
}

impl PageLease {
    fn new(slot: Arc<BrowserSlot>, changed: Arc<Notify>) -> Self {
        slot.pages_in_use.fetch_add(1, Ordering::AcqRel);
        slot.touch();
        Self { slot, changed }
    }
}

impl Drop for PageLease {
    fn drop(&mut self) {
        self.slot.pages_in_use.fetch_sub(1, Ordering::AcqRel);
        self.slot.touch();
        self.changed.notify_waiters();
    }
}

/// Page type produced by a launcher's browsers.
pub type PageOf<L> = <<L as BrowserLauncher>::Browser as BrowserProcess>::Page;

/// A page checked out of the pool.
///
/// Release it with [`BrowserPool::release_page`]. A handle that is dropped
/// without being released closes its page in a background task.
pub struct PageHandle<P: PageSession> {
    page: P,
    lease: Option<PageLease>,
    browser_id: usize,
    released: bool,
}

impl<P: PageSession> PageHandle<P> {
    pub fn browser_id(&self) -> usize {
        self.browser_id
    }

    pub fn page(&self) -> &P {
        &self.page
    }

    async fn release(mut self) {
        self.released = true;
        let lease = self.lease.take();
        if let Err(e) = self.page.clone().close().await {
            tracing::warn!(browser_id = self.browser_id, error = %e, "Failed to close page");
        }
        drop(lease);
    }
}

impl<P: PageSession> Drop for PageHandle<P> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let page = self.page.clone();
        let lease = self.lease.take();
        let browser_id = self.browser_id;
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    if let Err(e) = page.close().await {
                        tracing::warn!(browser_id, error = %e, "Failed to close abandoned page");
                    }
                    drop(lease);
                });
            }
            Err(_) => {
                tracing::warn!(browser_id, "Page dropped outside a runtime; leaving it open");
            }
        }
    }
}

struct PoolState<B> {
    handles: Vec<BrowserHandle<B>>,
    launching: usize,
    next_id: usize,
    closed: bool,
}

struct PoolInner<L: BrowserLauncher> {
    launcher: L,
    config: PoolConfig,
    state: Mutex<PoolState<L::Browser>>,
    next: AtomicUsize,
    launches: AtomicU64,
    /// Signalled when a launch finishes or a page is released.
    changed: Arc<Notify>,
}

impl<L: BrowserLauncher> PoolInner<L> {
    fn lock(&self) -> MutexGuard<'_, PoolState<L::Browser>> {
        self.state.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("Recovered from poisoned browser pool mutex");
            poisoned.into_inner()
        })
    }
}

/// Undoes a launch reservation unless the launch registered its browser.
struct LaunchReservation<'a, L: BrowserLauncher> {
    inner: &'a PoolInner<L>,
    armed: bool,
}

impl<L: BrowserLauncher> Drop for LaunchReservation<'_, L> {
    fn drop(&mut self) {
        if self.armed {
            self.inner.lock().launching -= 1;
            self.inner.changed.notify_waiters();
        }
    }
}

enum Acquire<B> {
    Reuse(BrowserHandle<B>),
    Launch,
    Wait,
}

/// Bounded, shared pool of browser processes.
pub struct BrowserPool<L: BrowserLauncher> {
    inner: Arc<PoolInner<L>>,
}

impl<L: BrowserLauncher> Clone for BrowserPool<L> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<L: BrowserLauncher> BrowserPool<L> {
    pub fn new(launcher: L, mut config: PoolConfig) -> Self {
        config.max_browsers = config.max_browsers.max(1);
        Self {
            inner: Arc::new(PoolInner {
                launcher,
                config,
                state: Mutex::new(PoolState {
                    handles: Vec::new(),
                    launching: 0,
                    next_id: 0,
                    closed: false,
                }),
                next: AtomicUsize::new(0),
                launches: AtomicU64::new(0),
                changed: Arc::new(Notify::new()),
            }),
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// Get a browser, launching one if the pool is below its ceiling.
    pub async fn acquire_browser(&self) -> Result<BrowserHandle<L::Browser>, AppError> {
        loop {
            let mut changed = pin!(self.inner.changed.notified());
            changed.as_mut().enable();

            let next = {
                let mut state = self.inner.lock();
                if state.closed {
                    return Err(AppError::PoolClosed);
                }
                if state.handles.len() + state.launching < self.inner.config.max_browsers {
                    state.launching += 1;
                    Acquire::Launch
                } else if state.handles.is_empty() {
                    Acquire::Wait
                } else {
                    let idx = self.inner.next.fetch_add(1, Ordering::Relaxed) % state.handles.len();
                    Acquire::Reuse(state.handles[idx].clone())
                }
            };

            match next {
                Acquire::Reuse(handle) => return Ok(handle),
                Acquire::Launch => return self.launch_reserved().await,
                Acquire::Wait => changed.await,
            }
        }
    }

    async fn launch_reserved(&self) -> Result<BrowserHandle<L::Browser>, AppError> {
        let mut reservation = LaunchReservation {
            inner: &self.inner,
            armed: true,
        };

        let launched = self.inner.launcher.launch().await;
        let browser = match launched {
            Ok(browser) => browser,
            Err(e) => {
                tracing::error!(error = %e, "Browser launch failed");
                return Err(e);
            }
        };
        self.inner.launches.fetch_add(1, Ordering::Relaxed);

        let registered = {
            let mut state = self.inner.lock();
            state.launching -= 1;
            reservation.armed = false;
            if state.closed {
                Err(browser)
            } else {
                let handle = BrowserHandle {
                    slot: Arc::new(BrowserSlot {
                        id: state.next_id,
                        pages_in_use: AtomicUsize::new(0),
                        last_used_at: Mutex::new(Utc::now()),
                    }),
                    browser: Arc::new(browser),
                };
                state.next_id += 1;
                state.handles.push(handle.clone());
                Ok(handle)
            }
        };
        drop(reservation);
        self.inner.changed.notify_waiters();

        match registered {
            Ok(handle) => {
                tracing::info!(browser_id = handle.id(), "Browser launched");
                Ok(handle)
            }
            Err(browser) => {
                // Shut down while launching: nobody else will close it.
                if let Err(e) = browser.close().await {
                    tracing::warn!(error = %e, "Failed to close browser launched during shutdown");
                }
                Err(AppError::PoolClosed)
            }
        }
    }

    /// Open a page on a pooled browser.
    pub async fn acquire_page(&self) -> Result<PageHandle<PageOf<L>>, AppError> {
        let handle = self.acquire_browser().await?;
        self.acquire_page_from(&handle).await
    }

    /// Open a page on a specific browser.
    pub async fn acquire_page_from(
        &self,
        handle: &BrowserHandle<L::Browser>,
    ) -> Result<PageHandle<PageOf<L>>, AppError> {
        // Leased under the same lock shutdown() closes the pool with, so a
        // page being opened is always counted by its drain.
        let lease = {
            let state = self.inner.lock();
            if state.closed {
                return Err(AppError::PoolClosed);
            }
            PageLease::new(Arc::clone(&handle.slot), Arc::clone(&self.inner.changed))
        };
        let page = handle.browser.new_page().await?;
        tracing::debug!(browser_id = handle.id(), "Page opened");

        Ok(PageHandle {
            page,
            lease: Some(lease),
            browser_id: handle.id(),
            released: false,
        })
    }

    /// Close a page and free its browser. Close failures are logged, not returned.
    pub async fn release_page(&self, page: PageHandle<PageOf<L>>) {
        page.release().await;
    }

    /// Run `f` against a fresh page under a hard timeout.
    ///
    /// The page is released on every exit path. Acquisition errors and
    /// timeouts come back as classifiable [`Failure`]s.
    pub async fn with_page<F, Fut, T>(&self, timeout: Duration, f: F) -> Result<T, Failure>
    where
        F: FnOnce(PageOf<L>) -> Fut,
        Fut: Future<Output = Result<T, Failure>>,
    {
        let handle = self.acquire_page().await.map_err(Failure::from)?;
        let page = handle.page().clone();

        let outcome = tokio::time::timeout(timeout, f(page)).await;
        self.release_page(handle).await;

        match outcome {
            Ok(result) => result,
            Err(_) => Err(Failure::timeout(format!(
                "Page operation timed out after {}ms",
                timeout.as_millis()
            ))),
        }
    }

    fn pages_in_use(&self) -> usize {
        self.inner
            .lock()
            .handles
            .iter()
            .map(BrowserHandle::pages_in_use)
            .sum()
    }

    /// Close every browser. Safe to call more than once.
    pub async fn shutdown(&self) {
        {
            let mut state = self.inner.lock();
            if state.closed {
                return;
            }
            state.closed = true;
        }
        self.inner.changed.notify_waiters();

        let drained = tokio::time::timeout(self.inner.config.shutdown_grace, async {
            loop {
                let mut changed = pin!(self.inner.changed.notified());
                changed.as_mut().enable();
                if self.pages_in_use() == 0 {
                    break;
                }
                changed.await;
            }
        })
        .await;

        if drained.is_err() {
            tracing::warn!(
                pages_in_use = self.pages_in_use(),
                "Closing browsers with pages still in use"
            );
        }

        let handles = std::mem::take(&mut self.inner.lock().handles);
        let count = handles.len();
        for handle in handles {
            if let Err(e) = handle.browser.close().await {
                tracing::warn!(browser_id = handle.id(), error = %e, "Failed to close browser");
            }
        }
        tracing::info!(browsers_closed = count, "Browser pool shut down");
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.inner.lock();
        PoolStats {
            browsers: state.handles.len(),
            busy_browsers: state.handles.iter().filter(|h| h.is_busy()).count(),
            pages_in_use: state.handles.iter().map(BrowserHandle::pages_in_use).sum(),
            launching: state.launching,
            total_launches: self.inner.launches.load(Ordering::Relaxed),
            closed: state.closed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    use crate::classify::{ErrorKind, error_kind};
    use crate::testutil::MockLauncher;

    fn pool(launcher: MockLauncher, max: usize) -> BrowserPool<MockLauncher> {
        BrowserPool::new(
            launcher,
            PoolConfig::default()
                .with_max_browsers(max)
                .with_shutdown_grace(Duration::from_millis(100)),
        )
    }

    #[tokio::test]
    async fn test_burst_never_exceeds_max_browsers() {
        let launcher = MockLauncher::new().with_launch_delay(Duration::from_millis(30));
        let pool = pool(launcher.clone(), 3);

        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..20 {
            let pool = pool.clone();
            tasks.spawn(async move { pool.acquire_browser().await.map(|h| h.id()) });
        }

        let mut ids = HashSet::new();
        while let Some(res) = tasks.join_next().await {
            ids.insert(res.unwrap().unwrap());
        }

        assert_eq!(launcher.launches(), 3);
        assert_eq!(ids.len(), 3);
        assert_eq!(pool.stats().browsers, 3);
        assert_eq!(pool.stats().launching, 0);
    }

    #[tokio::test]
    async fn test_round_robin_at_ceiling() {
        let launcher = MockLauncher::new();
        let pool = pool(launcher.clone(), 2);

        let a = pool.acquire_browser().await.unwrap().id();
        let b = pool.acquire_browser().await.unwrap().id();
        assert_ne!(a, b);

        let next: Vec<usize> = {
            let mut v = Vec::new();
            for _ in 0..4 {
                v.push(pool.acquire_browser().await.unwrap().id());
            }
            v
        };
        assert_eq!(next, vec![a, b, a, b]);
        assert_eq!(launcher.launches(), 2);
    }

    #[tokio::test]
    async fn test_page_marks_browser_busy_until_released() {
        let launcher = MockLauncher::new();
        let pool = pool(launcher.clone(), 1);

        let browser = pool.acquire_browser().await.unwrap();
        let page = pool.acquire_page_from(&browser).await.unwrap();
        assert!(browser.is_busy());
        assert_eq!(pool.stats().pages_in_use, 1);

        pool.release_page(page).await;
        assert!(!browser.is_busy());
        assert_eq!(launcher.pages_closed(), 1);
    }

    #[tokio::test]
    async fn test_release_swallows_close_failure() {
        let launcher = MockLauncher::new().with_failing_page_close();
        let pool = pool(launcher.clone(), 1);

        let page = pool.acquire_page().await.unwrap();
        pool.release_page(page).await;
        assert_eq!(pool.stats().pages_in_use, 0);
    }

    #[tokio::test]
    async fn test_launch_failure_frees_reservation() {
        let launcher = MockLauncher::new().with_launch_failures(1);
        let pool = pool(launcher.clone(), 1);

        let err = pool.acquire_browser().await.err().unwrap();
        let failure = Failure::from(err);
        assert_eq!(error_kind(&failure), ErrorKind::Server);
        assert_eq!(pool.stats().launching, 0);

        // The slot is free again, so the next call launches.
        assert!(pool.acquire_browser().await.is_ok());
        assert_eq!(launcher.launches(), 1);
    }

    #[tokio::test]
    async fn test_with_page_returns_result_and_releases() {
        let launcher = MockLauncher::new().with_page("https://example.test/", "<p>hi</p>");
        let pool = pool(launcher.clone(), 1);

        let html = pool
            .with_page(Duration::from_secs(1), |page| async move {
                page.goto("https://example.test/").await?;
                page.content().await
            })
            .await
            .unwrap();

        assert_eq!(html, "<p>hi</p>");
        assert_eq!(pool.stats().pages_in_use, 0);
        assert_eq!(launcher.pages_closed(), 1);
    }

    #[tokio::test]
    async fn test_with_page_timeout_is_classified_and_closes_page() {
        let launcher = MockLauncher::new().with_navigation_delay(Duration::from_secs(5));
        let pool = pool(launcher.clone(), 1);

        let err = pool
            .with_page(Duration::from_millis(20), |page| async move {
                page.goto("https://slow.test/").await
            })
            .await
            .unwrap_err();

        assert_eq!(error_kind(&err), ErrorKind::Timeout);
        assert_eq!(pool.stats().pages_in_use, 0);
        assert_eq!(launcher.pages_closed(), 1);
    }

    #[tokio::test]
    async fn test_with_page_propagates_handler_failure() {
        let launcher = MockLauncher::new();
        let pool = pool(launcher.clone(), 1);

        let err = pool
            .with_page(Duration::from_secs(1), |_page| async move {
                Err::<(), _>(Failure::http(404, "User not found"))
            })
            .await
            .unwrap_err();

        assert_eq!(err.status, Some(404));
        assert_eq!(launcher.pages_closed(), 1);
    }

    #[tokio::test]
    async fn test_dropped_page_is_closed_in_background() {
        let launcher = MockLauncher::new();
        let pool = pool(launcher.clone(), 1);

        let page = pool.acquire_page().await.unwrap();
        drop(page);

        for _ in 0..50 {
            if launcher.pages_closed() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(launcher.pages_closed(), 1);
        assert_eq!(pool.stats().pages_in_use, 0);
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent_and_rejects_new_work() {
        let launcher = MockLauncher::new();
        let pool = pool(launcher.clone(), 2);

        pool.acquire_browser().await.unwrap();
        pool.acquire_browser().await.unwrap();

        pool.shutdown().await;
        pool.shutdown().await;

        assert_eq!(launcher.browsers_closed(), 2);
        assert!(pool.stats().closed);
        assert_eq!(pool.stats().browsers, 0);
        assert!(matches!(
            pool.acquire_page().await.err().unwrap(),
            AppError::PoolClosed
        ));
    }

    #[tokio::test]
    async fn test_shutdown_waits_for_page_still_opening() {
        let launcher = MockLauncher::new().with_page_open_delay(Duration::from_millis(50));
        let pool = BrowserPool::new(
            launcher.clone(),
            PoolConfig::default()
                .with_max_browsers(1)
                .with_shutdown_grace(Duration::from_secs(2)),
        );
        let handle = pool.acquire_browser().await.unwrap();

        let opener = {
            let pool = pool.clone();
            tokio::spawn(async move {
                let page = pool.acquire_page_from(&handle).await.unwrap();
                pool.release_page(page).await;
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(pool.stats().pages_in_use, 1);

        pool.shutdown().await;

        assert!(opener.is_finished());
        assert_eq!(launcher.pages_closed(), 1);
        assert_eq!(launcher.browsers_closed(), 1);
        opener.await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_waits_for_pages_in_use() {
        let launcher = MockLauncher::new();
        let pool = BrowserPool::new(
            launcher.clone(),
            PoolConfig::default()
                .with_max_browsers(1)
                .with_shutdown_grace(Duration::from_secs(2)),
        );

        let page = pool.acquire_page().await.unwrap();
        let releaser = {
            let pool = pool.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(30)).await;
                pool.release_page(page).await;
            })
        };

        pool.shutdown().await;
        releaser.await.unwrap();

        assert_eq!(launcher.pages_closed(), 1);
        assert_eq!(launcher.browsers_closed(), 1);
    }
}
