use std::path::PathBuf;
use std::time::Duration;

use chromiumoxide::error::CdpError;
use chromiumoxide::{Browser, BrowserConfig, Page};
use futures::StreamExt;
use grindmap_core::error::{AppError, Failure};
use grindmap_core::traits::{BrowserLauncher, BrowserProcess, PageSession};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

/// Launches headless Chromium over the Chrome DevTools Protocol.
///
/// Sandboxing is disabled (`--no-sandbox`, `--disable-setuid-sandbox`) and
/// `/dev/shm` is not used so the browser starts inside unprivileged
/// containers. That trades away Chromium's process sandbox; harden the
/// deployment instead.
///
/// # Example
///
/// ```rust,no_run
/// use grindmap_client::ChromeLauncher;
/// use grindmap_core::pool::{BrowserPool, PoolConfig};
///
/// let pool = BrowserPool::new(ChromeLauncher::new(), PoolConfig::default());
/// ```
#[derive(Debug, Clone)]
pub struct ChromeLauncher {
    executable: Option<PathBuf>,
    launch_timeout: Duration,
    extra_args: Vec<String>,
}

impl Default for ChromeLauncher {
    fn default() -> Self {
        Self::new()
    }
}

impl ChromeLauncher {
    /// Uses `CHROME_BIN` or the first well-known Chrome/Chromium install found.
    pub fn new() -> Self {
        Self {
            executable: Self::find_chrome_binary(),
            launch_timeout: Duration::from_secs(20),
            extra_args: Vec::new(),
        }
    }

    pub fn with_executable(mut self, path: impl Into<PathBuf>) -> Self {
        self.executable = Some(path.into());
        self
    }

    pub fn with_launch_timeout(mut self, timeout: Duration) -> Self {
        self.launch_timeout = timeout;
        self
    }

    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.extra_args.push(arg.into());
        self
    }

    /// Tries to locate the real Chrome/Chromium binary.
    ///
    /// On systems where Chromium is installed via **snap**, the wrapper at
    /// `/snap/bin/chromium` strips unknown CLI flags, breaking headless mode.
    /// We look for the real binary inside the snap first, then fall back to
    /// well-known system paths. If nothing is found we return `None` and let
    /// `chromiumoxide` do its own lookup.
    pub fn find_chrome_binary() -> Option<PathBuf> {
        if let Ok(p) = std::env::var("CHROME_BIN") {
            let path = PathBuf::from(&p);
            if path.exists() {
                return Some(path);
            }
        }

        [
            "/snap/chromium/current/usr/lib/chromium-browser/chrome",
            "/var/lib/flatpak/exports/bin/org.chromium.Chromium",
            "/usr/bin/google-chrome-stable",
            "/usr/bin/google-chrome",
            "/usr/bin/chromium",
            "/usr/bin/chromium-browser",
        ]
        .iter()
        .map(PathBuf::from)
        .find(|p| p.exists())
    }

    fn config(&self) -> Result<BrowserConfig, AppError> {
        let mut builder = BrowserConfig::builder()
            .no_sandbox()
            .disable_default_args()
            .launch_timeout(self.launch_timeout);

        if let Some(bin) = &self.executable {
            tracing::debug!("Using Chrome binary: {}", bin.display());
            builder = builder.chrome_executable(bin);
        }

        builder = builder
            .arg("--headless=new")
            .arg("--disable-setuid-sandbox")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-gpu")
            .arg("--disable-extensions")
            .arg("--no-first-run");
        for arg in &self.extra_args {
            builder = builder.arg(arg.as_str());
        }

        builder
            .build()
            .map_err(|e| AppError::BrowserError(format!("Browser config error: {e}")))
    }
}

impl BrowserLauncher for ChromeLauncher {
    type Browser = ChromeBrowser;

    async fn launch(&self) -> Result<ChromeBrowser, AppError> {
        let config = self.config()?;
        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| AppError::BrowserError(format!("Failed to launch browser: {e}")))?;

        // The CDP handler must be polled continuously for the connection to work.
        let events = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    tracing::warn!(error = %e, "Browser CDP handler error");
                    break;
                }
            }
        });

        Ok(ChromeBrowser {
            browser: RwLock::new(browser),
            events,
        })
    }
}

/// A running Chromium process.
pub struct ChromeBrowser {
    // Write access is only needed to close the process.
    browser: RwLock<Browser>,
    events: JoinHandle<()>,
}

impl BrowserProcess for ChromeBrowser {
    type Page = ChromePage;

    async fn new_page(&self) -> Result<ChromePage, AppError> {
        let page = self
            .browser
            .read()
            .await
            .new_page("about:blank")
            .await
            .map_err(|e| AppError::BrowserError(format!("Failed to open page: {e}")))?;
        Ok(ChromePage { page })
    }

    async fn close(&self) -> Result<(), AppError> {
        let mut browser = self.browser.write().await;
        let closed = browser
            .close()
            .await
            .map_err(|e| AppError::BrowserError(format!("Failed to close browser: {e}")));
        if let Err(e) = browser.wait().await {
            tracing::debug!(error = %e, "Browser process did not exit cleanly");
        }
        self.events.abort();
        closed.map(|_| ())
    }
}

/// A Chromium tab.
#[derive(Clone)]
pub struct ChromePage {
    page: Page,
}

fn navigation_failure(url: &str, err: CdpError) -> Failure {
    match err {
        CdpError::Timeout => Failure::timeout(format!("Navigation to {url} timed out")),
        other => Failure::network(format!("Network error loading {url}: {other}")),
    }
}

impl PageSession for ChromePage {
    async fn goto(&self, url: &str) -> Result<(), Failure> {
        self.page
            .goto(url)
            .await
            .map_err(|e| navigation_failure(url, e))?;
        Ok(())
    }

    async fn content(&self) -> Result<String, Failure> {
        self.page
            .content()
            .await
            .map_err(|e| Failure::server(format!("Failed to read page content: {e}")))
    }

    async fn close(self) -> Result<(), AppError> {
        self.page
            .close()
            .await
            .map_err(|e| AppError::BrowserError(format!("Failed to close page: {e}")))
    }
}
