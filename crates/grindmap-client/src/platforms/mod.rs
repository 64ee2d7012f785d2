//! Per-platform scrapers and the `scrape` job handler that dispatches to them.

pub mod atcoder;
pub mod codechef;
pub mod codeforces;

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use grindmap_core::error::Failure;
use grindmap_core::handler::JobHandler;
use grindmap_core::pool::BrowserPool;
use grindmap_core::traits::BrowserLauncher;
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use self::codeforces::CodeforcesClient;

/// Job type served by [`PlatformScrapeHandler`].
pub const SCRAPE_JOB_TYPE: &str = "scrape";

pub const MAX_USERNAME_LEN: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Platform {
    CodeChef,
    AtCoder,
    Codeforces,
}

impl Platform {
    pub const ALL: [Platform; 3] = [Platform::CodeChef, Platform::AtCoder, Platform::Codeforces];

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::CodeChef => "CODECHEF",
            Platform::AtCoder => "ATCODER",
            Platform::Codeforces => "CODEFORCES",
        }
    }

    /// Whether scraping this platform needs a browser page.
    pub fn uses_browser(&self) -> bool {
        !matches!(self, Platform::Codeforces)
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_uppercase();
        Platform::ALL
            .into_iter()
            .find(|p| p.as_str() == upper)
            .ok_or_else(|| format!("Unsupported platform: {s}"))
    }
}

/// Payload of a `scrape` job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapeRequest {
    pub platform: Platform,
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

impl ScrapeRequest {
    pub fn new(platform: Platform, username: impl Into<String>) -> Self {
        Self {
            platform,
            username: username.into(),
            user_id: None,
        }
    }

    pub fn to_payload(&self) -> Value {
        json!(self)
    }
}

/// Reject usernames that could not be a real handle before any navigation.
pub fn validate_username(username: &str) -> Result<(), Failure> {
    if username.is_empty() {
        return Err(Failure::http(400, "Username is required"));
    }
    if username.len() > MAX_USERNAME_LEN {
        return Err(Failure::http(
            400,
            format!("Username exceeds {MAX_USERNAME_LEN} characters"),
        ));
    }
    if !username
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
    {
        return Err(Failure::http(
            400,
            "Username may only contain letters, digits, '_', '.' and '-'",
        ));
    }
    Ok(())
}

/// Handler for `scrape` jobs.
///
/// CodeChef and AtCoder are rendered through the browser pool; Codeforces
/// goes through its public JSON API.
pub struct PlatformScrapeHandler<L: BrowserLauncher> {
    pool: BrowserPool<L>,
    codeforces: CodeforcesClient,
    navigation_timeout: Duration,
}

impl<L: BrowserLauncher> PlatformScrapeHandler<L> {
    pub fn new(pool: BrowserPool<L>, codeforces: CodeforcesClient) -> Self {
        let navigation_timeout = pool.config().navigation_timeout;
        Self {
            pool,
            codeforces,
            navigation_timeout,
        }
    }

    pub fn with_navigation_timeout(mut self, timeout: Duration) -> Self {
        self.navigation_timeout = timeout;
        self
    }

    pub async fn scrape(&self, request: &ScrapeRequest) -> Result<Value, Failure> {
        validate_username(&request.username)?;

        tracing::debug!(platform = %request.platform, username = %request.username, "Scraping profile");
        let data = match request.platform {
            Platform::CodeChef => {
                codechef::fetch_stats(&self.pool, &request.username, self.navigation_timeout)
                    .await?
            }
            Platform::AtCoder => {
                atcoder::fetch_stats(&self.pool, &request.username, self.navigation_timeout)
                    .await?
            }
            Platform::Codeforces => self.codeforces.fetch_stats(&request.username).await?,
        };

        Ok(json!({
            "platform": request.platform,
            "username": request.username,
            "data": data,
            "fetched_at": Utc::now(),
        }))
    }
}

#[async_trait]
impl<L: BrowserLauncher> JobHandler for PlatformScrapeHandler<L> {
    async fn handle(&self, payload: Value) -> Result<Value, Failure> {
        let request: ScrapeRequest = serde_json::from_value(payload)
            .map_err(|e| Failure::http(400, format!("Invalid scrape payload: {e}")))?;
        self.scrape(&request).await
    }
}

// ---------------------------------------------------------------------------
// Shared page helpers
// ---------------------------------------------------------------------------

fn selector(css: &str) -> Result<Selector, Failure> {
    Selector::parse(css).map_err(|e| Failure::new(format!("Invalid selector '{css}': {e}")))
}

/// Trimmed text of the first element matching `css`, if any.
pub(crate) fn select_text(doc: &Html, css: &str) -> Result<Option<String>, Failure> {
    let sel = selector(css)?;
    Ok(doc
        .select(&sel)
        .next()
        .map(|el| el.text().collect::<String>().trim().to_string())
        .filter(|text| !text.is_empty()))
}

/// First integer in `text` ("1850?" and "Problems Solved: 120" both work).
pub(crate) fn first_integer(text: &str) -> Option<i64> {
    let start = text.find(|c: char| c.is_ascii_digit())?;
    let digits: String = text[start..]
        .chars()
        .take_while(char::is_ascii_digit)
        .collect();
    digits.parse().ok()
}

/// Required numeric field; missing or non-numeric is a parsing failure.
pub(crate) fn required_integer(doc: &Html, css: &str, field: &str) -> Result<i64, Failure> {
    let text = select_text(doc, css)?
        .ok_or_else(|| Failure::new(format!("Could not parse {field}: no '{css}' element")))?;
    first_integer(&text)
        .ok_or_else(|| Failure::new(format!("Could not parse {field} from '{text}'")))
}

/// True when the rendered page is the site's "no such user" page.
///
/// Handles never contain whitespace, so matching on the "not found" phrase
/// cannot be triggered by a username embedded in a profile title.
pub(crate) fn is_missing_profile(doc: &Html) -> Result<bool, Failure> {
    let title = select_text(doc, "title")?.unwrap_or_default().to_lowercase();
    if title.trim() == "404" || title.contains("not found") {
        return Ok(true);
    }
    let body = select_text(doc, "body")?.unwrap_or_default().to_lowercase();
    Ok(body.contains("does not exist") || body.contains("user not found"))
}
