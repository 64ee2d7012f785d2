use std::str::FromStr;
use std::time::Duration;

use grindmap_client::{Platform, ScrapeRequest};
use grindmap_core::error::AppError;

/// Runtime configuration for the server and worker processes.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub max_browsers: usize,
    /// Number of concurrent workers.
    pub concurrency: usize,
    pub navigation_timeout: Duration,
    pub job_timeout: Duration,
    /// How long `GET /api/scrape/...` waits for the job to finish.
    pub request_timeout: Duration,
    pub max_retries: u32,
    pub cache_ttl: Duration,
    /// Terminal jobs older than this are purged by the cleanup job.
    pub retention: Duration,
    /// Profiles refreshed by the cache warmup job.
    pub watchlist: Vec<ScrapeRequest>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 3000,
            max_browsers: 3,
            concurrency: 3,
            navigation_timeout: Duration::from_secs(10),
            job_timeout: Duration::from_secs(60),
            request_timeout: Duration::from_secs(90),
            max_retries: 3,
            cache_ttl: Duration::from_secs(600),
            retention: Duration::from_secs(24 * 3600),
            watchlist: Vec::new(),
        }
    }
}

impl ServerConfig {
    /// Read `GRINDMAP_*` variables, falling back to defaults for unset ones.
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let secs = |key: &str, default: Duration| {
            parse_var(&lookup, key, default.as_secs(), 1).map(Duration::from_secs)
        };

        Ok(Self {
            port: parse_var(&lookup, "GRINDMAP_PORT", defaults.port, 1)?,
            max_browsers: parse_var(&lookup, "GRINDMAP_MAX_BROWSERS", defaults.max_browsers, 1)?,
            concurrency: parse_var(&lookup, "GRINDMAP_CONCURRENCY", defaults.concurrency, 1)?,
            navigation_timeout: secs("GRINDMAP_NAV_TIMEOUT_SECS", defaults.navigation_timeout)?,
            job_timeout: secs("GRINDMAP_JOB_TIMEOUT_SECS", defaults.job_timeout)?,
            request_timeout: secs("GRINDMAP_REQUEST_TIMEOUT_SECS", defaults.request_timeout)?,
            max_retries: parse_var(&lookup, "GRINDMAP_MAX_RETRIES", defaults.max_retries, 0)?,
            cache_ttl: secs("GRINDMAP_CACHE_TTL_SECS", defaults.cache_ttl)?,
            retention: parse_var(&lookup, "GRINDMAP_RETENTION_HOURS", 24u64, 1)
                .map(|hours| Duration::from_secs(hours * 3600))?,
            watchlist: match lookup("GRINDMAP_WATCHLIST") {
                Some(raw) => parse_watchlist(&raw)?,
                None => Vec::new(),
            },
        })
    }
}

fn parse_var<F, T>(lookup: &F, key: &str, default: T, min: T) -> Result<T, AppError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr + PartialOrd + std::fmt::Display + Copy,
{
    let Some(raw) = lookup(key) else {
        return Ok(default);
    };
    let parsed: T = raw.trim().parse().map_err(|_| {
        AppError::ConfigError(format!("Invalid {key} '{raw}': must be a non-negative integer"))
    })?;
    if parsed < min {
        return Err(AppError::ConfigError(format!("{key} must be at least {min}")));
    }
    Ok(parsed)
}

/// Parse `platform:username` pairs separated by commas.
pub fn parse_watchlist(raw: &str) -> Result<Vec<ScrapeRequest>, AppError> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let (platform, username) = entry.split_once(':').ok_or_else(|| {
                AppError::ConfigError(format!(
                    "Invalid GRINDMAP_WATCHLIST entry '{entry}': expected platform:username"
                ))
            })?;
            let platform: Platform = platform.parse().map_err(AppError::ConfigError)?;
            Ok(ScrapeRequest::new(platform, username.trim()))
        })
        .collect()
}
