use std::time::Duration;

use grindmap_client::Platform;
use moka::future::Cache;
use serde_json::Value;

const MAX_ENTRIES: u64 = 10_000;

/// Recently scraped profile stats, keyed by platform and lowercased username.
#[derive(Clone)]
pub struct StatsCache {
    inner: Cache<(Platform, String), Value>,
}

impl StatsCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            inner: Cache::builder()
                .max_capacity(MAX_ENTRIES)
                .time_to_live(ttl)
                .build(),
        }
    }

    fn key(platform: Platform, username: &str) -> (Platform, String) {
        (platform, username.to_lowercase())
    }

    pub async fn get(&self, platform: Platform, username: &str) -> Option<Value> {
        self.inner.get(&Self::key(platform, username)).await
    }

    pub async fn insert(&self, platform: Platform, username: &str, stats: Value) {
        self.inner.insert(Self::key(platform, username), stats).await;
    }

    pub async fn invalidate(&self, platform: Platform, username: &str) {
        self.inner.invalidate(&Self::key(platform, username)).await;
    }

    /// Approximate number of live entries.
    pub async fn len(&self) -> u64 {
        self.inner.run_pending_tasks().await;
        self.inner.entry_count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
