use std::time::Duration;

use grindmap_core::error::{AppError, Failure};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{Value, json};
use url::Url;

const DEFAULT_API_BASE: &str = "https://codeforces.com/api/";

#[derive(Debug, Deserialize)]
struct ApiResponse {
    status: String,
    comment: Option<String>,
    result: Option<Vec<UserInfo>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserInfo {
    handle: String,
    rating: Option<i64>,
    max_rating: Option<i64>,
    rank: Option<String>,
    max_rank: Option<String>,
}

/// Client for the public Codeforces API (`user.info`).
#[derive(Clone)]
pub struct CodeforcesClient {
    client: Client,
    api_base: Url,
    timeout: Duration,
}

impl CodeforcesClient {
    pub fn new(timeout: Duration) -> Result<Self, AppError> {
        let client = Client::builder()
            .user_agent("GrindMap/0.1 (profile stats)")
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::ConfigError(format!("HTTP client: {e}")))?;

        let api_base = Url::parse(DEFAULT_API_BASE)
            .map_err(|e| AppError::ConfigError(format!("Codeforces API base: {e}")))?;

        Ok(Self {
            client,
            api_base,
            timeout,
        })
    }

    /// Point the client at another API root (mirrors, local fakes).
    pub fn with_api_base(mut self, base: &str) -> Result<Self, AppError> {
        self.api_base = Url::parse(base)
            .map_err(|e| AppError::ConfigError(format!("Codeforces API base: {e}")))?;
        Ok(self)
    }

    fn user_info_url(&self, username: &str) -> Result<Url, Failure> {
        let mut url = self
            .api_base
            .join("user.info")
            .map_err(|e| Failure::new(format!("Invalid Codeforces URL: {e}")))?;
        url.query_pairs_mut().append_pair("handles", username);
        Ok(url)
    }

    pub async fn fetch_stats(&self, username: &str) -> Result<Value, Failure> {
        let url = self.user_info_url(username)?;

        let response = self.client.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                Failure::timeout(format!(
                    "Codeforces API timed out after {}s",
                    self.timeout.as_secs()
                ))
            } else if e.is_connect() {
                Failure::network(format!("Connection refused by Codeforces API: {e}"))
            } else {
                Failure::network(format!("Network error calling Codeforces API: {e}"))
            }
        })?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| Failure::network(format!("Network error reading Codeforces response: {e}")))?;

        parse_user_info(status, &body, username)
    }
}

/// Map a `user.info` response to stats.
///
/// The API answers unknown handles with HTTP 400 and a "not found" comment;
/// that becomes a 404 failure so it is not retried.
pub fn parse_user_info(status: u16, body: &str, username: &str) -> Result<Value, Failure> {
    let parsed: Result<ApiResponse, _> = serde_json::from_str(body);

    if !(200..300).contains(&status) {
        let comment = parsed
            .ok()
            .and_then(|r| r.comment)
            .unwrap_or_default();
        if comment.to_lowercase().contains("not found") {
            return Err(Failure::http(404, format!("User not found: {username}")));
        }
        let detail = if comment.is_empty() {
            String::new()
        } else {
            format!(": {comment}")
        };
        return Err(Failure::http(
            status,
            format!("Codeforces API returned HTTP {status}{detail}"),
        ));
    }

    let response =
        parsed.map_err(|e| Failure::new(format!("Invalid response from Codeforces API (json): {e}")))?;
    if response.status != "OK" {
        return Err(Failure::server(format!(
            "Codeforces API status {}: {}",
            response.status,
            response.comment.unwrap_or_default()
        )));
    }

    let user = response
        .result
        .and_then(|users| users.into_iter().next())
        .ok_or_else(|| Failure::new("Invalid response from Codeforces API: empty result"))?;

    Ok(json!({
        "handle": user.handle,
        "rating": user.rating,
        "max_rating": user.max_rating,
        "rank": user.rank.unwrap_or_else(|| "unrated".to_string()),
        "max_rank": user.max_rank,
    }))
}
