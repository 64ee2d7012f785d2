use std::time::Duration;

use grindmap_core::error::Failure;
use grindmap_core::pool::BrowserPool;
use grindmap_core::traits::{BrowserLauncher, PageSession};
use scraper::Html;
use serde_json::{Value, json};

use super::{is_missing_profile, required_integer, select_text};

const PROFILE_BASE: &str = "https://atcoder.jp/users/";

pub fn profile_url(username: &str) -> String {
    format!("{PROFILE_BASE}{username}")
}

/// Rating and rank from a rendered AtCoder profile.
pub async fn fetch_stats<L: BrowserLauncher>(
    pool: &BrowserPool<L>,
    username: &str,
    navigation_timeout: Duration,
) -> Result<Value, Failure> {
    let url = profile_url(username);
    let html = pool
        .with_page(navigation_timeout, move |page| async move {
            page.goto(&url).await?;
            page.content().await
        })
        .await?;

    parse_profile(&html, username)
}

/// Users without a rank badge are reported as "Unrated".
pub fn parse_profile(html: &str, username: &str) -> Result<Value, Failure> {
    let doc = Html::parse_document(html);
    if is_missing_profile(&doc)? {
        return Err(Failure::http(404, format!("User not found: {username}")));
    }

    let rating = required_integer(&doc, ".user-rating", "rating")?;
    let rank = select_text(&doc, ".user-rank")?.unwrap_or_else(|| "Unrated".to_string());

    Ok(json!({
        "rating": rating,
        "rank": rank,
    }))
}
