use std::time::Duration;

use grindmap_core::error::Failure;
use grindmap_core::pool::BrowserPool;
use grindmap_core::traits::{BrowserLauncher, PageSession};
use scraper::Html;
use serde_json::{Value, json};

use super::{is_missing_profile, required_integer};

const PROFILE_BASE: &str = "https://www.codechef.com/users/";

pub fn profile_url(username: &str) -> String {
    format!("{PROFILE_BASE}{username}")
}

/// Rating and solved count from a rendered CodeChef profile.
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

pub fn parse_profile(html: &str, username: &str) -> Result<Value, Failure> {
    let doc = Html::parse_document(html);
    if is_missing_profile(&doc)? {
        return Err(Failure::http(404, format!("User not found: {username}")));
    }

    let rating = required_integer(&doc, ".rating-number", "rating")?;
    let problems_solved = required_integer(&doc, ".problems-solved", "problems solved")?;

    Ok(json!({
        "rating": rating,
        "problems_solved": problems_solved,
    }))
}
