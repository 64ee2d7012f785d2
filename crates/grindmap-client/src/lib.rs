#[cfg(feature = "browser")]
pub mod browser;
pub mod platforms;

#[cfg(feature = "browser")]
pub use browser::{ChromeBrowser, ChromeLauncher, ChromePage};
pub use platforms::codeforces::CodeforcesClient;
pub use platforms::{Platform, PlatformScrapeHandler, SCRAPE_JOB_TYPE, ScrapeRequest};
