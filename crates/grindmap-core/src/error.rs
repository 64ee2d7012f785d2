use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// An opaque failure raised by a job handler or one of its collaborators.
///
/// Carries whatever the failing layer knew: an HTTP-like status, a machine
/// error code (`ECONNRESET`, `ETIMEDOUT`, ...) and a human message. The
/// classifier in [`crate::classify`] turns it into a taxonomy kind.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("{message}")]
pub struct Failure {
    pub status: Option<u16>,
    pub code: Option<String>,
    pub message: String,
}

impl Failure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            status: None,
            code: None,
            message: message.into(),
        }
    }

    /// Failure carrying a transport/HTTP status code.
    pub fn http(status: u16, message: impl Into<String>) -> Self {
        Self::new(message).with_status(status)
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(message).with_code("NETWORK_ERROR")
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(message).with_code("ETIMEDOUT")
    }

    pub fn server(message: impl Into<String>) -> Self {
        Self::new(message).with_code("SERVER_ERROR")
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }
}

/// Application-wide error types for GrindMap.
#[derive(Error, Debug)]
pub enum AppError {
    /// Invalid or missing configuration.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// No handler is registered for a job type.
    #[error("No handler registered for job type '{0}'")]
    HandlerNotFound(String),

    #[error("Job not found: {0}")]
    JobNotFound(Uuid),

    /// Browser launch or page creation failed.
    #[error("Browser error: {0}")]
    BrowserError(String),

    /// The browser pool has been shut down.
    #[error("Browser pool is shut down")]
    PoolClosed,

    /// A cron expression could not be parsed.
    #[error("Invalid schedule '{expression}': {message}")]
    InvalidSchedule { expression: String, message: String },

    /// A job handler failed.
    #[error(transparent)]
    Scrape(#[from] Failure),

    /// Waiting for an operation timed out.
    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    /// JSON serialization/deserialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Generic error.
    #[error("{0}")]
    Generic(String),
}

impl From<AppError> for Failure {
    /// Pool and infrastructure errors surface to handlers as failures the
    /// classifier understands: launch problems count as server errors.
    fn from(err: AppError) -> Self {
        match err {
            AppError::Scrape(failure) => failure,
            AppError::BrowserError(msg) => Failure::server(format!("Browser error: {msg}")),
            AppError::PoolClosed => Failure::server("Browser pool is shut down"),
            AppError::Timeout(after) => Failure::timeout(format!("Timed out after {after:?}")),
            other => Failure::new(other.to_string()),
        }
    }
}
