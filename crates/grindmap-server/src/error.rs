use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use grindmap_core::classify::{ErrorKind, classify};
use grindmap_core::error::AppError;

use crate::dto::ErrorResponse;

/// HTTP status for a job that failed with `kind`.
pub fn status_for_kind(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::UserNotFound => StatusCode::NOT_FOUND,
        ErrorKind::Auth => StatusCode::FORBIDDEN,
        ErrorKind::RateLimit => StatusCode::TOO_MANY_REQUESTS,
        ErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
        ErrorKind::Network | ErrorKind::Server | ErrorKind::Parsing => StatusCode::BAD_GATEWAY,
        ErrorKind::Unknown => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Error returned by route handlers.
#[derive(Debug)]
pub enum ApiError {
    App(AppError),
    /// Rejected request input.
    BadRequest(String),
}

impl From<AppError> for ApiError {
    fn from(err: AppError) -> Self {
        Self::App(err)
    }
}

impl ApiError {
    /// Status code and machine-readable error tag.
    pub fn parts(&self) -> (StatusCode, String) {
        let (status, tag) = match self {
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "validation_error"),
            ApiError::App(err) => match err {
                AppError::ConfigError(_) => (StatusCode::INTERNAL_SERVER_ERROR, "config_error"),
                AppError::HandlerNotFound(_) => (StatusCode::BAD_REQUEST, "unknown_job_type"),
                AppError::JobNotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
                AppError::BrowserError(_) => (StatusCode::BAD_GATEWAY, "browser_error"),
                AppError::PoolClosed => (StatusCode::SERVICE_UNAVAILABLE, "unavailable"),
                AppError::InvalidSchedule { .. } => (StatusCode::BAD_REQUEST, "validation_error"),
                AppError::Timeout(_) => (StatusCode::GATEWAY_TIMEOUT, "timeout"),
                AppError::SerializationError(_) => {
                    (StatusCode::BAD_REQUEST, "serialization_error")
                }
                AppError::Scrape(failure) if failure.status == Some(400) => {
                    (StatusCode::BAD_REQUEST, "validation_error")
                }
                AppError::Scrape(failure) => {
                    let kind = classify(failure).kind;
                    return (status_for_kind(kind), kind.to_string());
                }
                AppError::Generic(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
            },
        };
        (status, tag.to_string())
    }

    pub fn message(&self) -> String {
        match self {
            ApiError::App(err) => err.to_string(),
            ApiError::BadRequest(msg) => msg.clone(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error) = self.parts();
        if status.is_server_error() {
            tracing::error!(%status, error = %self.message(), "Request failed");
        }

        let body = ErrorResponse {
            error,
            message: self.message(),
        };

        (status, axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use grindmap_core::error::Failure;
    use uuid::Uuid;

    use super::*;

    #[test]
    fn test_kind_status_table() {
        assert_eq!(status_for_kind(ErrorKind::UserNotFound), StatusCode::NOT_FOUND);
        assert_eq!(status_for_kind(ErrorKind::Auth), StatusCode::FORBIDDEN);
        assert_eq!(status_for_kind(ErrorKind::RateLimit), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(status_for_kind(ErrorKind::Timeout), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(status_for_kind(ErrorKind::Network), StatusCode::BAD_GATEWAY);
        assert_eq!(status_for_kind(ErrorKind::Server), StatusCode::BAD_GATEWAY);
        assert_eq!(status_for_kind(ErrorKind::Parsing), StatusCode::BAD_GATEWAY);
        assert_eq!(status_for_kind(ErrorKind::Unknown), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_app_error_mapping() {
        let (status, tag) = ApiError::from(AppError::JobNotFound(Uuid::new_v4())).parts();
        assert_eq!((status, tag.as_str()), (StatusCode::NOT_FOUND, "not_found"));

        let (status, tag) = ApiError::from(AppError::Timeout(Duration::from_secs(90))).parts();
        assert_eq!((status, tag.as_str()), (StatusCode::GATEWAY_TIMEOUT, "timeout"));

        let (status, tag) =
            ApiError::from(AppError::Scrape(Failure::http(429, "slow down"))).parts();
        assert_eq!((status, tag.as_str()), (StatusCode::TOO_MANY_REQUESTS, "rate_limit"));

        let (status, tag) =
            ApiError::from(AppError::Scrape(Failure::http(400, "Username is required"))).parts();
        assert_eq!((status, tag.as_str()), (StatusCode::BAD_REQUEST, "validation_error"));
    }
}
