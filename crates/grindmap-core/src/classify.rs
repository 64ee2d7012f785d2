//! Failure classification.
//!
//! Maps a [`Failure`] to a taxonomy [`ErrorKind`] and a retry verdict. Each
//! kind is described by a [`MatchRule`] record; rules are checked in
//! precedence order and the first match wins.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Failure;

/// Taxonomy of handler failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Network,
    RateLimit,
    Auth,
    UserNotFound,
    Server,
    Parsing,
    Timeout,
    Unknown,
}

impl ErrorKind {
    pub const ALL: [ErrorKind; 8] = [
        ErrorKind::Network,
        ErrorKind::RateLimit,
        ErrorKind::Auth,
        ErrorKind::UserNotFound,
        ErrorKind::Server,
        ErrorKind::Parsing,
        ErrorKind::Timeout,
        ErrorKind::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Network => "network",
            ErrorKind::RateLimit => "rate_limit",
            ErrorKind::Auth => "auth",
            ErrorKind::UserNotFound => "user_not_found",
            ErrorKind::Server => "server",
            ErrorKind::Parsing => "parsing",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ErrorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.to_lowercase();
        ErrorKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == lower)
            .ok_or_else(|| format!("Unknown error kind: {s}"))
    }
}

/// Result of classifying a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    pub kind: ErrorKind,
    pub retryable: bool,
}

/// Pattern set describing one error kind.
///
/// A failure matches when its status satisfies `status`, its code is one of
/// `codes`, or its lowercased message contains one of `patterns`.
#[derive(Debug, Clone, Copy)]
pub struct MatchRule {
    pub status: Option<fn(u16) -> bool>,
    pub codes: &'static [&'static str],
    pub patterns: &'static [&'static str],
}

/// Check a failure against a single rule.
pub fn matches_rule(failure: &Failure, rule: &MatchRule) -> bool {
    if let (Some(check), Some(status)) = (rule.status, failure.status)
        && check(status)
    {
        return true;
    }

    if let Some(code) = failure.code.as_deref()
        && rule.codes.contains(&code)
    {
        return true;
    }

    let message = failure.message.to_lowercase();
    rule.patterns.iter().any(|p| message.contains(p))
}

fn is_too_many_requests(status: u16) -> bool {
    status == 429
}

fn is_unauthorized(status: u16) -> bool {
    status == 401 || status == 403
}

fn is_not_found(status: u16) -> bool {
    status == 404
}

fn is_server_error(status: u16) -> bool {
    (500..600).contains(&status)
}

const NETWORK: MatchRule = MatchRule {
    status: None,
    codes: &["ECONNRESET", "ENOTFOUND", "ECONNREFUSED", "NETWORK_ERROR"],
    patterns: &["network error", "connection refused", "dns lookup failed"],
};

const RATE_LIMIT: MatchRule = MatchRule {
    status: Some(is_too_many_requests),
    codes: &["RATE_LIMITED"],
    patterns: &["rate limit", "too many requests"],
};

const AUTH: MatchRule = MatchRule {
    status: Some(is_unauthorized),
    codes: &[],
    patterns: &["unauthorized", "forbidden", "authentication"],
};

const USER_NOT_FOUND: MatchRule = MatchRule {
    status: Some(is_not_found),
    codes: &[],
    patterns: &["not found", "does not exist"],
};

const SERVER: MatchRule = MatchRule {
    status: Some(is_server_error),
    codes: &["SERVER_ERROR"],
    patterns: &[],
};

const PARSING: MatchRule = MatchRule {
    status: None,
    codes: &[],
    patterns: &["json", "parse", "invalid response", "malformed"],
};

const TIMEOUT: MatchRule = MatchRule {
    status: None,
    codes: &["ETIMEDOUT"],
    patterns: &["timeout", "timed out"],
};

/// Rules in precedence order.
const RULES: [(ErrorKind, MatchRule); 7] = [
    (ErrorKind::Network, NETWORK),
    (ErrorKind::RateLimit, RATE_LIMIT),
    (ErrorKind::Auth, AUTH),
    (ErrorKind::UserNotFound, USER_NOT_FOUND),
    (ErrorKind::Server, SERVER),
    (ErrorKind::Parsing, PARSING),
    (ErrorKind::Timeout, TIMEOUT),
];

/// Taxonomy tag for a failure; `Unknown` when no rule matches.
pub fn error_kind(failure: &Failure) -> ErrorKind {
    RULES
        .iter()
        .find(|(_, rule)| matches_rule(failure, rule))
        .map(|(kind, _)| *kind)
        .unwrap_or(ErrorKind::Unknown)
}

/// Returns true when retrying the failure cannot help: client errors other
/// than 429, authentication problems, and missing users.
pub fn is_non_retryable(failure: &Failure) -> bool {
    if let Some(status) = failure.status
        && (400..500).contains(&status)
        && status != 429
    {
        return true;
    }

    matches!(
        error_kind(failure),
        ErrorKind::Auth | ErrorKind::UserNotFound
    )
}

pub fn classify(failure: &Failure) -> Classification {
    Classification {
        kind: error_kind(failure),
        retryable: !is_non_retryable(failure),
    }
}
