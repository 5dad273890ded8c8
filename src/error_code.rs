//! 失败类别：定义 7 个封闭的错误类别及其重试语义。
//!
//! Closed failure taxonomy for provider attempts.
//!
//! Every failed attempt is reduced to exactly one [`ErrorKind`]. The kind drives
//! the retry decision, the fallback decision and the circuit breaker.
//!
//! | Kind             | Retryable | Typical signal                          |
//! |------------------|-----------|-----------------------------------------|
//! | `rate_limited`   | yes       | HTTP 429, "quota", "too many requests"  |
//! | `timeout`        | yes       | HTTP 408/504, deadline exceeded         |
//! | `auth`           | no        | HTTP 401/403, invalid API key           |
//! | `token_limit`    | no        | context length exceeded                 |
//! | `schema_invalid` | limited   | model output failed validation          |
//! | `network`        | yes       | connection reset / refused, DNS         |
//! | `unknown`        | yes       | anything unmatched                      |
//!
//! ## Example
//!
//! ```rust
//! use ai_orchestra::error_code::ErrorKind;
//!
//! let kind: ErrorKind = "rate_limited".parse().unwrap();
//! assert!(kind.retryable());
//! assert_eq!(ErrorKind::from_http_status(401), Some(ErrorKind::Auth));
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Provider throttled the request or the account quota is spent
    RateLimited,
    /// The attempt did not complete before its deadline
    Timeout,
    /// Credentials are missing, invalid or lack permission
    Auth,
    /// The request exceeds the model's context window
    TokenLimit,
    /// Structured output did not match the expected shape
    SchemaInvalid,
    /// Connectivity-level failure
    Network,
    /// Could not be classified
    Unknown,
}

impl ErrorKind {
    pub const ALL: [ErrorKind; 7] = [
        ErrorKind::RateLimited,
        ErrorKind::Timeout,
        ErrorKind::Auth,
        ErrorKind::TokenLimit,
        ErrorKind::SchemaInvalid,
        ErrorKind::Network,
        ErrorKind::Unknown,
    ];

    /// Returns the canonical snake_case name.
    #[inline]
    pub fn name(&self) -> &'static str {
        match self {
            Self::RateLimited => "rate_limited",
            Self::Timeout => "timeout",
            Self::Auth => "auth",
            Self::TokenLimit => "token_limit",
            Self::SchemaInvalid => "schema_invalid",
            Self::Network => "network",
            Self::Unknown => "unknown",
        }
    }

    /// Returns whether another attempt against the same provider can help.
    ///
    /// `auth` and `token_limit` are properties of the credentials or the request
    /// itself; repeating the call would fail identically.
    #[inline]
    pub fn retryable(&self) -> bool {
        !matches!(self, Self::Auth | Self::TokenLimit)
    }

    /// Returns whether the failure counts towards opening a provider's circuit.
    #[inline]
    pub fn trips_breaker(&self) -> bool {
        matches!(self, Self::Auth | Self::Network | Self::Timeout)
    }

    /// Maps an HTTP status code to the kind it unambiguously signals.
    pub fn from_http_status(status: u16) -> Option<Self> {
        let kind = match status {
            429 => Self::RateLimited,
            408 | 504 => Self::Timeout,
            401 | 403 => Self::Auth,
            413 => Self::TokenLimit,
            422 => Self::SchemaInvalid,
            502 | 503 => Self::Network,
            _ => return None,
        };
        Some(kind)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ErrorKind {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ErrorKind::ALL
            .into_iter()
            .find(|k| k.name() == s.trim())
            .ok_or_else(|| {
                crate::Error::validation_with_context(
                    format!("unknown error kind '{}'", s),
                    crate::ErrorContext::new().with_source("error_kind"),
                )
            })
    }
}
