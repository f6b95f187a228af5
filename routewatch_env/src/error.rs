//! Error types for transit feed access.

use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while fetching a snapshot or route from a feed.
///
/// Every variant is cycle-scoped: the scheduler logs it, leaves the
/// displayed state untouched and tries again on the next tick.
#[derive(Debug, Error)]
pub enum FeedError {
    /// Transport failure (connection refused, DNS, TLS, reset...)
    #[error("Network error: {0}")]
    Network(String),

    /// The server answered with a non-success status
    #[error("HTTP status {status}")]
    Http { status: u16 },

    /// The body was not the expected JSON document
    #[error("Decode error: {0}")]
    Decode(String),

    /// Request timed out
    #[error("Timeout after {0}ms")]
    Timeout(u64),

    /// Feed refused to serve (outage, injected fault)
    #[error("Feed unavailable: {0}")]
    Unavailable(String),
}

impl FeedError {
    /// Creates a network error.
    pub fn network(msg: impl Into<String>) -> Self {
        Self::Network(msg.into())
    }

    /// Creates an unavailable error.
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }

    /// Creates a timeout error, saturating at `u64::MAX` milliseconds.
    pub fn timeout(after: Duration) -> Self {
        Self::Timeout(u64::try_from(after.as_millis()).unwrap_or(u64::MAX))
    }

    /// Classifies a reqwest failure. `timeout` is the request budget the
    /// client was built with and is reported on timeouts.
    pub fn from_reqwest(err: reqwest::Error, timeout: Duration) -> Self {
        if err.is_timeout() {
            Self::timeout(timeout)
        } else if let Some(status) = err.status() {
            Self::Http { status: status.as_u16() }
        } else if err.is_decode() {
            Self::Decode(err.to_string())
        } else {
            Self::network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for FeedError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode(err.to_string())
    }
}
