//! Tracker-level errors.

use thiserror::Error;

/// Errors raised while setting a tracker up.
///
/// Runtime failures (fetch errors, malformed records) never surface here:
/// they are cycle-scoped and reported through `CycleOutcome`.
#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config format error: {0}")]
    ConfigFormat(#[from] serde_json::Error),

    #[error("Feed setup failed: {0}")]
    Feed(#[from] routewatch_env::FeedError),
}

/// Why a fetch cycle (snapshot poll or route refresh) did not apply.
#[derive(Debug, Error)]
pub enum CycleError {
    #[error("Fetch failed: {0}")]
    Fetch(#[from] routewatch_env::FeedError),

    #[error("Malformed record: {0}")]
    Malformed(#[from] crate::entity::MalformedRecord),
}
