//! Simulation harness errors.

use routewatch_core::TrackerError;
use thiserror::Error;

/// Reasons a scenario could not run at all (as opposed to failing its checks).
#[derive(Debug, Error)]
pub enum SimError {
    #[error("Runtime setup failed: {0}")]
    Runtime(#[from] std::io::Error),

    #[error("Tracker setup failed: {0}")]
    Tracker(#[from] TrackerError),
}
