//! Core environment context trait for RouteWatch trackers.

use async_trait::async_trait;
use std::future::Future;
use std::time::{Duration, SystemTime};

/// The central interface for clock and task interaction.
///
/// This trait abstracts the "real world" so that the polling scheduler can
/// run against the wall clock in production and against a paused, virtual
/// clock in simulation.
///
/// # Implementations
///
/// - **Production**: `TokioContext` - wraps `tokio::time` and `tokio::spawn`
/// - **Simulation**: `SimContext` (in `routewatch_sim`) - paused Tokio clock
///   with a fixed epoch and a recorded seed
#[async_trait]
pub trait TrackerContext: Send + Sync + 'static {
    /// Returns the monotonic time since context creation.
    ///
    /// In simulation, this is the virtual clock time.
    fn now(&self) -> Duration;

    /// Returns the wall-clock time used for timestamps in logs and exports.
    fn system_time(&self) -> SystemTime;

    /// Suspends execution for the given duration.
    ///
    /// The scheduler's tick loop sleeps through this, so a simulation
    /// context controls how polling periods elapse.
    async fn sleep(&self, duration: Duration);

    /// Spawns a background task.
    ///
    /// `name` is attached to the task's tracing span.
    fn spawn<F>(&self, name: &str, future: F)
    where
        F: Future<Output = ()> + Send + 'static;

    /// Returns the context's seed (for logging/debugging).
    ///
    /// In production, returns 0 (not seeded).
    fn seed(&self) -> u64;
}
