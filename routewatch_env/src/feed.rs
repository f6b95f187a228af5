//! Transit feed abstraction for RouteWatch trackers.

use async_trait::async_trait;
use crate::error::FeedError;
use crate::types::{RawRecord, RouteId};
use std::time::Duration;

/// Abstraction over "where live transit data comes from".
///
/// The two operations are independent: vehicle snapshots are polled on
/// every tick, route stops are fetched once at startup (and again whenever
/// the caller decides the route changed).
///
/// # Implementations
///
/// - **Production**: `HttpFeed` - MBTA v3 JSON:API over reqwest
/// - **Simulation**: `SimFeed` - scripted fleet with latency/failure injection
///
/// # Data Flow
///
/// ```text
/// Scheduler              Feed                    Entity Model
///   |                      |                          |
///   |-- fetch snapshot --->|                          |
///   |<-- Vec<RawRecord> ---|                          |
///   |------------------------- parse_vehicle -------->|
/// ```
#[async_trait]
pub trait TransitFeed: Send + Sync + 'static {
    /// Fetches the current vehicle snapshot for the configured route.
    ///
    /// # Returns
    /// * `Ok(records)` - One raw record per vehicle, unvalidated
    /// * `Err(FeedError)` - The whole snapshot is unavailable this cycle
    async fn fetch_vehicle_snapshot(&self) -> Result<Vec<RawRecord>, FeedError>;

    /// Fetches the ordered stop list of a route.
    ///
    /// Order is path order; callers must not re-sort it.
    async fn fetch_route_stops(&self, route: &RouteId) -> Result<Vec<RawRecord>, FeedError>;
}

/// Marker trait for feed controllers in simulation.
///
/// Allows injecting faults like outages and slow responses.
pub trait FeedController: Send + Sync {
    /// Sets the artificial latency applied to every fetch.
    fn set_latency(&self, latency: Duration);

    /// Sets the probability (0.0 - 1.0) that a fetch fails.
    fn set_failure_rate(&self, rate: f64);

    /// Forces the next `count` fetches to fail regardless of the failure rate.
    fn fail_next(&self, count: u32);
}
