//! Simulated transit feed with fault injection.

use crate::context::SimContext;
use crate::fleet::Fleet;
use async_trait::async_trait;
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use routewatch_env::{FeedController, FeedError, RawRecord, RouteId, TrackerContext, TransitFeed};
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;

/// RNG stream used for fault injection.
const FAULT_STREAM: u64 = 0xFEED;

/// Counters exposed for scenario assertions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FeedStats {
    pub vehicle_fetches: u64,
    pub stop_fetches: u64,
    pub injected_failures: u64,
    /// Highest number of vehicle fetches open at the same time
    pub peak_in_flight: usize,
}

/// Transit feed served from a simulated `Fleet`.
///
/// Every fetch waits out the configured latency on the simulation clock,
/// then either fails (forced or by roll) or advances the fleet to "now" and
/// returns its records. Outages apply to vehicle snapshots only.
pub struct SimFeed {
    context: Arc<SimContext>,
    fleet: Arc<Mutex<Fleet>>,
    rng: Mutex<ChaCha8Rng>,

    latency_ms: AtomicU64,
    /// `f64` bits of the failure probability
    failure_rate: AtomicU64,
    forced_failures: AtomicU32,

    vehicle_fetches: AtomicU64,
    stop_fetches: AtomicU64,
    injected_failures: AtomicU64,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,

    /// Last snapshot actually handed to a caller
    last_served: Mutex<Option<Vec<RawRecord>>>,
}

impl SimFeed {
    /// Creates a feed over `fleet`, with no latency and no failures.
    pub fn new(context: Arc<SimContext>, fleet: Fleet) -> Self {
        let rng = context.rng(FAULT_STREAM);
        Self {
            context,
            fleet: Arc::new(Mutex::new(fleet)),
            rng: Mutex::new(rng),
            latency_ms: AtomicU64::new(0),
            failure_rate: AtomicU64::new(0.0f64.to_bits()),
            forced_failures: AtomicU32::new(0),
            vehicle_fetches: AtomicU64::new(0),
            stop_fetches: AtomicU64::new(0),
            injected_failures: AtomicU64::new(0),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
            last_served: Mutex::new(None),
        }
    }

    /// Shared handle to the fleet behind this feed.
    pub fn fleet(&self) -> Arc<Mutex<Fleet>> {
        Arc::clone(&self.fleet)
    }

    /// The last snapshot returned successfully, if any.
    pub async fn last_served(&self) -> Option<Vec<RawRecord>> {
        self.last_served.lock().await.clone()
    }

    pub fn stats(&self) -> FeedStats {
        FeedStats {
            vehicle_fetches: self.vehicle_fetches.load(Ordering::SeqCst),
            stop_fetches: self.stop_fetches.load(Ordering::SeqCst),
            injected_failures: self.injected_failures.load(Ordering::SeqCst),
            peak_in_flight: self.peak_in_flight.load(Ordering::SeqCst),
        }
    }

    fn latency(&self) -> Duration {
        Duration::from_millis(self.latency_ms.load(Ordering::SeqCst))
    }

    async fn should_fail(&self) -> bool {
        let forced = self
            .forced_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if forced {
            return true;
        }

        let rate = f64::from_bits(self.failure_rate.load(Ordering::SeqCst));
        rate > 0.0 && self.rng.lock().await.gen::<f64>() < rate
    }
}

#[async_trait]
impl TransitFeed for SimFeed {
    async fn fetch_vehicle_snapshot(&self) -> Result<Vec<RawRecord>, FeedError> {
        self.vehicle_fetches.fetch_add(1, Ordering::SeqCst);
        let open = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(open, Ordering::SeqCst);

        let latency = self.latency();
        if !latency.is_zero() {
            self.context.sleep(latency).await;
        }

        let result = if self.should_fail().await {
            self.injected_failures.fetch_add(1, Ordering::SeqCst);
            debug!("Injected outage at {:?}", self.context.now());
            Err(FeedError::Http { status: 503 })
        } else {
            let records = {
                let mut fleet = self.fleet.lock().await;
                fleet.advance_to(self.context.now());
                fleet.vehicle_records()
            };
            *self.last_served.lock().await = Some(records.clone());
            Ok(records)
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn fetch_route_stops(&self, route: &RouteId) -> Result<Vec<RawRecord>, FeedError> {
        self.stop_fetches.fetch_add(1, Ordering::SeqCst);

        let latency = self.latency();
        if !latency.is_zero() {
            self.context.sleep(latency).await;
        }

        let fleet = self.fleet.lock().await;
        if fleet.route_id() != route.as_str() {
            return Err(FeedError::Http { status: 404 });
        }
        Ok(fleet.stop_records())
    }
}

impl FeedController for SimFeed {
    fn set_latency(&self, latency: Duration) {
        self.latency_ms.store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    fn set_failure_rate(&self, rate: f64) {
        self.failure_rate
            .store(rate.clamp(0.0, 1.0).to_bits(), Ordering::SeqCst);
    }

    fn fail_next(&self, count: u32) {
        self.forced_failures.store(count, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fleet::FleetConfig;

    fn feed(seed: u64) -> SimFeed {
        let context = SimContext::shared(seed);
        let fleet = Fleet::new(context.rng(1), FleetConfig::default().with_size(4));
        SimFeed::new(context, fleet)
    }

    #[tokio::test(start_paused = true)]
    async fn test_sim_feed_serves_fleet() {
        let feed = feed(42);
        let records = feed.fetch_vehicle_snapshot().await.unwrap();

        assert_eq!(records.len(), 4);
        assert_eq!(feed.last_served().await, Some(records));
        assert_eq!(feed.stats().vehicle_fetches, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fail_next_is_forced_then_clears() {
        let feed = feed(42);
        feed.fail_next(2);

        assert!(feed.fetch_vehicle_snapshot().await.is_err());
        assert!(feed.fetch_vehicle_snapshot().await.is_err());
        assert!(feed.fetch_vehicle_snapshot().await.is_ok());
        assert_eq!(feed.stats().injected_failures, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_keeps_last_served() {
        let feed = feed(42);
        let first = feed.fetch_vehicle_snapshot().await.unwrap();

        feed.set_failure_rate(1.0);
        assert!(matches!(
            feed.fetch_vehicle_snapshot().await,
            Err(FeedError::Http { status: 503 })
        ));
        assert_eq!(feed.last_served().await, Some(first));
    }

    #[tokio::test(start_paused = true)]
    async fn test_latency_uses_sim_clock() {
        let feed = feed(42);
        feed.set_latency(Duration::from_secs(40));

        let start = tokio::time::Instant::now();
        feed.fetch_vehicle_snapshot().await.unwrap();
        assert_eq!(start.elapsed(), Duration::from_secs(40));
    }

    #[tokio::test(start_paused = true)]
    async fn test_overlapping_fetches_counted() {
        let feed = Arc::new(feed(42));
        feed.set_latency(Duration::from_secs(10));

        let a = tokio::spawn({
            let feed = Arc::clone(&feed);
            async move { feed.fetch_vehicle_snapshot().await.is_ok() }
        });
        let b = tokio::spawn({
            let feed = Arc::clone(&feed);
            async move { feed.fetch_vehicle_snapshot().await.is_ok() }
        });

        assert!(a.await.unwrap());
        assert!(b.await.unwrap());
        assert_eq!(feed.stats().peak_in_flight, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_route_is_not_found() {
        let feed = feed(42);
        let result = feed.fetch_route_stops(&RouteId::new("999")).await;
        assert!(matches!(result, Err(FeedError::Http { status: 404 })));

        let stops = feed.fetch_route_stops(&RouteId::new("7")).await.unwrap();
        assert_eq!(stops.len(), 14);
    }

    #[tokio::test(start_paused = true)]
    async fn test_same_seed_same_outages() {
        let a = feed(7);
        let b = feed(7);
        a.set_failure_rate(0.5);
        b.set_failure_rate(0.5);

        let mut pattern_a = Vec::new();
        let mut pattern_b = Vec::new();
        for _ in 0..20 {
            pattern_a.push(a.fetch_vehicle_snapshot().await.is_ok());
            pattern_b.push(b.fetch_vehicle_snapshot().await.is_ok());
        }
        assert_eq!(pattern_a, pattern_b);
    }
}
