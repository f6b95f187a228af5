//! Scheduler - drives the reconciler on a fixed period.
//!
//! This module provides the integration layer between the pure parts of the
//! crate (entity model, reconciler, route renderer) and the environment
//! (`TrackerContext`, `TransitFeed`, `DisplaySink`).
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       RouteTracker                          │
//! │  ┌──────────────────────────────────────────────────────┐   │
//! │  │  tick loop: sleep(period) → spawn(poll cycle) → ...  │   │
//! │  └──────────────────────────────────────────────────────┘   │
//! │                              │                               │
//! │  ┌─────────┐   ┌──────────┐   ┌────────────┐   ┌─────────┐  │
//! │  │  FEED   │ → │  PARSE   │ → │ RECONCILE  │ → │  SINK   │  │
//! │  └─────────┘   └──────────┘   └────────────┘   └─────────┘  │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Overlapping cycles
//!
//! Ticks fire every `poll_period` measured trigger to trigger, regardless of
//! how long fetches take. With `OverlapPolicy::SkipIfBusy` a tick that fires
//! while a cycle is in flight is skipped (and counted). With
//! `OverlapPolicy::Concurrent` cycles may overlap; each one still reconciles
//! atomically under the table lock once its own fetch has landed, so the
//! last fetch to land wins.
//!
//! # Usage
//!
//! ```ignore
//! use routewatch_core::{MemorySink, RouteTracker, TrackerConfig};
//! use routewatch_env::{HttpFeed, TokioContext};
//!
//! let config = TrackerConfig::default();
//! let feed = HttpFeed::new(&config.api_base_url, config.route(), config.request_timeout()?)?;
//! let mut tracker = RouteTracker::new(TokioContext::shared(), Arc::new(feed), MemorySink::new(), config)?;
//!
//! tracker.start();
//! // ...
//! tracker.stop();
//! ```

use crate::config::{OverlapPolicy, TrackerConfig};
use crate::display::{DisplayOp, DisplaySink, DisplayTable, LayerHandle};
use crate::entity::{parse_batch, parse_stop, parse_vehicle, MalformedPolicy, MalformedRecord};
use crate::error::{CycleError, TrackerError};
use crate::reconciler::{reconcile, ReconcileSummary};
use crate::route::{set_route, RouteGeometry};
use routewatch_env::{FeedError, RouteId, TrackerContext, TransitFeed};

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

// ============================================================================
// OUTCOMES & STATS
// ============================================================================

/// What one applied cycle did.
#[derive(Debug, Clone, PartialEq)]
pub struct CycleReport {
    /// Operation counts
    pub summary: ReconcileSummary,
    /// Operations issued to the sink, in order
    pub ops: Vec<DisplayOp>,
    /// Malformed records skipped under the drop policy
    pub dropped: usize,
    /// Vehicles on display after the cycle
    pub displayed: usize,
}

/// Result of one poll cycle.
#[derive(Debug)]
pub enum CycleOutcome {
    /// Snapshot fetched, reconciled and applied
    Applied(CycleReport),
    /// Another cycle was in flight (skip-if-busy policy)
    SkippedBusy,
    /// Fetch failed; displayed state left untouched
    FetchFailed(FeedError),
    /// A malformed record aborted the cycle (abort policy); state untouched
    Rejected(MalformedRecord),
}

impl CycleOutcome {
    /// True when the snapshot was applied.
    pub fn is_applied(&self) -> bool {
        matches!(self, CycleOutcome::Applied(_))
    }
}

/// Running counters of a tracker.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackerStats {
    pub cycles_applied: u64,
    pub cycles_skipped: u64,
    pub fetch_failures: u64,
    pub cycles_rejected: u64,
    pub records_dropped: u64,
    pub created: u64,
    pub moved: u64,
    pub removed: u64,
    pub route_refreshes: u64,
    pub route_failures: u64,
    /// Highest number of cycles that were fetching at the same time
    pub peak_in_flight: usize,
}

/// Counts a cycle as in flight for as long as it lives.
struct InFlight<'a> {
    counter: &'a AtomicUsize,
}

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicUsize, peak: &AtomicUsize) -> Self {
        let now = counter.fetch_add(1, Ordering::SeqCst) + 1;
        peak.fetch_max(now, Ordering::SeqCst);
        Self { counter }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::SeqCst);
    }
}

// ============================================================================
// SHARED STATE
// ============================================================================

/// Everything a spawned cycle needs. Lives behind an `Arc`.
struct TrackerShared<Ctx, Feed, Sink> {
    context: Arc<Ctx>,
    feed: Arc<Feed>,
    sink: Arc<Mutex<Sink>>,
    config: TrackerConfig,
    route: RouteId,
    poll_period: Duration,

    /// Displayed vehicles; replaced wholesale at the end of every applied cycle
    display: Mutex<DisplayTable>,

    /// Installed route layer and the geometry it shows
    route_layer: Mutex<Option<(LayerHandle, RouteGeometry)>>,

    /// Held for the whole cycle under `SkipIfBusy`
    cycle_gate: Mutex<()>,

    stats: Mutex<TrackerStats>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl<Ctx, Feed, Sink> TrackerShared<Ctx, Feed, Sink>
where
    Ctx: TrackerContext,
    Feed: TransitFeed,
    Sink: DisplaySink,
{
    async fn poll_once(&self) -> CycleOutcome {
        let _gate = match self.config.overlap_policy {
            OverlapPolicy::SkipIfBusy => match self.cycle_gate.try_lock() {
                Ok(guard) => Some(guard),
                Err(_) => {
                    debug!("Previous cycle still in flight, skipping tick");
                    self.stats.lock().await.cycles_skipped += 1;
                    return CycleOutcome::SkippedBusy;
                }
            },
            OverlapPolicy::Concurrent => None,
        };

        let started = self.context.now();
        let in_flight = InFlight::enter(&self.in_flight, &self.peak_in_flight);
        let fetched = self.feed.fetch_vehicle_snapshot().await;
        drop(in_flight);

        let records = match fetched {
            Ok(records) => records,
            Err(e) => {
                warn!("Vehicle fetch failed, keeping current display: {}", e);
                self.stats.lock().await.fetch_failures += 1;
                return CycleOutcome::FetchFailed(e);
            }
        };

        let batch = match parse_batch(&records, parse_vehicle, self.config.malformed_policy) {
            Ok(batch) => batch,
            Err(e) => {
                warn!("Snapshot rejected: {}", e);
                self.stats.lock().await.cycles_rejected += 1;
                return CycleOutcome::Rejected(e);
            }
        };

        if !batch.dropped.is_empty() {
            warn!(
                "Dropped {} malformed vehicle record(s) out of {}",
                batch.dropped.len(),
                records.len()
            );
            for err in &batch.dropped {
                debug!("  dropped: {}", err);
            }
        }

        // Table and sink are held together for the whole synchronous pass
        let (ops, displayed) = {
            let mut display = self.display.lock().await;
            let mut sink = self.sink.lock().await;
            let previous = std::mem::take(&mut *display);
            let (next, ops) = reconcile(previous, &batch.items, &mut *sink);
            let displayed = next.len();
            *display = next;
            (ops, displayed)
        };

        let summary = ReconcileSummary::from_ops(&ops);
        {
            let mut stats = self.stats.lock().await;
            stats.cycles_applied += 1;
            stats.records_dropped += batch.dropped.len() as u64;
            stats.created += summary.created as u64;
            stats.moved += summary.moved as u64;
            stats.removed += summary.removed as u64;
        }

        let elapsed = self.context.now().saturating_sub(started);
        debug!(
            "Cycle done in {:?}: {} displayed (+{} ~{} -{})",
            elapsed, displayed, summary.created, summary.moved, summary.removed
        );

        CycleOutcome::Applied(CycleReport {
            summary,
            ops,
            dropped: batch.dropped.len(),
            displayed,
        })
    }

    async fn refresh_route(&self) -> Result<LayerHandle, CycleError> {
        let result = self.fetch_route_geometry().await;
        let geometry = match result {
            Ok(geometry) => geometry,
            Err(e) => {
                warn!("Route {} refresh failed: {}", self.route, e);
                self.stats.lock().await.route_failures += 1;
                return Err(e);
            }
        };

        let layer = {
            let mut current = self.route_layer.lock().await;
            let mut sink = self.sink.lock().await;
            let previous = current.as_ref().map(|(layer, _)| *layer);
            let layer = set_route(previous, &geometry, &mut *sink);
            *current = Some((layer, geometry.clone()));
            layer
        };

        self.stats.lock().await.route_refreshes += 1;
        info!(
            "Route {} installed: {} stops, {:.1} km",
            self.route,
            geometry.len(),
            geometry.length_meters() / 1000.0
        );
        Ok(layer)
    }

    async fn fetch_route_geometry(&self) -> Result<RouteGeometry, CycleError> {
        let records = self.feed.fetch_route_stops(&self.route).await?;
        // A bad stop only shortens the polyline
        let batch = parse_batch(&records, parse_stop, MalformedPolicy::Drop)?;
        if !batch.dropped.is_empty() {
            warn!("Dropped {} malformed stop record(s)", batch.dropped.len());
        }
        Ok(RouteGeometry::from_stops(&batch.items))
    }

    async fn tick_loop(self: Arc<Self>, mut stop_rx: watch::Receiver<()>) {
        let period = self.poll_period;

        loop {
            tokio::select! {
                biased;
                // Any send, or the sender being dropped, means stop
                _ = stop_rx.changed() => break,
                _ = self.context.sleep(period) => {}
            }

            let shared = Arc::clone(&self);
            self.context.spawn("poll-cycle", async move {
                shared.poll_once().await;
            });
        }

        info!("Polling loop for route {} stopped", self.route);
    }
}

// ============================================================================
// ROUTE TRACKER
// ============================================================================

/// Polls one route and keeps a display sink in sync with it.
///
/// Generic over the context, feed and sink implementations, allowing the
/// same tracker to run in production (Tokio + HTTP) or simulation.
pub struct RouteTracker<Ctx, Feed, Sink>
where
    Ctx: TrackerContext,
    Feed: TransitFeed,
    Sink: DisplaySink,
{
    shared: Arc<TrackerShared<Ctx, Feed, Sink>>,

    /// Present while the tick loop runs; dropping it stops the loop
    stop_tx: Option<watch::Sender<()>>,
}

impl<Ctx, Feed, Sink> RouteTracker<Ctx, Feed, Sink>
where
    Ctx: TrackerContext,
    Feed: TransitFeed,
    Sink: DisplaySink,
{
    /// Creates a stopped tracker.
    pub fn new(
        context: Arc<Ctx>,
        feed: Arc<Feed>,
        sink: Sink,
        config: TrackerConfig,
    ) -> Result<Self, TrackerError> {
        config.validate()?;
        let route = config.route();
        let poll_period = config.poll_period()?;

        Ok(Self {
            shared: Arc::new(TrackerShared {
                context,
                feed,
                sink: Arc::new(Mutex::new(sink)),
                config,
                route,
                poll_period,
                display: Mutex::new(DisplayTable::new()),
                route_layer: Mutex::new(None),
                cycle_gate: Mutex::new(()),
                stats: Mutex::new(TrackerStats::default()),
                in_flight: AtomicUsize::new(0),
                peak_in_flight: AtomicUsize::new(0),
            }),
            stop_tx: None,
        })
    }

    /// Starts polling: one route refresh and one poll right away, then a
    /// poll every `poll_period`. No-op if already running.
    pub fn start(&mut self) {
        if self.stop_tx.is_some() {
            warn!("Tracker for route {} already running", self.shared.route);
            return;
        }

        let (stop_tx, stop_rx) = watch::channel(());
        self.stop_tx = Some(stop_tx);

        info!(
            "Tracking route {} every {:?} ({:?})",
            self.shared.route,
            self.shared.poll_period,
            self.shared.config.overlap_policy
        );

        let context = Arc::clone(&self.shared.context);

        let shared = Arc::clone(&self.shared);
        context.spawn("route-refresh", async move {
            if let Err(e) = shared.refresh_route().await {
                debug!("Startup route refresh for {} failed: {}", shared.route, e);
            }
        });

        let shared = Arc::clone(&self.shared);
        context.spawn("poll-cycle", async move {
            shared.poll_once().await;
        });

        let shared = Arc::clone(&self.shared);
        context.spawn("tick-loop", shared.tick_loop(stop_rx));
    }

    /// Stops scheduling new polls. Cycles already in flight still complete
    /// and apply their operations.
    pub fn stop(&mut self) {
        if self.stop_tx.take().is_some() {
            info!("Stopping tracker for route {}", self.shared.route);
        }
    }

    /// True between `start()` and `stop()`.
    pub fn is_running(&self) -> bool {
        self.stop_tx.is_some()
    }

    /// Runs one poll cycle now, outside the timer.
    pub async fn poll_once(&self) -> CycleOutcome {
        self.shared.poll_once().await
    }

    /// Refetches the route stops and replaces the displayed route.
    pub async fn refresh_route(&self) -> Result<LayerHandle, CycleError> {
        self.shared.refresh_route().await
    }

    /// Copy of the current display table.
    pub async fn display_table(&self) -> DisplayTable {
        self.shared.display.lock().await.clone()
    }

    /// Geometry of the installed route, if any.
    pub async fn route_geometry(&self) -> Option<RouteGeometry> {
        self.shared
            .route_layer
            .lock()
            .await
            .as_ref()
            .map(|(_, geometry)| geometry.clone())
    }

    /// Snapshot of the counters.
    pub async fn stats(&self) -> TrackerStats {
        let mut stats = self.shared.stats.lock().await.clone();
        stats.peak_in_flight = self.shared.peak_in_flight.load(Ordering::SeqCst);
        stats
    }

    /// Shared handle to the sink, for inspection.
    pub fn sink(&self) -> Arc<Mutex<Sink>> {
        Arc::clone(&self.shared.sink)
    }

    /// The tracker's configuration.
    pub fn config(&self) -> &TrackerConfig {
        &self.shared.config
    }
}

impl<Ctx, Feed, Sink> Drop for RouteTracker<Ctx, Feed, Sink>
where
    Ctx: TrackerContext,
    Feed: TransitFeed,
    Sink: DisplaySink,
{
    fn drop(&mut self) {
        self.stop();
    }
}

// ============================================================================
// TESTS
// ============================================================================
