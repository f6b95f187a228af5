//! Scenario runner - drives a real `RouteTracker` against a simulated fleet.
//!
//! Each run builds a single-threaded Tokio runtime with a paused clock, so
//! a ten-minute scenario finishes in milliseconds and the same seed always
//! produces the same trace.

use crate::context::SimContext;
use crate::error::SimError;
use crate::export::{SimEvent, SimExport, SimFrame, VehicleFix};
use crate::feed::SimFeed;
use crate::fleet::{Fleet, FleetConfig};
use crate::scenarios::ScenarioId;

use routewatch_core::{
    parse_batch, parse_vehicle, MalformedPolicy, MemorySink, Position, RouteGeometry,
    RouteTracker, TrackerConfig, TrackerStats, VehicleId,
};
use routewatch_env::{FeedController, TrackerContext};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// RNG stream for fleet movement and records.
const FLEET_STREAM: u64 = 1;

type SimTracker = RouteTracker<SimContext, SimFeed, MemorySink>;

/// Results from running a scenario.
#[derive(Debug, Clone, Serialize)]
pub struct ScenarioResult {
    /// Scenario that was run
    pub scenario: ScenarioId,

    /// Seed used
    pub seed: u64,

    /// Whether scenario passed all assertions
    pub passed: bool,

    /// Display checks performed
    pub samples: u64,

    /// Final simulation time in seconds
    pub final_time_secs: f64,

    /// Vehicles on display at the end
    pub final_displayed: usize,

    /// Failure message if any
    pub failure_reason: Option<String>,

    /// Metrics collected during run
    pub metrics: ScenarioMetrics,
}

impl ScenarioResult {
    fn setup_failed(scenario: ScenarioId, seed: u64, error: SimError) -> Self {
        Self {
            scenario,
            seed,
            passed: false,
            samples: 0,
            final_time_secs: 0.0,
            final_displayed: 0,
            failure_reason: Some(error.to_string()),
            metrics: ScenarioMetrics::default(),
        }
    }
}

/// Metrics collected during scenario execution.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScenarioMetrics {
    pub vehicle_fetches: u64,
    pub cycles_applied: u64,
    pub cycles_skipped: u64,
    pub fetch_failures: u64,
    pub records_dropped: u64,
    pub markers_created: u64,
    pub markers_moved: u64,
    pub markers_removed: u64,
    pub route_refreshes: u64,
    pub peak_in_flight: usize,
    pub peak_route_layers: usize,
    pub max_displayed: usize,
}

/// How the world misbehaves in one scenario.
#[derive(Debug, Clone)]
struct ScenarioSetup {
    fleet: FleetConfig,
    latency: Duration,
    failure_rate: f64,
    forced_failures: u32,
    reroute: bool,
}

impl ScenarioSetup {
    fn for_scenario(scenario: ScenarioId) -> Self {
        let base = Self {
            fleet: FleetConfig::default(),
            latency: Duration::ZERO,
            failure_rate: 0.0,
            forced_failures: 0,
            reroute: false,
        };

        match scenario {
            ScenarioId::SteadyState => base,
            ScenarioId::FleetChurn => Self {
                fleet: FleetConfig::default().with_churn_rate(0.01),
                ..base
            },
            ScenarioId::FlakyFeed => Self {
                failure_rate: 0.3,
                forced_failures: 2,
                ..base
            },
            ScenarioId::SlowFeed => Self {
                latency: Duration::from_secs(40),
                ..base
            },
            ScenarioId::MalformedRecords => Self {
                fleet: FleetConfig::default().with_malformed_rate(0.15),
                ..base
            },
            ScenarioId::RouteRefresh => Self { reroute: true, ..base },
        }
    }
}

/// Runs scenarios.
pub struct ScenarioRunner {
    /// Configuration seed
    seed: u64,

    /// Simulated run length
    duration: Duration,

    /// Tracker poll period
    poll_period: Duration,
}

impl ScenarioRunner {
    /// Creates a new scenario runner (10 minutes, 25 s period).
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            duration: Duration::from_secs(600),
            poll_period: Duration::from_secs(25),
        }
    }

    /// Sets the simulated duration.
    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    /// Sets the tracker poll period.
    pub fn with_poll_period(mut self, period: Duration) -> Self {
        self.poll_period = period;
        self
    }

    /// Runs a scenario and returns the result.
    pub fn run(&self, scenario: ScenarioId) -> ScenarioResult {
        self.run_with_export(scenario).0
    }

    /// Runs a scenario and also returns its frame-by-frame trace.
    pub fn run_with_export(&self, scenario: ScenarioId) -> (ScenarioResult, SimExport) {
        info!("Starting scenario: {} (seed={})", scenario.name(), self.seed);

        let mut export = SimExport::new(scenario.name(), self.seed);
        let outcome = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .start_paused(true)
            .build()
            .map_err(SimError::from)
            .and_then(|runtime| runtime.block_on(self.drive(scenario, &mut export)));

        let result = match outcome {
            Ok(result) => result,
            Err(e) => ScenarioResult::setup_failed(scenario, self.seed, e),
        };

        export.finalize(result.passed, result.failure_reason.clone());
        (result, export)
    }

    async fn drive(&self, scenario: ScenarioId, export: &mut SimExport) -> Result<ScenarioResult, SimError> {
        let setup = ScenarioSetup::for_scenario(scenario);

        let context = SimContext::shared(self.seed);
        let fleet = Fleet::new(context.rng(FLEET_STREAM), setup.fleet.clone());
        let route_id = fleet.route_id().to_string();

        let feed = Arc::new(SimFeed::new(Arc::clone(&context), fleet));
        feed.set_latency(setup.latency);
        feed.set_failure_rate(setup.failure_rate);
        feed.fail_next(setup.forced_failures);

        let config = TrackerConfig::default()
            .with_route(route_id)
            .with_poll_period(self.poll_period);
        let mut tracker = RouteTracker::new(Arc::clone(&context), Arc::clone(&feed), MemorySink::new(), config)?;

        tracker.start();

        // Sample just after each cycle lands
        let settle = setup.latency + Duration::from_secs(1);
        context.sleep(settle).await;

        // Tracker setup above already rejected a zero period
        let sample_count = (self.duration.as_nanos() / self.poll_period.as_nanos()) as u64;
        let mut violations: Vec<String> = Vec::new();
        let mut metrics = ScenarioMetrics::default();
        let mut previous_stats = TrackerStats::default();

        for sample in 0..sample_count {
            let mut events = Vec::new();

            if setup.reroute && sample == sample_count / 2 {
                self.reroute(&tracker, &feed, &mut violations).await;
                events.push(SimEvent::info("route detour installed"));
            }

            let stats = tracker.stats().await;
            events.extend(stat_events(&previous_stats, &stats));
            previous_stats = stats;

            self.check_display(&tracker, &feed, &mut violations).await;
            let frame = self.frame(&context, &tracker, &feed, events).await;
            metrics.max_displayed = metrics.max_displayed.max(frame.displayed.len());
            export.add_frame(frame);

            if let Some(geometry) = tracker.route_geometry().await {
                export.set_route(&geometry);
            }

            context.sleep(self.poll_period).await;
        }

        // Let cycles already in flight land, then check once more
        tracker.stop();
        context.sleep(settle).await;
        self.check_display(&tracker, &feed, &mut violations).await;

        let stats = tracker.stats().await;
        let feed_stats = feed.stats();
        let sink = tracker.sink();
        let (final_displayed, peak_route_layers) = {
            let sink = sink.lock().await;
            (sink.marker_count(), sink.peak_route_layers())
        };

        metrics.vehicle_fetches = feed_stats.vehicle_fetches;
        metrics.cycles_applied = stats.cycles_applied;
        metrics.cycles_skipped = stats.cycles_skipped;
        metrics.fetch_failures = stats.fetch_failures;
        metrics.records_dropped = stats.records_dropped;
        metrics.markers_created = stats.created;
        metrics.markers_moved = stats.moved;
        metrics.markers_removed = stats.removed;
        metrics.route_refreshes = stats.route_refreshes;
        metrics.peak_in_flight = feed_stats.peak_in_flight;
        metrics.peak_route_layers = peak_route_layers;

        violations.extend(scenario_assertions(scenario, &setup, &metrics));

        let passed = violations.is_empty();
        if !passed {
            for violation in &violations {
                warn!("  {}: {}", scenario.name(), violation);
            }
        }

        Ok(ScenarioResult {
            scenario,
            seed: self.seed,
            passed,
            samples: sample_count,
            final_time_secs: context.now().as_secs_f64(),
            final_displayed,
            failure_reason: violations.first().cloned(),
            metrics,
        })
    }

    /// Detours the fleet and refreshes the tracker's route.
    async fn reroute(&self, tracker: &SimTracker, feed: &SimFeed, violations: &mut Vec<String>) {
        let expected = {
            let fleet = feed.fleet();
            let mut fleet = fleet.lock().await;
            fleet.reroute();
            RouteGeometry::from_stops(fleet.stops())
        };

        if let Err(e) = tracker.refresh_route().await {
            violations.push(format!("route refresh failed: {}", e));
            return;
        }

        let sink = tracker.sink();
        let sink = sink.lock().await;
        if sink.current_route() != Some(&expected) {
            violations.push("displayed route does not match the detour".to_string());
        }
        debug!("Route detour: {} stops, {:.0} m", expected.len(), expected.length_meters());
    }

    /// Cross-checks display table, sink and the last served snapshot.
    async fn check_display(&self, tracker: &SimTracker, feed: &SimFeed, violations: &mut Vec<String>) {
        let table = tracker.display_table().await;
        let table_ids: BTreeSet<VehicleId> = table.ids().cloned().collect();

        {
            let sink = tracker.sink();
            let sink = sink.lock().await;

            if sink.marker_ids() != table_ids {
                violations.push(format!(
                    "sink shows {} markers, table has {}",
                    sink.marker_count(),
                    table_ids.len()
                ));
            }
            for entity in table.iter() {
                if sink.marker_position(&entity.id) != Some(entity.position) {
                    violations.push(format!("marker {} is not where the table says", entity.id));
                }
            }
            if sink.unknown_handle_calls() > 0 {
                violations.push(format!("{} sink calls used unknown handles", sink.unknown_handle_calls()));
            }
            if sink.peak_route_layers() > 1 {
                violations.push(format!("{} route layers shown at once", sink.peak_route_layers()));
            }
        }

        // The display must equal the last snapshot the tracker received
        let Some(records) = feed.last_served().await else {
            return;
        };
        let expected: BTreeMap<VehicleId, Position> = match parse_batch(&records, parse_vehicle, MalformedPolicy::Drop) {
            Ok(batch) => batch.items.into_iter().map(|e| (e.id, e.position)).collect(),
            Err(e) => {
                violations.push(format!("served snapshot unparseable: {}", e));
                return;
            }
        };
        let shown: BTreeMap<VehicleId, Position> = table.iter().map(|e| (e.id.clone(), e.position)).collect();
        if shown != expected {
            violations.push(format!(
                "display ({} vehicles) diverged from last snapshot ({} vehicles)",
                shown.len(),
                expected.len()
            ));
        }
    }

    async fn frame(&self, context: &SimContext, tracker: &SimTracker, feed: &SimFeed, events: Vec<SimEvent>) -> SimFrame {
        let ground_truth = {
            let fleet = feed.fleet();
            let mut fleet = fleet.lock().await;
            fleet.advance_to(context.now());
            fleet
                .ground_truth()
                .iter()
                .map(|(id, position)| VehicleFix::new(id, *position))
                .collect()
        };

        SimFrame {
            time_sec: context.now().as_secs_f64(),
            ground_truth,
            displayed: VehicleFix::from_table(&tracker.display_table().await),
            events,
        }
    }
}

/// Frame events derived from counter changes between two samples.
fn stat_events(before: &TrackerStats, after: &TrackerStats) -> Vec<SimEvent> {
    let mut events = Vec::new();
    if after.fetch_failures > before.fetch_failures {
        events.push(SimEvent::warn(format!(
            "{} fetch(es) failed, display held",
            after.fetch_failures - before.fetch_failures
        )));
    }
    if after.cycles_skipped > before.cycles_skipped {
        events.push(SimEvent::info(format!(
            "{} tick(s) skipped while a cycle was in flight",
            after.cycles_skipped - before.cycles_skipped
        )));
    }
    if after.records_dropped > before.records_dropped {
        events.push(SimEvent::warn(format!(
            "{} malformed record(s) dropped",
            after.records_dropped - before.records_dropped
        )));
    }
    events
}

/// Scenario-specific expectations on the final metrics.
fn scenario_assertions(scenario: ScenarioId, setup: &ScenarioSetup, m: &ScenarioMetrics) -> Vec<String> {
    let mut failures = Vec::new();
    let mut expect = |ok: bool, message: String| {
        if !ok {
            failures.push(message);
        }
    };

    expect(m.cycles_applied > 0, "no cycle was ever applied".to_string());
    expect(
        m.peak_route_layers <= 1,
        format!("{} route layers at once", m.peak_route_layers),
    );

    match scenario {
        ScenarioId::SteadyState => {
            let size = setup.fleet.size as u64;
            expect(m.fetch_failures == 0, format!("{} unexpected fetch failures", m.fetch_failures));
            expect(m.markers_created == size, format!("created {} markers for {} buses", m.markers_created, size));
            expect(m.markers_removed == 0, format!("removed {} markers from a fixed roster", m.markers_removed));
            expect(
                m.markers_moved == m.cycles_applied.saturating_sub(1) * size,
                format!("moved {} markers over {} cycles", m.markers_moved, m.cycles_applied),
            );
        }
        ScenarioId::FleetChurn => {
            expect(m.markers_removed > 0, "churn removed no markers".to_string());
            expect(
                m.markers_created > setup.fleet.size as u64,
                format!("only {} markers created despite churn", m.markers_created),
            );
        }
        ScenarioId::FlakyFeed => {
            expect(
                m.fetch_failures >= setup.forced_failures as u64,
                format!("{} fetch failures, at least {} forced", m.fetch_failures, setup.forced_failures),
            );
        }
        ScenarioId::SlowFeed => {
            expect(m.cycles_skipped > 0, "no tick was skipped".to_string());
            expect(m.peak_in_flight == 1, format!("{} fetches overlapped", m.peak_in_flight));
        }
        ScenarioId::MalformedRecords => {
            expect(m.records_dropped > 0, "no malformed record was dropped".to_string());
        }
        ScenarioId::RouteRefresh => {
            expect(m.route_refreshes == 2, format!("{} route refreshes, expected 2", m.route_refreshes));
        }
    }

    failures
}
