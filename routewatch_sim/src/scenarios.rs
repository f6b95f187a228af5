//! Fault scenarios for simulation runs.

use serde::Serialize;

/// Scenario identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioId {
    /// Fixed roster, healthy feed
    SteadyState,

    /// Vehicles leave and enter service throughout the run
    FleetChurn,

    /// Feed outages, forced at startup and random afterwards
    FlakyFeed,

    /// Fetches slower than the poll period
    SlowFeed,

    /// Some vehicle records arrive without a latitude
    MalformedRecords,

    /// Route detours mid-run and is refreshed
    RouteRefresh,
}

impl ScenarioId {
    /// Returns a list of all scenarios.
    pub fn all() -> Vec<ScenarioId> {
        vec![
            ScenarioId::SteadyState,
            ScenarioId::FleetChurn,
            ScenarioId::FlakyFeed,
            ScenarioId::SlowFeed,
            ScenarioId::MalformedRecords,
            ScenarioId::RouteRefresh,
        ]
    }

    /// Returns the scenario name.
    pub fn name(&self) -> &'static str {
        match self {
            ScenarioId::SteadyState => "steady_state",
            ScenarioId::FleetChurn => "fleet_churn",
            ScenarioId::FlakyFeed => "flaky_feed",
            ScenarioId::SlowFeed => "slow_feed",
            ScenarioId::MalformedRecords => "malformed_records",
            ScenarioId::RouteRefresh => "route_refresh",
        }
    }

    /// Returns a description of the scenario.
    pub fn description(&self) -> &'static str {
        match self {
            ScenarioId::SteadyState => "8 buses, no faults: created once, moved every poll, never removed",
            ScenarioId::FleetChurn => "Buses leave and join service: removed markers never come back without a create",
            ScenarioId::FlakyFeed => "30% fetch failures: display holds its last good state",
            ScenarioId::SlowFeed => "40s fetches on a 25s period: overlapping ticks are skipped",
            ScenarioId::MalformedRecords => "15% records missing latitude: dropped, rest of the snapshot applied",
            ScenarioId::RouteRefresh => "Mid-run detour: old route layer replaced, never two at once",
        }
    }
}

impl std::fmt::Display for ScenarioId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for ScenarioId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "steady_state" | "steady" => Ok(ScenarioId::SteadyState),
            "fleet_churn" | "churn" => Ok(ScenarioId::FleetChurn),
            "flaky_feed" | "flaky" => Ok(ScenarioId::FlakyFeed),
            "slow_feed" | "slow" => Ok(ScenarioId::SlowFeed),
            "malformed_records" | "malformed" => Ok(ScenarioId::MalformedRecords),
            "route_refresh" | "reroute" => Ok(ScenarioId::RouteRefresh),
            _ => Err(format!("Unknown scenario: {}", s)),
        }
    }
}
