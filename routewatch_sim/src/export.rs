//! JSON trace export.
//!
//! Writes per-sample frames (ground truth vs displayed markers) so a run can
//! be replayed or plotted outside the harness.

use routewatch_core::{DisplayTable, Position, RouteGeometry, VehicleId};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Write;
use std::path::Path;

/// A single frame of simulation data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimFrame {
    /// Simulation time in seconds
    pub time_sec: f64,

    /// Where the fleet really is
    pub ground_truth: Vec<VehicleFix>,

    /// What the display shows
    pub displayed: Vec<VehicleFix>,

    /// Events since the previous frame (outages, skipped ticks, reroutes)
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub events: Vec<SimEvent>,
}

/// Position of one vehicle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VehicleFix {
    pub id: String,
    pub longitude: f64,
    pub latitude: f64,
}

impl VehicleFix {
    pub fn new(id: &VehicleId, position: Position) -> Self {
        Self {
            id: id.to_string(),
            longitude: position.longitude,
            latitude: position.latitude,
        }
    }

    /// Fixes for every entry of a display table, in id order.
    pub fn from_table(table: &DisplayTable) -> Vec<Self> {
        table.iter().map(|e| Self::new(&e.id, e.position)).collect()
    }
}

/// Simulation event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimEvent {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
}

impl SimEvent {
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            level: None,
        }
    }

    pub fn warn(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            level: Some("warn".to_string()),
        }
    }
}

/// Complete simulation export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimExport {
    /// Scenario name
    pub scenario: String,

    /// Seed used
    pub seed: u64,

    /// Duration in seconds
    pub duration_sec: f64,

    /// Latest installed route as a GeoJSON feature
    #[serde(skip_serializing_if = "Option::is_none")]
    pub route: Option<serde_json::Value>,

    /// All frames
    pub frames: Vec<SimFrame>,

    /// Final results
    pub passed: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

impl SimExport {
    /// Creates a new export container.
    pub fn new(scenario: &str, seed: u64) -> Self {
        Self {
            scenario: scenario.to_string(),
            seed,
            duration_sec: 0.0,
            route: None,
            frames: Vec::new(),
            passed: false,
            failure_reason: None,
        }
    }

    /// Records the route geometry currently on display.
    pub fn set_route(&mut self, geometry: &RouteGeometry) {
        self.route = Some(geometry.to_geojson());
    }

    /// Adds a frame.
    pub fn add_frame(&mut self, frame: SimFrame) {
        self.duration_sec = frame.time_sec;
        self.frames.push(frame);
    }

    /// Finalizes the export.
    pub fn finalize(&mut self, passed: bool, failure_reason: Option<String>) {
        self.passed = passed;
        self.failure_reason = failure_reason;
    }

    /// Writes to a JSON file.
    pub fn write_to_file(&self, path: impl AsRef<Path>) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        let mut file = File::create(path)?;
        file.write_all(json.as_bytes())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use routewatch_core::{DisplayedEntity, MarkerHandle};

    #[test]
    fn test_export_tracks_duration_and_result() {
        let mut export = SimExport::new("steady_state", 42);
        export.add_frame(SimFrame {
            time_sec: 26.0,
            ground_truth: vec![],
            displayed: vec![],
            events: vec![],
        });
        export.add_frame(SimFrame {
            time_sec: 51.0,
            ground_truth: vec![],
            displayed: vec![],
            events: vec![SimEvent::warn("fetch failed")],
        });
        export.finalize(false, Some("boom".into()));

        assert_eq!(export.duration_sec, 51.0);
        assert_eq!(export.frames.len(), 2);
        assert!(!export.passed);
    }

    #[test]
    fn test_from_table_in_id_order() {
        let table: DisplayTable = ["b", "a"]
            .iter()
            .enumerate()
            .map(|(i, id)| DisplayedEntity {
                id: VehicleId::new(*id),
                handle: MarkerHandle(uuid_from(i as u128)),
                position: Position::new(-71.0, 42.0),
            })
            .collect();

        let fixes = VehicleFix::from_table(&table);
        assert_eq!(fixes[0].id, "a");
        assert_eq!(fixes[1].id, "b");
    }

    #[test]
    fn test_write_and_read_back() {
        let mut export = SimExport::new("route_refresh", 7);
        export.set_route(&RouteGeometry::from_positions(vec![
            Position::new(-71.05, 42.35),
            Position::new(-71.04, 42.34),
        ]));

        let path = std::env::temp_dir().join(format!("routewatch-export-{}.json", std::process::id()));
        export.write_to_file(&path).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        std::fs::remove_file(&path).ok();

        let loaded: SimExport = serde_json::from_str(&text).unwrap();
        assert_eq!(loaded.scenario, "route_refresh");
        assert_eq!(loaded.seed, 7);
        assert_eq!(loaded.route.unwrap()["geometry"]["type"], "LineString");
    }

    fn uuid_from(n: u128) -> uuid::Uuid {
        uuid::Uuid::from_u128(n)
    }
}
