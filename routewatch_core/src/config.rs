//! Tracker configuration.
//!
//! Everything here is externally supplied (JSON file, CLI flags); the
//! reconciliation core only reads it.

use crate::entity::MalformedPolicy;
use crate::error::TrackerError;
use routewatch_env::{RouteId, MBTA_API_BASE};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// What happens when a tick fires while the previous cycle is still fetching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverlapPolicy {
    /// Skip the tick; at most one cycle is in flight
    #[default]
    SkipIfBusy,
    /// Let cycles overlap; each one reconciles atomically once its fetch lands
    Concurrent,
}

/// Vehicle marker styling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MarkerStyle {
    pub color: String,
}

impl Default for MarkerStyle {
    fn default() -> Self {
        Self {
            color: "#E13A05".to_string(),
        }
    }
}

/// Route polyline styling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouteStyle {
    pub color: String,
    pub width: f64,
    pub opacity: f64,
    pub blur: f64,
    pub line_join: String,
    pub line_cap: String,
}

impl Default for RouteStyle {
    fn default() -> Self {
        Self {
            color: "#BB3A1E".to_string(),
            width: 5.0,
            opacity: 0.75,
            blur: 2.0,
            line_join: "bevel".to_string(),
            line_cap: "square".to_string(),
        }
    }
}

/// Configuration for a route tracker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Route whose vehicles and stops are tracked (default: "7")
    pub route_id: String,

    /// Poll period in seconds, trigger to trigger (default: 25)
    pub poll_period_secs: f64,

    /// Root of the transit API (default: MBTA v3)
    pub api_base_url: String,

    /// Per-request timeout in seconds (default: 30)
    pub request_timeout_secs: f64,

    /// Behaviour when polls overlap (default: skip if busy)
    pub overlap_policy: OverlapPolicy,

    /// Behaviour on malformed vehicle records (default: drop)
    pub malformed_policy: MalformedPolicy,

    pub marker_style: MarkerStyle,

    pub route_style: RouteStyle,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            route_id: "7".to_string(),
            poll_period_secs: 25.0,
            api_base_url: MBTA_API_BASE.to_string(),
            request_timeout_secs: 30.0,
            overlap_policy: OverlapPolicy::SkipIfBusy,
            malformed_policy: MalformedPolicy::Drop,
            marker_style: MarkerStyle::default(),
            route_style: RouteStyle::default(),
        }
    }
}

impl TrackerConfig {
    /// Loads a config from a JSON file; missing keys take their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, TrackerError> {
        let text = std::fs::read_to_string(path)?;
        let config: TrackerConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects values the scheduler cannot run with.
    pub fn validate(&self) -> Result<(), TrackerError> {
        if self.route_id.trim().is_empty() {
            return Err(TrackerError::Config("route_id must not be empty".into()));
        }
        self.poll_period()?;
        self.request_timeout()?;
        Ok(())
    }

    /// Sets the route.
    pub fn with_route(mut self, route_id: impl Into<String>) -> Self {
        self.route_id = route_id.into();
        self
    }

    /// Sets the poll period.
    pub fn with_poll_period(mut self, period: Duration) -> Self {
        self.poll_period_secs = period.as_secs_f64();
        self
    }

    /// Sets the overlap policy.
    pub fn with_overlap_policy(mut self, policy: OverlapPolicy) -> Self {
        self.overlap_policy = policy;
        self
    }

    /// Sets the malformed-record policy.
    pub fn with_malformed_policy(mut self, policy: MalformedPolicy) -> Self {
        self.malformed_policy = policy;
        self
    }

    /// Poll period as a `Duration`.
    pub fn poll_period(&self) -> Result<Duration, TrackerError> {
        positive_duration("poll_period_secs", self.poll_period_secs)
    }

    /// Request timeout as a `Duration`.
    pub fn request_timeout(&self) -> Result<Duration, TrackerError> {
        positive_duration("request_timeout_secs", self.request_timeout_secs)
    }

    /// Route as the env-layer identifier.
    pub fn route(&self) -> RouteId {
        RouteId::new(self.route_id.clone())
    }
}

/// Converts seconds to a non-zero `Duration`. Rejects NaN, infinities,
/// values past `Duration::MAX` and values that round down to zero.
pub fn positive_duration(name: &str, secs: f64) -> Result<Duration, TrackerError> {
    match Duration::try_from_secs_f64(secs) {
        Ok(duration) if !duration.is_zero() => Ok(duration),
        _ => Err(TrackerError::Config(format!("{} must be a positive duration, got {}", name, secs))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracker_config_default() {
        let config = TrackerConfig::default();
        assert_eq!(config.route_id, "7");
        assert_eq!(config.poll_period().unwrap(), Duration::from_secs(25));
        assert_eq!(config.overlap_policy, OverlapPolicy::SkipIfBusy);
        assert_eq!(config.malformed_policy, MalformedPolicy::Drop);
        assert_eq!(config.marker_style.color, "#E13A05");
        assert_eq!(config.route_style.line_join, "bevel");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_takes_defaults() {
        let config: TrackerConfig = serde_json::from_str(
            r#"{ "route_id": "39", "overlap_policy": "concurrent", "route_style": { "width": 3.0 } }"#,
        )
        .unwrap();

        assert_eq!(config.route_id, "39");
        assert_eq!(config.overlap_policy, OverlapPolicy::Concurrent);
        assert_eq!(config.route_style.width, 3.0);
        assert_eq!(config.route_style.color, "#BB3A1E");
        assert_eq!(config.poll_period_secs, 25.0);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        assert!(TrackerConfig::default().with_route("  ").validate().is_err());

        let zero = TrackerConfig {
            poll_period_secs: 0.0,
            ..Default::default()
        };
        assert!(matches!(zero.validate(), Err(TrackerError::Config(_))));

        let nan = TrackerConfig {
            request_timeout_secs: f64::NAN,
            ..Default::default()
        };
        assert!(nan.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_unrepresentable_durations() {
        let huge = TrackerConfig {
            poll_period_secs: 1e30,
            ..Default::default()
        };
        assert!(matches!(huge.validate(), Err(TrackerError::Config(_))));
        assert!(huge.poll_period().is_err());

        let tiny = TrackerConfig {
            poll_period_secs: 1e-12,
            ..Default::default()
        };
        assert!(matches!(tiny.validate(), Err(TrackerError::Config(_))));

        let infinite = TrackerConfig {
            request_timeout_secs: f64::INFINITY,
            ..Default::default()
        };
        assert!(infinite.request_timeout().is_err());
    }

    #[test]
    fn test_huge_period_in_file_is_config_error() {
        let path = std::env::temp_dir().join(format!("routewatch-config-{}.json", uuid::Uuid::new_v4()));
        std::fs::write(&path, r#"{"poll_period_secs": 1e30}"#).unwrap();

        let loaded = TrackerConfig::from_json_file(&path);
        std::fs::remove_file(&path).ok();
        assert!(matches!(loaded, Err(TrackerError::Config(_))));
    }

    #[test]
    fn test_positive_duration_accepts_fractions() {
        assert_eq!(positive_duration("x", 0.5).unwrap(), Duration::from_millis(500));
        assert!(positive_duration("x", -1.0).is_err());
        assert!(positive_duration("x", 0.0).is_err());
    }

    #[test]
    fn test_from_json_file_round_trip() {
        let path = std::env::temp_dir().join(format!("routewatch-config-{}.json", uuid::Uuid::new_v4()));
        let config = TrackerConfig::default()
            .with_route("111")
            .with_poll_period(Duration::from_secs(10));
        std::fs::write(&path, serde_json::to_string(&config).unwrap()).unwrap();

        let loaded = TrackerConfig::from_json_file(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_from_json_file_missing_is_io_error() {
        let result = TrackerConfig::from_json_file("/nonexistent/routewatch.json");
        assert!(matches!(result, Err(TrackerError::Io(_))));
    }
}
