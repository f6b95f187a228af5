//! Ground truth fleet for simulation.
//!
//! The Fleet maintains the "God's eye view" of one bus route:
//! - The stop sequence the route follows
//! - True positions of every vehicle in service
//! - Feed record generation (with GPS noise and optional corruption)

use rand::Rng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};
use routewatch_core::{Position, RouteStop, VehicleId};
use routewatch_env::RawRecord;
use serde_json::json;
use std::collections::BTreeMap;
use std::time::Duration;

/// Where generated routes start (South Boston waterfront).
pub const ROUTE_ORIGIN: Position = Position {
    longitude: -71.0464,
    latitude: 42.3453,
};

const METERS_PER_DEGREE: f64 = 111_320.0;

const STREETS: [&str; 8] = [
    "Summer St",
    "E Broadway",
    "Congress St",
    "Seaport Blvd",
    "D St",
    "Dorchester Ave",
    "L St",
    "Farragut Rd",
];

/// Fleet parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct FleetConfig {
    /// Route the fleet serves
    pub route_id: String,

    /// Vehicles the fleet tries to keep in service
    pub size: usize,

    /// Stops on the generated route
    pub stop_count: usize,

    /// Per-vehicle probability of leaving service in any given second
    pub churn_rate: f64,

    /// Probability that an emitted record is missing its latitude
    pub malformed_rate: f64,

    /// GPS noise standard deviation (meters)
    pub gps_noise_m: f64,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            route_id: "7".to_string(),
            size: 8,
            stop_count: 14,
            churn_rate: 0.0,
            malformed_rate: 0.0,
            gps_noise_m: 5.0,
        }
    }
}

impl FleetConfig {
    pub fn with_size(mut self, size: usize) -> Self {
        self.size = size;
        self
    }

    pub fn with_churn_rate(mut self, rate: f64) -> Self {
        self.churn_rate = rate.clamp(0.0, 1.0);
        self
    }

    pub fn with_malformed_rate(mut self, rate: f64) -> Self {
        self.malformed_rate = rate.clamp(0.0, 1.0);
        self
    }
}

/// A vehicle in service.
#[derive(Debug, Clone, PartialEq)]
pub struct SimVehicle {
    pub id: VehicleId,

    /// Distance travelled along the route (meters, wraps at the terminus)
    pub distance_m: f64,

    /// Cruising speed in m/s
    pub speed_mps: f64,
}

/// The Fleet - maintains ground truth and generates feed records.
pub struct Fleet {
    config: FleetConfig,

    /// RNG for movement, churn and record noise
    rng: ChaCha8Rng,

    stops: Vec<RouteStop>,

    /// Cumulative distance to each stop (meters); same length as `stops`
    cumulative_m: Vec<f64>,

    vehicles: BTreeMap<VehicleId, SimVehicle>,

    next_label: u32,

    /// Whole seconds simulated so far
    time_secs: u64,

    /// Times the route has been regenerated
    revision: u32,
}

impl Fleet {
    /// Creates a fleet with a freshly generated route and a full roster.
    pub fn new(rng: ChaCha8Rng, config: FleetConfig) -> Self {
        let mut fleet = Self {
            config,
            rng,
            stops: Vec::new(),
            cumulative_m: Vec::new(),
            vehicles: BTreeMap::new(),
            next_label: 0,
            time_secs: 0,
            revision: 0,
        };
        fleet.generate_route();
        while fleet.vehicles.len() < fleet.config.size {
            fleet.spawn_vehicle();
        }
        fleet
    }

    /// Replaces the route with a new stop sequence (a detour).
    ///
    /// Vehicles keep their distance along the route.
    pub fn reroute(&mut self) {
        self.revision += 1;
        self.generate_route();
    }

    fn generate_route(&mut self) {
        let count = self.config.stop_count.max(2);
        let mut heading: f64 = self.rng.gen_range(0.0..std::f64::consts::TAU);
        let mut position = ROUTE_ORIGIN;

        self.stops.clear();
        for i in 0..count {
            if i > 0 {
                let step_m: f64 = self.rng.gen_range(250.0..450.0);
                heading += self.rng.gen_range(-0.5..0.5);
                position = offset(position, step_m * heading.cos(), step_m * heading.sin());
            }
            self.stops.push(RouteStop {
                name: format!("{} @ Stop {}", STREETS[(i + self.revision as usize) % STREETS.len()], i + 1),
                position,
            });
        }

        let mut total = 0.0;
        self.cumulative_m = Vec::with_capacity(count);
        self.cumulative_m.push(0.0);
        for pair in self.stops.windows(2) {
            total += distance_m(pair[0].position, pair[1].position);
            self.cumulative_m.push(total);
        }
    }

    fn spawn_vehicle(&mut self) {
        let id = VehicleId::new(format!("y{}", 1000 + self.next_label));
        self.next_label += 1;

        let vehicle = SimVehicle {
            id: id.clone(),
            distance_m: self.rng.gen_range(0.0..self.route_length_m().max(1.0)),
            speed_mps: self.rng.gen_range(4.0..9.0),
        };
        self.vehicles.insert(id, vehicle);
    }

    /// Advances the fleet by one second.
    fn step_second(&mut self) {
        self.time_secs += 1;

        for vehicle in self.vehicles.values_mut() {
            vehicle.distance_m += vehicle.speed_mps;
        }

        if self.config.churn_rate > 0.0 {
            let rate = self.config.churn_rate;
            let rng = &mut self.rng;
            let leaving: Vec<VehicleId> = self
                .vehicles
                .keys()
                .filter(|_| rng.gen::<f64>() < rate)
                .cloned()
                .collect();
            for id in leaving {
                self.vehicles.remove(&id);
            }

            // Replacements trickle in rather than appearing at once
            if self.vehicles.len() < self.config.size && self.rng.gen_bool(0.1) {
                self.spawn_vehicle();
            }
        }
    }

    /// Simulates whole seconds until the fleet clock reaches `now`.
    pub fn advance_to(&mut self, now: Duration) {
        while self.time_secs < now.as_secs() {
            self.step_second();
        }
    }

    /// Exact position at a distance along the route.
    pub fn position_at(&self, distance_m: f64) -> Position {
        let length = self.route_length_m();
        if length <= 0.0 {
            return self.stops.first().map(|s| s.position).unwrap_or(ROUTE_ORIGIN);
        }

        let d = distance_m.rem_euclid(length);
        let segment = self
            .cumulative_m
            .windows(2)
            .position(|w| d < w[1])
            .unwrap_or(self.cumulative_m.len().saturating_sub(2));

        let start = self.cumulative_m[segment];
        let span = self.cumulative_m[segment + 1] - start;
        let t = if span > 0.0 { (d - start) / span } else { 0.0 };

        let a = self.stops[segment].position;
        let b = self.stops[segment + 1].position;
        Position::new(
            a.longitude + (b.longitude - a.longitude) * t,
            a.latitude + (b.latitude - a.latitude) * t,
        )
    }

    /// Emits one MBTA-shaped vehicle record per vehicle in service.
    pub fn vehicle_records(&mut self) -> Vec<RawRecord> {
        let noise = Normal::new(0.0, self.config.gps_noise_m.max(0.0)).ok();
        let positions: Vec<(VehicleId, Position)> = self
            .vehicles
            .values()
            .map(|v| (v.id.clone(), self.position_at(v.distance_m)))
            .collect();

        positions
            .into_iter()
            .map(|(id, exact)| {
                let (east, north) = match &noise {
                    Some(normal) => (normal.sample(&mut self.rng), normal.sample(&mut self.rng)),
                    None => (0.0, 0.0),
                };
                let observed = offset(exact, east, north);
                let malformed = self.rng.gen::<f64>() < self.config.malformed_rate;

                let mut attributes = json!({
                    "label": id.as_str().trim_start_matches('y'),
                    "longitude": observed.longitude,
                    "current_status": "IN_TRANSIT_TO",
                });
                if !malformed {
                    attributes["latitude"] = json!(observed.latitude);
                }

                RawRecord::new(json!({
                    "id": id.as_str(),
                    "type": "vehicle",
                    "attributes": attributes,
                    "relationships": {
                        "route": { "data": { "type": "route", "id": self.config.route_id } }
                    }
                }))
            })
            .collect()
    }

    /// Emits the route's stop records in path order.
    pub fn stop_records(&self) -> Vec<RawRecord> {
        self.stops
            .iter()
            .enumerate()
            .map(|(i, stop)| {
                RawRecord::new(json!({
                    "id": format!("place-{}-{}", self.revision, i),
                    "type": "stop",
                    "attributes": {
                        "name": stop.name,
                        "longitude": stop.position.longitude,
                        "latitude": stop.position.latitude,
                    }
                }))
            })
            .collect()
    }

    /// Exact positions of every vehicle in service, ordered by id.
    pub fn ground_truth(&self) -> Vec<(VehicleId, Position)> {
        self.vehicles
            .values()
            .map(|v| (v.id.clone(), self.position_at(v.distance_m)))
            .collect()
    }

    pub fn route_id(&self) -> &str {
        &self.config.route_id
    }

    pub fn stops(&self) -> &[RouteStop] {
        &self.stops
    }

    /// Route length stop to stop (meters).
    pub fn route_length_m(&self) -> f64 {
        self.cumulative_m.last().copied().unwrap_or(0.0)
    }

    pub fn vehicle_count(&self) -> usize {
        self.vehicles.len()
    }

    /// Seconds simulated so far.
    pub fn time(&self) -> u64 {
        self.time_secs
    }

    pub fn config(&self) -> &FleetConfig {
        &self.config
    }
}

/// Moves a position by local east/north offsets in meters.
fn offset(from: Position, east_m: f64, north_m: f64) -> Position {
    let lat_scale = METERS_PER_DEGREE;
    let lon_scale = METERS_PER_DEGREE * from.latitude.to_radians().cos();
    Position::new(from.longitude + east_m / lon_scale, from.latitude + north_m / lat_scale)
}

/// Equirectangular distance; accurate enough at stop spacing.
fn distance_m(a: Position, b: Position) -> f64 {
    let mean_lat = ((a.latitude + b.latitude) / 2.0).to_radians();
    let dx = (b.longitude - a.longitude) * METERS_PER_DEGREE * mean_lat.cos();
    let dy = (b.latitude - a.latitude) * METERS_PER_DEGREE;
    (dx * dx + dy * dy).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use routewatch_core::{parse_batch, parse_stop, parse_vehicle, MalformedPolicy, RouteGeometry};

    fn fleet(config: FleetConfig) -> Fleet {
        Fleet::new(ChaCha8Rng::seed_from_u64(42), config)
    }

    #[test]
    fn test_fleet_starts_full() {
        let fleet = fleet(FleetConfig::default().with_size(5));
        assert_eq!(fleet.vehicle_count(), 5);
        assert_eq!(fleet.stops().len(), 14);
        assert!(fleet.route_length_m() > 14.0 * 200.0);
    }

    #[test]
    fn test_route_starts_at_origin_and_stays_local() {
        let fleet = fleet(FleetConfig::default());
        assert_eq!(fleet.stops()[0].position, ROUTE_ORIGIN);
        for stop in fleet.stops() {
            assert!((stop.position.longitude - ROUTE_ORIGIN.longitude).abs() < 0.1);
            assert!((stop.position.latitude - ROUTE_ORIGIN.latitude).abs() < 0.1);
        }
    }

    #[test]
    fn test_position_at_interpolates_and_wraps() {
        let fleet = fleet(FleetConfig::default());
        let length = fleet.route_length_m();

        assert_eq!(fleet.position_at(0.0), fleet.stops()[0].position);
        assert_eq!(fleet.position_at(length), fleet.stops()[0].position);

        let second = fleet.cumulative_m[1];
        let p = fleet.position_at(second);
        assert!((p.longitude - fleet.stops()[1].position.longitude).abs() < 1e-9);
    }

    #[test]
    fn test_steady_fleet_keeps_roster() {
        let mut fleet = fleet(FleetConfig::default());
        let before: Vec<VehicleId> = fleet.ground_truth().into_iter().map(|(id, _)| id).collect();

        fleet.advance_to(Duration::from_secs(600));
        let after: Vec<VehicleId> = fleet.ground_truth().into_iter().map(|(id, _)| id).collect();

        assert_eq!(fleet.time(), 600);
        assert_eq!(before, after);
    }

    #[test]
    fn test_churn_replaces_vehicles() {
        let mut fleet = fleet(FleetConfig::default().with_churn_rate(0.02));
        let before: Vec<VehicleId> = fleet.ground_truth().into_iter().map(|(id, _)| id).collect();

        fleet.advance_to(Duration::from_secs(600));
        let after: Vec<VehicleId> = fleet.ground_truth().into_iter().map(|(id, _)| id).collect();

        assert_ne!(before, after);
        assert!(fleet.next_label as usize > fleet.config().size);
    }

    #[test]
    fn test_vehicle_records_parse() {
        let mut fleet = fleet(FleetConfig::default());
        let records = fleet.vehicle_records();

        let batch = parse_batch(&records, parse_vehicle, MalformedPolicy::Abort).unwrap();
        assert_eq!(batch.items.len(), 8);
        assert!(batch.dropped.is_empty());
    }

    #[test]
    fn test_malformed_records_miss_latitude() {
        let mut fleet = fleet(FleetConfig::default().with_size(50).with_malformed_rate(0.5));
        let records = fleet.vehicle_records();

        let batch = parse_batch(&records, parse_vehicle, MalformedPolicy::Drop).unwrap();
        assert!(!batch.dropped.is_empty());
        assert!(!batch.items.is_empty());
        assert_eq!(batch.items.len() + batch.dropped.len(), 50);
    }

    #[test]
    fn test_stop_records_preserve_order() {
        let fleet = fleet(FleetConfig::default());
        let batch = parse_batch(&fleet.stop_records(), parse_stop, MalformedPolicy::Abort).unwrap();

        let geometry = RouteGeometry::from_stops(&batch.items);
        let expected: Vec<Position> = fleet.stops().iter().map(|s| s.position).collect();
        assert_eq!(geometry.positions(), expected.as_slice());
    }

    #[test]
    fn test_reroute_changes_geometry() {
        let mut fleet = fleet(FleetConfig::default());
        let before = fleet.stops().to_vec();

        fleet.reroute();
        assert_ne!(fleet.stops(), before.as_slice());
        assert_eq!(fleet.stops()[0].position, ROUTE_ORIGIN);
    }

    #[test]
    fn test_fleet_deterministic() {
        let mut a = fleet(FleetConfig::default().with_churn_rate(0.01));
        let mut b = fleet(FleetConfig::default().with_churn_rate(0.01));

        a.advance_to(Duration::from_secs(300));
        b.advance_to(Duration::from_secs(300));

        assert_eq!(a.ground_truth(), b.ground_truth());
        assert_eq!(a.vehicle_records(), b.vehicle_records());
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn prop_positions_stay_on_route_bounds(seed in any::<u64>(), distance in 0.0f64..100_000.0) {
                let fleet = Fleet::new(ChaCha8Rng::seed_from_u64(seed), FleetConfig::default());
                let p = fleet.position_at(distance);

                let (min_lon, max_lon) = fleet.stops().iter().fold((f64::MAX, f64::MIN), |(lo, hi), s| {
                    (lo.min(s.position.longitude), hi.max(s.position.longitude))
                });
                prop_assert!(p.longitude >= min_lon - 1e-9 && p.longitude <= max_lon + 1e-9);
            }

            #[test]
            fn prop_clean_records_always_parse(seed in any::<u64>(), size in 0usize..30) {
                let mut fleet = Fleet::new(ChaCha8Rng::seed_from_u64(seed), FleetConfig::default().with_size(size));
                let records = fleet.vehicle_records();
                let batch = parse_batch(&records, parse_vehicle, MalformedPolicy::Abort);
                prop_assert!(batch.is_ok());
                prop_assert_eq!(batch.map(|b| b.items.len()).unwrap_or(0), size);
            }
        }
    }
}
