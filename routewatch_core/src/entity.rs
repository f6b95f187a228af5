//! The Entity Model - typed vehicles and stops parsed from raw feed records.
//!
//! This is the only place that trusts the shape of external JSON. Records
//! are accepted in the MBTA JSON:API layout
//!
//! ```text
//! { "id": "y1234", "attributes": { "longitude": -71.05, "latitude": 42.35, ... } }
//! ```
//!
//! and, as a fallback, with the fields at top level. Anything else is
//! reported as a `MalformedRecord`; deciding whether to drop the record or
//! abort the cycle is the caller's business (see `MalformedPolicy`).

use routewatch_env::RawRecord;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

// ============================================================================
// IDENTITY & POSITION
// ============================================================================

/// Stable identifier of a tracked vehicle.
///
/// Opaque: passed through exactly as the feed delivers it.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VehicleId(pub String);

impl VehicleId {
    /// Creates a vehicle id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for VehicleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for VehicleId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// WGS84 position, longitude first (the order map widgets expect).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub longitude: f64,
    pub latitude: f64,
}

impl Position {
    /// Creates a position from `(longitude, latitude)`.
    pub fn new(longitude: f64, latitude: f64) -> Self {
        Self { longitude, latitude }
    }

    /// Returns `[longitude, latitude]`, the GeoJSON coordinate order.
    pub fn to_array(self) -> [f64; 2] {
        [self.longitude, self.latitude]
    }
}

impl From<Position> for geo::Coord<f64> {
    fn from(p: Position) -> Self {
        geo::coord! { x: p.longitude, y: p.latitude }
    }
}

// ============================================================================
// ENTITIES
// ============================================================================

/// A vehicle as seen in one snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedEntity {
    pub id: VehicleId,
    pub position: Position,
}

impl TrackedEntity {
    /// Creates a tracked entity.
    pub fn new(id: impl Into<String>, position: Position) -> Self {
        Self {
            id: VehicleId::new(id),
            position,
        }
    }
}

/// A stop on the tracked route. Has no identity across polls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteStop {
    pub name: String,
    pub position: Position,
}

// ============================================================================
// PARSE ERRORS & POLICY
// ============================================================================

/// A raw record that could not be turned into a typed entity.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MalformedRecord {
    #[error("record is not a JSON object")]
    NotAnObject,

    #[error("record has no usable id")]
    MissingId,

    #[error("record {id:?} is missing `{field}`")]
    MissingField { id: Option<String>, field: &'static str },

    #[error("record {id:?} has a non-numeric `{field}`")]
    NotNumeric { id: Option<String>, field: &'static str },
}

/// What to do with a malformed record inside a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MalformedPolicy {
    /// Skip the record and keep the rest of the batch
    #[default]
    Drop,
    /// Reject the whole batch on the first malformed record
    Abort,
}

/// Result of parsing a batch under `MalformedPolicy::Drop`.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedBatch<T> {
    /// Successfully parsed items, in input order
    pub items: Vec<T>,
    /// Errors for the records that were skipped
    pub dropped: Vec<MalformedRecord>,
}

// ============================================================================
// PARSING
// ============================================================================

/// Looks a field up under `attributes` first, then at top level.
/// JSON `null` counts as absent.
fn lookup<'a>(obj: &'a Map<String, Value>, name: &str) -> Option<&'a Value> {
    obj.get("attributes")
        .and_then(Value::as_object)
        .and_then(|attrs| attrs.get(name))
        .or_else(|| obj.get(name))
        .filter(|v| !v.is_null())
}

fn record_id(obj: &Map<String, Value>) -> Option<String> {
    match obj.get("id")? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn coordinate(obj: &Map<String, Value>, id: &Option<String>, field: &'static str) -> Result<f64, MalformedRecord> {
    let value = lookup(obj, field).ok_or_else(|| MalformedRecord::MissingField {
        id: id.clone(),
        field,
    })?;

    value
        .as_f64()
        .filter(|v| v.is_finite())
        .ok_or_else(|| MalformedRecord::NotNumeric {
            id: id.clone(),
            field,
        })
}

fn position(obj: &Map<String, Value>, id: &Option<String>) -> Result<Position, MalformedRecord> {
    let longitude = coordinate(obj, id, "longitude")?;
    let latitude = coordinate(obj, id, "latitude")?;
    Ok(Position::new(longitude, latitude))
}

/// Parses one vehicle record.
pub fn parse_vehicle(record: &RawRecord) -> Result<TrackedEntity, MalformedRecord> {
    let obj = record.value().as_object().ok_or(MalformedRecord::NotAnObject)?;
    let id = record_id(obj).ok_or(MalformedRecord::MissingId)?;
    let position = position(obj, &Some(id.clone()))?;

    Ok(TrackedEntity {
        id: VehicleId(id),
        position,
    })
}

/// Parses one route-stop record.
///
/// Stops are not identified by id downstream, but it is kept for error
/// messages when present.
pub fn parse_stop(record: &RawRecord) -> Result<RouteStop, MalformedRecord> {
    let obj = record.value().as_object().ok_or(MalformedRecord::NotAnObject)?;
    let id = record_id(obj);

    let name = lookup(obj, "name")
        .and_then(Value::as_str)
        .ok_or_else(|| MalformedRecord::MissingField {
            id: id.clone(),
            field: "name",
        })?
        .to_string();

    let position = position(obj, &id)?;

    Ok(RouteStop { name, position })
}

/// Parses a whole batch with the given policy.
///
/// Under `Drop`, bad records are collected in `ParsedBatch::dropped` and the
/// call never fails. Under `Abort`, the first bad record is returned as the
/// error.
pub fn parse_batch<T, F>(
    records: &[RawRecord],
    parser: F,
    policy: MalformedPolicy,
) -> Result<ParsedBatch<T>, MalformedRecord>
where
    F: Fn(&RawRecord) -> Result<T, MalformedRecord>,
{
    let mut items = Vec::with_capacity(records.len());
    let mut dropped = Vec::new();

    for record in records {
        match parser(record) {
            Ok(item) => items.push(item),
            Err(err) => match policy {
                MalformedPolicy::Drop => dropped.push(err),
                MalformedPolicy::Abort => return Err(err),
            },
        }
    }

    Ok(ParsedBatch { items, dropped })
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use serde_json::json;

    fn vehicle_record(id: &str, lon: f64, lat: f64) -> RawRecord {
        RawRecord::new(json!({
            "id": id,
            "type": "vehicle",
            "attributes": { "longitude": lon, "latitude": lat, "bearing": 90 }
        }))
    }

    #[test]
    fn test_parse_vehicle_jsonapi_shape() {
        let entity = parse_vehicle(&vehicle_record("y1234", -71.0464, 42.3453)).unwrap();
        assert_eq!(entity.id, VehicleId::new("y1234"));
        assert_relative_eq!(entity.position.longitude, -71.0464);
        assert_relative_eq!(entity.position.latitude, 42.3453);
    }

    #[test]
    fn test_parse_vehicle_flat_shape_and_numeric_id() {
        let record = RawRecord::new(json!({ "id": 17, "longitude": -71, "latitude": 42 }));
        let entity = parse_vehicle(&record).unwrap();
        assert_eq!(entity.id.as_str(), "17");
        assert_relative_eq!(entity.position.longitude, -71.0);
        assert_relative_eq!(entity.position.latitude, 42.0);
    }

    #[test]
    fn test_missing_latitude_is_malformed() {
        let record = RawRecord::new(json!({
            "id": "y1",
            "attributes": { "longitude": -71.05 }
        }));
        assert_eq!(
            parse_vehicle(&record),
            Err(MalformedRecord::MissingField {
                id: Some("y1".to_string()),
                field: "latitude",
            })
        );
    }

    #[test]
    fn test_null_coordinate_counts_as_missing() {
        let record = RawRecord::new(json!({
            "id": "y1",
            "attributes": { "longitude": null, "latitude": 42.0 }
        }));
        assert!(matches!(
            parse_vehicle(&record),
            Err(MalformedRecord::MissingField { field: "longitude", .. })
        ));
    }

    #[test]
    fn test_string_coordinate_is_not_numeric() {
        let record = RawRecord::new(json!({
            "id": "y1",
            "attributes": { "longitude": "-71.05", "latitude": 42.0 }
        }));
        assert!(matches!(
            parse_vehicle(&record),
            Err(MalformedRecord::NotNumeric { field: "longitude", .. })
        ));
    }

    #[test]
    fn test_missing_id_and_non_object() {
        let no_id = RawRecord::new(json!({ "attributes": { "longitude": 1.0, "latitude": 2.0 } }));
        assert_eq!(parse_vehicle(&no_id), Err(MalformedRecord::MissingId));

        let empty_id = RawRecord::new(json!({ "id": "", "longitude": 1.0, "latitude": 2.0 }));
        assert_eq!(parse_vehicle(&empty_id), Err(MalformedRecord::MissingId));

        let array = RawRecord::new(json!([1, 2, 3]));
        assert_eq!(parse_vehicle(&array), Err(MalformedRecord::NotAnObject));
    }

    #[test]
    fn test_parse_stop() {
        let record = RawRecord::new(json!({
            "id": "place-sstat",
            "attributes": { "name": "South Station", "longitude": -71.0552, "latitude": 42.3523 }
        }));
        let stop = parse_stop(&record).unwrap();
        assert_eq!(stop.name, "South Station");
        assert_eq!(stop.position, Position::new(-71.0552, 42.3523));
    }

    #[test]
    fn test_parse_stop_requires_name() {
        let record = RawRecord::new(json!({
            "id": "s1",
            "attributes": { "longitude": -71.0, "latitude": 42.0 }
        }));
        assert!(matches!(
            parse_stop(&record),
            Err(MalformedRecord::MissingField { field: "name", .. })
        ));
    }

    #[test]
    fn test_batch_drop_policy_keeps_valid_records() {
        let records = vec![
            vehicle_record("a", -71.0, 42.0),
            RawRecord::new(json!({ "id": "b", "attributes": { "longitude": -71.1 } })),
            vehicle_record("c", -71.2, 42.2),
        ];

        let batch = parse_batch(&records, parse_vehicle, MalformedPolicy::Drop).unwrap();
        let ids: Vec<&str> = batch.items.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c"]);
        assert_eq!(batch.dropped.len(), 1);
    }

    #[test]
    fn test_batch_abort_policy_fails_fast() {
        let records = vec![
            vehicle_record("a", -71.0, 42.0),
            RawRecord::new(json!({ "id": "b" })),
        ];

        let result = parse_batch(&records, parse_vehicle, MalformedPolicy::Abort);
        assert!(matches!(result, Err(MalformedRecord::MissingField { field: "longitude", .. })));
    }

    #[test]
    fn test_position_to_geo_coord() {
        let coord: geo::Coord<f64> = Position::new(-71.0, 42.0).into();
        assert_eq!(coord.x, -71.0);
        assert_eq!(coord.y, 42.0);
    }
}
