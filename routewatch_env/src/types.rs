//! Common types for the RouteWatch environment abstraction.

use serde::{Deserialize, Serialize};

/// Identifier of the transit route being tracked (e.g. MBTA route "7").
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RouteId(pub String);

impl RouteId {
    /// Creates a route id from anything string-like.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RouteId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// One JSON-shaped record as delivered by a feed.
///
/// This is deliberately untyped: the feed only guarantees "some JSON
/// value per entity". Turning it into a typed entity happens in exactly one
/// place, the entity model's parse functions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawRecord(pub serde_json::Value);

impl RawRecord {
    /// Wraps a JSON value.
    pub fn new(value: serde_json::Value) -> Self {
        Self(value)
    }

    /// Returns the underlying JSON value.
    pub fn value(&self) -> &serde_json::Value {
        &self.0
    }
}

impl From<serde_json::Value> for RawRecord {
    fn from(value: serde_json::Value) -> Self {
        Self(value)
    }
}

/// A JSON:API top-level document: `{ "data": [ ... ] }`.
#[derive(Debug, Clone, Deserialize)]
pub struct JsonApiDocument {
    /// Primary data records; an envelope without `data` is a decode error
    pub data: Vec<RawRecord>,
}
