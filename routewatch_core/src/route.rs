//! The Route Renderer - wholesale replacement of the route polyline.
//!
//! Stops have no identity that survives a refetch, so there is nothing to
//! diff: every new geometry tears down the previous layer and installs a
//! fresh one.

use crate::display::{DisplaySink, LayerHandle};
use crate::entity::{Position, RouteStop};
use geo::{HaversineLength, LineString};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, warn};

/// Ordered path of a route, in fetch order.
///
/// Order is the direction of travel and must never be re-sorted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RouteGeometry {
    points: Vec<Position>,
}

impl RouteGeometry {
    /// Builds a geometry from an explicit list of positions.
    pub fn from_positions(points: Vec<Position>) -> Self {
        Self { points }
    }

    /// Builds a geometry from stops, keeping their order.
    pub fn from_stops(stops: &[RouteStop]) -> Self {
        Self {
            points: stops.iter().map(|stop| stop.position).collect(),
        }
    }

    /// Number of vertices.
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// True for a geometry with no vertices.
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Vertices in path order.
    pub fn positions(&self) -> &[Position] {
        &self.points
    }

    /// Converts to a `geo` line string (x = longitude, y = latitude).
    pub fn to_line_string(&self) -> LineString<f64> {
        LineString::new(self.points.iter().map(|&p| p.into()).collect())
    }

    /// Great-circle length of the path in meters.
    pub fn length_meters(&self) -> f64 {
        self.to_line_string().haversine_length()
    }

    /// GeoJSON `Feature` with a `LineString` geometry, ready to be used as a
    /// map source.
    pub fn to_geojson(&self) -> serde_json::Value {
        let coordinates: Vec<[f64; 2]> = self.points.iter().map(|p| p.to_array()).collect();
        json!({
            "type": "Feature",
            "properties": {},
            "geometry": {
                "type": "LineString",
                "coordinates": coordinates,
            }
        })
    }
}

/// Replaces the displayed route with `geometry`.
///
/// Removes `current` (if any) and installs a new layer, both under the same
/// exclusive borrow of the sink: nobody can observe the display between the
/// two steps, so it never shows zero or two route layers.
pub fn set_route<S>(current: Option<LayerHandle>, geometry: &RouteGeometry, sink: &mut S) -> LayerHandle
where
    S: DisplaySink + ?Sized,
{
    if geometry.len() < 2 {
        warn!("Installing degenerate route geometry ({} points)", geometry.len());
    }

    if let Some(old) = current {
        sink.remove_route_layer(old);
    }
    let layer = sink.add_route_layer(geometry);

    debug!("Route layer {} installed ({} points)", layer, geometry.len());
    layer
}
