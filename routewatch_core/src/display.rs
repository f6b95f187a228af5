//! Display-side types: handles, the display table, display operations and
//! the sink that applies them.
//!
//! The core never draws anything. It issues `DisplayOp`s against a
//! `DisplaySink`, which owns the real markers (a map widget, a log, an
//! in-memory model) and hands back opaque handles.

use crate::config::{MarkerStyle, RouteStyle};
use crate::entity::{Position, VehicleId};
use crate::route::RouteGeometry;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::info;
use uuid::Uuid;

// ============================================================================
// HANDLES
// ============================================================================

/// Opaque handle to a vehicle marker, minted by the sink on create.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MarkerHandle(pub Uuid);

/// Opaque handle to an installed route layer/source pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LayerHandle(pub Uuid);

impl std::fmt::Display for MarkerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Show first 8 chars for readability
        write!(f, "{}", &self.0.to_string()[..8])
    }
}

impl std::fmt::Display for LayerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", &self.0.to_string()[..8])
    }
}

// ============================================================================
// DISPLAY TABLE
// ============================================================================

/// The visible counterpart of a tracked vehicle.
#[derive(Debug, Clone, PartialEq)]
pub struct DisplayedEntity {
    pub id: VehicleId,
    pub handle: MarkerHandle,
    /// Last position pushed to the sink
    pub position: Position,
}

/// Mapping from vehicle id to its displayed marker.
///
/// Ordered by id so that every walk over the table (stale detection in
/// particular) is deterministic.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DisplayTable {
    entries: BTreeMap<VehicleId, DisplayedEntity>,
}

impl DisplayTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of displayed vehicles.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing is displayed.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// True when `id` has a marker.
    pub fn contains(&self, id: &VehicleId) -> bool {
        self.entries.contains_key(id)
    }

    /// Looks up the displayed entity for `id`.
    pub fn get(&self, id: &VehicleId) -> Option<&DisplayedEntity> {
        self.entries.get(id)
    }

    /// Inserts or replaces the entry for `entity.id`.
    pub fn insert(&mut self, entity: DisplayedEntity) -> Option<DisplayedEntity> {
        self.entries.insert(entity.id.clone(), entity)
    }

    /// Removes and returns the entry for `id`.
    pub fn remove(&mut self, id: &VehicleId) -> Option<DisplayedEntity> {
        self.entries.remove(id)
    }

    /// Iterates over ids in order.
    pub fn ids(&self) -> impl Iterator<Item = &VehicleId> {
        self.entries.keys()
    }

    /// Iterates over entries in id order.
    pub fn iter(&self) -> impl Iterator<Item = &DisplayedEntity> {
        self.entries.values()
    }
}

impl FromIterator<DisplayedEntity> for DisplayTable {
    fn from_iter<I: IntoIterator<Item = DisplayedEntity>>(iter: I) -> Self {
        let mut table = DisplayTable::new();
        for entity in iter {
            table.insert(entity);
        }
        table
    }
}

// ============================================================================
// DISPLAY OPERATIONS
// ============================================================================

/// One instruction for the display sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum DisplayOp {
    Create { id: VehicleId, position: Position },
    Move { id: VehicleId, position: Position },
    Remove { id: VehicleId },
}

impl DisplayOp {
    /// The vehicle this operation targets.
    pub fn id(&self) -> &VehicleId {
        match self {
            DisplayOp::Create { id, .. } | DisplayOp::Move { id, .. } | DisplayOp::Remove { id } => id,
        }
    }
}

impl std::fmt::Display for DisplayOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DisplayOp::Create { id, position } => {
                write!(f, "Create({}, {:.5},{:.5})", id, position.longitude, position.latitude)
            }
            DisplayOp::Move { id, position } => {
                write!(f, "Move({}, {:.5},{:.5})", id, position.longitude, position.latitude)
            }
            DisplayOp::Remove { id } => write!(f, "Remove({})", id),
        }
    }
}

// ============================================================================
// SINK
// ============================================================================

/// The external display collaborator.
///
/// All calls are synchronous; a sink must not block.
pub trait DisplaySink: Send + 'static {
    /// Creates a marker for `id` at `position` and returns its handle.
    fn create_marker(&mut self, id: &VehicleId, position: Position) -> MarkerHandle;

    /// Moves an existing marker.
    fn move_marker(&mut self, handle: MarkerHandle, position: Position);

    /// Removes a marker from the display.
    fn remove_marker(&mut self, handle: MarkerHandle);

    /// Installs a route layer (and its source) drawn from `geometry`.
    fn add_route_layer(&mut self, geometry: &RouteGeometry) -> LayerHandle;

    /// Tears down a route layer and its source.
    fn remove_route_layer(&mut self, layer: LayerHandle);
}

/// A call observed by `MemorySink`.
#[derive(Debug, Clone, PartialEq)]
pub enum SinkCall {
    CreateMarker { id: VehicleId, handle: MarkerHandle, position: Position },
    MoveMarker { handle: MarkerHandle, position: Position },
    RemoveMarker { handle: MarkerHandle },
    AddRouteLayer { layer: LayerHandle, points: usize },
    RemoveRouteLayer { layer: LayerHandle },
}

/// In-memory display model.
///
/// Keeps what a map would show (markers and route layers) plus a log of
/// every call. Handles are minted from a counter so runs are reproducible.
#[derive(Debug, Default)]
pub struct MemorySink {
    markers: BTreeMap<MarkerHandle, (VehicleId, Position)>,
    layers: BTreeMap<LayerHandle, RouteGeometry>,
    calls: Vec<SinkCall>,
    next_handle: u128,
    peak_layers: usize,
    unknown_handle_calls: usize,
}

impl MemorySink {
    /// Creates an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    fn mint(&mut self) -> Uuid {
        self.next_handle += 1;
        Uuid::from_u128(self.next_handle)
    }

    /// Number of markers currently on display.
    pub fn marker_count(&self) -> usize {
        self.markers.len()
    }

    /// Ids of all markers on display.
    pub fn marker_ids(&self) -> BTreeSet<VehicleId> {
        self.markers.values().map(|(id, _)| id.clone()).collect()
    }

    /// Current position of the marker showing `id`.
    pub fn marker_position(&self, id: &VehicleId) -> Option<Position> {
        self.markers
            .values()
            .find(|(marker_id, _)| marker_id == id)
            .map(|(_, position)| *position)
    }

    /// Number of route layers currently installed.
    pub fn route_layer_count(&self) -> usize {
        self.layers.len()
    }

    /// Geometry of the installed route, if exactly one layer is present.
    pub fn current_route(&self) -> Option<&RouteGeometry> {
        if self.layers.len() == 1 {
            self.layers.values().next()
        } else {
            None
        }
    }

    /// Highest number of route layers that were ever installed at once.
    pub fn peak_route_layers(&self) -> usize {
        self.peak_layers
    }

    /// Calls that referenced a handle this sink did not know (or no longer knew).
    pub fn unknown_handle_calls(&self) -> usize {
        self.unknown_handle_calls
    }

    /// Every call received so far, in order.
    pub fn calls(&self) -> &[SinkCall] {
        &self.calls
    }

    /// Takes the call log, leaving it empty.
    pub fn drain_calls(&mut self) -> Vec<SinkCall> {
        std::mem::take(&mut self.calls)
    }
}

impl DisplaySink for MemorySink {
    fn create_marker(&mut self, id: &VehicleId, position: Position) -> MarkerHandle {
        let handle = MarkerHandle(self.mint());
        self.markers.insert(handle, (id.clone(), position));
        self.calls.push(SinkCall::CreateMarker {
            id: id.clone(),
            handle,
            position,
        });
        handle
    }

    fn move_marker(&mut self, handle: MarkerHandle, position: Position) {
        match self.markers.get_mut(&handle) {
            Some(marker) => marker.1 = position,
            None => self.unknown_handle_calls += 1,
        }
        self.calls.push(SinkCall::MoveMarker { handle, position });
    }

    fn remove_marker(&mut self, handle: MarkerHandle) {
        if self.markers.remove(&handle).is_none() {
            self.unknown_handle_calls += 1;
        }
        self.calls.push(SinkCall::RemoveMarker { handle });
    }

    fn add_route_layer(&mut self, geometry: &RouteGeometry) -> LayerHandle {
        let layer = LayerHandle(self.mint());
        self.layers.insert(layer, geometry.clone());
        self.peak_layers = self.peak_layers.max(self.layers.len());
        self.calls.push(SinkCall::AddRouteLayer {
            layer,
            points: geometry.len(),
        });
        layer
    }

    fn remove_route_layer(&mut self, layer: LayerHandle) {
        if self.layers.remove(&layer).is_none() {
            self.unknown_handle_calls += 1;
        }
        self.calls.push(SinkCall::RemoveRouteLayer { layer });
    }
}

/// Sink that draws nothing and logs every call through `tracing`.
///
/// Used by the `live` CLI mode when no map widget is attached.
#[derive(Debug, Clone)]
pub struct TracingSink {
    marker_style: MarkerStyle,
    route_style: RouteStyle,
    markers: BTreeMap<MarkerHandle, VehicleId>,
}

impl TracingSink {
    /// Creates a logging sink with the given styling.
    pub fn new(marker_style: MarkerStyle, route_style: RouteStyle) -> Self {
        Self {
            marker_style,
            route_style,
            markers: BTreeMap::new(),
        }
    }

    /// Number of markers the sink believes are on display.
    pub fn marker_count(&self) -> usize {
        self.markers.len()
    }

    fn label(&self, handle: MarkerHandle) -> String {
        self.markers
            .get(&handle)
            .map(|id| id.to_string())
            .unwrap_or_else(|| handle.to_string())
    }
}

impl DisplaySink for TracingSink {
    fn create_marker(&mut self, id: &VehicleId, position: Position) -> MarkerHandle {
        let handle = MarkerHandle(Uuid::new_v4());
        self.markers.insert(handle, id.clone());
        info!(
            "+ marker {} at ({:.5}, {:.5}) color={}",
            id, position.longitude, position.latitude, self.marker_style.color
        );
        handle
    }

    fn move_marker(&mut self, handle: MarkerHandle, position: Position) {
        info!(
            "~ marker {} -> ({:.5}, {:.5})",
            self.label(handle),
            position.longitude,
            position.latitude
        );
    }

    fn remove_marker(&mut self, handle: MarkerHandle) {
        let label = self.label(handle);
        self.markers.remove(&handle);
        info!("- marker {}", label);
    }

    fn add_route_layer(&mut self, geometry: &RouteGeometry) -> LayerHandle {
        let layer = LayerHandle(Uuid::new_v4());
        info!(
            "+ route layer {} ({} points, color={} width={} opacity={})",
            layer,
            geometry.len(),
            self.route_style.color,
            self.route_style.width,
            self.route_style.opacity
        );
        layer
    }

    fn remove_route_layer(&mut self, layer: LayerHandle) {
        info!("- route layer {}", layer);
    }
}
