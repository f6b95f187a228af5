//! RouteWatch Core - live transit vehicle tracking
//!
//! This library keeps a map display in sync with a transit feed:
//! 1. **Entity Model**: raw feed records become `TrackedEntity` / `RouteStop`
//! 2. **Reconciler**: each snapshot is diffed against the display into Create/Move/Remove ops
//! 3. **Route Renderer**: the route polyline is replaced atomically on refresh
//! 4. **Scheduler**: `RouteTracker` polls on a fixed period and applies the ops

pub mod config;
pub mod display;
pub mod entity;
pub mod error;
pub mod reconciler;
pub mod route;
pub mod scheduler;

// Re-export key types for convenience
pub use config::{positive_duration, MarkerStyle, OverlapPolicy, RouteStyle, TrackerConfig};
pub use display::{
    DisplayOp, DisplaySink, DisplayTable, DisplayedEntity, LayerHandle, MarkerHandle, MemorySink,
    SinkCall, TracingSink,
};
pub use entity::{
    parse_batch, parse_stop, parse_vehicle, MalformedPolicy, MalformedRecord, ParsedBatch,
    Position, RouteStop, TrackedEntity, VehicleId,
};
pub use error::{CycleError, TrackerError};
pub use reconciler::{plan, reconcile, ReconcileSummary};
pub use route::{set_route, RouteGeometry};
pub use scheduler::{CycleOutcome, CycleReport, RouteTracker, TrackerStats};
