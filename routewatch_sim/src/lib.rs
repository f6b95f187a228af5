//! RouteWatch Deterministic Simulation Harness
//!
//! This crate provides a controlled world in which the real `RouteTracker`
//! runs unchanged against a scripted bus fleet.
//!
//! # Core Principle
//!
//! All sources of non-determinism are intercepted and controlled:
//! - **Time**: Tokio's paused clock; idle tasks jump straight to the next timer
//! - **Feed**: `SimFeed` with configurable latency and outages
//! - **Randomness**: All entropy derived from a single 64-bit seed
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     ScenarioRunner                          │
//! │  ┌──────────────────────────────────────────────────────┐   │
//! │  │ current_thread runtime, start_paused (virtual clock) │   │
//! │  └──────────────────────────────────────────────────────┘   │
//! │       │                                                     │
//! │  ┌────▼─────────┐  fetch   ┌──────────┐   ┌────────────┐    │
//! │  │ RouteTracker │ ───────► │ SimFeed  │ ─►│   Fleet    │    │
//! │  │ + MemorySink │          │ (faults) │   │ (truth)    │    │
//! │  └──────────────┘          └──────────┘   └────────────┘    │
//! │       ▲ checks: sink == table == last served snapshot       │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use routewatch_sim::{ScenarioRunner, scenarios::ScenarioId};
//!
//! let result = ScenarioRunner::new(42).run(ScenarioId::FlakyFeed);
//! assert!(result.passed);
//! ```

mod context;
mod error;
mod export;
mod feed;
mod fleet;
mod runner;
pub mod scenarios;

pub use context::SimContext;
pub use error::SimError;
pub use export::{SimEvent, SimExport, SimFrame, VehicleFix};
pub use feed::{FeedStats, SimFeed};
pub use fleet::{Fleet, FleetConfig, SimVehicle, ROUTE_ORIGIN};
pub use runner::{ScenarioMetrics, ScenarioResult, ScenarioRunner};
