//! RouteWatch Environment Abstraction Layer
//!
//! This crate provides the seams that let the RouteWatch scheduler run in
//! both **Production** (Tokio + HTTP) and **Simulation** (paused clock +
//! scripted fleet) environments.
//!
//! # Core Concept
//!
//! The reconciliation core never touches I/O directly. Everything that can
//! block or vary between runs is behind a trait:
//! - Time and task spawning (`TrackerContext`)
//! - Vehicle snapshots and route stops (`TransitFeed`)
//!
//! # Example
//!
//! ```ignore
//! use routewatch_env::{TrackerContext, TransitFeed};
//!
//! async fn poll_loop<Ctx: TrackerContext, Feed: TransitFeed>(ctx: &Ctx, feed: &Feed) {
//!     loop {
//!         match feed.fetch_vehicle_snapshot().await {
//!             Ok(records) => handle(records),
//!             Err(e) => tracing::warn!("fetch failed: {}", e),
//!         }
//!         ctx.sleep(Duration::from_secs(25)).await;
//!     }
//! }
//! ```

mod context;
mod feed;
mod types;
mod error;
mod tokio_impl;
mod http_impl;

pub use context::TrackerContext;
pub use feed::{TransitFeed, FeedController};
pub use types::{JsonApiDocument, RawRecord, RouteId};
pub use error::FeedError;
pub use tokio_impl::TokioContext;
pub use http_impl::{HttpFeed, MBTA_API_BASE};
