//! Read-model projections.
//!
//! All projections are rebuildable from the event stream, tenant-isolated and
//! idempotent under at-least-once delivery.

pub mod aggregate_view;
pub mod cursor_store;

pub use aggregate_view::{AggregateView, ProjectionError};
pub use cursor_store::{InMemoryCursorStore, ProjectionCursorStore};
