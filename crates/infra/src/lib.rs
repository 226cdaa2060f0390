//! Infrastructure layer: event store, dispatcher, schedule store, read-side
//! views and the revenue engine that wires them together.

pub mod command_dispatcher;
pub mod config;
pub mod engine;
pub mod event_store;
pub mod projections;
pub mod read_model;
pub mod schedule_store;


pub use config::EngineConfig;
pub use engine::{EngineError, RevenueEngine};
