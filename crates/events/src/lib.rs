//! Event mechanics shared by every aggregate in the engine.
//!
//! - `Event`: metadata every domain event exposes
//! - `EventEnvelope`: tenant + stream metadata around a payload
//! - `EventBus`: fire-and-forget fan-out (projections, GL handoff)
//! - `execute`: decide + apply helper for tests and inline use

pub mod bus;
pub mod envelope;
pub mod event;
pub mod handler;
pub mod in_memory_bus;

pub use bus::{EventBus, Subscription};
pub use envelope::EventEnvelope;
pub use event::Event;
pub use handler::execute;
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
