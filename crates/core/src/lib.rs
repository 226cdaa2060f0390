//! `forgerev-core`: shared building blocks for the revenue engine.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns):
//! identifiers, the aggregate contract, the domain error model and minor-unit
//! money arithmetic.

pub mod aggregate;
pub mod entity;
pub mod error;
pub mod id;
pub mod money;
pub mod value_object;

pub use aggregate::{Aggregate, AggregateRoot, ExpectedVersion};
pub use entity::Entity;
pub use error::{DomainError, DomainResult};
pub use id::{AggregateId, LedgerId, TenantId, UserId};
pub use money::{Currency, Money, round_half_away, split_by_weights};
pub use value_object::ValueObject;
