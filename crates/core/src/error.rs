//! Errors raised by aggregate decisions.

use thiserror::Error;

pub type DomainResult<T> = Result<T, DomainError>;

/// Why a book, contract or period refused a command.
///
/// Only deterministic outcomes of a decision live here. SSP lookups, close
/// readiness and retry exhaustion are reported by the engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    #[error("validation failed: {0}")]
    Validation(String),

    /// A rule that must hold across the aggregate, e.g. allocations summing
    /// to the transaction price or a referenced SSP line staying unchanged.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// The stream was never created, or names a version or line it lacks.
    #[error("{0} not found")]
    NotFound(String),

    /// The command races a state it cannot apply to (a version already
    /// allocated, a duplicate SSP line). Retrying the same command will not help.
    #[error("conflict: {0}")]
    Conflict(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }
}
