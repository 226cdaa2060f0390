use chrono::NaiveDate;
use thiserror::Error;

use forgerev_catalog::{CatalogError, ItemId};
use forgerev_contracts::{AllocationError, SourceEventKey};
use forgerev_core::DomainError;
use forgerev_intake::IntakeError;
use forgerev_periods::{CloseException, PeriodId};
use forgerev_recognition::{EntryId, EntryStatus, ScheduleError};

use crate::command_dispatcher::DispatchError;
use crate::projections::ProjectionError;
use crate::schedule_store::ScheduleStoreError;

/// Engine-level error taxonomy surfaced to callers.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("no SSP for item {item_id} as of {as_of}")]
    SspNotFound {
        item_id: ItemId,
        as_of: NaiveDate,
        line_no: Option<u32>,
    },

    #[error("standalone value pool is zero, cannot allocate {remainder}")]
    AllocationDegenerate { remainder: i64 },

    #[error("version conflict on {reference} after {attempts} attempt(s)")]
    VersionConflict { reference: String, attempts: u32 },

    #[error("period {period_id} is not ready to close ({} exception(s))", exceptions.len())]
    PeriodNotReady {
        period_id: PeriodId,
        exceptions: Vec<CloseException>,
    },

    #[error("source event {source_key} failed: {reason}")]
    SourceEventError { source_key: SourceEventKey, reason: String },

    #[error("schedule entry {entry_id} is {status:?} and cannot be altered")]
    ScheduleImmutableViolation { entry_id: EntryId, status: EntryStatus },

    #[error("{0} not found")]
    NotFound(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("invariant violated: {0}")]
    Invariant(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("infrastructure failure: {0}")]
    Infrastructure(String),
}

impl EngineError {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::SspNotFound { .. } => "ssp_not_found",
            EngineError::AllocationDegenerate { .. } => "allocation_degenerate",
            EngineError::VersionConflict { .. } => "version_conflict",
            EngineError::PeriodNotReady { .. } => "period_not_ready",
            EngineError::SourceEventError { .. } => "source_event_error",
            EngineError::ScheduleImmutableViolation { .. } => "schedule_immutable_violation",
            EngineError::NotFound(_) => "not_found",
            EngineError::Validation(_) => "validation",
            EngineError::Invariant(_) => "invariant_violation",
            EngineError::Conflict(_) => "conflict",
            EngineError::Infrastructure(_) => "infrastructure",
        }
    }

    pub(crate) fn not_found(what: impl Into<String>) -> Self {
        EngineError::NotFound(what.into())
    }
}

impl From<DomainError> for EngineError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::Validation(msg) | DomainError::InvalidId(msg) => EngineError::Validation(msg),
            DomainError::InvariantViolation(msg) => EngineError::Invariant(msg),
            DomainError::Conflict(msg) => EngineError::Conflict(msg),
            DomainError::NotFound(what) => EngineError::NotFound(what),
        }
    }
}

impl From<DispatchError> for EngineError {
    fn from(value: DispatchError) -> Self {
        match value {
            DispatchError::Concurrency(msg) => EngineError::VersionConflict {
                reference: msg,
                attempts: 1,
            },
            DispatchError::VersionConflict { aggregate_id, attempts } => EngineError::VersionConflict {
                reference: aggregate_id.to_string(),
                attempts,
            },
            DispatchError::Validation(msg) => EngineError::Validation(msg),
            DispatchError::InvariantViolation(msg) => EngineError::Invariant(msg),
            DispatchError::Conflict(msg) => EngineError::Conflict(msg),
            DispatchError::NotFound(what) => EngineError::NotFound(what),
            other => EngineError::Infrastructure(other.to_string()),
        }
    }
}

impl From<CatalogError> for EngineError {
    fn from(value: CatalogError) -> Self {
        match value {
            CatalogError::SspNotFound { item_id, as_of, .. } => EngineError::SspNotFound {
                item_id,
                as_of,
                line_no: None,
            },
            CatalogError::BookNotFound(id) => EngineError::NotFound(format!("ssp book {id}")),
            other => EngineError::Validation(other.to_string()),
        }
    }
}

impl From<AllocationError> for EngineError {
    fn from(value: AllocationError) -> Self {
        match value {
            AllocationError::SspNotFound { line_no, item_id, as_of } => EngineError::SspNotFound {
                item_id,
                as_of,
                line_no: Some(line_no),
            },
            AllocationError::Degenerate { remainder } => EngineError::AllocationDegenerate { remainder },
            AllocationError::Catalog(inner) => inner.into(),
            other => EngineError::Validation(other.to_string()),
        }
    }
}

impl From<ScheduleError> for EngineError {
    fn from(value: ScheduleError) -> Self {
        match value {
            ScheduleError::Immutable { entry_id, status } => {
                EngineError::ScheduleImmutableViolation { entry_id, status }
            }
            ScheduleError::Overflow(_) => EngineError::Invariant(value.to_string()),
            other => EngineError::Validation(other.to_string()),
        }
    }
}

impl From<ScheduleStoreError> for EngineError {
    fn from(value: ScheduleStoreError) -> Self {
        match value {
            ScheduleStoreError::Schedule(inner) => inner.into(),
            ScheduleStoreError::StaleObligation { .. }
            | ScheduleStoreError::AlreadyPlanned { .. }
            | ScheduleStoreError::PeriodSealed { .. } => EngineError::Conflict(value.to_string()),
            other => EngineError::Infrastructure(other.to_string()),
        }
    }
}

impl From<ProjectionError> for EngineError {
    fn from(value: ProjectionError) -> Self {
        EngineError::Infrastructure(value.to_string())
    }
}

impl From<IntakeError> for EngineError {
    fn from(value: IntakeError) -> Self {
        match value {
            IntakeError::Domain(inner) => inner.into(),
            other => EngineError::Validation(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use forgerev_core::AggregateId;
    use forgerev_recognition::EntryId;

    #[test]
    fn allocation_failures_map_onto_taxonomy() {
        let e: EngineError = AllocationError::Degenerate { remainder: 500 }.into();
        assert_eq!(e.code(), "allocation_degenerate");

        let e: EngineError = AllocationError::SspNotFound {
            line_no: 2,
            item_id: ItemId::new("SKU").unwrap(),
            as_of: NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
        }
        .into();
        assert!(matches!(e, EngineError::SspNotFound { line_no: Some(2), .. }));
    }

    #[test]
    fn posted_entry_edits_are_immutable_violations() {
        let entry_id = EntryId::new();
        let e: EngineError = ScheduleStoreError::Schedule(ScheduleError::Immutable {
            entry_id,
            status: EntryStatus::Posted,
        })
        .into();
        assert_eq!(
            e,
            EngineError::ScheduleImmutableViolation {
                entry_id,
                status: EntryStatus::Posted
            }
        );
    }

    #[test]
    fn exhausted_retries_surface_as_version_conflict() {
        let id = AggregateId::new();
        let e: EngineError = DispatchError::VersionConflict {
            aggregate_id: id,
            attempts: 4,
        }
        .into();
        assert_eq!(e.code(), "version_conflict");
        assert!(e.to_string().contains("4 attempt"));
    }
}
