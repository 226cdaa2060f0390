use serde::{Deserialize, Serialize};

use crate::period::PeriodId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseExceptionKind {
    /// A `Scheduled` entry due in the period has not been swept.
    UnsweptEntry,
    SourceEventPending,
    SourceEventError,
    /// A contract active in the period has a draft (unallocated) current version.
    IncompleteAllocation,
    /// The period is not `Open`, so there is nothing to close.
    PeriodNotOpen,
}

/// One reason a period cannot close, with enough context to triage it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloseException {
    pub kind: CloseExceptionKind,
    pub reference: String,
    pub amount: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloseReadiness {
    pub period_id: PeriodId,
    pub allowed: bool,
    pub exceptions: Vec<CloseException>,
}

impl CloseReadiness {
    pub fn from_exceptions(period_id: PeriodId, exceptions: Vec<CloseException>) -> Self {
        Self {
            period_id,
            allowed: exceptions.is_empty(),
            exceptions,
        }
    }

    pub fn total_amount(&self) -> i64 {
        self.exceptions.iter().map(|e| e.amount).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use forgerev_core::AggregateId;

    #[test]
    fn any_exception_blocks_close() {
        let id = PeriodId::new(AggregateId::new());
        assert!(CloseReadiness::from_exceptions(id, vec![]).allowed);

        let r = CloseReadiness::from_exceptions(
            id,
            vec![
                CloseException {
                    kind: CloseExceptionKind::SourceEventError,
                    reference: "billing/INV-7".into(),
                    amount: 250,
                },
                CloseException {
                    kind: CloseExceptionKind::UnsweptEntry,
                    reference: "entry".into(),
                    amount: 1_000,
                },
            ],
        );
        assert!(!r.allowed);
        assert_eq!(r.total_amount(), 1_250);
    }

    #[test]
    fn kinds_serialize_as_snake_case() {
        let json = serde_json::to_string(&CloseExceptionKind::IncompleteAllocation).unwrap();
        assert_eq!(json, "\"incomplete_allocation\"");
    }
}
