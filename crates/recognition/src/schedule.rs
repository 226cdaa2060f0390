use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use forgerev_contracts::{ContractId, ObligationId, ObligationStatus, PerformanceObligation, SourceEventKey};
use forgerev_core::Entity;
use forgerev_periods::PeriodId;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntryId(pub Uuid);

impl EntryId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for EntryId {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Display for EntryId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleEventType {
    Initial,
    Catchup,
    Adjustment,
    Reversal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    Scheduled,
    Posted,
    Reversed,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ScheduleError {
    #[error("schedule entry {entry_id} is {status:?} and cannot be altered")]
    Immutable { entry_id: EntryId, status: EntryStatus },

    #[error("no period accepting schedule covers {date}")]
    NoPeriod { date: NaiveDate },

    #[error("obligation {0} has no allocated price")]
    Unallocated(ObligationId),

    #[error("obligation {obligation_id} is not recognised by {expected:?}")]
    MethodMismatch {
        obligation_id: ObligationId,
        expected: forgerev_contracts::RecognitionMethod,
    },

    #[error("milestone '{0}' is not defined on the obligation")]
    UnknownMilestone(String),

    #[error("milestone '{0}' has already been recognised")]
    MilestoneAlreadyRecognised(String),

    #[error("usage quantity must be positive")]
    InvalidUsage,

    #[error("amount overflow while scheduling obligation {0}")]
    Overflow(ObligationId),
}

/// A dated slice of an obligation's allocated price, bucketed into a period.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleEntry {
    pub entry_id: EntryId,
    pub contract_id: ContractId,
    pub contract_version: u32,
    pub obligation_id: ObligationId,
    pub period_id: PeriodId,
    pub schedule_date: NaiveDate,
    pub amount: i64,
    pub event_type: ScheduleEventType,
    pub status: EntryStatus,
    /// Source event that caused the entry (order, usage record, milestone).
    pub source: Option<SourceEventKey>,
    pub milestone_id: Option<String>,
    /// Revenue already posted on a predecessor version, carried onto this
    /// obligation so its entries still sum to its allocation. Never handed to
    /// the GL again.
    pub carried_forward: bool,
    pub posted_at: Option<DateTime<Utc>>,
}

impl Entity for ScheduleEntry {
    type Id = EntryId;

    fn id(&self) -> &EntryId {
        &self.entry_id
    }
}

impl ScheduleEntry {
    pub fn is_live(&self) -> bool {
        self.status != EntryStatus::Reversed
    }

    pub fn is_posted(&self) -> bool {
        self.status == EntryStatus::Posted
    }

    /// `Scheduled -> Posted`. Anything else would rewrite history.
    pub fn post(&mut self, at: DateTime<Utc>) -> Result<(), ScheduleError> {
        if self.status != EntryStatus::Scheduled {
            return Err(ScheduleError::Immutable {
                entry_id: self.entry_id,
                status: self.status,
            });
        }
        self.status = EntryStatus::Posted;
        self.posted_at = Some(at);
        Ok(())
    }

    /// `Scheduled -> Reversed` (the entry is replaced or withdrawn before posting).
    pub fn retire(&mut self) -> Result<(), ScheduleError> {
        if self.status != EntryStatus::Scheduled {
            return Err(ScheduleError::Immutable {
                entry_id: self.entry_id,
                status: self.status,
            });
        }
        self.status = EntryStatus::Reversed;
        Ok(())
    }
}

/// Lifecycle status of an obligation as seen through its schedule.
pub fn obligation_status(pob: &PerformanceObligation, entries: &[ScheduleEntry]) -> ObligationStatus {
    let Some(allocated) = pob.allocated_price else {
        return ObligationStatus::Unallocated;
    };

    let mut posted: i64 = 0;
    let mut any_posted = false;
    for e in entries.iter().filter(|e| e.obligation_id == pob.obligation_id && e.is_posted()) {
        posted = posted.saturating_add(e.amount);
        any_posted = true;
    }

    if any_posted && posted == allocated {
        ObligationStatus::Complete
    } else if any_posted {
        ObligationStatus::Recognizing
    } else {
        ObligationStatus::Allocated
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use forgerev_catalog::ItemId;
    use forgerev_contracts::{RecognitionMethod, RecognitionTerms};
    use forgerev_core::AggregateId;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn entry(obligation_id: ObligationId, amount: i64) -> ScheduleEntry {
        ScheduleEntry {
            entry_id: EntryId::new(),
            contract_id: ContractId::new(AggregateId::new()),
            contract_version: 1,
            obligation_id,
            period_id: PeriodId::new(AggregateId::new()),
            schedule_date: date(2026, 1, 31),
            amount,
            event_type: ScheduleEventType::Initial,
            status: EntryStatus::Scheduled,
            source: None,
            milestone_id: None,
            carried_forward: false,
            posted_at: None,
        }
    }

    fn pob(allocated: Option<i64>) -> PerformanceObligation {
        let contract = ContractId::new(AggregateId::new());
        PerformanceObligation {
            obligation_id: ObligationId::derive(contract, 1, 1),
            line_no: 1,
            item_id: ItemId::new("SKU").unwrap(),
            quantity: 1,
            ssp_source: None,
            standalone_selling_price: None,
            estimated_standalone_value: None,
            allocated_price: allocated,
            terms: RecognitionTerms {
                method: RecognitionMethod::Ratable,
                start: date(2026, 1, 1),
                end: date(2026, 2, 28),
                milestones: vec![],
                usage_rate: None,
            },
            status: ObligationStatus::Allocated,
        }
    }

    #[test]
    fn posted_entries_cannot_be_posted_or_retired_again() {
        let mut e = entry(pob(Some(1)).obligation_id, 100);
        e.post(Utc::now()).unwrap();
        assert!(e.posted_at.is_some());
        assert!(matches!(e.post(Utc::now()), Err(ScheduleError::Immutable { .. })));
        assert_eq!(
            e.retire(),
            Err(ScheduleError::Immutable {
                entry_id: e.entry_id,
                status: EntryStatus::Posted
            })
        );
    }

    #[test]
    fn retired_entry_is_no_longer_live() {
        let mut e = entry(pob(Some(1)).obligation_id, 100);
        e.retire().unwrap();
        assert!(!e.is_live());
        assert!(e.post(Utc::now()).is_err());
    }

    #[test]
    fn status_follows_posted_total() {
        let p = pob(Some(300));
        let mut a = entry(p.obligation_id, 100);
        let mut b = entry(p.obligation_id, 200);
        assert_eq!(obligation_status(&p, &[a.clone(), b.clone()]), ObligationStatus::Allocated);

        a.post(Utc::now()).unwrap();
        assert_eq!(obligation_status(&p, &[a.clone(), b.clone()]), ObligationStatus::Recognizing);

        b.post(Utc::now()).unwrap();
        assert_eq!(obligation_status(&p, &[a, b]), ObligationStatus::Complete);

        assert_eq!(obligation_status(&pob(None), &[]), ObligationStatus::Unallocated);
    }

    #[test]
    fn event_types_serialize_snake_case() {
        assert_eq!(
            serde_json::to_string(&ScheduleEventType::Catchup).unwrap(),
            "\"catchup\""
        );
    }
}
