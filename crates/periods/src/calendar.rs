use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use forgerev_core::LedgerId;

use crate::period::{PeriodId, PeriodStatus};

/// Snapshot of one period as seen by schedulers and sweeps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodSlot {
    pub period_id: PeriodId,
    pub ledger_id: LedgerId,
    pub name: String,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub status: PeriodStatus,
}

impl PeriodSlot {
    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }

    pub fn overlaps(&self, start: NaiveDate, end: NaiveDate) -> bool {
        self.start <= end && start <= self.end
    }
}

/// Ordered, non-overlapping periods of a single ledger.
///
/// Passed explicitly into every scheduling decision; there is no ambient
/// "current period".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeriodCalendar {
    slots: Vec<PeriodSlot>,
}

impl PeriodCalendar {
    pub fn new(mut slots: Vec<PeriodSlot>) -> Self {
        slots.sort_by_key(|s| s.start);
        Self { slots }
    }

    pub fn slots(&self) -> &[PeriodSlot] {
        &self.slots
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn get(&self, period_id: PeriodId) -> Option<&PeriodSlot> {
        self.slots.iter().find(|s| s.period_id == period_id)
    }

    pub fn slot_for(&self, date: NaiveDate) -> Option<&PeriodSlot> {
        self.slots.iter().find(|s| s.contains(date))
    }

    /// Periods intersecting `start..=end`, in calendar order.
    pub fn overlapping(&self, start: NaiveDate, end: NaiveDate) -> Vec<&PeriodSlot> {
        self.slots.iter().filter(|s| s.overlaps(start, end)).collect()
    }

    /// First period ending on or after `date` that still accepts schedule.
    pub fn first_accepting_from(&self, date: NaiveDate) -> Option<&PeriodSlot> {
        self.slots
            .iter()
            .find(|s| s.end >= date && s.status.accepts_schedule())
    }
}
