//! Recognition schedule storage.
//!
//! Entries are owned by the scheduler (inserts, retirements) and by sweep
//! (`Scheduled -> Posted`). Both go through atomic batches so readers never
//! observe half a plan or half a sweep.

pub mod in_memory;

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use thiserror::Error;

use forgerev_contracts::{ContractId, ObligationId, SourceEventKey};
use forgerev_core::TenantId;
use forgerev_periods::PeriodId;
use forgerev_recognition::{EntryId, ScheduleEntry, ScheduleError};

pub use in_memory::InMemoryScheduleStore;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ScheduleStoreError {
    #[error(transparent)]
    Schedule(#[from] ScheduleError),

    #[error("schedule entry {0} not found")]
    UnknownEntry(EntryId),

    #[error("schedule entry {0} already exists")]
    DuplicateEntry(EntryId),

    #[error("obligation {obligation_id} has live total {found}, expected {expected}")]
    StaleObligation {
        obligation_id: ObligationId,
        expected: i64,
        found: i64,
    },

    #[error("schedule for contract {contract_id} version {version} is already committed")]
    AlreadyPlanned { contract_id: ContractId, version: u32 },

    #[error("period {period_id} no longer accepts schedule (entry {entry_id})")]
    PeriodSealed { period_id: PeriodId, entry_id: EntryId },

    #[error("schedule store lock poisoned")]
    Poisoned,
}

impl ScheduleStoreError {
    /// Lost a race against another writer; recomputing may succeed.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            ScheduleStoreError::StaleObligation { .. }
                | ScheduleStoreError::AlreadyPlanned { .. }
                | ScheduleStoreError::PeriodSealed { .. }
        )
    }
}

/// Optimistic expectation: the obligation's non-reversed entries still sum to `live_total`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LiveTotal {
    pub obligation_id: ObligationId,
    pub live_total: i64,
}

/// One atomic change to a tenant's schedule.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScheduleBatch {
    /// Marks a contract version's schedule as generated; committing it twice fails.
    pub planned_version: Option<(ContractId, u32)>,
    pub expectations: Vec<LiveTotal>,
    pub insert: Vec<ScheduleEntry>,
    pub retire: Vec<EntryId>,
    /// Obligations replaced by a successor version; sweep skips them.
    pub freeze: Vec<ObligationId>,
}

impl ScheduleBatch {
    pub fn is_empty(&self) -> bool {
        self.planned_version.is_none() && self.insert.is_empty() && self.retire.is_empty() && self.freeze.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryFilter {
    All,
    Contract(ContractId),
    Obligation(ObligationId),
    Period(PeriodId),
    Source(SourceEventKey),
}

impl EntryFilter {
    pub fn matches(&self, entry: &ScheduleEntry) -> bool {
        match self {
            EntryFilter::All => true,
            EntryFilter::Contract(id) => entry.contract_id == *id,
            EntryFilter::Obligation(id) => entry.obligation_id == *id,
            EntryFilter::Period(id) => entry.period_id == *id,
            EntryFilter::Source(key) => entry.source.as_ref() == Some(key),
        }
    }
}

pub trait ScheduleStore: Send + Sync {
    /// Validate the whole batch, then apply it; on error nothing changes.
    fn commit(&self, tenant_id: TenantId, batch: ScheduleBatch) -> Result<(), ScheduleStoreError>;

    /// Matching entries ordered by schedule date.
    fn entries(&self, tenant_id: TenantId, filter: &EntryFilter) -> Vec<ScheduleEntry>;

    fn is_planned(&self, tenant_id: TenantId, contract_id: ContractId, version: u32) -> bool;

    fn frozen(&self, tenant_id: TenantId) -> HashSet<ObligationId>;

    /// Stop accepting inserts bucketed into `period_id`. Close seals a period
    /// before it checks readiness, so no entry lands in it afterwards.
    fn seal_period(&self, tenant_id: TenantId, period_id: PeriodId) -> Result<(), ScheduleStoreError>;

    fn unseal_period(&self, tenant_id: TenantId, period_id: PeriodId) -> Result<(), ScheduleStoreError>;

    fn sealed(&self, tenant_id: TenantId) -> HashSet<PeriodId>;

    /// Post every `Scheduled` entry of a non-frozen obligation bucketed into
    /// one of `periods` with `schedule_date <= through`. Returns the entries
    /// that transitioned in this call.
    fn post_due(
        &self,
        tenant_id: TenantId,
        periods: &[PeriodId],
        through: NaiveDate,
        at: DateTime<Utc>,
    ) -> Result<Vec<ScheduleEntry>, ScheduleStoreError>;
}

impl<S> ScheduleStore for Arc<S>
where
    S: ScheduleStore + ?Sized,
{
    fn commit(&self, tenant_id: TenantId, batch: ScheduleBatch) -> Result<(), ScheduleStoreError> {
        (**self).commit(tenant_id, batch)
    }

    fn entries(&self, tenant_id: TenantId, filter: &EntryFilter) -> Vec<ScheduleEntry> {
        (**self).entries(tenant_id, filter)
    }

    fn is_planned(&self, tenant_id: TenantId, contract_id: ContractId, version: u32) -> bool {
        (**self).is_planned(tenant_id, contract_id, version)
    }

    fn frozen(&self, tenant_id: TenantId) -> HashSet<ObligationId> {
        (**self).frozen(tenant_id)
    }

    fn seal_period(&self, tenant_id: TenantId, period_id: PeriodId) -> Result<(), ScheduleStoreError> {
        (**self).seal_period(tenant_id, period_id)
    }

    fn unseal_period(&self, tenant_id: TenantId, period_id: PeriodId) -> Result<(), ScheduleStoreError> {
        (**self).unseal_period(tenant_id, period_id)
    }

    fn sealed(&self, tenant_id: TenantId) -> HashSet<PeriodId> {
        (**self).sealed(tenant_id)
    }

    fn post_due(
        &self,
        tenant_id: TenantId,
        periods: &[PeriodId],
        through: NaiveDate,
        at: DateTime<Utc>,
    ) -> Result<Vec<ScheduleEntry>, ScheduleStoreError> {
        (**self).post_due(tenant_id, periods, through, at)
    }
}
