use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::RwLock;

use chrono::{DateTime, NaiveDate, Utc};

use forgerev_contracts::{ContractId, ObligationId};
use forgerev_core::{Entity, TenantId};
use forgerev_periods::PeriodId;
use forgerev_recognition::{EntryId, EntryStatus, ScheduleEntry};

use super::{EntryFilter, ScheduleBatch, ScheduleStore, ScheduleStoreError};

#[derive(Debug, Default)]
struct TenantSchedule {
    entries: BTreeMap<EntryId, ScheduleEntry>,
    frozen: HashSet<ObligationId>,
    sealed: HashSet<PeriodId>,
    planned: HashSet<(ContractId, u32)>,
}

impl TenantSchedule {
    fn live_total(&self, obligation_id: ObligationId) -> i64 {
        self.entries
            .values()
            .filter(|e| e.obligation_id == obligation_id && e.is_live())
            .map(|e| e.amount)
            .sum()
    }

    fn validate(&self, batch: &ScheduleBatch) -> Result<(), ScheduleStoreError> {
        if let Some((contract_id, version)) = batch.planned_version {
            if self.planned.contains(&(contract_id, version)) {
                return Err(ScheduleStoreError::AlreadyPlanned { contract_id, version });
            }
        }
        for exp in &batch.expectations {
            let found = self.live_total(exp.obligation_id);
            if found != exp.live_total {
                return Err(ScheduleStoreError::StaleObligation {
                    obligation_id: exp.obligation_id,
                    expected: exp.live_total,
                    found,
                });
            }
        }
        for entry_id in &batch.retire {
            let mut retired = self
                .entries
                .get(entry_id)
                .cloned()
                .ok_or(ScheduleStoreError::UnknownEntry(*entry_id))?;
            retired.retire()?;
        }
        let mut seen = HashSet::new();
        for entry in &batch.insert {
            let id = *entry.id();
            if self.entries.contains_key(&id) || !seen.insert(id) {
                return Err(ScheduleStoreError::DuplicateEntry(id));
            }
            if self.sealed.contains(&entry.period_id) {
                return Err(ScheduleStoreError::PeriodSealed {
                    period_id: entry.period_id,
                    entry_id: id,
                });
            }
        }
        Ok(())
    }
}

/// In-memory schedule store; one lock per store, batches applied under it.
#[derive(Debug, Default)]
pub struct InMemoryScheduleStore {
    tenants: RwLock<HashMap<TenantId, TenantSchedule>>,
}

impl InMemoryScheduleStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ScheduleStore for InMemoryScheduleStore {
    fn commit(&self, tenant_id: TenantId, batch: ScheduleBatch) -> Result<(), ScheduleStoreError> {
        let mut tenants = self.tenants.write().map_err(|_| ScheduleStoreError::Poisoned)?;
        let schedule = tenants.entry(tenant_id).or_default();
        schedule.validate(&batch)?;

        for entry_id in &batch.retire {
            if let Some(entry) = schedule.entries.get_mut(entry_id) {
                entry.retire()?;
            }
        }
        for entry in batch.insert {
            schedule.entries.insert(*entry.id(), entry);
        }
        schedule.frozen.extend(batch.freeze);
        if let Some(planned) = batch.planned_version {
            schedule.planned.insert(planned);
        }
        Ok(())
    }

    fn entries(&self, tenant_id: TenantId, filter: &EntryFilter) -> Vec<ScheduleEntry> {
        let Ok(tenants) = self.tenants.read() else {
            return vec![];
        };
        let mut out: Vec<ScheduleEntry> = tenants
            .get(&tenant_id)
            .map(|s| s.entries.values().filter(|e| filter.matches(e)).cloned().collect())
            .unwrap_or_default();
        out.sort_by_key(|e| (e.schedule_date, e.entry_id));
        out
    }

    fn is_planned(&self, tenant_id: TenantId, contract_id: ContractId, version: u32) -> bool {
        self.tenants
            .read()
            .map(|t| {
                t.get(&tenant_id)
                    .is_some_and(|s| s.planned.contains(&(contract_id, version)))
            })
            .unwrap_or(false)
    }

    fn frozen(&self, tenant_id: TenantId) -> HashSet<ObligationId> {
        self.tenants
            .read()
            .ok()
            .and_then(|t| t.get(&tenant_id).map(|s| s.frozen.clone()))
            .unwrap_or_default()
    }

    fn seal_period(&self, tenant_id: TenantId, period_id: PeriodId) -> Result<(), ScheduleStoreError> {
        let mut tenants = self.tenants.write().map_err(|_| ScheduleStoreError::Poisoned)?;
        tenants.entry(tenant_id).or_default().sealed.insert(period_id);
        Ok(())
    }

    fn unseal_period(&self, tenant_id: TenantId, period_id: PeriodId) -> Result<(), ScheduleStoreError> {
        let mut tenants = self.tenants.write().map_err(|_| ScheduleStoreError::Poisoned)?;
        if let Some(schedule) = tenants.get_mut(&tenant_id) {
            schedule.sealed.remove(&period_id);
        }
        Ok(())
    }

    fn sealed(&self, tenant_id: TenantId) -> HashSet<PeriodId> {
        self.tenants
            .read()
            .ok()
            .and_then(|t| t.get(&tenant_id).map(|s| s.sealed.clone()))
            .unwrap_or_default()
    }

    fn post_due(
        &self,
        tenant_id: TenantId,
        periods: &[PeriodId],
        through: NaiveDate,
        at: DateTime<Utc>,
    ) -> Result<Vec<ScheduleEntry>, ScheduleStoreError> {
        let mut tenants = self.tenants.write().map_err(|_| ScheduleStoreError::Poisoned)?;
        let Some(schedule) = tenants.get_mut(&tenant_id) else {
            return Ok(vec![]);
        };

        let TenantSchedule { entries, frozen, .. } = schedule;
        let mut posted = Vec::new();
        for entry in entries.values_mut() {
            if periods.contains(&entry.period_id)
                && entry.status == EntryStatus::Scheduled
                && entry.schedule_date <= through
                && !frozen.contains(&entry.obligation_id)
            {
                entry.post(at)?;
                posted.push(entry.clone());
            }
        }
        posted.sort_by_key(|e| (e.schedule_date, e.entry_id));
        Ok(posted)
    }
}
