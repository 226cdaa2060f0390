//! Turning committed contract versions into schedule batches.

use std::collections::HashSet;

use tracing::{info, warn};

use forgerev_contracts::{
    ContractVersion, ObligationId, PerformanceObligation, RecognitionMethod, RevenueContract,
};
use forgerev_core::{LedgerId, TenantId};
use forgerev_periods::{PeriodCalendar, PeriodStatus};
use forgerev_recognition::{EntryId, EntryStatus, PriorRecognition, ScheduleContext, ScheduleEntry};

use super::{EngineError, RevenueEngine};
use crate::event_store::EventStore;
use crate::schedule_store::{EntryFilter, LiveTotal, ScheduleBatch, ScheduleStore, ScheduleStoreError};

fn posted_total(entries: &[ScheduleEntry]) -> i64 {
    entries.iter().filter(|e| e.is_posted()).map(|e| e.amount).sum()
}

fn live_total(entries: &[ScheduleEntry]) -> i64 {
    entries.iter().filter(|e| e.is_live()).map(|e| e.amount).sum()
}

impl<S, Q> RevenueEngine<S, Q>
where
    S: EventStore,
    Q: ScheduleStore,
{
    /// Periods of one ledger, in date order. A period sealed by an
    /// in-flight close already counts as closed.
    pub fn calendar(&self, tenant_id: TenantId, ledger_id: &LedgerId) -> PeriodCalendar {
        let sealed = self.schedules.sealed(tenant_id);
        PeriodCalendar::new(
            self.periods
                .list(tenant_id)
                .iter()
                .filter(|p| p.ledger_id() == Some(ledger_id))
                .filter_map(|p| p.slot())
                .map(|mut slot| {
                    if sealed.contains(&slot.period_id) && slot.status.accepts_schedule() {
                        slot.status = PeriodStatus::Closed;
                    }
                    slot
                })
                .collect(),
        )
    }

    pub(crate) fn obligation_entries(&self, tenant_id: TenantId, obligation_id: ObligationId) -> Vec<ScheduleEntry> {
        self.schedules
            .entries(tenant_id, &EntryFilter::Obligation(obligation_id))
    }

    /// Milestones already recognised for `pob` anywhere in its version chain
    /// up to and including `through_version`.
    pub(crate) fn chain_milestones(
        &self,
        tenant_id: TenantId,
        contract: &RevenueContract,
        pob: &PerformanceObligation,
        through_version: u32,
    ) -> Vec<String> {
        let mut done: Vec<String> = Vec::new();
        for version in contract
            .versions()
            .iter()
            .filter(|v| v.version_number <= through_version && v.is_allocated())
        {
            let Some(link) = version
                .obligations
                .iter()
                .find(|o| o.obligation_id == pob.obligation_id || pob.continues(o))
            else {
                continue;
            };
            for m in link.terms.milestones.iter().filter(|m| m.completed_on.is_some()) {
                done.push(m.milestone_id.clone());
            }
            for e in self.obligation_entries(tenant_id, link.obligation_id) {
                if let (true, Some(id)) = (e.is_live(), e.milestone_id) {
                    done.push(id);
                }
            }
        }
        done.sort();
        done.dedup();
        done
    }

    /// Plan the schedule of allocated version `version_number` of `contract`.
    ///
    /// Obligations continuing one in the previous allocated version are
    /// planned as successors; the predecessor's unposted entries are retired
    /// and the predecessor frozen. Unposted entries dated before the
    /// modification are reissued on the successor with their original dates.
    pub(crate) fn plan_version(
        &self,
        tenant_id: TenantId,
        contract: &RevenueContract,
        version_number: u32,
    ) -> Result<ScheduleBatch, EngineError> {
        let header = contract
            .header()
            .ok_or_else(|| EngineError::not_found(format!("contract {}", contract.id_typed())))?;
        let version = contract
            .contract_version(version_number)
            .ok_or_else(|| EngineError::not_found(format!("contract version {version_number}")))?;
        let calendar = self.calendar(tenant_id, &header.ledger_id);
        let ctx = ScheduleContext {
            contract_id: contract.id_typed(),
            contract_version: version_number,
            source: version.source.clone(),
        };
        let predecessor: Option<&ContractVersion> = contract
            .versions()
            .iter()
            .filter(|v| v.version_number < version_number && v.is_allocated())
            .max_by_key(|v| v.version_number);

        let mut batch = ScheduleBatch {
            planned_version: Some((contract.id_typed(), version_number)),
            ..Default::default()
        };
        let mut continued: HashSet<ObligationId> = HashSet::new();

        for pob in &version.obligations {
            batch.expectations.push(LiveTotal {
                obligation_id: pob.obligation_id,
                live_total: 0,
            });

            let pred = predecessor.and_then(|p| p.obligations.iter().find(|o| pob.continues(o)));
            let Some(pred) = pred else {
                batch.insert.extend(self.scheduler.plan_initial(&ctx, pob, &calendar)?);
                continue;
            };

            continued.insert(pred.obligation_id);
            let pred_entries = self.obligation_entries(tenant_id, pred.obligation_id);
            // Usage facts move over through `reissue_usage` instead.
            let past_due = if pob.method() == RecognitionMethod::Usage {
                Vec::new()
            } else {
                pred_entries
                    .iter()
                    .filter(|e| e.status == EntryStatus::Scheduled && e.schedule_date < version.effective_date)
                    .cloned()
                    .collect()
            };
            let prior = PriorRecognition {
                posted_total: posted_total(&pred_entries),
                past_due,
                completed_milestones: self.chain_milestones(tenant_id, contract, pred, version_number - 1),
            };
            self.retire_and_freeze(&mut batch, pred.obligation_id, &pred_entries);

            let mut planned = self
                .scheduler
                .plan_successor(&ctx, pob, &prior, version.effective_date, &calendar)?;
            if pob.method() == RecognitionMethod::Usage {
                planned.extend(reissue_usage(&ctx, pob, &pred_entries, live_total(&planned)));
            }
            batch.insert.extend(planned);
        }

        if let Some(predecessor) = predecessor {
            for dropped in predecessor
                .obligations
                .iter()
                .filter(|o| !continued.contains(&o.obligation_id))
            {
                let entries = self.obligation_entries(tenant_id, dropped.obligation_id);
                if posted_total(&entries) != 0 {
                    return Err(EngineError::Validation(format!(
                        "line {} has recognised revenue and cannot be dropped from the contract",
                        dropped.line_no
                    )));
                }
                self.retire_and_freeze(&mut batch, dropped.obligation_id, &entries);
            }
        }

        Ok(batch)
    }

    pub(super) fn retire_and_freeze(&self, batch: &mut ScheduleBatch, obligation_id: ObligationId, entries: &[ScheduleEntry]) {
        batch.expectations.push(LiveTotal {
            obligation_id,
            live_total: live_total(entries),
        });
        batch.retire.extend(
            entries
                .iter()
                .filter(|e| e.status == EntryStatus::Scheduled)
                .map(|e| e.entry_id),
        );
        batch.freeze.push(obligation_id);
    }

    /// Commit a planned batch. If the schedule moved underneath (sweep posted
    /// a predecessor entry, usage arrived, a period was sealed for close) the
    /// plan is recomputed from fresh state, up to the configured retry count.
    /// A version someone else already planned is left as is.
    pub(crate) fn commit_plan(
        &self,
        tenant_id: TenantId,
        contract: &RevenueContract,
        version_number: u32,
        batch: ScheduleBatch,
    ) -> Result<(), EngineError> {
        let mut batch = batch;
        let mut attempt = 0;
        loop {
            attempt += 1;
            let inserted = batch.insert.len();
            match self.schedules.commit(tenant_id, batch) {
                Ok(()) => {
                    info!(
                        tenant_id = %tenant_id,
                        contract_id = %contract.id_typed(),
                        version = version_number,
                        entries = inserted,
                        "schedule committed"
                    );
                    return Ok(());
                }
                Err(ScheduleStoreError::AlreadyPlanned { .. }) => return Ok(()),
                Err(err)
                    if (err.is_conflict() || matches!(err, ScheduleStoreError::Schedule(_)))
                        && attempt <= self.config.version_conflict_retries =>
                {
                    warn!(
                        tenant_id = %tenant_id,
                        contract_id = %contract.id_typed(),
                        version = version_number,
                        reason = %err,
                        "schedule changed during planning, replanning"
                    );
                    batch = self.plan_version(tenant_id, contract, version_number)?;
                }
                Err(err) if err.is_conflict() => {
                    return Err(EngineError::VersionConflict {
                        reference: format!("contract {} v{version_number} schedule", contract.id_typed()),
                        attempts: attempt,
                    });
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// Generate the schedule of an allocated version if it has none yet.
    pub(crate) fn ensure_schedule(
        &self,
        tenant_id: TenantId,
        contract: &RevenueContract,
        version_number: u32,
    ) -> Result<(), EngineError> {
        if self.schedules.is_planned(tenant_id, contract.id_typed(), version_number) {
            return Ok(());
        }
        let batch = self.plan_version(tenant_id, contract, version_number)?;
        self.commit_plan(tenant_id, contract, version_number, batch)
    }
}

/// Usage facts scheduled on the predecessor but not yet swept move to the
/// successor, truncated to what its allocation still allows.
fn reissue_usage(
    ctx: &ScheduleContext,
    pob: &PerformanceObligation,
    pred_entries: &[ScheduleEntry],
    already_live: i64,
) -> Vec<ScheduleEntry> {
    let Some(allocated) = pob.allocated_price else {
        return Vec::new();
    };
    let mut headroom = allocated.saturating_sub(already_live);
    let mut out = Vec::new();
    for e in pred_entries.iter().filter(|e| e.status == EntryStatus::Scheduled) {
        if headroom <= 0 {
            break;
        }
        let amount = e.amount.min(headroom);
        headroom -= amount;
        out.push(ScheduleEntry {
            entry_id: EntryId::new(),
            contract_id: ctx.contract_id,
            contract_version: ctx.contract_version,
            obligation_id: pob.obligation_id,
            amount,
            status: EntryStatus::Scheduled,
            carried_forward: false,
            posted_at: None,
            ..e.clone()
        });
    }
    out
}
