//! Period sweep, close readiness and close.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use forgerev_contracts::{ContractId, ObligationId, RevenueContract, VersionStatus};
use forgerev_core::{Currency, LedgerId, TenantId, UserId};
use forgerev_events::EventBus;
use forgerev_intake::{ProcessingStatus, SourceEvent, SourcePayload};
use forgerev_periods::{
    ClosePeriod, CloseException, CloseExceptionKind, CloseReadiness, Period, PeriodCommand, PeriodId, PeriodStatus,
};
use forgerev_recognition::{EntryId, EntryStatus, ScheduleEntry, ScheduleEventType};

use super::{EngineError, RevenueEngine, new_period};
use crate::event_store::EventStore;
use crate::read_model::TenantStore;
use crate::schedule_store::{EntryFilter, ScheduleStore};

/// Per-period mutual exclusion between sweep and close.
#[derive(Debug, Default)]
pub struct PeriodLocks {
    inner: Mutex<HashMap<(TenantId, PeriodId), Arc<Mutex<()>>>>,
}

impl PeriodLocks {
    pub(super) fn handle(&self, tenant_id: TenantId, period_id: PeriodId) -> Result<Arc<Mutex<()>>, EngineError> {
        let mut map = self
            .inner
            .lock()
            .map_err(|_| EngineError::Infrastructure("period lock table poisoned".into()))?;
        Ok(map.entry((tenant_id, period_id)).or_default().clone())
    }
}

pub(super) fn acquire(lock: &Mutex<()>) -> Result<MutexGuard<'_, ()>, EngineError> {
    lock.lock()
        .map_err(|_| EngineError::Infrastructure("period lock poisoned".into()))
}

/// Record handed to the GL subledger for each entry a sweep posts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostableEntry {
    pub tenant_id: TenantId,
    pub period_id: PeriodId,
    pub contract_id: ContractId,
    pub contract_version: u32,
    pub obligation_id: ObligationId,
    pub entry_id: EntryId,
    pub amount: i64,
    pub event_type: ScheduleEventType,
    pub currency: Currency,
    pub schedule_date: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    pub period_id: PeriodId,
    pub newly_posted: Vec<PostableEntry>,
    /// Revenue posted into the period so far, including earlier sweeps.
    pub posted_total: i64,
    /// Allocated billing events dated in the period for the same contracts.
    pub billed_total: i64,
    /// `posted_total - billed_total`; negative when billing runs ahead.
    pub unbilled_accrual: i64,
    pub contracts: Vec<ContractId>,
}

fn revenue_in(entries: &[ScheduleEntry]) -> i64 {
    entries
        .iter()
        .filter(|e| e.is_posted() && !e.carried_forward)
        .map(|e| e.amount)
        .sum()
}

fn within(date: NaiveDate, start: NaiveDate, end: NaiveDate) -> bool {
    start <= date && date <= end
}

impl<S, Q> RevenueEngine<S, Q>
where
    S: EventStore,
    Q: ScheduleStore,
{
    fn open_period_bounds(&self, tenant_id: TenantId, period_id: PeriodId) -> Result<(Period, NaiveDate, NaiveDate), EngineError> {
        let period = self.period(tenant_id, period_id)?;
        let (Some(start), Some(end)) = (period.start(), period.end()) else {
            return Err(EngineError::not_found(format!("period {period_id}")));
        };
        Ok((period, start, end))
    }

    /// Post every scheduled entry of the period's ledger dated on or before
    /// its end and hand the newly posted ones to the GL. Entries still due in
    /// earlier open periods are posted too. Running it twice posts nothing
    /// the second time.
    #[instrument(skip_all, fields(tenant_id = %tenant_id, period_id = %period_id), err)]
    pub fn sweep(&self, tenant_id: TenantId, period_id: PeriodId) -> Result<SweepReport, EngineError> {
        let lock = self.period_locks.handle(tenant_id, period_id)?;
        let _guard = acquire(&lock)?;

        let (period, start, end) = self.open_period_bounds(tenant_id, period_id)?;
        if period.status() != PeriodStatus::Open {
            return Err(EngineError::Invariant(format!(
                "period '{}' is {:?}; only open periods can be swept",
                period.name(),
                period.status()
            )));
        }

        let scope: Vec<PeriodId> = self
            .periods(tenant_id, period.ledger_id())
            .iter()
            .filter(|p| p.status() == PeriodStatus::Open)
            .map(Period::id_typed)
            .collect();
        let posted = self.schedules.post_due(tenant_id, &scope, end, Utc::now())?;
        let mut currencies: HashMap<ContractId, Option<Currency>> = HashMap::new();
        let mut newly_posted = Vec::with_capacity(posted.len());
        for entry in posted.iter().filter(|e| !e.carried_forward) {
            let currency = currencies
                .entry(entry.contract_id)
                .or_insert_with(|| {
                    self.contracts
                        .get(tenant_id, entry.contract_id.0)
                        .and_then(|c| c.header().map(|h| h.currency.clone()))
                })
                .clone();
            let Some(currency) = currency else {
                warn!(tenant_id = %tenant_id, contract_id = %entry.contract_id, "posted entry for unknown contract");
                continue;
            };
            let postable = PostableEntry {
                tenant_id,
                period_id: entry.period_id,
                contract_id: entry.contract_id,
                contract_version: entry.contract_version,
                obligation_id: entry.obligation_id,
                entry_id: entry.entry_id,
                amount: entry.amount,
                event_type: entry.event_type,
                currency,
                schedule_date: entry.schedule_date,
            };
            if let Err(err) = self.postings.publish(postable.clone()) {
                warn!(tenant_id = %tenant_id, entry_id = %entry.entry_id, error = ?err, "postable entry not delivered");
            }
            newly_posted.push(postable);
        }

        let in_period = self.schedules.entries(tenant_id, &EntryFilter::Period(period_id));
        let posted_total = revenue_in(&in_period);
        let contracts: BTreeSet<ContractId> = in_period
            .iter()
            .filter(|e| e.is_posted() && !e.carried_forward)
            .map(|e| e.contract_id)
            .collect();
        let billed_total: i64 = self
            .source_events
            .list(tenant_id)
            .iter()
            .filter(|ev| matches!(ev.payload, SourcePayload::Billing { .. }) && ev.is_allocated())
            .filter(|ev| within(ev.event_date, start, end))
            .filter(|ev| ev.link.as_ref().is_some_and(|l| contracts.contains(&l.contract_id)))
            .map(|ev| ev.amount.amount)
            .sum();

        info!(
            tenant_id = %tenant_id,
            period_id = %period_id,
            posted = newly_posted.len(),
            posted_total,
            billed_total,
            "period swept"
        );

        Ok(SweepReport {
            period_id,
            newly_posted,
            posted_total,
            billed_total,
            unbilled_accrual: posted_total - billed_total,
            contracts: contracts.into_iter().collect(),
        })
    }

    /// Everything that currently blocks closing the period.
    pub fn can_close(&self, tenant_id: TenantId, period_id: PeriodId) -> Result<CloseReadiness, EngineError> {
        let (period, start, end) = self.open_period_bounds(tenant_id, period_id)?;
        let mut exceptions = Vec::new();

        if period.status() != PeriodStatus::Open {
            exceptions.push(CloseException {
                kind: CloseExceptionKind::PeriodNotOpen,
                reference: format!("{:?}", period.status()),
                amount: 0,
            });
        }

        let frozen = self.schedules.frozen(tenant_id);
        let ledger_periods: HashSet<PeriodId> = self
            .periods(tenant_id, period.ledger_id())
            .iter()
            .map(Period::id_typed)
            .collect();
        exceptions.extend(
            self.schedules
                .entries(tenant_id, &EntryFilter::All)
                .into_iter()
                .filter(|e| e.status == EntryStatus::Scheduled && e.schedule_date <= end)
                .filter(|e| ledger_periods.contains(&e.period_id))
                .filter(|e| !frozen.contains(&e.obligation_id))
                .map(|e| CloseException {
                    kind: CloseExceptionKind::UnsweptEntry,
                    reference: e.entry_id.to_string(),
                    amount: e.amount,
                }),
        );

        let ledger = period.ledger_id().cloned();
        for ev in self.source_events.list(tenant_id) {
            if !within(ev.event_date, start, end) || !self.attributable(tenant_id, &ev, ledger.as_ref()) {
                continue;
            }
            let kind = match &ev.processing_status {
                ProcessingStatus::Pending => CloseExceptionKind::SourceEventPending,
                ProcessingStatus::Error { .. } => CloseExceptionKind::SourceEventError,
                ProcessingStatus::Allocated => continue,
            };
            exceptions.push(CloseException {
                kind,
                reference: ev.key.to_string(),
                amount: ev.amount.amount,
            });
        }

        for contract in self.contracts.list(tenant_id) {
            if contract.is_cancelled() || !same_ledger(&contract, ledger.as_ref()) {
                continue;
            }
            let Some(current) = contract.current_version() else {
                continue;
            };
            if current.status == VersionStatus::Draft && current.effective_date <= end {
                exceptions.push(CloseException {
                    kind: CloseExceptionKind::IncompleteAllocation,
                    reference: format!(
                        "{} v{}",
                        contract.header().map(|h| h.contract_number.to_string()).unwrap_or_default(),
                        current.version_number
                    ),
                    amount: current.transaction_price,
                });
            }
        }

        Ok(CloseReadiness::from_exceptions(period_id, exceptions))
    }

    fn attributable(&self, tenant_id: TenantId, ev: &SourceEvent, ledger: Option<&LedgerId>) -> bool {
        let Some(ledger) = ledger else {
            return true;
        };
        if let SourcePayload::Order(order) = &ev.payload {
            return order.ledger_id == ledger.as_str();
        }
        match self.contract_by_number(tenant_id, ev.contract_number()) {
            Some(contract) => same_ledger(&contract, Some(ledger)),
            None => true,
        }
    }

    /// Close the period if nothing blocks it; otherwise report why not.
    ///
    /// The schedule store stops accepting entries for the period before
    /// readiness is checked, so a plan committing concurrently either lands
    /// first and is seen by the check, or is rejected and replanned.
    #[instrument(skip_all, fields(tenant_id = %tenant_id, period_id = %period_id), err)]
    pub fn close_period(&self, tenant_id: TenantId, period_id: PeriodId, actor: Option<UserId>) -> Result<Period, EngineError> {
        let lock = self.period_locks.handle(tenant_id, period_id)?;
        let _guard = acquire(&lock)?;

        self.schedules.seal_period(tenant_id, period_id)?;
        let closed = self.close_sealed(tenant_id, period_id, actor);
        if closed.is_err() {
            if let Err(err) = self.schedules.unseal_period(tenant_id, period_id) {
                warn!(tenant_id = %tenant_id, period_id = %period_id, error = %err, "period left sealed after failed close");
            }
        }
        closed
    }

    fn close_sealed(&self, tenant_id: TenantId, period_id: PeriodId, actor: Option<UserId>) -> Result<Period, EngineError> {
        let readiness = self.can_close(tenant_id, period_id)?;
        if !readiness.allowed {
            warn!(
                tenant_id = %tenant_id,
                period_id = %period_id,
                exceptions = readiness.exceptions.len(),
                "period close refused"
            );
            return Err(EngineError::PeriodNotReady {
                period_id,
                exceptions: readiness.exceptions,
            });
        }

        let out = self.run(tenant_id, period_id.0, &self.periods, new_period, |_| {
            Ok(PeriodCommand::Close(ClosePeriod {
                tenant_id,
                period_id,
                readiness: readiness.clone(),
                actor,
                occurred_at: Utc::now(),
            }))
        })?;
        info!(tenant_id = %tenant_id, period_id = %period_id, "period closed");
        Ok(out.aggregate)
    }
}

fn same_ledger(contract: &RevenueContract, ledger: Option<&LedgerId>) -> bool {
    match (contract.header(), ledger) {
        (_, None) => true,
        (Some(h), Some(l)) => &h.ledger_id == l,
        (None, Some(_)) => false,
    }
}
