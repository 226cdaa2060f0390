//! Contract drafting, allocation, cancellation and contract-level reads.

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use forgerev_catalog::{SspBookId, SspLineId};
use forgerev_contracts::{
    CancelContract, ContractHeader, ContractId, ContractLine, ContractNumber, DraftVersion, ObligationStatus,
    PerformanceObligation, RecordAllocation, RevenueContract, RevenueContractCommand, SourceEventKey, VersionStatus,
    allocate,
};
use forgerev_core::{AggregateId, Currency, LedgerId, TenantId};
use forgerev_events::execute;
use forgerev_recognition::{ScheduleEntry, obligation_status};

use super::{EngineError, RevenueEngine, new_contract};
use crate::event_store::EventStore;
use crate::read_model::TenantStore;
use crate::schedule_store::{EntryFilter, ScheduleBatch, ScheduleStore};

/// Caller-facing description of a contract version to draft.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractDraft {
    pub contract_number: String,
    pub customer_id: String,
    pub legal_entity_id: String,
    pub org_id: String,
    pub ledger_id: String,
    pub currency: String,
    pub transaction_price: i64,
    pub effective_date: NaiveDate,
    #[serde(default)]
    pub ssp_book: Option<SspBookId>,
    pub lines: Vec<ContractLine>,
}

impl ContractDraft {
    fn header(&self) -> Result<ContractHeader, EngineError> {
        Ok(ContractHeader {
            contract_number: ContractNumber::new(self.contract_number.as_str())?,
            customer_id: self.customer_id.clone(),
            legal_entity_id: self.legal_entity_id.clone(),
            org_id: self.org_id.clone(),
            ledger_id: LedgerId::new(self.ledger_id.as_str())?,
            currency: Currency::parse(&self.currency)?,
        })
    }

    pub(super) fn to_command(
        &self,
        tenant_id: TenantId,
        contract_id: ContractId,
        source: Option<SourceEventKey>,
    ) -> Result<DraftVersion, EngineError> {
        Ok(DraftVersion {
            tenant_id,
            contract_id,
            header: self.header()?,
            transaction_price: self.transaction_price,
            effective_date: self.effective_date,
            ssp_book: self.ssp_book,
            source,
            lines: self.lines.clone(),
            occurred_at: Utc::now(),
        })
    }
}

/// An obligation with recognition progress derived from its schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObligationView {
    pub obligation: PerformanceObligation,
    pub status: ObligationStatus,
    pub posted_total: i64,
    pub scheduled_total: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeferredRevenue {
    pub contract_id: ContractId,
    pub contract_number: ContractNumber,
    pub currency: Currency,
    pub total_allocated: i64,
    pub recognized_to_date: i64,
    pub deferred: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeferredRevenueSummary {
    pub contracts: Vec<DeferredRevenue>,
    /// Sum over contracts; only meaningful when they share a currency.
    pub total: i64,
}

/// Allocation computed against a preview of the contract, waiting for the
/// contract command to commit.
pub(super) struct StagedPlan {
    pub(super) version_number: u32,
    pub(super) batch: ScheduleBatch,
    pub(super) referenced: Vec<(SspBookId, SspLineId)>,
}

impl<S, Q> RevenueEngine<S, Q>
where
    S: EventStore,
    Q: ScheduleStore,
{
    /// Draft a new contract or a modification of an existing one (matched by
    /// contract number). The version stays `Draft` until allocated.
    pub fn draft_contract(&self, tenant_id: TenantId, draft: &ContractDraft) -> Result<RevenueContract, EngineError> {
        let number = ContractNumber::new(draft.contract_number.as_str())?;
        let contract_id = self.resolve_contract_id(tenant_id, &number);
        let command = draft.to_command(tenant_id, contract_id, None)?;
        let out = self.run(tenant_id, contract_id.0, &self.contracts, new_contract, |_| {
            Ok(RevenueContractCommand::DraftVersion(command.clone()))
        })?;
        self.register_contract(tenant_id, number, contract_id)?;
        info!(
            tenant_id = %tenant_id,
            contract_id = %contract_id,
            contract_number = %draft.contract_number,
            version = out.aggregate.latest_version().map(|v| v.version_number),
            "contract version drafted"
        );
        Ok(out.aggregate)
    }

    /// Id already registered for the number, or a fresh one. A fresh id is
    /// only published by `register_contract` once its first version commits.
    pub(super) fn resolve_contract_id(&self, tenant_id: TenantId, number: &ContractNumber) -> ContractId {
        self.directory
            .get(tenant_id, number)
            .unwrap_or_else(|| ContractId::new(AggregateId::new()))
    }

    pub(super) fn register_contract(
        &self,
        tenant_id: TenantId,
        number: ContractNumber,
        contract_id: ContractId,
    ) -> Result<(), EngineError> {
        let registered = self.directory.insert_if_absent(tenant_id, number.clone(), contract_id);
        if registered != contract_id {
            return Err(EngineError::Conflict(format!(
                "contract number {number} was registered concurrently"
            )));
        }
        Ok(())
    }

    /// Allocate the contract's draft version and generate its schedule.
    ///
    /// A contract whose active version was committed without a schedule
    /// (interrupted run) gets the schedule generated instead.
    #[instrument(skip_all, fields(tenant_id = %tenant_id, contract_id = %contract_id), err)]
    pub fn allocate_contract(&self, tenant_id: TenantId, contract_id: ContractId) -> Result<RevenueContract, EngineError> {
        let existing = self.contract(tenant_id, contract_id)?;
        let has_draft = existing
            .latest_version()
            .is_some_and(|v| v.status == VersionStatus::Draft);
        if !has_draft {
            if let Some(active) = existing.active_version() {
                if !self.schedules.is_planned(tenant_id, contract_id, active.version_number) {
                    self.ensure_schedule(tenant_id, &existing, active.version_number)?;
                    return Ok(existing);
                }
            }
            return Err(EngineError::Conflict(format!("contract {contract_id} has no draft version to allocate")));
        }

        let mut staged: Option<StagedPlan> = None;
        let out = self.run(tenant_id, contract_id.0, &self.contracts, new_contract, |current| {
            let (command, plan) = self.stage_allocation(tenant_id, current)?;
            staged = Some(plan);
            Ok(command)
        });
        let out = match out {
            Ok(out) => out,
            Err(err) => {
                warn!(tenant_id = %tenant_id, contract_id = %contract_id, code = err.code(), error = %err, "allocation failed");
                return Err(err);
            }
        };
        let plan = staged.ok_or_else(|| EngineError::Invariant("allocation committed without a plan".into()))?;
        self.commit_plan(tenant_id, &out.aggregate, plan.version_number, plan.batch)?;
        self.mark_lines_referenced(tenant_id, &plan.referenced)?;

        let total = out.aggregate.active_version().map(|v| v.total_allocated).unwrap_or_default();
        info!(
            tenant_id = %tenant_id,
            contract_id = %contract_id,
            version = plan.version_number,
            total_allocated = total,
            "contract allocated"
        );
        Ok(out.aggregate)
    }

    /// Allocate the latest draft of `current` and plan its schedule on a
    /// preview of the post-commit contract.
    pub(super) fn stage_allocation(
        &self,
        tenant_id: TenantId,
        current: &RevenueContract,
    ) -> Result<(RevenueContractCommand, StagedPlan), EngineError> {
        let contract_id = current.id_typed();
        let draft = current
            .latest_version()
            .filter(|v| v.status == VersionStatus::Draft)
            .ok_or_else(|| EngineError::Conflict(format!("contract {contract_id} has no draft version to allocate")))?;
        let header = current
            .header()
            .ok_or_else(|| EngineError::not_found(format!("contract {contract_id}")))?;
        let outcome = allocate(draft, &header.currency, &self.ssp_catalog(tenant_id))?;

        let command = RevenueContractCommand::RecordAllocation(RecordAllocation {
            tenant_id,
            contract_id,
            version_number: draft.version_number,
            allocations: outcome.lines.clone(),
            occurred_at: Utc::now(),
        });
        let mut preview = current.clone();
        execute(&mut preview, &command)?;
        let plan = StagedPlan {
            version_number: draft.version_number,
            batch: self.plan_version(tenant_id, &preview, draft.version_number)?,
            referenced: outcome.referenced_ssp_lines(),
        };
        Ok((command, plan))
    }

    /// Cancel the contract. Unposted entries are retired; posted revenue stays.
    pub fn cancel_contract(
        &self,
        tenant_id: TenantId,
        contract_id: ContractId,
        reason: &str,
    ) -> Result<RevenueContract, EngineError> {
        self.contract(tenant_id, contract_id)?;
        let out = self.run(tenant_id, contract_id.0, &self.contracts, new_contract, |_| {
            Ok(RevenueContractCommand::CancelContract(CancelContract {
                tenant_id,
                contract_id,
                reason: reason.to_string(),
                occurred_at: Utc::now(),
            }))
        })?;

        let mut attempt = 0;
        loop {
            attempt += 1;
            let mut batch = ScheduleBatch::default();
            let mut obligations: Vec<_> = out
                .aggregate
                .versions()
                .iter()
                .flat_map(|v| v.obligations.iter().map(|o| o.obligation_id))
                .collect();
            obligations.sort();
            obligations.dedup();
            for obligation_id in obligations {
                let entries = self.obligation_entries(tenant_id, obligation_id);
                self.retire_and_freeze(&mut batch, obligation_id, &entries);
            }
            match self.schedules.commit(tenant_id, batch) {
                Ok(()) => break,
                Err(err) if err.is_conflict() && attempt <= self.config.version_conflict_retries => {
                    warn!(tenant_id = %tenant_id, contract_id = %contract_id, reason = %err, "retrying schedule retirement");
                }
                Err(err) => return Err(err.into()),
            }
        }

        info!(tenant_id = %tenant_id, contract_id = %contract_id, reason, "contract cancelled");
        Ok(out.aggregate)
    }

    pub fn contract(&self, tenant_id: TenantId, contract_id: ContractId) -> Result<RevenueContract, EngineError> {
        self.contracts
            .get(tenant_id, contract_id.0)
            .filter(RevenueContract::is_created)
            .ok_or_else(|| EngineError::not_found(format!("contract {contract_id}")))
    }

    pub fn contract_by_number(&self, tenant_id: TenantId, contract_number: &str) -> Option<RevenueContract> {
        let contract_id = self.lookup_contract_id(tenant_id, contract_number)?;
        self.contract(tenant_id, contract_id).ok()
    }

    /// Directory entry for a contract number.
    pub fn lookup_contract_id(&self, tenant_id: TenantId, contract_number: &str) -> Option<ContractId> {
        let number = ContractNumber::new(contract_number).ok()?;
        self.directory.get(tenant_id, &number)
    }

    /// All contracts, ordered by contract number.
    pub fn contracts(&self, tenant_id: TenantId) -> Vec<RevenueContract> {
        let mut all: Vec<RevenueContract> = self
            .contracts
            .list(tenant_id)
            .into_iter()
            .filter(RevenueContract::is_created)
            .collect();
        all.sort_by(|a, b| {
            let key = |c: &RevenueContract| c.header().map(|h| h.contract_number.clone());
            key(a).cmp(&key(b))
        });
        all
    }

    /// Obligations of a version (the current one when `version` is `None`).
    pub fn obligations(
        &self,
        tenant_id: TenantId,
        contract_id: ContractId,
        version: Option<u32>,
    ) -> Result<Vec<ObligationView>, EngineError> {
        let contract = self.contract(tenant_id, contract_id)?;
        let selected = match version {
            Some(n) => contract.contract_version(n),
            None => contract.current_version().or_else(|| contract.latest_version()),
        }
        .ok_or_else(|| EngineError::not_found(format!("version of contract {contract_id}")))?;

        Ok(selected
            .obligations
            .iter()
            .map(|pob| {
                let entries = self.obligation_entries(tenant_id, pob.obligation_id);
                ObligationView {
                    obligation: pob.clone(),
                    status: obligation_status(pob, &entries),
                    posted_total: entries.iter().filter(|e| e.is_posted()).map(|e| e.amount).sum(),
                    scheduled_total: entries.iter().filter(|e| e.is_live()).map(|e| e.amount).sum(),
                }
            })
            .collect())
    }

    /// Every schedule entry of the contract across versions, by date.
    pub fn contract_schedule(&self, tenant_id: TenantId, contract_id: ContractId) -> Vec<ScheduleEntry> {
        self.schedules.entries(tenant_id, &EntryFilter::Contract(contract_id))
    }

    /// Allocated revenue not yet recognized.
    pub fn deferred_revenue(&self, tenant_id: TenantId, contract_id: ContractId) -> Result<DeferredRevenue, EngineError> {
        let contract = self.contract(tenant_id, contract_id)?;
        self.deferred_for(tenant_id, &contract)
            .ok_or_else(|| EngineError::not_found(format!("contract {contract_id}")))
    }

    pub fn deferred_revenue_summary(&self, tenant_id: TenantId) -> DeferredRevenueSummary {
        let contracts: Vec<DeferredRevenue> = self
            .contracts(tenant_id)
            .iter()
            .filter_map(|c| self.deferred_for(tenant_id, c))
            .collect();
        let total = contracts.iter().map(|d| d.deferred).sum();
        DeferredRevenueSummary { contracts, total }
    }

    fn deferred_for(&self, tenant_id: TenantId, contract: &RevenueContract) -> Option<DeferredRevenue> {
        let header = contract.header()?;
        let recognized_to_date: i64 = self
            .contract_schedule(tenant_id, contract.id_typed())
            .iter()
            .filter(|e| e.is_posted() && !e.carried_forward)
            .map(|e| e.amount)
            .sum();
        let total_allocated = contract
            .active_version()
            .map(|v| v.total_allocated)
            .unwrap_or(recognized_to_date);
        Some(DeferredRevenue {
            contract_id: contract.id_typed(),
            contract_number: header.contract_number.clone(),
            currency: header.currency.clone(),
            total_allocated,
            recognized_to_date,
            deferred: total_allocated - recognized_to_date,
        })
    }
}
