//! Source-event intake: orders, usage, milestone completions and billing.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use forgerev_contracts::{
    ContractNumber, DraftAndAllocate, ObligationId, PerformanceObligation, RevenueContract, RevenueContractCommand,
    SourceEventKey, VersionStatus,
};
use forgerev_core::TenantId;
use forgerev_events::execute;
use forgerev_intake::{ContractLink, OrderPayload, ProcessingStatus, SourceEvent, SourceEventInput, SourcePayload};
use forgerev_recognition::{ScheduleContext, ScheduleEntry};

use super::{ContractDraft, EngineError, RevenueEngine, new_contract};
use crate::event_store::EventStore;
use crate::read_model::TenantStore;
use crate::schedule_store::{LiveTotal, ScheduleBatch, ScheduleStore};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestOutcome {
    pub event: SourceEvent,
    /// The key was already allocated; nothing was reprocessed.
    pub duplicate: bool,
}

impl<S, Q> RevenueEngine<S, Q>
where
    S: EventStore,
    Q: ScheduleStore,
{
    /// Accept a source event and process it.
    ///
    /// Malformed input is rejected without being stored. A well-formed event
    /// is always recorded; if processing fails it is kept in `Error` and can
    /// be resubmitted under the same key.
    #[instrument(
        skip_all,
        fields(tenant_id = %tenant_id, source_system = %input.source_system, source_id = %input.source_id),
        err
    )]
    pub fn ingest(&self, tenant_id: TenantId, input: SourceEventInput) -> Result<IngestOutcome, EngineError> {
        let mut event = SourceEvent::validate(input, Utc::now())?;
        if let Some(existing) = self.source_events.get(tenant_id, &event.key) {
            if existing.is_allocated() {
                info!(tenant_id = %tenant_id, source = %existing.key, "source event already processed");
                return Ok(IngestOutcome {
                    event: existing,
                    duplicate: true,
                });
            }
            event.attempts = existing.attempts;
        }
        self.attempt(tenant_id, event)
    }

    /// Reprocess a stored event that is still pending or in error.
    pub fn retry_source_event(&self, tenant_id: TenantId, key: &SourceEventKey) -> Result<IngestOutcome, EngineError> {
        let event = self
            .source_events
            .get(tenant_id, key)
            .ok_or_else(|| EngineError::not_found(format!("source event {key}")))?;
        if event.is_allocated() {
            return Ok(IngestOutcome { event, duplicate: true });
        }
        self.attempt(tenant_id, event)
    }

    pub fn source_event(&self, tenant_id: TenantId, key: &SourceEventKey) -> Option<SourceEvent> {
        self.source_events.get(tenant_id, key)
    }

    /// Stored events, optionally only those in error, by event date.
    pub fn source_events(&self, tenant_id: TenantId, errors_only: bool) -> Vec<SourceEvent> {
        let mut events: Vec<SourceEvent> = self
            .source_events
            .list(tenant_id)
            .into_iter()
            .filter(|e| !errors_only || matches!(e.processing_status, ProcessingStatus::Error { .. }))
            .collect();
        events.sort_by(|a, b| a.event_date.cmp(&b.event_date).then_with(|| a.key.cmp(&b.key)));
        events
    }

    fn attempt(&self, tenant_id: TenantId, mut event: SourceEvent) -> Result<IngestOutcome, EngineError> {
        event.begin_attempt();
        self.source_events.upsert(tenant_id, event.key.clone(), event.clone());

        match self.process(tenant_id, &event) {
            Ok(link) => {
                info!(
                    tenant_id = %tenant_id,
                    source = %event.key,
                    kind = event.payload.kind(),
                    contract_id = %link.contract_id,
                    version = link.contract_version,
                    "source event allocated"
                );
                event.mark_allocated(link);
                self.source_events.upsert(tenant_id, event.key.clone(), event.clone());
                Ok(IngestOutcome { event, duplicate: false })
            }
            Err(err) => {
                let reason = err.to_string();
                warn!(
                    tenant_id = %tenant_id,
                    source = %event.key,
                    kind = event.payload.kind(),
                    attempts = event.attempts,
                    code = err.code(),
                    reason = %reason,
                    "source event failed"
                );
                event.mark_error(reason.clone());
                self.source_events.upsert(tenant_id, event.key.clone(), event.clone());
                Err(EngineError::SourceEventError {
                    source_key: event.key,
                    reason,
                })
            }
        }
    }

    fn process(&self, tenant_id: TenantId, event: &SourceEvent) -> Result<ContractLink, EngineError> {
        match &event.payload {
            SourcePayload::Order(order) => self.process_order(tenant_id, event, order),
            SourcePayload::Usage {
                contract_number,
                line_no,
                quantity,
            } => self.record_against_line(tenant_id, event, contract_number, *line_no, |engine, ctx, contract, pob, live| {
                let calendar = engine.ledger_calendar(tenant_id, contract)?;
                Ok(engine
                    .scheduler
                    .plan_usage(ctx, pob, *quantity, event.event_date, live, &calendar)?)
            }),
            SourcePayload::MilestoneCompleted {
                contract_number,
                line_no,
                milestone_id,
            } => self.record_against_line(tenant_id, event, contract_number, *line_no, |engine, ctx, contract, pob, _| {
                let calendar = engine.ledger_calendar(tenant_id, contract)?;
                let done = engine.chain_milestones(tenant_id, contract, pob, ctx.contract_version);
                Ok(engine
                    .scheduler
                    .plan_milestone(ctx, pob, milestone_id, event.event_date, &done, &calendar)?)
            }),
            SourcePayload::Billing { contract_number } => {
                let contract = self.require_contract(tenant_id, contract_number)?;
                active_link(&contract)
            }
        }
    }

    fn process_order(&self, tenant_id: TenantId, event: &SourceEvent, order: &OrderPayload) -> Result<ContractLink, EngineError> {
        let draft = ContractDraft {
            contract_number: order.contract_number.clone(),
            customer_id: order.customer_id.clone(),
            legal_entity_id: order.legal_entity_id.clone(),
            org_id: order.org_id.clone(),
            ledger_id: order.ledger_id.clone(),
            currency: event.amount.currency.as_str().to_string(),
            transaction_price: event.amount.amount,
            effective_date: order.effective_date.unwrap_or(event.event_date),
            ssp_book: order.ssp_book,
            lines: order.lines.clone(),
        };
        let number = ContractNumber::new(order.contract_number.as_str())?;
        let contract_id = self.resolve_contract_id(tenant_id, &number);

        // An earlier attempt may have committed the version before failing.
        if let Some(existing) = self.contracts.get(tenant_id, contract_id.0) {
            if let Some(version) = existing.version_for_source(&event.key) {
                if version.status == VersionStatus::Active {
                    self.ensure_schedule(tenant_id, &existing, version.version_number)?;
                }
                return link_to(&existing, version.version_number);
            }
        }

        let draft_cmd = draft.to_command(tenant_id, contract_id, Some(event.key.clone()))?;
        let mut staged = None;
        let out = self.run(tenant_id, contract_id.0, &self.contracts, new_contract, |current| {
            let mut preview = current.clone();
            execute(&mut preview, &RevenueContractCommand::DraftVersion(draft_cmd.clone()))?;
            let (command, plan) = self.stage_allocation(tenant_id, &preview)?;
            let RevenueContractCommand::RecordAllocation(recorded) = command else {
                return Err(EngineError::Invariant("staged allocation produced an unexpected command".into()));
            };
            staged = Some(plan);
            Ok(RevenueContractCommand::DraftAndAllocate(DraftAndAllocate {
                draft: draft_cmd.clone(),
                allocations: recorded.allocations,
            }))
        })?;
        self.register_contract(tenant_id, number, contract_id)?;
        let plan = staged.ok_or_else(|| EngineError::Invariant("order committed without a plan".into()))?;
        self.commit_plan(tenant_id, &out.aggregate, plan.version_number, plan.batch)?;
        self.mark_lines_referenced(tenant_id, &plan.referenced)?;
        link_to(&out.aggregate, plan.version_number)
    }

    /// Schedule entries driven by an event against one line of the active
    /// version. Re-planned from fresh state when the obligation moves
    /// concurrently.
    fn record_against_line<F>(
        &self,
        tenant_id: TenantId,
        event: &SourceEvent,
        contract_number: &str,
        line_no: u32,
        plan: F,
    ) -> Result<ContractLink, EngineError>
    where
        F: Fn(&Self, &ScheduleContext, &RevenueContract, &PerformanceObligation, i64) -> Result<Vec<ScheduleEntry>, EngineError>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let contract = self.require_contract(tenant_id, contract_number)?;
            let link = active_link(&contract)?;
            let version = contract
                .contract_version(link.contract_version)
                .ok_or_else(|| EngineError::not_found(format!("contract version {}", link.contract_version)))?;
            let pob = version.obligation_for_line(line_no).ok_or_else(|| {
                EngineError::Validation(format!("contract {contract_number} has no line {line_no}"))
            })?;

            let entries = self.obligation_entries(tenant_id, pob.obligation_id);
            if entries.iter().any(|e| e.source.as_ref() == Some(&event.key)) {
                return Ok(link);
            }
            let live: i64 = entries.iter().filter(|e| e.is_live()).map(|e| e.amount).sum();
            let ctx = ScheduleContext {
                contract_id: link.contract_id,
                contract_version: link.contract_version,
                source: Some(event.key.clone()),
            };
            let insert = plan(self, &ctx, &contract, pob, live)?;
            let batch = ScheduleBatch {
                expectations: vec![expect(pob.obligation_id, live)],
                insert,
                ..Default::default()
            };
            match self.schedules.commit(tenant_id, batch) {
                Ok(()) => return Ok(link),
                Err(err) if err.is_conflict() && attempt <= self.config.version_conflict_retries => {
                    warn!(tenant_id = %tenant_id, source = %event.key, reason = %err, "obligation moved, replanning");
                }
                Err(err) if err.is_conflict() => {
                    return Err(EngineError::VersionConflict {
                        reference: pob.obligation_id.to_string(),
                        attempts: attempt,
                    });
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    fn require_contract(&self, tenant_id: TenantId, contract_number: &str) -> Result<RevenueContract, EngineError> {
        self.contract_by_number(tenant_id, contract_number)
            .ok_or_else(|| EngineError::not_found(format!("contract {contract_number}")))
    }

    fn ledger_calendar(
        &self,
        tenant_id: TenantId,
        contract: &RevenueContract,
    ) -> Result<forgerev_periods::PeriodCalendar, EngineError> {
        let header = contract
            .header()
            .ok_or_else(|| EngineError::not_found(format!("contract {}", contract.id_typed())))?;
        Ok(self.calendar(tenant_id, &header.ledger_id))
    }
}

fn expect(obligation_id: ObligationId, live_total: i64) -> LiveTotal {
    LiveTotal {
        obligation_id,
        live_total,
    }
}

fn link_to(contract: &RevenueContract, version_number: u32) -> Result<ContractLink, EngineError> {
    let header = contract
        .header()
        .ok_or_else(|| EngineError::not_found(format!("contract {}", contract.id_typed())))?;
    Ok(ContractLink {
        contract_id: contract.id_typed(),
        contract_number: header.contract_number.clone(),
        contract_version: version_number,
    })
}

fn active_link(contract: &RevenueContract) -> Result<ContractLink, EngineError> {
    let number = contract.header().map(|h| h.contract_number.to_string()).unwrap_or_default();
    if contract.is_cancelled() {
        return Err(EngineError::Validation(format!("contract {number} is cancelled")));
    }
    let active = contract
        .active_version()
        .ok_or_else(|| EngineError::Validation(format!("contract {number} has no allocated version")))?;
    link_to(contract, active.version_number)
}
