use std::collections::HashSet;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use forgerev_catalog::SspBookId;
use forgerev_core::{Aggregate, AggregateId, AggregateRoot, Currency, DomainError, Entity, LedgerId, TenantId};
use forgerev_events::Event;

use crate::allocation::LineAllocation;
use crate::obligation::{ContractLine, ObligationId, ObligationStatus, PerformanceObligation};

/// Revenue contract identifier (aggregate id).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContractId(pub AggregateId);

impl ContractId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for ContractId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Business key of a contract (unique per tenant).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContractNumber(String);

impl ContractNumber {
    pub fn new(number: impl Into<String>) -> Result<Self, DomainError> {
        let number = number.into();
        if number.trim().is_empty() {
            return Err(DomainError::validation("contract_number cannot be empty"));
        }
        Ok(Self(number))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for ContractNumber {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Key of the source business event that produced a contract version.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SourceEventKey {
    pub source_system: String,
    pub source_id: String,
}

impl SourceEventKey {
    pub fn new(source_system: impl Into<String>, source_id: impl Into<String>) -> Self {
        Self {
            source_system: source_system.into(),
            source_id: source_id.into(),
        }
    }
}

impl core::fmt::Display for SourceEventKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}/{}", self.source_system, self.source_id)
    }
}

/// Customer-agreement identity shared by every version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractHeader {
    pub contract_number: ContractNumber,
    pub customer_id: String,
    pub legal_entity_id: String,
    pub org_id: String,
    pub ledger_id: LedgerId,
    pub currency: Currency,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionStatus {
    Draft,
    Active,
    Superseded,
    Cancelled,
}

/// One immutable link in the contract's version chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractVersion {
    pub version_number: u32,
    pub status: VersionStatus,
    pub transaction_price: i64,
    pub total_allocated: i64,
    /// SSP as-of date and, for modifications, the date the change takes effect.
    pub effective_date: NaiveDate,
    pub ssp_book: Option<SspBookId>,
    pub source: Option<SourceEventKey>,
    pub lines: Vec<ContractLine>,
    pub obligations: Vec<PerformanceObligation>,
}

impl ContractVersion {
    pub fn obligation(&self, id: ObligationId) -> Option<&PerformanceObligation> {
        self.obligations.iter().find(|o| *o.id() == id)
    }

    pub fn obligation_for_line(&self, line_no: u32) -> Option<&PerformanceObligation> {
        self.obligations.iter().find(|o| o.line_no == line_no)
    }

    /// Active, or superseded after having been allocated (an abandoned draft
    /// is superseded without ever being allocated).
    pub fn is_allocated(&self) -> bool {
        match self.status {
            VersionStatus::Active => true,
            VersionStatus::Superseded => self.obligations.iter().all(|o| o.allocated_price.is_some()),
            VersionStatus::Draft | VersionStatus::Cancelled => false,
        }
    }
}

/// Aggregate root: RevenueContract (append-only chain of versions).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevenueContract {
    id: ContractId,
    tenant_id: Option<TenantId>,
    header: Option<ContractHeader>,
    versions: Vec<ContractVersion>,
    cancelled: bool,
    version: u64,
    created: bool,
}

impl RevenueContract {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: ContractId) -> Self {
        Self {
            id,
            tenant_id: None,
            header: None,
            versions: Vec::new(),
            cancelled: false,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> ContractId {
        self.id
    }

    pub fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id
    }

    pub fn header(&self) -> Option<&ContractHeader> {
        self.header.as_ref()
    }

    pub fn is_created(&self) -> bool {
        self.created
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    pub fn versions(&self) -> &[ContractVersion] {
        &self.versions
    }

    pub fn contract_version(&self, version_number: u32) -> Option<&ContractVersion> {
        self.versions.iter().find(|v| v.version_number == version_number)
    }

    pub fn latest_version(&self) -> Option<&ContractVersion> {
        self.versions.iter().max_by_key(|v| v.version_number)
    }

    /// Highest version that has not been superseded.
    pub fn current_version(&self) -> Option<&ContractVersion> {
        self.versions
            .iter()
            .filter(|v| v.status != VersionStatus::Superseded)
            .max_by_key(|v| v.version_number)
    }

    pub fn active_version(&self) -> Option<&ContractVersion> {
        self.versions.iter().find(|v| v.status == VersionStatus::Active)
    }

    /// Version that was in force when `source` was processed.
    pub fn version_for_source(&self, source: &SourceEventKey) -> Option<&ContractVersion> {
        self.versions
            .iter()
            .filter(|v| v.source.as_ref() == Some(source))
            .max_by_key(|v| v.version_number)
    }

    fn next_version_number(&self) -> u32 {
        self.latest_version().map(|v| v.version_number + 1).unwrap_or(1)
    }

    fn version_mut(&mut self, version_number: u32) -> Option<&mut ContractVersion> {
        self.versions
            .iter_mut()
            .find(|v| v.version_number == version_number)
    }
}

impl AggregateRoot for RevenueContract {
    type Id = ContractId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: DraftVersion (first version or a modification).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DraftVersion {
    pub tenant_id: TenantId,
    pub contract_id: ContractId,
    pub header: ContractHeader,
    pub transaction_price: i64,
    pub effective_date: NaiveDate,
    pub ssp_book: Option<SspBookId>,
    pub source: Option<SourceEventKey>,
    pub lines: Vec<ContractLine>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RecordAllocation (finalizes a draft version).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordAllocation {
    pub tenant_id: TenantId,
    pub contract_id: ContractId,
    pub version_number: u32,
    pub allocations: Vec<LineAllocation>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: DraftAndAllocate (draft + allocation in one atomic batch).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DraftAndAllocate {
    pub draft: DraftVersion,
    pub allocations: Vec<LineAllocation>,
}

/// Command: CancelContract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelContract {
    pub tenant_id: TenantId,
    pub contract_id: ContractId,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RevenueContractCommand {
    DraftVersion(DraftVersion),
    RecordAllocation(RecordAllocation),
    DraftAndAllocate(DraftAndAllocate),
    CancelContract(CancelContract),
}

/// Event: VersionDrafted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionDrafted {
    pub tenant_id: TenantId,
    pub contract_id: ContractId,
    pub header: ContractHeader,
    pub version: ContractVersion,
    pub occurred_at: DateTime<Utc>,
}

/// Event: AllocationRecorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationRecorded {
    pub tenant_id: TenantId,
    pub contract_id: ContractId,
    pub version_number: u32,
    pub allocations: Vec<LineAllocation>,
    pub total_allocated: i64,
    pub occurred_at: DateTime<Utc>,
}

/// Event: VersionSuperseded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionSuperseded {
    pub tenant_id: TenantId,
    pub contract_id: ContractId,
    pub version_number: u32,
    pub superseded_by: u32,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ContractCancelled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractCancelled {
    pub tenant_id: TenantId,
    pub contract_id: ContractId,
    pub version_number: u32,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RevenueContractEvent {
    VersionDrafted(VersionDrafted),
    AllocationRecorded(AllocationRecorded),
    VersionSuperseded(VersionSuperseded),
    ContractCancelled(ContractCancelled),
}

impl Event for RevenueContractEvent {
    fn event_type(&self) -> &'static str {
        match self {
            RevenueContractEvent::VersionDrafted(_) => "revenue.contract.version_drafted",
            RevenueContractEvent::AllocationRecorded(_) => "revenue.contract.allocation_recorded",
            RevenueContractEvent::VersionSuperseded(_) => "revenue.contract.version_superseded",
            RevenueContractEvent::ContractCancelled(_) => "revenue.contract.cancelled",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            RevenueContractEvent::VersionDrafted(e) => e.occurred_at,
            RevenueContractEvent::AllocationRecorded(e) => e.occurred_at,
            RevenueContractEvent::VersionSuperseded(e) => e.occurred_at,
            RevenueContractEvent::ContractCancelled(e) => e.occurred_at,
        }
    }
}

impl Aggregate for RevenueContract {
    type Command = RevenueContractCommand;
    type Event = RevenueContractEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            RevenueContractEvent::VersionDrafted(e) => {
                self.id = e.contract_id;
                self.tenant_id = Some(e.tenant_id);
                self.header = Some(e.header.clone());
                self.versions.push(e.version.clone());
                self.created = true;
            }
            RevenueContractEvent::AllocationRecorded(e) => {
                if let Some(v) = self.version_mut(e.version_number) {
                    for alloc in &e.allocations {
                        if let Some(pob) = v.obligations.iter_mut().find(|o| o.line_no == alloc.line_no) {
                            pob.ssp_source = Some(alloc.ssp_source.clone());
                            pob.standalone_selling_price = alloc.standalone_selling_price;
                            pob.estimated_standalone_value = Some(alloc.estimated_standalone_value);
                            pob.allocated_price = Some(alloc.allocated_price);
                            pob.status = ObligationStatus::Allocated;
                        }
                    }
                    v.total_allocated = e.total_allocated;
                    v.status = VersionStatus::Active;
                }
            }
            RevenueContractEvent::VersionSuperseded(e) => {
                if let Some(v) = self.version_mut(e.version_number) {
                    v.status = VersionStatus::Superseded;
                }
            }
            RevenueContractEvent::ContractCancelled(e) => {
                for v in self.versions.iter_mut() {
                    if v.version_number == e.version_number || v.status == VersionStatus::Draft {
                        v.status = VersionStatus::Cancelled;
                    }
                }
                self.cancelled = true;
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            RevenueContractCommand::DraftVersion(cmd) => self.handle_draft(cmd),
            RevenueContractCommand::RecordAllocation(cmd) => self.handle_record_allocation(cmd),
            RevenueContractCommand::DraftAndAllocate(cmd) => self.handle_draft_and_allocate(cmd),
            RevenueContractCommand::CancelContract(cmd) => self.handle_cancel(cmd),
        }
    }
}

impl RevenueContract {
    fn ensure_tenant(&self, tenant_id: TenantId) -> Result<(), DomainError> {
        if self.created && self.tenant_id != Some(tenant_id) {
            return Err(DomainError::invariant("tenant mismatch"));
        }
        Ok(())
    }

    fn handle_draft(&self, cmd: &DraftVersion) -> Result<Vec<RevenueContractEvent>, DomainError> {
        self.ensure_tenant(cmd.tenant_id)?;
        if self.cancelled {
            return Err(DomainError::invariant("contract is cancelled"));
        }
        if cmd.transaction_price < 0 {
            return Err(DomainError::validation("transaction_price cannot be negative"));
        }
        if cmd.lines.is_empty() {
            return Err(DomainError::validation("contract requires at least one line"));
        }

        let mut seen = HashSet::new();
        for line in &cmd.lines {
            if !seen.insert(line.line_no) {
                return Err(DomainError::validation(format!("duplicate line_no {}", line.line_no)));
            }
            line.validate()?;
        }

        if let Some(existing) = &self.header {
            if existing.contract_number != cmd.header.contract_number {
                return Err(DomainError::invariant("contract_number cannot change between versions"));
            }
            if existing.currency != cmd.header.currency {
                return Err(DomainError::invariant("currency cannot change between versions"));
            }
        }
        if let Some(active) = self.active_version() {
            if cmd.effective_date < active.effective_date {
                return Err(DomainError::validation(format!(
                    "modification effective {} precedes version {} effective {}",
                    cmd.effective_date, active.version_number, active.effective_date
                )));
            }
        }

        let version_number = self.next_version_number();
        let obligations = cmd
            .lines
            .iter()
            .map(|line| {
                PerformanceObligation::unallocated(
                    ObligationId::derive(cmd.contract_id, version_number, line.line_no),
                    line,
                )
            })
            .collect();

        let mut events = Vec::new();

        // An abandoned draft is replaced by the new one.
        if let Some(latest) = self.latest_version() {
            if latest.status == VersionStatus::Draft {
                events.push(RevenueContractEvent::VersionSuperseded(VersionSuperseded {
                    tenant_id: cmd.tenant_id,
                    contract_id: cmd.contract_id,
                    version_number: latest.version_number,
                    superseded_by: version_number,
                    occurred_at: cmd.occurred_at,
                }));
            }
        }

        events.push(RevenueContractEvent::VersionDrafted(VersionDrafted {
            tenant_id: cmd.tenant_id,
            contract_id: cmd.contract_id,
            header: cmd.header.clone(),
            version: ContractVersion {
                version_number,
                status: VersionStatus::Draft,
                transaction_price: cmd.transaction_price,
                total_allocated: 0,
                effective_date: cmd.effective_date,
                ssp_book: cmd.ssp_book,
                source: cmd.source.clone(),
                lines: cmd.lines.clone(),
                obligations,
            },
            occurred_at: cmd.occurred_at,
        }));

        Ok(events)
    }

    fn handle_record_allocation(
        &self,
        cmd: &RecordAllocation,
    ) -> Result<Vec<RevenueContractEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found(format!("contract {}", self.id)));
        }
        self.ensure_tenant(cmd.tenant_id)?;
        if self.cancelled {
            return Err(DomainError::invariant("contract is cancelled"));
        }

        let target = self
            .contract_version(cmd.version_number)
            .ok_or_else(|| DomainError::not_found(format!("contract version {}", cmd.version_number)))?;
        if target.status != VersionStatus::Draft {
            return Err(DomainError::conflict(format!(
                "version {} is {:?}, only drafts can be allocated",
                target.version_number, target.status
            )));
        }

        let mut expected: Vec<u32> = target.lines.iter().map(|l| l.line_no).collect();
        let mut got: Vec<u32> = cmd.allocations.iter().map(|a| a.line_no).collect();
        expected.sort_unstable();
        got.sort_unstable();
        if expected != got {
            return Err(DomainError::validation(
                "allocation must cover every contract line exactly once",
            ));
        }

        let total_allocated = cmd
            .allocations
            .iter()
            .try_fold(0i64, |acc, a| acc.checked_add(a.allocated_price))
            .ok_or_else(|| DomainError::invariant("allocation total overflow"))?;
        if total_allocated != target.transaction_price {
            return Err(DomainError::invariant(format!(
                "allocated total {} does not equal transaction price {}",
                total_allocated, target.transaction_price
            )));
        }

        let mut events = vec![RevenueContractEvent::AllocationRecorded(AllocationRecorded {
            tenant_id: cmd.tenant_id,
            contract_id: cmd.contract_id,
            version_number: cmd.version_number,
            allocations: cmd.allocations.clone(),
            total_allocated,
            occurred_at: cmd.occurred_at,
        })];

        if let Some(prior) = self.active_version() {
            events.push(RevenueContractEvent::VersionSuperseded(VersionSuperseded {
                tenant_id: cmd.tenant_id,
                contract_id: cmd.contract_id,
                version_number: prior.version_number,
                superseded_by: cmd.version_number,
                occurred_at: cmd.occurred_at,
            }));
        }

        Ok(events)
    }

    fn handle_draft_and_allocate(
        &self,
        cmd: &DraftAndAllocate,
    ) -> Result<Vec<RevenueContractEvent>, DomainError> {
        let mut events = self.handle_draft(&cmd.draft)?;

        let mut staged = self.clone();
        for ev in &events {
            staged.apply(ev);
        }
        let version_number = staged
            .latest_version()
            .map(|v| v.version_number)
            .ok_or_else(|| DomainError::invariant("draft produced no version"))?;

        events.extend(staged.handle_record_allocation(&RecordAllocation {
            tenant_id: cmd.draft.tenant_id,
            contract_id: cmd.draft.contract_id,
            version_number,
            allocations: cmd.allocations.clone(),
            occurred_at: cmd.draft.occurred_at,
        })?);

        Ok(events)
    }

    fn handle_cancel(&self, cmd: &CancelContract) -> Result<Vec<RevenueContractEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found(format!("contract {}", self.id)));
        }
        self.ensure_tenant(cmd.tenant_id)?;
        if self.cancelled {
            return Err(DomainError::conflict("contract already cancelled"));
        }
        if cmd.reason.trim().is_empty() {
            return Err(DomainError::validation("cancellation reason is required"));
        }

        let current = self
            .current_version()
            .ok_or_else(|| DomainError::invariant("contract has no versions"))?;

        Ok(vec![RevenueContractEvent::ContractCancelled(ContractCancelled {
            tenant_id: cmd.tenant_id,
            contract_id: cmd.contract_id,
            version_number: current.version_number,
            reason: cmd.reason.trim().to_string(),
            occurred_at: cmd.occurred_at,
        })])
    }
}
