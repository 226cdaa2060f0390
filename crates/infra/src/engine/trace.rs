//! Audit trace from a source event down to postings.

use serde::{Deserialize, Serialize};

use forgerev_contracts::{ContractHeader, ContractId, ContractVersion, SourceEventKey};
use forgerev_core::TenantId;
use forgerev_intake::SourceEvent;
use forgerev_recognition::{EntryStatus, ScheduleEntry};

use super::{EngineError, ObligationView, RevenueEngine};
use crate::event_store::EventStore;
use crate::read_model::TenantStore;
use crate::schedule_store::ScheduleStore;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractSegment {
    pub contract_id: ContractId,
    pub header: ContractHeader,
    /// The version the source event is linked to.
    pub version: ContractVersion,
    pub current_version: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostingStatus {
    pub scheduled_amount: i64,
    pub posted_amount: i64,
    pub reversed_amount: i64,
    pub entries: usize,
    pub fully_posted: bool,
}

impl PostingStatus {
    fn of(entries: &[ScheduleEntry]) -> Self {
        let mut status = PostingStatus {
            entries: entries.len(),
            ..Default::default()
        };
        for e in entries {
            match e.status {
                EntryStatus::Scheduled => status.scheduled_amount += e.amount,
                EntryStatus::Posted => status.posted_amount += e.amount,
                EntryStatus::Reversed => status.reversed_amount += e.amount,
            }
        }
        status.fully_posted = !entries.is_empty() && entries.iter().all(|e| e.status != EntryStatus::Scheduled);
        status
    }
}

/// Source event -> contract version -> obligations -> schedule -> postings.
/// Segments that do not exist (yet) are `None` or empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trace {
    pub key: SourceEventKey,
    pub source_event: Option<SourceEvent>,
    pub contract: Option<ContractSegment>,
    pub obligations: Vec<ObligationView>,
    pub recognitions: Vec<ScheduleEntry>,
    pub posting_status: Option<PostingStatus>,
}

impl Trace {
    fn empty(key: SourceEventKey, source_event: Option<SourceEvent>) -> Self {
        Self {
            key,
            source_event,
            contract: None,
            obligations: vec![],
            recognitions: vec![],
            posting_status: None,
        }
    }
}

impl<S, Q> RevenueEngine<S, Q>
where
    S: EventStore,
    Q: ScheduleStore,
{
    pub fn trace(&self, tenant_id: TenantId, key: &SourceEventKey) -> Result<Trace, EngineError> {
        let source_event = self.source_events.get(tenant_id, key);
        let Some(link) = source_event.as_ref().and_then(|e| e.link.clone()) else {
            return Ok(Trace::empty(key.clone(), source_event));
        };
        let Ok(contract) = self.contract(tenant_id, link.contract_id) else {
            return Ok(Trace::empty(key.clone(), source_event));
        };
        let (Some(header), Some(version)) = (contract.header(), contract.contract_version(link.contract_version)) else {
            return Ok(Trace::empty(key.clone(), source_event));
        };

        let obligations = self.obligations(tenant_id, link.contract_id, Some(link.contract_version))?;
        let mut recognitions: Vec<ScheduleEntry> = obligations
            .iter()
            .flat_map(|o| self.obligation_entries(tenant_id, o.obligation.obligation_id))
            .collect();
        if recognitions.iter().any(|e| e.source.as_ref() == Some(key)) {
            recognitions.retain(|e| e.source.as_ref() == Some(key));
        }
        recognitions.sort_by_key(|e| (e.schedule_date, e.entry_id));

        Ok(Trace {
            key: key.clone(),
            contract: Some(ContractSegment {
                contract_id: link.contract_id,
                header: header.clone(),
                version: version.clone(),
                current_version: contract.current_version().map(|v| v.version_number),
            }),
            obligations,
            posting_status: Some(PostingStatus::of(&recognitions)),
            recognitions,
            source_event,
        })
    }
}
