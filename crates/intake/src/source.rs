use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use forgerev_catalog::SspBookId;
use forgerev_contracts::{ContractId, ContractLine, ContractNumber, SourceEventKey};
use forgerev_core::{Currency, DomainError, LedgerId, Money};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IntakeError {
    #[error("missing field: {0}")]
    MissingField(&'static str),

    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error(transparent)]
    Domain(#[from] DomainError),
}

/// Order payload: creates a contract or modifies an existing one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderPayload {
    pub contract_number: String,
    pub customer_id: String,
    pub legal_entity_id: String,
    pub org_id: String,
    pub ledger_id: String,
    #[serde(default)]
    pub ssp_book: Option<SspBookId>,
    /// Defaults to the event date.
    #[serde(default)]
    pub effective_date: Option<NaiveDate>,
    pub lines: Vec<ContractLine>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourcePayload {
    Order(OrderPayload),
    Usage {
        contract_number: String,
        line_no: u32,
        quantity: i64,
    },
    MilestoneCompleted {
        contract_number: String,
        line_no: u32,
        milestone_id: String,
    },
    Billing {
        contract_number: String,
    },
}

impl SourcePayload {
    pub fn contract_number(&self) -> &str {
        match self {
            SourcePayload::Order(o) => &o.contract_number,
            SourcePayload::Usage { contract_number, .. }
            | SourcePayload::MilestoneCompleted { contract_number, .. }
            | SourcePayload::Billing { contract_number } => contract_number,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            SourcePayload::Order(_) => "order",
            SourcePayload::Usage { .. } => "usage",
            SourcePayload::MilestoneCompleted { .. } => "milestone_completed",
            SourcePayload::Billing { .. } => "billing",
        }
    }
}

/// Raw event as pushed by a source system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceEventInput {
    pub source_system: String,
    pub source_id: String,
    pub amount: i64,
    pub currency: String,
    pub event_date: NaiveDate,
    pub payload: SourcePayload,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ProcessingStatus {
    Pending,
    Allocated,
    Error { reason: String },
}

/// Permanent link from a source event to the contract version it drove.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractLink {
    pub contract_id: ContractId,
    pub contract_number: ContractNumber,
    pub contract_version: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceEvent {
    pub key: SourceEventKey,
    pub amount: Money,
    pub event_date: NaiveDate,
    pub payload: SourcePayload,
    pub processing_status: ProcessingStatus,
    pub link: Option<ContractLink>,
    pub attempts: u32,
    pub received_at: DateTime<Utc>,
}

impl SourceEvent {
    /// Validate shape and build a `Pending` event.
    pub fn validate(input: SourceEventInput, received_at: DateTime<Utc>) -> Result<Self, IntakeError> {
        if input.source_system.trim().is_empty() {
            return Err(IntakeError::MissingField("source_system"));
        }
        if input.source_id.trim().is_empty() {
            return Err(IntakeError::MissingField("source_id"));
        }
        let currency = Currency::parse(&input.currency)?;
        if input.payload.contract_number().trim().is_empty() {
            return Err(IntakeError::MissingField("contract_number"));
        }

        match &input.payload {
            SourcePayload::Order(order) => {
                if input.amount < 0 {
                    return Err(IntakeError::InvalidAmount(
                        "order amount (transaction price) cannot be negative".into(),
                    ));
                }
                if order.customer_id.trim().is_empty() {
                    return Err(IntakeError::MissingField("customer_id"));
                }
                if order.legal_entity_id.trim().is_empty() {
                    return Err(IntakeError::MissingField("legal_entity_id"));
                }
                if order.org_id.trim().is_empty() {
                    return Err(IntakeError::MissingField("org_id"));
                }
                LedgerId::new(order.ledger_id.clone())?;
                if order.lines.is_empty() {
                    return Err(IntakeError::InvalidPayload("order has no lines".into()));
                }
                for line in &order.lines {
                    line.validate()?;
                }
            }
            SourcePayload::Usage { quantity, .. } => {
                if *quantity <= 0 {
                    return Err(IntakeError::InvalidPayload("usage quantity must be positive".into()));
                }
            }
            SourcePayload::MilestoneCompleted { milestone_id, .. } => {
                if milestone_id.trim().is_empty() {
                    return Err(IntakeError::MissingField("milestone_id"));
                }
            }
            SourcePayload::Billing { .. } => {
                if input.amount < 0 {
                    return Err(IntakeError::InvalidAmount("billed amount cannot be negative".into()));
                }
            }
        }

        Ok(Self {
            key: SourceEventKey::new(input.source_system.trim(), input.source_id.trim()),
            amount: Money::new(input.amount, currency),
            event_date: input.event_date,
            payload: input.payload,
            processing_status: ProcessingStatus::Pending,
            link: None,
            attempts: 0,
            received_at,
        })
    }

    pub fn is_allocated(&self) -> bool {
        self.processing_status == ProcessingStatus::Allocated
    }

    pub fn is_retryable(&self) -> bool {
        !self.is_allocated()
    }

    pub fn error_reason(&self) -> Option<&str> {
        match &self.processing_status {
            ProcessingStatus::Error { reason } => Some(reason),
            _ => None,
        }
    }

    pub fn contract_number(&self) -> &str {
        self.payload.contract_number()
    }

    pub fn begin_attempt(&mut self) {
        self.attempts += 1;
        self.processing_status = ProcessingStatus::Pending;
    }

    pub fn mark_allocated(&mut self, link: ContractLink) {
        self.link = Some(link);
        self.processing_status = ProcessingStatus::Allocated;
    }

    pub fn mark_error(&mut self, reason: impl Into<String>) {
        self.processing_status = ProcessingStatus::Error {
            reason: reason.into(),
        };
    }
}
