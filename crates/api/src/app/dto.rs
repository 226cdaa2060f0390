use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::json;

use forgerev_catalog::SspBook;
use forgerev_contracts::RevenueContract;
use forgerev_periods::Period;

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
pub struct CreateSspBookRequest {
    pub name: String,
    pub currency: String,
    /// Make this the tenant's default book.
    #[serde(default)]
    pub default: bool,
}

#[derive(Debug, Deserialize)]
pub struct AddSspLineRequest {
    pub item_id: String,
    pub unit_price: i64,
    #[serde(default)]
    pub min_quantity: Option<i64>,
    pub effective_from: NaiveDate,
}

#[derive(Debug, Deserialize)]
pub struct AmendSspLineRequest {
    pub unit_price: i64,
    #[serde(default)]
    pub min_quantity: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct ResolveSspQuery {
    pub item_id: String,
    pub as_of: NaiveDate,
    #[serde(default)]
    pub book_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CancelContractRequest {
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub struct ObligationsQuery {
    #[serde(default)]
    pub version: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct DefinePeriodRequest {
    pub ledger_id: String,
    pub name: String,
    pub start: NaiveDate,
    pub end: NaiveDate,
}

#[derive(Debug, Deserialize)]
pub struct PeriodsQuery {
    #[serde(default)]
    pub ledger_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ClosePeriodRequest {
    #[serde(default)]
    pub actor: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ReopenPeriodRequest {
    pub actor: String,
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub struct PermanentlyClosePeriodRequest {
    pub actor: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct SourceEventsQuery {
    #[serde(default)]
    pub errors_only: bool,
}

// -------------------------
// Response mapping
// -------------------------

pub fn ssp_book_to_json(book: SspBook, is_default: bool) -> serde_json::Value {
    json!({
        "book_id": book.id_typed().to_string(),
        "name": book.name(),
        "currency": book.currency().map(|c| c.as_str().to_string()),
        "default": is_default,
        "lines": book.lines(),
    })
}

pub fn contract_summary_to_json(contract: &RevenueContract) -> serde_json::Value {
    let current = contract.current_version();
    json!({
        "contract_id": contract.id_typed().to_string(),
        "contract_number": contract.header().map(|h| h.contract_number.as_str().to_string()),
        "customer_id": contract.header().map(|h| h.customer_id.clone()),
        "currency": contract.header().map(|h| h.currency.as_str().to_string()),
        "cancelled": contract.is_cancelled(),
        "current_version": current.map(|v| v.version_number),
        "status": current.map(|v| v.status),
        "transaction_price": current.map(|v| v.transaction_price),
        "total_allocated": current.map(|v| v.total_allocated),
    })
}

pub fn contract_to_json(contract: &RevenueContract) -> serde_json::Value {
    json!({
        "contract_id": contract.id_typed().to_string(),
        "header": contract.header(),
        "cancelled": contract.is_cancelled(),
        "current_version": contract.current_version().map(|v| v.version_number),
        "versions": contract.versions(),
    })
}

pub fn period_to_json(period: &Period) -> serde_json::Value {
    json!({
        "period_id": period.id_typed().to_string(),
        "ledger_id": period.ledger_id().map(|l| l.as_str().to_string()),
        "name": period.name(),
        "start": period.start(),
        "end": period.end(),
        "status": period.status(),
        "reopen_count": period.reopen_count(),
    })
}
