use std::collections::HashSet;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use forgerev_catalog::ItemId;
use forgerev_core::{DomainError, Entity};

use crate::allocation::SspSource;
use crate::contract::ContractId;

/// Milestone percentages are expressed in basis points of the allocated price.
pub const FULL_BASIS_POINTS: u32 = 10_000;

/// Performance obligation identifier.
///
/// Derived from `(contract, version, line_no)` so that redrafting or replaying
/// the same version always yields the same id.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObligationId(pub Uuid);

impl ObligationId {
    pub fn derive(contract_id: ContractId, version_number: u32, line_no: u32) -> Self {
        let namespace = *contract_id.0.as_uuid();
        Self(Uuid::new_v5(&namespace, format!("{version_number}:{line_no}").as_bytes()))
    }
}

impl core::fmt::Display for ObligationId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecognitionMethod {
    PointInTime,
    Ratable,
    Milestone,
    Usage,
}

/// Obligation lifecycle.
///
/// The contract aggregate only moves obligations from `Unallocated` to
/// `Allocated`; `Recognizing` and `Complete` are derived from posted schedule
/// entries by read views.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObligationStatus {
    Unallocated,
    Allocated,
    Recognizing,
    Complete,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Milestone {
    pub milestone_id: String,
    pub basis_points: u32,
    /// Completion date, when already known at contract time.
    #[serde(default)]
    pub completed_on: Option<NaiveDate>,
}

/// How and when an obligation's allocated price turns into revenue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecognitionTerms {
    pub method: RecognitionMethod,
    /// Window start; for point-in-time obligations this is the trigger date.
    pub start: NaiveDate,
    pub end: NaiveDate,
    #[serde(default)]
    pub milestones: Vec<Milestone>,
    /// Minor units recognised per unit of usage.
    #[serde(default)]
    pub usage_rate: Option<i64>,
}

impl RecognitionTerms {
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.end < self.start {
            return Err(DomainError::validation("recognition end precedes start"));
        }

        match self.method {
            RecognitionMethod::Milestone => {
                if self.milestones.is_empty() {
                    return Err(DomainError::validation("milestone method requires milestones"));
                }
                let mut seen = HashSet::new();
                let mut total: u32 = 0;
                for m in &self.milestones {
                    if m.milestone_id.trim().is_empty() {
                        return Err(DomainError::validation("milestone_id cannot be empty"));
                    }
                    if !seen.insert(m.milestone_id.as_str()) {
                        return Err(DomainError::validation(format!(
                            "duplicate milestone {}",
                            m.milestone_id
                        )));
                    }
                    if m.basis_points == 0 {
                        return Err(DomainError::validation("milestone basis_points must be positive"));
                    }
                    total = total.saturating_add(m.basis_points);
                }
                if total != FULL_BASIS_POINTS {
                    return Err(DomainError::validation(format!(
                        "milestone basis points must sum to {FULL_BASIS_POINTS}, got {total}"
                    )));
                }
            }
            RecognitionMethod::Usage => match self.usage_rate {
                Some(rate) if rate > 0 => {}
                _ => return Err(DomainError::validation("usage method requires a positive usage_rate")),
            },
            RecognitionMethod::PointInTime | RecognitionMethod::Ratable => {}
        }

        Ok(())
    }

    pub fn milestone(&self, milestone_id: &str) -> Option<(usize, &Milestone)> {
        self.milestones
            .iter()
            .enumerate()
            .find(|(_, m)| m.milestone_id == milestone_id)
    }
}

/// A priced line on a contract version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractLine {
    pub line_no: u32,
    pub item_id: ItemId,
    pub quantity: i64,
    /// Observable (fixed) total value for the line; excluded from the proportional pool.
    #[serde(default)]
    pub observable_price: Option<i64>,
    /// Contract-supplied unit SSP, used when the catalog has no eligible line.
    #[serde(default)]
    pub explicit_ssp: Option<i64>,
    pub terms: RecognitionTerms,
}

impl ContractLine {
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.quantity <= 0 {
            return Err(DomainError::validation(format!(
                "line {}: quantity must be positive",
                self.line_no
            )));
        }
        if self.observable_price.is_some_and(|p| p < 0) {
            return Err(DomainError::validation(format!(
                "line {}: observable_price cannot be negative",
                self.line_no
            )));
        }
        if self.explicit_ssp.is_some_and(|p| p < 0) {
            return Err(DomainError::validation(format!(
                "line {}: explicit_ssp cannot be negative",
                self.line_no
            )));
        }
        self.terms.validate().map_err(|e| match e {
            DomainError::Validation(msg) => {
                DomainError::validation(format!("line {}: {msg}", self.line_no))
            }
            other => other,
        })
    }
}

/// Performance obligation: the unit of allocation and recognition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PerformanceObligation {
    pub obligation_id: ObligationId,
    pub line_no: u32,
    pub item_id: ItemId,
    pub quantity: i64,
    pub ssp_source: Option<SspSource>,
    /// Unit SSP resolved at allocation time (absent for observable lines).
    pub standalone_selling_price: Option<i64>,
    pub estimated_standalone_value: Option<i64>,
    pub allocated_price: Option<i64>,
    pub terms: RecognitionTerms,
    pub status: ObligationStatus,
}

impl PerformanceObligation {
    pub fn unallocated(id: ObligationId, line: &ContractLine) -> Self {
        Self {
            obligation_id: id,
            line_no: line.line_no,
            item_id: line.item_id.clone(),
            quantity: line.quantity,
            ssp_source: None,
            standalone_selling_price: None,
            estimated_standalone_value: None,
            allocated_price: None,
            terms: line.terms.clone(),
            status: ObligationStatus::Unallocated,
        }
    }

    pub fn method(&self) -> RecognitionMethod {
        self.terms.method
    }

    /// Successor obligations continue the same line of the same item.
    pub fn continues(&self, predecessor: &PerformanceObligation) -> bool {
        self.line_no == predecessor.line_no && self.item_id == predecessor.item_id
    }
}

impl Entity for PerformanceObligation {
    type Id = ObligationId;

    fn id(&self) -> &ObligationId {
        &self.obligation_id
    }
}
