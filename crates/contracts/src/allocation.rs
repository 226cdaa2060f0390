//! Relative standalone-selling-price allocation.
//!
//! Observable lines keep their fixed value. The remainder of the transaction
//! price is split across the other lines in proportion to their estimated
//! standalone value; the last proportional line absorbs rounding so the
//! allocation always sums to the transaction price exactly.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use forgerev_catalog::{CatalogError, ItemId, SspBookId, SspCatalog, SspLineId};
use forgerev_core::{Currency, split_by_weights};

use crate::contract::ContractVersion;

/// Where a line's standalone value came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SspSource {
    Catalog {
        book_id: SspBookId,
        line_id: SspLineId,
        effective_from: NaiveDate,
    },
    Explicit,
    Observable,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineAllocation {
    pub line_no: u32,
    pub ssp_source: SspSource,
    pub standalone_selling_price: Option<i64>,
    pub estimated_standalone_value: i64,
    pub allocated_price: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationOutcome {
    pub lines: Vec<LineAllocation>,
    pub total_allocated: i64,
}

impl AllocationOutcome {
    /// Catalog lines the allocation relied on (they become immutable once committed).
    pub fn referenced_ssp_lines(&self) -> Vec<(SspBookId, SspLineId)> {
        let mut refs: Vec<(SspBookId, SspLineId)> = self
            .lines
            .iter()
            .filter_map(|l| match &l.ssp_source {
                SspSource::Catalog { book_id, line_id, .. } => Some((*book_id, *line_id)),
                _ => None,
            })
            .collect();
        refs.sort();
        refs.dedup();
        refs
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AllocationError {
    #[error("contract version has no lines")]
    NoLines,

    #[error("transaction price cannot be negative")]
    NegativePrice,

    #[error("line {line_no}: no SSP for item {item_id} as of {as_of} and no explicit price supplied")]
    SspNotFound {
        line_no: u32,
        item_id: ItemId,
        as_of: NaiveDate,
    },

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error("standalone value pool is zero, cannot distribute {remainder}")]
    Degenerate { remainder: i64 },

    #[error("observable prices ({observable_total}) exceed the transaction price ({transaction_price})")]
    ObservableExceedsPrice {
        observable_total: i64,
        transaction_price: i64,
    },

    #[error("every line is observable but {remainder} is left to allocate")]
    UnallocatedRemainder { remainder: i64 },

    #[error("amount overflow on line {line_no}")]
    Overflow { line_no: u32 },
}

/// Split `remainder` across `values` proportionally.
///
/// With no values the remainder must be zero. A pool of zero total value is
/// `Degenerate`: nothing is divided by zero.
pub fn allocate_relative(remainder: i64, values: &[i64]) -> Result<Vec<i64>, AllocationError> {
    if values.is_empty() {
        if remainder == 0 {
            return Ok(Vec::new());
        }
        return Err(AllocationError::UnallocatedRemainder { remainder });
    }

    let weights: Vec<i128> = values.iter().map(|v| *v as i128).collect();
    split_by_weights(remainder, &weights).ok_or(AllocationError::Degenerate { remainder })
}

/// Allocate a drafted contract version's transaction price across its lines.
///
/// SSPs are resolved as of the version's effective date. Any failure blocks
/// the whole contract; nothing is partially allocated.
pub fn allocate(
    version: &ContractVersion,
    currency: &Currency,
    catalog: &SspCatalog,
) -> Result<AllocationOutcome, AllocationError> {
    if version.lines.is_empty() {
        return Err(AllocationError::NoLines);
    }
    if version.transaction_price < 0 {
        return Err(AllocationError::NegativePrice);
    }

    let as_of = version.effective_date;
    let mut priced = Vec::with_capacity(version.lines.len());
    let mut observable_total: i64 = 0;

    for line in &version.lines {
        if let Some(value) = line.observable_price {
            observable_total = observable_total
                .checked_add(value)
                .ok_or(AllocationError::Overflow { line_no: line.line_no })?;
            priced.push((line.line_no, SspSource::Observable, None, value));
            continue;
        }

        let resolved = catalog.resolve_for_quantity(
            &line.item_id,
            as_of,
            line.quantity,
            version.ssp_book,
            Some(currency),
        );
        let (source, unit) = match resolved {
            Ok(quote) => (
                SspSource::Catalog {
                    book_id: quote.book_id,
                    line_id: quote.line_id,
                    effective_from: quote.effective_from,
                },
                quote.unit_price,
            ),
            Err(CatalogError::SspNotFound { .. } | CatalogError::NoDefaultBook) => {
                match line.explicit_ssp {
                    Some(unit) => (SspSource::Explicit, unit),
                    None => {
                        return Err(AllocationError::SspNotFound {
                            line_no: line.line_no,
                            item_id: line.item_id.clone(),
                            as_of,
                        });
                    }
                }
            }
            Err(other) => return Err(other.into()),
        };

        let value = unit
            .checked_mul(line.quantity)
            .ok_or(AllocationError::Overflow { line_no: line.line_no })?;
        priced.push((line.line_no, source, Some(unit), value));
    }

    if observable_total > version.transaction_price {
        return Err(AllocationError::ObservableExceedsPrice {
            observable_total,
            transaction_price: version.transaction_price,
        });
    }

    let remainder = version.transaction_price - observable_total;
    let pool: Vec<i64> = priced
        .iter()
        .filter(|(_, source, _, _)| *source != SspSource::Observable)
        .map(|(_, _, _, value)| *value)
        .collect();
    let mut shares = allocate_relative(remainder, &pool)?.into_iter();

    let mut lines = Vec::with_capacity(priced.len());
    for (line_no, source, unit, value) in priced {
        let allocated_price = if source == SspSource::Observable {
            value
        } else {
            shares.next().ok_or(AllocationError::Degenerate { remainder })?
        };
        lines.push(LineAllocation {
            line_no,
            ssp_source: source,
            standalone_selling_price: unit,
            estimated_standalone_value: value,
            allocated_price,
        });
    }

    Ok(AllocationOutcome {
        total_allocated: lines.iter().map(|l| l.allocated_price).sum(),
        lines,
    })
}
