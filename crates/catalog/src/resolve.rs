//! SSP resolution across a tenant's books.

use std::collections::HashMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use forgerev_core::Currency;

use crate::book::{ItemId, SspBook, SspBookId, SspLineId};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CatalogError {
    #[error("no SSP for item {item_id} as of {as_of} in book {book_id}")]
    SspNotFound {
        item_id: ItemId,
        as_of: NaiveDate,
        book_id: SspBookId,
    },

    #[error("ssp book {0} not found")]
    BookNotFound(SspBookId),

    #[error("no default ssp book designated")]
    NoDefaultBook,

    #[error("ssp book {book_id} is priced in {book_currency}, contract is in {expected}")]
    CurrencyMismatch {
        book_id: SspBookId,
        book_currency: Currency,
        expected: Currency,
    },
}

/// Resolved price plus the line it came from (for audit lineage).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SspQuote {
    pub book_id: SspBookId,
    pub line_id: SspLineId,
    pub item_id: ItemId,
    pub unit_price: i64,
    pub effective_from: NaiveDate,
    pub currency: Currency,
}

/// Read-only view over a tenant's SSP books.
///
/// Built from rehydrated books; holds no locks and does no IO, so it can be
/// handed to the allocation step as plain data.
#[derive(Debug, Clone, Default)]
pub struct SspCatalog {
    books: HashMap<SspBookId, SspBook>,
    default_book: Option<SspBookId>,
}

impl SspCatalog {
    pub fn new(books: impl IntoIterator<Item = SspBook>, default_book: Option<SspBookId>) -> Self {
        let books = books
            .into_iter()
            .filter(|b| b.is_created())
            .map(|b| (b.id_typed(), b))
            .collect();
        Self {
            books,
            default_book,
        }
    }

    pub fn default_book(&self) -> Option<SspBookId> {
        self.default_book
    }

    pub fn book(&self, id: SspBookId) -> Option<&SspBook> {
        self.books.get(&id)
    }

    /// Resolve the unit SSP for a single unit of `item_id`.
    pub fn resolve(
        &self,
        item_id: &ItemId,
        as_of: NaiveDate,
        book: Option<SspBookId>,
    ) -> Result<SspQuote, CatalogError> {
        self.resolve_for_quantity(item_id, as_of, 1, book, None)
    }

    /// Resolve the unit SSP for `quantity` units, honouring quantity breakpoints.
    ///
    /// When `expected_currency` is given the chosen book must be priced in it.
    pub fn resolve_for_quantity(
        &self,
        item_id: &ItemId,
        as_of: NaiveDate,
        quantity: i64,
        book: Option<SspBookId>,
        expected_currency: Option<&Currency>,
    ) -> Result<SspQuote, CatalogError> {
        let book_id = match book.or(self.default_book) {
            Some(id) => id,
            None => return Err(CatalogError::NoDefaultBook),
        };
        let book = self
            .books
            .get(&book_id)
            .ok_or(CatalogError::BookNotFound(book_id))?;
        let currency = book
            .currency()
            .cloned()
            .ok_or(CatalogError::BookNotFound(book_id))?;

        if let Some(expected) = expected_currency {
            if &currency != expected {
                return Err(CatalogError::CurrencyMismatch {
                    book_id,
                    book_currency: currency,
                    expected: expected.clone(),
                });
            }
        }

        let line = book
            .eligible_line(item_id, as_of, quantity)
            .ok_or_else(|| CatalogError::SspNotFound {
                item_id: item_id.clone(),
                as_of,
                book_id,
            })?;

        Ok(SspQuote {
            book_id,
            line_id: line.line_id,
            item_id: line.item_id.clone(),
            unit_price: line.unit_price,
            effective_from: line.effective_from,
            currency,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::book::{AddLine, CreateBook, SspBookCommand};
    use chrono::Utc;
    use forgerev_core::{AggregateId, TenantId};
    use forgerev_events::execute;
    use proptest::prelude::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn item(id: &str) -> ItemId {
        ItemId::new(id).unwrap()
    }

    fn book_with(lines: &[(&str, i64, Option<i64>, NaiveDate)]) -> SspBook {
        let tenant_id = TenantId::new();
        let book_id = SspBookId::new(AggregateId::new());
        let mut book = SspBook::empty(book_id);
        execute(
            &mut book,
            &SspBookCommand::CreateBook(CreateBook {
                tenant_id,
                book_id,
                name: "standard".to_string(),
                currency: Currency::parse("USD").unwrap(),
                occurred_at: Utc::now(),
            }),
        )
        .unwrap();

        for (item_id, price, min_qty, from) in lines {
            execute(
                &mut book,
                &SspBookCommand::AddLine(AddLine {
                    tenant_id,
                    book_id,
                    line_id: SspLineId::new(),
                    item_id: item(item_id),
                    unit_price: *price,
                    min_quantity: *min_qty,
                    effective_from: *from,
                    occurred_at: Utc::now(),
                }),
            )
            .unwrap();
        }
        book
    }

    #[test]
    fn latest_effective_line_wins() {
        let book = book_with(&[
            ("SKU-1", 4_000_000, None, date(2025, 1, 1)),
            ("SKU-1", 5_000_000, None, date(2026, 1, 1)),
        ]);
        let book_id = book.id_typed();
        let catalog = SspCatalog::new([book], Some(book_id));

        let q = catalog.resolve(&item("SKU-1"), date(2026, 3, 1), None).unwrap();
        assert_eq!(q.unit_price, 5_000_000);
        assert_eq!(q.effective_from, date(2026, 1, 1));

        let q = catalog.resolve(&item("SKU-1"), date(2025, 12, 31), None).unwrap();
        assert_eq!(q.unit_price, 4_000_000);
    }

    #[test]
    fn nothing_effective_yet_is_not_found() {
        let book = book_with(&[("SKU-1", 100, None, date(2026, 1, 1))]);
        let book_id = book.id_typed();
        let catalog = SspCatalog::new([book], Some(book_id));

        let err = catalog.resolve(&item("SKU-1"), date(2025, 6, 1), None).unwrap_err();
        assert!(matches!(err, CatalogError::SspNotFound { .. }));
        let err = catalog.resolve(&item("SKU-2"), date(2026, 6, 1), None).unwrap_err();
        assert!(matches!(err, CatalogError::SspNotFound { .. }));
    }

    #[test]
    fn quantity_breakpoints_pick_highest_reached_tier() {
        let book = book_with(&[
            ("SKU-1", 1_000, None, date(2026, 1, 1)),
            ("SKU-1", 900, Some(10), date(2026, 1, 1)),
            ("SKU-1", 800, Some(100), date(2026, 1, 1)),
        ]);
        let book_id = book.id_typed();
        let catalog = SspCatalog::new([book], Some(book_id));
        let as_of = date(2026, 2, 1);

        let price = |qty| {
            catalog
                .resolve_for_quantity(&item("SKU-1"), as_of, qty, None, None)
                .unwrap()
                .unit_price
        };
        assert_eq!(price(1), 1_000);
        assert_eq!(price(10), 900);
        assert_eq!(price(99), 900);
        assert_eq!(price(250), 800);
    }

    #[test]
    fn explicit_book_overrides_default() {
        let default = book_with(&[("SKU-1", 100, None, date(2026, 1, 1))]);
        let promo = book_with(&[("SKU-1", 70, None, date(2026, 1, 1))]);
        let (default_id, promo_id) = (default.id_typed(), promo.id_typed());
        let catalog = SspCatalog::new([default, promo], Some(default_id));

        let q = catalog
            .resolve(&item("SKU-1"), date(2026, 1, 1), Some(promo_id))
            .unwrap();
        assert_eq!(q.unit_price, 70);
        assert_eq!(q.book_id, promo_id);
    }

    #[test]
    fn missing_default_book_is_reported() {
        let book = book_with(&[("SKU-1", 100, None, date(2026, 1, 1))]);
        let catalog = SspCatalog::new([book], None);
        assert_eq!(
            catalog.resolve(&item("SKU-1"), date(2026, 1, 1), None),
            Err(CatalogError::NoDefaultBook)
        );
    }

    #[test]
    fn currency_must_match_contract() {
        let book = book_with(&[("SKU-1", 100, None, date(2026, 1, 1))]);
        let book_id = book.id_typed();
        let catalog = SspCatalog::new([book], Some(book_id));
        let eur = Currency::parse("EUR").unwrap();

        let err = catalog
            .resolve_for_quantity(&item("SKU-1"), date(2026, 1, 1), 1, None, Some(&eur))
            .unwrap_err();
        assert!(matches!(err, CatalogError::CurrencyMismatch { .. }));
    }

    proptest! {
        #![proptest_config(ProptestConfig { cases: 128, .. ProptestConfig::default() })]

        #[test]
        fn resolution_picks_latest_line_not_after_as_of(
            offsets in prop::collection::btree_set(0i64..720, 1..8),
            day_offset in 0i64..800
        ) {
            let base = date(2025, 1, 1);
            let lines: Vec<(&str, i64, Option<i64>, NaiveDate)> = offsets
                .iter()
                .map(|o| ("SKU-1", *o, None, base + chrono::Duration::days(*o)))
                .collect();
            let book = book_with(&lines);
            let book_id = book.id_typed();
            let catalog = SspCatalog::new([book], Some(book_id));
            let as_of = base + chrono::Duration::days(day_offset);

            let expected = offsets.iter().filter(|o| **o <= day_offset).max().copied();
            match (catalog.resolve(&item("SKU-1"), as_of, None), expected) {
                (Ok(q), Some(o)) => prop_assert_eq!(q.unit_price, o),
                (Err(CatalogError::SspNotFound { .. }), None) => {}
                (other, exp) => prop_assert!(false, "got {:?}, expected {:?}", other, exp),
            }
        }
    }
}
