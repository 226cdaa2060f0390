use chrono::{NaiveDate, Utc};
use tracing::info;

use forgerev_catalog::{
    AddLine, AmendLine, CreateBook, ItemId, MarkLinesReferenced, SspBook, SspBookCommand, SspBookId, SspCatalog,
    SspLine, SspLineId, SspQuote,
};
use forgerev_core::{AggregateId, Currency, TenantId};

use super::{EngineError, RevenueEngine, new_book};
use crate::event_store::EventStore;
use crate::read_model::TenantStore;
use crate::schedule_store::ScheduleStore;

impl<S, Q> RevenueEngine<S, Q>
where
    S: EventStore,
    Q: ScheduleStore,
{
    pub fn create_ssp_book(&self, tenant_id: TenantId, name: &str, currency: &str) -> Result<SspBook, EngineError> {
        let currency = Currency::parse(currency)?;
        let book_id = SspBookId::new(AggregateId::new());
        let out = self.run(tenant_id, book_id.0, &self.books, new_book, |_| {
            Ok(SspBookCommand::CreateBook(CreateBook {
                tenant_id,
                book_id,
                name: name.to_string(),
                currency: currency.clone(),
                occurred_at: Utc::now(),
            }))
        })?;
        info!(tenant_id = %tenant_id, book_id = %book_id, currency = %currency, "ssp book created");
        Ok(out.aggregate)
    }

    pub fn add_ssp_line(
        &self,
        tenant_id: TenantId,
        book_id: SspBookId,
        item_id: ItemId,
        unit_price: i64,
        min_quantity: Option<i64>,
        effective_from: NaiveDate,
    ) -> Result<SspLine, EngineError> {
        let line_id = SspLineId::new();
        let out = self.run(tenant_id, book_id.0, &self.books, new_book, |_| {
            Ok(SspBookCommand::AddLine(AddLine {
                tenant_id,
                book_id,
                line_id,
                item_id: item_id.clone(),
                unit_price,
                min_quantity,
                effective_from,
                occurred_at: Utc::now(),
            }))
        })?;
        info!(tenant_id = %tenant_id, book_id = %book_id, line_id = %line_id, item_id = %item_id, unit_price, "ssp line added");
        out.aggregate
            .line(line_id)
            .cloned()
            .ok_or_else(|| EngineError::not_found(format!("ssp line {line_id}")))
    }

    /// Fails once an allocation has referenced the line; a new price needs a new line.
    pub fn amend_ssp_line(
        &self,
        tenant_id: TenantId,
        book_id: SspBookId,
        line_id: SspLineId,
        unit_price: i64,
        min_quantity: Option<i64>,
    ) -> Result<SspLine, EngineError> {
        let out = self.run(tenant_id, book_id.0, &self.books, new_book, |_| {
            Ok(SspBookCommand::AmendLine(AmendLine {
                tenant_id,
                book_id,
                line_id,
                unit_price,
                min_quantity,
                occurred_at: Utc::now(),
            }))
        })?;
        out.aggregate
            .line(line_id)
            .cloned()
            .ok_or_else(|| EngineError::not_found(format!("ssp line {line_id}")))
    }

    pub fn designate_default_book(&self, tenant_id: TenantId, book_id: SspBookId) -> Result<(), EngineError> {
        if self.ssp_book(tenant_id, book_id).is_none() {
            return Err(EngineError::not_found(format!("ssp book {book_id}")));
        }
        self.default_books.upsert(tenant_id, (), book_id);
        info!(tenant_id = %tenant_id, book_id = %book_id, "default ssp book designated");
        Ok(())
    }

    pub fn default_book(&self, tenant_id: TenantId) -> Option<SspBookId> {
        self.default_books.get(tenant_id, &())
    }

    pub fn ssp_book(&self, tenant_id: TenantId, book_id: SspBookId) -> Option<SspBook> {
        self.books.get(tenant_id, book_id.0).filter(SspBook::is_created)
    }

    pub fn ssp_books(&self, tenant_id: TenantId) -> Vec<SspBook> {
        let mut books: Vec<SspBook> = self.books.list(tenant_id).into_iter().filter(SspBook::is_created).collect();
        books.sort_by(|a, b| a.name().cmp(b.name()).then(a.id_typed().cmp(&b.id_typed())));
        books
    }

    /// Point-in-time view of the tenant's books for allocation.
    pub fn ssp_catalog(&self, tenant_id: TenantId) -> SspCatalog {
        SspCatalog::new(self.books.list(tenant_id), self.default_book(tenant_id))
    }

    pub fn resolve_ssp(
        &self,
        tenant_id: TenantId,
        item_id: &ItemId,
        as_of: NaiveDate,
        book: Option<SspBookId>,
    ) -> Result<SspQuote, EngineError> {
        Ok(self.ssp_catalog(tenant_id).resolve(item_id, as_of, book)?)
    }

    /// Freeze the catalog lines a committed allocation relied on.
    pub(crate) fn mark_lines_referenced(
        &self,
        tenant_id: TenantId,
        refs: &[(SspBookId, SspLineId)],
    ) -> Result<(), EngineError> {
        let mut books: Vec<SspBookId> = refs.iter().map(|(b, _)| *b).collect();
        books.sort();
        books.dedup();

        for book_id in books {
            let line_ids: Vec<SspLineId> = refs.iter().filter(|(b, _)| *b == book_id).map(|(_, l)| *l).collect();
            self.run(tenant_id, book_id.0, &self.books, new_book, |_| {
                Ok(SspBookCommand::MarkLinesReferenced(MarkLinesReferenced {
                    tenant_id,
                    book_id,
                    line_ids: line_ids.clone(),
                    occurred_at: Utc::now(),
                }))
            })?;
        }
        Ok(())
    }
}
