use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use forgerev_core::{Aggregate, AggregateId, AggregateRoot, Currency, DomainError, TenantId};
use forgerev_events::Event;

/// SSP book identifier (aggregate id).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SspBookId(pub AggregateId);

impl SspBookId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for SspBookId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Identifier of a single price line inside a book.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SspLineId(pub Uuid);

impl SspLineId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for SspLineId {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Display for SspLineId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Opaque item identifier owned by the item master (outside this engine).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(String);

impl ItemId {
    pub fn new(id: impl Into<String>) -> Result<Self, DomainError> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(DomainError::validation("item_id cannot be empty"));
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for ItemId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// One effective-dated standalone selling price.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SspLine {
    pub line_id: SspLineId,
    pub item_id: ItemId,
    /// Unit price in minor currency units.
    pub unit_price: i64,
    /// Optional quantity breakpoint: the line only applies from this quantity.
    pub min_quantity: Option<i64>,
    pub effective_from: NaiveDate,
    /// Set once a finalized allocation used this line; the line is frozen after that.
    pub referenced: bool,
}

impl SspLine {
    pub fn applies_to(&self, item_id: &ItemId, as_of: NaiveDate, quantity: i64) -> bool {
        &self.item_id == item_id
            && self.effective_from <= as_of
            && self.min_quantity.map_or(true, |min| min <= quantity)
    }
}

/// Aggregate root: SspBook (named, currency-scoped price list).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SspBook {
    id: SspBookId,
    tenant_id: Option<TenantId>,
    name: String,
    currency: Option<Currency>,
    lines: Vec<SspLine>,
    version: u64,
    created: bool,
}

impl SspBook {
    /// Empty aggregate for rehydration.
    pub fn empty(id: SspBookId) -> Self {
        Self {
            id,
            tenant_id: None,
            name: String::new(),
            currency: None,
            lines: Vec::new(),
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> SspBookId {
        self.id
    }

    pub fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn currency(&self) -> Option<&Currency> {
        self.currency.as_ref()
    }

    pub fn lines(&self) -> &[SspLine] {
        &self.lines
    }

    pub fn is_created(&self) -> bool {
        self.created
    }

    pub fn line(&self, line_id: SspLineId) -> Option<&SspLine> {
        self.lines.iter().find(|l| l.line_id == line_id)
    }

    /// Latest eligible line for `item_id` as of `as_of`.
    ///
    /// Among lines sharing the latest `effective_from`, the highest
    /// breakpoint that `quantity` reaches wins.
    pub fn eligible_line(&self, item_id: &ItemId, as_of: NaiveDate, quantity: i64) -> Option<&SspLine> {
        self.lines
            .iter()
            .filter(|l| l.applies_to(item_id, as_of, quantity))
            .max_by_key(|l| (l.effective_from, l.min_quantity.unwrap_or(0)))
    }
}

impl AggregateRoot for SspBook {
    type Id = SspBookId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: CreateBook.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateBook {
    pub tenant_id: TenantId,
    pub book_id: SspBookId,
    pub name: String,
    pub currency: Currency,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AddLine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddLine {
    pub tenant_id: TenantId,
    pub book_id: SspBookId,
    pub line_id: SspLineId,
    pub item_id: ItemId,
    pub unit_price: i64,
    pub min_quantity: Option<i64>,
    pub effective_from: NaiveDate,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AmendLine (only while no allocation references the line).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AmendLine {
    pub tenant_id: TenantId,
    pub book_id: SspBookId,
    pub line_id: SspLineId,
    pub unit_price: i64,
    pub min_quantity: Option<i64>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: MarkLinesReferenced (issued when an allocation is committed).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkLinesReferenced {
    pub tenant_id: TenantId,
    pub book_id: SspBookId,
    pub line_ids: Vec<SspLineId>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SspBookCommand {
    CreateBook(CreateBook),
    AddLine(AddLine),
    AmendLine(AmendLine),
    MarkLinesReferenced(MarkLinesReferenced),
}

/// Event: BookCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookCreated {
    pub tenant_id: TenantId,
    pub book_id: SspBookId,
    pub name: String,
    pub currency: Currency,
    pub occurred_at: DateTime<Utc>,
}

/// Event: LineAdded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineAdded {
    pub tenant_id: TenantId,
    pub book_id: SspBookId,
    pub line: SspLine,
    pub occurred_at: DateTime<Utc>,
}

/// Event: LineAmended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineAmended {
    pub tenant_id: TenantId,
    pub book_id: SspBookId,
    pub line_id: SspLineId,
    pub unit_price: i64,
    pub min_quantity: Option<i64>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: LinesReferenced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinesReferenced {
    pub tenant_id: TenantId,
    pub book_id: SspBookId,
    pub line_ids: Vec<SspLineId>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SspBookEvent {
    BookCreated(BookCreated),
    LineAdded(LineAdded),
    LineAmended(LineAmended),
    LinesReferenced(LinesReferenced),
}

impl Event for SspBookEvent {
    fn event_type(&self) -> &'static str {
        match self {
            SspBookEvent::BookCreated(_) => "catalog.ssp_book.created",
            SspBookEvent::LineAdded(_) => "catalog.ssp_book.line_added",
            SspBookEvent::LineAmended(_) => "catalog.ssp_book.line_amended",
            SspBookEvent::LinesReferenced(_) => "catalog.ssp_book.lines_referenced",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            SspBookEvent::BookCreated(e) => e.occurred_at,
            SspBookEvent::LineAdded(e) => e.occurred_at,
            SspBookEvent::LineAmended(e) => e.occurred_at,
            SspBookEvent::LinesReferenced(e) => e.occurred_at,
        }
    }
}

impl Aggregate for SspBook {
    type Command = SspBookCommand;
    type Event = SspBookEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            SspBookEvent::BookCreated(e) => {
                self.id = e.book_id;
                self.tenant_id = Some(e.tenant_id);
                self.name = e.name.clone();
                self.currency = Some(e.currency.clone());
                self.created = true;
            }
            SspBookEvent::LineAdded(e) => {
                self.lines.push(e.line.clone());
            }
            SspBookEvent::LineAmended(e) => {
                if let Some(line) = self.lines.iter_mut().find(|l| l.line_id == e.line_id) {
                    line.unit_price = e.unit_price;
                    line.min_quantity = e.min_quantity;
                }
            }
            SspBookEvent::LinesReferenced(e) => {
                for line in self.lines.iter_mut() {
                    if e.line_ids.contains(&line.line_id) {
                        line.referenced = true;
                    }
                }
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            SspBookCommand::CreateBook(cmd) => self.handle_create(cmd),
            SspBookCommand::AddLine(cmd) => self.handle_add_line(cmd),
            SspBookCommand::AmendLine(cmd) => self.handle_amend_line(cmd),
            SspBookCommand::MarkLinesReferenced(cmd) => self.handle_mark_referenced(cmd),
        }
    }
}

impl SspBook {
    fn ensure_created(&self, tenant_id: TenantId) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found(format!("ssp book {}", self.id)));
        }
        if self.tenant_id != Some(tenant_id) {
            return Err(DomainError::invariant("tenant mismatch"));
        }
        Ok(())
    }

    fn validate_price(unit_price: i64, min_quantity: Option<i64>) -> Result<(), DomainError> {
        if unit_price < 0 {
            return Err(DomainError::validation("unit_price cannot be negative"));
        }
        if let Some(min) = min_quantity {
            if min <= 0 {
                return Err(DomainError::validation("min_quantity must be positive"));
            }
        }
        Ok(())
    }

    fn handle_create(&self, cmd: &CreateBook) -> Result<Vec<SspBookEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("ssp book already exists"));
        }
        if cmd.name.trim().is_empty() {
            return Err(DomainError::validation("book name cannot be empty"));
        }

        Ok(vec![SspBookEvent::BookCreated(BookCreated {
            tenant_id: cmd.tenant_id,
            book_id: cmd.book_id,
            name: cmd.name.trim().to_string(),
            currency: cmd.currency.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_add_line(&self, cmd: &AddLine) -> Result<Vec<SspBookEvent>, DomainError> {
        self.ensure_created(cmd.tenant_id)?;
        Self::validate_price(cmd.unit_price, cmd.min_quantity)?;

        if self.line(cmd.line_id).is_some() {
            return Err(DomainError::conflict(format!("ssp line {} already exists", cmd.line_id)));
        }

        let duplicate = self.lines.iter().any(|l| {
            l.item_id == cmd.item_id
                && l.effective_from == cmd.effective_from
                && l.min_quantity == cmd.min_quantity
        });
        if duplicate {
            return Err(DomainError::conflict(format!(
                "item {} already has a line effective {}; add a new effective-dated line",
                cmd.item_id, cmd.effective_from
            )));
        }

        Ok(vec![SspBookEvent::LineAdded(LineAdded {
            tenant_id: cmd.tenant_id,
            book_id: cmd.book_id,
            line: SspLine {
                line_id: cmd.line_id,
                item_id: cmd.item_id.clone(),
                unit_price: cmd.unit_price,
                min_quantity: cmd.min_quantity,
                effective_from: cmd.effective_from,
                referenced: false,
            },
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_amend_line(&self, cmd: &AmendLine) -> Result<Vec<SspBookEvent>, DomainError> {
        self.ensure_created(cmd.tenant_id)?;
        Self::validate_price(cmd.unit_price, cmd.min_quantity)?;

        let line = self
            .line(cmd.line_id)
            .ok_or_else(|| DomainError::not_found(format!("ssp line {}", cmd.line_id)))?;
        if line.referenced {
            return Err(DomainError::invariant(format!(
                "ssp line {} is referenced by a finalized allocation; add a new effective-dated line instead",
                cmd.line_id
            )));
        }

        Ok(vec![SspBookEvent::LineAmended(LineAmended {
            tenant_id: cmd.tenant_id,
            book_id: cmd.book_id,
            line_id: cmd.line_id,
            unit_price: cmd.unit_price,
            min_quantity: cmd.min_quantity,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_mark_referenced(
        &self,
        cmd: &MarkLinesReferenced,
    ) -> Result<Vec<SspBookEvent>, DomainError> {
        self.ensure_created(cmd.tenant_id)?;

        let mut fresh = Vec::new();
        for id in &cmd.line_ids {
            let line = self
                .line(*id)
                .ok_or_else(|| DomainError::validation(format!("unknown ssp line {id}")))?;
            if !line.referenced && !fresh.contains(id) {
                fresh.push(*id);
            }
        }

        // Already frozen lines make this a no-op.
        if fresh.is_empty() {
            return Ok(vec![]);
        }

        Ok(vec![SspBookEvent::LinesReferenced(LinesReferenced {
            tenant_id: cmd.tenant_id,
            book_id: cmd.book_id,
            line_ids: fresh,
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use forgerev_events::execute;

    fn usd() -> Currency {
        Currency::parse("USD").unwrap()
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn created_book(tenant_id: TenantId) -> SspBook {
        let book_id = SspBookId::new(AggregateId::new());
        let mut book = SspBook::empty(book_id);
        execute(
            &mut book,
            &SspBookCommand::CreateBook(CreateBook {
                tenant_id,
                book_id,
                name: "FY26 list".to_string(),
                currency: usd(),
                occurred_at: Utc::now(),
            }),
        )
        .unwrap();
        book
    }

    fn add_line(book: &mut SspBook, tenant_id: TenantId, item: &str, price: i64, from: NaiveDate) -> SspLineId {
        let line_id = SspLineId::new();
        let book_id = book.id_typed();
        execute(
            book,
            &SspBookCommand::AddLine(AddLine {
                tenant_id,
                book_id,
                line_id,
                item_id: ItemId::new(item).unwrap(),
                unit_price: price,
                min_quantity: None,
                effective_from: from,
                occurred_at: Utc::now(),
            }),
        )
        .unwrap();
        line_id
    }

    #[test]
    fn create_then_add_line() {
        let tenant_id = TenantId::new();
        let mut book = created_book(tenant_id);
        add_line(&mut book, tenant_id, "SKU-1", 5_000_000, date(2026, 1, 1));

        assert_eq!(book.lines().len(), 1);
        assert_eq!(book.version(), 2);
        assert_eq!(book.currency(), Some(&usd()));
    }

    #[test]
    fn same_item_and_date_needs_new_effective_date() {
        let tenant_id = TenantId::new();
        let mut book = created_book(tenant_id);
        add_line(&mut book, tenant_id, "SKU-1", 100, date(2026, 1, 1));

        let err = book
            .handle(&SspBookCommand::AddLine(AddLine {
                tenant_id,
                book_id: book.id_typed(),
                line_id: SspLineId::new(),
                item_id: ItemId::new("SKU-1").unwrap(),
                unit_price: 200,
                min_quantity: None,
                effective_from: date(2026, 1, 1),
                occurred_at: Utc::now(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));
    }

    #[test]
    fn referenced_line_cannot_be_amended() {
        let tenant_id = TenantId::new();
        let mut book = created_book(tenant_id);
        let line_id = add_line(&mut book, tenant_id, "SKU-1", 100, date(2026, 1, 1));

        let book_id = book.id_typed();
        execute(
            &mut book,
            &SspBookCommand::MarkLinesReferenced(MarkLinesReferenced {
                tenant_id,
                book_id,
                line_ids: vec![line_id],
                occurred_at: Utc::now(),
            }),
        )
        .unwrap();

        let err = book
            .handle(&SspBookCommand::AmendLine(AmendLine {
                tenant_id,
                book_id: book.id_typed(),
                line_id,
                unit_price: 150,
                min_quantity: None,
                occurred_at: Utc::now(),
            }))
            .unwrap_err();
        match err {
            DomainError::InvariantViolation(msg) => assert!(msg.contains("finalized allocation")),
            other => panic!("expected invariant violation, got {other:?}"),
        }
    }

    #[test]
    fn marking_already_referenced_lines_is_a_no_op() {
        let tenant_id = TenantId::new();
        let mut book = created_book(tenant_id);
        let line_id = add_line(&mut book, tenant_id, "SKU-1", 100, date(2026, 1, 1));

        let cmd = SspBookCommand::MarkLinesReferenced(MarkLinesReferenced {
            tenant_id,
            book_id: book.id_typed(),
            line_ids: vec![line_id, line_id],
            occurred_at: Utc::now(),
        });
        let first = execute(&mut book, &cmd).unwrap();
        assert_eq!(first.len(), 1);
        assert!(book.handle(&cmd).unwrap().is_empty());
    }

    #[test]
    fn unreferenced_line_can_be_amended() {
        let tenant_id = TenantId::new();
        let mut book = created_book(tenant_id);
        let line_id = add_line(&mut book, tenant_id, "SKU-1", 100, date(2026, 1, 1));

        let book_id = book.id_typed();
        execute(
            &mut book,
            &SspBookCommand::AmendLine(AmendLine {
                tenant_id,
                book_id,
                line_id,
                unit_price: 150,
                min_quantity: Some(10),
                occurred_at: Utc::now(),
            }),
        )
        .unwrap();

        let line = book.line(line_id).unwrap();
        assert_eq!(line.unit_price, 150);
        assert_eq!(line.min_quantity, Some(10));
    }

    #[test]
    fn other_tenant_cannot_touch_book() {
        let tenant_id = TenantId::new();
        let book = created_book(tenant_id);

        let err = book
            .handle(&SspBookCommand::AddLine(AddLine {
                tenant_id: TenantId::new(),
                book_id: book.id_typed(),
                line_id: SspLineId::new(),
                item_id: ItemId::new("SKU-1").unwrap(),
                unit_price: 1,
                min_quantity: None,
                effective_from: date(2026, 1, 1),
                occurred_at: Utc::now(),
            }))
            .unwrap_err();
        assert_eq!(err, DomainError::invariant("tenant mismatch"));
    }
}
