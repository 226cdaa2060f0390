//! SSP catalog: versioned standalone-selling-price reference data.
//!
//! Pure domain logic only: no IO, no HTTP, no persistence concerns.

pub mod book;
pub mod resolve;

pub use book::{
    AddLine, AmendLine, BookCreated, CreateBook, ItemId, LineAdded, LineAmended, LinesReferenced,
    MarkLinesReferenced, SspBook, SspBookCommand, SspBookEvent, SspBookId, SspLine, SspLineId,
};
pub use resolve::{CatalogError, SspCatalog, SspQuote};
