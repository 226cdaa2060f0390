//! Source event intake: shape validation and processing status.
//!
//! Events are keyed by `(source_system, source_id)`. Linking them to
//! contracts, allocation and scheduling happen in the engine.

pub mod source;

pub use source::{
    ContractLink, IntakeError, OrderPayload, ProcessingStatus, SourceEvent, SourceEventInput,
    SourcePayload,
};
