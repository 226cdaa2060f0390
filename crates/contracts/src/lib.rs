//! Revenue contracts and the relative-SSP allocation engine.
//!
//! A contract is an append-only chain of versions. Each version owns its
//! performance obligations; a modification drafts version N+1 and, once it is
//! allocated, supersedes version N. Nothing in a committed version is edited.

pub mod allocation;
pub mod contract;
pub mod obligation;

pub use allocation::{AllocationError, AllocationOutcome, LineAllocation, SspSource, allocate, allocate_relative};
pub use contract::{
    AllocationRecorded, CancelContract, ContractCancelled, ContractHeader, ContractId, ContractNumber,
    ContractVersion, DraftAndAllocate, DraftVersion, RecordAllocation, RevenueContract,
    RevenueContractCommand, RevenueContractEvent, SourceEventKey, VersionDrafted, VersionStatus,
    VersionSuperseded,
};
pub use obligation::{
    ContractLine, Milestone, ObligationId, ObligationStatus, PerformanceObligation, RecognitionMethod,
    RecognitionTerms,
};
