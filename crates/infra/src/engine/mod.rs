//! Revenue engine services.
//!
//! `RevenueEngine` wires the aggregates, the schedule store and the read-side
//! views together and exposes the operations callers use: SSP maintenance,
//! contract drafting and allocation, period lifecycle with sweep and close,
//! source-event intake, audit trace and deferred-revenue balances.
//!
//! Writes go through the command dispatcher (optimistic, bounded retry);
//! committed streams are replayed into the views before an operation
//! returns, so a caller always reads its own writes.

mod catalog;
mod close;
mod contracts;
mod error;
mod intake;
mod periods;
mod scheduling;
mod trace;

use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;

use forgerev_catalog::{SspBook, SspBookId};
use forgerev_contracts::{ContractId, ContractNumber, RevenueContract, SourceEventKey};
use forgerev_core::{Aggregate, AggregateId, DomainError, TenantId};
use forgerev_events::{EventBus, EventEnvelope, InMemoryEventBus, Subscription};
use forgerev_intake::SourceEvent;
use forgerev_periods::{Period, PeriodId};
use forgerev_recognition::Scheduler;

use crate::command_dispatcher::{CommandDispatcher, DispatchError, Dispatched};
use crate::config::EngineConfig;
use crate::event_store::{EventStore, InMemoryEventStore, StoredEvent};
use crate::projections::AggregateView;
use crate::read_model::InMemoryTenantStore;
use crate::schedule_store::{InMemoryScheduleStore, ScheduleStore};

pub use close::{PeriodLocks, PostableEntry, SweepReport};
pub use contracts::{ContractDraft, DeferredRevenue, DeferredRevenueSummary, ObligationView};
pub use error::EngineError;
pub use intake::IngestOutcome;
pub use trace::{ContractSegment, PostingStatus, Trace};

pub const SSP_BOOK_AGGREGATE: &str = "catalog.ssp_book";
pub const CONTRACT_AGGREGATE: &str = "revenue.contract";
pub const PERIOD_AGGREGATE: &str = "ledger.period";

pub type EnvelopeBus = InMemoryEventBus<EventEnvelope<JsonValue>>;

fn new_book(id: AggregateId) -> SspBook {
    SspBook::empty(SspBookId::new(id))
}

fn new_contract(id: AggregateId) -> RevenueContract {
    RevenueContract::empty(ContractId::new(id))
}

fn new_period(id: AggregateId) -> Period {
    Period::empty(PeriodId::new(id))
}

pub struct RevenueEngine<S = Arc<InMemoryEventStore>, Q = Arc<InMemoryScheduleStore>> {
    config: EngineConfig,
    scheduler: Scheduler,
    dispatcher: CommandDispatcher<S, Arc<EnvelopeBus>>,
    events: Arc<EnvelopeBus>,
    schedules: Q,
    books: AggregateView<SspBook>,
    contracts: AggregateView<RevenueContract>,
    periods: AggregateView<Period>,
    directory: InMemoryTenantStore<ContractNumber, ContractId>,
    default_books: InMemoryTenantStore<(), SspBookId>,
    source_events: InMemoryTenantStore<SourceEventKey, SourceEvent>,
    postings: Arc<InMemoryEventBus<PostableEntry>>,
    period_locks: PeriodLocks,
}

impl RevenueEngine {
    /// Engine backed entirely by in-memory stores.
    pub fn in_memory(config: EngineConfig) -> Self {
        Self::new(
            config,
            Arc::new(InMemoryEventStore::new()),
            Arc::new(InMemoryScheduleStore::new()),
        )
    }
}

impl<S, Q> RevenueEngine<S, Q>
where
    S: EventStore,
    Q: ScheduleStore,
{
    pub fn new(config: EngineConfig, store: S, schedules: Q) -> Self {
        let events = Arc::new(EnvelopeBus::new());
        let dispatcher =
            CommandDispatcher::new(store, events.clone()).with_max_retries(config.version_conflict_retries);
        Self {
            scheduler: Scheduler::new(config.day_count),
            config,
            dispatcher,
            events,
            schedules,
            books: AggregateView::in_memory(SSP_BOOK_AGGREGATE, new_book),
            contracts: AggregateView::in_memory(CONTRACT_AGGREGATE, new_contract),
            periods: AggregateView::in_memory(PERIOD_AGGREGATE, new_period),
            directory: InMemoryTenantStore::new(),
            default_books: InMemoryTenantStore::new(),
            source_events: InMemoryTenantStore::new(),
            postings: Arc::new(InMemoryEventBus::new()),
            period_locks: PeriodLocks::default(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Committed domain events (all aggregates, all tenants).
    pub fn subscribe_events(&self) -> Subscription<EventEnvelope<JsonValue>> {
        self.events.subscribe()
    }

    /// GL handoff: one record per entry transitioned to `Posted` by sweep.
    pub fn subscribe_postings(&self) -> Subscription<PostableEntry> {
        self.postings.subscribe()
    }

    /// Decide and commit a command, then bring the view up to date.
    fn run<A>(
        &self,
        tenant_id: TenantId,
        aggregate_id: AggregateId,
        view: &AggregateView<A>,
        make: fn(AggregateId) -> A,
        decide: impl FnMut(&A) -> Result<A::Command, EngineError>,
    ) -> Result<Dispatched<A>, EngineError>
    where
        A: Aggregate<Error = DomainError> + Clone + Send + Sync + 'static,
        A::Event: forgerev_events::Event + Serialize + DeserializeOwned,
    {
        let out = self
            .dispatcher
            .dispatch_with(tenant_id, aggregate_id, view.aggregate_type(), make, decide)?;
        if !out.committed.is_empty() {
            self.refresh(tenant_id, aggregate_id, view)?;
        }
        Ok(out)
    }

    /// Current state straight from the event store.
    fn load<A>(&self, tenant_id: TenantId, aggregate_id: AggregateId, make: fn(AggregateId) -> A) -> Result<A, EngineError>
    where
        A: Aggregate,
        A::Event: DeserializeOwned,
    {
        Ok(self.dispatcher.load(tenant_id, aggregate_id, make)?.0)
    }

    fn refresh<A>(&self, tenant_id: TenantId, aggregate_id: AggregateId, view: &AggregateView<A>) -> Result<(), EngineError>
    where
        A: Aggregate + Clone + Send + Sync + 'static,
        A::Event: DeserializeOwned,
    {
        let stream = self
            .dispatcher
            .store()
            .load_stream(tenant_id, aggregate_id)
            .map_err(DispatchError::from)?;
        let envelopes: Vec<EventEnvelope<JsonValue>> = stream.iter().map(StoredEvent::to_envelope).collect();
        view.catch_up(envelopes.iter())?;
        Ok(())
    }
}
