//! Command execution pipeline for event-sourced aggregates.
//!
//! ```text
//! load stream -> rehydrate -> handle -> append (optimistic) -> publish
//! ```
//!
//! A stale stream revision on append is the engine's version-conflict signal.
//! `dispatch_with` recomputes the command from the fresh state and retries a
//! bounded number of times before giving up with `VersionConflict`.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use forgerev_core::{Aggregate, AggregateId, DomainError, ExpectedVersion, TenantId};
use forgerev_events::{EventBus, EventEnvelope};

use crate::event_store::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// Stale stream revision on append (retryable).
    #[error("optimistic concurrency failure: {0}")]
    Concurrency(String),
    /// Still stale after the configured number of retries.
    #[error("version conflict on {aggregate_id} after {attempts} attempts")]
    VersionConflict { aggregate_id: AggregateId, attempts: u32 },
    #[error("tenant isolation violation: {0}")]
    TenantIsolation(String),
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("invariant violated: {0}")]
    InvariantViolation(String),
    /// Domain-level conflict (e.g. duplicate SSP line); not retried.
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("{0} not found")]
    NotFound(String),
    #[error("failed to deserialize stored event: {0}")]
    Deserialize(String),
    #[error(transparent)]
    Store(EventStoreError),
    /// Publication failed after a successful append.
    #[error("event publication failed: {0}")]
    Publish(String),
}

impl From<EventStoreError> for DispatchError {
    fn from(value: EventStoreError) -> Self {
        match value {
            EventStoreError::Concurrency(msg) => DispatchError::Concurrency(msg),
            EventStoreError::TenantIsolation(msg) => DispatchError::TenantIsolation(msg),
            other => DispatchError::Store(other),
        }
    }
}

impl From<DomainError> for DispatchError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::Validation(msg) => DispatchError::Validation(msg),
            DomainError::InvariantViolation(msg) => DispatchError::InvariantViolation(msg),
            DomainError::Conflict(msg) => DispatchError::Conflict(msg),
            DomainError::NotFound(what) => DispatchError::NotFound(what),
            DomainError::InvalidId(msg) => DispatchError::Validation(msg),
        }
    }
}

/// Outcome of a committed command: the aggregate after the new events plus
/// the stored events themselves.
#[derive(Debug, Clone)]
pub struct Dispatched<A> {
    pub aggregate: A,
    pub committed: Vec<StoredEvent>,
}

#[derive(Debug)]
pub struct CommandDispatcher<S, B> {
    store: S,
    bus: B,
    max_retries: u32,
}

impl<S, B> CommandDispatcher<S, B> {
    pub fn new(store: S, bus: B) -> Self {
        Self {
            store,
            bus,
            max_retries: 3,
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn store(&self) -> &S {
        &self.store
    }
}

impl<S, B> CommandDispatcher<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    /// Rehydrate an aggregate from its stream without handling anything.
    pub fn load<A>(
        &self,
        tenant_id: TenantId,
        aggregate_id: AggregateId,
        make_aggregate: impl FnOnce(AggregateId) -> A,
    ) -> Result<(A, u64), DispatchError>
    where
        A: Aggregate,
        A::Event: DeserializeOwned,
    {
        let history = self.store.load_stream(tenant_id, aggregate_id)?;
        validate_loaded_stream(tenant_id, aggregate_id, &history)?;
        let mut aggregate = make_aggregate(aggregate_id);
        apply_history(&mut aggregate, &history)?;
        Ok((aggregate, stream_version(&history)))
    }

    /// Run a single command once. A stale revision surfaces as `Concurrency`.
    pub fn dispatch<A>(
        &self,
        tenant_id: TenantId,
        aggregate_id: AggregateId,
        aggregate_type: &str,
        command: A::Command,
        make_aggregate: impl Fn(AggregateId) -> A,
    ) -> Result<Dispatched<A>, DispatchError>
    where
        A: Aggregate<Error = DomainError>,
        A::Event: forgerev_events::Event + Serialize + DeserializeOwned,
    {
        let (aggregate, revision) = self.load(tenant_id, aggregate_id, &make_aggregate)?;
        self.commit(tenant_id, aggregate_id, aggregate_type, aggregate, revision, &command)
    }

    /// Decide a command from the current state and commit it, re-reading and
    /// re-deciding on a stale revision up to `max_retries` times.
    ///
    /// `decide` may fail with the caller's own error type (allocation,
    /// scheduling); those failures are never retried.
    pub fn dispatch_with<A, E>(
        &self,
        tenant_id: TenantId,
        aggregate_id: AggregateId,
        aggregate_type: &str,
        make_aggregate: impl Fn(AggregateId) -> A,
        mut decide: impl FnMut(&A) -> Result<A::Command, E>,
    ) -> Result<Dispatched<A>, E>
    where
        A: Aggregate<Error = DomainError>,
        A::Event: forgerev_events::Event + Serialize + DeserializeOwned,
        E: From<DispatchError>,
    {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let (aggregate, revision) = self.load(tenant_id, aggregate_id, &make_aggregate)?;
            let command = decide(&aggregate)?;

            match self.commit(tenant_id, aggregate_id, aggregate_type, aggregate, revision, &command) {
                Err(DispatchError::Concurrency(msg)) if attempt <= self.max_retries => {
                    tracing::warn!(
                        tenant_id = %tenant_id,
                        aggregate_id = %aggregate_id,
                        aggregate_type,
                        attempt,
                        reason = %msg,
                        "stale stream revision, retrying command"
                    );
                }
                Err(DispatchError::Concurrency(_)) => {
                    return Err(DispatchError::VersionConflict {
                        aggregate_id,
                        attempts: attempt,
                    }
                    .into());
                }
                other => return other.map_err(E::from),
            }
        }
    }

    fn commit<A>(
        &self,
        tenant_id: TenantId,
        aggregate_id: AggregateId,
        aggregate_type: &str,
        mut aggregate: A,
        revision: u64,
        command: &A::Command,
    ) -> Result<Dispatched<A>, DispatchError>
    where
        A: Aggregate<Error = DomainError>,
        A::Event: forgerev_events::Event + Serialize + DeserializeOwned,
    {
        let decided = aggregate.handle(command)?;
        if decided.is_empty() {
            return Ok(Dispatched {
                aggregate,
                committed: vec![],
            });
        }

        let uncommitted = decided
            .iter()
            .map(|ev| UncommittedEvent::from_typed(tenant_id, aggregate_id, aggregate_type, Uuid::now_v7(), ev))
            .collect::<Result<Vec<_>, _>>()?;

        let committed = self.store.append(uncommitted, ExpectedVersion::Exact(revision))?;
        for ev in &decided {
            aggregate.apply(ev);
        }

        for stored in &committed {
            self.bus
                .publish(stored.to_envelope())
                .map_err(|e| DispatchError::Publish(format!("{e:?}")))?;
        }

        Ok(Dispatched { aggregate, committed })
    }
}

fn stream_version(stream: &[StoredEvent]) -> u64 {
    stream.last().map(|e| e.sequence_number).unwrap_or(0)
}

fn validate_loaded_stream(
    tenant_id: TenantId,
    aggregate_id: AggregateId,
    stream: &[StoredEvent],
) -> Result<(), DispatchError> {
    let mut last = 0u64;
    for (idx, e) in stream.iter().enumerate() {
        if e.tenant_id != tenant_id {
            return Err(DispatchError::TenantIsolation(format!(
                "loaded stream contains wrong tenant_id at index {idx}"
            )));
        }
        if e.aggregate_id != aggregate_id {
            return Err(DispatchError::TenantIsolation(format!(
                "loaded stream contains wrong aggregate_id at index {idx}"
            )));
        }
        if e.sequence_number <= last {
            return Err(DispatchError::Store(EventStoreError::InvalidAppend(format!(
                "non-monotonic sequence_number in loaded stream (last={last}, found={})",
                e.sequence_number
            ))));
        }
        last = e.sequence_number;
    }
    Ok(())
}

fn apply_history<A>(aggregate: &mut A, history: &[StoredEvent]) -> Result<(), DispatchError>
where
    A: Aggregate,
    A::Event: DeserializeOwned,
{
    for stored in history {
        let ev: A::Event = serde_json::from_value(stored.payload.clone())
            .map_err(|e| DispatchError::Deserialize(e.to_string()))?;
        aggregate.apply(&ev);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{NaiveDate, Utc};
    use forgerev_core::LedgerId;
    use forgerev_events::InMemoryEventBus;
    use forgerev_periods::{DefinePeriod, OpenPeriod, Period, PeriodCommand, PeriodId, PeriodStatus};

    use super::*;
    use crate::event_store::InMemoryEventStore;

    type Dispatcher = CommandDispatcher<Arc<InMemoryEventStore>, Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>>;

    fn dispatcher() -> Dispatcher {
        CommandDispatcher::new(Arc::new(InMemoryEventStore::new()), Arc::new(InMemoryEventBus::new()))
    }

    fn define(tenant_id: TenantId, period_id: PeriodId) -> PeriodCommand {
        PeriodCommand::DefinePeriod(DefinePeriod {
            tenant_id,
            period_id,
            ledger_id: LedgerId::new("PRIMARY").unwrap(),
            name: "2026-01".into(),
            start: NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
            end: NaiveDate::from_ymd_opt(2026, 1, 31).unwrap(),
            siblings: vec![],
            occurred_at: Utc::now(),
        })
    }

    fn open(tenant_id: TenantId, period_id: PeriodId) -> PeriodCommand {
        PeriodCommand::Open(OpenPeriod {
            tenant_id,
            period_id,
            occurred_at: Utc::now(),
        })
    }

    #[test]
    fn dispatch_persists_publishes_and_returns_new_state() {
        let d = dispatcher();
        let sub = d.bus.subscribe();
        let tenant = TenantId::new();
        let id = PeriodId::new(AggregateId::new());

        let out = d
            .dispatch(tenant, id.0, "ledger.period", define(tenant, id), |a| Period::empty(PeriodId::new(a)))
            .unwrap();
        assert_eq!(out.committed.len(), 1);
        assert!(out.aggregate.is_created());

        let envelope = sub.try_recv().unwrap();
        assert_eq!(envelope.aggregate_type(), "ledger.period");
        assert_eq!(envelope.sequence_number(), 1);

        let (reloaded, revision) = d.load(tenant, id.0, |a| Period::empty(PeriodId::new(a))).unwrap();
        assert_eq!(revision, 1);
        assert_eq!(reloaded.status(), PeriodStatus::NeverOpened);
    }

    #[test]
    fn domain_errors_are_mapped_and_nothing_is_stored() {
        let d = dispatcher();
        let tenant = TenantId::new();
        let id = PeriodId::new(AggregateId::new());

        let err = d
            .dispatch(tenant, id.0, "ledger.period", open(tenant, id), |a| Period::empty(PeriodId::new(a)))
            .unwrap_err();
        assert!(matches!(err, DispatchError::NotFound(_) | DispatchError::InvariantViolation(_)));
        assert!(d.store.load_stream(tenant, id.0).unwrap().is_empty());
    }

    #[test]
    fn stale_revision_is_retried_with_a_fresh_decision() {
        let d = dispatcher();
        let tenant = TenantId::new();
        let id = PeriodId::new(AggregateId::new());
        d.dispatch(tenant, id.0, "ledger.period", define(tenant, id), |a| Period::empty(PeriodId::new(a)))
            .unwrap();

        let mut calls = 0;
        let out = d
            .dispatch_with::<Period, DispatchError>(
                tenant,
                id.0,
                "ledger.period",
                |a| Period::empty(PeriodId::new(a)),
                |_| {
                    calls += 1;
                    if calls == 1 {
                        // A concurrent writer sneaks in between read and commit.
                        let racing = UncommittedEvent {
                            event_id: Uuid::now_v7(),
                            tenant_id: tenant,
                            aggregate_id: id.0,
                            aggregate_type: "ledger.period".into(),
                            event_type: "ledger.period.marked_future".into(),
                            event_version: 1,
                            occurred_at: Utc::now(),
                            payload: serde_json::to_value(forgerev_periods::PeriodEvent::MarkedFuture(
                                forgerev_periods::PeriodMarkedFuture {
                                    tenant_id: tenant,
                                    period_id: id,
                                    occurred_at: Utc::now(),
                                },
                            ))
                            .unwrap(),
                        };
                        d.store.append(vec![racing], ExpectedVersion::Exact(1)).unwrap();
                    }
                    Ok(open(tenant, id))
                },
            )
            .unwrap();

        assert_eq!(calls, 2);
        assert_eq!(out.aggregate.status(), PeriodStatus::Open);
    }

    #[test]
    fn retries_are_bounded() {
        let d = dispatcher().with_max_retries(1);
        let tenant = TenantId::new();
        let id = PeriodId::new(AggregateId::new());

        let err = d
            .dispatch_with::<Period, DispatchError>(
                tenant,
                id.0,
                "ledger.period",
                |a| Period::empty(PeriodId::new(a)),
                |_| {
                    // Every attempt loses the race.
                    let revision = d.store.load_stream(tenant, id.0).unwrap().len() as u64;
                    let racing = UncommittedEvent::from_typed(
                        tenant,
                        id.0,
                        "ledger.period",
                        Uuid::now_v7(),
                        &forgerev_periods::PeriodEvent::MarkedFuture(forgerev_periods::PeriodMarkedFuture {
                            tenant_id: tenant,
                            period_id: id,
                            occurred_at: Utc::now(),
                        }),
                    )
                    .unwrap();
                    d.store.append(vec![racing], ExpectedVersion::Exact(revision)).unwrap();
                    Ok(define(tenant, id))
                },
            )
            .unwrap_err();

        assert!(matches!(err, DispatchError::VersionConflict { attempts: 2, .. }));
    }
}
