//! Read-side copies of event-sourced aggregates.
//!
//! The engine lists contracts, books and periods far more often than it
//! writes them, so each aggregate type is kept rehydrated in a tenant store
//! and advanced event by event as envelopes arrive.

use std::sync::Mutex;

use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use thiserror::Error;

use forgerev_core::{Aggregate, AggregateId, TenantId};
use forgerev_events::EventEnvelope;

use crate::projections::cursor_store::{InMemoryCursorStore, ProjectionCursorStore};
use crate::read_model::{InMemoryTenantStore, TenantStore};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProjectionError {
    #[error("failed to deserialize {aggregate_type} event: {reason}")]
    Deserialize { aggregate_type: String, reason: String },
    #[error("sequence gap in {aggregate_id} (last={last}, found={found})")]
    SequenceGap { aggregate_id: AggregateId, last: u64, found: u64 },
    #[error("projection lock poisoned")]
    Poisoned,
}

pub struct AggregateView<A, S = InMemoryTenantStore<AggregateId, A>, C = InMemoryCursorStore> {
    aggregate_type: &'static str,
    make: fn(AggregateId) -> A,
    store: S,
    cursors: C,
    apply_lock: Mutex<()>,
}

impl<A> AggregateView<A>
where
    A: Aggregate + Clone + Send + Sync + 'static,
    A::Event: DeserializeOwned,
{
    pub fn in_memory(aggregate_type: &'static str, make: fn(AggregateId) -> A) -> Self {
        Self::new(aggregate_type, make, InMemoryTenantStore::new(), InMemoryCursorStore::new())
    }
}

impl<A, S, C> AggregateView<A, S, C>
where
    A: Aggregate + Clone,
    A::Event: DeserializeOwned,
    S: TenantStore<AggregateId, A>,
    C: ProjectionCursorStore,
{
    pub fn new(aggregate_type: &'static str, make: fn(AggregateId) -> A, store: S, cursors: C) -> Self {
        Self {
            aggregate_type,
            make,
            store,
            cursors,
            apply_lock: Mutex::new(()),
        }
    }

    pub fn aggregate_type(&self) -> &'static str {
        self.aggregate_type
    }

    pub fn get(&self, tenant_id: TenantId, aggregate_id: AggregateId) -> Option<A> {
        self.store.get(tenant_id, &aggregate_id)
    }

    pub fn list(&self, tenant_id: TenantId) -> Vec<A> {
        self.store.list(tenant_id)
    }

    /// Apply one envelope. Replays at or below the cursor are ignored; other
    /// aggregate types are skipped.
    pub fn apply_envelope(&self, envelope: &EventEnvelope<JsonValue>) -> Result<(), ProjectionError> {
        if envelope.aggregate_type() != self.aggregate_type {
            return Ok(());
        }
        let _guard = self.apply_lock.lock().map_err(|_| ProjectionError::Poisoned)?;
        self.apply_locked(envelope)
    }

    /// Apply every envelope of a stream past the cursor, in order.
    pub fn catch_up<'a>(
        &self,
        envelopes: impl IntoIterator<Item = &'a EventEnvelope<JsonValue>>,
    ) -> Result<(), ProjectionError> {
        let _guard = self.apply_lock.lock().map_err(|_| ProjectionError::Poisoned)?;
        for envelope in envelopes {
            if envelope.aggregate_type() == self.aggregate_type {
                self.apply_locked(envelope)?;
            }
        }
        Ok(())
    }

    /// Drop the tenant's copies and replay them from the given envelopes.
    pub fn rebuild(&self, tenant_id: TenantId, envelopes: &[EventEnvelope<JsonValue>]) -> Result<(), ProjectionError> {
        {
            let _guard = self.apply_lock.lock().map_err(|_| ProjectionError::Poisoned)?;
            self.store.clear_tenant(tenant_id);
            self.cursors.clear_cursors(tenant_id, self.aggregate_type);
        }
        let mut ordered: Vec<&EventEnvelope<JsonValue>> =
            envelopes.iter().filter(|e| e.belongs_to(tenant_id)).collect();
        ordered.sort_by_key(|e| (e.aggregate_id(), e.sequence_number()));
        self.catch_up(ordered)
    }

    fn apply_locked(&self, envelope: &EventEnvelope<JsonValue>) -> Result<(), ProjectionError> {
        let tenant_id = envelope.tenant_id();
        let aggregate_id = envelope.aggregate_id();
        let seq = envelope.sequence_number();

        let last = self
            .cursors
            .get_cursor(tenant_id, aggregate_id, self.aggregate_type)
            .unwrap_or(0);
        if seq <= last {
            return Ok(());
        }
        if seq != last + 1 {
            return Err(ProjectionError::SequenceGap {
                aggregate_id,
                last,
                found: seq,
            });
        }

        let event: A::Event =
            serde_json::from_value(envelope.payload().clone()).map_err(|e| ProjectionError::Deserialize {
                aggregate_type: self.aggregate_type.to_string(),
                reason: e.to_string(),
            })?;

        let mut current = self
            .store
            .get(tenant_id, &aggregate_id)
            .unwrap_or_else(|| (self.make)(aggregate_id));
        current.apply(&event);
        self.store.upsert(tenant_id, aggregate_id, current);
        self.cursors
            .update_cursor(tenant_id, aggregate_id, self.aggregate_type, seq);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, Utc};
    use uuid::Uuid;

    use forgerev_core::{AggregateRoot, LedgerId};
    use forgerev_periods::{Period, PeriodDefined, PeriodEvent, PeriodId, PeriodOpened, PeriodStatus};

    use super::*;

    fn envelope(tenant_id: TenantId, id: PeriodId, seq: u64, event: &PeriodEvent) -> EventEnvelope<JsonValue> {
        EventEnvelope::new(
            Uuid::now_v7(),
            tenant_id,
            id.0,
            "ledger.period",
            seq,
            serde_json::to_value(event).unwrap(),
        )
    }

    fn defined(tenant_id: TenantId, id: PeriodId) -> PeriodEvent {
        PeriodEvent::Defined(PeriodDefined {
            tenant_id,
            period_id: id,
            ledger_id: LedgerId::new("PRIMARY").unwrap(),
            name: "2026-01".into(),
            start: NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
            end: NaiveDate::from_ymd_opt(2026, 1, 31).unwrap(),
            occurred_at: Utc::now(),
        })
    }

    fn opened(tenant_id: TenantId, id: PeriodId) -> PeriodEvent {
        PeriodEvent::Opened(PeriodOpened {
            tenant_id,
            period_id: id,
            occurred_at: Utc::now(),
        })
    }

    fn view() -> AggregateView<Period> {
        AggregateView::in_memory("ledger.period", |id| Period::empty(PeriodId::new(id)))
    }

    #[test]
    fn replayed_envelopes_are_ignored() {
        let v = view();
        let t = TenantId::new();
        let id = PeriodId::new(AggregateId::new());
        let first = envelope(t, id, 1, &defined(t, id));
        let second = envelope(t, id, 2, &opened(t, id));

        v.apply_envelope(&first).unwrap();
        v.apply_envelope(&second).unwrap();
        v.apply_envelope(&second).unwrap();
        v.apply_envelope(&first).unwrap();

        let period = v.get(t, id.0).unwrap();
        assert_eq!(period.status(), PeriodStatus::Open);
        assert_eq!(AggregateRoot::version(&period), 2);
    }

    #[test]
    fn gaps_are_reported_and_other_types_skipped() {
        let v = view();
        let t = TenantId::new();
        let id = PeriodId::new(AggregateId::new());

        let err = v.apply_envelope(&envelope(t, id, 2, &opened(t, id))).unwrap_err();
        assert!(matches!(err, ProjectionError::SequenceGap { last: 0, found: 2, .. }));

        let foreign = EventEnvelope::new(Uuid::now_v7(), t, id.0, "revenue.contract", 1, serde_json::json!({}));
        v.apply_envelope(&foreign).unwrap();
        assert!(v.get(t, id.0).is_none());
    }

    #[test]
    fn rebuild_reproduces_state() {
        let v = view();
        let t = TenantId::new();
        let id = PeriodId::new(AggregateId::new());
        let history = vec![envelope(t, id, 2, &opened(t, id)), envelope(t, id, 1, &defined(t, id))];

        v.rebuild(t, &history).unwrap();
        let before = v.get(t, id.0).unwrap();
        v.rebuild(t, &history).unwrap();
        assert_eq!(v.get(t, id.0).unwrap(), before);
        assert_eq!(v.list(t).len(), 1);
    }
}
