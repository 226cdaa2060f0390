use chrono::{NaiveDate, Utc};
use tracing::{info, instrument};

use forgerev_core::{AggregateId, LedgerId, TenantId, UserId};
use forgerev_periods::{
    DefinePeriod, MarkFuture, OpenPeriod, PermanentlyClosePeriod, Period, PeriodCommand, PeriodId, ReopenPeriod,
};

use super::{EngineError, RevenueEngine, new_period};
use crate::event_store::EventStore;
use crate::schedule_store::ScheduleStore;

impl<S, Q> RevenueEngine<S, Q>
where
    S: EventStore,
    Q: ScheduleStore,
{
    /// Define a period on a ledger. Overlap with the ledger's existing
    /// periods is rejected by the period aggregate.
    pub fn define_period(
        &self,
        tenant_id: TenantId,
        ledger_id: &str,
        name: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Period, EngineError> {
        let ledger_id = LedgerId::new(ledger_id)?;
        let period_id = PeriodId::new(AggregateId::new());
        let siblings = self.calendar(tenant_id, &ledger_id).slots().to_vec();
        let out = self.run(tenant_id, period_id.0, &self.periods, new_period, |_| {
            Ok(PeriodCommand::DefinePeriod(DefinePeriod {
                tenant_id,
                period_id,
                ledger_id: ledger_id.clone(),
                name: name.to_string(),
                start,
                end,
                siblings: siblings.clone(),
                occurred_at: Utc::now(),
            }))
        })?;
        info!(tenant_id = %tenant_id, period_id = %period_id, ledger_id = %ledger_id, %start, %end, "period defined");
        Ok(out.aggregate)
    }

    pub fn mark_period_future(&self, tenant_id: TenantId, period_id: PeriodId) -> Result<Period, EngineError> {
        self.transition(tenant_id, period_id, "future", || {
            PeriodCommand::MarkFuture(MarkFuture {
                tenant_id,
                period_id,
                occurred_at: Utc::now(),
            })
        })
    }

    pub fn open_period(&self, tenant_id: TenantId, period_id: PeriodId) -> Result<Period, EngineError> {
        self.transition(tenant_id, period_id, "open", || {
            PeriodCommand::Open(OpenPeriod {
                tenant_id,
                period_id,
                occurred_at: Utc::now(),
            })
        })
    }

    /// Reopen a closed period. Requires an actor and a reason for the audit trail.
    #[instrument(skip_all, fields(tenant_id = %tenant_id, period_id = %period_id, actor = %actor), err)]
    pub fn reopen_period(
        &self,
        tenant_id: TenantId,
        period_id: PeriodId,
        actor: UserId,
        reason: &str,
    ) -> Result<Period, EngineError> {
        if reason.trim().is_empty() {
            return Err(EngineError::Validation("reopening a period requires a reason".into()));
        }
        let lock = self.period_locks.handle(tenant_id, period_id)?;
        let _guard = super::close::acquire(&lock)?;
        let period = self.transition(tenant_id, period_id, "reopened", || {
            PeriodCommand::Reopen(ReopenPeriod {
                tenant_id,
                period_id,
                actor,
                reason: reason.to_string(),
                occurred_at: Utc::now(),
            })
        })?;
        self.schedules.unseal_period(tenant_id, period_id)?;
        Ok(period)
    }

    pub fn permanently_close_period(
        &self,
        tenant_id: TenantId,
        period_id: PeriodId,
        actor: UserId,
    ) -> Result<Period, EngineError> {
        let lock = self.period_locks.handle(tenant_id, period_id)?;
        let _guard = super::close::acquire(&lock)?;
        self.transition(tenant_id, period_id, "permanently_closed", || {
            PeriodCommand::PermanentlyClose(PermanentlyClosePeriod {
                tenant_id,
                period_id,
                actor,
                occurred_at: Utc::now(),
            })
        })
    }

    fn transition(
        &self,
        tenant_id: TenantId,
        period_id: PeriodId,
        to: &str,
        command: impl Fn() -> PeriodCommand,
    ) -> Result<Period, EngineError> {
        let out = self.run(tenant_id, period_id.0, &self.periods, new_period, |_| Ok(command()))?;
        info!(tenant_id = %tenant_id, period_id = %period_id, status = to, "period status changed");
        Ok(out.aggregate)
    }

    pub fn period(&self, tenant_id: TenantId, period_id: PeriodId) -> Result<Period, EngineError> {
        self.periods
            .get(tenant_id, period_id.0)
            .filter(Period::is_created)
            .ok_or_else(|| EngineError::not_found(format!("period {period_id}")))
    }

    /// Periods in start-date order, optionally restricted to one ledger.
    pub fn periods(&self, tenant_id: TenantId, ledger_id: Option<&LedgerId>) -> Vec<Period> {
        let mut periods: Vec<Period> = self
            .periods
            .list(tenant_id)
            .into_iter()
            .filter(Period::is_created)
            .filter(|p| ledger_id.is_none_or(|l| p.ledger_id() == Some(l)))
            .collect();
        periods.sort_by_key(|p| (p.ledger_id().cloned(), p.start()));
        periods
    }
}
