use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use forgerev_core::{Aggregate, AggregateId, AggregateRoot, DomainError, LedgerId, TenantId, UserId};
use forgerev_events::Event;

use crate::calendar::PeriodSlot;
use crate::readiness::CloseReadiness;

/// Fiscal period identifier (aggregate id).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeriodId(pub AggregateId);

impl PeriodId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for PeriodId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Period lifecycle: `NeverOpened -> Future -> Open -> Closed -> PermanentlyClosed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeriodStatus {
    NeverOpened,
    Future,
    Open,
    Closed,
    PermanentlyClosed,
}

impl PeriodStatus {
    /// Postings (sweep transitions) are only permitted while open.
    pub fn accepts_postings(self) -> bool {
        self == PeriodStatus::Open
    }

    /// New schedule entries may still be bucketed into this period.
    pub fn accepts_schedule(self) -> bool {
        matches!(
            self,
            PeriodStatus::NeverOpened | PeriodStatus::Future | PeriodStatus::Open
        )
    }
}

/// Aggregate root: Period.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Period {
    id: PeriodId,
    tenant_id: Option<TenantId>,
    ledger_id: Option<LedgerId>,
    name: String,
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
    status: PeriodStatus,
    reopen_count: u32,
    version: u64,
    created: bool,
}

impl Period {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: PeriodId) -> Self {
        Self {
            id,
            tenant_id: None,
            ledger_id: None,
            name: String::new(),
            start: None,
            end: None,
            status: PeriodStatus::NeverOpened,
            reopen_count: 0,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> PeriodId {
        self.id
    }

    pub fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id
    }

    pub fn ledger_id(&self) -> Option<&LedgerId> {
        self.ledger_id.as_ref()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn start(&self) -> Option<NaiveDate> {
        self.start
    }

    pub fn end(&self) -> Option<NaiveDate> {
        self.end
    }

    pub fn status(&self) -> PeriodStatus {
        self.status
    }

    pub fn reopen_count(&self) -> u32 {
        self.reopen_count
    }

    pub fn is_created(&self) -> bool {
        self.created
    }

    /// Calendar view of this period (`None` until defined).
    pub fn slot(&self) -> Option<PeriodSlot> {
        Some(PeriodSlot {
            period_id: self.id,
            ledger_id: self.ledger_id.clone()?,
            name: self.name.clone(),
            start: self.start?,
            end: self.end?,
            status: self.status,
        })
    }
}

impl AggregateRoot for Period {
    type Id = PeriodId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: DefinePeriod.
///
/// `siblings` are the periods already defined for the same ledger; the caller
/// loads them so the aggregate can reject overlaps without IO.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefinePeriod {
    pub tenant_id: TenantId,
    pub period_id: PeriodId,
    pub ledger_id: LedgerId,
    pub name: String,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub siblings: Vec<PeriodSlot>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: MarkFuture.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkFuture {
    pub tenant_id: TenantId,
    pub period_id: PeriodId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: OpenPeriod.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenPeriod {
    pub tenant_id: TenantId,
    pub period_id: PeriodId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ClosePeriod (carries the readiness evaluated by the caller).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClosePeriod {
    pub tenant_id: TenantId,
    pub period_id: PeriodId,
    pub readiness: CloseReadiness,
    pub actor: Option<UserId>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ReopenPeriod (administrative, audited).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReopenPeriod {
    pub tenant_id: TenantId,
    pub period_id: PeriodId,
    pub actor: UserId,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

/// Command: PermanentlyClosePeriod.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermanentlyClosePeriod {
    pub tenant_id: TenantId,
    pub period_id: PeriodId,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PeriodCommand {
    DefinePeriod(DefinePeriod),
    MarkFuture(MarkFuture),
    Open(OpenPeriod),
    Close(ClosePeriod),
    Reopen(ReopenPeriod),
    PermanentlyClose(PermanentlyClosePeriod),
}

/// Event: PeriodDefined.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodDefined {
    pub tenant_id: TenantId,
    pub period_id: PeriodId,
    pub ledger_id: LedgerId,
    pub name: String,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PeriodMarkedFuture.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodMarkedFuture {
    pub tenant_id: TenantId,
    pub period_id: PeriodId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PeriodOpened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodOpened {
    pub tenant_id: TenantId,
    pub period_id: PeriodId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PeriodClosed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodClosed {
    pub tenant_id: TenantId,
    pub period_id: PeriodId,
    pub actor: Option<UserId>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PeriodReopened (audit record of an administrative reopen).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodReopened {
    pub tenant_id: TenantId,
    pub period_id: PeriodId,
    pub actor: UserId,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PeriodPermanentlyClosed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodPermanentlyClosed {
    pub tenant_id: TenantId,
    pub period_id: PeriodId,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PeriodEvent {
    Defined(PeriodDefined),
    MarkedFuture(PeriodMarkedFuture),
    Opened(PeriodOpened),
    Closed(PeriodClosed),
    Reopened(PeriodReopened),
    PermanentlyClosed(PeriodPermanentlyClosed),
}

impl Event for PeriodEvent {
    fn event_type(&self) -> &'static str {
        match self {
            PeriodEvent::Defined(_) => "ledger.period.defined",
            PeriodEvent::MarkedFuture(_) => "ledger.period.marked_future",
            PeriodEvent::Opened(_) => "ledger.period.opened",
            PeriodEvent::Closed(_) => "ledger.period.closed",
            PeriodEvent::Reopened(_) => "ledger.period.reopened",
            PeriodEvent::PermanentlyClosed(_) => "ledger.period.permanently_closed",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            PeriodEvent::Defined(e) => e.occurred_at,
            PeriodEvent::MarkedFuture(e) => e.occurred_at,
            PeriodEvent::Opened(e) => e.occurred_at,
            PeriodEvent::Closed(e) => e.occurred_at,
            PeriodEvent::Reopened(e) => e.occurred_at,
            PeriodEvent::PermanentlyClosed(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Period {
    type Command = PeriodCommand;
    type Event = PeriodEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            PeriodEvent::Defined(e) => {
                self.id = e.period_id;
                self.tenant_id = Some(e.tenant_id);
                self.ledger_id = Some(e.ledger_id.clone());
                self.name = e.name.clone();
                self.start = Some(e.start);
                self.end = Some(e.end);
                self.status = PeriodStatus::NeverOpened;
                self.created = true;
            }
            PeriodEvent::MarkedFuture(_) => self.status = PeriodStatus::Future,
            PeriodEvent::Opened(_) => self.status = PeriodStatus::Open,
            PeriodEvent::Closed(_) => self.status = PeriodStatus::Closed,
            PeriodEvent::Reopened(_) => {
                self.status = PeriodStatus::Open;
                self.reopen_count += 1;
            }
            PeriodEvent::PermanentlyClosed(_) => self.status = PeriodStatus::PermanentlyClosed,
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            PeriodCommand::DefinePeriod(cmd) => self.handle_define(cmd),
            PeriodCommand::MarkFuture(cmd) => {
                self.ensure_created(cmd.tenant_id)?;
                self.ensure_status(&[PeriodStatus::NeverOpened], "mark future")?;
                Ok(vec![PeriodEvent::MarkedFuture(PeriodMarkedFuture {
                    tenant_id: cmd.tenant_id,
                    period_id: cmd.period_id,
                    occurred_at: cmd.occurred_at,
                })])
            }
            PeriodCommand::Open(cmd) => {
                self.ensure_created(cmd.tenant_id)?;
                self.ensure_status(&[PeriodStatus::NeverOpened, PeriodStatus::Future], "open")?;
                Ok(vec![PeriodEvent::Opened(PeriodOpened {
                    tenant_id: cmd.tenant_id,
                    period_id: cmd.period_id,
                    occurred_at: cmd.occurred_at,
                })])
            }
            PeriodCommand::Close(cmd) => self.handle_close(cmd),
            PeriodCommand::Reopen(cmd) => {
                self.ensure_created(cmd.tenant_id)?;
                self.ensure_status(&[PeriodStatus::Closed], "reopen")?;
                if cmd.reason.trim().is_empty() {
                    return Err(DomainError::validation("reopen requires a reason"));
                }
                Ok(vec![PeriodEvent::Reopened(PeriodReopened {
                    tenant_id: cmd.tenant_id,
                    period_id: cmd.period_id,
                    actor: cmd.actor,
                    reason: cmd.reason.trim().to_string(),
                    occurred_at: cmd.occurred_at,
                })])
            }
            PeriodCommand::PermanentlyClose(cmd) => {
                self.ensure_created(cmd.tenant_id)?;
                self.ensure_status(&[PeriodStatus::Closed], "permanently close")?;
                Ok(vec![PeriodEvent::PermanentlyClosed(PeriodPermanentlyClosed {
                    tenant_id: cmd.tenant_id,
                    period_id: cmd.period_id,
                    actor: cmd.actor,
                    occurred_at: cmd.occurred_at,
                })])
            }
        }
    }
}

impl Period {
    fn ensure_created(&self, tenant_id: TenantId) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found(format!("period {}", self.id)));
        }
        if self.tenant_id != Some(tenant_id) {
            return Err(DomainError::invariant("tenant mismatch"));
        }
        Ok(())
    }

    fn ensure_status(&self, allowed: &[PeriodStatus], action: &str) -> Result<(), DomainError> {
        if allowed.contains(&self.status) {
            return Ok(());
        }
        Err(DomainError::invariant(format!(
            "cannot {action} period '{}' in status {:?}",
            self.name, self.status
        )))
    }

    fn handle_define(&self, cmd: &DefinePeriod) -> Result<Vec<PeriodEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("period already defined"));
        }
        if cmd.name.trim().is_empty() {
            return Err(DomainError::validation("period name cannot be empty"));
        }
        if cmd.end < cmd.start {
            return Err(DomainError::validation("period end precedes start"));
        }

        if let Some(clash) = cmd
            .siblings
            .iter()
            .filter(|s| s.ledger_id == cmd.ledger_id && s.period_id != cmd.period_id)
            .find(|s| s.overlaps(cmd.start, cmd.end))
        {
            return Err(DomainError::conflict(format!(
                "period overlaps '{}' ({}..{}) in ledger {}",
                clash.name, clash.start, clash.end, cmd.ledger_id
            )));
        }

        Ok(vec![PeriodEvent::Defined(PeriodDefined {
            tenant_id: cmd.tenant_id,
            period_id: cmd.period_id,
            ledger_id: cmd.ledger_id.clone(),
            name: cmd.name.trim().to_string(),
            start: cmd.start,
            end: cmd.end,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_close(&self, cmd: &ClosePeriod) -> Result<Vec<PeriodEvent>, DomainError> {
        self.ensure_created(cmd.tenant_id)?;
        self.ensure_status(&[PeriodStatus::Open], "close")?;
        if cmd.readiness.period_id != self.id {
            return Err(DomainError::invariant("readiness evaluated for another period"));
        }
        if !cmd.readiness.allowed {
            return Err(DomainError::invariant(format!(
                "period '{}' has {} outstanding close exception(s)",
                self.name,
                cmd.readiness.exceptions.len()
            )));
        }

        Ok(vec![PeriodEvent::Closed(PeriodClosed {
            tenant_id: cmd.tenant_id,
            period_id: cmd.period_id,
            actor: cmd.actor,
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::readiness::{CloseException, CloseExceptionKind};
    use forgerev_events::execute;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn ledger() -> LedgerId {
        LedgerId::new("PRIMARY").unwrap()
    }

    fn defined(tenant_id: TenantId, start: NaiveDate, end: NaiveDate) -> Period {
        let period_id = PeriodId::new(AggregateId::new());
        let mut p = Period::empty(period_id);
        execute(
            &mut p,
            &PeriodCommand::DefinePeriod(DefinePeriod {
                tenant_id,
                period_id,
                ledger_id: ledger(),
                name: format!("{start}"),
                start,
                end,
                siblings: vec![],
                occurred_at: Utc::now(),
            }),
        )
        .unwrap();
        p
    }

    fn open(p: &mut Period, tenant_id: TenantId) {
        let period_id = p.id_typed();
        execute(
            p,
            &PeriodCommand::Open(OpenPeriod {
                tenant_id,
                period_id,
                occurred_at: Utc::now(),
            }),
        )
        .unwrap();
    }

    fn close(p: &mut Period, tenant_id: TenantId) -> Result<Vec<PeriodEvent>, DomainError> {
        let cmd = PeriodCommand::Close(ClosePeriod {
            tenant_id,
            period_id: p.id_typed(),
            readiness: CloseReadiness::from_exceptions(p.id_typed(), vec![]),
            actor: None,
            occurred_at: Utc::now(),
        });
        execute(p, &cmd)
    }

    #[test]
    fn forward_lifecycle() {
        let tenant_id = TenantId::new();
        let mut p = defined(tenant_id, date(2026, 1, 1), date(2026, 1, 31));
        assert_eq!(p.status(), PeriodStatus::NeverOpened);

        let period_id = p.id_typed();
        execute(
            &mut p,
            &PeriodCommand::MarkFuture(MarkFuture {
                tenant_id,
                period_id,
                occurred_at: Utc::now(),
            }),
        )
        .unwrap();
        assert_eq!(p.status(), PeriodStatus::Future);

        open(&mut p, tenant_id);
        close(&mut p, tenant_id).unwrap();
        assert_eq!(p.status(), PeriodStatus::Closed);

        let period_id = p.id_typed();
        execute(
            &mut p,
            &PeriodCommand::PermanentlyClose(PermanentlyClosePeriod {
                tenant_id,
                period_id,
                actor: UserId::new(),
                occurred_at: Utc::now(),
            }),
        )
        .unwrap();
        assert_eq!(p.status(), PeriodStatus::PermanentlyClosed);
        assert!(!p.status().accepts_schedule());
    }

    #[test]
    fn close_requires_clean_readiness() {
        let tenant_id = TenantId::new();
        let mut p = defined(tenant_id, date(2026, 1, 1), date(2026, 1, 31));
        open(&mut p, tenant_id);

        let readiness = CloseReadiness::from_exceptions(
            p.id_typed(),
            vec![CloseException {
                kind: CloseExceptionKind::UnsweptEntry,
                reference: "entry-1".into(),
                amount: 1_000,
            }],
        );
        let err = p
            .handle(&PeriodCommand::Close(ClosePeriod {
                tenant_id,
                period_id: p.id_typed(),
                readiness,
                actor: None,
                occurred_at: Utc::now(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));
        assert_eq!(p.status(), PeriodStatus::Open);
    }

    #[test]
    fn reopen_is_audited_and_needs_reason() {
        let tenant_id = TenantId::new();
        let mut p = defined(tenant_id, date(2026, 1, 1), date(2026, 1, 31));
        open(&mut p, tenant_id);
        close(&mut p, tenant_id).unwrap();

        let actor = UserId::new();
        let blank = PeriodCommand::Reopen(ReopenPeriod {
            tenant_id,
            period_id: p.id_typed(),
            actor,
            reason: "  ".into(),
            occurred_at: Utc::now(),
        });
        assert!(matches!(p.handle(&blank), Err(DomainError::Validation(_))));

        let period_id = p.id_typed();
        let events = execute(
            &mut p,
            &PeriodCommand::Reopen(ReopenPeriod {
                tenant_id,
                period_id,
                actor,
                reason: "late invoice correction".into(),
                occurred_at: Utc::now(),
            }),
        )
        .unwrap();
        match &events[0] {
            PeriodEvent::Reopened(e) => {
                assert_eq!(e.actor, actor);
                assert_eq!(e.reason, "late invoice correction");
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert_eq!(p.status(), PeriodStatus::Open);
        assert_eq!(p.reopen_count(), 1);
    }

    #[test]
    fn permanently_closed_is_terminal() {
        let tenant_id = TenantId::new();
        let mut p = defined(tenant_id, date(2026, 1, 1), date(2026, 1, 31));
        open(&mut p, tenant_id);
        close(&mut p, tenant_id).unwrap();
        let period_id = p.id_typed();
        execute(
            &mut p,
            &PeriodCommand::PermanentlyClose(PermanentlyClosePeriod {
                tenant_id,
                period_id,
                actor: UserId::new(),
                occurred_at: Utc::now(),
            }),
        )
        .unwrap();

        let reopen = PeriodCommand::Reopen(ReopenPeriod {
            tenant_id,
            period_id: p.id_typed(),
            actor: UserId::new(),
            reason: "please".into(),
            occurred_at: Utc::now(),
        });
        assert!(p.handle(&reopen).is_err());
        assert!(
            p.handle(&PeriodCommand::Open(OpenPeriod {
                tenant_id,
                period_id: p.id_typed(),
                occurred_at: Utc::now(),
            }))
            .is_err()
        );
    }

    #[test]
    fn cannot_close_unopened_period() {
        let tenant_id = TenantId::new();
        let mut p = defined(tenant_id, date(2026, 1, 1), date(2026, 1, 31));
        assert!(close(&mut p, tenant_id).is_err());
    }

    #[test]
    fn overlapping_definition_is_rejected() {
        let tenant_id = TenantId::new();
        let jan = defined(tenant_id, date(2026, 1, 1), date(2026, 1, 31));
        let period_id = PeriodId::new(AggregateId::new());
        let p = Period::empty(period_id);

        let cmd = |start, end| {
            PeriodCommand::DefinePeriod(DefinePeriod {
                tenant_id,
                period_id,
                ledger_id: ledger(),
                name: "overlap".into(),
                start,
                end,
                siblings: vec![jan.slot().unwrap()],
                occurred_at: Utc::now(),
            })
        };
        assert!(matches!(
            p.handle(&cmd(date(2026, 1, 31), date(2026, 2, 28))),
            Err(DomainError::Conflict(_))
        ));
        assert!(p.handle(&cmd(date(2026, 2, 1), date(2026, 2, 28))).is_ok());
    }
}
