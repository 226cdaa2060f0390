//! Fiscal periods: lifecycle, calendar lookups and close readiness.

pub mod calendar;
pub mod period;
pub mod readiness;

pub use calendar::{PeriodCalendar, PeriodSlot};
pub use period::{
    ClosePeriod, DefinePeriod, MarkFuture, OpenPeriod, PermanentlyClosePeriod, Period, PeriodClosed,
    PeriodCommand, PeriodDefined, PeriodEvent, PeriodId, PeriodMarkedFuture, PeriodOpened,
    PeriodPermanentlyClosed, PeriodReopened, PeriodStatus, ReopenPeriod,
};
pub use readiness::{CloseException, CloseExceptionKind, CloseReadiness};
