//! Recognition scheduling: turns allocated obligations into dated,
//! period-bucketed schedule entries.

pub mod daycount;
pub mod schedule;
pub mod scheduler;

pub use daycount::DayCountConvention;
pub use schedule::{EntryId, EntryStatus, ScheduleEntry, ScheduleError, ScheduleEventType, obligation_status};
pub use scheduler::{PriorRecognition, ScheduleContext, Scheduler, milestone_amounts};
