//! Expands allocated obligations into schedule entries.
//!
//! Buckets that land in a period which no longer accepts schedule (closed or
//! permanently closed) are rolled into one `Catchup` entry dated at the start
//! of the next period that does.

use chrono::NaiveDate;

use forgerev_contracts::{
    ContractId, Milestone, PerformanceObligation, RecognitionMethod, SourceEventKey,
};
use forgerev_core::split_by_weights;
use forgerev_periods::{PeriodCalendar, PeriodId, PeriodSlot};

use crate::daycount::DayCountConvention;
use crate::schedule::{EntryId, EntryStatus, ScheduleEntry, ScheduleError, ScheduleEventType};

/// Which contract version and source event new entries belong to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleContext {
    pub contract_id: ContractId,
    pub contract_version: u32,
    pub source: Option<SourceEventKey>,
}

/// What a predecessor obligation had recognised when its contract was modified.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PriorRecognition {
    pub posted_total: i64,
    /// Unposted predecessor entries dated before the modification date. They
    /// keep their date and period on the successor.
    pub past_due: Vec<ScheduleEntry>,
    pub completed_milestones: Vec<String>,
}

impl PriorRecognition {
    fn past_due_total(&self) -> Option<i64> {
        self.past_due
            .iter()
            .try_fold(0i64, |acc, e| acc.checked_add(e.amount))
    }
}

/// Milestone amounts fixed by sequence; the last milestone takes the remainder.
pub fn milestone_amounts(allocated: i64, milestones: &[Milestone]) -> Option<Vec<i64>> {
    let weights: Vec<i128> = milestones.iter().map(|m| m.basis_points as i128).collect();
    split_by_weights(allocated, &weights)
}

struct Placed {
    period_id: PeriodId,
    date: NaiveDate,
    amount: i64,
    event_type: ScheduleEventType,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Scheduler {
    convention: DayCountConvention,
}

impl Scheduler {
    pub fn new(convention: DayCountConvention) -> Self {
        Self { convention }
    }

    pub fn convention(&self) -> DayCountConvention {
        self.convention
    }

    /// Schedule a freshly allocated obligation.
    ///
    /// Usage obligations produce nothing up front; their entries arrive with
    /// usage facts.
    pub fn plan_initial(
        &self,
        ctx: &ScheduleContext,
        pob: &PerformanceObligation,
        calendar: &PeriodCalendar,
    ) -> Result<Vec<ScheduleEntry>, ScheduleError> {
        let allocated = allocated(pob)?;
        let terms = &pob.terms;

        match terms.method {
            RecognitionMethod::PointInTime => self.point(
                ctx,
                pob,
                terms.start,
                allocated,
                ScheduleEventType::Initial,
                None,
                calendar,
            ),
            RecognitionMethod::Ratable => self.ratable(
                ctx,
                pob,
                terms.start,
                terms.end,
                allocated,
                ScheduleEventType::Initial,
                calendar,
            ),
            RecognitionMethod::Milestone => {
                let amounts = milestone_amounts(allocated, &terms.milestones)
                    .ok_or(ScheduleError::Overflow(pob.obligation_id))?;
                let mut entries = Vec::new();
                for (m, amount) in terms.milestones.iter().zip(amounts) {
                    if let Some(done) = m.completed_on {
                        entries.extend(self.point(
                            ctx,
                            pob,
                            done,
                            amount,
                            ScheduleEventType::Initial,
                            Some(&m.milestone_id),
                            calendar,
                        )?);
                    }
                }
                Ok(entries)
            }
            RecognitionMethod::Usage => Ok(Vec::new()),
        }
    }

    /// Schedule the successor of an in-flight obligation after a modification.
    ///
    /// What the predecessor already posted is carried over as a posted
    /// `Adjustment` (not re-emitted to the GL). Its past-due entries are
    /// reissued on their original dates. The rest of the new allocation is
    /// scheduled forward from `modification_date`, or reversed when the new
    /// allocation is below what was already recognised.
    pub fn plan_successor(
        &self,
        ctx: &ScheduleContext,
        pob: &PerformanceObligation,
        prior: &PriorRecognition,
        modification_date: NaiveDate,
        calendar: &PeriodCalendar,
    ) -> Result<Vec<ScheduleEntry>, ScheduleError> {
        let allocated = allocated(pob)?;
        let posted = prior.posted_total;
        let terms = &pob.terms;

        if posted == 0
            && prior.past_due.is_empty()
            && prior.completed_milestones.is_empty()
            && terms.start >= modification_date
        {
            return self.plan_initial(ctx, pob, calendar);
        }

        let recognised = prior
            .past_due_total()
            .and_then(|due| due.checked_add(posted))
            .ok_or(ScheduleError::Overflow(pob.obligation_id))?;

        let mut entries = Vec::new();
        if posted != 0 {
            let slot = calendar
                .slot_for(modification_date)
                .or_else(|| calendar.first_accepting_from(modification_date))
                .ok_or(ScheduleError::NoPeriod {
                    date: modification_date,
                })?;
            let mut carried = self.entry(
                ctx,
                pob,
                Placed {
                    period_id: slot.period_id,
                    date: modification_date,
                    amount: posted,
                    event_type: ScheduleEventType::Adjustment,
                },
                None,
            );
            carried.status = EntryStatus::Posted;
            carried.carried_forward = true;
            entries.push(carried);
        }
        entries.extend(prior.past_due.iter().map(|e| ScheduleEntry {
            entry_id: EntryId::new(),
            contract_id: ctx.contract_id,
            contract_version: ctx.contract_version,
            obligation_id: pob.obligation_id,
            status: EntryStatus::Scheduled,
            carried_forward: false,
            posted_at: None,
            ..e.clone()
        }));

        let forward_type = if posted != 0 {
            ScheduleEventType::Adjustment
        } else {
            ScheduleEventType::Initial
        };

        if terms.method == RecognitionMethod::Milestone {
            let amounts = milestone_amounts(allocated, &terms.milestones)
                .ok_or(ScheduleError::Overflow(pob.obligation_id))?;
            let target: i64 = terms
                .milestones
                .iter()
                .zip(&amounts)
                .filter(|(m, _)| {
                    m.completed_on.is_some() || prior.completed_milestones.contains(&m.milestone_id)
                })
                .map(|(_, a)| *a)
                .sum();
            let delta = target - recognised;
            if delta != 0 {
                let kind = if delta < 0 {
                    ScheduleEventType::Reversal
                } else {
                    forward_type
                };
                entries.extend(self.point(ctx, pob, modification_date, delta, kind, None, calendar)?);
            }
            return Ok(entries);
        }

        let remaining = allocated
            .checked_sub(recognised)
            .ok_or(ScheduleError::Overflow(pob.obligation_id))?;
        if remaining < 0 {
            entries.extend(self.point(
                ctx,
                pob,
                modification_date,
                remaining,
                ScheduleEventType::Reversal,
                None,
                calendar,
            )?);
            return Ok(entries);
        }
        if remaining == 0 {
            return Ok(entries);
        }

        match terms.method {
            RecognitionMethod::PointInTime => {
                let date = if recognised != 0 {
                    terms.start.max(modification_date)
                } else {
                    terms.start
                };
                entries.extend(self.point(ctx, pob, date, remaining, forward_type, None, calendar)?);
            }
            RecognitionMethod::Ratable => {
                let from = terms.start.max(modification_date);
                if from > terms.end {
                    entries.extend(self.point(
                        ctx,
                        pob,
                        modification_date,
                        remaining,
                        forward_type,
                        None,
                        calendar,
                    )?);
                } else {
                    entries.extend(self.ratable(
                        ctx,
                        pob,
                        from,
                        terms.end,
                        remaining,
                        forward_type,
                        calendar,
                    )?);
                }
            }
            // Usage keeps arriving against the new cap; milestones handled above.
            RecognitionMethod::Usage | RecognitionMethod::Milestone => {}
        }

        Ok(entries)
    }

    /// Entry for a milestone completed after the contract was allocated.
    ///
    /// `already_completed` lists milestones recognised anywhere in the
    /// obligation's version chain.
    pub fn plan_milestone(
        &self,
        ctx: &ScheduleContext,
        pob: &PerformanceObligation,
        milestone_id: &str,
        completed_on: NaiveDate,
        already_completed: &[String],
        calendar: &PeriodCalendar,
    ) -> Result<Vec<ScheduleEntry>, ScheduleError> {
        let allocated = allocated(pob)?;
        ensure_method(pob, RecognitionMethod::Milestone)?;

        let (idx, milestone) = pob
            .terms
            .milestone(milestone_id)
            .ok_or_else(|| ScheduleError::UnknownMilestone(milestone_id.to_string()))?;
        if milestone.completed_on.is_some() || already_completed.iter().any(|m| m == milestone_id) {
            return Err(ScheduleError::MilestoneAlreadyRecognised(milestone_id.to_string()));
        }

        let amounts = milestone_amounts(allocated, &pob.terms.milestones)
            .ok_or(ScheduleError::Overflow(pob.obligation_id))?;
        let amount = amounts
            .get(idx)
            .copied()
            .ok_or_else(|| ScheduleError::UnknownMilestone(milestone_id.to_string()))?;

        self.point(
            ctx,
            pob,
            completed_on,
            amount,
            ScheduleEventType::Initial,
            Some(milestone_id),
            calendar,
        )
    }

    /// Entry for a usage fact: `quantity * usage_rate`, capped so the
    /// obligation never recognises more than its allocation.
    ///
    /// `live_total` is the sum of the obligation's non-reversed entries.
    /// Returns nothing once the allocation is exhausted.
    pub fn plan_usage(
        &self,
        ctx: &ScheduleContext,
        pob: &PerformanceObligation,
        quantity: i64,
        usage_date: NaiveDate,
        live_total: i64,
        calendar: &PeriodCalendar,
    ) -> Result<Vec<ScheduleEntry>, ScheduleError> {
        let allocated = allocated(pob)?;
        ensure_method(pob, RecognitionMethod::Usage)?;
        if quantity <= 0 {
            return Err(ScheduleError::InvalidUsage);
        }

        let rate = pob.terms.usage_rate.ok_or(ScheduleError::MethodMismatch {
            obligation_id: pob.obligation_id,
            expected: RecognitionMethod::Usage,
        })?;
        let raw = quantity
            .checked_mul(rate)
            .ok_or(ScheduleError::Overflow(pob.obligation_id))?;
        let amount = raw.min(allocated.saturating_sub(live_total));
        if amount <= 0 {
            return Ok(Vec::new());
        }

        self.point(
            ctx,
            pob,
            usage_date,
            amount,
            ScheduleEventType::Initial,
            None,
            calendar,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn point(
        &self,
        ctx: &ScheduleContext,
        pob: &PerformanceObligation,
        date: NaiveDate,
        amount: i64,
        event_type: ScheduleEventType,
        milestone_id: Option<&str>,
        calendar: &PeriodCalendar,
    ) -> Result<Vec<ScheduleEntry>, ScheduleError> {
        let slot = calendar
            .slot_for(date)
            .ok_or(ScheduleError::NoPeriod { date })?;
        self.materialize(
            ctx,
            pob,
            vec![(slot, date, amount)],
            event_type,
            milestone_id,
            calendar,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn ratable(
        &self,
        ctx: &ScheduleContext,
        pob: &PerformanceObligation,
        start: NaiveDate,
        end: NaiveDate,
        amount: i64,
        event_type: ScheduleEventType,
        calendar: &PeriodCalendar,
    ) -> Result<Vec<ScheduleEntry>, ScheduleError> {
        let mut windows: Vec<(&PeriodSlot, NaiveDate, NaiveDate)> = Vec::new();
        let mut next = start;
        let mut covered = false;

        for slot in calendar.overlapping(start, end) {
            let from = start.max(slot.start);
            let to = end.min(slot.end);
            if from > next {
                return Err(ScheduleError::NoPeriod { date: next });
            }
            windows.push((slot, from, to));
            if to == end {
                covered = true;
                break;
            }
            next = to.succ_opt().ok_or(ScheduleError::NoPeriod { date: to })?;
        }
        if !covered {
            return Err(ScheduleError::NoPeriod { date: next });
        }

        let weights = |convention: DayCountConvention| -> Vec<i128> {
            windows
                .iter()
                .map(|(_, from, to)| convention.days(*from, *to).max(0) as i128)
                .collect()
        };
        let amounts = split_by_weights(amount, &weights(self.convention))
            .or_else(|| split_by_weights(amount, &weights(DayCountConvention::ActualActual)))
            .ok_or(ScheduleError::Overflow(pob.obligation_id))?;

        let buckets = windows
            .iter()
            .zip(amounts)
            .map(|((slot, _, to), amount)| (*slot, *to, amount))
            .collect();
        self.materialize(ctx, pob, buckets, event_type, None, calendar)
    }

    fn materialize(
        &self,
        ctx: &ScheduleContext,
        pob: &PerformanceObligation,
        buckets: Vec<(&PeriodSlot, NaiveDate, i64)>,
        event_type: ScheduleEventType,
        milestone_id: Option<&str>,
        calendar: &PeriodCalendar,
    ) -> Result<Vec<ScheduleEntry>, ScheduleError> {
        let mut entries = Vec::new();
        let mut catchups: Vec<(PeriodId, NaiveDate, i64)> = Vec::new();

        for (slot, date, amount) in buckets {
            if amount == 0 {
                continue;
            }
            if slot.status.accepts_schedule() {
                entries.push(self.entry(
                    ctx,
                    pob,
                    Placed {
                        period_id: slot.period_id,
                        date,
                        amount,
                        event_type,
                    },
                    milestone_id,
                ));
                continue;
            }

            let target = slot
                .end
                .succ_opt()
                .and_then(|after| calendar.first_accepting_from(after))
                .ok_or(ScheduleError::NoPeriod { date })?;
            match catchups.iter_mut().find(|(id, _, _)| *id == target.period_id) {
                Some((_, _, total)) => {
                    *total = total
                        .checked_add(amount)
                        .ok_or(ScheduleError::Overflow(pob.obligation_id))?;
                }
                None => catchups.push((target.period_id, target.start, amount)),
            }
        }

        let catchup_type = if event_type == ScheduleEventType::Reversal {
            ScheduleEventType::Reversal
        } else {
            ScheduleEventType::Catchup
        };
        for (period_id, date, amount) in catchups {
            if amount != 0 {
                entries.push(self.entry(
                    ctx,
                    pob,
                    Placed {
                        period_id,
                        date,
                        amount,
                        event_type: catchup_type,
                    },
                    milestone_id,
                ));
            }
        }

        entries.sort_by_key(|e| e.schedule_date);
        Ok(entries)
    }

    fn entry(
        &self,
        ctx: &ScheduleContext,
        pob: &PerformanceObligation,
        placed: Placed,
        milestone_id: Option<&str>,
    ) -> ScheduleEntry {
        ScheduleEntry {
            entry_id: EntryId::new(),
            contract_id: ctx.contract_id,
            contract_version: ctx.contract_version,
            obligation_id: pob.obligation_id,
            period_id: placed.period_id,
            schedule_date: placed.date,
            amount: placed.amount,
            event_type: placed.event_type,
            status: EntryStatus::Scheduled,
            source: ctx.source.clone(),
            milestone_id: milestone_id.map(str::to_string),
            carried_forward: false,
            posted_at: None,
        }
    }
}

fn allocated(pob: &PerformanceObligation) -> Result<i64, ScheduleError> {
    pob.allocated_price
        .ok_or(ScheduleError::Unallocated(pob.obligation_id))
}

fn ensure_method(pob: &PerformanceObligation, expected: RecognitionMethod) -> Result<(), ScheduleError> {
    if pob.method() != expected {
        return Err(ScheduleError::MethodMismatch {
            obligation_id: pob.obligation_id,
            expected,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Datelike;
    use forgerev_catalog::ItemId;
    use forgerev_contracts::{ObligationId, ObligationStatus, RecognitionTerms};
    use forgerev_core::{AggregateId, LedgerId};
    use forgerev_periods::PeriodStatus;
    use proptest::prelude::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    /// Monthly periods for 2025..=2028, all `Open` unless listed as closed.
    fn monthly(closed_before: Option<NaiveDate>) -> PeriodCalendar {
        let mut slots = Vec::new();
        for y in 2025..=2028 {
            for m in 1..=12u32 {
                let start = date(y, m, 1);
                let next = if m == 12 { date(y + 1, 1, 1) } else { date(y, m + 1, 1) };
                let end = next.pred_opt().unwrap();
                let status = match closed_before {
                    Some(cut) if end < cut => PeriodStatus::Closed,
                    _ => PeriodStatus::Open,
                };
                slots.push(PeriodSlot {
                    period_id: PeriodId::new(AggregateId::new()),
                    ledger_id: LedgerId::new("PRIMARY").unwrap(),
                    name: format!("{y}-{m:02}"),
                    start,
                    end,
                    status,
                });
            }
        }
        PeriodCalendar::new(slots)
    }

    fn ctx() -> ScheduleContext {
        ScheduleContext {
            contract_id: ContractId::new(AggregateId::new()),
            contract_version: 1,
            source: None,
        }
    }

    fn pob(method: RecognitionMethod, allocated: i64, start: NaiveDate, end: NaiveDate) -> PerformanceObligation {
        let c = ContractId::new(AggregateId::new());
        PerformanceObligation {
            obligation_id: ObligationId::derive(c, 1, 1),
            line_no: 1,
            item_id: ItemId::new("SKU").unwrap(),
            quantity: 1,
            ssp_source: None,
            standalone_selling_price: None,
            estimated_standalone_value: None,
            allocated_price: Some(allocated),
            terms: RecognitionTerms {
                method,
                start,
                end,
                milestones: vec![],
                usage_rate: None,
            },
            status: ObligationStatus::Allocated,
        }
    }

    fn live_sum(entries: &[ScheduleEntry]) -> i64 {
        entries.iter().filter(|e| e.is_live()).map(|e| e.amount).sum()
    }

    #[test]
    fn twelve_month_ratable_prorates_first_and_last_period() {
        let cal = monthly(None);
        let p = pob(RecognitionMethod::Ratable, 1_200_000, date(2026, 1, 15), date(2027, 1, 14));
        let entries = Scheduler::default().plan_initial(&ctx(), &p, &cal).unwrap();

        assert_eq!(entries.len(), 13);
        assert_eq!(live_sum(&entries), 1_200_000);
        // 17 of 365 days fall in January 2026.
        assert_eq!(entries[0].amount, 55_890);
        assert_eq!(entries[0].schedule_date, date(2026, 1, 31));
        assert_eq!(entries[12].schedule_date, date(2027, 1, 14));
        assert!(entries.iter().all(|e| e.event_type == ScheduleEventType::Initial));
    }

    #[test]
    fn thirty_360_gives_equal_full_months() {
        let cal = monthly(None);
        let p = pob(RecognitionMethod::Ratable, 1_200_000, date(2026, 1, 1), date(2026, 12, 31));
        let entries = Scheduler::new(DayCountConvention::Thirty360)
            .plan_initial(&ctx(), &p, &cal)
            .unwrap();
        assert!(entries.iter().all(|e| e.amount == 100_000));
    }

    #[test]
    fn closed_periods_roll_into_single_catchup() {
        let cal = monthly(Some(date(2026, 3, 1)));
        let p = pob(RecognitionMethod::Ratable, 1_200_000, date(2026, 1, 1), date(2026, 12, 31));
        let entries = Scheduler::new(DayCountConvention::Thirty360)
            .plan_initial(&ctx(), &p, &cal)
            .unwrap();

        let catchups: Vec<_> = entries
            .iter()
            .filter(|e| e.event_type == ScheduleEventType::Catchup)
            .collect();
        assert_eq!(catchups.len(), 1);
        assert_eq!(catchups[0].amount, 200_000);
        assert_eq!(catchups[0].schedule_date, date(2026, 3, 1));
        assert_eq!(entries.len(), 11);
        assert_eq!(live_sum(&entries), 1_200_000);
    }

    #[test]
    fn point_in_time_recognises_everything_at_trigger() {
        let cal = monthly(None);
        let p = pob(RecognitionMethod::PointInTime, 42_000, date(2026, 5, 20), date(2026, 5, 20));
        let entries = Scheduler::default().plan_initial(&ctx(), &p, &cal).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].amount, 42_000);
        assert_eq!(entries[0].schedule_date, date(2026, 5, 20));
    }

    #[test]
    fn window_outside_calendar_is_rejected() {
        let cal = monthly(None);
        let p = pob(RecognitionMethod::Ratable, 100, date(2028, 6, 1), date(2029, 5, 31));
        assert_eq!(
            Scheduler::default().plan_initial(&ctx(), &p, &cal),
            Err(ScheduleError::NoPeriod { date: date(2029, 1, 1) })
        );
    }

    #[test]
    fn milestones_split_by_sequence_with_remainder_on_last() {
        let mut p = pob(RecognitionMethod::Milestone, 100_001, date(2026, 1, 1), date(2026, 12, 31));
        p.terms.milestones = vec![
            Milestone { milestone_id: "kickoff".into(), basis_points: 3_333, completed_on: Some(date(2026, 2, 3)) },
            Milestone { milestone_id: "build".into(), basis_points: 3_333, completed_on: None },
            Milestone { milestone_id: "golive".into(), basis_points: 3_334, completed_on: None },
        ];
        let amounts = milestone_amounts(100_001, &p.terms.milestones).unwrap();
        assert_eq!(amounts, vec![33_330, 33_330, 33_341]);

        let cal = monthly(None);
        let s = Scheduler::default();
        let initial = s.plan_initial(&ctx(), &p, &cal).unwrap();
        assert_eq!(initial.len(), 1);
        assert_eq!(initial[0].milestone_id.as_deref(), Some("kickoff"));

        let build = s
            .plan_milestone(&ctx(), &p, "build", date(2026, 6, 30), &[], &cal)
            .unwrap();
        assert_eq!(build[0].amount, 33_330);

        let again = s.plan_milestone(&ctx(), &p, "kickoff", date(2026, 7, 1), &[], &cal);
        assert!(matches!(again, Err(ScheduleError::MilestoneAlreadyRecognised(_))));
        let dup = s.plan_milestone(&ctx(), &p, "build", date(2026, 7, 1), &["build".to_string()], &cal);
        assert!(matches!(dup, Err(ScheduleError::MilestoneAlreadyRecognised(_))));
        let unknown = s.plan_milestone(&ctx(), &p, "nope", date(2026, 7, 1), &[], &cal);
        assert!(matches!(unknown, Err(ScheduleError::UnknownMilestone(_))));
    }

    #[test]
    fn usage_is_capped_at_allocation() {
        let cal = monthly(None);
        let mut p = pob(RecognitionMethod::Usage, 1_000, date(2026, 1, 1), date(2026, 12, 31));
        p.terms.usage_rate = Some(300);
        let s = Scheduler::default();

        let first = s.plan_usage(&ctx(), &p, 3, date(2026, 2, 1), 0, &cal).unwrap();
        assert_eq!(first[0].amount, 900);

        let second = s.plan_usage(&ctx(), &p, 3, date(2026, 3, 1), 900, &cal).unwrap();
        assert_eq!(second[0].amount, 100);

        let third = s.plan_usage(&ctx(), &p, 1, date(2026, 4, 1), 1_000, &cal).unwrap();
        assert!(third.is_empty());

        assert_eq!(
            s.plan_usage(&ctx(), &p, 0, date(2026, 4, 1), 0, &cal),
            Err(ScheduleError::InvalidUsage)
        );
    }

    #[test]
    fn successor_carries_posted_total_and_schedules_rest_forward() {
        let cal = monthly(None);
        let p = pob(RecognitionMethod::Ratable, 1_500_000, date(2026, 1, 1), date(2026, 12, 31));
        let prior = PriorRecognition {
            posted_total: 600_000,
            past_due: vec![],
            completed_milestones: vec![],
        };
        let entries = Scheduler::new(DayCountConvention::Thirty360)
            .plan_successor(&ctx(), &p, &prior, date(2026, 7, 1), &cal)
            .unwrap();

        let carried: Vec<_> = entries.iter().filter(|e| e.carried_forward).collect();
        assert_eq!(carried.len(), 1);
        assert_eq!(carried[0].amount, 600_000);
        assert_eq!(carried[0].status, EntryStatus::Posted);

        let forward: Vec<_> = entries.iter().filter(|e| !e.carried_forward).collect();
        assert_eq!(forward.len(), 6);
        assert!(forward.iter().all(|e| e.event_type == ScheduleEventType::Adjustment));
        assert!(forward.iter().all(|e| e.schedule_date.month() >= 7));
        assert_eq!(live_sum(&entries), 1_500_000);
    }

    #[test]
    fn successor_below_posted_total_reverses_difference() {
        let cal = monthly(None);
        let p = pob(RecognitionMethod::Ratable, 400_000, date(2026, 1, 1), date(2026, 12, 31));
        let prior = PriorRecognition {
            posted_total: 600_000,
            past_due: vec![],
            completed_milestones: vec![],
        };
        let entries = Scheduler::default()
            .plan_successor(&ctx(), &p, &prior, date(2026, 7, 1), &cal)
            .unwrap();

        assert_eq!(entries.len(), 2);
        let reversal = entries
            .iter()
            .find(|e| e.event_type == ScheduleEventType::Reversal)
            .unwrap();
        assert_eq!(reversal.amount, -200_000);
        assert_eq!(live_sum(&entries), 400_000);
    }

    #[test]
    fn successor_milestones_true_up_completed_work() {
        let cal = monthly(None);
        let mut p = pob(RecognitionMethod::Milestone, 200_000, date(2026, 1, 1), date(2026, 12, 31));
        p.terms.milestones = vec![
            Milestone { milestone_id: "a".into(), basis_points: 5_000, completed_on: None },
            Milestone { milestone_id: "b".into(), basis_points: 5_000, completed_on: None },
        ];
        let prior = PriorRecognition {
            posted_total: 50_000,
            past_due: vec![],
            completed_milestones: vec!["a".into()],
        };
        let s = Scheduler::default();
        let entries = s.plan_successor(&ctx(), &p, &prior, date(2026, 5, 1), &cal).unwrap();
        assert_eq!(live_sum(&entries), 100_000);

        let b = s
            .plan_milestone(&ctx(), &p, "b", date(2026, 9, 1), &prior.completed_milestones, &cal)
            .unwrap();
        assert_eq!(live_sum(&entries) + live_sum(&b), 200_000);
    }

    #[test]
    fn successor_keeps_unswept_entries_before_modification_date() {
        let cal = monthly(None);
        let p = pob(RecognitionMethod::Ratable, 1_200_000, date(2026, 1, 1), date(2026, 12, 31));
        let s = Scheduler::new(DayCountConvention::Thirty360);
        let original = s.plan_initial(&ctx(), &p, &cal).unwrap();
        let modified_on = date(2026, 7, 1);
        let prior = PriorRecognition {
            posted_total: 0,
            past_due: original
                .iter()
                .filter(|e| e.schedule_date < modified_on)
                .cloned()
                .collect(),
            completed_milestones: vec![],
        };

        let mut successor_ctx = ctx();
        successor_ctx.contract_version = 2;
        let entries = s
            .plan_successor(&successor_ctx, &p, &prior, modified_on, &cal)
            .unwrap();

        assert_eq!(entries.len(), 12);
        assert_eq!(live_sum(&entries), 1_200_000);
        for old in &prior.past_due {
            let kept = entries
                .iter()
                .find(|e| e.schedule_date == old.schedule_date)
                .unwrap();
            assert_eq!(kept.amount, old.amount);
            assert_eq!(kept.period_id, old.period_id);
            assert_eq!(kept.status, EntryStatus::Scheduled);
            assert_eq!(kept.contract_version, 2);
            assert_ne!(kept.entry_id, old.entry_id);
        }
        let forward: i64 = entries
            .iter()
            .filter(|e| e.schedule_date >= modified_on)
            .map(|e| e.amount)
            .sum();
        assert_eq!(forward, 600_000);
    }

    #[test]
    fn untouched_future_obligation_is_scheduled_fresh() {
        let cal = monthly(None);
        let p = pob(RecognitionMethod::Ratable, 120_000, date(2026, 9, 1), date(2026, 11, 30));
        let entries = Scheduler::default()
            .plan_successor(&ctx(), &p, &PriorRecognition::default(), date(2026, 7, 1), &cal)
            .unwrap();
        assert_eq!(entries.len(), 3);
        assert!(entries.iter().all(|e| e.event_type == ScheduleEventType::Initial));
    }

    proptest! {
        #![proptest_config(ProptestConfig { cases: 256, .. ProptestConfig::default() })]

        #[test]
        fn ratable_schedule_sums_to_allocation(
            allocated in -1_000_000_000i64..1_000_000_000_000,
            start_offset in 0i64..700,
            length in 0i64..700,
            closed_months in 0u32..12,
            thirty_360 in any::<bool>()
        ) {
            let start = date(2025, 1, 1) + chrono::Duration::days(start_offset);
            let end = start + chrono::Duration::days(length);
            let cut = date(2025, 1, 1) + chrono::Months::new(closed_months);
            let cal = monthly(Some(cut));
            let convention = if thirty_360 {
                DayCountConvention::Thirty360
            } else {
                DayCountConvention::ActualActual
            };

            let p = pob(RecognitionMethod::Ratable, allocated, start, end);
            let entries = Scheduler::new(convention).plan_initial(&ctx(), &p, &cal).unwrap();
            prop_assert_eq!(live_sum(&entries), allocated);
            prop_assert!(entries.iter().all(|e| e.schedule_date >= start.min(cut)));
        }
    }
}
