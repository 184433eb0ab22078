//! Next-occurrence calculation for recurring tasks.
//!
//! Everything here is pure: no clock reads, no I/O. Arithmetic runs on the
//! local wall-clock due time so "every day at 08:00" stays at 08:00 across
//! DST changes.

use chrono::{DateTime, Datelike, Days, Months, NaiveDate, NaiveDateTime, Utc, Weekday};
use chrono_tz::Tz;

use crate::calendar::localize;
use crate::model::{FrequencyKind, IntervalUnit, Task};

/// Upper bound on how many days before its due date a recurring task may
/// show up in Upcoming.
pub const MAX_ADVANCE_DAYS: u32 = 7;

/// Day-interval at or below which an interval task counts as frequent.
pub const FREQUENT_INTERVAL_DAYS: u32 = 4;

/// Compute the occurrence following `from_due` in `tz`.
///
/// Returns `None` for non-recurring tasks, a missing due date, unknown
/// frequency kinds, or arithmetic that leaves the representable range.
pub fn next_occurrence(
    task: &Task,
    from_due: Option<DateTime<Utc>>,
    tz: &Tz,
) -> Option<DateTime<Tz>> {
    if !task.is_recurring() {
        return None;
    }
    let local = from_due?.with_timezone(tz).naive_local();
    let frequency = &task.frequency;
    let step = frequency.step();

    let next = match &frequency.kind {
        FrequencyKind::Daily => add_days(local, u64::from(step))?,
        FrequencyKind::Weekly => add_days(local, 7 * u64::from(step))?,
        FrequencyKind::Monthly => local.checked_add_months(Months::new(step))?,
        FrequencyKind::Yearly => local.checked_add_months(Months::new(step.checked_mul(12)?))?,
        FrequencyKind::Interval => match frequency.metadata.interval_unit() {
            Some(IntervalUnit::Weeks) => add_days(local, 7 * u64::from(step))?,
            Some(IntervalUnit::Months) => local.checked_add_months(Months::new(step))?,
            Some(IntervalUnit::Years) => {
                local.checked_add_months(Months::new(step.checked_mul(12)?))?
            }
            Some(IntervalUnit::Days) | None => add_days(local, u64::from(step))?,
        },
        FrequencyKind::DaysOfWeek => next_listed_weekday(local, &frequency.metadata.weekdays)?,
        FrequencyKind::DayOfMonth => next_month_day(local, frequency.metadata.target_day)?,
        FrequencyKind::Once | FrequencyKind::NoRepeat | FrequencyKind::Unknown(_) => return None,
    };

    Some(localize(tz, next))
}

fn add_days(local: NaiveDateTime, days: u64) -> Option<NaiveDateTime> {
    local.checked_add_days(Days::new(days))
}

fn next_listed_weekday(local: NaiveDateTime, weekdays: &[Weekday]) -> Option<NaiveDateTime> {
    (1..=8)
        .filter_map(|offset| add_days(local, offset))
        .find(|candidate| weekdays.contains(&candidate.weekday()))
        .or_else(|| add_days(local, 7))
}

fn next_month_day(local: NaiveDateTime, target_day: Option<u32>) -> Option<NaiveDateTime> {
    let first_of_next = NaiveDate::from_ymd_opt(local.year(), local.month(), 1)?
        .checked_add_months(Months::new(1))?;
    let month_len = days_in_month(first_of_next)?;
    let day = target_day.unwrap_or_else(|| local.day()).clamp(1, month_len);
    first_of_next.with_day(day).map(|date| date.and_time(local.time()))
}

fn days_in_month(first: NaiveDate) -> Option<u32> {
    first
        .checked_add_months(Months::new(1))?
        .pred_opt()
        .map(|last| last.day())
}

/// Daily tasks and day-intervals of at most four days are too frequent to be
/// worth showing ahead of time.
pub fn is_frequent_recurrence(task: &Task) -> bool {
    let frequency = &task.frequency;
    match frequency.kind {
        FrequencyKind::Daily => true,
        FrequencyKind::Interval => {
            let days_unit = matches!(frequency.metadata.interval_unit(), Some(IntervalUnit::Days))
                || frequency.metadata.unit.as_deref().map_or(true, |unit| unit.trim().is_empty());
            days_unit && frequency.step() <= FREQUENT_INTERVAL_DAYS
        }
        _ => false,
    }
}

/// Approximate recurrence period in days.
pub fn period_days(task: &Task) -> Option<u32> {
    if !task.is_recurring() {
        return None;
    }
    let frequency = &task.frequency;
    let step = frequency.step();
    let days = match frequency.kind {
        FrequencyKind::Daily => step,
        FrequencyKind::Weekly => step.saturating_mul(7),
        FrequencyKind::Monthly => step.saturating_mul(30),
        FrequencyKind::Yearly => step.saturating_mul(365),
        FrequencyKind::DaysOfWeek => 7,
        FrequencyKind::DayOfMonth => 30,
        FrequencyKind::Interval => match frequency.metadata.interval_unit() {
            Some(IntervalUnit::Weeks) => step.saturating_mul(7),
            Some(IntervalUnit::Months) => step.saturating_mul(30),
            Some(IntervalUnit::Years) => step.saturating_mul(365),
            Some(IntervalUnit::Days) | None => step,
        },
        _ => return None,
    };
    Some(days)
}

/// How many days before its due date a recurring task enters Upcoming.
pub fn advance_days(task: &Task) -> Option<u32> {
    period_days(task).map(|period| (period / 2).min(MAX_ADVANCE_DAYS))
}
