mod support;

use chrono::{DateTime, Utc, Weekday};
use tickwatch::model::{FrequencyKind, Task};
use tickwatch::recurrence::{advance_days, is_frequent_recurrence, next_occurrence};

use support::{ny, ny_at, recurring, task};

fn next_ny(task: &Task) -> Option<DateTime<Utc>> {
    next_occurrence(task, task.due_at, &ny()).map(|at| at.with_timezone(&Utc))
}

fn rule(kind: FrequencyKind, interval: u32, due: DateTime<Utc>) -> Task {
    recurring(task(1, "chore", Some(due)), kind, interval)
}

fn with_unit(mut task: Task, unit: &str) -> Task {
    task.frequency = task.frequency.with_unit(unit);
    task
}

#[test]
fn daily_advances_one_day() {
    let t = rule(FrequencyKind::Daily, 1, ny_at(2026, 1, 10, 8, 0));
    assert_eq!(next_ny(&t), Some(ny_at(2026, 1, 11, 8, 0)));
}

#[test]
fn weekly_advances_to_same_weekday() {
    let t = rule(FrequencyKind::Weekly, 1, ny_at(2026, 1, 5, 17, 0));
    assert_eq!(next_ny(&t), Some(ny_at(2026, 1, 12, 17, 0)));
}

#[test]
fn interval_defaults_to_days() {
    let t = rule(FrequencyKind::Interval, 3, ny_at(2026, 1, 8, 9, 0));
    assert_eq!(next_ny(&t), Some(ny_at(2026, 1, 11, 9, 0)));
}

#[test]
fn interval_honors_week_and_month_units() {
    let weeks = with_unit(rule(FrequencyKind::Interval, 2, ny_at(2026, 1, 5, 9, 0)), "weeks");
    assert_eq!(next_ny(&weeks), Some(ny_at(2026, 1, 19, 9, 0)));

    let months = with_unit(rule(FrequencyKind::Interval, 3, ny_at(2026, 1, 15, 9, 0)), "months");
    assert_eq!(next_ny(&months), Some(ny_at(2026, 4, 15, 9, 0)));
}

#[test]
fn monthly_preserves_day_and_clamps_month_end() {
    let first = rule(FrequencyKind::Monthly, 1, ny_at(2026, 1, 1, 10, 0));
    assert_eq!(next_ny(&first), Some(ny_at(2026, 2, 1, 10, 0)));

    let last = rule(FrequencyKind::Monthly, 1, ny_at(2026, 1, 31, 10, 0));
    assert_eq!(next_ny(&last), Some(ny_at(2026, 2, 28, 10, 0)));

    let leap = rule(FrequencyKind::Monthly, 1, ny_at(2028, 1, 31, 10, 0));
    assert_eq!(next_ny(&leap), Some(ny_at(2028, 2, 29, 10, 0)));
}

#[test]
fn yearly_advances_twelve_months() {
    let t = rule(FrequencyKind::Yearly, 1, ny_at(2026, 3, 14, 12, 0));
    assert_eq!(next_ny(&t), Some(ny_at(2027, 3, 14, 12, 0)));

    let feb29 = rule(FrequencyKind::Yearly, 1, ny_at(2028, 2, 29, 12, 0));
    assert_eq!(next_ny(&feb29), Some(ny_at(2029, 2, 28, 12, 0)));
}

#[test]
fn days_of_week_picks_next_listed_day() {
    let mut t = rule(FrequencyKind::DaysOfWeek, 1, ny_at(2026, 1, 5, 17, 0));
    t.frequency.metadata.weekdays = vec![Weekday::Mon, Weekday::Thu];
    assert_eq!(next_ny(&t), Some(ny_at(2026, 1, 8, 17, 0)));

    t.due_at = Some(ny_at(2026, 1, 8, 17, 0));
    assert_eq!(next_ny(&t), Some(ny_at(2026, 1, 12, 17, 0)));
}

#[test]
fn day_of_month_uses_target_day_next_month() {
    let mut t = rule(FrequencyKind::DayOfMonth, 1, ny_at(2026, 1, 20, 9, 0));
    t.frequency.metadata.target_day = Some(15);
    assert_eq!(next_ny(&t), Some(ny_at(2026, 2, 15, 9, 0)));

    t.frequency.metadata.target_day = Some(31);
    assert_eq!(next_ny(&t), Some(ny_at(2026, 2, 28, 9, 0)));
}

#[test]
fn local_time_survives_dst_change() {
    let t = rule(FrequencyKind::Daily, 1, ny_at(2026, 3, 7, 8, 0));
    let next = next_ny(&t).expect("next");
    assert_eq!(next, ny_at(2026, 3, 8, 8, 0));
    assert_eq!(next - t.due_at.unwrap(), chrono::Duration::hours(23));
}

#[test]
fn non_recurring_kinds_have_no_next_occurrence() {
    let once = task(1, "once", Some(ny_at(2026, 1, 10, 8, 0)));
    assert_eq!(next_ny(&once), None);

    let no_repeat = rule(FrequencyKind::NoRepeat, 1, ny_at(2026, 1, 10, 8, 0));
    assert_eq!(next_ny(&no_repeat), None);

    let unknown = rule(
        FrequencyKind::Unknown("lunar".to_string()),
        1,
        ny_at(2026, 1, 10, 8, 0),
    );
    assert_eq!(next_ny(&unknown), None);
}

#[test]
fn frequent_recurrences_are_daily_or_short_day_intervals() {
    let due = ny_at(2026, 1, 10, 8, 0);
    assert!(is_frequent_recurrence(&rule(FrequencyKind::Daily, 1, due)));
    assert!(is_frequent_recurrence(&rule(FrequencyKind::Interval, 4, due)));
    assert!(!is_frequent_recurrence(&rule(FrequencyKind::Interval, 5, due)));
    assert!(!is_frequent_recurrence(&with_unit(rule(FrequencyKind::Interval, 2, due), "weeks")));
    assert!(!is_frequent_recurrence(&rule(FrequencyKind::Weekly, 1, due)));
}

#[test]
fn advance_days_is_half_the_period_capped_at_a_week() {
    let due = ny_at(2026, 1, 10, 8, 0);
    assert_eq!(advance_days(&rule(FrequencyKind::Weekly, 1, due)), Some(3));
    assert_eq!(advance_days(&rule(FrequencyKind::Monthly, 1, due)), Some(7));
    assert_eq!(advance_days(&rule(FrequencyKind::Interval, 10, due)), Some(5));
    assert_eq!(advance_days(&task(1, "once", Some(due))), None);
}
