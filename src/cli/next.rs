//! tickwatch next-occurrence command implementation

use std::path::PathBuf;

use chrono::{DateTime, Utc, Weekday};
use serde::Serialize;

use crate::calendar::parse_timezone;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::model::{Frequency, FrequencyKind, Task};
use crate::output::{emit_success, format_local, OutputOptions, Report};
use crate::recurrence::{advance_days, is_frequent_recurrence, next_occurrence};

pub struct NextOptions {
    pub config: PathBuf,
    pub kind: String,
    pub due: String,
    pub interval: u32,
    pub unit: Option<String>,
    pub weekdays: Vec<String>,
    pub day_of_month: Option<u32>,
    pub timezone: Option<String>,
    pub json: bool,
    pub quiet: bool,
}

#[derive(Serialize)]
struct NextReport {
    kind: String,
    interval: u32,
    timezone: String,
    due: DateTime<Utc>,
    next: Option<DateTime<Utc>>,
    next_local: Option<String>,
    frequent: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    advance_days: Option<u32>,
}

pub fn run(options: NextOptions) -> Result<()> {
    let tz = match options.timezone.as_deref() {
        Some(name) => parse_timezone(name)?,
        None => Config::load_or_default(&options.config)?.tz()?,
    };
    let due = DateTime::parse_from_rfc3339(options.due.trim())
        .map_err(|err| Error::InvalidArgument(format!("--due '{}': {err}", options.due)))?
        .with_timezone(&Utc);
    let task = rule_task(&options, due)?;

    let next = next_occurrence(&task, task.due_at, &tz);
    let report = NextReport {
        kind: task.frequency.kind.to_string(),
        interval: task.frequency.interval,
        timezone: tz.name().to_string(),
        due,
        next: next.map(|at| at.with_timezone(&Utc)),
        next_local: next.map(|at| at.to_rfc3339()),
        frequent: is_frequent_recurrence(&task),
        advance_days: advance_days(&task),
    };

    let mut human = Report::new(format!("Next occurrence ({} every {})", report.kind, task.frequency.step()));
    human
        .field("Due", format_local(due, &tz))
        .field(
            "Next",
            report
                .next
                .map(|at| format_local(at, &tz))
                .unwrap_or_else(|| "none".to_string()),
        );
    if let Some(days) = report.advance_days {
        human.field("Shown in upcoming", format!("{days} day(s) ahead"));
    }
    if report.frequent {
        human.field("Upcoming bucket", "hidden (frequent recurrence)");
    }
    if let FrequencyKind::Unknown(raw) = &task.frequency.kind {
        human.warn(format!("unknown frequency kind '{raw}' never recurs"));
    }

    emit_success(
        OutputOptions {
            json: options.json,
            quiet: options.quiet,
        },
        "next-occurrence",
        &report,
        &human,
    )
}

fn rule_task(options: &NextOptions, due: DateTime<Utc>) -> Result<Task> {
    let kind = options
        .kind
        .trim()
        .to_ascii_lowercase()
        .parse::<FrequencyKind>()
        .unwrap_or(FrequencyKind::Once);
    let mut frequency = Frequency::new(kind, options.interval);
    if let Some(unit) = &options.unit {
        frequency = frequency.with_unit(&unit.trim().to_ascii_lowercase());
    }
    for raw in &options.weekdays {
        let day = raw
            .trim()
            .parse::<Weekday>()
            .map_err(|_| Error::InvalidArgument(format!("unknown weekday '{raw}'")))?;
        if !frequency.metadata.weekdays.contains(&day) {
            frequency.metadata.weekdays.push(day);
        }
    }
    if let Some(day) = options.day_of_month {
        if !(1..=31).contains(&day) {
            return Err(Error::InvalidArgument(format!(
                "--day-of-month must be between 1 and 31, got {day}"
            )));
        }
        frequency.metadata.target_day = Some(day);
    }

    let mut task = Task::new(0, "rule");
    task.due_at = Some(due);
    task.frequency = frequency;
    Ok(task)
}
