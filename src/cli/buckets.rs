//! tickwatch buckets command implementation
//!
//! Fetches the task list once and classifies it the way `run` would.

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::Serialize;

use crate::classifier::{AssigneeFilter, BucketKind, BucketSpec};
use crate::client::HttpTaskService;
use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::error::Result;
use crate::model::{Priority, Task, TaskId};
use crate::output::{emit_success, format_local, OutputOptions, Report};
use crate::snapshot::SnapshotCoordinator;

use super::{block_on, EventPipe};

pub struct BucketsOptions {
    pub config: PathBuf,
    pub assignee: Option<i64>,
    pub unassigned: bool,
    pub buckets: Vec<String>,
    pub events: Option<String>,
    pub json: bool,
    pub quiet: bool,
}

#[derive(Serialize)]
struct BucketsReport {
    timezone: String,
    filter: String,
    evaluated_at: DateTime<Utc>,
    snapshot_version: u64,
    buckets: Vec<BucketReport>,
}

#[derive(Serialize)]
struct BucketReport {
    bucket: BucketKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    next_transition: Option<DateTime<Utc>>,
    tasks: Vec<TaskRow>,
}

#[derive(Serialize)]
struct TaskRow {
    id: TaskId,
    name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    due_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    assigned_to: Option<i64>,
    priority: Priority,
    frequency: String,
}

impl From<&Task> for TaskRow {
    fn from(task: &Task) -> Self {
        Self {
            id: task.id,
            name: task.name.clone(),
            due_at: task.due_at,
            assigned_to: task.assigned_to,
            priority: task.priority,
            frequency: task.frequency.kind.to_string(),
        }
    }
}

pub fn run(options: BucketsOptions) -> Result<()> {
    let config = Config::load_or_default(&options.config)?;
    let tz = config.tz()?;
    let cutoffs = config.cutoffs()?;
    let kinds = parse_kinds(&options.buckets)?;
    let filter = match (options.assignee, options.unassigned) {
        (Some(member), _) => AssigneeFilter::Member(member),
        (None, true) => AssigneeFilter::Unassigned,
        (None, false) => AssigneeFilter::Any,
    };
    let service = Arc::new(HttpTaskService::from_config(&config)?);
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let (snapshot, now) = block_on(async {
        let pipe = EventPipe::open(options.events.as_deref())?;
        let snapshot = {
            let coordinator = SnapshotCoordinator::new(service.clone(), clock.clone(), pipe.bus());
            coordinator.try_poll().await?
        };
        pipe.finish().await;
        Ok((snapshot, clock.now()))
    })?;

    let buckets: Vec<BucketReport> = kinds
        .into_iter()
        .map(|kind| {
            let spec = BucketSpec::new(kind, filter, tz)
                .with_cutoffs(cutoffs)
                .with_upcoming_days(config.upcoming_days_window);
            BucketReport {
                bucket: kind,
                next_transition: spec.next_transition(&snapshot, now),
                tasks: spec.members(&snapshot, now).iter().map(TaskRow::from).collect(),
            }
        })
        .collect();

    let report = BucketsReport {
        timezone: tz.name().to_string(),
        filter: filter.to_string(),
        evaluated_at: now,
        snapshot_version: snapshot.version(),
        buckets,
    };

    let mut human = Report::new(format!("Buckets for {} ({})", report.filter, report.timezone));
    for bucket in &report.buckets {
        human.field(bucket.bucket.as_str(), bucket.tasks.len().to_string());
    }
    if let Some(next) = report
        .buckets
        .iter()
        .filter_map(|bucket| bucket.next_transition)
        .min()
    {
        human.field("next change", format_local(next, &tz));
    }
    for bucket in &report.buckets {
        human.section(
            bucket.bucket.as_str(),
            bucket.tasks.iter().map(|task| task_line(task, &tz)).collect(),
        );
    }
    if snapshot.is_empty() {
        human.warn("the task service returned no tasks");
    }

    emit_success(
        OutputOptions {
            json: options.json,
            quiet: options.quiet,
        },
        "buckets",
        &report,
        &human,
    )
}

fn parse_kinds(raw: &[String]) -> Result<Vec<BucketKind>> {
    if raw.is_empty() {
        return Ok(BucketKind::ALL.to_vec());
    }
    let mut kinds = Vec::with_capacity(raw.len());
    for value in raw {
        let kind = BucketKind::from_str(value)?;
        if !kinds.contains(&kind) {
            kinds.push(kind);
        }
    }
    Ok(kinds)
}

fn task_line(task: &TaskRow, tz: &Tz) -> String {
    match task.due_at {
        Some(due) => format!("#{} {} (due {})", task.id, task.name, format_local(due, tz)),
        None => format!("#{} {}", task.id, task.name),
    }
}
