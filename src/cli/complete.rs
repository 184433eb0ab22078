//! tickwatch complete command implementation

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::client::HttpTaskService;
use crate::clock::SystemClock;
use crate::completion::{resolve_completed_by, CompletionCoordinator, CompletionOutcome};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::model::{MemberId, TaskId};
use crate::output::{emit_success, OutputOptions, Report};
use crate::service::TaskService;

use super::{block_on, EventPipe};

pub struct CompleteOptions {
    pub config: PathBuf,
    pub id: TaskId,
    pub completed_by: Option<MemberId>,
    pub events: Option<String>,
    pub json: bool,
    pub quiet: bool,
}

#[derive(Serialize)]
struct CompleteReport {
    task_id: TaskId,
    name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    completed_by: Option<MemberId>,
    /// Due date the service moved the task to, if it recurs
    #[serde(skip_serializing_if = "Option::is_none")]
    next_due: Option<DateTime<Utc>>,
}

pub fn run(options: CompleteOptions) -> Result<()> {
    let config = Config::load_or_default(&options.config)?;
    let service = Arc::new(HttpTaskService::from_config(&config)?);

    let report = block_on(async {
        let pipe = EventPipe::open(options.events.as_deref())?;
        let result = async {
            let tasks = service.get_tasks().await?;
            let task = tasks
                .iter()
                .find(|task| task.id == options.id)
                .ok_or(Error::TaskNotFound(options.id))?;
            let completed_by = resolve_completed_by(options.completed_by, None, Some(task));

            let coordinator =
                CompletionCoordinator::new(service.clone(), Arc::new(SystemClock), pipe.bus());
            let next_due = match coordinator.complete(options.id, completed_by).await? {
                CompletionOutcome::Completed(updated) => updated.due_at,
                CompletionOutcome::Coalesced => None,
            };
            Ok::<_, Error>(CompleteReport {
                task_id: options.id,
                name: task.name.clone(),
                completed_by,
                next_due,
            })
        }
        .await;
        pipe.finish().await;
        result
    })?;

    let mut human = Report::new(format!("Completed #{} {}", report.task_id, report.name));
    if let Some(member) = report.completed_by {
        human.field("Completed by", format!("user {member}"));
    }
    if let Some(next) = report.next_due {
        human.field("Next due", next.to_rfc3339());
    }

    emit_success(
        OutputOptions {
            json: options.json,
            quiet: options.quiet,
        },
        "complete",
        &report,
        &human,
    )
}
