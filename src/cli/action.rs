//! tickwatch action command implementation
//!
//! Applies a notification action id the same way the running watcher does.

use std::path::PathBuf;
use std::sync::Arc;

use crate::actions::{ActionOutcome, ActionRouter};
use crate::client::HttpTaskService;
use crate::clock::{Clock, SystemClock};
use crate::completion::CompletionCoordinator;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::model::MemberId;
use crate::output::{emit_success, format_local, OutputOptions, Report};
use crate::snapshot::PollHandle;

use super::{block_on, EventPipe};

pub struct ActionOptions {
    pub config: PathBuf,
    pub action_id: String,
    pub completed_by: Option<MemberId>,
    pub events: Option<String>,
    pub json: bool,
    pub quiet: bool,
}

pub fn run(options: ActionOptions) -> Result<()> {
    let config = Config::load_or_default(&options.config)?;
    let service = Arc::new(HttpTaskService::from_config(&config)?);
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let outcome = block_on(async {
        let pipe = EventPipe::open(options.events.as_deref())?;
        let result = {
            let completion = Arc::new(CompletionCoordinator::new(
                service.clone(),
                clock.clone(),
                pipe.bus(),
            ));
            let router = ActionRouter::new(service.clone(), completion, None, clock.clone(), PollHandle::new());
            router.apply(&options.action_id, options.completed_by).await
        };
        pipe.finish().await;
        result
    })?;

    let report = match &outcome {
        ActionOutcome::Ignored => {
            return Err(Error::InvalidArgument(format!(
                "'{}' is not a tickwatch action id",
                options.action_id
            )))
        }
        ActionOutcome::Completed { task_id, coalesced } => {
            let mut report = Report::new(format!("Completed task #{task_id}"));
            if *coalesced {
                report.warn("a completion for this task was already sent moments ago");
            }
            report
        }
        ActionOutcome::Snoozed { task_id, until } => {
            let mut report = Report::new(format!("Snoozed task #{task_id}"));
            report.field("Until", format_local(*until, &config.tz()?));
            report
        }
    };

    emit_success(
        OutputOptions {
            json: options.json,
            quiet: options.quiet,
        },
        "action",
        &outcome,
        &report,
    )
}
