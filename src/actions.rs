//! Routing of notification actions back into task mutations.

use std::sync::Arc;

use chrono::Duration;
use serde::Serialize;
use tracing::{info, warn};

use crate::clock::Clock;
use crate::completion::{CompletionCoordinator, CompletionOutcome};
use crate::error::Result;
use crate::model::{MemberId, TaskId};
use crate::notifications::NotificationScheduler;
use crate::notifier::NotificationAction;
use crate::service::{TaskService, TaskUpdate};
use crate::snapshot::PollHandle;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "result")]
pub enum ActionOutcome {
    /// Not one of our action ids
    Ignored,
    Completed { task_id: TaskId, coalesced: bool },
    Snoozed {
        task_id: TaskId,
        until: chrono::DateTime<chrono::Utc>,
    },
}

pub struct ActionRouter {
    service: Arc<dyn TaskService>,
    completion: Arc<CompletionCoordinator>,
    notifications: Option<Arc<NotificationScheduler>>,
    clock: Arc<dyn Clock>,
    poll: PollHandle,
}

impl ActionRouter {
    pub fn new(
        service: Arc<dyn TaskService>,
        completion: Arc<CompletionCoordinator>,
        notifications: Option<Arc<NotificationScheduler>>,
        clock: Arc<dyn Clock>,
        poll: PollHandle,
    ) -> Self {
        Self {
            service,
            completion,
            notifications,
            clock,
            poll,
        }
    }

    /// Apply `action_id`, returning the remote error to the caller.
    pub async fn apply(&self, action_id: &str, completed_by: Option<MemberId>) -> Result<ActionOutcome> {
        let Some((action, task_id)) = NotificationAction::parse(action_id) else {
            return Ok(ActionOutcome::Ignored);
        };
        if let Some(notifications) = &self.notifications {
            notifications.cancel_reminder(task_id).await;
        }

        let outcome = match action {
            NotificationAction::Complete => {
                let outcome = self.completion.complete(task_id, completed_by).await?;
                ActionOutcome::Completed {
                    task_id,
                    coalesced: matches!(outcome, CompletionOutcome::Coalesced),
                }
            }
            NotificationAction::SnoozeHour | NotificationAction::SnoozeDay => {
                let delay = if action == NotificationAction::SnoozeHour {
                    Duration::hours(1)
                } else {
                    Duration::hours(24)
                };
                let until = self.clock.now() + delay;
                self.service
                    .update_task(task_id, TaskUpdate::reschedule(until))
                    .await?;
                ActionOutcome::Snoozed { task_id, until }
            }
        };
        info!(task_id, ?action, "notification action applied");
        self.poll.request();
        Ok(outcome)
    }

    /// Dispatcher entry point: failures are logged, never propagated.
    pub async fn handle_action(&self, action_id: &str) -> Option<ActionOutcome> {
        match self.apply(action_id, None).await {
            Ok(outcome) => Some(outcome),
            Err(err) => {
                warn!(action = action_id, error = %err, "notification action failed");
                None
            }
        }
    }
}
