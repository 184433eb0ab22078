//! Single mediator for task completion requests.
//!
//! Several views may show the same task; a burst of completion requests for
//! one id inside the coalescing window collapses into one remote call.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::classifier::AssigneeFilter;
use crate::clock::Clock;
use crate::error::Result;
use crate::events::{EventBus, EventKind};
use crate::model::{MemberId, Task, TaskId};
use crate::service::TaskService;

pub const COALESCE_WINDOW_SECS: i64 = 30;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletionOutcome {
    Completed(Task),
    /// Another request for the same task was accepted within the window.
    Coalesced,
}

impl CompletionOutcome {
    pub fn is_coalesced(&self) -> bool {
        matches!(self, CompletionOutcome::Coalesced)
    }
}

#[derive(Serialize)]
struct Coalesced {
    task_id: TaskId,
    first_requested_at: DateTime<Utc>,
}

pub struct CompletionCoordinator {
    service: Arc<dyn TaskService>,
    clock: Arc<dyn Clock>,
    events: EventBus,
    window: Duration,
    recent: Mutex<HashMap<TaskId, DateTime<Utc>>>,
}

impl CompletionCoordinator {
    pub fn new(service: Arc<dyn TaskService>, clock: Arc<dyn Clock>, events: EventBus) -> Self {
        Self {
            service,
            clock,
            events,
            window: Duration::seconds(COALESCE_WINDOW_SECS),
            recent: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    /// Complete `id` unless it was already completed within the window.
    ///
    /// The id is reserved before the remote call; a failed call releases the
    /// reservation so a retry is not swallowed.
    pub async fn complete(
        &self,
        id: TaskId,
        completed_by: Option<MemberId>,
    ) -> Result<CompletionOutcome> {
        let now = self.clock.now();
        {
            let mut recent = self.recent.lock().unwrap_or_else(|e| e.into_inner());
            let window = self.window;
            recent.retain(|_, at| now - *at < window);
            if let Some(first) = recent.get(&id).copied() {
                info!(task_id = id, "completion coalesced");
                self.events.emit(
                    EventKind::CompletionCoalesced,
                    now,
                    Coalesced {
                        task_id: id,
                        first_requested_at: first,
                    },
                );
                return Ok(CompletionOutcome::Coalesced);
            }
            recent.insert(id, now);
        }

        match self.service.complete_task(id, completed_by).await {
            Ok(task) => {
                info!(task_id = id, ?completed_by, "task completed");
                Ok(CompletionOutcome::Completed(task))
            }
            Err(err) => {
                warn!(task_id = id, error = %err, "task completion failed");
                let mut recent = self.recent.lock().unwrap_or_else(|e| e.into_inner());
                if recent.get(&id) == Some(&now) {
                    recent.remove(&id);
                }
                Err(err)
            }
        }
    }

    /// Whether `id` is inside the coalescing window right now.
    pub fn recently_completed(&self, id: TaskId) -> bool {
        let now = self.clock.now();
        let recent = self.recent.lock().unwrap_or_else(|e| e.into_inner());
        recent.get(&id).is_some_and(|at| now - *at < self.window)
    }
}

/// Who to credit: explicit value, then the view's member, then the assignee.
pub fn resolve_completed_by(
    explicit: Option<MemberId>,
    filter: Option<&AssigneeFilter>,
    task: Option<&Task>,
) -> Option<MemberId> {
    explicit
        .or_else(|| filter.and_then(AssigneeFilter::member_id))
        .or_else(|| task.and_then(|task| task.assigned_to))
}
