//! Contract with the remote task service.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::Result;
use crate::model::{Member, MemberId, Task, TaskId};

/// Fields that may be changed through [`TaskService::update_task`].
///
/// `None` leaves the field untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_date: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_due_date: Option<DateTime<Utc>>,
}

impl TaskUpdate {
    pub fn reschedule(next_due: DateTime<Utc>) -> Self {
        Self {
            next_due_date: Some(next_due),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

#[async_trait]
pub trait TaskService: Send + Sync {
    async fn get_tasks(&self) -> Result<Vec<Task>>;

    async fn get_members(&self) -> Result<Vec<Member>>;

    async fn complete_task(&self, id: TaskId, completed_by: Option<MemberId>) -> Result<Task>;

    async fn update_task(&self, id: TaskId, update: TaskUpdate) -> Result<Task>;
}
