//! Notification payloads and delivery channels.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use tracing::info;

use crate::error::{Error, Result};
use crate::model::{Priority, Task, TaskId};

const ACTION_PREFIX: &str = "TICKWATCH_";

/// How intrusively a notification should be presented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum InterruptionLevel {
    Critical,
    TimeSensitive,
    Passive,
}

impl From<Priority> for InterruptionLevel {
    fn from(priority: Priority) -> Self {
        match priority {
            Priority::High => InterruptionLevel::Critical,
            Priority::Medium => InterruptionLevel::TimeSensitive,
            Priority::Low | Priority::None => InterruptionLevel::Passive,
        }
    }
}

/// Follow-up a recipient can trigger from a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationAction {
    Complete,
    SnoozeHour,
    SnoozeDay,
}

impl NotificationAction {
    pub const ALL: [NotificationAction; 3] = [
        NotificationAction::Complete,
        NotificationAction::SnoozeHour,
        NotificationAction::SnoozeDay,
    ];

    fn tag(self) -> &'static str {
        match self {
            NotificationAction::Complete => "COMPLETE_",
            NotificationAction::SnoozeHour => "SNOOZE_1H_",
            NotificationAction::SnoozeDay => "SNOOZE_1D_",
        }
    }

    pub fn title(self) -> &'static str {
        match self {
            NotificationAction::Complete => "Complete",
            NotificationAction::SnoozeHour => "Snooze 1 hour",
            NotificationAction::SnoozeDay => "Snooze 1 day",
        }
    }

    pub fn action_id(self, task_id: TaskId) -> String {
        format!("{ACTION_PREFIX}{}{task_id}", self.tag())
    }

    /// Parse an action id; ids we did not issue yield `None`.
    pub fn parse(raw: &str) -> Option<(NotificationAction, TaskId)> {
        let rest = raw.trim().strip_prefix(ACTION_PREFIX)?;
        NotificationAction::ALL.into_iter().find_map(|action| {
            rest.strip_prefix(action.tag())
                .and_then(|id| id.parse::<TaskId>().ok())
                .map(|id| (action, id))
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActionButton {
    pub action: String,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationPayload {
    pub title: String,
    pub message: String,
    /// Stable per task so repeated notifications replace each other
    pub tag: String,
    pub interruption_level: InterruptionLevel,
    pub actions: Vec<ActionButton>,
    pub task_id: TaskId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_at: Option<DateTime<Utc>>,
}

impl NotificationPayload {
    pub fn past_due(task: &Task, tz: &Tz, reminder: bool) -> Self {
        let mut title = format!("Past Due: {}", task.name);
        if reminder {
            title = format!("Reminder: {title}");
        }
        let mut message = match task.due_at {
            Some(due) => format!(
                "Was due {}",
                due.with_timezone(tz).format("%a %b %-d at %-I:%M %p")
            ),
            None => "Past due".to_string(),
        };
        if let Some(description) = task.description.as_deref().filter(|d| !d.trim().is_empty()) {
            message.push('\n');
            message.push_str(description.trim());
        }

        Self {
            title,
            message,
            tag: format!("tickwatch-task-{}", task.id),
            interruption_level: task.priority.into(),
            actions: NotificationAction::ALL
                .into_iter()
                .map(|action| ActionButton {
                    action: action.action_id(task.id),
                    title: action.title().to_string(),
                })
                .collect(),
            task_id: task.id,
            due_at: task.due_at,
        }
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, channel: &str, payload: &NotificationPayload) -> Result<()>;
}

/// Logs notifications instead of delivering them.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, channel: &str, payload: &NotificationPayload) -> Result<()> {
        info!(
            channel,
            task_id = payload.task_id,
            title = %payload.title,
            level = ?payload.interruption_level,
            "notification"
        );
        Ok(())
    }
}

/// POSTs the payload as JSON to an `http(s)` channel URL.
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: reqwest::Client,
}

impl WebhookNotifier {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn send(&self, channel: &str, payload: &NotificationPayload) -> Result<()> {
        if !is_webhook(channel) {
            return Err(Error::Notify(format!("not a webhook channel: {channel}")));
        }
        let response = self.client.post(channel).json(payload).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::Notify(format!("{channel} answered {status}")));
        }
        Ok(())
    }
}

/// Sends URL channels through the webhook and everything else to the log.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    webhook: WebhookNotifier,
    log: LogNotifier,
}

impl ChannelNotifier {
    pub fn new(webhook: WebhookNotifier) -> Self {
        Self {
            webhook,
            log: LogNotifier,
        }
    }
}

#[async_trait]
impl Notifier for ChannelNotifier {
    async fn send(&self, channel: &str, payload: &NotificationPayload) -> Result<()> {
        if is_webhook(channel) {
            self.webhook.send(channel, payload).await
        } else {
            self.log.send(channel, payload).await
        }
    }
}

fn is_webhook(channel: &str) -> bool {
    channel.starts_with("http://") || channel.starts_with("https://")
}
