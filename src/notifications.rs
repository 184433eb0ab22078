//! De-duplicated past-due notifications with a 24-hour reminder chain.
//!
//! Fed by the per-member and unassigned PastDue classifiers. The record of
//! which `(task, due)` pairs were already announced is persisted, so a
//! restart does not re-send.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

use crate::classifier::{AssigneeFilter, BucketKind, BucketListener, BucketUpdate};
use crate::clock::Clock;
use crate::events::{EventBus, EventKind};
use crate::model::{MemberId, Task, TaskId};
use crate::notifier::{NotificationPayload, Notifier};
use crate::scheduler::{CancelHandle, Dispatch, Scheduler};
use crate::snapshot::Snapshot;
use crate::store::PersistentStore;

pub const REMINDER_INTERVAL_SECS: i64 = 86_400;

/// Store key of the `(task → due)` notification record
pub const NOTIFIED_KEY: &str = "notified_past_due";

/// Store key of the last instant each task was announced or reminded
pub const REMINDED_KEY: &str = "reminded_past_due";

struct Reminder {
    handle: CancelHandle,
    due_at: DateTime<Utc>,
    generation: u64,
}

#[derive(Default)]
struct Records {
    notified: HashMap<TaskId, DateTime<Utc>>,
    reminded: HashMap<TaskId, DateTime<Utc>>,
}

impl Records {
    fn matches(&self, id: TaskId, due: DateTime<Utc>) -> bool {
        self.notified.get(&id) == Some(&due)
    }

    fn forget(&mut self, id: TaskId) {
        self.notified.remove(&id);
        self.reminded.remove(&id);
    }
}

#[derive(Default)]
struct NotifyState {
    /// Restored from the store at startup, or on first evaluation.
    records: Option<Records>,
    reminders: HashMap<TaskId, Reminder>,
    /// First notifications handed to the dispatcher and not yet settled.
    in_flight: HashMap<TaskId, DateTime<Utc>>,
    generation: u64,
}

/// A first notification waiting to be sent off the poll path.
struct Delivery {
    task_id: TaskId,
    due_at: DateTime<Utc>,
    channels: Vec<String>,
    payload: NotificationPayload,
}

#[derive(Serialize)]
struct Sent<'a> {
    task_id: TaskId,
    due_at: DateTime<Utc>,
    channels: &'a [String],
    delivered: usize,
}

pub struct NotificationScheduler {
    enabled: bool,
    channels: HashMap<MemberId, String>,
    tz: Tz,
    clock: Arc<dyn Clock>,
    scheduler: Arc<dyn Scheduler>,
    dispatch: Dispatch,
    notifier: Arc<dyn Notifier>,
    store: Arc<dyn PersistentStore>,
    events: EventBus,
    snapshots: watch::Receiver<Arc<Snapshot>>,
    state: Mutex<NotifyState>,
    /// Orders store writes so a stale copy never lands last.
    persist_lock: Mutex<()>,
    this: Weak<NotificationScheduler>,
}

impl NotificationScheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        enabled: bool,
        channels: HashMap<MemberId, String>,
        tz: Tz,
        clock: Arc<dyn Clock>,
        scheduler: Arc<dyn Scheduler>,
        dispatch: Dispatch,
        notifier: Arc<dyn Notifier>,
        store: Arc<dyn PersistentStore>,
        events: EventBus,
        snapshots: watch::Receiver<Arc<Snapshot>>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            enabled,
            channels,
            tz,
            clock,
            scheduler,
            dispatch,
            notifier,
            store,
            events,
            snapshots,
            state: Mutex::new(NotifyState::default()),
            persist_lock: Mutex::new(()),
            this: this.clone(),
        })
    }

    /// Members with a configured channel, in id order.
    pub fn channel_members(&self) -> Vec<MemberId> {
        let mut members: Vec<MemberId> = self.channels.keys().copied().collect();
        members.sort_unstable();
        members
    }

    /// Load persisted records ahead of the first evaluation.
    pub async fn restore(&self) {
        if !self.enabled {
            return;
        }
        let loaded = self.load_records().await;
        let mut state = self.state.lock().await;
        if state.records.is_some() {
            return;
        }
        match loaded {
            Ok(records) => {
                debug!(records = records.notified.len(), "notification records restored");
                state.records = Some(records);
            }
            Err(err) => warn!(error = %err, "could not load notification records"),
        }
    }

    /// Pending reminder instants by task id.
    pub async fn pending_reminders(&self) -> Vec<(TaskId, DateTime<Utc>)> {
        let state = self.state.lock().await;
        let mut pending: Vec<_> = state
            .reminders
            .iter()
            .filter(|(_, reminder)| reminder.handle.is_pending())
            .map(|(id, reminder)| (*id, reminder.handle.fire_at()))
            .collect();
        pending.sort();
        pending
    }

    /// Whether `(id, due)` is recorded as already notified.
    pub async fn is_notified(&self, id: TaskId, due: DateTime<Utc>) -> bool {
        let state = self.state.lock().await;
        state
            .records
            .as_ref()
            .is_some_and(|records| records.matches(id, due))
    }

    pub async fn cancel_reminder(&self, id: TaskId) {
        let mut state = self.state.lock().await;
        if let Some(reminder) = state.reminders.remove(&id) {
            debug!(task_id = id, "reminder cancelled");
            reminder.handle.cancel();
        }
    }

    pub async fn shutdown(&self) {
        let mut state = self.state.lock().await;
        for (_, reminder) in state.reminders.drain() {
            reminder.handle.cancel();
        }
    }

    /// Prune stale records, then hand newly past-due tasks in scope to the
    /// dispatcher. Sends and store writes never run on the caller's path.
    pub async fn evaluate(&self, update: &BucketUpdate) {
        if !self.enabled
            || update.spec.kind != BucketKind::PastDue
            || update.spec.filter == AssigneeFilter::Any
        {
            return;
        }
        let scope = update.spec.filter;
        let now = self.clock.now();

        let mut deliveries = Vec::new();
        let dirty = {
            let mut state = self.state.lock().await;
            if state.records.is_none() {
                match self.load_records().await {
                    Ok(records) => state.records = Some(records),
                    Err(err) => {
                        warn!(error = %err, "could not load notification records, skipping evaluation");
                        return;
                    }
                }
            }

            let past_due: HashSet<TaskId> = update.members.iter().map(|task| task.id).collect();
            let dirty = self.prune(&mut state, &update.snapshot, scope, &past_due);

            for task in &update.members {
                let Some(due) = task.due_at else { continue };
                if state.in_flight.get(&task.id) == Some(&due) {
                    continue;
                }
                let (already, last) = match state.records.as_ref() {
                    Some(records) => (
                        records.matches(task.id, due),
                        records.reminded.get(&task.id).copied(),
                    ),
                    None => (false, None),
                };
                if already {
                    if !state.reminders.contains_key(&task.id) {
                        let when = last
                            .map(|at| at + Duration::seconds(REMINDER_INTERVAL_SECS))
                            .unwrap_or_else(|| now + Duration::seconds(REMINDER_INTERVAL_SECS))
                            .max(now);
                        self.schedule_reminder(&mut state, task.id, due, when);
                        debug!(task_id = task.id, %when, "reminder chain resumed");
                    }
                    continue;
                }

                let channels = self.channels_for(task);
                if channels.is_empty() {
                    debug!(task_id = task.id, "no notification channel for task");
                    continue;
                }
                state.in_flight.insert(task.id, due);
                deliveries.push(Delivery {
                    task_id: task.id,
                    due_at: due,
                    channels,
                    payload: NotificationPayload::past_due(task, &self.tz, false),
                });
            }
            dirty
        };

        if dirty {
            let this = self.this.clone();
            self.dispatch.spawn(async move {
                if let Some(notifications) = this.upgrade() {
                    notifications.persist().await;
                }
            });
        }
        for delivery in deliveries {
            let this = self.this.clone();
            self.dispatch.spawn(async move {
                if let Some(notifications) = this.upgrade() {
                    notifications.settle_delivery(delivery).await;
                }
            });
        }
    }

    fn prune(
        &self,
        state: &mut NotifyState,
        snapshot: &Snapshot,
        scope: AssigneeFilter,
        past_due: &HashSet<TaskId>,
    ) -> bool {
        let Some(records) = state.records.as_mut() else {
            return false;
        };
        let stale: Vec<TaskId> = records
            .notified
            .iter()
            .filter(|(id, due)| match snapshot.get(**id) {
                None => true,
                Some(task) => {
                    !task.is_active
                        || task.due_at != Some(**due)
                        || (scope.matches(task) && !past_due.contains(*id))
                }
            })
            .map(|(id, _)| *id)
            .collect();

        for id in &stale {
            records.forget(*id);
            if let Some(reminder) = state.reminders.remove(id) {
                reminder.handle.cancel();
            }
            debug!(task_id = *id, "notification record cleared");
        }
        !stale.is_empty()
    }

    /// Send a first notification, then record it unless a concurrent
    /// evaluation already did.
    async fn settle_delivery(&self, delivery: Delivery) {
        let Delivery {
            task_id,
            due_at,
            channels,
            payload,
        } = delivery;
        let delivered = self.deliver(&channels, &payload).await;

        {
            let mut state = self.state.lock().await;
            if state.in_flight.get(&task_id) == Some(&due_at) {
                state.in_flight.remove(&task_id);
            }
            if delivered == 0 {
                return;
            }
            let now = self.clock.now();
            let Some(records) = state.records.as_mut() else {
                return;
            };
            if records.matches(task_id, due_at) {
                debug!(task_id, "notification already recorded");
                return;
            }
            records.notified.insert(task_id, due_at);
            records.reminded.insert(task_id, now);
            self.schedule_reminder(
                &mut state,
                task_id,
                due_at,
                now + Duration::seconds(REMINDER_INTERVAL_SECS),
            );
        }

        info!(task_id, delivered, "past-due notification sent");
        self.events.emit(
            EventKind::NotificationSent,
            self.clock.now(),
            Sent {
                task_id,
                due_at,
                channels: &channels,
                delivered,
            },
        );
        self.persist().await;
    }

    /// Assigned tasks go to their member's channel; unassigned ones fan out.
    fn channels_for(&self, task: &Task) -> Vec<String> {
        match task.assigned_to {
            Some(member) => self.channels.get(&member).cloned().into_iter().collect(),
            None => self
                .channels
                .values()
                .cloned()
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect(),
        }
    }

    async fn deliver(&self, channels: &[String], payload: &NotificationPayload) -> usize {
        let mut delivered = 0;
        for channel in channels {
            match self.notifier.send(channel, payload).await {
                Ok(()) => delivered += 1,
                Err(err) => {
                    warn!(task_id = payload.task_id, channel = %channel, error = %err, "notification send failed")
                }
            }
        }
        delivered
    }

    async fn load_records(&self) -> crate::Result<Records> {
        Ok(Records {
            notified: decode(self.store.load(NOTIFIED_KEY).await?),
            reminded: decode(self.store.load(REMINDED_KEY).await?),
        })
    }

    async fn persist(&self) {
        let _order = self.persist_lock.lock().await;
        let (notified, reminded) = {
            let state = self.state.lock().await;
            let Some(records) = state.records.as_ref() else {
                return;
            };
            (encode(&records.notified), encode(&records.reminded))
        };
        for (key, values) in [(NOTIFIED_KEY, notified), (REMINDED_KEY, reminded)] {
            if let Err(err) = self.store.save(key, values).await {
                warn!(key, error = %err, "could not persist notification records");
            }
        }
    }

    fn schedule_reminder(
        &self,
        state: &mut NotifyState,
        id: TaskId,
        due_at: DateTime<Utc>,
        when: DateTime<Utc>,
    ) {
        if let Some(previous) = state.reminders.remove(&id) {
            previous.handle.cancel();
        }
        state.generation += 1;
        let generation = state.generation;

        let this = self.this.clone();
        let dispatch = self.dispatch.clone();
        let handle = self.scheduler.at(
            when,
            Box::new(move || {
                dispatch.spawn(async move {
                    if let Some(notifications) = this.upgrade() {
                        notifications.fire_reminder(id, generation).await;
                    }
                });
            }),
        );
        state.reminders.insert(
            id,
            Reminder {
                handle,
                due_at,
                generation,
            },
        );
    }

    /// Resend while the task is still past due, addressed to whoever it is
    /// assigned to now. The entry stays in place during the send so an
    /// evaluation does not start a second chain.
    async fn fire_reminder(&self, id: TaskId, generation: u64) {
        let (task, due_at) = {
            let mut state = self.state.lock().await;
            let due_at = match state.reminders.get(&id) {
                Some(reminder) if reminder.generation == generation => reminder.due_at,
                _ => return,
            };
            let snapshot = self.snapshots.borrow().clone();
            let now = self.clock.now();
            let still_due = snapshot
                .get(id)
                .filter(|task| task.is_active && task.due_at == Some(due_at) && due_at < now)
                .cloned();
            match still_due {
                Some(task) => (task, due_at),
                None => {
                    state.reminders.remove(&id);
                    debug!(task_id = id, "reminder chain ended");
                    return;
                }
            }
        };

        let channels = self.channels_for(&task);
        if channels.is_empty() {
            let mut state = self.state.lock().await;
            if state
                .reminders
                .get(&id)
                .is_some_and(|reminder| reminder.generation == generation)
            {
                state.reminders.remove(&id);
            }
            debug!(task_id = id, "no channel for current assignee, reminder chain ended");
            return;
        }

        let payload = NotificationPayload::past_due(&task, &self.tz, true);
        let delivered = self.deliver(&channels, &payload).await;
        let now = self.clock.now();
        info!(task_id = id, delivered, "past-due reminder sent");
        self.events.emit(
            EventKind::ReminderSent,
            now,
            Sent {
                task_id: id,
                due_at,
                channels: &channels,
                delivered,
            },
        );

        {
            let mut state = self.state.lock().await;
            let current = state
                .reminders
                .get(&id)
                .is_some_and(|reminder| reminder.generation == generation);
            if !current {
                return;
            }
            if delivered > 0 {
                if let Some(records) = state.records.as_mut() {
                    records.reminded.insert(id, now);
                }
            }
            self.schedule_reminder(
                &mut state,
                id,
                due_at,
                now + Duration::seconds(REMINDER_INTERVAL_SECS),
            );
        }
        if delivered > 0 {
            self.persist().await;
        }
    }
}

fn decode(raw: HashMap<String, String>) -> HashMap<TaskId, DateTime<Utc>> {
    raw.into_iter()
        .filter_map(|(id, at)| {
            let id = id.parse::<TaskId>().ok()?;
            let at = DateTime::parse_from_rfc3339(&at).ok()?.with_timezone(&Utc);
            Some((id, at))
        })
        .collect()
}

fn encode(values: &HashMap<TaskId, DateTime<Utc>>) -> HashMap<String, String> {
    values
        .iter()
        .map(|(id, at)| (id.to_string(), at.to_rfc3339()))
        .collect()
}

#[async_trait]
impl BucketListener for NotificationScheduler {
    async fn on_bucket_update(&self, update: &BucketUpdate) {
        self.evaluate(update).await;
    }
}
