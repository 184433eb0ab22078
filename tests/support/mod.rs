#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use chrono_tz::Tz;
use tickwatch::clock::ManualClock;
use tickwatch::error::{Error, Result};
use tickwatch::events::{Event, EventBus, EventKind};
use tickwatch::model::{Frequency, FrequencyKind, Member, MemberId, Task, TaskId};
use tickwatch::notifier::{NotificationPayload, Notifier};
use tickwatch::scheduler::{Dispatch, ManualScheduler};
use tickwatch::service::{TaskService, TaskUpdate};
use tokio::sync::broadcast;

pub fn ny() -> Tz {
    chrono_tz::America::New_York
}

pub fn utc(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
}

/// Local wall-clock time in New York as a UTC instant.
pub fn ny_at(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
    ny().with_ymd_and_hms(y, m, d, h, min, 0)
        .unwrap()
        .with_timezone(&Utc)
}

pub fn task(id: TaskId, name: &str, due: Option<DateTime<Utc>>) -> Task {
    let mut task = Task::new(id, name);
    task.due_at = due;
    task
}

pub fn assigned(mut task: Task, member: MemberId) -> Task {
    task.assigned_to = Some(member);
    task
}

pub fn recurring(mut task: Task, kind: FrequencyKind, interval: u32) -> Task {
    task.frequency = Frequency::new(kind, interval);
    task
}

pub fn member(user_id: MemberId) -> Member {
    Member {
        id: user_id + 100,
        user_id,
        display_name: Some(format!("user {user_id}")),
        username: None,
        is_active: true,
    }
}

/// Manual clock, manual scheduler and a dispatch to drain.
pub struct TimeHarness {
    pub clock: Arc<ManualClock>,
    pub scheduler: Arc<ManualScheduler>,
    pub dispatch: Dispatch,
    pub events: EventBus,
}

impl TimeHarness {
    pub fn new(start: DateTime<Utc>) -> Self {
        let clock = Arc::new(ManualClock::new(start));
        let scheduler = Arc::new(ManualScheduler::new(clock.clone()));
        Self {
            clock,
            scheduler,
            dispatch: Dispatch::new(),
            events: EventBus::default(),
        }
    }

    /// Fire everything due up to `target` and wait for the spawned work.
    pub async fn advance_to(&self, target: DateTime<Utc>) -> usize {
        let fired = self.scheduler.advance_to(target);
        self.dispatch.drain().await;
        fired
    }

    /// Wait for sends and store writes handed off by the last poll.
    pub async fn settle(&self) {
        self.dispatch.drain().await;
    }
}

/// Collect every event of `kind` already buffered on `receiver`.
pub fn drain_events(receiver: &mut broadcast::Receiver<Event>, kind: EventKind) -> Vec<Event> {
    let mut events = Vec::new();
    while let Ok(event) = receiver.try_recv() {
        if event.event == kind {
            events.push(event);
        }
    }
    events
}

/// In-memory task service recording every mutation.
#[derive(Default)]
pub struct FakeTaskService {
    tasks: Mutex<Vec<Task>>,
    members: Mutex<Vec<Member>>,
    completions: Mutex<Vec<(TaskId, Option<MemberId>)>>,
    updates: Mutex<Vec<(TaskId, TaskUpdate)>>,
    fetches: AtomicUsize,
    fail_fetch: AtomicBool,
    fail_members: AtomicBool,
    fail_complete: AtomicBool,
}

impl FakeTaskService {
    pub fn new(tasks: Vec<Task>) -> Arc<Self> {
        let service = Self::default();
        *service.tasks.lock().unwrap() = tasks;
        Arc::new(service)
    }

    pub fn set_tasks(&self, tasks: Vec<Task>) {
        *self.tasks.lock().unwrap() = tasks;
    }

    pub fn set_members(&self, members: Vec<Member>) {
        *self.members.lock().unwrap() = members;
    }

    pub fn completions(&self) -> Vec<(TaskId, Option<MemberId>)> {
        self.completions.lock().unwrap().clone()
    }

    pub fn updates(&self) -> Vec<(TaskId, TaskUpdate)> {
        self.updates.lock().unwrap().clone()
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn fail_fetch(&self, fail: bool) {
        self.fail_fetch.store(fail, Ordering::SeqCst);
    }

    pub fn fail_members(&self, fail: bool) {
        self.fail_members.store(fail, Ordering::SeqCst);
    }

    pub fn fail_complete(&self, fail: bool) {
        self.fail_complete.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl TaskService for FakeTaskService {
    async fn get_tasks(&self) -> Result<Vec<Task>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if self.fail_fetch.load(Ordering::SeqCst) {
            return Err(Error::Remote("service unavailable".to_string()));
        }
        Ok(self.tasks.lock().unwrap().clone())
    }

    async fn get_members(&self) -> Result<Vec<Member>> {
        if self.fail_members.load(Ordering::SeqCst) {
            return Err(Error::Remote("members unavailable".to_string()));
        }
        Ok(self.members.lock().unwrap().clone())
    }

    async fn complete_task(&self, id: TaskId, completed_by: Option<MemberId>) -> Result<Task> {
        self.completions.lock().unwrap().push((id, completed_by));
        if self.fail_complete.load(Ordering::SeqCst) {
            return Err(Error::Remote("complete rejected".to_string()));
        }
        let tasks = self.tasks.lock().unwrap();
        tasks
            .iter()
            .find(|task| task.id == id)
            .cloned()
            .ok_or(Error::TaskNotFound(id))
    }

    async fn update_task(&self, id: TaskId, update: TaskUpdate) -> Result<Task> {
        self.updates.lock().unwrap().push((id, update.clone()));
        let mut tasks = self.tasks.lock().unwrap();
        let task = tasks
            .iter_mut()
            .find(|task| task.id == id)
            .ok_or(Error::TaskNotFound(id))?;
        if let Some(next) = update.next_due_date.or(update.due_date) {
            task.due_at = Some(next);
        }
        Ok(task.clone())
    }
}

/// Notifier that records what it was asked to send.
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<(String, NotificationPayload)>>,
    failing: Mutex<HashMap<String, bool>>,
    delay: Mutex<Option<Duration>>,
}

impl RecordingNotifier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn sent(&self) -> Vec<(String, NotificationPayload)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn titles(&self) -> Vec<String> {
        self.sent()
            .into_iter()
            .map(|(_, payload)| payload.title)
            .collect()
    }

    pub fn channels(&self) -> Vec<String> {
        self.sent().into_iter().map(|(channel, _)| channel).collect()
    }

    pub fn fail_channel(&self, channel: &str, fail: bool) {
        self.failing
            .lock()
            .unwrap()
            .insert(channel.to_string(), fail);
    }

    /// Make every send take at least `delay`.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, channel: &str, payload: &NotificationPayload) -> Result<()> {
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let failing = self
            .failing
            .lock()
            .unwrap()
            .get(channel)
            .copied()
            .unwrap_or(false);
        if failing {
            return Err(Error::Notify(format!("{channel} unreachable")));
        }
        self.sent
            .lock()
            .unwrap()
            .push((channel.to_string(), payload.clone()));
        Ok(())
    }
}
