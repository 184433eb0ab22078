//! Time-bucketed views over the current snapshot.
//!
//! A [`BucketSpec`] is pure data: given a snapshot and "now" it yields the
//! member set and the next instant that set would change by time alone.
//! [`TimeBucketClassifier`] wraps a [`BucketSpec`] with a self-rescheduling wake-up and
//! pushes every evaluation to its [`BucketListener`]s.

use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, RwLock, Weak};

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Mutex};
use tracing::debug;

use crate::calendar::{end_of_day, is_all_day, local_date, local_midnight, DayCutoffs, LocalDay};
use crate::clock::Clock;
use crate::error::{Error, Result};
use crate::events::{EventBus, EventKind};
use crate::model::{MemberId, Task, TaskId};
use crate::recurrence::{advance_days, is_frequent_recurrence};
use crate::scheduler::{CancelHandle, Dispatch, Scheduler};
use crate::snapshot::{Snapshot, SnapshotListener};

/// Offset past a boundary at which wake-ups are scheduled, so the
/// re-evaluation observes the new membership.
const TRANSITION_SLACK_SECS: i64 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BucketKind {
    PastDue,
    DueToday,
    Upcoming,
    Morning,
    Afternoon,
    Evening,
    AllDay,
    NoDueDate,
}

impl BucketKind {
    pub const ALL: [BucketKind; 8] = [
        BucketKind::PastDue,
        BucketKind::DueToday,
        BucketKind::Upcoming,
        BucketKind::Morning,
        BucketKind::Afternoon,
        BucketKind::Evening,
        BucketKind::AllDay,
        BucketKind::NoDueDate,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            BucketKind::PastDue => "past_due",
            BucketKind::DueToday => "due_today",
            BucketKind::Upcoming => "upcoming",
            BucketKind::Morning => "morning",
            BucketKind::Afternoon => "afternoon",
            BucketKind::Evening => "evening",
            BucketKind::AllDay => "all_day",
            BucketKind::NoDueDate => "no_due_date",
        }
    }
}

impl fmt::Display for BucketKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BucketKind {
    type Err = Error;

    fn from_str(raw: &str) -> Result<Self> {
        let normalized = raw.trim().to_ascii_lowercase().replace('-', "_");
        BucketKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == normalized)
            .ok_or_else(|| Error::InvalidArgument(format!("unknown bucket '{raw}'")))
    }
}

/// Which assignees a bucket covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AssigneeFilter {
    Any,
    Unassigned,
    Member(MemberId),
}

impl AssigneeFilter {
    pub fn matches(&self, task: &Task) -> bool {
        match self {
            AssigneeFilter::Any => true,
            AssigneeFilter::Unassigned => task.assigned_to.is_none(),
            AssigneeFilter::Member(id) => task.assigned_to == Some(*id),
        }
    }

    pub fn member_id(&self) -> Option<MemberId> {
        match self {
            AssigneeFilter::Member(id) => Some(*id),
            _ => None,
        }
    }
}

impl fmt::Display for AssigneeFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssigneeFilter::Any => f.write_str("all"),
            AssigneeFilter::Unassigned => f.write_str("unassigned"),
            AssigneeFilter::Member(id) => write!(f, "member_{id}"),
        }
    }
}

/// Parameters of one bucket view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BucketSpec {
    pub kind: BucketKind,
    pub filter: AssigneeFilter,
    pub tz: Tz,
    pub cutoffs: DayCutoffs,
    pub upcoming_days: u32,
}

impl BucketSpec {
    pub fn new(kind: BucketKind, filter: AssigneeFilter, tz: Tz) -> Self {
        Self {
            kind,
            filter,
            tz,
            cutoffs: DayCutoffs::default(),
            upcoming_days: 7,
        }
    }

    pub fn with_cutoffs(mut self, cutoffs: DayCutoffs) -> Self {
        self.cutoffs = cutoffs;
        self
    }

    pub fn with_upcoming_days(mut self, days: u32) -> Self {
        self.upcoming_days = days;
        self
    }

    pub fn label(&self) -> String {
        format!("{}:{}", self.kind, self.filter)
    }

    /// Membership of a single task at `now`.
    pub fn contains(&self, task: &Task, now: DateTime<Utc>) -> bool {
        if !task.is_active || !self.filter.matches(task) {
            return false;
        }
        let Some(due) = task.due_at else {
            return self.kind == BucketKind::NoDueDate;
        };
        let today = LocalDay::containing(&self.tz, now);

        match self.kind {
            BucketKind::NoDueDate => false,
            BucketKind::PastDue => due < now,
            BucketKind::DueToday => today.contains(due) && due >= now,
            BucketKind::Upcoming => self.in_upcoming(task, due, now, &today),
            BucketKind::Morning | BucketKind::Afternoon | BucketKind::Evening => {
                if !today.contains(due) || due < now {
                    return false;
                }
                let time = due.with_timezone(&self.tz).time();
                !is_all_day(time) && self.slot(time) == self.kind
            }
            BucketKind::AllDay => {
                today.contains(due) && is_all_day(due.with_timezone(&self.tz).time())
            }
        }
    }

    fn in_upcoming(&self, task: &Task, due: DateTime<Utc>, now: DateTime<Utc>, today: &LocalDay) -> bool {
        let window_end = today
            .date
            .checked_add_days(chrono::Days::new(u64::from(self.upcoming_days)))
            .map(|date| end_of_day(&self.tz, date));
        let Some(window_end) = window_end else {
            return false;
        };
        if due <= today.end || due > window_end {
            return false;
        }
        if !task.is_recurring() {
            return true;
        }
        if is_frequent_recurrence(task) {
            return false;
        }
        match advance_days(task) {
            Some(days) => due <= now + Duration::days(i64::from(days)),
            None => true,
        }
    }

    fn slot(&self, time: NaiveTime) -> BucketKind {
        if time < self.cutoffs.morning {
            BucketKind::Morning
        } else if time < self.cutoffs.afternoon {
            BucketKind::Afternoon
        } else {
            BucketKind::Evening
        }
    }

    /// Members at `now`, ordered by due date then id.
    pub fn members(&self, snapshot: &Snapshot, now: DateTime<Utc>) -> Vec<Task> {
        let mut members: Vec<Task> = snapshot
            .tasks()
            .filter(|task| self.contains(task, now))
            .cloned()
            .collect();
        members.sort_by_key(|task| (task.due_at, task.id));
        members
    }

    /// Earliest instant after `now` at which membership changes with no
    /// change to the snapshot.
    pub fn next_transition(&self, snapshot: &Snapshot, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        snapshot
            .tasks()
            .filter(|task| task.is_active && self.filter.matches(task))
            .flat_map(|task| {
                let inside = self.contains(task, now);
                self.candidates(task)
                    .into_iter()
                    .filter(move |at| *at > now && self.contains(task, *at) != inside)
            })
            .min()
    }

    fn candidates(&self, task: &Task) -> Vec<DateTime<Utc>> {
        let Some(due) = task.due_at else {
            return Vec::new();
        };
        let slack = Duration::seconds(TRANSITION_SLACK_SECS);
        let due_date = local_date(&self.tz, due);
        let midnight = |date: Option<NaiveDate>| {
            date.map(|date| local_midnight(&self.tz, date).with_timezone(&Utc) + slack)
        };

        let mut candidates = vec![due + slack];
        candidates.extend(midnight(Some(due_date)));
        candidates.extend(midnight(due_date.succ_opt()));
        candidates.extend(midnight(
            due_date.checked_sub_days(chrono::Days::new(u64::from(self.upcoming_days))),
        ));
        if let Some(days) = advance_days(task) {
            candidates.push(due - Duration::days(i64::from(days)) + slack);
        }
        candidates
    }
}

/// Why a classifier re-evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshReason {
    Snapshot,
    Timer,
}

/// Result of one classifier evaluation.
#[derive(Debug, Clone)]
pub struct BucketUpdate {
    pub spec: BucketSpec,
    pub reason: RefreshReason,
    pub snapshot: Arc<Snapshot>,
    pub members: Vec<Task>,
    pub membership_changed: bool,
    pub evaluated_at: DateTime<Utc>,
    pub next_wake: Option<DateTime<Utc>>,
}

impl BucketUpdate {
    pub fn member_ids(&self) -> Vec<TaskId> {
        self.members.iter().map(|task| task.id).collect()
    }
}

#[async_trait]
pub trait BucketListener: Send + Sync {
    async fn on_bucket_update(&self, update: &BucketUpdate);
}

#[derive(Serialize)]
struct BucketChanged<'a> {
    bucket: String,
    kind: BucketKind,
    filter: String,
    reason: RefreshReason,
    version: u64,
    members: &'a [TaskId],
    #[serde(skip_serializing_if = "Option::is_none")]
    next_wake: Option<DateTime<Utc>>,
}

#[derive(Default)]
struct ClassifierState {
    wake: Option<CancelHandle>,
    members: Option<Vec<TaskId>>,
    stopped: bool,
}

/// A bucket view that keeps itself current as time passes.
pub struct TimeBucketClassifier {
    spec: BucketSpec,
    snapshots: watch::Receiver<Arc<Snapshot>>,
    clock: Arc<dyn Clock>,
    scheduler: Arc<dyn Scheduler>,
    dispatch: Dispatch,
    events: EventBus,
    listeners: RwLock<Vec<Arc<dyn BucketListener>>>,
    state: Mutex<ClassifierState>,
    this: Weak<TimeBucketClassifier>,
}

impl TimeBucketClassifier {
    pub fn new(
        spec: BucketSpec,
        snapshots: watch::Receiver<Arc<Snapshot>>,
        clock: Arc<dyn Clock>,
        scheduler: Arc<dyn Scheduler>,
        dispatch: Dispatch,
        events: EventBus,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            spec,
            snapshots,
            clock,
            scheduler,
            dispatch,
            events,
            listeners: RwLock::new(Vec::new()),
            state: Mutex::new(ClassifierState::default()),
            this: this.clone(),
        })
    }

    pub fn spec(&self) -> &BucketSpec {
        &self.spec
    }

    pub fn add_listener(&self, listener: Arc<dyn BucketListener>) {
        self.listeners
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(listener);
    }

    /// Members computed fresh from the latest snapshot.
    pub fn members(&self) -> Vec<Task> {
        let snapshot = self.snapshots.borrow().clone();
        self.spec.members(&snapshot, self.clock.now())
    }

    /// Fire instant of the pending wake-up, if any.
    pub async fn pending_wake(&self) -> Option<DateTime<Utc>> {
        let state = self.state.lock().await;
        state
            .wake
            .as_ref()
            .filter(|wake| wake.is_pending())
            .map(CancelHandle::fire_at)
    }

    /// Re-evaluate against the latest published snapshot.
    pub async fn refresh(&self, reason: RefreshReason) -> Option<BucketUpdate> {
        let snapshot = self.snapshots.borrow().clone();
        self.evaluate(snapshot, reason).await
    }

    /// Cancel the pending wake-up and stop rescheduling.
    pub async fn shutdown(&self) {
        let mut state = self.state.lock().await;
        state.stopped = true;
        if let Some(wake) = state.wake.take() {
            wake.cancel();
        }
    }

    async fn evaluate(&self, snapshot: Arc<Snapshot>, reason: RefreshReason) -> Option<BucketUpdate> {
        // Held across listener calls so evaluations reach listeners in order.
        let mut state = self.state.lock().await;
        if state.stopped {
            return None;
        }

        let now = self.clock.now();
        let members = self.spec.members(&snapshot, now);
        let ids: Vec<TaskId> = members.iter().map(|task| task.id).collect();
        let next_wake = self.spec.next_transition(&snapshot, now);
        self.schedule_next_wake(&mut state, next_wake);

        let membership_changed = state.members.as_ref() != Some(&ids);
        state.members = Some(ids);

        let update = BucketUpdate {
            spec: self.spec,
            reason,
            snapshot,
            members,
            membership_changed,
            evaluated_at: now,
            next_wake,
        };

        if membership_changed {
            let ids = update.member_ids();
            debug!(bucket = %self.spec.label(), ?reason, members = ids.len(), "bucket membership changed");
            self.events.emit(
                EventKind::BucketChanged,
                now,
                BucketChanged {
                    bucket: self.spec.label(),
                    kind: self.spec.kind,
                    filter: self.spec.filter.to_string(),
                    reason,
                    version: update.snapshot.version(),
                    members: &ids,
                    next_wake,
                },
            );
        }

        let listeners = self
            .listeners
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        for listener in listeners {
            listener.on_bucket_update(&update).await;
        }
        drop(state);

        Some(update)
    }

    /// Keep exactly one wake-up pending, for `next` if there is one.
    fn schedule_next_wake(&self, state: &mut ClassifierState, next: Option<DateTime<Utc>>) {
        if let Some(wake) = &state.wake {
            if wake.is_pending() && Some(wake.fire_at()) == next {
                return;
            }
        }
        if let Some(stale) = state.wake.take() {
            stale.cancel();
        }
        let Some(when) = next else {
            return;
        };

        let this = self.this.clone();
        let dispatch = self.dispatch.clone();
        debug!(bucket = %self.spec.label(), fire_at = %when, "scheduling bucket wake-up");
        state.wake = Some(self.scheduler.at(
            when,
            Box::new(move || {
                dispatch.spawn(async move {
                    if let Some(classifier) = this.upgrade() {
                        classifier.refresh(RefreshReason::Timer).await;
                    }
                });
            }),
        ));
    }
}

#[async_trait]
impl SnapshotListener for TimeBucketClassifier {
    async fn on_snapshot(&self, snapshot: Arc<Snapshot>, _changed: bool) {
        self.evaluate(snapshot, RefreshReason::Snapshot).await;
    }
}
