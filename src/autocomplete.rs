//! Automatic completion of overdue recurring tasks.
//!
//! Completing an overdue occurrence makes the service generate the next
//! one. We wait until local midnight of that next occurrence so the task
//! does not vanish from today's views early.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, Weak};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::calendar::local_midnight;
use crate::clock::Clock;
use crate::completion::{CompletionCoordinator, CompletionOutcome};
use crate::events::{EventBus, EventKind};
use crate::model::{MemberId, TaskId};
use crate::recurrence::next_occurrence;
use crate::scheduler::{CancelHandle, Dispatch, Scheduler};
use crate::snapshot::{PollHandle, Snapshot, SnapshotListener};

/// Delay used when the next occurrence's midnight has already passed.
pub const CATCH_UP_EPSILON_SECS: i64 = 5;

/// Pending targets closer than this are left alone.
pub const EQUIVALENT_TOLERANCE_SECS: i64 = 60;

enum EntryState {
    Scheduled(CancelHandle),
    InFlight,
    /// Last attempt failed; re-armed by the next evaluation.
    Failed,
}

struct Entry {
    fire_at: DateTime<Utc>,
    due_at: DateTime<Utc>,
    assignee: Option<MemberId>,
    generation: u64,
    state: EntryState,
}

impl Entry {
    fn cancel(&self) {
        if let EntryState::Scheduled(handle) = &self.state {
            handle.cancel();
        }
    }
}

#[derive(Default)]
struct AutoState {
    entries: HashMap<TaskId, Entry>,
    /// Occurrences already completed, until the snapshot shows the next one.
    completed: HashMap<TaskId, DateTime<Utc>>,
    generation: u64,
}

#[derive(Serialize)]
struct AutoCompleted {
    task_id: TaskId,
    due_at: DateTime<Utc>,
    coalesced: bool,
}

#[derive(Serialize)]
struct AutoFailed {
    task_id: TaskId,
    due_at: DateTime<Utc>,
    error: String,
}

pub struct AutoCompletionScheduler {
    enabled: bool,
    tz: Tz,
    clock: Arc<dyn Clock>,
    scheduler: Arc<dyn Scheduler>,
    dispatch: Dispatch,
    completion: Arc<CompletionCoordinator>,
    poll: PollHandle,
    events: EventBus,
    state: Mutex<AutoState>,
    this: Weak<AutoCompletionScheduler>,
}

impl AutoCompletionScheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        enabled: bool,
        tz: Tz,
        clock: Arc<dyn Clock>,
        scheduler: Arc<dyn Scheduler>,
        dispatch: Dispatch,
        completion: Arc<CompletionCoordinator>,
        poll: PollHandle,
        events: EventBus,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            enabled,
            tz,
            clock,
            scheduler,
            dispatch,
            completion,
            poll,
            events,
            state: Mutex::new(AutoState::default()),
            this: this.clone(),
        })
    }

    /// Targets of every armed schedule, ordered by task id.
    pub fn pending(&self) -> Vec<(TaskId, DateTime<Utc>)> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let mut pending: Vec<_> = state
            .entries
            .iter()
            .filter(|(_, entry)| matches!(&entry.state, EntryState::Scheduled(h) if h.is_pending()))
            .map(|(id, entry)| (*id, entry.fire_at))
            .collect();
        pending.sort();
        pending
    }

    /// Reconcile schedules with `snapshot`.
    pub fn evaluate(&self, snapshot: &Snapshot) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if !self.enabled {
            for (_, entry) in state.entries.drain() {
                entry.cancel();
            }
            return;
        }

        let now = self.clock.now();
        let epsilon = Duration::seconds(CATCH_UP_EPSILON_SECS);
        let tolerance = Duration::seconds(EQUIVALENT_TOLERANCE_SECS);

        state
            .completed
            .retain(|id, due| snapshot.get(*id).and_then(|task| task.due_at) == Some(*due));

        let mut candidates = HashSet::new();
        for task in snapshot.tasks() {
            if !task.is_active || !task.is_recurring() {
                continue;
            }
            let Some(due) = task.due_at.filter(|due| *due < now) else {
                continue;
            };
            if state.completed.get(&task.id) == Some(&due) {
                continue;
            }
            let Some(next) = next_occurrence(task, Some(due), &self.tz) else {
                debug!(task_id = task.id, kind = %task.frequency.kind, "no next occurrence, skipping");
                continue;
            };
            candidates.insert(task.id);

            let mut target = local_midnight(&self.tz, next.date_naive()).with_timezone(&Utc);
            if target <= now {
                target = now + epsilon;
            }

            if let Some(entry) = state.entries.get(&task.id) {
                if entry.due_at == due {
                    let keep = match &entry.state {
                        EntryState::InFlight => true,
                        EntryState::Scheduled(handle) => {
                            handle.is_pending() && (entry.fire_at - target).abs() <= tolerance
                        }
                        EntryState::Failed => false,
                    };
                    if keep {
                        continue;
                    }
                }
            }

            if let Some(stale) = state.entries.remove(&task.id) {
                stale.cancel();
            }
            state.generation += 1;
            let generation = state.generation;
            let handle = self.arm(task.id, generation, target);
            info!(task_id = task.id, due_at = %due, fire_at = %target, "auto-completion scheduled");
            state.entries.insert(
                task.id,
                Entry {
                    fire_at: target,
                    due_at: due,
                    assignee: task.assigned_to,
                    generation,
                    state: EntryState::Scheduled(handle),
                },
            );
        }

        state.entries.retain(|id, entry| {
            if candidates.contains(id) {
                return true;
            }
            debug!(task_id = *id, "auto-completion no longer applies");
            entry.cancel();
            false
        });
    }

    /// Cancel everything.
    pub fn shutdown(&self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        for (_, entry) in state.entries.drain() {
            entry.cancel();
        }
    }

    fn arm(&self, id: TaskId, generation: u64, when: DateTime<Utc>) -> CancelHandle {
        let this = self.this.clone();
        let dispatch = self.dispatch.clone();
        self.scheduler.at(
            when,
            Box::new(move || {
                dispatch.spawn(async move {
                    if let Some(scheduler) = this.upgrade() {
                        scheduler.fire(id, generation).await;
                    }
                });
            }),
        )
    }

    async fn fire(&self, id: TaskId, generation: u64) {
        let claimed = {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            match state.entries.get_mut(&id) {
                Some(entry) if entry.generation == generation => {
                    entry.state = EntryState::InFlight;
                    Some((entry.due_at, entry.assignee))
                }
                _ => None,
            }
        };
        let Some((due_at, assignee)) = claimed else {
            return;
        };

        let result = self.completion.complete(id, assignee).await;
        let now = self.clock.now();
        match result {
            Ok(outcome) => {
                {
                    let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
                    if state.entries.get(&id).is_some_and(|e| e.generation == generation) {
                        state.entries.remove(&id);
                    }
                    state.completed.insert(id, due_at);
                }
                let coalesced = matches!(outcome, CompletionOutcome::Coalesced);
                info!(task_id = id, coalesced, "overdue recurring task auto-completed");
                self.events.emit(
                    EventKind::TaskAutoCompleted,
                    now,
                    AutoCompleted {
                        task_id: id,
                        due_at,
                        coalesced,
                    },
                );
                self.poll.request();
            }
            Err(err) => {
                {
                    let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
                    if let Some(entry) = state.entries.get_mut(&id) {
                        if entry.generation == generation {
                            entry.state = EntryState::Failed;
                        }
                    }
                }
                warn!(task_id = id, error = %err, "auto-completion failed, will retry on next poll");
                self.events.emit(
                    EventKind::AutoCompletionFailed,
                    now,
                    AutoFailed {
                        task_id: id,
                        due_at,
                        error: err.to_string(),
                    },
                );
            }
        }
    }
}

#[async_trait]
impl SnapshotListener for AutoCompletionScheduler {
    async fn on_snapshot(&self, snapshot: Arc<Snapshot>, _changed: bool) {
        self.evaluate(&snapshot);
    }
}
