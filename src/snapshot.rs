//! Versioned, immutable task snapshots.
//!
//! The coordinator owns the only writer. Readers clone an `Arc<Snapshot>` and
//! never see a partially built map; a new version is published only when a
//! display-relevant field or the id set changed.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{watch, Mutex, Notify};
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::error::Result;
use crate::events::{EventBus, EventKind};
use crate::model::{Task, TaskId};
use crate::service::TaskService;

#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    version: u64,
    tasks: BTreeMap<TaskId, Task>,
    hashes: BTreeMap<TaskId, String>,
    fetched_at: Option<DateTime<Utc>>,
}

impl Snapshot {
    /// The version-0 snapshot served before the first successful poll.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_tasks(version: u64, tasks: Vec<Task>, fetched_at: DateTime<Utc>) -> Self {
        let mut by_id = BTreeMap::new();
        let mut hashes = BTreeMap::new();
        for task in tasks {
            hashes.insert(task.id, task.display_hash());
            by_id.insert(task.id, task);
        }
        Self {
            version,
            tasks: by_id,
            hashes,
            fetched_at: Some(fetched_at),
        }
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn fetched_at(&self) -> Option<DateTime<Utc>> {
        self.fetched_at
    }

    pub fn get(&self, id: TaskId) -> Option<&Task> {
        self.tasks.get(&id)
    }

    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.tasks.values()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Ids added, removed, or with changed display fields in `next`.
    pub fn diff(&self, next: &Snapshot) -> SnapshotDiff {
        let added = next
            .hashes
            .keys()
            .filter(|id| !self.hashes.contains_key(id))
            .copied()
            .collect();
        let removed = self
            .hashes
            .keys()
            .filter(|id| !next.hashes.contains_key(id))
            .copied()
            .collect();
        let changed = next
            .hashes
            .iter()
            .filter(|(id, hash)| self.hashes.get(id).is_some_and(|old| old != *hash))
            .map(|(id, _)| *id)
            .collect();
        SnapshotDiff {
            added,
            removed,
            changed,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SnapshotDiff {
    pub added: Vec<TaskId>,
    pub removed: Vec<TaskId>,
    pub changed: Vec<TaskId>,
}

impl SnapshotDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.changed.is_empty()
    }
}

/// Re-evaluated after every poll, whether or not the version moved.
#[async_trait]
pub trait SnapshotListener: Send + Sync {
    async fn on_snapshot(&self, snapshot: Arc<Snapshot>, changed: bool);
}

#[derive(Serialize)]
struct SnapshotChanged<'a> {
    version: u64,
    tasks: usize,
    #[serde(flatten)]
    diff: &'a SnapshotDiff,
}

pub struct SnapshotCoordinator {
    service: Arc<dyn TaskService>,
    clock: Arc<dyn Clock>,
    events: EventBus,
    sender: watch::Sender<Arc<Snapshot>>,
    listeners: RwLock<Vec<Arc<dyn SnapshotListener>>>,
    poll_lock: Mutex<()>,
}

impl SnapshotCoordinator {
    pub fn new(service: Arc<dyn TaskService>, clock: Arc<dyn Clock>, events: EventBus) -> Self {
        let (sender, _) = watch::channel(Arc::new(Snapshot::empty()));
        Self {
            service,
            clock,
            events,
            sender,
            listeners: RwLock::new(Vec::new()),
            poll_lock: Mutex::new(()),
        }
    }

    pub fn current(&self) -> Arc<Snapshot> {
        self.sender.borrow().clone()
    }

    /// Receiver that wakes only when a new version is published.
    pub fn subscribe(&self) -> watch::Receiver<Arc<Snapshot>> {
        self.sender.subscribe()
    }

    pub fn add_listener(&self, listener: Arc<dyn SnapshotListener>) {
        self.listeners
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(listener);
    }

    /// Fetch tasks, publish a new version if anything display-relevant
    /// changed, then let every listener re-evaluate.
    ///
    /// Fetch failures keep the previous snapshot and skip the listeners.
    pub async fn poll(&self) -> Arc<Snapshot> {
        match self.try_poll().await {
            Ok(snapshot) => snapshot,
            Err(err) => {
                let previous = self.current();
                warn!(error = %err, version = previous.version(), "task poll failed, keeping previous snapshot");
                previous
            }
        }
    }

    /// Like [`poll`](Self::poll) but hands the fetch error to the caller.
    pub async fn try_poll(&self) -> Result<Arc<Snapshot>> {
        let _guard = self.poll_lock.lock().await;
        let previous = self.current();
        let tasks = self.service.get_tasks().await?;

        let now = self.clock.now();
        let candidate = Snapshot::from_tasks(previous.version() + 1, tasks, now);
        let diff = previous.diff(&candidate);

        let (snapshot, changed) = if diff.is_empty() {
            debug!(version = previous.version(), "snapshot unchanged");
            (previous, false)
        } else {
            let next = Arc::new(candidate);
            self.sender.send_replace(next.clone());
            info!(
                version = next.version(),
                added = diff.added.len(),
                removed = diff.removed.len(),
                changed = diff.changed.len(),
                "snapshot updated"
            );
            self.events.emit(
                EventKind::SnapshotChanged,
                now,
                SnapshotChanged {
                    version: next.version(),
                    tasks: next.len(),
                    diff: &diff,
                },
            );
            (next, true)
        };

        let listeners = self
            .listeners
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        for listener in listeners {
            listener.on_snapshot(snapshot.clone(), changed).await;
        }

        Ok(snapshot)
    }
}

/// Lets any component ask for an out-of-cycle poll.
#[derive(Debug, Clone, Default)]
pub struct PollHandle {
    notify: Arc<Notify>,
}

impl PollHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Coalesces with any request not yet picked up.
    pub fn request(&self) {
        self.notify.notify_one();
    }

    pub async fn requested(&self) {
        self.notify.notified().await;
    }
}
