//! One-shot timers and async dispatch.
//!
//! Components register wake-ups with [`Scheduler::at`] and get back a
//! [`CancelHandle`]. Callbacks run on the scheduler's dispatch path and must
//! return quickly; remote work goes through [`Dispatch::spawn`].

use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use tokio::task::AbortHandle;
use tokio_util::task::TaskTracker;

use crate::clock::{Clock, ManualClock};
use crate::error::{Error, Result};

pub type WakeCallback = Box<dyn FnOnce() + Send + 'static>;

pub trait Scheduler: Send + Sync {
    /// Run `callback` once at `when`. Instants in the past fire promptly.
    fn at(&self, when: DateTime<Utc>, callback: WakeCallback) -> CancelHandle;
}

const PENDING: u8 = 0;
const FIRED: u8 = 1;
const CANCELLED: u8 = 2;

struct HandleState {
    state: AtomicU8,
    fire_at: DateTime<Utc>,
    abort: Mutex<Option<AbortHandle>>,
}

/// Cancellation handle for a registered wake-up.
///
/// `cancel` is idempotent and a no-op once the callback has started.
#[derive(Clone)]
pub struct CancelHandle {
    inner: Arc<HandleState>,
}

impl CancelHandle {
    fn new(fire_at: DateTime<Utc>) -> Self {
        Self {
            inner: Arc::new(HandleState {
                state: AtomicU8::new(PENDING),
                fire_at,
                abort: Mutex::new(None),
            }),
        }
    }

    pub fn fire_at(&self) -> DateTime<Utc> {
        self.inner.fire_at
    }

    pub fn cancel(&self) {
        if self
            .inner
            .state
            .compare_exchange(PENDING, CANCELLED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            let abort = self
                .inner
                .abort
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .take();
            if let Some(abort) = abort {
                abort.abort();
            }
        }
    }

    pub fn is_pending(&self) -> bool {
        self.inner.state.load(Ordering::Acquire) == PENDING
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.state.load(Ordering::Acquire) == CANCELLED
    }

    fn begin_fire(&self) -> bool {
        self.inner
            .state
            .compare_exchange(PENDING, FIRED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn set_abort(&self, abort: AbortHandle) {
        let mut slot = self.inner.abort.lock().unwrap_or_else(|e| e.into_inner());
        if self.is_pending() {
            *slot = Some(abort);
        } else if self.is_cancelled() {
            abort.abort();
        }
    }
}

impl std::fmt::Debug for CancelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelHandle")
            .field("fire_at", &self.inner.fire_at)
            .field("state", &self.inner.state.load(Ordering::Relaxed))
            .finish()
    }
}

/// Timers backed by `tokio::time::sleep`.
pub struct TokioScheduler {
    clock: Arc<dyn Clock>,
    runtime: tokio::runtime::Handle,
}

impl TokioScheduler {
    /// Must be called from inside a tokio runtime.
    pub fn new(clock: Arc<dyn Clock>) -> Result<Self> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|err| Error::OperationFailed(format!("no tokio runtime: {err}")))?;
        Ok(Self { clock, runtime })
    }
}

impl Scheduler for TokioScheduler {
    fn at(&self, when: DateTime<Utc>, callback: WakeCallback) -> CancelHandle {
        let handle = CancelHandle::new(when);
        let delay = (when - self.clock.now()).to_std().unwrap_or_default();
        let task_handle = handle.clone();
        let join = self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            if task_handle.begin_fire() {
                callback();
            }
        });
        handle.set_abort(join.abort_handle());
        handle
    }
}

struct ManualEntry {
    seq: u64,
    when: DateTime<Utc>,
    handle: CancelHandle,
    callback: WakeCallback,
}

/// Deterministic scheduler for tests: nothing fires until `advance_to`.
pub struct ManualScheduler {
    clock: Arc<ManualClock>,
    entries: Mutex<Vec<ManualEntry>>,
    seq: AtomicU64,
}

impl ManualScheduler {
    pub fn new(clock: Arc<ManualClock>) -> Self {
        Self {
            clock,
            entries: Mutex::new(Vec::new()),
            seq: AtomicU64::new(0),
        }
    }

    /// Fire instants of every still-pending wake-up, earliest first.
    pub fn pending(&self) -> Vec<DateTime<Utc>> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let mut pending: Vec<_> = entries
            .iter()
            .filter(|entry| entry.handle.is_pending())
            .map(|entry| entry.when)
            .collect();
        pending.sort();
        pending
    }

    /// Move the clock to `target`, firing due callbacks in time order.
    ///
    /// The clock is set to each callback's instant before it runs. Callbacks
    /// registered while advancing fire too if they fall at or before
    /// `target`. Returns the number of callbacks run.
    pub fn advance_to(&self, target: DateTime<Utc>) -> usize {
        let mut fired = 0;
        loop {
            let next = {
                let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
                entries.retain(|entry| entry.handle.is_pending());
                let index = entries
                    .iter()
                    .enumerate()
                    .filter(|(_, entry)| entry.when <= target)
                    .min_by_key(|(_, entry)| (entry.when, entry.seq))
                    .map(|(index, _)| index);
                index.map(|index| entries.swap_remove(index))
            };
            let Some(entry) = next else { break };
            if self.clock.now() < entry.when {
                self.clock.set(entry.when);
            }
            if entry.handle.begin_fire() {
                (entry.callback)();
                fired += 1;
            }
        }
        if self.clock.now() < target {
            self.clock.set(target);
        }
        fired
    }
}

impl Scheduler for ManualScheduler {
    fn at(&self, when: DateTime<Utc>, callback: WakeCallback) -> CancelHandle {
        let handle = CancelHandle::new(when);
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(ManualEntry {
                seq,
                when,
                handle: handle.clone(),
                callback,
            });
        handle
    }
}

/// Tracks async work spawned from timer callbacks.
#[derive(Clone, Default)]
pub struct Dispatch {
    tracker: TaskTracker,
}

impl Dispatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn spawn<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tracker.spawn(future);
    }

    /// Wait until every task spawned so far (and anything they spawn) is done.
    pub async fn drain(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }
}
