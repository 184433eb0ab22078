//! tickwatch - time-bucketed task watcher library
//!
//! This library provides the core of the tickwatch CLI: a cached view of a
//! remote chore service, kept current by polling and by timers scheduled at
//! the exact instants a task crosses a time-bucket boundary.
//!
//! # Core Concepts
//!
//! - **Snapshots**: Versioned, immutable copies of the task list
//! - **Buckets**: Past due, due today, upcoming, time-of-day and no-due-date views
//! - **Recurrence**: Next-occurrence arithmetic on local wall-clock time
//! - **Auto-completion**: Overdue recurring tasks are completed at the next occurrence
//! - **Notifications**: One past-due notice per `(task, due)` plus daily reminders
//!
//! # Module Organization
//!
//! - `cli`: Command-line interface using clap
//! - `config`: Configuration loading from `tickwatch.toml`
//! - `error`: Error types and result aliases
//! - `model`: Task, frequency and member types with lenient wire parsing
//! - `calendar`: Timezone-aware day boundaries and cutoffs
//! - `recurrence`: Next-occurrence calculation
//! - `clock` / `scheduler`: Injectable time and one-shot wake-ups
//! - `service` / `client`: Task service contract and its HTTP implementation
//! - `snapshot`: Snapshot coordinator and poll requests
//! - `classifier`: Time-bucket classification and transition timers
//! - `completion` / `autocomplete`: Coalesced completion and auto-completion
//! - `notifier` / `notifications`: Delivery channels and past-due scheduling
//! - `actions`: Notification action routing
//! - `store` / `lock`: Persistent state behind file locks
//! - `events`: Event bus and JSONL sinks
//! - `runtime`: Wiring of the long-running watcher

pub mod actions;
pub mod autocomplete;
pub mod calendar;
pub mod classifier;
pub mod cli;
pub mod client;
pub mod clock;
pub mod completion;
pub mod config;
pub mod error;
pub mod events;
pub mod lock;
pub mod model;
pub mod notifications;
pub mod notifier;
pub mod output;
pub mod recurrence;
pub mod runtime;
pub mod scheduler;
pub mod service;
pub mod snapshot;
pub mod store;

pub use error::{Error, Result};
