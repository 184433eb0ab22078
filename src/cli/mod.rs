//! Command-line interface for tickwatch
//!
//! This module defines the CLI structure using clap derive macros.
//! Each subcommand is defined in its own submodule.

use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::task::JoinHandle;

use crate::error::{Error, Result};
use crate::events::{EventBus, EventDestination, DEFAULT_BUS_CAPACITY};

mod action;
mod buckets;
mod complete;
mod config;
mod next;
mod run;

/// How long a one-shot command waits for its event sink to flush
const EVENT_FLUSH_TIMEOUT: Duration = Duration::from_secs(2);

/// tickwatch - time-bucketed task watcher
///
/// Polls a household task service, keeps time buckets current, completes
/// overdue recurring tasks and sends past-due notifications.
#[derive(Parser, Debug)]
#[command(name = "tickwatch")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to the config file (defaults to the platform config directory)
    #[arg(long, global = true, env = "TICKWATCH_CONFIG")]
    pub config: Option<PathBuf>,

    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Write events as JSON lines to a file, or '-' for stdout
    #[arg(long, global = true)]
    pub events: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Watch the task service until interrupted
    Run {
        /// Keep notification records in memory only
        #[arg(long)]
        ephemeral: bool,
    },

    /// Fetch tasks once and show bucket membership
    Buckets {
        /// Only tasks assigned to this user id
        #[arg(long, conflicts_with = "unassigned")]
        assignee: Option<i64>,

        /// Only unassigned tasks
        #[arg(long)]
        unassigned: bool,

        /// Buckets to show (repeatable, defaults to all)
        #[arg(long = "bucket")]
        buckets: Vec<String>,
    },

    /// Compute the next occurrence of a recurrence rule
    NextOccurrence {
        /// Frequency kind: daily, weekly, monthly, yearly, interval, days_of_the_week, day_of_the_month, once
        #[arg(long, default_value = "daily")]
        kind: String,

        /// Current due instant (RFC 3339)
        #[arg(long)]
        due: String,

        /// Interval step
        #[arg(long, default_value_t = 1)]
        interval: u32,

        /// Unit for interval rules: days, weeks, months, years
        #[arg(long)]
        unit: Option<String>,

        /// Weekday for days_of_the_week rules (repeatable)
        #[arg(long = "weekday")]
        weekdays: Vec<String>,

        /// Target day for day_of_the_month rules
        #[arg(long)]
        day_of_month: Option<u32>,

        /// Timezone override (defaults to the configured timezone)
        #[arg(long)]
        timezone: Option<String>,
    },

    /// Complete a task now
    Complete {
        /// Task id
        id: i64,

        /// User id to credit (defaults to the assignee)
        #[arg(long)]
        completed_by: Option<i64>,
    },

    /// Apply a notification action id such as TICKWATCH_SNOOZE_1H_42
    Action {
        /// Action identifier
        action_id: String,

        /// User id to credit when the action completes the task
        #[arg(long)]
        completed_by: Option<i64>,
    },

    /// Configuration management
    #[command(subcommand)]
    Config(ConfigCommands),
}

/// Config subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Print the effective configuration
    Show,

    /// Write a default config file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

impl Commands {
    /// Name reported in output envelopes, e.g. `config show`.
    pub fn name(&self) -> &'static str {
        match self {
            Commands::Run { .. } => "run",
            Commands::Buckets { .. } => "buckets",
            Commands::NextOccurrence { .. } => "next-occurrence",
            Commands::Complete { .. } => "complete",
            Commands::Action { .. } => "action",
            Commands::Config(ConfigCommands::Show) => "config show",
            Commands::Config(ConfigCommands::Init { .. }) => "config init",
        }
    }
}

impl Cli {
    pub fn run(self) -> Result<()> {
        let config_path = self.config.clone().unwrap_or_else(crate::config::Config::default_path);
        match self.command {
            Commands::Run { ephemeral } => run::run(run::RunOptions {
                config: config_path,
                ephemeral,
                events: self.events,
                json: self.json,
                quiet: self.quiet,
            }),
            Commands::Buckets {
                assignee,
                unassigned,
                buckets,
            } => buckets::run(buckets::BucketsOptions {
                config: config_path,
                assignee,
                unassigned,
                buckets,
                events: self.events,
                json: self.json,
                quiet: self.quiet,
            }),
            Commands::NextOccurrence {
                kind,
                due,
                interval,
                unit,
                weekdays,
                day_of_month,
                timezone,
            } => next::run(next::NextOptions {
                config: config_path,
                kind,
                due,
                interval,
                unit,
                weekdays,
                day_of_month,
                timezone,
                json: self.json,
                quiet: self.quiet,
            }),
            Commands::Complete { id, completed_by } => complete::run(complete::CompleteOptions {
                config: config_path,
                id,
                completed_by,
                events: self.events,
                json: self.json,
                quiet: self.quiet,
            }),
            Commands::Action {
                action_id,
                completed_by,
            } => action::run(action::ActionOptions {
                config: config_path,
                action_id,
                completed_by,
                events: self.events,
                json: self.json,
                quiet: self.quiet,
            }),
            Commands::Config(cmd) => match cmd {
                ConfigCommands::Show => config::run_show(config_path, self.json, self.quiet),
                ConfigCommands::Init { force } => {
                    config::run_init(config_path, force, self.json, self.quiet)
                }
            },
        }
    }
}

/// Run an async command body on a fresh multi-threaded runtime.
fn block_on<T, F>(future: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| Error::OperationFailed(format!("failed to start async runtime: {err}")))?;
    runtime.block_on(future)
}

/// Event bus plus the optional `--events` forwarder draining it.
struct EventPipe {
    bus: EventBus,
    forwarder: Option<JoinHandle<()>>,
}

impl EventPipe {
    /// Must be called inside a tokio runtime.
    fn open(events: Option<&str>) -> Result<Self> {
        let bus = EventBus::new(DEFAULT_BUS_CAPACITY);
        let forwarder = match EventDestination::parse(events) {
            Some(destination) => Some(destination.open()?.spawn_forwarder(&bus)),
            None => None,
        };
        Ok(Self { bus, forwarder })
    }

    fn bus(&self) -> EventBus {
        self.bus.clone()
    }

    /// Close the bus and let the forwarder write what is still buffered.
    async fn finish(self) {
        let Self { bus, forwarder } = self;
        drop(bus);
        if let Some(handle) = forwarder {
            if tokio::time::timeout(EVENT_FLUSH_TIMEOUT, handle).await.is_err() {
                tracing::warn!("event sink did not flush in time");
            }
        }
    }
}
