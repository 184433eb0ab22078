//! tickwatch run command implementation
//!
//! Starts the long-running watcher and blocks until Ctrl-C.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{info, warn};

use crate::client::HttpTaskService;
use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::error::Result;
use crate::notifier::{ChannelNotifier, WebhookNotifier};
use crate::output::{emit_success, OutputOptions, Report};
use crate::runtime::{Collaborators, Runtime};
use crate::scheduler::{Dispatch, TokioScheduler};
use crate::store::{JsonFileStore, MemoryStore, PersistentStore};

use super::{block_on, EventPipe};

/// In-flight work gets this long to settle after shutdown
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

pub struct RunOptions {
    pub config: PathBuf,
    pub ephemeral: bool,
    pub events: Option<String>,
    pub json: bool,
    pub quiet: bool,
}

#[derive(Serialize)]
struct RunReport {
    snapshot_version: u64,
    tasks: usize,
    classifiers: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    state_path: Option<PathBuf>,
}

pub fn run(options: RunOptions) -> Result<()> {
    let config = Config::load_or_default(&options.config)?;
    let service = Arc::new(HttpTaskService::from_config(&config)?);
    let webhook = WebhookNotifier::new(Duration::from_secs(config.server.timeout_secs))?;
    let state_path = (!options.ephemeral).then(|| config.state_path());
    let store: Arc<dyn PersistentStore> = match &state_path {
        Some(path) => Arc::new(JsonFileStore::new(path.clone())),
        None => Arc::new(MemoryStore::new()),
    };

    let report = block_on(async {
        let pipe = EventPipe::open(options.events.as_deref())?;
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let scheduler = Arc::new(TokioScheduler::new(clock.clone())?);
        let dispatch = Dispatch::new();

        let report = {
            let runtime = Runtime::new(
                &config,
                Collaborators {
                    service,
                    notifier: Arc::new(ChannelNotifier::new(webhook)),
                    store,
                    clock,
                    scheduler,
                },
                pipe.bus(),
                dispatch.clone(),
            )?;
            runtime.start().await;
            info!(
                config = %options.config.display(),
                interval_secs = config.refresh_interval_seconds,
                "watching tasks, press Ctrl-C to stop"
            );
            runtime.run_until(shutdown_signal()).await;

            let snapshot = runtime.coordinator().current();
            RunReport {
                snapshot_version: snapshot.version(),
                tasks: snapshot.len(),
                classifiers: runtime.classifiers().len(),
                state_path: state_path.clone(),
            }
        };

        if tokio::time::timeout(DRAIN_TIMEOUT, dispatch.drain()).await.is_err() {
            warn!("in-flight work did not finish before shutdown");
        }
        pipe.finish().await;
        Ok(report)
    })?;

    let mut human = Report::new("tickwatch stopped");
    human
        .field("Snapshot version", report.snapshot_version.to_string())
        .field("Tasks", report.tasks.to_string())
        .field("Classifiers", report.classifiers.to_string());
    match &report.state_path {
        Some(path) => {
            human.field("State", path.display().to_string());
        }
        None => {
            human.warn("ephemeral run: notification records were not saved");
        }
    }

    emit_success(
        OutputOptions {
            json: options.json,
            quiet: options.quiet,
        },
        "run",
        &report,
        &human,
    )
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "could not listen for Ctrl-C, running until killed");
        std::future::pending::<()>().await;
    }
}
