//! tickwatch config command implementation

use std::path::PathBuf;

use serde::Serialize;

use crate::config::{Config, API_TOKEN_ENV};
use crate::error::{Error, Result};
use crate::output::{emit_success, OutputOptions, Report};

const REDACTED: &str = "<redacted>";

#[derive(Serialize)]
struct ShowReport {
    path: PathBuf,
    exists: bool,
    config: Config,
    state_path: PathBuf,
}

#[derive(Serialize)]
struct InitReport {
    path: PathBuf,
    overwritten: bool,
}

pub fn run_show(path: PathBuf, json: bool, quiet: bool) -> Result<()> {
    let exists = path.exists();
    let mut config = Config::load_or_default(&path)?;
    let token_set = config.api_token().is_some();
    if config.server.api_token.is_some() {
        config.server.api_token = Some(REDACTED.to_string());
    }
    let report = ShowReport {
        state_path: config.state_path(),
        path,
        exists,
        config,
    };

    let mut human = Report::new(format!("Config {}", report.path.display()));
    let config = &report.config;
    human
        .field("Timezone", config.timezone.clone())
        .field(
            "Server",
            config.server.url.clone().unwrap_or_else(|| "(not set)".to_string()),
        )
        .field("API token", if token_set { "set" } else { "not set" })
        .field("Refresh", format!("{}s", config.refresh_interval_seconds))
        .field("Upcoming window", format!("{} day(s)", config.upcoming_days_window))
        .field(
            "Day cutoffs",
            format!("{} / {}", config.morning_cutoff, config.afternoon_cutoff),
        )
        .field(
            "Auto-complete recurring",
            on_off(config.automation.auto_complete_past_due_recurrent),
        )
        .field(
            "Past-due notifications",
            on_off(config.notifications.notify_on_past_due),
        )
        .field("State file", report.state_path.display().to_string())
        .section(
            "Channels",
            config
                .notifications
                .assignee_channels
                .iter()
                .map(|(member, channel)| format!("user {member} -> {channel}"))
                .collect(),
        );
    if !report.exists {
        human
            .warn("config file not found, showing defaults")
            .hint("tickwatch config init");
    }
    if config.server.url.is_none() {
        human.hint(format!(
            "set server.url in the config file and export {API_TOKEN_ENV}"
        ));
    }

    emit_success(OutputOptions { json, quiet }, "config show", &report, &human)
}

pub fn run_init(path: PathBuf, force: bool, json: bool, quiet: bool) -> Result<()> {
    let overwritten = path.exists();
    if overwritten && !force {
        return Err(Error::InvalidArgument(format!(
            "{} already exists (use --force to overwrite)",
            path.display()
        )));
    }
    Config::default().save(&path)?;

    let report = InitReport { path, overwritten };
    let mut human = Report::new(format!("Wrote {}", report.path.display()));
    human.hint("set server.url, then run `tickwatch buckets`");

    emit_success(OutputOptions { json, quiet }, "config init", &report, &human)
}

fn on_off(enabled: bool) -> &'static str {
    if enabled {
        "on"
    } else {
        "off"
    }
}
