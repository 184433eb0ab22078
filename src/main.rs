//! tickwatch - time-bucketed task watcher
//!
//! Polls a remote chore service, keeps time-bucket views current, completes
//! overdue recurring tasks and sends de-duplicated past-due notifications.

use clap::Parser;
use tickwatch::cli::Cli;
use tickwatch::output::emit_error;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

fn main() {
    let cli = Cli::parse();
    let command = cli.command.name();

    // One-shot commands stay quiet unless RUST_LOG asks otherwise;
    // the watcher logs at info.
    // Keep startup robust in CI/robot envs: ignore invalid/huge filters.
    let default_filter = if command == "run" { "info" } else { "off" };
    let filter = std::env::var("RUST_LOG")
        .ok()
        .and_then(|raw| {
            let raw = raw.trim();
            if raw.is_empty() || raw.len() > 4096 {
                return None;
            }
            EnvFilter::try_new(raw).ok()
        })
        .unwrap_or_else(|| EnvFilter::new(default_filter));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    let events_to_stdout = cli
        .events
        .as_deref()
        .map(|value| value.trim() == "-")
        .unwrap_or(false);
    let json = cli.json && !events_to_stdout;
    if let Err(err) = cli.run() {
        let _ = emit_error(command, &err, json);
        std::process::exit(err.exit_code());
    }
}
