//! Command reports: a JSON envelope for scripts, an aligned text block for
//! people.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::Serialize;

use crate::error::{Error, Result};

pub const SCHEMA_VERSION: &str = "tickwatch.v1";

/// Local wall-clock rendering shared by every human report.
pub const LOCAL_FORMAT: &str = "%a %b %-d %-I:%M %p";

#[derive(Debug, Clone, Copy)]
pub struct OutputOptions {
    pub json: bool,
    pub quiet: bool,
}

/// Human-readable result of one command.
///
/// Fields render as an aligned key/value block under the title; each
/// non-empty section follows with its item count.
#[derive(Debug, Clone, Default)]
pub struct Report {
    title: String,
    fields: Vec<(String, String)>,
    sections: Vec<(String, Vec<String>)>,
    warnings: Vec<String>,
    hints: Vec<String>,
}

impl Report {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }

    pub fn field(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.fields.push((key.into(), value.into()));
        self
    }

    pub fn section(&mut self, title: impl Into<String>, items: Vec<String>) -> &mut Self {
        self.sections.push((title.into(), items));
        self
    }

    pub fn warn(&mut self, message: impl Into<String>) -> &mut Self {
        self.warnings.push(message.into());
        self
    }

    pub fn hint(&mut self, message: impl Into<String>) -> &mut Self {
        self.hints.push(message.into());
        self
    }

    pub fn render(&self) -> String {
        let mut lines = vec![self.title.clone()];

        let width = self.fields.iter().map(|(key, _)| key.len()).max().unwrap_or(0);
        for (key, value) in &self.fields {
            lines.push(format!("  {key:<width$}  {value}").trim_end().to_string());
        }

        for (title, items) in self.sections.iter().filter(|(_, items)| !items.is_empty()) {
            lines.push(String::new());
            lines.push(format!("{title} ({})", items.len()));
            lines.extend(items.iter().map(|item| format!("  {item}")));
        }

        if !self.warnings.is_empty() || !self.hints.is_empty() {
            lines.push(String::new());
        }
        lines.extend(self.warnings.iter().map(|message| format!("warning: {message}")));
        lines.extend(self.hints.iter().map(|message| format!("hint: {message}")));
        lines.join("\n")
    }
}

/// `at` in `tz`, e.g. `Sat Jan 10 8:00 AM`.
pub fn format_local(at: DateTime<Utc>, tz: &Tz) -> String {
    at.with_timezone(tz).format(LOCAL_FORMAT).to_string()
}

#[derive(Serialize)]
#[serde(rename_all = "snake_case")]
enum Status {
    Success,
    Error,
}

#[derive(Serialize)]
#[serde(rename_all = "snake_case")]
enum Body<'a, T: Serialize> {
    Data(&'a T),
    Error(ErrorBody),
}

#[derive(Serialize)]
struct ErrorBody {
    message: String,
    code: i32,
    kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<serde_json::Value>,
}

#[derive(Serialize)]
struct Envelope<'a, T: Serialize> {
    schema_version: &'static str,
    command: &'a str,
    status: Status,
    #[serde(flatten)]
    body: Body<'a, T>,
    #[serde(skip_serializing_if = "<[String]>::is_empty")]
    warnings: &'a [String],
    #[serde(skip_serializing_if = "<[String]>::is_empty")]
    next_steps: &'a [String],
}

impl<T: Serialize> Envelope<'_, T> {
    fn print(&self) -> Result<()> {
        println!("{}", serde_json::to_string_pretty(self)?);
        Ok(())
    }
}

pub fn emit_success<T: Serialize>(
    options: OutputOptions,
    command: &str,
    data: &T,
    report: &Report,
) -> Result<()> {
    if options.json {
        return Envelope {
            schema_version: SCHEMA_VERSION,
            command,
            status: Status::Success,
            body: Body::Data(data),
            warnings: &report.warnings,
            next_steps: &report.hints,
        }
        .print();
    }

    if !options.quiet {
        println!("{}", report.render());
    }
    Ok(())
}

pub fn emit_error(command: &str, err: &Error, json: bool) -> Result<()> {
    let hints = error_hints(err);
    if json {
        return Envelope::<()> {
            schema_version: SCHEMA_VERSION,
            command,
            status: Status::Error,
            body: Body::Error(ErrorBody {
                message: err.to_string(),
                code: err.exit_code(),
                kind: error_kind(err),
                details: err.details(),
            }),
            warnings: &[],
            next_steps: &hints,
        }
        .print();
    }

    eprintln!("error: {err}");
    if let Some(hint) = hints.first() {
        eprintln!("hint: {hint}");
    }
    Ok(())
}

fn error_kind(err: &Error) -> &'static str {
    match err.exit_code() {
        2 => "user_error",
        _ => "operation_failed",
    }
}

fn error_hints(err: &Error) -> Vec<String> {
    match err {
        Error::InvalidConfig(_) => vec![
            "fix tickwatch.toml then retry".to_string(),
            "tickwatch config show".to_string(),
        ],
        Error::UnknownTimezone(_) => {
            vec!["set timezone to an IANA name such as \"America/New_York\"".to_string()]
        }
        Error::TaskNotFound(_) => vec!["tickwatch buckets --bucket past_due".to_string()],
        Error::LockFailed(path) => vec![format!(
            "check for another tickwatch process holding {}",
            path.to_string_lossy()
        )],
        Error::Remote(_) | Error::Http(_) => {
            vec!["check server.url and TICKWATCH_API_TOKEN".to_string()]
        }
        _ => Vec::new(),
    }
}
