//! Error types for tickwatch
//!
//! Exit codes:
//! - 0: Success
//! - 2: User error (bad args, invalid config, unknown timezone, unknown task)
//! - 4: Operation failed (remote service, I/O, serialization, lock timeout)

use std::path::PathBuf;
use thiserror::Error;

use crate::model::TaskId;

/// Exit codes for the tickwatch CLI
pub mod exit_codes {
    pub const SUCCESS: i32 = 0;
    pub const USER_ERROR: i32 = 2;
    pub const OPERATION_FAILED: i32 = 4;
}

/// Main error type for tickwatch operations
#[derive(Error, Debug)]
pub enum Error {
    // User errors (exit code 2)
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Unknown timezone: {0}")]
    UnknownTimezone(String),

    #[error("Task not found: {0}")]
    TaskNotFound(TaskId),

    // Operation failures (exit code 4)
    #[error("Task service error: {0}")]
    Remote(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Lock acquisition failed: {0}")]
    LockFailed(PathBuf),

    #[error("Notification delivery failed: {0}")]
    Notify(String),

    #[error("Operation failed: {0}")]
    OperationFailed(String),
}

impl Error {
    /// Get the exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::InvalidConfig(_)
            | Error::InvalidArgument(_)
            | Error::UnknownTimezone(_)
            | Error::TaskNotFound(_) => exit_codes::USER_ERROR,

            Error::Remote(_)
            | Error::Http(_)
            | Error::Io(_)
            | Error::Json(_)
            | Error::TomlParse(_)
            | Error::TomlSerialize(_)
            | Error::LockFailed(_)
            | Error::Notify(_)
            | Error::OperationFailed(_) => exit_codes::OPERATION_FAILED,
        }
    }

    /// Structured details for JSON error output, when the variant carries any.
    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            Error::TaskNotFound(id) => Some(serde_json::json!({ "task_id": id })),
            Error::UnknownTimezone(name) => Some(serde_json::json!({ "timezone": name })),
            Error::LockFailed(path) => Some(serde_json::json!({
                "path": path.to_string_lossy(),
            })),
            _ => None,
        }
    }
}

/// Result type alias for tickwatch operations
pub type Result<T> = std::result::Result<T, Error>;

/// Wrapper for displaying errors in JSON format
#[derive(serde::Serialize)]
pub struct JsonError {
    pub error: String,
    pub code: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl From<&Error> for JsonError {
    fn from(err: &Error) -> Self {
        JsonError {
            error: err.to_string(),
            code: err.exit_code(),
            details: err.details(),
        }
    }
}
