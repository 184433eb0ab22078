//! Configuration loading and management
//!
//! Handles parsing of `tickwatch.toml` configuration files.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::calendar::{parse_timezone, DayCutoffs};
use crate::error::{Error, Result};
use crate::model::MemberId;

/// Default config file name
pub const CONFIG_FILE_NAME: &str = "tickwatch.toml";

/// Environment variable that overrides `server.api_token`
pub const API_TOKEN_ENV: &str = "TICKWATCH_API_TOKEN";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// IANA timezone all bucket math is evaluated in
    #[serde(default = "default_timezone")]
    pub timezone: String,

    /// Seconds between snapshot polls
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_seconds: u64,

    /// How many days past today count as upcoming
    #[serde(default = "default_upcoming_window")]
    pub upcoming_days_window: u32,

    #[serde(default = "default_morning_cutoff")]
    pub morning_cutoff: String,

    #[serde(default = "default_afternoon_cutoff")]
    pub afternoon_cutoff: String,

    /// Remote task service
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub automation: AutomationConfig,

    #[serde(default)]
    pub notifications: NotificationsConfig,

    /// Persistent state
    #[serde(default)]
    pub state: StateConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            timezone: default_timezone(),
            refresh_interval_seconds: default_refresh_interval(),
            upcoming_days_window: default_upcoming_window(),
            morning_cutoff: default_morning_cutoff(),
            afternoon_cutoff: default_afternoon_cutoff(),
            server: ServerConfig::default(),
            automation: AutomationConfig::default(),
            notifications: NotificationsConfig::default(),
            state: StateConfig::default(),
        }
    }
}

fn default_timezone() -> String {
    "UTC".to_string()
}

fn default_refresh_interval() -> u64 {
    900
}

fn default_upcoming_window() -> u32 {
    7
}

fn default_morning_cutoff() -> String {
    "12:00".to_string()
}

fn default_afternoon_cutoff() -> String {
    "17:00".to_string()
}

/// Remote service connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Base URL of the task service
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// Static API token sent as `secretkey`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_token: Option<String>,

    /// Per-request timeout
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    10
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            url: None,
            api_token: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AutomationConfig {
    /// Complete overdue recurring tasks once their next occurrence is due
    #[serde(default)]
    pub auto_complete_past_due_recurrent: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotificationsConfig {
    #[serde(default)]
    pub notify_on_past_due: bool,

    /// Member id → channel reference (webhook URL or `log`)
    #[serde(default)]
    pub assignee_channels: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StateConfig {
    /// File backing the persistent store
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

impl Config {
    /// Load configuration from a `tickwatch.toml` file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from `path`, or return defaults when it does not exist
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Platform default location of the config file
    pub fn default_path() -> PathBuf {
        directories::ProjectDirs::from("", "", "tickwatch")
            .map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
            .unwrap_or_else(|| PathBuf::from(CONFIG_FILE_NAME))
    }

    pub fn tz(&self) -> Result<Tz> {
        parse_timezone(&self.timezone)
    }

    pub fn cutoffs(&self) -> Result<DayCutoffs> {
        DayCutoffs::parse(&self.morning_cutoff, &self.afternoon_cutoff)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_seconds)
    }

    /// API token, preferring the environment over the file
    pub fn api_token(&self) -> Option<String> {
        std::env::var(API_TOKEN_ENV)
            .ok()
            .filter(|token| !token.trim().is_empty())
            .or_else(|| self.server.api_token.clone())
    }

    /// Channel mapping keyed by member id
    pub fn assignee_channels(&self) -> Result<HashMap<MemberId, String>> {
        self.notifications
            .assignee_channels
            .iter()
            .map(|(key, channel)| {
                let id = key.trim().parse::<MemberId>().map_err(|_| {
                    Error::InvalidConfig(format!(
                        "notifications.assignee_channels key '{key}' is not a member id"
                    ))
                })?;
                Ok((id, channel.clone()))
            })
            .collect()
    }

    /// Path of the persistent state file
    pub fn state_path(&self) -> PathBuf {
        self.state.path.clone().unwrap_or_else(|| {
            directories::ProjectDirs::from("", "", "tickwatch")
                .map(|dirs| dirs.data_dir().join("state.json"))
                .unwrap_or_else(|| PathBuf::from("tickwatch-state.json"))
        })
    }

    /// Check every field; an invalid timezone is reported as `UnknownTimezone`.
    pub fn validate(&self) -> Result<()> {
        self.tz()?;
        self.cutoffs()?;
        if self.refresh_interval_seconds == 0 {
            return Err(Error::InvalidConfig(
                "refresh_interval_seconds must be > 0".to_string(),
            ));
        }
        if !(1..=365).contains(&self.upcoming_days_window) {
            return Err(Error::InvalidConfig(
                "upcoming_days_window must be between 1 and 365".to_string(),
            ));
        }
        if self.server.timeout_secs == 0 {
            return Err(Error::InvalidConfig(
                "server.timeout_secs must be > 0".to_string(),
            ));
        }
        self.assignee_channels()?;
        Ok(())
    }
}
