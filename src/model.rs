//! Task and member model.
//!
//! Tasks arrive in the service's camelCase JSON shape. Parsing is lenient:
//! malformed optional fields degrade to "absent" instead of rejecting the
//! whole task list.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDateTime, Utc, Weekday};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

pub type TaskId = i64;
pub type MemberId = i64;

/// Task priority as an ordinal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    #[default]
    None,
    Low,
    Medium,
    High,
}

impl Priority {
    /// The service numbers priorities P1 (highest) upward; 0 means unset.
    pub fn from_wire(value: i64) -> Self {
        match value {
            i64::MIN..=0 => Priority::None,
            1 => Priority::High,
            2 => Priority::Medium,
            _ => Priority::Low,
        }
    }

    pub fn to_wire(self) -> i64 {
        match self {
            Priority::None => 0,
            Priority::High => 1,
            Priority::Medium => 2,
            Priority::Low => 3,
        }
    }
}

/// How a task repeats.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FrequencyKind {
    Once,
    Daily,
    Weekly,
    Monthly,
    Yearly,
    Interval,
    DaysOfWeek,
    DayOfMonth,
    NoRepeat,
    /// A kind this build does not understand; never has a next occurrence.
    Unknown(String),
}

impl FrequencyKind {
    pub fn as_str(&self) -> &str {
        match self {
            FrequencyKind::Once => "once",
            FrequencyKind::Daily => "daily",
            FrequencyKind::Weekly => "weekly",
            FrequencyKind::Monthly => "monthly",
            FrequencyKind::Yearly => "yearly",
            FrequencyKind::Interval => "interval",
            FrequencyKind::DaysOfWeek => "days_of_the_week",
            FrequencyKind::DayOfMonth => "day_of_the_month",
            FrequencyKind::NoRepeat => "no_repeat",
            FrequencyKind::Unknown(raw) => raw,
        }
    }

    pub fn is_recurring(&self) -> bool {
        !matches!(self, FrequencyKind::Once | FrequencyKind::NoRepeat)
    }
}

impl FromStr for FrequencyKind {
    type Err = std::convert::Infallible;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let normalized = raw.trim().to_ascii_lowercase().replace('-', "_");
        Ok(match normalized.as_str() {
            "" | "once" => FrequencyKind::Once,
            "daily" => FrequencyKind::Daily,
            "weekly" => FrequencyKind::Weekly,
            "monthly" => FrequencyKind::Monthly,
            "yearly" => FrequencyKind::Yearly,
            "interval" => FrequencyKind::Interval,
            "days_of_the_week" | "days_of_week" => FrequencyKind::DaysOfWeek,
            "day_of_the_month" | "day_of_month" => FrequencyKind::DayOfMonth,
            "no_repeat" => FrequencyKind::NoRepeat,
            _ => FrequencyKind::Unknown(raw.trim().to_string()),
        })
    }
}

impl fmt::Display for FrequencyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unit attached to `interval` frequencies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntervalUnit {
    Days,
    Weeks,
    Months,
    Years,
}

impl IntervalUnit {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "day" | "days" => Some(IntervalUnit::Days),
            "week" | "weeks" => Some(IntervalUnit::Weeks),
            "month" | "months" => Some(IntervalUnit::Months),
            "year" | "years" => Some(IntervalUnit::Years),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrequencyMetadata {
    /// Raw unit string; see [`FrequencyMetadata::interval_unit`]
    pub unit: Option<String>,
    pub weekdays: Vec<Weekday>,
    pub target_day: Option<u32>,
}

impl FrequencyMetadata {
    pub fn interval_unit(&self) -> Option<IntervalUnit> {
        self.unit.as_deref().and_then(IntervalUnit::parse)
    }

    fn from_value(value: Option<&Value>) -> Self {
        let object = match value {
            Some(Value::Object(map)) => map.clone(),
            Some(Value::String(raw)) => match serde_json::from_str::<Value>(raw) {
                Ok(Value::Object(map)) => map,
                _ => return Self::default(),
            },
            _ => return Self::default(),
        };

        let unit = object
            .get("unit")
            .and_then(Value::as_str)
            .map(|unit| unit.trim().to_ascii_lowercase());

        let weekdays = object
            .get("days")
            .and_then(Value::as_array)
            .map(|days| {
                days.iter()
                    .filter_map(Value::as_str)
                    .filter_map(|day| day.trim().to_ascii_lowercase().parse::<Weekday>().ok())
                    .collect()
            })
            .unwrap_or_default();

        let target_day = ["dayOfMonth", "days_of_month"]
            .iter()
            .find_map(|key| object.get(*key))
            .and_then(|value| match value {
                Value::Array(items) => items.first().and_then(wire_int),
                other => wire_int(other),
            })
            .and_then(|day| u32::try_from(day).ok())
            .filter(|day| (1..=31).contains(day));

        Self {
            unit,
            weekdays,
            target_day,
        }
    }

    fn to_value(&self) -> Option<Value> {
        let mut map = serde_json::Map::new();
        if let Some(unit) = &self.unit {
            map.insert("unit".to_string(), Value::from(unit.clone()));
        }
        if !self.weekdays.is_empty() {
            let days = self
                .weekdays
                .iter()
                .map(|day| Value::from(weekday_name(*day)))
                .collect();
            map.insert("days".to_string(), Value::Array(days));
        }
        if let Some(day) = self.target_day {
            map.insert("dayOfMonth".to_string(), Value::from(day));
        }
        if map.is_empty() {
            None
        } else {
            Some(Value::Object(map))
        }
    }
}

fn weekday_name(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "monday",
        Weekday::Tue => "tuesday",
        Weekday::Wed => "wednesday",
        Weekday::Thu => "thursday",
        Weekday::Fri => "friday",
        Weekday::Sat => "saturday",
        Weekday::Sun => "sunday",
    }
}

/// Recurrence spec: kind, interval and metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frequency {
    pub kind: FrequencyKind,
    /// Raw interval as sent by the service (may be 0)
    pub interval: u32,
    pub metadata: FrequencyMetadata,
}

impl Frequency {
    pub fn once() -> Self {
        Self {
            kind: FrequencyKind::Once,
            interval: 0,
            metadata: FrequencyMetadata::default(),
        }
    }

    pub fn new(kind: FrequencyKind, interval: u32) -> Self {
        Self {
            kind,
            interval,
            metadata: FrequencyMetadata::default(),
        }
    }

    pub fn with_unit(mut self, unit: &str) -> Self {
        self.metadata.unit = Some(unit.to_string());
        self
    }

    /// Interval used for arithmetic; never below 1.
    pub fn step(&self) -> u32 {
        self.interval.max(1)
    }
}

impl Default for Frequency {
    fn default() -> Self {
        Self::once()
    }
}

/// A task as cached in a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawTask", into = "RawTask")]
pub struct Task {
    pub id: TaskId,
    pub name: String,
    pub description: Option<String>,
    pub due_at: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub assigned_to: Option<MemberId>,
    pub priority: Priority,
    pub frequency: Frequency,
}

impl Task {
    pub fn new(id: TaskId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            description: None,
            due_at: None,
            is_active: true,
            assigned_to: None,
            priority: Priority::None,
            frequency: Frequency::once(),
        }
    }

    pub fn is_recurring(&self) -> bool {
        self.frequency.kind.is_recurring()
    }

    /// Hash over the fields whose change must bump the snapshot version.
    pub fn display_hash(&self) -> String {
        let fields = DisplayFields {
            id: self.id,
            name: &self.name,
            description: self.description.as_deref(),
            due_at: self.due_at.map(|due| due.to_rfc3339()),
            is_active: self.is_active,
            assigned_to: self.assigned_to,
            priority: self.priority.to_wire(),
            frequency_kind: self.frequency.kind.as_str(),
        };
        let encoded = serde_json::to_vec(&fields).unwrap_or_default();
        let digest = Sha256::digest(&encoded);
        digest.iter().map(|byte| format!("{byte:02x}")).collect()
    }
}

#[derive(Serialize)]
struct DisplayFields<'a> {
    id: TaskId,
    name: &'a str,
    description: Option<&'a str>,
    due_at: Option<String>,
    is_active: bool,
    assigned_to: Option<MemberId>,
    priority: i64,
    frequency_kind: &'a str,
}

/// Wire representation of a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTask {
    id: TaskId,
    #[serde(default)]
    name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    next_due_date: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    is_active: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    assigned_to: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    priority: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    frequency_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    frequency: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    frequency_metadata: Option<Value>,
    #[serde(default, rename = "frequencyMetadataV2", skip_serializing)]
    frequency_metadata_v2: Option<Value>,
}

impl From<RawTask> for Task {
    fn from(raw: RawTask) -> Self {
        let kind = raw
            .frequency_type
            .as_deref()
            .unwrap_or("once")
            .parse::<FrequencyKind>()
            .unwrap_or(FrequencyKind::Once);
        let interval = raw
            .frequency
            .as_ref()
            .and_then(wire_int)
            .map(|value| value.clamp(0, i64::from(u32::MAX)) as u32)
            .unwrap_or(0);
        let metadata = match raw.frequency_metadata.as_ref() {
            Some(Value::Null) | None => FrequencyMetadata::from_value(raw.frequency_metadata_v2.as_ref()),
            Some(value) => FrequencyMetadata::from_value(Some(value)),
        };

        Task {
            id: raw.id,
            name: raw.name.unwrap_or_default(),
            description: raw.description,
            due_at: raw.next_due_date.as_ref().and_then(parse_due),
            is_active: raw.is_active.unwrap_or(true),
            assigned_to: raw.assigned_to.as_ref().and_then(Value::as_i64),
            priority: raw
                .priority
                .as_ref()
                .and_then(wire_int)
                .map(Priority::from_wire)
                .unwrap_or_default(),
            frequency: Frequency {
                kind,
                interval,
                metadata,
            },
        }
    }
}

impl From<Task> for RawTask {
    fn from(task: Task) -> Self {
        RawTask {
            id: task.id,
            name: Some(task.name),
            description: task.description,
            next_due_date: task.due_at.map(|due| Value::from(due.to_rfc3339())),
            is_active: Some(task.is_active),
            assigned_to: task.assigned_to.map(Value::from),
            priority: Some(Value::from(task.priority.to_wire())),
            frequency_type: Some(task.frequency.kind.as_str().to_string()),
            frequency: Some(Value::from(task.frequency.interval)),
            frequency_metadata: task.frequency.metadata.to_value(),
            frequency_metadata_v2: None,
        }
    }
}

fn wire_int(value: &Value) -> Option<i64> {
    match value {
        Value::Number(number) => number
            .as_i64()
            .or_else(|| number.as_f64().map(|float| float as i64)),
        Value::String(raw) => raw.trim().parse().ok(),
        _ => None,
    }
}

/// Parse a due timestamp; naive timestamps are taken as UTC.
pub fn parse_due(value: &Value) -> Option<DateTime<Utc>> {
    let raw = value.as_str()?.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
        .map(|naive| naive.and_utc())
}

/// A member of the household/circle tasks can be assigned to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Member {
    pub id: MemberId,
    pub user_id: MemberId,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

fn default_true() -> bool {
    true
}

impl Member {
    pub fn label(&self) -> String {
        self.display_name
            .clone()
            .or_else(|| self.username.clone())
            .unwrap_or_else(|| format!("member {}", self.user_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn parse(value: Value) -> Task {
        serde_json::from_value(value).expect("task")
    }

    #[test]
    fn parses_wire_task() {
        let task = parse(json!({
            "id": 7,
            "name": "Take out trash",
            "nextDueDate": "2026-01-10T08:00:00Z",
            "isActive": true,
            "assignedTo": 3,
            "priority": 2,
            "frequencyType": "interval",
            "frequency": 3,
            "frequencyMetadata": {"unit": "Days"}
        }));
        assert_eq!(task.id, 7);
        assert_eq!(task.due_at, Some(Utc.with_ymd_and_hms(2026, 1, 10, 8, 0, 0).unwrap()));
        assert_eq!(task.assigned_to, Some(3));
        assert_eq!(task.priority, Priority::Medium);
        assert_eq!(task.frequency.kind, FrequencyKind::Interval);
        assert_eq!(task.frequency.interval, 3);
        assert_eq!(task.frequency.metadata.interval_unit(), Some(IntervalUnit::Days));
        assert!(task.is_recurring());
    }

    #[test]
    fn lenient_fields_degrade_to_absent() {
        let task = parse(json!({
            "id": 1,
            "name": "Broken",
            "nextDueDate": "not a date",
            "assignedTo": "bob",
            "priority": 9
        }));
        assert_eq!(task.due_at, None);
        assert_eq!(task.assigned_to, None);
        assert_eq!(task.priority, Priority::Low);
        assert_eq!(task.frequency.kind, FrequencyKind::Once);
        assert!(task.is_active);
        assert!(!task.is_recurring());
    }

    #[test]
    fn metadata_accepts_json_string_and_v2() {
        let task = parse(json!({
            "id": 2,
            "name": "Water plants",
            "frequencyType": "days_of_the_week",
            "frequencyMetadata": "{\"days\": [\"Monday\", \"wednesday\"]}"
        }));
        assert_eq!(task.frequency.kind, FrequencyKind::DaysOfWeek);
        assert_eq!(task.frequency.metadata.weekdays, vec![Weekday::Mon, Weekday::Wed]);

        let task = parse(json!({
            "id": 3,
            "name": "Rent",
            "frequencyType": "day_of_the_month",
            "frequencyMetadataV2": {"dayOfMonth": 31}
        }));
        assert_eq!(task.frequency.metadata.target_day, Some(31));
    }

    #[test]
    fn unknown_kind_is_preserved() {
        let task = parse(json!({"id": 4, "name": "Odd", "frequencyType": "fortnightly"}));
        assert_eq!(task.frequency.kind, FrequencyKind::Unknown("fortnightly".to_string()));
        assert!(task.is_recurring());
    }

    #[test]
    fn naive_due_is_utc() {
        let task = parse(json!({"id": 5, "name": "x", "nextDueDate": "2026-01-10T08:00:00"}));
        assert_eq!(task.due_at, Some(Utc.with_ymd_and_hms(2026, 1, 10, 8, 0, 0).unwrap()));
    }

    #[test]
    fn display_hash_tracks_display_fields_only() {
        let mut task = Task::new(1, "Dishes");
        let base = task.display_hash();
        task.frequency.interval = 5;
        assert_eq!(task.display_hash(), base);
        task.name = "Dishes!".to_string();
        assert_ne!(task.display_hash(), base);
    }

    #[test]
    fn member_parses_camel_case() {
        let member: Member = serde_json::from_value(json!({
            "id": 10,
            "userId": 3,
            "displayName": "Alice",
            "username": "alice",
            "isActive": true
        }))
        .expect("member");
        assert_eq!(member.user_id, 3);
        assert_eq!(member.label(), "Alice");
    }
}
