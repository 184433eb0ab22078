//! Local-time helpers shared by the recurrence engine and the classifiers.
//!
//! All bucket math happens in the configured timezone. Local wall-clock
//! values that do not exist (spring-forward gaps) are shifted forward by an
//! hour; ambiguous ones (fall-back) resolve to the earlier instant.

use chrono::{DateTime, Duration, LocalResult, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Timelike, Utc};
use chrono_tz::Tz;

use crate::error::{Error, Result};

/// Attach `tz` to a naive local timestamp.
pub fn localize(tz: &Tz, naive: NaiveDateTime) -> DateTime<Tz> {
    match tz.from_local_datetime(&naive) {
        LocalResult::Single(dt) => dt,
        LocalResult::Ambiguous(earliest, _) => earliest,
        LocalResult::None => tz
            .from_local_datetime(&(naive + Duration::hours(1)))
            .earliest()
            .unwrap_or_else(|| tz.from_utc_datetime(&naive)),
    }
}

/// Start of `date` in `tz`.
pub fn local_midnight(tz: &Tz, date: NaiveDate) -> DateTime<Tz> {
    localize(tz, date.and_time(NaiveTime::MIN))
}

/// Local calendar date of an instant.
pub fn local_date(tz: &Tz, instant: DateTime<Utc>) -> NaiveDate {
    instant.with_timezone(tz).date_naive()
}

/// Last representable instant of `date` in `tz`.
pub fn end_of_day(tz: &Tz, date: NaiveDate) -> DateTime<Utc> {
    let next = date.succ_opt().unwrap_or(date);
    local_midnight(tz, next).with_timezone(&Utc) - Duration::microseconds(1)
}

/// Due times of exactly 23:59:00 mark tasks without a meaningful time of day.
pub fn is_all_day(time: NaiveTime) -> bool {
    time.hour() == 23 && time.minute() == 59 && time.second() == 0 && time.nanosecond() == 0
}

/// The local day containing "now".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalDay {
    pub date: NaiveDate,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl LocalDay {
    pub fn containing(tz: &Tz, now: DateTime<Utc>) -> Self {
        let date = local_date(tz, now);
        Self {
            date,
            start: local_midnight(tz, date).with_timezone(&Utc),
            end: end_of_day(tz, date),
        }
    }

    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        self.start <= instant && instant <= self.end
    }
}

/// Time-of-day boundaries splitting today into morning, afternoon and evening.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DayCutoffs {
    pub morning: NaiveTime,
    pub afternoon: NaiveTime,
}

impl DayCutoffs {
    pub fn new(morning: NaiveTime, afternoon: NaiveTime) -> Result<Self> {
        if morning >= afternoon {
            return Err(Error::InvalidConfig(format!(
                "morning cutoff {} must be earlier than afternoon cutoff {}",
                morning.format("%H:%M"),
                afternoon.format("%H:%M")
            )));
        }
        Ok(Self { morning, afternoon })
    }

    pub fn parse(morning: &str, afternoon: &str) -> Result<Self> {
        Self::new(parse_cutoff(morning)?, parse_cutoff(afternoon)?)
    }
}

impl Default for DayCutoffs {
    fn default() -> Self {
        Self {
            morning: NaiveTime::from_hms_opt(12, 0, 0).unwrap_or(NaiveTime::MIN),
            afternoon: NaiveTime::from_hms_opt(17, 0, 0).unwrap_or(NaiveTime::MIN),
        }
    }
}

/// Parse a local `HH:MM` clock time.
pub fn parse_cutoff(raw: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(raw.trim(), "%H:%M")
        .map_err(|_| Error::InvalidConfig(format!("invalid cutoff '{raw}', expected HH:MM")))
}

/// Resolve an IANA timezone name.
pub fn parse_timezone(name: &str) -> Result<Tz> {
    name.trim()
        .parse::<Tz>()
        .map_err(|_| Error::UnknownTimezone(name.to_string()))
}
