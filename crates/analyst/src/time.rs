//! Bucketing helpers for the reserved `_date` field.
//!
//! `_date` may hold an RFC 3339 timestamp, a `YYYY-MM-DD` date (midnight UTC) or a number of Unix
//! seconds. Anything else buckets as `null`. All buckets are computed in UTC.

use chrono::{
    DateTime, Datelike, Days, NaiveDate, NaiveDateTime, SecondsFormat, TimeZone, Timelike, Utc,
};
use serde_json::Value;
use std::fmt::Write;

pub const DATE_FIELD: &str = "_date";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Interval {
    Hour,
    Day,
    /// Weeks start on Sunday.
    Week,
    Month,
}

impl Interval {
    pub fn floor(self, at: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let date = at.date_naive();
        let start: NaiveDateTime = match self {
            Interval::Hour => date.and_hms_opt(at.hour(), 0, 0)?,
            Interval::Day => date.and_hms_opt(0, 0, 0)?,
            Interval::Week => {
                let back = u64::from(date.weekday().num_days_from_sunday());
                date.checked_sub_days(Days::new(back))?.and_hms_opt(0, 0, 0)?
            }
            Interval::Month => {
                NaiveDate::from_ymd_opt(date.year(), date.month(), 1)?.and_hms_opt(0, 0, 0)?
            }
        };
        Some(Utc.from_utc_datetime(&start))
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Interval::Hour => "hour",
            Interval::Day => "day",
            Interval::Week => "week",
            Interval::Month => "month",
        }
    }
}

pub fn parse_date(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(text) => DateTime::parse_from_rfc3339(text)
            .map(|at| at.with_timezone(&Utc))
            .ok()
            .or_else(|| {
                let date = NaiveDate::parse_from_str(text, "%Y-%m-%d").ok()?;
                Some(Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0)?))
            }),
        Value::Number(n) => {
            let seconds = n.as_f64()?;
            if !seconds.is_finite() {
                return None;
            }
            let whole = seconds.floor();
            let nanos = ((seconds - whole) * 1e9) as u32;
            DateTime::from_timestamp(whole as i64, nanos)
        }
        _ => None,
    }
}

/// RFC 3339 text, whole seconds, `Z` suffix.
pub fn to_text(at: DateTime<Utc>) -> Value {
    Value::from(at.to_rfc3339_opts(SecondsFormat::Secs, true))
}

/// Start of the interval containing `value`.
pub fn bucket(interval: Interval, value: &Value) -> Value {
    parse_date(value)
        .and_then(|at| interval.floor(at))
        .map_or(Value::Null, to_text)
}

/// `strftime`-style formatting. An invalid format string yields `null`.
pub fn format(value: &Value, pattern: &str) -> Value {
    let Some(at) = parse_date(value) else {
        return Value::Null;
    };
    let mut out = String::new();
    match write!(out, "{}", at.format(pattern)) {
        Ok(()) => Value::from(out),
        Err(_) => Value::Null,
    }
}

/// Day of the week, Sunday first: a name (`Sunday`, or `Sun` when abbreviated) or `0..=6`.
pub fn day_of_week(value: &Value, names: bool, abbreviated: bool) -> Value {
    match (parse_date(value), names) {
        (None, _) => Value::Null,
        (Some(_), true) => format(value, if abbreviated { "%a" } else { "%A" }),
        (Some(at), false) => Value::from(at.weekday().num_days_from_sunday()),
    }
}

pub fn hour_of_day(value: &Value) -> Value {
    parse_date(value).map_or(Value::Null, |at| Value::from(at.hour()))
}
