//! Schedule descriptors stored on connections.
//!
//! The stored form is loose JSON (`hour`/`minute` may be strings such as `"09"`), so parsing is
//! fallible per connection; the matcher logs and skips descriptors that do not parse.

use chrono::{DateTime, Datelike, FixedOffset, Timelike, Weekday};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    Once,
    Daily,
    Weekly,
    Monthly,
}

impl Frequency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Frequency::Once => "once",
            Frequency::Daily => "daily",
            Frequency::Weekly => "weekly",
            Frequency::Monthly => "monthly",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cadence {
    Daily,
    Weekly(Weekday),
    /// Day of month, 1-31
    Monthly(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schedule {
    /// Runs only on manual request or at creation; never matched by the minute tick.
    Once,
    Recurring {
        cadence: Cadence,
        hour: u32,
        minute: u32,
    },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ScheduleError {
    #[error("schedule descriptor must be a JSON object")]
    NotAnObject,
    #[error("unknown schedule frequency '{0}'")]
    UnknownFrequency(String),
    #[error("schedule field '{field}' is missing")]
    MissingField { field: &'static str },
    #[error("schedule field '{field}' has invalid value {value}")]
    InvalidField { field: &'static str, value: String },
}

impl Schedule {
    /// Parses a stored descriptor: `{"frequency", "hour", "minute", "day_of_week", "day_of_month"}`.
    ///
    /// `day_of_week` is `0` (Monday) through `6` (Sunday) or an English day name. A missing
    /// frequency means `once`.
    pub fn from_json(value: &JsonValue) -> Result<Self, ScheduleError> {
        let object = value.as_object().ok_or(ScheduleError::NotAnObject)?;

        let frequency = match object.get("frequency") {
            None | Some(JsonValue::Null) => Frequency::Once,
            Some(JsonValue::String(raw)) => parse_frequency(raw)?,
            Some(other) => return Err(ScheduleError::UnknownFrequency(other.to_string())),
        };

        let cadence = match frequency {
            Frequency::Once => return Ok(Schedule::Once),
            Frequency::Daily => Cadence::Daily,
            Frequency::Weekly => {
                let raw = required(object, "day_of_week")?;
                Cadence::Weekly(parse_weekday(raw)?)
            }
            Frequency::Monthly => {
                let raw = required(object, "day_of_month")?;
                let day = parse_integer("day_of_month", raw)?;
                if !(1..=31).contains(&day) {
                    return Err(invalid("day_of_month", raw));
                }
                Cadence::Monthly(day)
            }
        };

        let hour_raw = required(object, "hour")?;
        let hour = parse_integer("hour", hour_raw)?;
        if hour > 23 {
            return Err(invalid("hour", hour_raw));
        }

        let minute_raw = required(object, "minute")?;
        let minute = parse_integer("minute", minute_raw)?;
        if minute > 59 {
            return Err(invalid("minute", minute_raw));
        }

        Ok(Schedule::Recurring {
            cadence,
            hour,
            minute,
        })
    }

    pub fn frequency(&self) -> Frequency {
        match self {
            Schedule::Once => Frequency::Once,
            Schedule::Recurring { cadence, .. } => match cadence {
                Cadence::Daily => Frequency::Daily,
                Cadence::Weekly(_) => Frequency::Weekly,
                Cadence::Monthly(_) => Frequency::Monthly,
            },
        }
    }

    /// True when the local wall-clock minute equals the configured time exactly.
    pub fn matches_time(&self, now: &DateTime<FixedOffset>) -> bool {
        match self {
            Schedule::Once => false,
            Schedule::Recurring { hour, minute, .. } => {
                now.hour() == *hour && now.minute() == *minute
            }
        }
    }

    /// Frequency gate: daily always passes, weekly and monthly compare the calendar day.
    pub fn matches_day(&self, now: &DateTime<FixedOffset>) -> bool {
        match self {
            Schedule::Once => false,
            Schedule::Recurring { cadence, .. } => match cadence {
                Cadence::Daily => true,
                Cadence::Weekly(day) => now.weekday() == *day,
                Cadence::Monthly(day) => now.day() == *day,
            },
        }
    }
}

fn parse_frequency(raw: &str) -> Result<Frequency, ScheduleError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "" | "once" => Ok(Frequency::Once),
        "daily" => Ok(Frequency::Daily),
        "weekly" => Ok(Frequency::Weekly),
        "monthly" => Ok(Frequency::Monthly),
        other => Err(ScheduleError::UnknownFrequency(other.to_string())),
    }
}

fn required<'a>(
    object: &'a serde_json::Map<String, JsonValue>,
    field: &'static str,
) -> Result<&'a JsonValue, ScheduleError> {
    match object.get(field) {
        None | Some(JsonValue::Null) => Err(ScheduleError::MissingField { field }),
        Some(value) => Ok(value),
    }
}

fn invalid(field: &'static str, value: &JsonValue) -> ScheduleError {
    ScheduleError::InvalidField {
        field,
        value: value.to_string(),
    }
}

/// Accepts JSON integers and strings holding integers (`"09"`).
fn parse_integer(field: &'static str, value: &JsonValue) -> Result<u32, ScheduleError> {
    let parsed = match value {
        JsonValue::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
        JsonValue::String(s) => s.trim().parse::<u32>().ok(),
        _ => None,
    };
    parsed.ok_or_else(|| invalid(field, value))
}

fn parse_weekday(value: &JsonValue) -> Result<Weekday, ScheduleError> {
    if let JsonValue::String(s) = value {
        if let Ok(day) = s.trim().parse::<Weekday>() {
            return Ok(day);
        }
    }
    let index = parse_integer("day_of_week", value)?;
    u8::try_from(index)
        .ok()
        .and_then(|index| Weekday::try_from(index).ok())
        .ok_or_else(|| invalid("day_of_week", value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<FixedOffset> {
        FixedOffset::east_opt(0)
            .unwrap()
            .with_ymd_and_hms(y, m, d, h, min, 0)
            .unwrap()
    }

    #[test]
    fn parses_string_hour_and_minute() {
        let schedule =
            Schedule::from_json(&json!({"frequency": "daily", "hour": "09", "minute": "00"}))
                .unwrap();
        assert_eq!(
            schedule,
            Schedule::Recurring {
                cadence: Cadence::Daily,
                hour: 9,
                minute: 0
            }
        );
    }

    #[test]
    fn unparseable_time_is_an_error() {
        let err = Schedule::from_json(&json!({"frequency": "daily", "hour": "nine", "minute": 0}))
            .unwrap_err();
        assert!(matches!(err, ScheduleError::InvalidField { field: "hour", .. }));

        let err = Schedule::from_json(&json!({"frequency": "daily", "hour": 25, "minute": 0}))
            .unwrap_err();
        assert!(matches!(err, ScheduleError::InvalidField { field: "hour", .. }));
    }

    #[test]
    fn missing_frequency_is_once() {
        assert_eq!(Schedule::from_json(&json!({})).unwrap(), Schedule::Once);
        assert_eq!(
            Schedule::from_json(&json!({"frequency": "once", "hour": "x"})).unwrap(),
            Schedule::Once
        );
    }

    #[test]
    fn weekday_accepts_index_and_name() {
        let by_index = Schedule::from_json(
            &json!({"frequency": "weekly", "day_of_week": "2", "hour": 8, "minute": 30}),
        )
        .unwrap();
        let by_name = Schedule::from_json(
            &json!({"frequency": "weekly", "day_of_week": "wednesday", "hour": 8, "minute": 30}),
        )
        .unwrap();
        assert_eq!(by_index, by_name);
        assert_eq!(by_index.frequency(), Frequency::Weekly);
    }

    #[test]
    fn weekly_without_day_is_rejected() {
        let err =
            Schedule::from_json(&json!({"frequency": "weekly", "hour": 8, "minute": 0})).unwrap_err();
        assert_eq!(
            err,
            ScheduleError::MissingField {
                field: "day_of_week"
            }
        );
    }

    #[test]
    fn time_match_is_exact() {
        let schedule =
            Schedule::from_json(&json!({"frequency": "daily", "hour": 9, "minute": 0})).unwrap();
        assert!(schedule.matches_time(&at(2024, 3, 4, 9, 0)));
        assert!(!schedule.matches_time(&at(2024, 3, 4, 9, 1)));
        assert!(!schedule.matches_time(&at(2024, 3, 4, 8, 59)));
    }

    #[test]
    fn weekly_and_monthly_day_gates() {
        // 2024-03-04 is a Monday.
        let weekly = Schedule::from_json(
            &json!({"frequency": "weekly", "day_of_week": 0, "hour": 9, "minute": 0}),
        )
        .unwrap();
        assert!(weekly.matches_day(&at(2024, 3, 4, 9, 0)));
        assert!(!weekly.matches_day(&at(2024, 3, 5, 9, 0)));

        let monthly = Schedule::from_json(
            &json!({"frequency": "monthly", "day_of_month": "15", "hour": 9, "minute": 0}),
        )
        .unwrap();
        assert!(monthly.matches_day(&at(2024, 3, 15, 9, 0)));
        assert!(!monthly.matches_day(&at(2024, 3, 14, 9, 0)));
    }
}
