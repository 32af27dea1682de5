//! Date/time helpers shared by the model, the schedule expander and the
//! reactive engine.
//!
//! Timestamps are plain `OffsetDateTime` values serialized as RFC 3339.
//! This module adds the two calendar vocabularies the care plan needs on
//! top of that: a wall-clock [`TimeOfDay`] written as `"HH:mm"` and a
//! [`DayOfWeek`] written in lowercase.

use crate::error::{CoreError, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{Date, Month, OffsetDateTime, Time, Weekday};

pub fn now_utc() -> OffsetDateTime {
    OffsetDateTime::now_utc()
}

/// Parse an RFC 3339 timestamp. A bare `YYYY-MM-DD` date is read as
/// midnight UTC.
pub fn parse_datetime(s: &str) -> Result<OffsetDateTime> {
    if let Ok(parsed) = OffsetDateTime::parse(s, &Rfc3339) {
        return Ok(parsed);
    }
    Date::parse(s, &format_description!("[year]-[month]-[day]"))
        .map(|date| date.midnight().assume_utc())
        .map_err(|e| CoreError::invalid_date_time(format!("Failed to parse date/time '{s}': {e}")))
}

/// Format a timestamp as RFC 3339.
pub fn format_datetime(value: OffsetDateTime) -> String {
    value
        .format(&Rfc3339)
        .unwrap_or_else(|_| value.unix_timestamp().to_string())
}

/// Number of days in the given calendar month.
pub fn days_in_month(year: i32, month: Month) -> u8 {
    let (next_year, next_month) = match month {
        Month::December => (year + 1, Month::January),
        other => (year, other.next()),
    };
    Date::from_calendar_date(next_year, next_month, 1)
        .ok()
        .and_then(|first| first.previous_day())
        .map(|last| last.day())
        .unwrap_or(28)
}

/// Add whole calendar months, clamping the day to the target month's length.
pub fn add_months(value: OffsetDateTime, months: u32) -> Result<OffsetDateTime> {
    let date = value.date();
    let zero_based = date.month() as i64 - 1 + i64::from(months);
    let year = i64::from(date.year()) + zero_based.div_euclid(12);
    let year = i32::try_from(year)
        .map_err(|_| CoreError::invalid_date_time(format!("year {year} out of range")))?;
    let month_index = u8::try_from(zero_based.rem_euclid(12) + 1).unwrap_or(1);
    let month = Month::try_from(month_index)
        .map_err(|e| CoreError::invalid_date_time(e.to_string()))?;
    let day = date.day().min(days_in_month(year, month));
    let shifted = Date::from_calendar_date(year, month, day)
        .map_err(|e| CoreError::invalid_date_time(e.to_string()))?;
    Ok(value.replace_date(shifted))
}

/// Serde adapter for timestamps written either as RFC 3339 or as a bare date.
pub mod lenient {
    use serde::{Deserialize, Deserializer, Serializer};
    use time::OffsetDateTime;

    pub fn serialize<S>(value: &OffsetDateTime, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&super::format_datetime(*value))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<OffsetDateTime, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        super::parse_datetime(&s).map_err(serde::de::Error::custom)
    }

    pub mod option {
        use serde::{Deserialize, Deserializer, Serializer};
        use time::OffsetDateTime;

        pub fn serialize<S>(value: &Option<OffsetDateTime>, serializer: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            match value {
                Some(v) => serializer.serialize_some(&crate::time::format_datetime(*v)),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<OffsetDateTime>, D::Error>
        where
            D: Deserializer<'de>,
        {
            let opt: Option<String> = Option::deserialize(deserializer)?;
            opt.map(|s| crate::time::parse_datetime(&s).map_err(serde::de::Error::custom))
                .transpose()
        }
    }
}

// ============================================================================
// Time of day
// ============================================================================

/// Wall-clock time written as `"HH:mm"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimeOfDay(Time);

impl TimeOfDay {
    pub fn new(hour: u8, minute: u8) -> Result<Self> {
        Time::from_hms(hour, minute, 0)
            .map(Self)
            .map_err(|e| CoreError::invalid_time_of_day(format!("{hour:02}:{minute:02}: {e}")))
    }

    pub fn time(&self) -> Time {
        self.0
    }

    pub fn hour(&self) -> u8 {
        self.0.hour()
    }

    pub fn minute(&self) -> u8 {
        self.0.minute()
    }

    /// Place this time of day on the date of `at`, keeping its offset.
    pub fn on_date_of(&self, at: OffsetDateTime) -> OffsetDateTime {
        at.replace_time(self.0)
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.0.hour(), self.0.minute())
    }
}

impl FromStr for TimeOfDay {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        let format = format_description!("[hour]:[minute]");
        Time::parse(s.trim(), &format)
            .map(Self)
            .map_err(|e| CoreError::invalid_time_of_day(format!("'{s}': {e}")))
    }
}

impl Serialize for TimeOfDay {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for TimeOfDay {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        TimeOfDay::from_str(&s).map_err(serde::de::Error::custom)
    }
}

// ============================================================================
// Day of week
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DayOfWeek {
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
    Saturday,
    Sunday,
}

impl DayOfWeek {
    pub fn as_str(&self) -> &'static str {
        match self {
            DayOfWeek::Monday => "monday",
            DayOfWeek::Tuesday => "tuesday",
            DayOfWeek::Wednesday => "wednesday",
            DayOfWeek::Thursday => "thursday",
            DayOfWeek::Friday => "friday",
            DayOfWeek::Saturday => "saturday",
            DayOfWeek::Sunday => "sunday",
        }
    }

    pub fn weekday(&self) -> Weekday {
        match self {
            DayOfWeek::Monday => Weekday::Monday,
            DayOfWeek::Tuesday => Weekday::Tuesday,
            DayOfWeek::Wednesday => Weekday::Wednesday,
            DayOfWeek::Thursday => Weekday::Thursday,
            DayOfWeek::Friday => Weekday::Friday,
            DayOfWeek::Saturday => Weekday::Saturday,
            DayOfWeek::Sunday => Weekday::Sunday,
        }
    }
}

impl From<Weekday> for DayOfWeek {
    fn from(weekday: Weekday) -> Self {
        match weekday {
            Weekday::Monday => DayOfWeek::Monday,
            Weekday::Tuesday => DayOfWeek::Tuesday,
            Weekday::Wednesday => DayOfWeek::Wednesday,
            Weekday::Thursday => DayOfWeek::Thursday,
            Weekday::Friday => DayOfWeek::Friday,
            Weekday::Saturday => DayOfWeek::Saturday,
            Weekday::Sunday => DayOfWeek::Sunday,
        }
    }
}

impl fmt::Display for DayOfWeek {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
