use serde::{Deserialize, Serialize};
use std::fmt;
use time::OffsetDateTime;

use crate::error::{CoreError, Result};
use crate::time::add_months;

/// Unit used by schedules, offsets and delays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeUnit {
    Minutes,
    Hours,
    Days,
    Weeks,
    Months,
}

impl TimeUnit {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeUnit::Minutes => "minutes",
            TimeUnit::Hours => "hours",
            TimeUnit::Days => "days",
            TimeUnit::Weeks => "weeks",
            TimeUnit::Months => "months",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "minutes" => Some(TimeUnit::Minutes),
            "hours" => Some(TimeUnit::Hours),
            "days" => Some(TimeUnit::Days),
            "weeks" => Some(TimeUnit::Weeks),
            "months" => Some(TimeUnit::Months),
            _ => None,
        }
    }

    /// Whether the unit is shorter than a day.
    pub fn is_sub_day(&self) -> bool {
        matches!(self, TimeUnit::Minutes | TimeUnit::Hours)
    }

    /// Fixed-length approximation; a month counts as 30 days.
    pub fn to_duration(&self, value: u32) -> time::Duration {
        let value = i64::from(value);
        match self {
            TimeUnit::Minutes => time::Duration::minutes(value),
            TimeUnit::Hours => time::Duration::hours(value),
            TimeUnit::Days => time::Duration::days(value),
            TimeUnit::Weeks => time::Duration::weeks(value),
            TimeUnit::Months => time::Duration::days(value * 30),
        }
    }
}

impl fmt::Display for TimeUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// `{ value, unit }` pair used for offsets, windows and delays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DurationSpec {
    pub value: u32,
    pub unit: TimeUnit,
}

impl DurationSpec {
    pub fn new(value: u32, unit: TimeUnit) -> Self {
        Self { value, unit }
    }

    pub fn minutes(value: u32) -> Self {
        Self::new(value, TimeUnit::Minutes)
    }

    pub fn hours(value: u32) -> Self {
        Self::new(value, TimeUnit::Hours)
    }

    pub fn days(value: u32) -> Self {
        Self::new(value, TimeUnit::Days)
    }

    pub fn is_zero(&self) -> bool {
        self.value == 0
    }

    pub fn to_duration(&self) -> time::Duration {
        self.unit.to_duration(self.value)
    }

    /// Add this span to `at`. Months step by calendar month.
    pub fn after(&self, at: OffsetDateTime) -> Result<OffsetDateTime> {
        match self.unit {
            TimeUnit::Months => add_months(at, self.value),
            _ => at
                .checked_add(self.to_duration())
                .ok_or_else(|| CoreError::invalid_date_time(format!("{at} + {self} overflows"))),
        }
    }
}

impl fmt::Display for DurationSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.value, self.unit)
    }
}
