//! Recurring task schedules and their expansion into concrete run times.
//!
//! A schedule is read as "`frequency` times every `period` `unit`s starting at
//! `startDate`". Expansion works window by window, where window *k* covers
//! `[start + k·period, start + (k+1)·period)` (calendar months for
//! `months`), and produces the occurrences of each window in order:
//!
//! - Without `daysOfWeek`, `frequency` slots are spread evenly over the
//!   window. For day-granular units a slot lands on a whole day
//!   (`floor(i · days / frequency)`), so twice a week means days 1 and 4 of
//!   the window. When there are more slots than days and no `timesOfDay`,
//!   slots are spread over the window in seconds instead.
//! - With `daysOfWeek` on a `weeks`/`months` schedule the weekday list wins
//!   and `frequency` is advisory: every listed weekday in the first week
//!   (or first month) of the window is an occurrence. On shorter units the
//!   list filters the slot occurrences.
//! - `timesOfDay` turns each occurrence date into one occurrence per listed
//!   time; otherwise the time of `startDate` is used.
//! - `repetitions` caps the number of occurrences counted from `startDate`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use time::{Date, OffsetDateTime};
use tracing::debug;

use crate::duration::TimeUnit;
use crate::error::{CoreError, Result};
use crate::time::{DayOfWeek, TimeOfDay, add_months, lenient};

/// Expansion gives up once a run of empty windows is at least this long
/// in calendar time and has covered `MIN_EMPTY_WINDOWS` windows.
const MAX_EMPTY_SPAN: time::Duration = time::Duration::days(366);
const MIN_EMPTY_WINDOWS: u32 = 64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSchedule {
    /// Occurrences per period
    pub frequency: u32,
    pub period: u32,
    pub unit: TimeUnit,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repetitions: Option<u32>,
    #[serde(with = "lenient")]
    pub start_date: OffsetDateTime,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub days_of_week: Option<BTreeSet<DayOfWeek>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub times_of_day: Option<BTreeSet<TimeOfDay>>,
}

impl TaskSchedule {
    pub fn new(frequency: u32, period: u32, unit: TimeUnit, start_date: OffsetDateTime) -> Self {
        Self {
            frequency,
            period,
            unit,
            repetitions: None,
            start_date,
            days_of_week: None,
            times_of_day: None,
        }
    }

    pub fn with_repetitions(mut self, repetitions: u32) -> Self {
        self.repetitions = Some(repetitions);
        self
    }

    pub fn with_days_of_week(mut self, days: impl IntoIterator<Item = DayOfWeek>) -> Self {
        self.days_of_week = Some(days.into_iter().collect());
        self
    }

    pub fn with_times_of_day(mut self, times: impl IntoIterator<Item = TimeOfDay>) -> Self {
        self.times_of_day = Some(times.into_iter().collect());
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.frequency == 0 {
            return Err(CoreError::invalid_schedule("frequency must be > 0"));
        }
        if self.period == 0 {
            return Err(CoreError::invalid_schedule("period must be > 0"));
        }
        if self.repetitions == Some(0) {
            return Err(CoreError::invalid_schedule("repetitions must be > 0 when set"));
        }
        if self.days_of_week.as_ref().is_some_and(|d| d.is_empty()) {
            return Err(CoreError::invalid_schedule("daysOfWeek must not be empty when set"));
        }
        if let Some(times) = &self.times_of_day {
            if times.is_empty() {
                return Err(CoreError::invalid_schedule("timesOfDay must not be empty when set"));
            }
            if self.unit.is_sub_day() {
                return Err(CoreError::invalid_schedule(format!(
                    "timesOfDay cannot be combined with a '{}' schedule",
                    self.unit
                )));
            }
        }
        Ok(())
    }

    /// The next `count` occurrences at or after `from`.
    ///
    /// Pure: identical arguments always give identical results. Never yields
    /// a time before `startDate`.
    pub fn next_occurrences(&self, from: OffsetDateTime, count: usize) -> Result<Vec<OffsetDateTime>> {
        next_occurrences(self, from, count)
    }

    fn window_start(&self, index: u64) -> Result<OffsetDateTime> {
        let steps = index
            .checked_mul(u64::from(self.period))
            .ok_or_else(|| CoreError::invalid_schedule("schedule window index overflows"))?;
        match self.unit {
            TimeUnit::Months => {
                let months = u32::try_from(steps)
                    .map_err(|_| CoreError::invalid_schedule("schedule window index overflows"))?;
                add_months(self.start_date, months)
            }
            unit => {
                let step = unit.to_duration(1);
                let offset = i64::try_from(steps)
                    .ok()
                    .and_then(|n| step.checked_mul(i32::try_from(n).ok()?))
                    .ok_or_else(|| CoreError::invalid_schedule("schedule window index overflows"))?;
                self.start_date
                    .checked_add(offset)
                    .ok_or_else(|| CoreError::invalid_schedule("schedule window overflows"))
            }
        }
    }

    /// First window that can contain an occurrence at or after `from`.
    ///
    /// Only valid when occurrences need not be counted from the start.
    fn first_relevant_window(&self, from: OffsetDateTime) -> u64 {
        if from <= self.start_date {
            return 0;
        }
        let windows = match self.unit {
            TimeUnit::Months => {
                let start = self.start_date.date();
                let target = from.date();
                let months = (i64::from(target.year()) - i64::from(start.year())) * 12
                    + (target.month() as i64 - start.month() as i64);
                months / i64::from(self.period)
            }
            unit => {
                let window = unit.to_duration(self.period).whole_seconds();
                (from - self.start_date).whole_seconds() / window.max(1)
            }
        };
        // Step back one window so slots spread across a window boundary are kept.
        u64::try_from(windows - 1).unwrap_or(0)
    }

    fn occurrences_in_window(
        &self,
        window_start: OffsetDateTime,
        window_end: OffsetDateTime,
    ) -> Vec<OffsetDateTime> {
        let mut out = match self.unit {
            TimeUnit::Minutes | TimeUnit::Hours => self.spread_seconds(window_start, window_end),
            TimeUnit::Days | TimeUnit::Weeks | TimeUnit::Months => {
                self.day_granular(window_start, window_end)
            }
        };

        if let Some(days) = &self.days_of_week
            && !self.weekdays_select_dates()
        {
            out.retain(|at| days.contains(&DayOfWeek::from(at.weekday())));
        }

        out.retain(|at| *at >= self.start_date && *at < window_end);
        out.sort();
        out.dedup();
        out
    }

    /// Weekday lists pick the dates themselves on week/month schedules.
    fn weekdays_select_dates(&self) -> bool {
        self.days_of_week.is_some() && matches!(self.unit, TimeUnit::Weeks | TimeUnit::Months)
    }

    fn spread_seconds(&self, window_start: OffsetDateTime, window_end: OffsetDateTime) -> Vec<OffsetDateTime> {
        let window_secs = (window_end - window_start).whole_seconds();
        let frequency = i64::from(self.frequency);
        (0..frequency)
            .map(|i| window_start + time::Duration::seconds(i * window_secs / frequency))
            .collect()
    }

    fn day_granular(&self, window_start: OffsetDateTime, window_end: OffsetDateTime) -> Vec<OffsetDateTime> {
        let first_day = window_start.date();
        let window_days = (window_end.date() - first_day).whole_days().max(1);

        let dates: Vec<Date> = if self.weekdays_select_dates() {
            let span_end = match self.unit {
                TimeUnit::Weeks => first_day + time::Duration::days(7),
                _ => add_months(window_start, 1)
                    .map(|d| d.date())
                    .unwrap_or(window_end.date()),
            };
            let span_end = span_end.min(window_end.date());
            let days = self.days_of_week.as_ref();
            let mut dates = Vec::new();
            let mut day = first_day;
            while day < span_end {
                if days.is_some_and(|set| set.contains(&DayOfWeek::from(day.weekday()))) {
                    dates.push(day);
                }
                day = match day.next_day() {
                    Some(next) => next,
                    None => break,
                };
            }
            dates
        } else if self.times_of_day.is_none() && i64::from(self.frequency) > window_days {
            return self.spread_seconds(window_start, window_end);
        } else {
            let frequency = i64::from(self.frequency);
            let mut dates: Vec<Date> = (0..frequency)
                .map(|i| first_day + time::Duration::days(i * window_days / frequency))
                .collect();
            dates.dedup();
            dates
        };

        match &self.times_of_day {
            Some(times) => dates
                .iter()
                .flat_map(|date| {
                    times
                        .iter()
                        .map(move |t| window_start.replace_date(*date).replace_time(t.time()))
                })
                .collect(),
            None => dates
                .into_iter()
                .map(|date| window_start.replace_date(date))
                .collect(),
        }
    }
}

/// Compute the next `count` run timestamps at or after `from`.
pub fn next_occurrences(
    schedule: &TaskSchedule,
    from: OffsetDateTime,
    count: usize,
) -> Result<Vec<OffsetDateTime>> {
    schedule.validate()?;

    let mut out = Vec::with_capacity(count);
    if count == 0 {
        return Ok(out);
    }

    // With a repetition cap every occurrence since the start must be counted.
    let mut index = match schedule.repetitions {
        Some(_) => 0,
        None => schedule.first_relevant_window(from),
    };
    let mut emitted: u32 = 0;
    let mut empty_windows: u32 = 0;
    let mut empty_since: Option<OffsetDateTime> = None;

    loop {
        let window_start = schedule.window_start(index)?;
        let window_end = schedule.window_start(index + 1)?;
        let occurrences = schedule.occurrences_in_window(window_start, window_end);

        if occurrences.is_empty() {
            empty_windows = empty_windows.saturating_add(1);
            let since = *empty_since.get_or_insert(window_start);
            if empty_windows >= MIN_EMPTY_WINDOWS && window_end - since >= MAX_EMPTY_SPAN {
                debug!(
                    windows = empty_windows,
                    "Schedule produced no occurrences, stopping expansion"
                );
                return Ok(out);
            }
        } else {
            empty_windows = 0;
            empty_since = None;
        }

        for at in occurrences {
            if let Some(limit) = schedule.repetitions
                && emitted >= limit
            {
                return Ok(out);
            }
            emitted += 1;

            if at >= from {
                out.push(at);
                if out.len() == count {
                    return Ok(out);
                }
            }
        }

        index += 1;
    }
}
