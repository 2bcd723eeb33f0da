//! Time utilities for recurring daily slot windows.
//!
//! Everything here works on *local* wall-clock values. Instants are
//! normalized with [`to_local`] using the configured UTC offset before any
//! day-boundary logic runs, so ledger dates, streaks and countdowns agree on
//! what "today" is.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// A fixed recurring daily window, `[start, end)` in local time.
///
/// `end < start` means the window crosses midnight (e.g. `23:30-00:30`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TimeWindow {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl TimeWindow {
    pub fn new(start: NaiveTime, end: NaiveTime) -> Result<Self, ValidationError> {
        if start == end {
            return Err(ValidationError::InvalidWindow {
                input: format!("{}-{}", start.format("%H:%M"), end.format("%H:%M")),
                message: "start and end must differ".into(),
            });
        }
        Ok(Self { start, end })
    }

    /// Parse `"HH:MM-HH:MM"`. An en dash separator and `HH:MM:SS` are accepted.
    pub fn parse(input: &str) -> Result<Self, ValidationError> {
        let invalid = |message: &str| ValidationError::InvalidWindow {
            input: input.to_string(),
            message: message.to_string(),
        };

        let normalized = input.trim().replace('\u{2013}', "-");
        let (start, end) = normalized
            .split_once('-')
            .ok_or_else(|| invalid("expected START-END"))?;
        let start = parse_time_of_day(start.trim()).ok_or_else(|| invalid("bad start time"))?;
        let end = parse_time_of_day(end.trim()).ok_or_else(|| invalid("bad end time"))?;
        Self::new(start, end).map_err(|_| invalid("start and end must differ"))
    }

    pub fn crosses_midnight(&self) -> bool {
        self.end < self.start
    }

    /// Length of one occurrence.
    pub fn duration(&self) -> Duration {
        let raw = self.end - self.start;
        if self.crosses_midnight() {
            raw + Duration::days(1)
        } else {
            raw
        }
    }

    /// Start instant of the occurrence scheduled on `date`.
    pub fn occurrence_start(&self, date: NaiveDate) -> NaiveDateTime {
        date.and_time(self.start)
    }

    /// End instant of the occurrence scheduled on `date` (may fall on the next day).
    pub fn occurrence_end(&self, date: NaiveDate) -> NaiveDateTime {
        self.occurrence_start(date) + self.duration()
    }

    /// Start of the occurrence that contains `now`, if `now` is inside one.
    ///
    /// For a window crossing midnight, an early-morning `now` belongs to the
    /// occurrence that started the previous day.
    pub fn occurrence_containing(&self, now: NaiveDateTime) -> Option<NaiveDateTime> {
        let today = now.date();
        let candidates = [today, today - Duration::days(1)];
        candidates
            .into_iter()
            .map(|date| self.occurrence_start(date))
            .find(|start| *start <= now && now < *start + self.duration())
    }

    pub fn contains(&self, now: NaiveDateTime) -> bool {
        self.occurrence_containing(now).is_some()
    }

    /// Start of the next occurrence: today's if it has not passed yet, else tomorrow's.
    pub fn next_start(&self, now: NaiveDateTime) -> NaiveDateTime {
        next_occurrence(now, self.start)
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{}",
            self.start.format("%H:%M"),
            self.end.format("%H:%M")
        )
    }
}

impl FromStr for TimeWindow {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for TimeWindow {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<TimeWindow> for String {
    fn from(window: TimeWindow) -> Self {
        window.to_string()
    }
}

fn parse_time_of_day(s: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(s, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M"))
        .ok()
}

/// Remaining time split for display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Countdown {
    pub hours: u32,
    pub minutes: u32,
    pub seconds: u32,
}

impl Countdown {
    /// Split a duration; negative or zero durations clamp to `{0, 0, 0}`.
    pub fn from_duration(d: Duration) -> Self {
        let total = d.num_seconds().max(0);
        Self {
            hours: (total / 3600) as u32,
            minutes: ((total % 3600) / 60) as u32,
            seconds: (total % 60) as u32,
        }
    }

    pub fn total_seconds(&self) -> u64 {
        self.hours as u64 * 3600 + self.minutes as u64 * 60 + self.seconds as u64
    }

    pub fn is_zero(&self) -> bool {
        self.total_seconds() == 0
    }
}

impl fmt::Display for Countdown {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}:{:02}", self.hours, self.minutes, self.seconds)
    }
}

/// Next occurrence of `start` at or after `now`. Strictly-passed starts roll to tomorrow.
pub fn next_occurrence(now: NaiveDateTime, start: NaiveTime) -> NaiveDateTime {
    let today = now.date().and_time(start);
    if now > today {
        today + Duration::days(1)
    } else {
        today
    }
}

/// Time left until the next occurrence of `window_start`.
///
/// Stateless: callers re-derive the value on every tick instead of
/// decrementing a counter.
pub fn remaining(now: NaiveDateTime, window_start: NaiveTime) -> Countdown {
    Countdown::from_duration(next_occurrence(now, window_start) - now)
}

/// Countdown for a textual window; `None` means "no active countdown".
pub fn countdown_for(now: NaiveDateTime, window: &str) -> Option<Countdown> {
    TimeWindow::parse(window)
        .ok()
        .map(|w| remaining(now, w.start))
}

/// Elapsed time between two instants, clamped at zero for clock skew.
pub fn elapsed(since: NaiveDateTime, now: NaiveDateTime) -> Duration {
    (now - since).max(Duration::zero())
}

/// Fixed offset from minutes east of UTC. Out-of-range values yield `None`.
pub fn offset_from_minutes(minutes: i32) -> Option<FixedOffset> {
    FixedOffset::east_opt(minutes.checked_mul(60)?)
}

/// Convert an instant to local wall-clock time.
pub fn to_local(instant: DateTime<Utc>, offset: FixedOffset) -> NaiveDateTime {
    instant.with_timezone(&offset).naive_local()
}

/// Local calendar date of an instant.
pub fn local_date(instant: DateTime<Utc>, offset: FixedOffset) -> NaiveDate {
    to_local(instant, offset).date()
}
