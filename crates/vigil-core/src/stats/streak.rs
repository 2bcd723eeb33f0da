//! Day streaks and monthly session counts.

use std::collections::BTreeSet;

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::ledger::AttendanceRecord;

/// Per-user progress for display. Derived on demand, never stored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProgress {
    pub sessions_this_month: u32,
    pub day_streak: u32,
    pub best_streak: u32,
}

impl UserProgress {
    /// Compute progress from one user's records as of the local date `today`.
    pub fn compute(records: &[AttendanceRecord], today: NaiveDate) -> Self {
        Self {
            sessions_this_month: compute_monthly_sessions(records, today.month(), today.year()),
            day_streak: compute_streak(records, today),
            best_streak: compute_best_streak(records),
        }
    }
}

fn attended_dates(records: &[AttendanceRecord]) -> BTreeSet<NaiveDate> {
    records
        .iter()
        .filter(|r| r.attended)
        .map(|r| r.date)
        .collect()
}

/// Consecutive attended days ending at the most recent attended date on or
/// before `today`.
///
/// Returns 0 when that date is more than one day before `today`; a streak
/// survives a day that simply has not been recorded yet.
pub fn compute_streak(records: &[AttendanceRecord], today: NaiveDate) -> u32 {
    let dates = attended_dates(records);
    let mut days = dates.range(..=today).rev();

    let Some(&latest) = days.next() else {
        return 0;
    };
    if (today - latest).num_days() > 1 {
        return 0;
    }

    let mut streak = 1;
    let mut expected = latest;
    for &date in days {
        match expected.pred_opt() {
            Some(prev) if prev == date => {
                streak += 1;
                expected = date;
            }
            _ => break,
        }
    }
    streak
}

/// Longest run of consecutive attended days anywhere in the history.
pub fn compute_best_streak(records: &[AttendanceRecord]) -> u32 {
    let mut best = 0;
    let mut run = 0;
    let mut previous: Option<NaiveDate> = None;

    for date in attended_dates(records) {
        run = match previous.and_then(|p| p.succ_opt()) {
            Some(next) if next == date => run + 1,
            _ => 1,
        };
        best = best.max(run);
        previous = Some(date);
    }
    best
}

/// Attended records whose date falls in `month`/`year`.
pub fn compute_monthly_sessions(records: &[AttendanceRecord], month: u32, year: i32) -> u32 {
    records
        .iter()
        .filter(|r| r.attended && r.date.month() == month && r.date.year() == year)
        .count() as u32
}
