//! Window coverage over a rolling lookback.

use std::collections::BTreeMap;

use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::ledger::AttendanceRecord;
use crate::time::TimeWindow;

/// Aggregate for one window over the lookback period ending `today`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoverageSnapshot {
    pub window: TimeWindow,
    pub lookback_days: u32,
    /// Dates with at least one scheduled occurrence.
    pub scheduled_occurrences: u32,
    /// Dates where at least one intercessor attended.
    pub covered_occurrences: u32,
    pub total_records: u32,
    pub attended_records: u32,
    pub coverage_percent: u32,
    pub attendance_percent: u32,
}

/// Rounded integer percentage; an empty denominator yields 0.
pub fn percent(numerator: u32, denominator: u32) -> u32 {
    if denominator == 0 {
        return 0;
    }
    (numerator as f64 * 100.0 / denominator as f64).round() as u32
}

/// First local date of the lookback ending `today`, clamped to the calendar.
/// A zero lookback starts after `today`, leaving nothing in range.
pub fn lookback_start(today: NaiveDate, lookback_days: u32) -> NaiveDate {
    match lookback_days.checked_sub(1) {
        Some(back) => today
            .checked_sub_days(Days::new(back.into()))
            .unwrap_or(NaiveDate::MIN),
        None => today.succ_opt().unwrap_or(NaiveDate::MAX),
    }
}

/// Coverage of `window` over local dates `(today - lookback_days, today]`.
///
/// `records` may contain other windows; they are ignored.
pub fn compute_coverage(
    records: &[AttendanceRecord],
    window: TimeWindow,
    lookback_days: u32,
    today: NaiveDate,
) -> CoverageSnapshot {
    let first_day = lookback_start(today, lookback_days);

    // date -> attended by anyone
    let mut occurrences: BTreeMap<NaiveDate, bool> = BTreeMap::new();
    let mut total_records = 0;
    let mut attended_records = 0;

    let in_scope = records
        .iter()
        .filter(|r| r.window == window && r.date >= first_day && r.date <= today);
    for record in in_scope {
        total_records += 1;
        if record.attended {
            attended_records += 1;
        }
        *occurrences.entry(record.date).or_insert(false) |= record.attended;
    }

    let scheduled_occurrences = occurrences.len() as u32;
    let covered_occurrences = occurrences.values().filter(|covered| **covered).count() as u32;

    CoverageSnapshot {
        window,
        lookback_days,
        scheduled_occurrences,
        covered_occurrences,
        total_records,
        attended_records,
        coverage_percent: percent(covered_occurrences, scheduled_occurrences),
        attendance_percent: percent(attended_records, total_records),
    }
}
