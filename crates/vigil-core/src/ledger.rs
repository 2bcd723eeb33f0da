//! Attendance ledger records.
//!
//! One record per scheduled occurrence, attended or not. Records are never
//! updated; (slot_id, date) is unique and enforced by the store.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::time::TimeWindow;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttendanceRecord {
    pub slot_id: String,
    /// Owner of the slot when the occurrence took place.
    pub user_id: String,
    pub window: TimeWindow,
    /// Local calendar date of the occurrence.
    pub date: NaiveDate,
    pub attended: bool,
    pub duration_secs: u32,
    pub recorded_at: DateTime<Utc>,
}

impl AttendanceRecord {
    pub fn duration(&self) -> Duration {
        Duration::seconds(self.duration_secs as i64)
    }
}

/// Query over the ledger. Unset fields match everything; date bounds are inclusive.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttendanceFilter {
    pub slot_id: Option<String>,
    pub user_id: Option<String>,
    pub window: Option<TimeWindow>,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    pub attended: Option<bool>,
}

impl AttendanceFilter {
    pub fn for_slot(slot_id: impl Into<String>) -> Self {
        Self {
            slot_id: Some(slot_id.into()),
            ..Self::default()
        }
    }

    pub fn for_user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            ..Self::default()
        }
    }

    pub fn for_window(window: TimeWindow) -> Self {
        Self {
            window: Some(window),
            ..Self::default()
        }
    }

    pub fn between(mut self, from: NaiveDate, to: NaiveDate) -> Self {
        self.from = Some(from);
        self.to = Some(to);
        self
    }

    pub fn matches(&self, record: &AttendanceRecord) -> bool {
        self.slot_id.as_ref().map_or(true, |id| *id == record.slot_id)
            && self.user_id.as_ref().map_or(true, |id| *id == record.user_id)
            && self.window.map_or(true, |w| w == record.window)
            && self.from.map_or(true, |d| record.date >= d)
            && self.to.map_or(true, |d| record.date <= d)
            && self.attended.map_or(true, |a| a == record.attended)
    }
}
