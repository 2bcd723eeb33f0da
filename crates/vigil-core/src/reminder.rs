//! Reminder and fallback timing.
//!
//! Both triggers are derived from the current slot state and the clock. They
//! never touch the slot; the only state kept here is which reminder offsets
//! have already fired, owned by the calling client.

use std::collections::HashMap;

use chrono::{DateTime, Duration, FixedOffset, NaiveDateTime, Utc};

use crate::slot::{Slot, SlotStatus};
use crate::time::to_local;

/// Remembers the occurrence start each (slot, offset) last fired for.
#[derive(Debug, Clone, Default)]
pub struct ReminderTracker {
    last_fired: HashMap<(String, u32), NaiveDateTime>,
}

impl ReminderTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_fired(&self, slot_id: &str, offset_minutes: u32) -> Option<NaiveDateTime> {
        self.last_fired
            .get(&(slot_id.to_string(), offset_minutes))
            .copied()
    }

    /// Drop entries for slots no longer being evaluated.
    pub fn retain_slots(&mut self, live: &[&str]) {
        self.last_fired
            .retain(|(slot_id, _), _| live.contains(&slot_id.as_str()));
    }
}

/// Offsets (minutes before the window start) that are due now.
///
/// Each offset fires at most once per occurrence, inside its band
/// `[start - offset, start - next smaller offset)`. A client that starts late
/// does not replay offsets whose band has already passed.
pub fn reminder_due(
    slot: &Slot,
    now: DateTime<Utc>,
    offset: FixedOffset,
    offsets_minutes: &[u32],
    tracker: &mut ReminderTracker,
) -> Vec<u32> {
    if slot.owner.is_none()
        || !matches!(slot.effective_status(now), SlotStatus::Active | SlotStatus::Missed)
    {
        return Vec::new();
    }

    let local_now = to_local(now, offset);
    let start = slot.window.next_start(local_now);

    let mut sorted: Vec<u32> = offsets_minutes.iter().copied().filter(|m| *m > 0).collect();
    sorted.sort_unstable();
    sorted.dedup();

    let mut due = Vec::new();
    for (i, &minutes) in sorted.iter().enumerate() {
        let band_start = start - Duration::minutes(minutes as i64);
        let band_end = match i {
            0 => start,
            _ => start - Duration::minutes(sorted[i - 1] as i64),
        };
        if local_now < band_start || local_now >= band_end {
            continue;
        }
        let key = (slot.id.clone(), minutes);
        if tracker.last_fired.get(&key) == Some(&start) {
            continue;
        }
        tracker.last_fired.insert(key, start);
        due.push(minutes);
    }
    due.sort_unstable_by(|a, b| b.cmp(a));
    due
}

/// Whether substitute content should play for this slot right now.
///
/// True while `now` is inside the window and the slot is not (effectively)
/// Active; a skip whose expiry has lapsed counts as Active.
pub fn fallback_active(slot: &Slot, now: DateTime<Utc>, offset: FixedOffset) -> bool {
    slot.window.contains(to_local(now, offset)) && slot.effective_status(now) != SlotStatus::Active
}

/// Turns per-tick `fallback_active` values into transitions.
#[derive(Debug, Clone, Default)]
pub struct FallbackMonitor {
    previous: HashMap<String, bool>,
}

impl FallbackMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the current value; returns it if it differs from the last one seen.
    /// The first observation of an inactive slot is not a transition.
    pub fn observe(&mut self, slot_id: &str, active: bool) -> Option<bool> {
        let previous = self.previous.insert(slot_id.to_string(), active);
        match previous {
            Some(was) if was == active => None,
            None if !active => None,
            _ => Some(active),
        }
    }

    pub fn is_active(&self, slot_id: &str) -> bool {
        self.previous.get(slot_id).copied().unwrap_or(false)
    }
}
