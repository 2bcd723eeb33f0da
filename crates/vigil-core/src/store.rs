//! Persistence boundary.
//!
//! [`SlotStore`] is the only way the rest of the crate reads or writes slots
//! and attendance. Saves are optimistic: a save carries the version the
//! caller loaded, and the store rejects it with `Conflict` if another writer
//! got there first.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use chrono::NaiveDate;

use crate::error::{CoreError, Result};
use crate::ledger::{AttendanceFilter, AttendanceRecord};
use crate::slot::Slot;

pub trait SlotStore: Send + Sync {
    /// Fails with `NotFound` for unknown ids.
    fn load_slot(&self, id: &str) -> Result<Slot>;

    /// Persist a new slot. Fails with `Conflict` if the id is taken or the
    /// owner already holds another slot for the same window.
    fn insert_slot(&self, slot: &Slot) -> Result<()>;

    /// Replace the stored slot if its version still equals `expected_version`.
    ///
    /// Returns the new version. The held-slot uniqueness rule of
    /// [`insert_slot`](Self::insert_slot) applies here too.
    fn save_slot(&self, slot: &Slot, expected_version: u64) -> Result<u64>;

    fn list_slots(&self) -> Result<Vec<Slot>>;

    /// Append one record. Fails with `DuplicateRecord` if (slot, date) exists.
    fn append_attendance(&self, record: &AttendanceRecord) -> Result<()>;

    /// Matching records ordered by date, then slot id.
    fn query_attendance(&self, filter: &AttendanceFilter) -> Result<Vec<AttendanceRecord>>;
}

#[derive(Debug, Default)]
struct MemoryState {
    slots: HashMap<String, Slot>,
    attendance: Vec<AttendanceRecord>,
    keys: HashSet<(String, NaiveDate)>,
}

/// In-process store, used by tests and by embedders without a database.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn held_elsewhere(state: &MemoryState, slot: &Slot) -> bool {
        let Some(owner) = slot.owner.as_deref() else {
            return false;
        };
        slot.status.is_held()
            && state.slots.values().any(|other| {
                other.id != slot.id
                    && other.status.is_held()
                    && other.window == slot.window
                    && other.owner.as_deref() == Some(owner)
            })
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        // Every write is a single map/vec insert, so a poisoned lock still holds
        // consistent data.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl SlotStore for MemoryStore {
    fn load_slot(&self, id: &str) -> Result<Slot> {
        self.state()
            .slots
            .get(id)
            .cloned()
            .ok_or_else(|| CoreError::slot_not_found(id))
    }

    fn insert_slot(&self, slot: &Slot) -> Result<()> {
        let mut state = self.state();
        if state.slots.contains_key(&slot.id) {
            return Err(CoreError::conflict(&slot.id, "slot id already exists"));
        }
        if Self::held_elsewhere(&state, slot) {
            return Err(CoreError::conflict(&slot.id, "owner already holds this window"));
        }
        state.slots.insert(slot.id.clone(), slot.clone());
        Ok(())
    }

    fn save_slot(&self, slot: &Slot, expected_version: u64) -> Result<u64> {
        let mut state = self.state();
        if Self::held_elsewhere(&state, slot) {
            return Err(CoreError::conflict(&slot.id, "owner already holds this window"));
        }
        let stored = state
            .slots
            .get_mut(&slot.id)
            .ok_or_else(|| CoreError::slot_not_found(&slot.id))?;
        if stored.version != expected_version {
            return Err(CoreError::conflict(
                &slot.id,
                format!(
                    "expected version {expected_version}, found {}",
                    stored.version
                ),
            ));
        }
        let mut next = slot.clone();
        next.version = expected_version + 1;
        *stored = next;
        Ok(expected_version + 1)
    }

    fn list_slots(&self) -> Result<Vec<Slot>> {
        let mut slots: Vec<Slot> = self.state().slots.values().cloned().collect();
        slots.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(slots)
    }

    fn append_attendance(&self, record: &AttendanceRecord) -> Result<()> {
        let mut state = self.state();
        if !state.keys.insert((record.slot_id.clone(), record.date)) {
            return Err(CoreError::DuplicateRecord {
                slot_id: record.slot_id.clone(),
                date: record.date,
            });
        }
        state.attendance.push(record.clone());
        Ok(())
    }

    fn query_attendance(&self, filter: &AttendanceFilter) -> Result<Vec<AttendanceRecord>> {
        let mut records: Vec<AttendanceRecord> = self
            .state()
            .attendance
            .iter()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect();
        records.sort_by(|a, b| a.date.cmp(&b.date).then_with(|| a.slot_id.cmp(&b.slot_id)));
        Ok(records)
    }
}
