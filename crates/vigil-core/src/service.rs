//! Slot service: the write path and the read projections.
//!
//! Every status change goes load -> transition -> optimistic save against the
//! [`SlotStore`]. Reads (streaks, coverage, projection) are pure derivations
//! over the ledger and may be slightly stale.

use std::sync::Arc;

use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result, ValidationError};
use crate::events::SlotChanged;
use crate::ledger::{AttendanceFilter, AttendanceRecord};
use crate::reminder::fallback_active;
use crate::slot::{Slot, SlotEvent, SlotPolicy, SlotStatus, Transition};
use crate::stats::{self, CoverageSnapshot, UserProgress};
use crate::storage::Config;
use crate::store::SlotStore;
use crate::time::{elapsed, local_date, remaining, to_local, Countdown, TimeWindow};

/// Save attempts for a transition that must follow an already appended record.
pub const MAX_SAVE_ATTEMPTS: u32 = 3;

/// A slot as saved, with the net transition that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotUpdate {
    pub slot: Slot,
    pub transition: Transition,
}

impl SlotUpdate {
    /// The change notification for this update, if the status moved.
    pub fn changed(&self) -> Option<SlotChanged> {
        (self.transition.changed && self.transition.from != self.transition.to).then(|| {
            SlotChanged {
                slot_id: self.slot.id.clone(),
                from: self.transition.from,
                to: self.transition.to,
                version: self.slot.version,
                at: self.slot.updated_at,
            }
        })
    }
}

/// Everything a display needs for one slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotProjection {
    pub slot_id: String,
    pub owner: Option<String>,
    pub window: TimeWindow,
    pub status: SlotStatus,
    pub miss_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip_expires_at: Option<DateTime<Utc>>,
    /// None for slots nobody holds.
    pub countdown: Option<Countdown>,
    /// Time since the current occurrence opened, while it is open.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_elapsed: Option<Countdown>,
    pub streak: u32,
    pub monthly_sessions: u32,
    pub coverage_percent: u32,
    pub fallback_active: bool,
}

pub struct SlotService {
    store: Arc<dyn SlotStore>,
    policy: SlotPolicy,
    offset: FixedOffset,
    lookback_days: u32,
}

impl SlotService {
    pub fn new(
        store: Arc<dyn SlotStore>,
        policy: SlotPolicy,
        offset: FixedOffset,
        lookback_days: u32,
    ) -> Self {
        Self {
            store,
            policy,
            offset,
            lookback_days,
        }
    }

    pub fn from_config(store: Arc<dyn SlotStore>, config: &Config) -> Self {
        Self::new(
            store,
            config.slot_policy(),
            config.utc_offset(),
            config.coverage.lookback_days,
        )
    }

    pub fn store(&self) -> &dyn SlotStore {
        self.store.as_ref()
    }

    pub fn policy(&self) -> &SlotPolicy {
        &self.policy
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    /// Local calendar date at `now`.
    pub fn today(&self, now: DateTime<Utc>) -> NaiveDate {
        local_date(now, self.offset)
    }

    /// Insert a fresh unassigned slot for `window`.
    pub fn create_slot(&self, window: TimeWindow, now: DateTime<Utc>) -> Result<Slot> {
        let slot = Slot::new(window, now);
        self.store.insert_slot(&slot)?;
        tracing::info!(slot_id = %slot.id, window = %window, "slot created");
        Ok(slot)
    }

    /// Give `owner` the window, reusing a freed slot for it when one exists.
    pub fn assign_new(
        &self,
        owner: &str,
        window: TimeWindow,
        now: DateTime<Utc>,
    ) -> Result<SlotUpdate> {
        let slots = self.store.list_slots()?;
        if let Some(held) = find_held(&slots, owner, window, None) {
            return Err(CoreError::conflict(
                &held.id,
                format!("{owner} already holds {window}"),
            ));
        }

        let free = slots.iter().find(|s| {
            s.window == window && matches!(s.status, SlotStatus::Unassigned | SlotStatus::Released)
        });
        let slot_id = match free {
            Some(slot) => slot.id.clone(),
            None => self.create_slot(window, now)?.id,
        };
        self.assign(&slot_id, owner, window, now)
    }

    pub fn assign(
        &self,
        slot_id: &str,
        owner: &str,
        window: TimeWindow,
        now: DateTime<Utc>,
    ) -> Result<SlotUpdate> {
        let slots = self.store.list_slots()?;
        if let Some(held) = find_held(&slots, owner, window, Some(slot_id)) {
            return Err(CoreError::conflict(
                slot_id,
                format!("{owner} already holds {window} in slot {}", held.id),
            ));
        }

        let event = SlotEvent::Assign {
            owner: owner.to_string(),
            window,
        };
        self.transact(slot_id, now, 1, |slot| slot.apply(&event, now, &self.policy))
    }

    pub fn request_skip(&self, slot_id: &str, now: DateTime<Utc>) -> Result<SlotUpdate> {
        self.transact(slot_id, now, 1, |slot| {
            slot.apply(&SlotEvent::RequestSkip, now, &self.policy)
        })
    }

    pub fn reactivate(&self, slot_id: &str, now: DateTime<Utc>) -> Result<SlotUpdate> {
        self.transact(slot_id, now, 1, |slot| {
            slot.apply(&SlotEvent::Reactivate, now, &self.policy)
        })
    }

    /// Release the slot if, on a fresh load, it is still Missed at or over the
    /// threshold. Otherwise a no-op.
    pub fn release_if_due(&self, slot_id: &str, now: DateTime<Utc>) -> Result<SlotUpdate> {
        self.transact(slot_id, now, 1, |slot| {
            if slot.release_due(&self.policy) {
                slot.apply(&SlotEvent::Release, now, &self.policy)
            } else {
                Ok(Transition {
                    from: slot.status,
                    to: slot.status,
                    changed: false,
                })
            }
        })
    }

    /// Persist a lapsed skip as Active. A no-op for any other slot.
    pub fn expire_skip(&self, slot_id: &str, now: DateTime<Utc>) -> Result<SlotUpdate> {
        self.transact(slot_id, now, MAX_SAVE_ATTEMPTS, |slot| {
            Ok(Transition {
                from: slot.status,
                to: slot.status,
                changed: false,
            })
        })
    }

    /// Load a slot, persisting a lapsed skip expiry on the way.
    pub fn load_slot(&self, slot_id: &str, now: DateTime<Utc>) -> Result<Slot> {
        Ok(self.expire_skip(slot_id, now)?.slot)
    }

    pub fn list_slots(&self) -> Result<Vec<Slot>> {
        self.store.list_slots()
    }

    /// Append the attendance record for one occurrence, then drive the slot.
    ///
    /// The append is the uniqueness gate: a second call for the same
    /// (slot, date) fails with `DuplicateRecord` and leaves the slot untouched.
    /// A missed session that reaches the release threshold releases the slot
    /// in the same save. A backdated record, one older than the slot's latest
    /// record, joins the ledger but does not move the slot.
    pub fn record_attendance(
        &self,
        slot_id: &str,
        date: NaiveDate,
        attended: bool,
        duration: Duration,
        now: DateTime<Utc>,
    ) -> Result<(AttendanceRecord, SlotUpdate)> {
        if date > self.today(now) {
            return Err(ValidationError::InvalidValue {
                field: "date".into(),
                message: format!("{date} is in the future"),
            }
            .into());
        }

        let event = if attended {
            SlotEvent::AttendedSession
        } else {
            SlotEvent::MissedSession
        };

        let mut slot = self.store.load_slot(slot_id)?;
        slot.expire_skip(now, &self.policy);
        let owner = match slot.owner.clone() {
            Some(owner) if slot.status.is_held() => owner,
            _ => {
                return Err(CoreError::InvalidState {
                    slot_id: slot.id,
                    status: slot.status,
                    event,
                })
            }
        };

        let record = AttendanceRecord {
            slot_id: slot.id.clone(),
            user_id: owner,
            window: slot.window,
            date,
            attended,
            duration_secs: duration.num_seconds().clamp(0, u32::MAX as i64) as u32,
            recorded_at: now,
        };
        let latest = self.latest_recorded_date(slot_id)?;
        self.store.append_attendance(&record)?;

        if latest.is_some_and(|latest| date < latest) {
            tracing::debug!(slot_id, %date, "backdated record, slot unchanged");
            return Ok((record, self.expire_skip(slot_id, now)?));
        }

        let policy = self.policy;
        let update = self
            .transact(slot_id, now, MAX_SAVE_ATTEMPTS, |slot| {
                let applied = slot.apply(&event, now, &policy)?;
                if !slot.release_due(&policy) {
                    return Ok(applied);
                }
                let released = slot.apply(&SlotEvent::Release, now, &policy)?;
                Ok(Transition {
                    from: applied.from,
                    to: released.to,
                    changed: true,
                })
            })
            .map_err(|e| {
                tracing::warn!(slot_id, %date, error = %e, "attendance recorded but slot not updated");
                e
            })?;

        if update.transition.to == SlotStatus::Released && update.transition.changed {
            tracing::info!(
                slot_id,
                user_id = %record.user_id,
                threshold = policy.release_threshold,
                "slot released after consecutive misses"
            );
        }
        Ok((record, update))
    }

    /// Date of the newest attendance record for the slot, any owner.
    pub fn latest_recorded_date(&self, slot_id: &str) -> Result<Option<NaiveDate>> {
        Ok(self
            .store
            .query_attendance(&AttendanceFilter::for_slot(slot_id))?
            .iter()
            .map(|r| r.date)
            .max())
    }

    fn transact<F>(
        &self,
        slot_id: &str,
        now: DateTime<Utc>,
        attempts: u32,
        mut apply: F,
    ) -> Result<SlotUpdate>
    where
        F: FnMut(&mut Slot) -> Result<Transition>,
    {
        let mut attempt = 1;
        loop {
            let mut slot = self.store.load_slot(slot_id)?;
            let expected = slot.version;
            let from = slot.status;

            let expired = slot.expire_skip(now, &self.policy).is_some();
            let applied = apply(&mut slot)?;
            let transition = Transition {
                from,
                to: slot.status,
                changed: expired || applied.changed,
            };

            if !transition.changed {
                tracing::debug!(slot_id, status = %slot.status, "no-op transition");
                return Ok(SlotUpdate { slot, transition });
            }

            match self.store.save_slot(&slot, expected) {
                Ok(version) => {
                    slot.version = version;
                    tracing::info!(
                        slot_id,
                        from = %transition.from,
                        to = %transition.to,
                        version,
                        "slot transition saved"
                    );
                    return Ok(SlotUpdate { slot, transition });
                }
                Err(CoreError::Conflict { .. }) if attempt < attempts => {
                    tracing::debug!(slot_id, attempt, "version conflict, retrying");
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn user_records(&self, user_id: &str) -> Result<Vec<AttendanceRecord>> {
        let records = self.store.query_attendance(&AttendanceFilter::for_user(user_id))?;
        if records.is_empty()
            && !self
                .store
                .list_slots()?
                .iter()
                .any(|s| s.owner.as_deref() == Some(user_id))
        {
            return Err(CoreError::NotFound {
                kind: "user",
                id: user_id.to_string(),
            });
        }
        Ok(records)
    }

    pub fn compute_streak(&self, user_id: &str, today: NaiveDate) -> Result<u32> {
        Ok(stats::compute_streak(&self.user_records(user_id)?, today))
    }

    pub fn compute_monthly_sessions(&self, user_id: &str, month: u32, year: i32) -> Result<u32> {
        if !(1..=12).contains(&month) {
            return Err(ValidationError::InvalidValue {
                field: "month".into(),
                message: format!("{month} is not a month"),
            }
            .into());
        }
        Ok(stats::compute_monthly_sessions(
            &self.user_records(user_id)?,
            month,
            year,
        ))
    }

    pub fn user_progress(&self, user_id: &str, today: NaiveDate) -> Result<UserProgress> {
        Ok(UserProgress::compute(&self.user_records(user_id)?, today))
    }

    pub fn compute_coverage(
        &self,
        window: TimeWindow,
        lookback_days: u32,
        today: NaiveDate,
    ) -> Result<CoverageSnapshot> {
        let from = stats::lookback_start(today, lookback_days);
        let records = self
            .store
            .query_attendance(&AttendanceFilter::for_window(window).between(from, today))?;
        Ok(stats::compute_coverage(&records, window, lookback_days, today))
    }

    /// Display projection for one slot at `now`.
    pub fn projection(&self, slot_id: &str, now: DateTime<Utc>) -> Result<SlotProjection> {
        let slot = self.load_slot(slot_id, now)?;
        let today = self.today(now);

        let local_now = to_local(now, self.offset);
        let countdown = slot
            .status
            .is_held()
            .then(|| remaining(local_now, slot.window.start));
        let session_elapsed = slot
            .status
            .is_held()
            .then(|| slot.window.occurrence_containing(local_now))
            .flatten()
            .map(|start| Countdown::from_duration(elapsed(start, local_now)));

        let (streak, monthly_sessions) = match slot.owner.as_deref() {
            Some(owner) => {
                let records = self
                    .store
                    .query_attendance(&AttendanceFilter::for_user(owner))?;
                (
                    stats::compute_streak(&records, today),
                    stats::compute_monthly_sessions(&records, today.month(), today.year()),
                )
            }
            None => (0, 0),
        };

        let coverage = self.compute_coverage(slot.window, self.lookback_days, today)?;

        Ok(SlotProjection {
            fallback_active: fallback_active(&slot, now, self.offset),
            slot_id: slot.id,
            owner: slot.owner,
            window: slot.window,
            status: slot.status,
            miss_count: slot.miss_count,
            skip_expires_at: slot.skip_expires_at,
            countdown,
            session_elapsed,
            streak,
            monthly_sessions,
            coverage_percent: coverage.coverage_percent,
        })
    }
}

fn find_held<'a>(
    slots: &'a [Slot],
    owner: &str,
    window: TimeWindow,
    except: Option<&str>,
) -> Option<&'a Slot> {
    slots.iter().find(|s| {
        Some(s.id.as_str()) != except
            && s.status.is_held()
            && s.window == window
            && s.owner.as_deref() == Some(owner)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use chrono::{Offset, TimeZone};

    fn window() -> TimeWindow {
        TimeWindow::parse("22:00-22:30").unwrap()
    }

    fn service() -> SlotService {
        SlotService::new(
            Arc::new(MemoryStore::new()),
            SlotPolicy::default(),
            Utc.fix(),
            30,
        )
    }

    fn at(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 12, day, hour, 0, 0).unwrap()
    }

    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 12, day).unwrap()
    }

    #[test]
    fn assign_new_creates_active_slot() {
        let svc = service();
        let update = svc.assign_new("user-1", window(), at(1, 9)).unwrap();
        assert_eq!(update.slot.status, SlotStatus::Active);
        assert_eq!(update.slot.version, 1);
        let changed = update.changed().unwrap();
        assert_eq!(changed.from, SlotStatus::Unassigned);
        assert_eq!(changed.to, SlotStatus::Active);
    }

    #[test]
    fn assign_new_rejects_second_hold_of_same_window() {
        let svc = service();
        svc.assign_new("user-1", window(), at(1, 9)).unwrap();
        assert!(matches!(
            svc.assign_new("user-1", window(), at(1, 10)),
            Err(CoreError::Conflict { .. })
        ));
        // Another intercessor may share the window.
        svc.assign_new("user-2", window(), at(1, 10)).unwrap();
    }

    #[test]
    fn assign_new_reuses_released_slot() {
        let svc = service();
        let slot_id = svc.assign_new("user-1", window(), at(1, 9)).unwrap().slot.id;
        for day in 1..=5 {
            svc.record_attendance(&slot_id, date(day), false, Duration::zero(), at(day, 23))
                .unwrap();
        }
        let update = svc.assign_new("user-2", window(), at(6, 9)).unwrap();
        assert_eq!(update.slot.id, slot_id);
        assert_eq!(update.slot.owner.as_deref(), Some("user-2"));
    }

    #[test]
    fn duplicate_attendance_leaves_slot_untouched() {
        let svc = service();
        let slot_id = svc.assign_new("user-1", window(), at(1, 9)).unwrap().slot.id;
        svc.record_attendance(&slot_id, date(1), false, Duration::zero(), at(1, 23))
            .unwrap();
        assert!(matches!(
            svc.record_attendance(&slot_id, date(1), false, Duration::zero(), at(1, 23)),
            Err(CoreError::DuplicateRecord { .. })
        ));
        assert_eq!(svc.store().load_slot(&slot_id).unwrap().miss_count, 1);
    }

    #[test]
    fn attendance_on_unassigned_slot_is_invalid() {
        let svc = service();
        let slot = svc.create_slot(window(), at(1, 9)).unwrap();
        assert!(matches!(
            svc.record_attendance(&slot.id, date(1), true, Duration::zero(), at(1, 23)),
            Err(CoreError::InvalidState { .. })
        ));
    }

    #[test]
    fn future_attendance_is_rejected() {
        let svc = service();
        let slot_id = svc.assign_new("user-1", window(), at(1, 9)).unwrap().slot.id;
        assert!(matches!(
            svc.record_attendance(&slot_id, date(3), true, Duration::zero(), at(1, 23)),
            Err(CoreError::Validation(_))
        ));
    }

    #[test]
    fn load_slot_persists_lapsed_skip() {
        let svc = service();
        let slot_id = svc.assign_new("user-1", window(), at(1, 9)).unwrap().slot.id;
        svc.request_skip(&slot_id, at(1, 10)).unwrap();

        let slot = svc.load_slot(&slot_id, at(6, 11)).unwrap();
        assert_eq!(slot.status, SlotStatus::Active);
        assert_eq!(
            svc.store().load_slot(&slot_id).unwrap().status,
            SlotStatus::Active
        );
    }

    #[test]
    fn unknown_user_is_not_found() {
        let svc = service();
        assert!(matches!(
            svc.compute_streak("ghost", date(7)),
            Err(CoreError::NotFound { kind: "user", .. })
        ));
        svc.assign_new("user-1", window(), at(1, 9)).unwrap();
        assert_eq!(svc.compute_streak("user-1", date(7)).unwrap(), 0);
    }

    #[test]
    fn monthly_sessions_rejects_bad_month() {
        let svc = service();
        assert!(matches!(
            svc.compute_monthly_sessions("user-1", 13, 2024),
            Err(CoreError::Validation(_))
        ));
    }

    #[test]
    fn projection_combines_status_countdown_and_stats() {
        let svc = service();
        let slot_id = svc.assign_new("user-1", window(), at(1, 9)).unwrap().slot.id;
        for day in 2..=6 {
            svc.record_attendance(&slot_id, date(day), true, Duration::minutes(30), at(day, 23))
                .unwrap();
        }

        let now = Utc.with_ymd_and_hms(2024, 12, 7, 21, 59, 58).unwrap();
        let projection = svc.projection(&slot_id, now).unwrap();
        assert_eq!(projection.status, SlotStatus::Active);
        assert_eq!(projection.streak, 5);
        assert_eq!(projection.monthly_sessions, 5);
        assert_eq!(projection.coverage_percent, 100);
        assert_eq!(projection.countdown.unwrap().total_seconds(), 2);
        assert!(projection.session_elapsed.is_none());
        assert!(!projection.fallback_active);

        let inside = Utc.with_ymd_and_hms(2024, 12, 7, 22, 10, 5).unwrap();
        let projection = svc.projection(&slot_id, inside).unwrap();
        assert_eq!(projection.session_elapsed.unwrap().total_seconds(), 605);
    }

    #[test]
    fn backdated_record_is_kept_but_does_not_move_slot() {
        let svc = service();
        let slot_id = svc.assign_new("user-1", window(), at(1, 9)).unwrap().slot.id;
        svc.record_attendance(&slot_id, date(4), true, Duration::minutes(30), at(4, 23))
            .unwrap();

        let (record, update) = svc
            .record_attendance(&slot_id, date(2), false, Duration::zero(), at(5, 9))
            .unwrap();
        assert!(!record.attended);
        assert!(!update.transition.changed);
        assert_eq!(update.slot.status, SlotStatus::Active);
        assert_eq!(update.slot.miss_count, 0);
        assert_eq!(svc.latest_recorded_date(&slot_id).unwrap(), Some(date(4)));
        assert_eq!(
            svc.store()
                .query_attendance(&AttendanceFilter::for_slot(&slot_id))
                .unwrap()
                .len(),
            2
        );
    }

    #[test]
    fn skip_grace_past_the_calendar_is_a_validation_error() {
        let svc = SlotService::new(
            Arc::new(MemoryStore::new()),
            SlotPolicy {
                skip_grace_days: u32::MAX,
                ..SlotPolicy::default()
            },
            Utc.fix(),
            30,
        );
        let slot_id = svc.assign_new("user-1", window(), at(1, 9)).unwrap().slot.id;
        assert!(matches!(
            svc.request_skip(&slot_id, at(1, 10)),
            Err(CoreError::Validation(_))
        ));
        assert_eq!(
            svc.store().load_slot(&slot_id).unwrap().status,
            SlotStatus::Active
        );
    }

    #[test]
    fn coverage_with_huge_lookback_covers_whole_ledger() {
        let svc = service();
        let slot_id = svc.assign_new("user-1", window(), at(1, 9)).unwrap().slot.id;
        svc.record_attendance(&slot_id, date(1), true, Duration::zero(), at(1, 23))
            .unwrap();
        let snap = svc.compute_coverage(window(), u32::MAX, date(7)).unwrap();
        assert_eq!(snap.scheduled_occurrences, 1);
        assert_eq!(snap.coverage_percent, 100);
    }

    #[test]
    fn projection_of_unassigned_slot_has_no_countdown() {
        let svc = service();
        let slot = svc.create_slot(window(), at(1, 9)).unwrap();
        let projection = svc.projection(&slot.id, at(1, 22)).unwrap();
        assert!(projection.countdown.is_none());
        assert!(projection.fallback_active);
    }
}
