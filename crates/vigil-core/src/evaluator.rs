//! Per-client tick evaluator.
//!
//! Like the countdown, the evaluator has no thread of its own: the caller
//! invokes [`TickEvaluator::tick`] on its recurring tick with the slots it
//! currently knows about. Each tick derives reminders and fallback state from
//! scratch; the only memory carried between ticks is which reminder offsets
//! already fired and the last fallback value per slot. Stopping the caller's
//! tick stops everything.
//!
//! ```ignore
//! let mut evaluator = TickEvaluator::from_config(&config);
//! // every second:
//! evaluator.tick(&slots, Utc::now(), &notifier, &sink);
//! ```

use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};

use crate::events::{FallbackTransition, NotificationEvent, NotificationKind};
use crate::reminder::{fallback_active, reminder_due, FallbackMonitor, ReminderTracker};
use crate::slot::Slot;
use crate::storage::Config;
use crate::time::{remaining, to_local, Countdown};

/// Receives reminder and fallback notifications.
pub trait Notifier: Send + Sync {
    fn notify(&self, event: &NotificationEvent) -> Result<(), Box<dyn std::error::Error>>;
}

/// Receives `fallback_active` transitions for substitute content playback.
pub trait FallbackSink: Send + Sync {
    fn fallback_changed(
        &self,
        transition: &FallbackTransition,
    ) -> Result<(), Box<dyn std::error::Error>>;
}

/// What one tick produced.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickOutcome {
    pub reminders: Vec<NotificationEvent>,
    pub fallbacks: Vec<FallbackTransition>,
    /// Countdown to the next start of every held slot.
    pub countdowns: Vec<(String, Countdown)>,
}

pub struct TickEvaluator {
    offsets_minutes: Vec<u32>,
    reminders_enabled: bool,
    utc_offset: FixedOffset,
    tracker: ReminderTracker,
    monitor: FallbackMonitor,
}

impl TickEvaluator {
    pub fn new(offsets_minutes: Vec<u32>, utc_offset: FixedOffset) -> Self {
        Self {
            offsets_minutes,
            reminders_enabled: true,
            utc_offset,
            tracker: ReminderTracker::new(),
            monitor: FallbackMonitor::new(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        let mut evaluator = Self::new(
            config.reminders.offsets_minutes.clone(),
            config.utc_offset(),
        );
        evaluator.reminders_enabled = config.reminders.enabled;
        evaluator
    }

    pub fn is_fallback_active(&self, slot_id: &str) -> bool {
        self.monitor.is_active(slot_id)
    }

    /// Evaluate every slot at `now` and hand the results to the collaborators.
    ///
    /// Collaborator failures are logged; they never stop the tick.
    pub fn tick(
        &mut self,
        slots: &[Slot],
        now: DateTime<Utc>,
        notifier: &dyn Notifier,
        sink: &dyn FallbackSink,
    ) -> TickOutcome {
        let mut outcome = TickOutcome::default();
        let local_now = to_local(now, self.utc_offset);

        for slot in slots {
            if self.reminders_enabled {
                let due = reminder_due(
                    slot,
                    now,
                    self.utc_offset,
                    &self.offsets_minutes,
                    &mut self.tracker,
                );
                for minutes in due {
                    outcome.reminders.push(NotificationEvent {
                        slot_id: slot.id.clone(),
                        user_id: slot.owner.clone(),
                        kind: NotificationKind::Reminder,
                        offset_minutes: Some(minutes),
                        at: now,
                    });
                }
            }

            let active = fallback_active(slot, now, self.utc_offset);
            if let Some(active) = self.monitor.observe(&slot.id, active) {
                let transition = FallbackTransition {
                    slot_id: slot.id.clone(),
                    active,
                    at: now,
                };
                if active {
                    outcome.reminders.push(NotificationEvent {
                        slot_id: slot.id.clone(),
                        user_id: slot.owner.clone(),
                        kind: NotificationKind::Fallback,
                        offset_minutes: None,
                        at: now,
                    });
                }
                outcome.fallbacks.push(transition);
            }

            if slot.effective_status(now).is_held() {
                outcome
                    .countdowns
                    .push((slot.id.clone(), remaining(local_now, slot.window.start)));
            }
        }

        let live: Vec<&str> = slots.iter().map(|s| s.id.as_str()).collect();
        self.tracker.retain_slots(&live);

        for event in &outcome.reminders {
            if let Err(e) = notifier.notify(event) {
                tracing::warn!(slot_id = %event.slot_id, error = %e, "notification failed");
            }
        }
        for transition in &outcome.fallbacks {
            tracing::info!(slot_id = %transition.slot_id, active = transition.active, "fallback changed");
            if let Err(e) = sink.fallback_changed(transition) {
                tracing::warn!(slot_id = %transition.slot_id, error = %e, "fallback sink failed");
            }
        }

        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::slot::{SlotEvent, SlotPolicy};
    use crate::time::TimeWindow;
    use chrono::{Duration, Offset, TimeZone};
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<NotificationEvent>>,
        fallbacks: Mutex<Vec<FallbackTransition>>,
    }

    impl Notifier for Recorder {
        fn notify(&self, event: &NotificationEvent) -> Result<(), Box<dyn std::error::Error>> {
            self.events.lock().unwrap().push(event.clone());
            Ok(())
        }
    }

    impl FallbackSink for Recorder {
        fn fallback_changed(
            &self,
            transition: &FallbackTransition,
        ) -> Result<(), Box<dyn std::error::Error>> {
            self.fallbacks.lock().unwrap().push(transition.clone());
            Ok(())
        }
    }

    fn slot(now: DateTime<Utc>) -> Slot {
        let window = TimeWindow::parse("22:00-22:30").unwrap();
        let mut slot = Slot::new(window, now);
        slot.apply(
            &SlotEvent::Assign {
                owner: "user-1".into(),
                window,
            },
            now,
            &SlotPolicy::default(),
        )
        .unwrap();
        slot
    }

    #[test]
    fn every_second_for_two_hours_fires_each_offset_once() {
        let start = Utc.with_ymd_and_hms(2024, 12, 2, 20, 30, 0).unwrap();
        let slots = vec![slot(start)];
        let recorder = Recorder::default();
        let mut evaluator = TickEvaluator::new(vec![60, 30, 15], Utc.fix());

        for s in 0..(2 * 3600) {
            evaluator.tick(&slots, start + Duration::seconds(s), &recorder, &recorder);
        }

        let offsets: Vec<Option<u32>> = recorder
            .events
            .lock()
            .unwrap()
            .iter()
            .map(|e| e.offset_minutes)
            .collect();
        assert_eq!(offsets, vec![Some(60), Some(30), Some(15)]);
        assert!(recorder.fallbacks.lock().unwrap().is_empty());
    }

    #[test]
    fn skipped_slot_raises_fallback_inside_window_only() {
        let assigned = Utc.with_ymd_and_hms(2024, 12, 2, 9, 0, 0).unwrap();
        let mut skipped = slot(assigned);
        skipped
            .apply(&SlotEvent::RequestSkip, assigned, &SlotPolicy::default())
            .unwrap();
        let slots = vec![skipped];
        let recorder = Recorder::default();
        let mut evaluator = TickEvaluator::new(vec![60, 30, 15], Utc.fix());

        let before = Utc.with_ymd_and_hms(2024, 12, 2, 21, 59, 59).unwrap();
        let inside = before + Duration::seconds(1);
        let after = Utc.with_ymd_and_hms(2024, 12, 2, 22, 30, 0).unwrap();

        assert!(evaluator.tick(&slots, before, &recorder, &recorder).fallbacks.is_empty());
        let outcome = evaluator.tick(&slots, inside, &recorder, &recorder);
        assert_eq!(outcome.fallbacks.len(), 1);
        assert!(outcome.fallbacks[0].active);
        assert_eq!(outcome.reminders[0].kind, NotificationKind::Fallback);
        assert!(evaluator.is_fallback_active(&slots[0].id));

        let outcome = evaluator.tick(&slots, after, &recorder, &recorder);
        assert_eq!(outcome.fallbacks.len(), 1);
        assert!(!outcome.fallbacks[0].active);
        // Skipped slots get no reminders.
        assert_eq!(recorder.events.lock().unwrap().len(), 1);
    }

    #[test]
    fn disabled_reminders_still_track_fallback() {
        let now = Utc.with_ymd_and_hms(2024, 12, 2, 21, 0, 0).unwrap();
        let mut config = Config::default();
        config.reminders.enabled = false;
        let mut evaluator = TickEvaluator::from_config(&config);
        let recorder = Recorder::default();

        let outcome = evaluator.tick(&[slot(now)], now, &recorder, &recorder);
        assert!(outcome.reminders.is_empty());
        assert_eq!(outcome.countdowns.len(), 1);
        assert_eq!(outcome.countdowns[0].1.total_seconds(), 3600);
    }
}
