//! Slot lifecycle state machine.
//!
//! A slot is one recurring daily window held by one intercessor. Its status
//! only ever changes through [`Slot::apply`], which is the single transition
//! table for the whole crate:
//!
//! ```text
//! Unassigned/Released --assign--> Active
//! Active  --missed-->        Missed (miss_count += 1)
//! Missed  --missed-->        Missed (miss_count += 1)
//! Missed  --attended-->      Active (miss_count := 0)
//! Missed  --release-->       Released   (miss_count >= threshold)
//! Active  --request_skip-->  Skipped    (skip_expires_at := now + grace)
//! Skipped --reactivate-->    Active     (miss_count := 0)
//! Skipped --skip_expired-->  Active     (now >= skip_expires_at)
//! ```
//!
//! Re-applying an event whose target status already holds is a no-op.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result, ValidationError};
use crate::time::TimeWindow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotStatus {
    Unassigned,
    Active,
    Missed,
    Skipped,
    Released,
}

impl SlotStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SlotStatus::Unassigned => "unassigned",
            SlotStatus::Active => "active",
            SlotStatus::Missed => "missed",
            SlotStatus::Skipped => "skipped",
            SlotStatus::Released => "released",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "unassigned" => Some(SlotStatus::Unassigned),
            "active" => Some(SlotStatus::Active),
            "missed" => Some(SlotStatus::Missed),
            "skipped" => Some(SlotStatus::Skipped),
            "released" => Some(SlotStatus::Released),
            _ => None,
        }
    }

    /// Held by an owner (neither Unassigned nor Released).
    pub fn is_held(&self) -> bool {
        matches!(
            self,
            SlotStatus::Active | SlotStatus::Missed | SlotStatus::Skipped
        )
    }
}

impl fmt::Display for SlotStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Input to the state machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SlotEvent {
    Assign { owner: String, window: TimeWindow },
    MissedSession,
    AttendedSession,
    /// Consecutive misses reached the release threshold.
    Release,
    RequestSkip,
    Reactivate,
    SkipExpired,
}

impl fmt::Display for SlotEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SlotEvent::Assign { .. } => "assign",
            SlotEvent::MissedSession => "missed_session",
            SlotEvent::AttendedSession => "attended_session",
            SlotEvent::Release => "release",
            SlotEvent::RequestSkip => "request_skip",
            SlotEvent::Reactivate => "reactivate",
            SlotEvent::SkipExpired => "skip_expired",
        };
        f.write_str(name)
    }
}

/// Release and skip policy values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotPolicy {
    /// Consecutive missed occurrences before a slot is released.
    pub release_threshold: u32,
    /// Length of a skip before the slot reactivates on its own.
    pub skip_grace_days: u32,
}

impl SlotPolicy {
    pub fn skip_grace(&self) -> Duration {
        Duration::days(self.skip_grace_days as i64)
    }
}

impl Default for SlotPolicy {
    fn default() -> Self {
        Self {
            release_threshold: 5,
            skip_grace_days: 5,
        }
    }
}

/// Outcome of applying one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    pub from: SlotStatus,
    pub to: SlotStatus,
    /// False when the event was a no-op.
    pub changed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slot {
    pub id: String,
    pub owner: Option<String>,
    pub window: TimeWindow,
    pub status: SlotStatus,
    /// Consecutive missed occurrences since the last attended one.
    pub miss_count: u32,
    pub skip_expires_at: Option<DateTime<Utc>>,
    /// Start of the current run of counted occurrences: set on assignment and
    /// on leaving a skip. Occurrences before it are never charged as missed.
    pub active_since: Option<DateTime<Utc>>,
    /// Optimistic concurrency token, bumped by the store on every save.
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Slot {
    /// A fresh, unassigned slot for `window`.
    pub fn new(window: TimeWindow, now: DateTime<Utc>) -> Self {
        Self {
            id: format!("slot-{}", uuid::Uuid::new_v4()),
            owner: None,
            window,
            status: SlotStatus::Unassigned,
            miss_count: 0,
            skip_expires_at: None,
            active_since: None,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// True once a skip has run past its expiry.
    pub fn skip_lapsed(&self, now: DateTime<Utc>) -> bool {
        self.status == SlotStatus::Skipped
            && self.skip_expires_at.is_some_and(|expiry| now >= expiry)
    }

    /// Status as observed at `now`: a lapsed skip reads as Active.
    pub fn effective_status(&self, now: DateTime<Utc>) -> SlotStatus {
        if self.skip_lapsed(now) {
            SlotStatus::Active
        } else {
            self.status
        }
    }

    pub fn release_due(&self, policy: &SlotPolicy) -> bool {
        self.status == SlotStatus::Missed && self.miss_count >= policy.release_threshold
    }

    /// Apply the skip expiry if it has lapsed.
    pub fn expire_skip(&mut self, now: DateTime<Utc>, policy: &SlotPolicy) -> Option<Transition> {
        if !self.skip_lapsed(now) {
            return None;
        }
        self.apply(&SlotEvent::SkipExpired, now, policy).ok()
    }

    /// Run one event through the transition table.
    pub fn apply(
        &mut self,
        event: &SlotEvent,
        now: DateTime<Utc>,
        policy: &SlotPolicy,
    ) -> Result<Transition> {
        use SlotStatus::*;

        let from = self.status;
        let changed = match (from, event) {
            (Unassigned | Released, SlotEvent::Assign { owner, window }) => {
                self.owner = Some(owner.clone());
                self.window = *window;
                self.status = Active;
                self.miss_count = 0;
                self.skip_expires_at = None;
                self.active_since = Some(now);
                true
            }
            (Active, SlotEvent::Assign { owner, window })
                if self.owner.as_deref() == Some(owner.as_str()) && self.window == *window =>
            {
                false
            }
            (_, SlotEvent::Assign { .. }) => {
                return Err(CoreError::conflict(
                    &self.id,
                    format!("slot is {} and cannot be assigned", from),
                ));
            }

            (Active, SlotEvent::MissedSession) => {
                self.status = Missed;
                self.miss_count += 1;
                true
            }
            (Missed, SlotEvent::MissedSession) => {
                self.miss_count += 1;
                true
            }
            (Missed, SlotEvent::AttendedSession) => {
                self.status = Active;
                self.miss_count = 0;
                true
            }
            (Active, SlotEvent::AttendedSession) => false,
            // Occurrences during a skip are excused.
            (Skipped, SlotEvent::MissedSession | SlotEvent::AttendedSession) => false,

            (Missed, SlotEvent::Release) if self.miss_count >= policy.release_threshold => {
                self.status = Released;
                self.owner = None;
                self.skip_expires_at = None;
                self.active_since = None;
                true
            }
            (Released, SlotEvent::Release) => false,

            (Active, SlotEvent::RequestSkip) => {
                let expires_at = now.checked_add_signed(policy.skip_grace()).ok_or_else(|| {
                    ValidationError::InvalidValue {
                        field: "policy.skip_grace_days".into(),
                        message: format!("{} days overflows the calendar", policy.skip_grace_days),
                    }
                })?;
                self.status = Skipped;
                self.skip_expires_at = Some(expires_at);
                true
            }
            (Skipped, SlotEvent::RequestSkip) => false,

            (Skipped, SlotEvent::Reactivate) => {
                self.reactivate(now);
                true
            }
            (Skipped, SlotEvent::SkipExpired) if self.skip_lapsed(now) => {
                // Counting resumes at the expiry instant, however late it is observed.
                let resumed = self.skip_expires_at.unwrap_or(now);
                self.reactivate(resumed);
                true
            }
            (Active, SlotEvent::Reactivate | SlotEvent::SkipExpired) => false,

            _ => {
                return Err(CoreError::InvalidState {
                    slot_id: self.id.clone(),
                    status: from,
                    event: event.clone(),
                });
            }
        };

        if changed {
            self.updated_at = now;
        }
        Ok(Transition {
            from,
            to: self.status,
            changed,
        })
    }

    fn reactivate(&mut self, resumed_at: DateTime<Utc>) {
        self.status = SlotStatus::Active;
        self.miss_count = 0;
        self.skip_expires_at = None;
        self.active_since = Some(resumed_at);
    }
}
