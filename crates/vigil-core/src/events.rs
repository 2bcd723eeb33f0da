use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::slot::SlotStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Reminder,
    Fallback,
}

/// Handed to the notification collaborator. Delivery channel, template and
/// language are its business.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationEvent {
    pub slot_id: String,
    /// Empty for unowned slots (fallback on an unassigned window).
    pub user_id: Option<String>,
    pub kind: NotificationKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset_minutes: Option<u32>,
    pub at: DateTime<Utc>,
}

/// A change of `fallback_active` for one slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FallbackTransition {
    pub slot_id: String,
    pub active: bool,
    pub at: DateTime<Utc>,
}

/// Emitted by the service after a status change has been saved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotChanged {
    pub slot_id: String,
    pub from: SlotStatus,
    pub to: SlotStatus,
    pub version: u64,
    pub at: DateTime<Utc>,
}
