//! # Vigil Core Library
//!
//! Core logic for keeping recurring intercession slots covered: who holds
//! which daily window, whether they showed up, and what to do when they don't.
//! The `vigil` CLI is a thin layer over this crate.
//!
//! ## Architecture
//!
//! - **Slot state machine**: one transition table in [`Slot::apply`]
//! - **Attendance ledger**: append-only, one record per (slot, date)
//! - **Stats**: streaks, monthly sessions and window coverage, derived on demand
//! - **Countdown / reminders**: pure functions of the clock, driven by a
//!   caller-owned tick through [`TickEvaluator`]
//! - **Storage**: SQLite-backed [`Database`] and TOML-based [`Config`]
//!
//! ## Key Components
//!
//! - [`SlotService`]: load -> transition -> optimistic save
//! - [`SlotStore`]: persistence boundary, with [`MemoryStore`] and [`Database`]
//! - [`maintenance::run`]: idempotent skip expiry, close-out and release job

pub mod error;
pub mod evaluator;
pub mod events;
pub mod ledger;
pub mod maintenance;
pub mod reminder;
pub mod service;
pub mod slot;
pub mod stats;
pub mod storage;
pub mod store;
pub mod time;

pub use error::{ConfigError, CoreError, DatabaseError, Result, ValidationError};
pub use evaluator::{FallbackSink, Notifier, TickEvaluator, TickOutcome};
pub use events::{FallbackTransition, NotificationEvent, NotificationKind, SlotChanged};
pub use ledger::{AttendanceFilter, AttendanceRecord};
pub use maintenance::MaintenanceReport;
pub use reminder::{fallback_active, reminder_due, FallbackMonitor, ReminderTracker};
pub use service::{SlotProjection, SlotService, SlotUpdate};
pub use slot::{Slot, SlotEvent, SlotPolicy, SlotStatus, Transition};
pub use stats::{CoverageSnapshot, UserProgress};
pub use storage::{Config, Database};
pub use store::{MemoryStore, SlotStore};
pub use time::{countdown_for, remaining, Countdown, TimeWindow};
