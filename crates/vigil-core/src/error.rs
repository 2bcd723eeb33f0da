//! Core error types for vigil-core.
//!
//! The four domain kinds (`InvalidState`, `Conflict`, `DuplicateRecord`,
//! `NotFound`) are locally recoverable: callers refetch current state and
//! retry, or surface a message. The remaining variants wrap storage and
//! configuration failures.

use std::path::PathBuf;

use chrono::NaiveDate;
use thiserror::Error;

use crate::slot::{SlotEvent, SlotStatus};

/// Core error type for vigil-core.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Illegal transition attempted from the slot's current status.
    #[error("Invalid state: cannot apply {event} to slot {slot_id} in status {status}")]
    InvalidState {
        slot_id: String,
        status: SlotStatus,
        event: SlotEvent,
    },

    /// Lost a concurrent mutation race, or assign attempted on an occupied slot.
    #[error("Conflict on slot {slot_id}: {message}")]
    Conflict { slot_id: String, message: String },

    /// Attendance already recorded for that slot and date.
    #[error("Attendance already recorded for slot {slot_id} on {date}")]
    DuplicateRecord { slot_id: String, date: NaiveDate },

    /// Unknown slot or user.
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// Database-related errors
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Validation errors
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CoreError {
    pub fn slot_not_found(id: impl Into<String>) -> Self {
        CoreError::NotFound {
            kind: "slot",
            id: id.into(),
        }
    }

    pub fn conflict(slot_id: impl Into<String>, message: impl Into<String>) -> Self {
        CoreError::Conflict {
            slot_id: slot_id.into(),
            message: message.into(),
        }
    }

    /// True for the domain kinds a caller can handle by refetching and retrying.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            CoreError::InvalidState { .. }
                | CoreError::Conflict { .. }
                | CoreError::DuplicateRecord { .. }
                | CoreError::NotFound { .. }
        )
    }
}

/// Database-specific errors.
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// Failed to open database connection
    #[error("Failed to open database at {path}: {source}")]
    OpenFailed {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    /// Query execution failed
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Migration failed
    #[error("Database migration failed: {0}")]
    MigrationFailed(String),

    /// Stored row could not be decoded
    #[error("Corrupt row in {table}: {message}")]
    CorruptRow { table: &'static str, message: String },

    /// Database is locked
    #[error("Database is locked")]
    Locked,
}

/// Configuration-specific errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to load configuration
    #[error("Failed to load configuration from {path}: {message}")]
    LoadFailed { path: PathBuf, message: String },

    /// Failed to save configuration
    #[error("Failed to save configuration to {path}: {message}")]
    SaveFailed { path: PathBuf, message: String },

    /// Invalid configuration value
    #[error("Invalid configuration value for '{key}': {message}")]
    InvalidValue { key: String, message: String },

    /// Unknown configuration key
    #[error("Unknown configuration key: {0}")]
    UnknownKey(String),

    /// Data directory could not be determined or created
    #[error("Data directory unavailable: {0}")]
    DataDir(String),
}

/// Validation errors.
#[derive(Error, Debug)]
pub enum ValidationError {
    /// Time window text could not be parsed
    #[error("Invalid time window '{input}': {message}")]
    InvalidWindow { input: String, message: String },

    /// Invalid value
    #[error("Invalid value for '{field}': {message}")]
    InvalidValue { field: String, message: String },
}

impl From<rusqlite::Error> for DatabaseError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(e, _msg) => {
                if e.code == rusqlite::ErrorCode::DatabaseLocked
                    || e.code == rusqlite::ErrorCode::DatabaseBusy
                {
                    DatabaseError::Locked
                } else {
                    DatabaseError::QueryFailed(err.to_string())
                }
            }
            _ => DatabaseError::QueryFailed(err.to_string()),
        }
    }
}

impl From<rusqlite::Error> for CoreError {
    fn from(err: rusqlite::Error) -> Self {
        CoreError::Database(err.into())
    }
}

/// Result type alias for CoreError
pub type Result<T, E = CoreError> = std::result::Result<T, E>;
