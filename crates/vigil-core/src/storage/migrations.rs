//! Database schema migrations for vigil.
//!
//! Migrations are versioned and applied automatically when opening the database.
//! The `schema_version` table tracks the current migration version.

use rusqlite::{Connection, Result as SqliteResult};

/// Current schema version.
pub const SCHEMA_VERSION: i32 = 2;

/// Apply all pending migrations to bring the database to the current schema version.
///
/// # Errors
/// Returns an error if migration fails.
pub fn migrate(conn: &Connection) -> SqliteResult<()> {
    create_schema_version_table(conn)?;

    let current_version = get_schema_version(conn);

    if current_version < 1 {
        migrate_v1(conn)?;
    }
    if current_version < 2 {
        migrate_v2(conn)?;
    }

    Ok(())
}

fn create_schema_version_table(conn: &Connection) -> SqliteResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY
        );",
    )
}

/// Get the current schema version from the database.
///
/// Returns 0 if no version is set (initial database).
pub fn get_schema_version(conn: &Connection) -> i32 {
    conn.query_row("SELECT version FROM schema_version", [], |row| {
        row.get::<_, i32>(0)
    })
    .unwrap_or_else(|e| {
        if !matches!(e, rusqlite::Error::QueryReturnedNoRows) {
            tracing::warn!(error = %e, "failed to read schema_version");
        }
        0
    })
}

fn set_schema_version(conn: &Connection, version: i32) -> SqliteResult<()> {
    conn.execute("DELETE FROM schema_version", [])?;
    conn.execute(
        "INSERT INTO schema_version (version) VALUES (?1)",
        [version],
    )?;
    Ok(())
}

/// Migration v1: slots, attendance ledger and kv store.
fn migrate_v1(conn: &Connection) -> SqliteResult<()> {
    let tx = conn.unchecked_transaction()?;
    tx.execute_batch(
        "CREATE TABLE IF NOT EXISTS slots (
            id              TEXT PRIMARY KEY,
            owner           TEXT,
            time_window     TEXT NOT NULL,
            status          TEXT NOT NULL,
            miss_count      INTEGER NOT NULL DEFAULT 0,
            skip_expires_at TEXT,
            active_since    TEXT,
            version         INTEGER NOT NULL DEFAULT 0,
            created_at      TEXT NOT NULL,
            updated_at      TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS attendance (
            slot_id       TEXT NOT NULL,
            user_id       TEXT NOT NULL,
            time_window   TEXT NOT NULL,
            date          TEXT NOT NULL,
            attended      INTEGER NOT NULL,
            duration_secs INTEGER NOT NULL DEFAULT 0,
            recorded_at   TEXT NOT NULL,
            PRIMARY KEY (slot_id, date)
        );

        CREATE TABLE IF NOT EXISTS kv (
            key   TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );",
    )?;
    set_schema_version(&tx, 1)?;
    tx.commit()
}

/// Migration v2: ledger indexes, and at most one held slot per (owner, window).
fn migrate_v2(conn: &Connection) -> SqliteResult<()> {
    let tx = conn.unchecked_transaction()?;
    tx.execute_batch(
        "CREATE INDEX IF NOT EXISTS idx_attendance_user_date ON attendance(user_id, date);
         CREATE INDEX IF NOT EXISTS idx_attendance_window_date ON attendance(time_window, date);
         CREATE UNIQUE INDEX IF NOT EXISTS idx_slots_held_owner_window
             ON slots(owner, time_window)
             WHERE status IN ('active', 'missed', 'skipped');",
    )?;
    set_schema_version(&tx, 2)?;
    tx.commit()
}
