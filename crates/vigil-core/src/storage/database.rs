//! SQLite-backed slot store.
//!
//! Provides persistent storage for:
//! - Slots, with optimistic version checks on save
//! - The append-only attendance ledger
//! - Key-value store for application state

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, ErrorCode, OptionalExtension, Row};

use super::{data_dir, migrations};
use crate::error::{CoreError, DatabaseError, Result};
use crate::ledger::{AttendanceFilter, AttendanceRecord};
use crate::slot::{Slot, SlotStatus};
use crate::store::SlotStore;
use crate::time::TimeWindow;

const SLOT_COLUMNS: &str = "id, owner, time_window, status, miss_count, skip_expires_at, \
                            active_since, version, created_at, updated_at";

/// SQLite database for slots and attendance.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open the database at `~/.config/vigil/vigil.db`.
    ///
    /// Creates the database file and schema if they don't exist.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened or migrated.
    pub fn open() -> Result<Self> {
        Self::open_at(&data_dir()?.join("vigil.db"))
    }

    pub fn open_at(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).map_err(|source| DatabaseError::OpenFailed {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_connection(conn)
    }

    /// Open an in-memory database (for tests).
    pub fn open_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        migrations::migrate(&conn)
            .map_err(|e| DatabaseError::MigrationFailed(e.to_string()))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        // Statements run to completion under the lock, so a poisoned guard
        // still wraps a usable connection.
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Get a value from the kv store.
    pub fn kv_get(&self, key: &str) -> Result<Option<String>> {
        let value = self
            .conn()
            .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
                row.get::<_, String>(0)
            })
            .optional()?;
        Ok(value)
    }

    /// Set a value in the kv store.
    pub fn kv_set(&self, key: &str, value: &str) -> Result<()> {
        self.conn().execute(
            "INSERT OR REPLACE INTO kv (key, value) VALUES (?1, ?2)",
            params![key, value],
        )?;
        Ok(())
    }
}

fn conversion_error(idx: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        idx,
        rusqlite::types::Type::Text,
        Box::<dyn std::error::Error + Send + Sync>::from(message),
    )
}

/// Row decode failures become `CorruptRow`; everything else is a query error.
fn decode_error(table: &'static str) -> impl Fn(rusqlite::Error) -> CoreError {
    move |err| match err {
        rusqlite::Error::FromSqlConversionFailure(_, _, source) => {
            DatabaseError::CorruptRow {
                table,
                message: source.to_string(),
            }
            .into()
        }
        other => other.into(),
    }
}

fn parse_timestamp(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, format!("bad timestamp '{raw}': {e}")))
}

fn parse_window(idx: usize, raw: &str) -> rusqlite::Result<TimeWindow> {
    TimeWindow::parse(raw).map_err(|e| conversion_error(idx, e.to_string()))
}

fn slot_from_row(row: &Row<'_>) -> rusqlite::Result<Slot> {
    let status: String = row.get(3)?;
    let skip_expires_at: Option<String> = row.get(5)?;
    let active_since: Option<String> = row.get(6)?;
    Ok(Slot {
        id: row.get(0)?,
        owner: row.get(1)?,
        window: parse_window(2, &row.get::<_, String>(2)?)?,
        status: SlotStatus::parse(&status)
            .ok_or_else(|| conversion_error(3, format!("unknown status '{status}'")))?,
        miss_count: row.get(4)?,
        skip_expires_at: skip_expires_at
            .map(|raw| parse_timestamp(5, &raw))
            .transpose()?,
        active_since: active_since
            .map(|raw| parse_timestamp(6, &raw))
            .transpose()?,
        version: row.get(7)?,
        created_at: parse_timestamp(8, &row.get::<_, String>(8)?)?,
        updated_at: parse_timestamp(9, &row.get::<_, String>(9)?)?,
    })
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<AttendanceRecord> {
    let date: String = row.get(3)?;
    Ok(AttendanceRecord {
        slot_id: row.get(0)?,
        user_id: row.get(1)?,
        window: parse_window(2, &row.get::<_, String>(2)?)?,
        date: NaiveDate::parse_from_str(&date, "%Y-%m-%d")
            .map_err(|e| conversion_error(3, format!("bad date '{date}': {e}")))?,
        attended: row.get(4)?,
        duration_secs: row.get(5)?,
        recorded_at: parse_timestamp(6, &row.get::<_, String>(6)?)?,
    })
}

impl SlotStore for Database {
    fn load_slot(&self, id: &str) -> Result<Slot> {
        let sql = format!("SELECT {SLOT_COLUMNS} FROM slots WHERE id = ?1");
        self.conn()
            .query_row(&sql, params![id], slot_from_row)
            .optional()
            .map_err(decode_error("slots"))?
            .ok_or_else(|| CoreError::slot_not_found(id))
    }

    fn insert_slot(&self, slot: &Slot) -> Result<()> {
        let result = self.conn().execute(
            "INSERT INTO slots (id, owner, time_window, status, miss_count, skip_expires_at,
                                active_since, version, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                slot.id,
                slot.owner,
                slot.window.to_string(),
                slot.status.as_str(),
                slot.miss_count,
                slot.skip_expires_at.map(|t| t.to_rfc3339()),
                slot.active_since.map(|t| t.to_rfc3339()),
                slot.version,
                slot.created_at.to_rfc3339(),
                slot.updated_at.to_rfc3339(),
            ],
        );
        match result {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == ErrorCode::ConstraintViolation => {
                Err(CoreError::conflict(
                    &slot.id,
                    "slot id exists or owner already holds this window",
                ))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn save_slot(&self, slot: &Slot, expected_version: u64) -> Result<u64> {
        let conn = self.conn();
        let next_version = expected_version + 1;
        let result = conn.execute(
            "UPDATE slots
             SET owner = ?1, time_window = ?2, status = ?3, miss_count = ?4,
                 skip_expires_at = ?5, active_since = ?6, version = ?7, updated_at = ?8
             WHERE id = ?9 AND version = ?10",
            params![
                slot.owner,
                slot.window.to_string(),
                slot.status.as_str(),
                slot.miss_count,
                slot.skip_expires_at.map(|t| t.to_rfc3339()),
                slot.active_since.map(|t| t.to_rfc3339()),
                next_version,
                slot.updated_at.to_rfc3339(),
                slot.id,
                expected_version,
            ],
        );
        let changed = match result {
            Ok(n) => n,
            Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == ErrorCode::ConstraintViolation => {
                return Err(CoreError::conflict(&slot.id, "owner already holds this window"));
            }
            Err(e) => return Err(e.into()),
        };
        if changed == 1 {
            return Ok(next_version);
        }

        let stored: Option<u64> = conn
            .query_row(
                "SELECT version FROM slots WHERE id = ?1",
                params![slot.id],
                |row| row.get(0),
            )
            .optional()?;
        match stored {
            Some(found) => Err(CoreError::conflict(
                &slot.id,
                format!("expected version {expected_version}, found {found}"),
            )),
            None => Err(CoreError::slot_not_found(&slot.id)),
        }
    }

    fn list_slots(&self) -> Result<Vec<Slot>> {
        let conn = self.conn();
        let sql = format!("SELECT {SLOT_COLUMNS} FROM slots ORDER BY created_at, id");
        let mut stmt = conn.prepare(&sql)?;
        let slots = stmt
            .query_map([], slot_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(decode_error("slots"))?;
        Ok(slots)
    }

    fn append_attendance(&self, record: &AttendanceRecord) -> Result<()> {
        let result = self.conn().execute(
            "INSERT INTO attendance (slot_id, user_id, time_window, date, attended,
                                     duration_secs, recorded_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                record.slot_id,
                record.user_id,
                record.window.to_string(),
                record.date.format("%Y-%m-%d").to_string(),
                record.attended,
                record.duration_secs,
                record.recorded_at.to_rfc3339(),
            ],
        );
        match result {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == ErrorCode::ConstraintViolation => {
                Err(CoreError::DuplicateRecord {
                    slot_id: record.slot_id.clone(),
                    date: record.date,
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    fn query_attendance(&self, filter: &AttendanceFilter) -> Result<Vec<AttendanceRecord>> {
        let mut clauses: Vec<&str> = Vec::new();
        let mut values: Vec<Value> = Vec::new();

        if let Some(slot_id) = &filter.slot_id {
            clauses.push("slot_id = ?");
            values.push(Value::Text(slot_id.clone()));
        }
        if let Some(user_id) = &filter.user_id {
            clauses.push("user_id = ?");
            values.push(Value::Text(user_id.clone()));
        }
        if let Some(window) = filter.window {
            clauses.push("time_window = ?");
            values.push(Value::Text(window.to_string()));
        }
        if let Some(from) = filter.from {
            clauses.push("date >= ?");
            values.push(Value::Text(from.format("%Y-%m-%d").to_string()));
        }
        if let Some(to) = filter.to {
            clauses.push("date <= ?");
            values.push(Value::Text(to.format("%Y-%m-%d").to_string()));
        }
        if let Some(attended) = filter.attended {
            clauses.push("attended = ?");
            values.push(Value::Integer(attended as i64));
        }

        let where_sql = if clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", clauses.join(" AND "))
        };
        let sql = format!(
            "SELECT slot_id, user_id, time_window, date, attended, duration_secs, recorded_at
             FROM attendance {where_sql}
             ORDER BY date, slot_id"
        );

        let conn = self.conn();
        let mut stmt = conn.prepare(&sql)?;
        let records = stmt
            .query_map(params_from_iter(values), record_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(decode_error("attendance"))?;
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::slot::{SlotEvent, SlotPolicy};

    fn window() -> TimeWindow {
        TimeWindow::parse("04:00-04:30").unwrap()
    }

    fn record(slot_id: &str, day: u32, attended: bool) -> AttendanceRecord {
        AttendanceRecord {
            slot_id: slot_id.into(),
            user_id: "user-1".into(),
            window: window(),
            date: NaiveDate::from_ymd_opt(2024, 12, day).unwrap(),
            attended,
            duration_secs: 900,
            recorded_at: Utc::now(),
        }
    }

    #[test]
    fn slot_roundtrip_and_version_check() {
        let db = Database::open_memory().unwrap();
        let now = Utc::now();
        let mut slot = Slot::new(window(), now);
        db.insert_slot(&slot).unwrap();

        slot.apply(
            &SlotEvent::Assign {
                owner: "user-1".into(),
                window: window(),
            },
            now,
            &SlotPolicy::default(),
        )
        .unwrap();
        slot.apply(&SlotEvent::RequestSkip, now, &SlotPolicy::default())
            .unwrap();
        assert_eq!(db.save_slot(&slot, 0).unwrap(), 1);

        let loaded = db.load_slot(&slot.id).unwrap();
        assert_eq!(loaded.status, SlotStatus::Skipped);
        assert_eq!(loaded.owner.as_deref(), Some("user-1"));
        assert_eq!(loaded.version, 1);
        assert!(loaded.skip_expires_at.is_some());

        assert!(matches!(
            db.save_slot(&slot, 0),
            Err(CoreError::Conflict { .. })
        ));
    }

    #[test]
    fn missing_slot_is_not_found() {
        let db = Database::open_memory().unwrap();
        assert!(matches!(
            db.load_slot("slot-missing"),
            Err(CoreError::NotFound { .. })
        ));
        let ghost = Slot::new(window(), Utc::now());
        assert!(matches!(
            db.save_slot(&ghost, 0),
            Err(CoreError::NotFound { .. })
        ));
    }

    #[test]
    fn duplicate_attendance_is_rejected() {
        let db = Database::open_memory().unwrap();
        db.append_attendance(&record("slot-a", 2, true)).unwrap();
        assert!(matches!(
            db.append_attendance(&record("slot-a", 2, false)),
            Err(CoreError::DuplicateRecord { .. })
        ));
        db.append_attendance(&record("slot-b", 2, false)).unwrap();
    }

    #[test]
    fn query_filters_combine() {
        let db = Database::open_memory().unwrap();
        for day in 1..=5 {
            db.append_attendance(&record("slot-a", day, day % 2 == 1)).unwrap();
        }
        let filter = AttendanceFilter {
            attended: Some(true),
            ..AttendanceFilter::for_user("user-1").between(
                NaiveDate::from_ymd_opt(2024, 12, 2).unwrap(),
                NaiveDate::from_ymd_opt(2024, 12, 5).unwrap(),
            )
        };
        let rows = db.query_attendance(&filter).unwrap();
        let days: Vec<u32> = rows.iter().map(|r| chrono::Datelike::day(&r.date)).collect();
        assert_eq!(days, vec![3, 5]);
        assert_eq!(rows[0].window, window());
    }

    #[test]
    fn owner_cannot_hold_same_window_twice() {
        let db = Database::open_memory().unwrap();
        let now = Utc::now();
        let assign = SlotEvent::Assign {
            owner: "user-1".into(),
            window: window(),
        };
        let mut first = Slot::new(window(), now);
        first.apply(&assign, now, &SlotPolicy::default()).unwrap();
        db.insert_slot(&first).unwrap();

        let mut second = Slot::new(window(), now);
        second.apply(&assign, now, &SlotPolicy::default()).unwrap();
        assert!(matches!(
            db.insert_slot(&second),
            Err(CoreError::Conflict { .. })
        ));
    }

    #[test]
    fn undecodable_rows_are_reported_as_corrupt() {
        let db = Database::open_memory().unwrap();
        let slot = Slot::new(window(), Utc::now());
        db.insert_slot(&slot).unwrap();
        db.append_attendance(&record(&slot.id, 2, true)).unwrap();
        {
            let conn = db.conn();
            conn.execute("UPDATE slots SET status = 'lost'", []).unwrap();
            conn.execute("UPDATE attendance SET date = 'someday'", []).unwrap();
        }

        assert!(matches!(
            db.load_slot(&slot.id),
            Err(CoreError::Database(DatabaseError::CorruptRow { table: "slots", .. }))
        ));
        assert!(matches!(
            db.list_slots(),
            Err(CoreError::Database(DatabaseError::CorruptRow { table: "slots", .. }))
        ));
        assert!(matches!(
            db.query_attendance(&AttendanceFilter::for_slot(&slot.id)),
            Err(CoreError::Database(DatabaseError::CorruptRow { table: "attendance", .. }))
        ));
    }

    #[test]
    fn kv_store() {
        let db = Database::open_memory().unwrap();
        assert!(db.kv_get("test").unwrap().is_none());
        db.kv_set("test", "hello").unwrap();
        assert_eq!(db.kv_get("test").unwrap().unwrap(), "hello");
    }

    #[test]
    fn reopen_on_disk_keeps_data() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vigil.db");
        {
            let db = Database::open_at(&path).unwrap();
            db.append_attendance(&record("slot-a", 1, true)).unwrap();
        }
        let db = Database::open_at(&path).unwrap();
        assert_eq!(
            db.query_attendance(&AttendanceFilter::default()).unwrap().len(),
            1
        );
    }
}
