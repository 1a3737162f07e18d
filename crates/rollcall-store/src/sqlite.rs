//! SQLite-backed registry store.
//!
//! One `people` row per registered identity (encoding stored as a
//! little-endian `f32` blob) and at most one `attendance` row per
//! `(person_id, date)`, enforced by a unique constraint and written with a
//! single `INSERT .. ON CONFLICT DO UPDATE` statement.

use chrono::{NaiveDate, NaiveDateTime};
use rollcall_core::{
    AttendanceRecord, AttendanceStatus, Encoding, Identity, IdentityId, InvalidInput,
    RegistryStore, StoreError, Transition,
};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;

/// Schema SQL embedded at compile time.
const SCHEMA_SQL: &str = include_str!("schema.sql");

/// How long a writer waits on a locked database before giving up.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Error, Debug)]
pub enum SqliteStoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    InvalidInput(#[from] InvalidInput),
    #[error("person '{0}' already exists")]
    DuplicateName(String),
    #[error("person '{0}' not found")]
    PersonNotFound(String),
    #[error("stored encoding for person {person_id} is corrupt ({len} bytes)")]
    CorruptEncoding { person_id: IdentityId, len: usize },
}

/// A registered person, without their encoding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Person {
    pub id: IdentityId,
    pub name: String,
    pub role: String,
    pub image_path: Option<String>,
    pub created_at: NaiveDateTime,
}

pub struct SqliteStore {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl SqliteStore {
    /// Open (or create) the database at `path`, creating parent directories.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SqliteStoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        Self::initialize_connection(&conn)?;
        tracing::debug!(path = %path.display(), "registry store opened");

        Ok(Self {
            conn: Mutex::new(conn),
            path: Some(path.to_path_buf()),
        })
    }

    /// In-memory database, for tests.
    pub fn in_memory() -> Result<Self, SqliteStoreError> {
        let conn = Connection::open_in_memory()?;
        Self::initialize_connection(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            path: None,
        })
    }

    fn initialize_connection(conn: &Connection) -> Result<(), SqliteStoreError> {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(())
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a person. Names are unique.
    pub fn add_person(
        &self,
        name: &str,
        role: &str,
        encoding: &Encoding,
        image_path: Option<&str>,
    ) -> Result<IdentityId, SqliteStoreError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(InvalidInput("name cannot be empty".into()).into());
        }
        if encoding.dimension() == 0 || !encoding.is_finite() {
            return Err(InvalidInput("encoding must be non-empty and finite".into()).into());
        }

        let conn = self.lock();
        let inserted = conn.execute(
            "INSERT INTO people (name, role, encoding, image_path) VALUES (?1, ?2, ?3, ?4)",
            params![name, role, encode_encoding(encoding), image_path],
        );
        match inserted {
            Ok(_) => {
                let id = conn.last_insert_rowid();
                tracing::info!(id, name, role, "person added");
                Ok(id)
            }
            Err(e) if is_constraint_violation(&e) => Err(SqliteStoreError::DuplicateName(name.into())),
            Err(e) => Err(e.into()),
        }
    }

    /// Remove a person and all of their attendance rows.
    pub fn remove_person(&self, name: &str) -> Result<(), SqliteStoreError> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        let id: Option<IdentityId> = tx
            .query_row("SELECT id FROM people WHERE name = ?1", params![name], |row| row.get(0))
            .optional()?;
        let id = id.ok_or_else(|| SqliteStoreError::PersonNotFound(name.into()))?;

        let rows = tx.execute("DELETE FROM attendance WHERE person_id = ?1", params![id])?;
        tx.execute("DELETE FROM people WHERE id = ?1", params![id])?;
        tx.commit()?;

        tracing::info!(id, name, attendance_rows = rows, "person removed");
        Ok(())
    }

    /// All people, ordered by name.
    pub fn list_people(&self) -> Result<Vec<Person>, SqliteStoreError> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT id, name, role, image_path, created_at FROM people ORDER BY name",
        )?;
        let rows = stmt.query_map([], row_to_person)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn person_by_name(&self, name: &str) -> Result<Option<Person>, SqliteStoreError> {
        let conn = self.lock();
        Ok(conn
            .query_row(
                "SELECT id, name, role, image_path, created_at FROM people WHERE name = ?1",
                params![name],
                row_to_person,
            )
            .optional()?)
    }

    fn load_identities(&self) -> Result<Vec<Identity>, SqliteStoreError> {
        let conn = self.lock();
        let mut stmt = conn.prepare("SELECT id, name, role, encoding FROM people ORDER BY id")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, IdentityId>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, Vec<u8>>(3)?,
            ))
        })?;

        let mut identities = Vec::new();
        for row in rows {
            let (id, name, role, blob) = row?;
            let reference_encoding = decode_encoding(&blob).ok_or(
                SqliteStoreError::CorruptEncoding {
                    person_id: id,
                    len: blob.len(),
                },
            )?;
            identities.push(Identity {
                id,
                name,
                role,
                reference_encoding,
            });
        }
        Ok(identities)
    }
}

impl RegistryStore for SqliteStore {
    fn list_identities(&self) -> Result<Vec<Identity>, StoreError> {
        self.load_identities().map_err(|e| match e {
            SqliteStoreError::Database(e) => to_store_error(e),
            other => StoreError::Backend(other.to_string()),
        })
    }

    fn upsert_attendance(
        &self,
        person_id: IdentityId,
        date: NaiveDate,
        observed_at: NaiveDateTime,
    ) -> Result<Transition, StoreError> {
        let conn = self.lock();
        // An update always sets time_out, so a NULL time_out in the returned
        // row means this statement inserted it.
        let created: bool = conn
            .query_row(
                "INSERT INTO attendance (person_id, date, time_in, status)
                 VALUES (?1, ?2, ?3, 'present')
                 ON CONFLICT (person_id, date) DO UPDATE SET time_out = excluded.time_in
                 RETURNING time_out IS NULL",
                params![person_id, date, observed_at],
                |row| row.get(0),
            )
            .map_err(|e| {
                if unique_violation(&e) {
                    StoreError::Conflict { person_id, date }
                } else {
                    to_store_error(e)
                }
            })?;

        Ok(if created {
            Transition::Created
        } else {
            Transition::Updated
        })
    }

    fn get_attendance(
        &self,
        person_id: IdentityId,
        date: NaiveDate,
    ) -> Result<Option<AttendanceRecord>, StoreError> {
        let conn = self.lock();
        conn.query_row(
            "SELECT person_id, date, time_in, time_out, status
             FROM attendance WHERE person_id = ?1 AND date = ?2",
            params![person_id, date],
            row_to_record,
        )
        .optional()
        .map_err(to_store_error)
    }
}

pub(crate) fn row_to_person(row: &rusqlite::Row<'_>) -> rusqlite::Result<Person> {
    Ok(Person {
        id: row.get(0)?,
        name: row.get(1)?,
        role: row.get(2)?,
        image_path: row.get(3)?,
        created_at: row.get(4)?,
    })
}

pub(crate) fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<AttendanceRecord> {
    Ok(AttendanceRecord {
        person_id: row.get(0)?,
        date: row.get(1)?,
        time_in: row.get(2)?,
        time_out: row.get(3)?,
        status: parse_status(row, 4)?,
    })
}

pub(crate) fn parse_status(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<AttendanceStatus> {
    let raw: String = row.get(idx)?;
    raw.parse().map_err(|e: InvalidInput| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn encode_encoding(encoding: &Encoding) -> Vec<u8> {
    encoding
        .values
        .iter()
        .flat_map(|v| v.to_le_bytes())
        .collect()
}

fn decode_encoding(blob: &[u8]) -> Option<Encoding> {
    if blob.is_empty() || blob.len() % 4 != 0 {
        return None;
    }
    let values = blob
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();
    Some(Encoding::new(values))
}

fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(err.sqlite_error_code(), Some(ErrorCode::ConstraintViolation))
}

fn unique_violation(err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(e, _) => matches!(
            e.extended_code,
            rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE | rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
        ),
        _ => false,
    }
}

/// Busy, locked and I/O failures are transient; everything else is not.
fn to_store_error(err: rusqlite::Error) -> StoreError {
    match err.sqlite_error_code() {
        Some(
            ErrorCode::DatabaseBusy
            | ErrorCode::DatabaseLocked
            | ErrorCode::CannotOpen
            | ErrorCode::SystemIoFailure,
        ) => StoreError::Unavailable(err.to_string()),
        _ => StoreError::Backend(err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(d: u32, h: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 10, d)
            .unwrap()
            .and_hms_opt(h, 0, 0)
            .unwrap()
    }

    fn enc(values: &[f32]) -> Encoding {
        Encoding::new(values.to_vec())
    }

    #[test]
    fn test_encoding_blob_round_trip() {
        let original = enc(&[0.5, -1.25, 3.0e-4]);
        assert_eq!(decode_encoding(&encode_encoding(&original)), Some(original));
        assert_eq!(decode_encoding(&[1, 2, 3]), None);
        assert_eq!(decode_encoding(&[]), None);
    }

    #[test]
    fn test_add_and_list_identities() {
        let store = SqliteStore::in_memory().unwrap();
        let alice = store.add_person("Alice", "Student", &enc(&[1.0, 0.0]), None).unwrap();
        let bob = store
            .add_person("Bob", "Teacher", &enc(&[0.0, 1.0]), Some("faces/bob.jpg"))
            .unwrap();

        let identities = store.list_identities().unwrap();
        assert_eq!(identities.len(), 2);
        assert_eq!(identities[0].id, alice);
        assert_eq!(identities[0].reference_encoding, enc(&[1.0, 0.0]));
        assert_eq!(identities[1].id, bob);
        assert_eq!(identities[1].role, "Teacher");

        let person = store.person_by_name("Bob").unwrap().unwrap();
        assert_eq!(person.image_path.as_deref(), Some("faces/bob.jpg"));
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let store = SqliteStore::in_memory().unwrap();
        store.add_person("Alice", "Student", &enc(&[1.0]), None).unwrap();
        let err = store.add_person("Alice", "Employee", &enc(&[2.0]), None).unwrap_err();
        assert!(matches!(err, SqliteStoreError::DuplicateName(n) if n == "Alice"));
    }

    #[test]
    fn test_add_rejects_bad_input() {
        let store = SqliteStore::in_memory().unwrap();
        assert!(store.add_person("  ", "Student", &enc(&[1.0]), None).is_err());
        assert!(store.add_person("Eve", "Student", &enc(&[]), None).is_err());
        assert!(store.add_person("Eve", "Student", &enc(&[f32::NAN]), None).is_err());
    }

    #[test]
    fn test_upsert_created_then_updated() {
        let store = SqliteStore::in_memory().unwrap();
        let id = store.add_person("Alice", "Student", &enc(&[1.0]), None).unwrap();
        let date = at(19, 0).date();

        assert_eq!(store.upsert_attendance(id, date, at(19, 9)).unwrap(), Transition::Created);
        let record = store.get_attendance(id, date).unwrap().unwrap();
        assert_eq!(record.time_in, Some(at(19, 9)));
        assert_eq!(record.time_out, None);
        assert_eq!(record.status, AttendanceStatus::Present);

        assert_eq!(store.upsert_attendance(id, date, at(19, 17)).unwrap(), Transition::Updated);
        assert_eq!(store.upsert_attendance(id, date, at(19, 12)).unwrap(), Transition::Updated);
        let record = store.get_attendance(id, date).unwrap().unwrap();
        assert_eq!(record.time_in, Some(at(19, 9)));
        assert_eq!(record.time_out, Some(at(19, 12)));
    }

    #[test]
    fn test_upsert_unknown_person_is_backend_error() {
        let store = SqliteStore::in_memory().unwrap();
        let err = store.upsert_attendance(99, at(19, 0).date(), at(19, 9)).unwrap_err();
        assert!(matches!(err, StoreError::Backend(_)), "{err:?}");
    }

    #[test]
    fn test_remove_person_deletes_attendance() {
        let store = SqliteStore::in_memory().unwrap();
        let id = store.add_person("Alice", "Student", &enc(&[1.0]), None).unwrap();
        store.upsert_attendance(id, at(19, 0).date(), at(19, 9)).unwrap();

        store.remove_person("Alice").unwrap();
        assert!(store.person_by_name("Alice").unwrap().is_none());
        assert!(store.get_attendance(id, at(19, 0).date()).unwrap().is_none());
        assert!(matches!(
            store.remove_person("Alice"),
            Err(SqliteStoreError::PersonNotFound(_))
        ));
    }
}
