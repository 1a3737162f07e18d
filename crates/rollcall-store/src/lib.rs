//! rollcall-store — SQLite registry store.
//!
//! Holds registered people with their reference encodings and the daily
//! attendance rows written by the attendance state machine, plus the
//! read-only queries used for reports.

pub mod report;
pub mod sqlite;

pub use report::{DailyAttendance, PersonSummary, Statistics};
pub use sqlite::{Person, SqliteStore, SqliteStoreError};

use std::path::PathBuf;

/// Default database location: `$XDG_DATA_HOME/rollcall/attendance.db`.
pub fn default_db_path() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("rollcall")
        .join("attendance.db")
}
