//! Read-only attendance queries for the presentation layer.

use crate::sqlite::{parse_status, row_to_person, Person, SqliteStore, SqliteStoreError};
use chrono::{Duration, NaiveDate, NaiveDateTime};
use rollcall_core::{AttendanceStatus, InvalidInput};
use rusqlite::params;
use serde::Serialize;

/// One person's row on a given date.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyAttendance {
    pub name: String,
    pub role: String,
    pub date: NaiveDate,
    pub time_in: Option<NaiveDateTime>,
    pub time_out: Option<NaiveDateTime>,
    pub status: AttendanceStatus,
}

/// Days present per person over a date range.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PersonSummary {
    pub name: String,
    pub role: String,
    pub days_present: u32,
    pub total_days: u32,
    /// Percentage of days present.
    pub rate: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Statistics {
    pub total_people: u32,
    pub present: u32,
    pub absent: u32,
}

const ATTENDANCE_COLUMNS: &str =
    "SELECT p.name, p.role, a.date, a.time_in, a.time_out, a.status
     FROM attendance a JOIN people p ON a.person_id = p.id";

fn row_to_daily(row: &rusqlite::Row<'_>) -> rusqlite::Result<DailyAttendance> {
    Ok(DailyAttendance {
        name: row.get(0)?,
        role: row.get(1)?,
        date: row.get(2)?,
        time_in: row.get(3)?,
        time_out: row.get(4)?,
        status: parse_status(row, 5)?,
    })
}

impl SqliteStore {
    /// Attendance rows for `date`, ordered by name.
    pub fn attendance_by_date(&self, date: NaiveDate) -> Result<Vec<DailyAttendance>, SqliteStoreError> {
        let conn = self.lock();
        let mut stmt = conn.prepare(&format!(
            "{ATTENDANCE_COLUMNS} WHERE a.date = ?1 ORDER BY p.name"
        ))?;
        let rows = stmt.query_map(params![date], row_to_daily)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Registered people with no attendance row on `date`.
    pub fn absent_on(&self, date: NaiveDate) -> Result<Vec<Person>, SqliteStoreError> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT id, name, role, image_path, created_at FROM people p
             WHERE NOT EXISTS (
                 SELECT 1 FROM attendance a WHERE a.person_id = p.id AND a.date = ?1
             )
             ORDER BY name",
        )?;
        let rows = stmt.query_map(params![date], row_to_person)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Rows between `start` and `end` inclusive, newest date first.
    pub fn attendance_report(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<DailyAttendance>, SqliteStoreError> {
        check_range(start, end)?;
        let conn = self.lock();
        let mut stmt = conn.prepare(&format!(
            "{ATTENDANCE_COLUMNS} WHERE a.date BETWEEN ?1 AND ?2 ORDER BY a.date DESC, p.name"
        ))?;
        let rows = stmt.query_map(params![start, end], row_to_daily)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// One person's rows over the last `days` days up to `today`.
    pub fn person_history(
        &self,
        name: &str,
        days: u32,
        today: NaiveDate,
    ) -> Result<Vec<DailyAttendance>, SqliteStoreError> {
        if self.person_by_name(name)?.is_none() {
            return Err(SqliteStoreError::PersonNotFound(name.into()));
        }
        let since = today - Duration::days(i64::from(days));
        let conn = self.lock();
        let mut stmt = conn.prepare(&format!(
            "{ATTENDANCE_COLUMNS} WHERE p.name = ?1 AND a.date BETWEEN ?2 AND ?3 ORDER BY a.date DESC"
        ))?;
        let rows = stmt.query_map(params![name, since, today], row_to_daily)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Days present per registered person between `start` and `end` inclusive.
    pub fn summary(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<PersonSummary>, SqliteStoreError> {
        check_range(start, end)?;
        let total_days = u32::try_from((end - start).num_days() + 1)
            .map_err(|_| InvalidInput("date range too large".into()))?;

        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT p.name, p.role, COUNT(a.id) FROM people p
             LEFT JOIN attendance a
                 ON a.person_id = p.id AND a.status = 'present' AND a.date BETWEEN ?1 AND ?2
             GROUP BY p.id
             ORDER BY p.name",
        )?;
        let rows = stmt.query_map(params![start, end], |row| {
            let days_present: u32 = row.get(2)?;
            Ok(PersonSummary {
                name: row.get(0)?,
                role: row.get(1)?,
                days_present,
                total_days,
                rate: f64::from(days_present) / f64::from(total_days) * 100.0,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Headcount of present and absent people on `date`.
    pub fn statistics(&self, date: NaiveDate) -> Result<Statistics, SqliteStoreError> {
        let conn = self.lock();
        let total_people: u32 = conn.query_row("SELECT COUNT(*) FROM people", [], |row| row.get(0))?;
        let present: u32 = conn.query_row(
            "SELECT COUNT(*) FROM attendance WHERE date = ?1 AND status = 'present'",
            params![date],
            |row| row.get(0),
        )?;
        Ok(Statistics {
            total_people,
            present,
            absent: total_people.saturating_sub(present),
        })
    }
}

fn check_range(start: NaiveDate, end: NaiveDate) -> Result<(), InvalidInput> {
    if end < start {
        return Err(InvalidInput(format!("end date {end} is before start date {start}")));
    }
    Ok(())
}
