//! Registry administration and reports, straight against the SQLite store.

use anyhow::{bail, Context, Result};
use chrono::{NaiveDate, NaiveDateTime};
use rollcall_core::{AttendanceStateMachine, Encoding, Transition};
use rollcall_store::{DailyAttendance, SqliteStore};
use serde::Serialize;
use std::path::Path;

/// Read a reference encoding: a JSON array of numbers.
pub fn read_encoding(path: &Path, dimension: usize) -> Result<Encoding> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let encoding: Encoding = serde_json::from_str(&raw)
        .with_context(|| format!("{} is not a JSON array of numbers", path.display()))?;
    encoding.validate(dimension)?;
    Ok(encoding)
}

pub fn add(
    store: &SqliteStore,
    name: &str,
    role: &str,
    encoding: &Encoding,
    image: Option<&str>,
) -> Result<()> {
    let id = store.add_person(name, role, encoding, image)?;
    println!("Registered {name} ({role}) as person {id}");
    Ok(())
}

pub fn remove(store: &SqliteStore, name: &str) -> Result<()> {
    store.remove_person(name)?;
    println!("Removed {name} and their attendance history");
    Ok(())
}

pub fn people(store: &SqliteStore, json: bool) -> Result<()> {
    let people = store.list_people()?;
    if json {
        return print_json(&people);
    }
    if people.is_empty() {
        println!("No people registered");
        return Ok(());
    }
    println!("{:>4}  {:<24} {:<12} {}", "ID", "NAME", "ROLE", "REGISTERED");
    for p in &people {
        println!("{:>4}  {:<24} {:<12} {}", p.id, p.name, p.role, p.created_at);
    }
    Ok(())
}

/// Manual attendance entry through the same state machine the daemon uses.
pub fn mark(store: SqliteStore, name: &str, at: NaiveDateTime) -> Result<()> {
    let Some(person) = store.person_by_name(name)? else {
        bail!("person '{name}' not found");
    };
    let machine = AttendanceStateMachine::new(store);
    match machine.record(person.id, at)? {
        Transition::Created => println!("{name}: time in {at}"),
        Transition::Updated => println!("{name}: time out {at}"),
    }
    Ok(())
}

pub fn today(store: &SqliteStore, date: NaiveDate, json: bool) -> Result<()> {
    let present = store.attendance_by_date(date)?;
    let absent = store.absent_on(date)?;
    if json {
        return print_json(&serde_json::json!({
            "date": date,
            "present": present,
            "absent": absent,
        }));
    }

    println!("Attendance for {date}");
    print_rows(&present);
    if !absent.is_empty() {
        let names: Vec<_> = absent.iter().map(|p| p.name.as_str()).collect();
        println!("\nAbsent: {}", names.join(", "));
    }
    Ok(())
}

pub fn history(store: &SqliteStore, name: &str, days: u32, today: NaiveDate, json: bool) -> Result<()> {
    let rows = store.person_history(name, days, today)?;
    if json {
        return print_json(&rows);
    }
    println!("{name}: {} day(s) present in the last {days} days", rows.len());
    print_rows(&rows);
    Ok(())
}

pub fn report(
    store: &SqliteStore,
    from: NaiveDate,
    to: NaiveDate,
    summary: bool,
    json: bool,
) -> Result<()> {
    if summary {
        let rows = store.summary(from, to)?;
        if json {
            return print_json(&rows);
        }
        println!("{:<24} {:<12} {:>8} {:>7}", "NAME", "ROLE", "PRESENT", "RATE");
        for r in &rows {
            println!(
                "{:<24} {:<12} {:>4}/{:<3} {:>6.1}%",
                r.name, r.role, r.days_present, r.total_days, r.rate
            );
        }
        return Ok(());
    }

    let rows = store.attendance_report(from, to)?;
    if json {
        return print_json(&rows);
    }
    print_rows(&rows);
    Ok(())
}

pub fn stats(store: &SqliteStore, date: NaiveDate, json: bool) -> Result<()> {
    let stats = store.statistics(date)?;
    if json {
        return print_json(&stats);
    }
    println!("{date}: {} registered, {} present, {} absent", stats.total_people, stats.present, stats.absent);
    Ok(())
}

fn print_rows(rows: &[DailyAttendance]) {
    if rows.is_empty() {
        println!("No attendance recorded");
        return;
    }
    println!("{:<12} {:<24} {:<12} {:<10} {:<10} {}", "DATE", "NAME", "ROLE", "IN", "OUT", "STATUS");
    for r in rows {
        println!(
            "{:<12} {:<24} {:<12} {:<10} {:<10} {}",
            r.date,
            r.name,
            r.role,
            clock(r.time_in),
            clock(r.time_out),
            r.status
        );
    }
}

fn clock(t: Option<NaiveDateTime>) -> String {
    t.map(|t| t.format("%H:%M:%S").to_string())
        .unwrap_or_else(|| "-".into())
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_read_encoding_validates_dimension() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "[0.1, 0.2, 0.3]").unwrap();

        assert_eq!(read_encoding(file.path(), 3).unwrap().dimension(), 3);
        assert!(read_encoding(file.path(), 128).is_err());
    }

    #[test]
    fn test_read_encoding_rejects_garbage() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"name": "Alice"}}"#).unwrap();
        assert!(read_encoding(file.path(), 3).is_err());
    }

    #[test]
    fn test_mark_twice_sets_time_out() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("attendance.db");
        let store = SqliteStore::open(&path).unwrap();
        store
            .add_person("Alice", "Student", &Encoding::new(vec![0.5; 3]), None)
            .unwrap();
        drop(store);

        let day = NaiveDate::from_ymd_opt(2026, 10, 19).unwrap();
        mark(SqliteStore::open(&path).unwrap(), "Alice", day.and_hms_opt(8, 0, 0).unwrap()).unwrap();
        mark(SqliteStore::open(&path).unwrap(), "Alice", day.and_hms_opt(16, 0, 0).unwrap()).unwrap();
        assert!(mark(SqliteStore::open(&path).unwrap(), "Bob", day.and_hms_opt(9, 0, 0).unwrap()).is_err());

        let rows = SqliteStore::open(&path).unwrap().attendance_by_date(day).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].time_out, day.and_hms_opt(16, 0, 0));
    }
}
