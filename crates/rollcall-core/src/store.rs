//! Registry store seam.
//!
//! The engine reads identities and writes attendance only through
//! [`RegistryStore`]. [`MemoryStore`] is an in-process implementation used
//! by tests and embedders; the SQLite implementation lives in
//! `rollcall-store`.

use crate::types::{
    AttendanceRecord, AttendanceStatus, Identity, IdentityId, Transition,
};
use chrono::{NaiveDate, NaiveDateTime};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The atomic upsert lost a race on the `(person_id, date)` constraint.
    #[error("conflicting attendance write for person {person_id} on {date}")]
    Conflict {
        person_id: IdentityId,
        date: NaiveDate,
    },
    /// The store could not be reached; the operation may be retried.
    #[error("registry store unavailable: {0}")]
    Unavailable(String),
    #[error("registry store error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Unavailable(_) | StoreError::Conflict { .. })
    }
}

/// Durable storage of identities and attendance rows.
pub trait RegistryStore: Send + Sync {
    fn list_identities(&self) -> Result<Vec<Identity>, StoreError>;

    /// Insert-if-absent-else-update on `(person_id, date)`, atomically.
    ///
    /// A new row gets `time_in = observed_at` and status present; an existing
    /// row gets `time_out = observed_at` and is otherwise left unchanged.
    fn upsert_attendance(
        &self,
        person_id: IdentityId,
        date: NaiveDate,
        observed_at: NaiveDateTime,
    ) -> Result<Transition, StoreError>;

    fn get_attendance(
        &self,
        person_id: IdentityId,
        date: NaiveDate,
    ) -> Result<Option<AttendanceRecord>, StoreError>;
}

impl<S: RegistryStore + ?Sized> RegistryStore for Arc<S> {
    fn list_identities(&self) -> Result<Vec<Identity>, StoreError> {
        (**self).list_identities()
    }

    fn upsert_attendance(
        &self,
        person_id: IdentityId,
        date: NaiveDate,
        observed_at: NaiveDateTime,
    ) -> Result<Transition, StoreError> {
        (**self).upsert_attendance(person_id, date, observed_at)
    }

    fn get_attendance(
        &self,
        person_id: IdentityId,
        date: NaiveDate,
    ) -> Result<Option<AttendanceRecord>, StoreError> {
        (**self).get_attendance(person_id, date)
    }
}

/// In-memory registry store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    identities: RwLock<Vec<Identity>>,
    attendance: Mutex<HashMap<(IdentityId, NaiveDate), AttendanceRecord>>,
}

impl MemoryStore {
    pub fn new(identities: Vec<Identity>) -> Self {
        Self {
            identities: RwLock::new(identities),
            attendance: Mutex::new(HashMap::new()),
        }
    }

    pub fn add_identity(&self, identity: Identity) {
        self.identities
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(identity);
    }

    /// All records for `date`, ordered by person id.
    pub fn records_on(&self, date: NaiveDate) -> Vec<AttendanceRecord> {
        let attendance = self.attendance.lock().unwrap_or_else(PoisonError::into_inner);
        let mut records: Vec<_> = attendance
            .values()
            .filter(|r| r.date == date)
            .cloned()
            .collect();
        records.sort_by_key(|r| r.person_id);
        records
    }

    pub fn record_count(&self) -> usize {
        self.attendance
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl RegistryStore for MemoryStore {
    fn list_identities(&self) -> Result<Vec<Identity>, StoreError> {
        Ok(self
            .identities
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }

    fn upsert_attendance(
        &self,
        person_id: IdentityId,
        date: NaiveDate,
        observed_at: NaiveDateTime,
    ) -> Result<Transition, StoreError> {
        let mut attendance = self.attendance.lock().unwrap_or_else(PoisonError::into_inner);
        match attendance.entry((person_id, date)) {
            Entry::Vacant(slot) => {
                slot.insert(AttendanceRecord {
                    person_id,
                    date,
                    time_in: Some(observed_at),
                    time_out: None,
                    status: AttendanceStatus::Present,
                });
                Ok(Transition::Created)
            }
            Entry::Occupied(mut slot) => {
                slot.get_mut().time_out = Some(observed_at);
                Ok(Transition::Updated)
            }
        }
    }

    fn get_attendance(
        &self,
        person_id: IdentityId,
        date: NaiveDate,
    ) -> Result<Option<AttendanceRecord>, StoreError> {
        Ok(self
            .attendance
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(person_id, date))
            .cloned())
    }
}
