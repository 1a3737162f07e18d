//! Attendance state machine.
//!
//! Per `(person_id, date)` a record moves ABSENT -> PRESENT_NEW on the first
//! event of the date (`time_in` set) and then stays in PRESENT_SEEN, where
//! every later event overwrites `time_out`. Events are applied in submission
//! order; nothing is buffered or reordered.

use crate::store::{RegistryStore, StoreError};
use crate::types::{AttendanceRecord, IdentityId, RecognitionEvent, Transition};
use chrono::NaiveDateTime;
use thiserror::Error;

/// Upper bound on retries after the store reports a write conflict.
const MAX_CONFLICT_ATTEMPTS: u32 = 3;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AttendanceError {
    #[error("registry store unavailable: {0}")]
    Unavailable(String),
    #[error("attendance write for person {person_id} still conflicting after {attempts} attempts")]
    ConflictExhausted { person_id: IdentityId, attempts: u32 },
    #[error("registry store error: {0}")]
    Store(String),
}

impl AttendanceError {
    /// True when the same event may be submitted again later.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, AttendanceError::Store(_))
    }
}

/// Converts recognition events into attendance records via a registry store.
#[derive(Debug)]
pub struct AttendanceStateMachine<S> {
    store: S,
}

impl<S: RegistryStore> AttendanceStateMachine<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Record a sighting of `person_id` at `observed_at`.
    ///
    /// The record's date is the calendar date of `observed_at`. A conflict
    /// from the store means another writer created the row first; the upsert
    /// is re-issued, which then lands as an update.
    pub fn record(
        &self,
        person_id: IdentityId,
        observed_at: NaiveDateTime,
    ) -> Result<Transition, AttendanceError> {
        let date = observed_at.date();
        let mut attempts = 0;

        loop {
            attempts += 1;
            match self.store.upsert_attendance(person_id, date, observed_at) {
                Ok(transition) => {
                    tracing::debug!(person_id, %date, %observed_at, ?transition, "attendance recorded");
                    return Ok(transition);
                }
                Err(StoreError::Conflict { .. }) if attempts < MAX_CONFLICT_ATTEMPTS => {
                    tracing::debug!(person_id, %date, attempts, "upsert conflict; retrying as update");
                }
                Err(StoreError::Conflict { .. }) => {
                    return Err(AttendanceError::ConflictExhausted {
                        person_id,
                        attempts,
                    });
                }
                Err(StoreError::Unavailable(msg)) => return Err(AttendanceError::Unavailable(msg)),
                Err(StoreError::Backend(msg)) => return Err(AttendanceError::Store(msg)),
            }
        }
    }

    /// Apply one recognition event.
    pub fn apply(&self, event: &RecognitionEvent) -> Result<Transition, AttendanceError> {
        self.record(event.identity_id, event.observed_at)
    }

    /// Current record for `person_id` on the date of `on`, for reporting.
    pub fn current(
        &self,
        person_id: IdentityId,
        on: NaiveDateTime,
    ) -> Result<Option<AttendanceRecord>, AttendanceError> {
        self.store
            .get_attendance(person_id, on.date())
            .map_err(|e| match e {
                StoreError::Unavailable(msg) => AttendanceError::Unavailable(msg),
                other => AttendanceError::Store(other.to_string()),
            })
    }
}
