//! Attendance writer: drains a session's event channel into the attendance
//! state machine.
//!
//! Writes go through the blocking pool, one event at a time, so the store
//! sees events in the order the session emitted them. A write that fails
//! with a retryable error is retried with exponential backoff. Once retries
//! are exhausted the event is dropped and, for a first recognition, the
//! identity is released from the session's dedup cache so its next sighting
//! is written instead.

use rollcall_core::{
    AttendanceStateMachine, DedupHandle, EventReceiver, RegistryStore, SessionEvent,
};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub retries: u32,
    /// Delay before the first retry.
    pub backoff: Duration,
}

impl RetryPolicy {
    fn delay(&self, attempt: u32) -> Duration {
        self.backoff.saturating_mul(1u32 << attempt.min(6))
    }
}

/// Totals reported when the channel closes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriterStats {
    pub written: u64,
    pub dropped: u64,
}

/// Run until the session drops its sender and every queued event is handled.
pub async fn run<S>(
    mut events: EventReceiver,
    machine: Arc<AttendanceStateMachine<S>>,
    policy: RetryPolicy,
    dedup: DedupHandle,
) -> WriterStats
where
    S: RegistryStore + 'static,
{
    let mut stats = WriterStats::default();
    while let Some(event) = events.recv().await {
        match write(event, &machine, policy).await {
            Ok(()) => stats.written += 1,
            Err(GiveUp { retryable }) => {
                stats.dropped += 1;
                if let SessionEvent::Recognized(recognition) = event {
                    if retryable {
                        dedup.release(recognition.identity_id);
                    }
                }
            }
        }
    }
    tracing::debug!(written = stats.written, dropped = stats.dropped, "attendance writer finished");
    stats
}

/// A write that was abandoned. `retryable` is false when the store rejected
/// the event outright.
struct GiveUp {
    retryable: bool,
}

async fn write<S>(
    event: SessionEvent,
    machine: &Arc<AttendanceStateMachine<S>>,
    policy: RetryPolicy,
) -> Result<(), GiveUp>
where
    S: RegistryStore + 'static,
{
    let recognition = *event.recognition();
    let mut attempt = 0;

    loop {
        let machine = Arc::clone(machine);
        let result = tokio::task::spawn_blocking(move || machine.apply(&recognition)).await;

        match result {
            Ok(Ok(transition)) => {
                tracing::debug!(
                    identity = recognition.identity_id,
                    observed_at = %recognition.observed_at,
                    ?transition,
                    "attendance written"
                );
                return Ok(());
            }
            Ok(Err(e)) if e.is_retryable() && attempt < policy.retries => {
                let delay = policy.delay(attempt);
                attempt += 1;
                tracing::warn!(
                    identity = recognition.identity_id,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "attendance write failed; retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Ok(Err(e)) => {
                tracing::error!(
                    identity = recognition.identity_id,
                    observed_at = %recognition.observed_at,
                    error = %e,
                    "attendance write failed; event dropped"
                );
                return Err(GiveUp {
                    retryable: e.is_retryable(),
                });
            }
            Err(e) => {
                tracing::error!(error = %e, "attendance write task panicked; event dropped");
                return Err(GiveUp { retryable: false });
            }
        }
    }
}
