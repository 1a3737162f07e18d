use chrono::NaiveDate;
use rollcall_core::{
    AttendanceStateMachine, FrameOutcome, InvalidInput, RegistryStore, Session, SessionConfig,
    SessionError, SessionSummary,
};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::feed::{FeedFrame, PrecomputedEncoder};
use crate::writer::{self, RetryPolicy, WriterStats};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    InvalidInput(#[from] InvalidInput),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error("session {0} is already running")]
    SessionActive(Uuid),
    #[error("no session is running")]
    NoSession,
    #[error("attendance writer failed: {0}")]
    Writer(#[from] tokio::task::JoinError),
    #[error("failed to spawn engine thread: {0}")]
    Spawn(std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Snapshot of the running session, if any.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub session: Option<SessionStatus>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    pub session_id: Uuid,
    pub identities: usize,
    pub tolerance: f32,
    pub stride: u32,
    pub recognized_count: usize,
}

/// Result of stopping a session, once its queued attendance writes are done.
#[derive(Debug, Clone, Serialize)]
pub struct StopReport {
    #[serde(flatten)]
    pub summary: SessionSummary,
    pub written: u64,
    pub dropped: u64,
}

/// Messages sent from D-Bus handlers to the engine thread.
enum EngineRequest {
    Start {
        config: SessionConfig,
        reply: oneshot::Sender<Result<SessionStatus, EngineError>>,
    },
    Stop {
        reply: oneshot::Sender<Result<(SessionSummary, JoinHandle<WriterStats>), EngineError>>,
    },
    Frame {
        frame: FeedFrame,
        reply: oneshot::Sender<Result<FrameOutcome, EngineError>>,
    },
    Status {
        reply: oneshot::Sender<EngineStatus>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> EngineRequest,
    ) -> Result<T, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(build(reply_tx))
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)
    }

    /// Start a session: load the registry snapshot and clear the dedup cache.
    pub async fn start(&self, config: SessionConfig) -> Result<SessionStatus, EngineError> {
        self.request(|reply| EngineRequest::Start { config, reply })
            .await?
    }

    /// Stop the running session and wait for its attendance writes to drain.
    pub async fn stop(&self) -> Result<StopReport, EngineError> {
        let (summary, writer) = self.request(|reply| EngineRequest::Stop { reply }).await??;
        let stats = writer.await?;
        Ok(StopReport {
            summary,
            written: stats.written,
            dropped: stats.dropped,
        })
    }

    pub async fn submit_frame(&self, frame: FeedFrame) -> Result<FrameOutcome, EngineError> {
        self.request(|reply| EngineRequest::Frame { frame, reply })
            .await?
    }

    pub async fn status(&self) -> Result<EngineStatus, EngineError> {
        self.request(|reply| EngineRequest::Status { reply }).await
    }
}

/// The running session plus the writer draining its events.
struct Active {
    session: Session,
    writer: JoinHandle<WriterStats>,
    /// Latest frame date seen in this session.
    day: Option<NaiveDate>,
}

impl Active {
    fn status(&self) -> SessionStatus {
        let config = self.session.config();
        SessionStatus {
            session_id: self.session.id(),
            identities: self.session.snapshot().size(),
            tolerance: config.tolerance,
            stride: config.stride,
            recognized_count: self.session.recognized_count(),
        }
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// The engine owns at most one session at a time. Each session's events are
/// drained by a writer task spawned on `runtime`.
pub fn spawn_engine<S>(
    store: Arc<S>,
    policy: RetryPolicy,
    runtime: Handle,
) -> Result<EngineHandle, EngineError>
where
    S: RegistryStore + 'static,
{
    let machine = Arc::new(AttendanceStateMachine::new(Arc::clone(&store)));
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(16);

    std::thread::Builder::new()
        .name("rollcall-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            let mut active: Option<Active> = None;

            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Start { config, reply } => {
                        let result = match active.as_ref().map(|a| a.session.id()) {
                            Some(id) => Err(EngineError::SessionActive(id)),
                            None => Session::start(store.as_ref(), config)
                                .map(|(session, events)| {
                                    let writer = runtime.spawn(writer::run(
                                        events,
                                        Arc::clone(&machine),
                                        policy,
                                        session.dedup_handle(),
                                    ));
                                    let a = active.insert(Active {
                                        session,
                                        writer,
                                        day: None,
                                    });
                                    a.status()
                                })
                                .map_err(EngineError::from),
                        };
                        let _ = reply.send(result);
                    }
                    EngineRequest::Stop { reply } => {
                        let result = match active.take() {
                            Some(a) => Ok((a.session.stop(), a.writer)),
                            None => Err(EngineError::NoSession),
                        };
                        let _ = reply.send(result);
                    }
                    EngineRequest::Frame { frame, reply } => {
                        let result = match active.as_mut() {
                            Some(a) => run_frame(a, &frame),
                            None => Err(EngineError::NoSession),
                        };
                        let _ = reply.send(result);
                    }
                    EngineRequest::Status { reply } => {
                        let _ = reply.send(EngineStatus {
                            session: active.as_ref().map(Active::status),
                        });
                    }
                }
            }

            if let Some(a) = active.take() {
                a.session.stop();
            }
            tracing::info!("engine thread exiting");
        })
        .map_err(EngineError::Spawn)?;

    Ok(EngineHandle { tx })
}

/// Feed one frame to the session.
///
/// The session never detects midnight itself; the engine resets its dedup
/// cache when a frame's date moves past the latest date seen, so attendance
/// is taken again for the new day. A late frame from an earlier date leaves
/// the cache alone.
fn run_frame(active: &mut Active, frame: &FeedFrame) -> Result<FrameOutcome, EngineError> {
    let observed_at = frame.timestamp()?;
    let today = observed_at.date();
    match active.day {
        Some(day) if today > day => {
            tracing::info!(
                session = %active.session.id(),
                %today,
                "new day; recognition cache reset"
            );
            active.session.reset_dedup();
            active.day = Some(today);
        }
        Some(_) => {}
        None => active.day = Some(today),
    }

    Ok(active
        .session
        .process_frame(&mut PrecomputedEncoder, frame, observed_at)?)
}
