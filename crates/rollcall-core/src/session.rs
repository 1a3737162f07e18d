//! Monitoring session: frame throttling, matching, dedup and event emission.
//!
//! A [`Session`] owns everything scoped to one monitoring run: the identity
//! snapshot, the dedup cache and the frame counter. Several sessions (one per
//! camera, say) can run side by side against the same registry store.
//!
//! Recognition events leave the session over an unbounded channel so that
//! persistence and rendering consume them independently of frame analysis.

use crate::dedup::DedupCache;
use crate::matcher::{EuclideanMatcher, Matcher, DEFAULT_TOLERANCE};
use crate::snapshot::Snapshot;
use crate::store::{RegistryStore, StoreError};
use crate::throttle::{FrameThrottle, DEFAULT_STRIDE};
use crate::types::{
    DetectedFace, FaceObservation, IdentityId, InvalidInput, RecognitionEvent,
    DEFAULT_ENCODING_DIM,
};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum EncoderError {
    #[error("encoder failed: {0}")]
    Failed(String),
    #[error(transparent)]
    InvalidInput(#[from] InvalidInput),
}

#[derive(Error, Debug)]
pub enum SessionError {
    #[error(transparent)]
    InvalidInput(#[from] InvalidInput),
    #[error("failed to load identities: {0}")]
    Store(#[from] StoreError),
    #[error(transparent)]
    Encoder(#[from] EncoderError),
}

/// External face detector/encoder.
pub trait Encoder {
    type Frame: ?Sized;

    /// Detect faces in `frame` and return one encoding per face, in
    /// detector order.
    fn detect_and_encode(&mut self, frame: &Self::Frame) -> Result<Vec<DetectedFace>, EncoderError>;
}

/// Tunables fixed for the lifetime of a session.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Maximum accepted match distance.
    pub tolerance: f32,
    /// Analyze every Nth frame.
    pub stride: u32,
    /// Expected encoding dimension.
    pub dimension: usize,
    /// Also emit [`SessionEvent::Sighted`] for repeat matches so that
    /// `time_out` tracks the latest sighting within the session.
    pub refresh_time_out: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            tolerance: DEFAULT_TOLERANCE,
            stride: DEFAULT_STRIDE,
            dimension: DEFAULT_ENCODING_DIM,
            refresh_time_out: false,
        }
    }
}

impl SessionConfig {
    pub fn validate(&self) -> Result<(), InvalidInput> {
        if !self.tolerance.is_finite() || self.tolerance < 0.0 {
            return Err(InvalidInput(format!(
                "tolerance must be a finite, non-negative number, got {}",
                self.tolerance
            )));
        }
        if self.dimension == 0 {
            return Err(InvalidInput("encoding dimension must be non-zero".into()));
        }
        FrameThrottle::new(self.stride).map(|_| ())
    }
}

/// Messages emitted by a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SessionEvent {
    /// First accepted match of an identity this session.
    Recognized(RecognitionEvent),
    /// A repeat match; only emitted with `refresh_time_out` enabled.
    Sighted(RecognitionEvent),
}

impl SessionEvent {
    pub fn recognition(&self) -> &RecognitionEvent {
        match self {
            SessionEvent::Recognized(e) | SessionEvent::Sighted(e) => e,
        }
    }
}

pub type EventReceiver = mpsc::UnboundedReceiver<SessionEvent>;

/// Result of submitting one frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum FrameOutcome {
    /// Throttled; the encoder was not invoked.
    Skipped { frame_index: u64 },
    Analyzed {
        frame_index: u64,
        faces: Vec<FaceObservation>,
        /// Identities recognized for the first time by this frame.
        recognized: Vec<IdentityId>,
    },
}

/// Reported when a session stops.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: Uuid,
    /// Distinct identities recognized during the session.
    pub recognized_count: usize,
    pub frames_seen: u64,
    pub frames_analyzed: u64,
}

/// Lets a consumer of session events hand an identity back to the session's
/// dedup cache after failing to persist its recognition.
#[derive(Debug, Clone)]
pub struct DedupHandle {
    session: Uuid,
    cache: Arc<Mutex<DedupCache>>,
}

impl DedupHandle {
    /// Forget `id`; its next accepted match is emitted as a new recognition.
    pub fn release(&self, id: IdentityId) {
        let released = self
            .cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .release(id);
        if released {
            tracing::info!(session = %self.session, identity = id, "recognition released");
        }
    }
}

pub struct Session<M = EuclideanMatcher> {
    id: Uuid,
    config: SessionConfig,
    throttle: FrameThrottle,
    snapshot: Arc<Snapshot>,
    matcher: M,
    dedup: Arc<Mutex<DedupCache>>,
    frames_seen: AtomicU64,
    frames_analyzed: AtomicU64,
    events: mpsc::UnboundedSender<SessionEvent>,
}

impl Session<EuclideanMatcher> {
    /// Start a session: load the snapshot from `store` and begin with an
    /// empty dedup cache.
    pub fn start<S: RegistryStore + ?Sized>(
        store: &S,
        config: SessionConfig,
    ) -> Result<(Self, EventReceiver), SessionError> {
        Self::start_with_matcher(store, config, EuclideanMatcher)
    }
}

impl<M: Matcher> Session<M> {
    pub fn start_with_matcher<S: RegistryStore + ?Sized>(
        store: &S,
        config: SessionConfig,
        matcher: M,
    ) -> Result<(Self, EventReceiver), SessionError> {
        config.validate()?;
        let snapshot = Snapshot::load(config.dimension, store.list_identities()?)?;
        Ok(Self::with_snapshot(Arc::new(snapshot), config, matcher)?)
    }

    /// Start a session over an already-loaded snapshot.
    pub fn with_snapshot(
        snapshot: Arc<Snapshot>,
        config: SessionConfig,
        matcher: M,
    ) -> Result<(Self, EventReceiver), InvalidInput> {
        config.validate()?;
        if snapshot.dimension() != config.dimension {
            return Err(InvalidInput(format!(
                "snapshot holds {}-dim encodings, session expects {}",
                snapshot.dimension(),
                config.dimension
            )));
        }
        let throttle = FrameThrottle::new(config.stride)?;
        let (tx, rx) = mpsc::unbounded_channel();
        let session = Self {
            id: Uuid::new_v4(),
            config,
            throttle,
            snapshot,
            matcher,
            dedup: Arc::new(Mutex::new(DedupCache::new())),
            frames_seen: AtomicU64::new(0),
            frames_analyzed: AtomicU64::new(0),
            events: tx,
        };

        tracing::info!(
            session = %session.id,
            identities = session.snapshot.size(),
            tolerance = config.tolerance,
            stride = config.stride,
            "session started"
        );
        if session.snapshot.is_empty() {
            tracing::warn!(session = %session.id, "registry is empty; every face will be rejected");
        }

        Ok((session, rx))
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn snapshot(&self) -> &Arc<Snapshot> {
        &self.snapshot
    }

    /// Count the next frame and, unless throttled, run it through the encoder
    /// and the matcher.
    pub fn process_frame<E: Encoder>(
        &self,
        encoder: &mut E,
        frame: &E::Frame,
        observed_at: NaiveDateTime,
    ) -> Result<FrameOutcome, SessionError> {
        let frame_index = self.frames_seen.fetch_add(1, Ordering::Relaxed) + 1;
        if !self.throttle.should_analyze(frame_index) {
            return Ok(FrameOutcome::Skipped { frame_index });
        }
        self.frames_analyzed.fetch_add(1, Ordering::Relaxed);

        let faces = encoder.detect_and_encode(frame)?;
        let (faces, recognized) = self.observe(faces, observed_at)?;
        Ok(FrameOutcome::Analyzed {
            frame_index,
            faces,
            recognized,
        })
    }

    /// Match already-encoded faces observed at `observed_at`.
    ///
    /// All faces are matched before any event is emitted, so an invalid probe
    /// rejects the whole batch without side effects.
    pub fn observe(
        &self,
        faces: Vec<DetectedFace>,
        observed_at: NaiveDateTime,
    ) -> Result<(Vec<FaceObservation>, Vec<IdentityId>), SessionError> {
        let results = faces
            .iter()
            .map(|face| {
                self.matcher
                    .compare(&face.encoding, &self.snapshot, self.config.tolerance)
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut observations = Vec::with_capacity(faces.len());
        let mut recognized = Vec::new();

        for (face, result) in faces.into_iter().zip(results) {
            let identity = result.identity_id.and_then(|id| self.snapshot.get(id));

            if let Some(identity) = identity {
                let event = RecognitionEvent {
                    identity_id: identity.id,
                    observed_at,
                };
                // Lock scope ends before the event is sent.
                let novel = self
                    .dedup
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .claim(identity.id);

                if novel {
                    tracing::info!(
                        session = %self.id,
                        identity = identity.id,
                        name = %identity.name,
                        distance = result.distance,
                        "recognized"
                    );
                    recognized.push(identity.id);
                    self.emit(SessionEvent::Recognized(event));
                } else if self.config.refresh_time_out {
                    self.emit(SessionEvent::Sighted(event));
                }
            }

            observations.push(FaceObservation {
                identity_id: result.identity_id,
                name: identity.map(|i| i.name.clone()),
                region: face.region,
                accepted: result.accepted,
                distance: result.distance.is_finite().then_some(result.distance),
                confidence: result.confidence(),
            });
        }

        Ok((observations, recognized))
    }

    fn emit(&self, event: SessionEvent) {
        if self.events.send(event).is_err() {
            tracing::warn!(session = %self.id, ?event, "event receiver dropped; event discarded");
        }
    }

    pub fn dedup_handle(&self) -> DedupHandle {
        DedupHandle {
            session: self.id,
            cache: Arc::clone(&self.dedup),
        }
    }

    /// Clear the dedup cache, e.g. when the session runs past midnight.
    pub fn reset_dedup(&self) {
        self.dedup
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .reset();
        tracing::info!(session = %self.id, "recognition cache reset");
    }

    /// Distinct identities recognized since the last reset.
    pub fn recognized_count(&self) -> usize {
        self.dedup
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Stop the session. Dropping the sender lets consumers drain any queued
    /// events and then observe the end of the stream.
    pub fn stop(self) -> SessionSummary {
        let summary = SessionSummary {
            session_id: self.id,
            recognized_count: self.recognized_count(),
            frames_seen: self.frames_seen.load(Ordering::Relaxed),
            frames_analyzed: self.frames_analyzed.load(Ordering::Relaxed),
        };
        tracing::info!(
            session = %summary.session_id,
            recognized = summary.recognized_count,
            frames = summary.frames_seen,
            analyzed = summary.frames_analyzed,
            "session stopped"
        );
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::types::{Encoding, Identity, Region};
    use chrono::NaiveDate;

    /// Encoder that replays a fixed set of faces for every frame.
    struct FixedEncoder {
        faces: Vec<DetectedFace>,
        calls: usize,
    }

    impl Encoder for FixedEncoder {
        type Frame = ();

        fn detect_and_encode(&mut self, _frame: &()) -> Result<Vec<DetectedFace>, EncoderError> {
            self.calls += 1;
            Ok(self.faces.clone())
        }
    }

    fn now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 10, 19)
            .unwrap()
            .and_hms_opt(9, 0, 0)
            .unwrap()
    }

    fn store() -> MemoryStore {
        MemoryStore::new(vec![
            Identity {
                id: 1,
                name: "Alice".into(),
                role: "Student".into(),
                reference_encoding: Encoding::new(vec![1.0, 0.0]),
            },
            Identity {
                id: 2,
                name: "Bob".into(),
                role: "Teacher".into(),
                reference_encoding: Encoding::new(vec![0.0, 1.0]),
            },
        ])
    }

    fn config(stride: u32) -> SessionConfig {
        SessionConfig {
            stride,
            dimension: 2,
            ..SessionConfig::default()
        }
    }

    fn face(values: Vec<f32>) -> DetectedFace {
        DetectedFace {
            region: Region::default(),
            encoding: Encoding::new(values),
        }
    }

    #[test]
    fn test_config_validation() {
        assert!(SessionConfig::default().validate().is_ok());
        assert!(SessionConfig { stride: 0, ..SessionConfig::default() }.validate().is_err());
        assert!(SessionConfig { tolerance: -0.1, ..SessionConfig::default() }.validate().is_err());
        assert!(SessionConfig { tolerance: f32::NAN, ..SessionConfig::default() }.validate().is_err());
    }

    #[test]
    fn test_throttled_frames_skip_encoder() {
        let (session, _rx) = Session::start(&store(), config(2)).unwrap();
        let mut encoder = FixedEncoder { faces: vec![face(vec![1.0, 0.0])], calls: 0 };

        let first = session.process_frame(&mut encoder, &(), now()).unwrap();
        assert_eq!(first, FrameOutcome::Skipped { frame_index: 1 });
        let second = session.process_frame(&mut encoder, &(), now()).unwrap();
        assert!(matches!(second, FrameOutcome::Analyzed { frame_index: 2, .. }));
        assert_eq!(encoder.calls, 1);
    }

    #[test]
    fn test_one_event_per_identity() {
        let (session, mut rx) = Session::start(&store(), config(1)).unwrap();
        let mut encoder = FixedEncoder { faces: vec![face(vec![1.0, 0.0])], calls: 0 };

        for _ in 0..5 {
            session.process_frame(&mut encoder, &(), now()).unwrap();
        }

        let event = rx.try_recv().unwrap();
        assert_eq!(
            event,
            SessionEvent::Recognized(RecognitionEvent { identity_id: 1, observed_at: now() })
        );
        assert!(rx.try_recv().is_err());
        assert_eq!(session.recognized_count(), 1);
    }

    #[test]
    fn test_reset_allows_second_event() {
        let (session, mut rx) = Session::start(&store(), config(1)).unwrap();
        session.observe(vec![face(vec![0.0, 1.0])], now()).unwrap();
        session.observe(vec![face(vec![0.0, 1.0])], now()).unwrap();
        session.reset_dedup();
        session.observe(vec![face(vec![0.0, 1.0])], now()).unwrap();

        let mut count = 0;
        while rx.try_recv().is_ok() {
            count += 1;
        }
        assert_eq!(count, 2);
    }

    #[test]
    fn test_observation_fields() {
        let (session, _rx) = Session::start(&store(), config(1)).unwrap();
        let (faces, recognized) = session
            .observe(
                vec![face(vec![0.0, 1.0]), face(vec![5.0, 5.0]), face(vec![0.0, 1.8])],
                now(),
            )
            .unwrap();

        assert_eq!(recognized, vec![2]);
        assert_eq!(faces[0].identity_id, Some(2));
        assert_eq!(faces[0].name.as_deref(), Some("Bob"));
        assert!(faces[0].accepted);
        assert_eq!(faces[0].confidence, 1.0);
        assert_eq!(faces[1].identity_id, None);
        assert_eq!(faces[1].name, None);
        assert!(!faces[1].accepted);
        assert_eq!(faces[1].confidence, 0.0);

        // Rejected at 0.8 from Bob; confidence is still reported.
        assert!(!faces[2].accepted);
        assert!((faces[2].confidence - 0.2).abs() < 1e-5);
    }

    #[test]
    fn test_released_identity_is_recognized_again() {
        let (session, mut rx) = Session::start(&store(), config(1)).unwrap();
        let handle = session.dedup_handle();

        session.observe(vec![face(vec![1.0, 0.0])], now()).unwrap();
        handle.release(1);
        assert_eq!(session.recognized_count(), 0);
        let (_, recognized) = session.observe(vec![face(vec![1.0, 0.0])], now()).unwrap();

        assert_eq!(recognized, vec![1]);
        assert!(matches!(rx.try_recv().unwrap(), SessionEvent::Recognized(_)));
        assert!(matches!(rx.try_recv().unwrap(), SessionEvent::Recognized(_)));
    }

    #[test]
    fn test_invalid_probe_has_no_side_effects() {
        let (session, mut rx) = Session::start(&store(), config(1)).unwrap();
        let result = session.observe(vec![face(vec![1.0, 0.0]), face(vec![1.0])], now());
        assert!(matches!(result, Err(SessionError::InvalidInput(_))));
        assert!(rx.try_recv().is_err());
        assert_eq!(session.recognized_count(), 0);
    }

    #[test]
    fn test_sightings_emitted_when_enabled() {
        let cfg = SessionConfig { refresh_time_out: true, ..config(1) };
        let (session, mut rx) = Session::start(&store(), cfg).unwrap();
        session.observe(vec![face(vec![1.0, 0.0])], now()).unwrap();
        session.observe(vec![face(vec![1.0, 0.0])], now()).unwrap();

        assert!(matches!(rx.try_recv().unwrap(), SessionEvent::Recognized(_)));
        assert!(matches!(rx.try_recv().unwrap(), SessionEvent::Sighted(_)));
    }

    #[test]
    fn test_empty_registry_rejects_everything() {
        let (session, mut rx) = Session::start(&MemoryStore::default(), config(1)).unwrap();
        let (faces, recognized) = session.observe(vec![face(vec![1.0, 0.0])], now()).unwrap();
        assert!(!faces[0].accepted);
        assert_eq!(faces[0].distance, None);
        assert!(recognized.is_empty());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_stop_reports_summary_and_closes_channel() {
        let (session, mut rx) = Session::start(&store(), config(2)).unwrap();
        let mut encoder = FixedEncoder {
            faces: vec![face(vec![1.0, 0.0]), face(vec![0.0, 1.0])],
            calls: 0,
        };
        for _ in 0..4 {
            session.process_frame(&mut encoder, &(), now()).unwrap();
        }
        let id = session.id();
        let summary = session.stop();

        assert_eq!(summary.session_id, id);
        assert_eq!(summary.recognized_count, 2);
        assert_eq!(summary.frames_seen, 4);
        assert_eq!(summary.frames_analyzed, 2);

        // Queued events survive the stop; then the stream ends.
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_ok());
        assert!(matches!(
            rx.try_recv(),
            Err(tokio::sync::mpsc::error::TryRecvError::Disconnected)
        ));
    }

    #[test]
    fn test_dropped_receiver_does_not_fail_frames() {
        let (session, rx) = Session::start(&store(), config(1)).unwrap();
        drop(rx);
        let (faces, recognized) = session.observe(vec![face(vec![1.0, 0.0])], now()).unwrap();
        assert!(faces[0].accepted);
        assert_eq!(recognized, vec![1]);
    }
}
