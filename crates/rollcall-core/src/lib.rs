//! rollcall-core — Identity matching and attendance state engine.
//!
//! Matches face encodings from an external encoder against a snapshot of
//! known identities, suppresses repeat recognitions per session, and turns
//! recognition events into daily attendance records through a
//! [`RegistryStore`].

pub mod attendance;
pub mod dedup;
pub mod matcher;
pub mod session;
pub mod snapshot;
pub mod store;
pub mod throttle;
pub mod types;

pub use attendance::{AttendanceError, AttendanceStateMachine};
pub use dedup::DedupCache;
pub use matcher::{EuclideanMatcher, Matcher, DEFAULT_TOLERANCE};
pub use session::{
    DedupHandle, Encoder, EncoderError, EventReceiver, FrameOutcome, Session, SessionConfig,
    SessionError, SessionEvent, SessionSummary,
};
pub use snapshot::Snapshot;
pub use store::{MemoryStore, RegistryStore, StoreError};
pub use throttle::{FrameThrottle, DEFAULT_STRIDE};
pub use types::{
    parse_timestamp, AttendanceRecord, AttendanceStatus, DetectedFace, Encoding, FaceObservation,
    Identity, IdentityId, InvalidInput, MatchResult, RecognitionEvent, Region, Transition,
    DEFAULT_ENCODING_DIM,
};
