use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Registry identifier of a known person.
pub type IdentityId = i64;

/// Dimension of encodings produced by the reference encoder.
pub const DEFAULT_ENCODING_DIM: usize = 128;

/// Timestamp layouts accepted by [`parse_timestamp`].
const TIMESTAMP_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

/// Input rejected before it reached any matching or persistence step.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid input: {0}")]
pub struct InvalidInput(pub String);

/// Bounding region of a detected face, in frame pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Region {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

/// Face encoding vector (128-dimensional for the reference encoder).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Encoding {
    pub values: Vec<f32>,
}

impl Encoding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn dimension(&self) -> usize {
        self.values.len()
    }

    /// True when no component is NaN or infinite.
    pub fn is_finite(&self) -> bool {
        self.values.iter().all(|v| v.is_finite())
    }

    /// Compute Euclidean distance between two encodings.
    ///
    /// Callers are expected to compare encodings of equal dimension; extra
    /// trailing components of the longer vector are ignored.
    pub fn euclidean_distance(&self, other: &Encoding) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }

    /// Reject encodings of the wrong dimension or with non-finite components.
    pub fn validate(&self, dimension: usize) -> Result<(), InvalidInput> {
        if self.dimension() != dimension {
            return Err(InvalidInput(format!(
                "expected {dimension}-dim encoding, got {}",
                self.dimension()
            )));
        }
        if !self.is_finite() {
            return Err(InvalidInput("encoding contains non-finite values".into()));
        }
        Ok(())
    }
}

impl From<Vec<f32>> for Encoding {
    fn from(values: Vec<f32>) -> Self {
        Self::new(values)
    }
}

/// A registered person together with their reference encoding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    pub id: IdentityId,
    pub name: String,
    pub role: String,
    pub reference_encoding: Encoding,
}

/// Result of matching one probe encoding against a snapshot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchResult {
    /// Matched identity, present only when the match was accepted.
    pub identity_id: Option<IdentityId>,
    /// Distance to the nearest reference encoding (infinite for an empty registry).
    pub distance: f32,
    pub accepted: bool,
}

impl MatchResult {
    pub fn accepted(identity_id: IdentityId, distance: f32) -> Self {
        Self {
            identity_id: Some(identity_id),
            distance,
            accepted: true,
        }
    }

    pub fn rejected(distance: f32) -> Self {
        Self {
            identity_id: None,
            distance,
            accepted: false,
        }
    }

    /// Display-only confidence, `1 - distance` clamped to [0, 1].
    ///
    /// Reported for rejected matches too; 0 when there was nothing to compare
    /// against.
    pub fn confidence(&self) -> f32 {
        if self.distance.is_finite() {
            (1.0 - self.distance).clamp(0.0, 1.0)
        } else {
            0.0
        }
    }
}

/// An accepted, non-duplicate recognition within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecognitionEvent {
    pub identity_id: IdentityId,
    pub observed_at: NaiveDateTime,
}

/// Attendance status of a person on a given date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttendanceStatus {
    Present,
    Absent,
}

impl AttendanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttendanceStatus::Present => "present",
            AttendanceStatus::Absent => "absent",
        }
    }
}

impl fmt::Display for AttendanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AttendanceStatus {
    type Err = InvalidInput;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "present" => Ok(AttendanceStatus::Present),
            "absent" => Ok(AttendanceStatus::Absent),
            other => Err(InvalidInput(format!("unknown attendance status: {other}"))),
        }
    }
}

/// Durable attendance row, unique per `(person_id, date)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttendanceRecord {
    pub person_id: IdentityId,
    pub date: NaiveDate,
    pub time_in: Option<NaiveDateTime>,
    pub time_out: Option<NaiveDateTime>,
    pub status: AttendanceStatus,
}

/// Outcome of an attendance upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transition {
    /// First event of the date: the record was created with `time_in` set.
    Created,
    /// A later event of the same date: `time_out` was refreshed.
    Updated,
}

/// One face reported by the encoder for a frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedFace {
    pub region: Region,
    pub encoding: Encoding,
}

/// Per-face result handed to the presentation layer for rendering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceObservation {
    pub identity_id: Option<IdentityId>,
    pub name: Option<String>,
    pub region: Region,
    pub accepted: bool,
    /// Distance to the nearest identity; absent when the registry is empty.
    pub distance: Option<f32>,
    pub confidence: f32,
}

/// Parse an ISO-8601 local timestamp (`T` or space separated).
pub fn parse_timestamp(raw: &str) -> Result<NaiveDateTime, InvalidInput> {
    let raw = raw.trim();
    TIMESTAMP_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .ok_or_else(|| InvalidInput(format!("malformed timestamp: {raw:?}")))
}
