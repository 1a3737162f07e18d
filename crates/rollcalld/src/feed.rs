//! Frames submitted over D-Bus carry encodings computed by an external
//! detector, so decoding the JSON document is all the "encoding" the daemon
//! does.

use chrono::{Local, NaiveDateTime};
use rollcall_core::{parse_timestamp, DetectedFace, Encoder, EncoderError, InvalidInput};
use serde::Deserialize;

/// One submitted frame: `{"observed_at": "...", "faces": [{"region": .., "encoding": [..]}]}`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FeedFrame {
    /// Local capture time; the daemon's clock is used when absent.
    #[serde(default)]
    pub observed_at: Option<String>,
    #[serde(default)]
    pub faces: Vec<DetectedFace>,
}

impl FeedFrame {
    pub fn from_json(raw: &str) -> Result<Self, InvalidInput> {
        serde_json::from_str(raw).map_err(|e| InvalidInput(format!("malformed frame: {e}")))
    }

    /// Capture time of the frame.
    pub fn timestamp(&self) -> Result<NaiveDateTime, InvalidInput> {
        match &self.observed_at {
            Some(raw) => parse_timestamp(raw),
            None => Ok(Local::now().naive_local()),
        }
    }
}

/// Encoder for frames that already carry their encodings.
#[derive(Debug, Default)]
pub struct PrecomputedEncoder;

impl Encoder for PrecomputedEncoder {
    type Frame = FeedFrame;

    fn detect_and_encode(&mut self, frame: &FeedFrame) -> Result<Vec<DetectedFace>, EncoderError> {
        Ok(frame.faces.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_parse_full_frame() {
        let frame = FeedFrame::from_json(
            r#"{
                "observed_at": "2026-10-19T08:55:00",
                "faces": [
                    {"region": {"x": 1.0, "y": 2.0, "width": 30.0, "height": 40.0},
                     "encoding": [0.1, 0.2, 0.3]}
                ]
            }"#,
        )
        .unwrap();

        assert_eq!(frame.faces.len(), 1);
        assert_eq!(frame.faces[0].encoding.dimension(), 3);
        assert_eq!(frame.faces[0].region.width, 30.0);
        assert_eq!(
            frame.timestamp().unwrap(),
            NaiveDate::from_ymd_opt(2026, 10, 19)
                .unwrap()
                .and_hms_opt(8, 55, 0)
                .unwrap()
        );

        let faces = PrecomputedEncoder.detect_and_encode(&frame).unwrap();
        assert_eq!(faces, frame.faces);
    }

    #[test]
    fn test_empty_frame_defaults() {
        let frame = FeedFrame::from_json("{}").unwrap();
        assert!(frame.faces.is_empty());
        assert!(frame.timestamp().is_ok());
    }

    #[test]
    fn test_malformed_input_rejected() {
        assert!(FeedFrame::from_json("not json").is_err());
        assert!(FeedFrame::from_json(r#"{"faces": [{"encoding": "abc"}]}"#).is_err());

        let frame = FeedFrame::from_json(r#"{"observed_at": "yesterday"}"#).unwrap();
        assert!(frame.timestamp().is_err());
    }
}
