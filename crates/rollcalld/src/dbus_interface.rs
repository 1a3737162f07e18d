use std::sync::Arc;
use zbus::interface;

use crate::config::Config;
use crate::engine::{EngineError, EngineHandle};
use crate::feed::FeedFrame;

pub const BUS_NAME: &str = "org.rollcall.Monitor1";
pub const OBJECT_PATH: &str = "/org/rollcall/Monitor1";

/// D-Bus interface for session control and frame submission.
///
/// Bus name: org.rollcall.Monitor1
/// Object path: /org/rollcall/Monitor1
pub struct MonitorService {
    engine: EngineHandle,
    config: Arc<Config>,
}

impl MonitorService {
    pub fn new(engine: EngineHandle, config: Arc<Config>) -> Self {
        Self { engine, config }
    }
}

#[interface(name = "org.rollcall.Monitor1")]
impl MonitorService {
    /// Start a recognition session. A negative tolerance or a zero stride
    /// selects the configured default.
    async fn start_session(&self, tolerance: f64, stride: u32) -> zbus::fdo::Result<String> {
        let tolerance = (tolerance >= 0.0).then_some(tolerance as f32);
        let stride = (stride > 0).then_some(stride);
        tracing::info!(?tolerance, ?stride, "start_session requested");

        let status = self
            .engine
            .start(self.config.session_config(tolerance, stride))
            .await
            .map_err(to_fdo)?;
        to_json(&status)
    }

    /// Stop the session; returns the number of distinct people recognized.
    async fn stop_session(&self) -> zbus::fdo::Result<u64> {
        tracing::info!("stop_session requested");
        let report = self.engine.stop().await.map_err(to_fdo)?;
        if report.dropped > 0 {
            tracing::warn!(dropped = report.dropped, "attendance writes were dropped this session");
        }
        Ok(report.summary.recognized_count as u64)
    }

    /// Submit one frame of precomputed encodings; returns the per-face
    /// observations, or `{"outcome": "skipped"}` for a throttled frame.
    async fn submit_frame(&self, frame_json: &str) -> zbus::fdo::Result<String> {
        let frame = FeedFrame::from_json(frame_json)
            .map_err(|e| zbus::fdo::Error::InvalidArgs(e.to_string()))?;
        let outcome = self.engine.submit_frame(frame).await.map_err(to_fdo)?;
        to_json(&outcome)
    }

    /// Return daemon status information.
    async fn status(&self) -> zbus::fdo::Result<String> {
        let status = self.engine.status().await.map_err(to_fdo)?;
        Ok(serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "database": self.config.db_path.display().to_string(),
            "encoding_dim": self.config.encoding_dim,
            "session": status.session,
        })
        .to_string())
    }
}

fn to_fdo(err: EngineError) -> zbus::fdo::Error {
    match err {
        EngineError::InvalidInput(_)
        | EngineError::Session(rollcall_core::SessionError::InvalidInput(_)) => {
            zbus::fdo::Error::InvalidArgs(err.to_string())
        }
        other => {
            tracing::error!(error = %other, "request failed");
            zbus::fdo::Error::Failed(other.to_string())
        }
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> zbus::fdo::Result<String> {
    serde_json::to_string(value).map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
}
