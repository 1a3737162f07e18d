use rollcall_core::{SessionConfig, DEFAULT_ENCODING_DIM, DEFAULT_STRIDE, DEFAULT_TOLERANCE};
use std::path::PathBuf;
use std::time::Duration;

use crate::writer::RetryPolicy;

/// Daemon configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Match tolerance used when a session is started without one.
    pub tolerance: f32,
    /// Frame stride used when a session is started without one.
    pub frame_stride: u32,
    /// Expected encoding dimension.
    pub encoding_dim: usize,
    /// Retries for an attendance write that hit an unavailable store.
    pub write_retries: u32,
    /// Base delay between write retries; doubled on each attempt.
    pub retry_backoff_ms: u64,
    /// Repeat matches within a session refresh `time_out`.
    pub refresh_time_out: bool,
    /// Serve on the system bus instead of the session bus.
    pub system_bus: bool,
}

impl Config {
    /// Load configuration from `ROLLCALL_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let db_path = std::env::var("ROLLCALL_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| rollcall_store::default_db_path());

        Self {
            db_path,
            tolerance: env_f32("ROLLCALL_TOLERANCE", DEFAULT_TOLERANCE),
            frame_stride: env_u32("ROLLCALL_FRAME_STRIDE", DEFAULT_STRIDE),
            encoding_dim: env_usize("ROLLCALL_ENCODING_DIM", DEFAULT_ENCODING_DIM),
            write_retries: env_u32("ROLLCALL_WRITE_RETRIES", 3),
            retry_backoff_ms: env_u64("ROLLCALL_RETRY_BACKOFF_MS", 250),
            refresh_time_out: env_flag("ROLLCALL_REFRESH_TIME_OUT", false),
            system_bus: env_flag("ROLLCALL_SYSTEM_BUS", false),
        }
    }

    /// Session settings, with per-call overrides taking precedence.
    pub fn session_config(&self, tolerance: Option<f32>, stride: Option<u32>) -> SessionConfig {
        SessionConfig {
            tolerance: tolerance.unwrap_or(self.tolerance),
            stride: stride.unwrap_or(self.frame_stride),
            dimension: self.encoding_dim,
            refresh_time_out: self.refresh_time_out,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            retries: self.write_retries,
            backoff: Duration::from_millis(self.retry_backoff_ms),
        }
    }
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_flag(key: &str, default: bool) -> bool {
    std::env::var(key).map(|v| v != "0").unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_helpers_fall_back_on_missing_or_garbage() {
        std::env::set_var("ROLLCALL_TEST_GARBAGE_F32", "not-a-number");
        assert_eq!(env_f32("ROLLCALL_TEST_GARBAGE_F32", 0.6), 0.6);
        assert_eq!(env_u32("ROLLCALL_TEST_UNSET_U32", 2), 2);

        std::env::set_var("ROLLCALL_TEST_SET_U64", "500");
        assert_eq!(env_u64("ROLLCALL_TEST_SET_U64", 250), 500);
    }

    #[test]
    fn test_env_flag() {
        std::env::set_var("ROLLCALL_TEST_FLAG_OFF", "0");
        std::env::set_var("ROLLCALL_TEST_FLAG_ON", "1");
        assert!(!env_flag("ROLLCALL_TEST_FLAG_OFF", true));
        assert!(env_flag("ROLLCALL_TEST_FLAG_ON", false));
        assert!(env_flag("ROLLCALL_TEST_FLAG_UNSET", true));
    }

    #[test]
    fn test_session_config_overrides() {
        let config = Config {
            db_path: PathBuf::from("/tmp/rollcall-test.db"),
            tolerance: 0.6,
            frame_stride: 2,
            encoding_dim: 128,
            write_retries: 3,
            retry_backoff_ms: 250,
            refresh_time_out: true,
            system_bus: false,
        };

        let defaults = config.session_config(None, None);
        assert_eq!(defaults.tolerance, 0.6);
        assert_eq!(defaults.stride, 2);
        assert!(defaults.refresh_time_out);

        let custom = config.session_config(Some(0.45), Some(5));
        assert_eq!(custom.tolerance, 0.45);
        assert_eq!(custom.stride, 5);
        assert_eq!(custom.dimension, 128);

        assert_eq!(config.retry_policy().backoff, Duration::from_millis(250));
    }
}
