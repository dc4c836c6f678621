//! Error taxonomy shared by the capture, encode and recording layers

use std::path::PathBuf;

use thiserror::Error;

/// Faults raised by a frame source, either synchronously from
/// `start`/`stop` or asynchronously on its error stream.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("capture failed to start: {0}")]
    StartupFailure(String),

    #[error("capture is already running")]
    AlreadyRunning,

    #[error("capture is not running")]
    NotRunning,

    /// The source went through its one-shot lifecycle and cannot be restarted.
    #[error("capture has already been stopped")]
    AlreadyStopped,

    /// A single frame could not be acquired. Production continues.
    #[error("frame acquisition failed: {0}")]
    Acquisition(String),

    /// Terminal fault: the source gave up after repeated acquisition failures.
    #[error("capture source failed after {consecutive} consecutive errors")]
    SourceFailed { consecutive: u32 },
}

impl CaptureError {
    /// Whether the source stops producing after reporting this error.
    pub fn is_terminal(&self) -> bool {
        matches!(self, CaptureError::SourceFailed { .. })
    }
}

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("invalid frame: {0}")]
    InvalidFrame(String),

    #[error("no frames to encode")]
    NoFrames,

    #[error("encoder has already written its output")]
    AlreadyFinalized,

    #[error("failed to write {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode GIF stream: {0}")]
    Stream(#[from] gif::EncodingError),
}

#[derive(Debug, Error)]
pub enum RegionError {
    #[error("invalid region: {0}")]
    Invalid(String),

    #[error("region '{0}' not found")]
    NotFound(String),

    #[error("no default region set")]
    NoDefault,

    #[error("region store {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse region store: {0}")]
    Json(#[from] serde_json::Error),
}

/// Session-level failure of a recording.
#[derive(Debug, Error)]
pub enum RecordError {
    #[error(transparent)]
    Capture(#[from] CaptureError),

    #[error(transparent)]
    Encode(#[from] EncodeError),

    #[error("recording aborted after {errors} capture errors")]
    ErrorBudgetExceeded { errors: u64 },

    #[error("encoder task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error(transparent)]
    Load(#[from] config::ConfigError),

    #[error("invalid setting: {0}")]
    Invalid(String),
}
