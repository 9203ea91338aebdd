//! Error types for the media pipeline.
//!
//! Fallible control-plane operations return `Result<T, MediaError>`.
//! Nothing on the frame-delivery path returns an error: capture failures
//! are reported to observers as a [`CaptureSourceError`].

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The canonical error type for the pipeline.
#[derive(Debug, Error)]
pub enum MediaError {
    // ── Worker Errors ────────────────────────────────────────────
    /// The worker thread could not be spawned.
    #[error("failed to spawn worker: {0}")]
    Spawn(#[from] std::io::Error),

    /// The worker has quit, or quit before completing a request.
    #[error("worker '{0}' has stopped")]
    WorkerStopped(String),

    /// A synchronous request was made from the worker's own thread.
    #[error("synchronous call into worker '{0}' from its own thread")]
    Reentrant(String),

    // ── Frame Errors ─────────────────────────────────────────────
    /// A plane is too small for the declared dimensions and stride.
    #[error("invalid {plane} plane: need {needed} bytes, got {actual}")]
    InvalidPlane {
        plane: &'static str,
        needed: usize,
        actual: usize,
    },

    /// A stride is narrower than the row it describes.
    #[error("invalid stride for {plane} plane: {stride} < {row}")]
    InvalidStride {
        plane: &'static str,
        stride: u32,
        row: u32,
    },

    /// Width or height was zero.
    #[error("invalid frame dimensions {width}x{height}")]
    InvalidDimensions { width: u32, height: u32 },

    // ── Device Errors ────────────────────────────────────────────
    /// A capture source failure, also reported to observers.
    #[error("capture failed: {0}")]
    Capture(#[from] CaptureSourceError),

    /// No device with the given id exists.
    #[error("unknown device: {0}")]
    UnknownDevice(String),

    /// The selected device does not support the operation.
    #[error("unsupported: {0}")]
    Unsupported(&'static str),

    // ── Graphics Errors ──────────────────────────────────────────
    /// The graphics backend reported an error.
    #[error("graphics error: {0}")]
    Graphics(String),

    /// Catch-all for errors that do not fit another variant.
    #[error("{0}")]
    Other(String),
}

// ── CaptureSourceError ───────────────────────────────────────────

/// Failure reason delivered to capture source observers.
///
/// | Variant                | Meaning                                   |
/// |------------------------|-------------------------------------------|
/// | `PermissionError`      | missing grant; retry after permission     |
/// | `SystemFailure`        | device/driver error; source goes inert    |
/// | `ConfigurationFailure` | no compatible parameters for the request  |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error, Serialize, Deserialize)]
pub enum CaptureSourceError {
    #[error("unknown capture failure")]
    Unknown,

    #[error("permission not granted")]
    PermissionError,

    #[error("system failure")]
    SystemFailure,

    #[error("no compatible configuration")]
    ConfigurationFailure,
}

// ── Convenient From implementations ──────────────────────────────

impl From<String> for MediaError {
    fn from(s: String) -> Self {
        MediaError::Other(s)
    }
}

impl From<&str> for MediaError {
    fn from(s: &str) -> Self {
        MediaError::Other(s.to_string())
    }
}

impl MediaError {
    /// The observer-facing reason for this error, if it has one.
    pub fn capture_reason(&self) -> Option<CaptureSourceError> {
        match self {
            MediaError::Capture(reason) => Some(*reason),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages() {
        let e = MediaError::InvalidPlane {
            plane: "y",
            needed: 1000,
            actual: 500,
        };
        assert!(e.to_string().contains("1000"));
        assert!(e.to_string().contains("500"));

        let e = MediaError::WorkerStopped("renderer".into());
        assert!(e.to_string().contains("renderer"));
    }

    #[test]
    fn from_string() {
        let e: MediaError = "something broke".into();
        assert!(matches!(e, MediaError::Other(_)));
    }

    #[test]
    fn capture_reason_roundtrips_through_media_error() {
        let e: MediaError = CaptureSourceError::PermissionError.into();
        assert_eq!(e.capture_reason(), Some(CaptureSourceError::PermissionError));
        assert_eq!(MediaError::Unsupported("torch").capture_reason(), None);
    }
}
