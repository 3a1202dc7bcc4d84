//! Error taxonomy for the kiosk assistant.
//!
//! Every error is local and non-fatal: the engine reports it (status, log or
//! speech) and falls back to its idle/listening baseline.

use thiserror::Error;

/// Errors surfaced by capture, remote services and the camera snapshot source.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KioskError {
    /// The capture device could not be acquired. Terminal for the start attempt.
    #[error("Microphone access denied: {0}")]
    Permission(String),

    /// Mid-session device or recorder failure. Triggers a capture restart.
    #[error("Capture failure: {0}")]
    Capture(String),

    /// Network failure or non-2xx response.
    #[error("Transport error: {0}")]
    Transport(String),

    /// A 2xx response carrying an explicit `error` field.
    #[error("Server error: {0}")]
    Server(String),

    /// The service answered, but with no usable text.
    #[error("No usable text recognized")]
    EmptyRecognition,

    /// No camera snapshot is available to analyze.
    #[error("Camera not ready")]
    CameraUnavailable,
}

impl From<reqwest::Error> for KioskError {
    fn from(err: reqwest::Error) -> Self {
        KioskError::Transport(err.to_string())
    }
}

/// Result alias for kiosk operations.
pub type KioskResult<T> = Result<T, KioskError>;
