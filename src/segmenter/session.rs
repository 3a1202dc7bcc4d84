//! Observable session state of the segmentation controller.

use serde::Serialize;

/// Coarse status shown to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    #[default]
    Idle,
    /// Capture device is being acquired (or reacquired by the watchdog)
    Starting,
    Listening,
    Recording,
    /// A segment is being captured or transcribed
    Processing,
    /// Capture could not be acquired, or the last transcription failed
    Error,
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Status::Idle => "Idle",
            Status::Starting => "Starting...",
            Status::Listening => "Listening...",
            Status::Recording => "Recording...",
            Status::Processing => "Processing...",
            Status::Error => "Error",
        };
        f.write_str(label)
    }
}

/// Snapshot of the microphone session.
#[derive(Debug, Clone, PartialEq, Serialize, Default)]
pub struct Session {
    pub listening: bool,
    pub recording: bool,
    pub system_speaking: bool,
    pub audio_level: f32,
    pub status: Status,
    /// Why the last transcription failed; cleared when the next recording starts
    pub last_error: Option<String>,
}
