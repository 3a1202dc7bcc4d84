//! Signboard reader.

use tracing::{debug, info};

use crate::error::KioskError;

pub const ANNOUNCEMENT: &str = "Signboard Reader Active. Say 'Read This' to scan.";

/// What the engine should do for a reader command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignAction {
    Speak(String),
    /// Capture a snapshot and submit it; the result comes back tagged with `request`
    Analyze { request: u64 },
}

/// Reader state: at most one analysis in flight.
#[derive(Debug, Default)]
pub struct SignReader {
    next_request: u64,
    pending: Option<u64>,
    last_text: Option<String>,
}

impl SignReader {
    pub fn busy(&self) -> bool {
        self.pending.is_some()
    }

    /// Text read from the most recent successful scan.
    pub fn last_text(&self) -> Option<&str> {
        self.last_text.as_deref()
    }

    /// Handle an utterance while the reader view is active.
    pub fn on_text(&mut self, text: &str) -> Vec<SignAction> {
        let lower = text.to_lowercase();
        let mut actions = Vec::new();

        if (lower.contains("read this") || lower.contains("scan")) && !self.busy() {
            self.next_request += 1;
            self.pending = Some(self.next_request);
            info!("📷 Scanning sign (request #{})", self.next_request);
            actions.push(SignAction::Speak("Analyzing sign. Please hold steady.".to_string()));
            actions.push(SignAction::Analyze { request: self.next_request });
        }

        if lower.contains("reset") || lower.contains("clear") {
            self.abandon();
            self.last_text = None;
            actions.push(SignAction::Speak("Camera active.".to_string()));
        }

        actions
    }

    /// Accept an analysis result.
    ///
    /// # Returns
    /// What to say, or `None` when the result belongs to an abandoned request.
    pub fn on_result(&mut self, request: u64, result: Result<String, KioskError>) -> Option<String> {
        if self.pending != Some(request) {
            debug!("Dropping stale sign analysis #{}", request);
            return None;
        }
        self.pending = None;

        let message = match result {
            Ok(text) => {
                info!("📷 Sign reads: \"{}\"", text);
                let message = format!("The sign says: {}", text);
                self.last_text = Some(text);
                message
            }
            Err(KioskError::EmptyRecognition) => {
                "I couldn't identify the sign. Please try moving the camera and scanning again.".to_string()
            }
            Err(KioskError::CameraUnavailable) => "Camera not ready.".to_string(),
            Err(KioskError::Transport(reason)) => {
                debug!("Sign analysis transport failure: {}", reason);
                "Connection error. Please try again.".to_string()
            }
            Err(e) => {
                debug!("Sign analysis failed: {}", e);
                "Scanning failed. Please try again.".to_string()
            }
        };
        Some(message)
    }

    /// Forget any in-flight request so its result is dropped.
    pub fn abandon(&mut self) {
        self.pending = None;
    }
}
