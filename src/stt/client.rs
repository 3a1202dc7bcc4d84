//! HTTP client for the transcription endpoint.

use std::time::Duration;

use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use tracing::{debug, info};

use crate::audio::AudioSegment;
use crate::error::{KioskError, KioskResult};

/// Body of a transcription response: `{text}` on success, `{error}` on failure.
#[derive(Debug, Default, Deserialize)]
struct TranscribeResponse {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// Uploads finished segments and returns the recognized text.
#[derive(Debug, Clone)]
pub struct Transcriber {
    client: reqwest::Client,
    url: String,
}

impl Transcriber {
    /// Create a transcriber posting to `{api_url}/api/transcribe`.
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(api_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        let url = format!("{}/api/transcribe", api_url.trim_end_matches('/'));
        info!("Transcription endpoint: {}", url);
        Ok(Self { client, url })
    }

    /// Transcribe one segment.
    ///
    /// # Returns
    /// The trimmed recognized text.
    ///
    /// # Errors
    /// `Transport` for network failures and non-2xx statuses, `Server` for an
    /// explicit error field, `EmptyRecognition` for a blank result.
    pub async fn transcribe(&self, segment: &AudioSegment) -> KioskResult<String> {
        debug!("Uploading segment #{} ({} bytes)", segment.seq, segment.bytes.len());

        let part = Part::bytes(segment.bytes.clone())
            .file_name(segment.file_name())
            .mime_str(segment.mime)
            .map_err(|e| KioskError::Transport(e.to_string()))?;
        let form = Form::new().part("audio", part);

        let response = self.client.post(&self.url).multipart(form).send().await?;
        let status = response.status();
        let body = response.text().await?;

        interpret(status.as_u16(), &body)
    }
}

/// Map a status code and body onto the recognition outcome.
fn interpret(status: u16, body: &str) -> KioskResult<String> {
    if !(200..300).contains(&status) {
        let detail = serde_json::from_str::<TranscribeResponse>(body).ok().and_then(|r| r.error).unwrap_or_else(|| body.trim().to_string());
        return Err(KioskError::Transport(format!("transcription failed with status {}: {}", status, detail)));
    }

    let parsed: TranscribeResponse =
        serde_json::from_str(body).map_err(|e| KioskError::Transport(format!("malformed transcription response: {}", e)))?;

    if let Some(error) = parsed.error {
        return Err(KioskError::Server(error));
    }

    match parsed.text.as_deref().map(str::trim) {
        Some(text) if !text.is_empty() => Ok(text.to_string()),
        _ => Err(KioskError::EmptyRecognition),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_is_trimmed() {
        assert_eq!(interpret(200, r#"{"text": "  go to form "}"#), Ok("go to form".to_string()));
    }

    #[test]
    fn test_blank_text_is_empty_recognition() {
        assert_eq!(interpret(200, r#"{"text": "   "}"#), Err(KioskError::EmptyRecognition));
        assert_eq!(interpret(200, r#"{}"#), Err(KioskError::EmptyRecognition));
    }

    #[test]
    fn test_error_field_is_server_error() {
        assert_eq!(interpret(200, r#"{"error": "model overloaded"}"#), Err(KioskError::Server("model overloaded".into())));
    }

    #[test]
    fn test_non_2xx_is_transport_error() {
        let Err(KioskError::Transport(message)) = interpret(502, r#"{"error": "upstream down"}"#) else {
            panic!("expected transport error");
        };
        assert!(message.contains("502"));
        assert!(message.contains("upstream down"));

        assert!(matches!(interpret(500, "<html>oops</html>"), Err(KioskError::Transport(_))));
        assert!(matches!(interpret(200, "not json"), Err(KioskError::Transport(_))));
    }
}
