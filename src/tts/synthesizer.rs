//! Text-to-speech through an OpenAI-compatible `/audio/speech` endpoint.

use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info};

use crate::config::AppConfig;
use crate::error::{KioskError, KioskResult};

#[derive(Debug, Serialize)]
struct SpeechRequest<'a> {
    model: &'a str,
    input: &'a str,
    voice: &'a str,
    response_format: &'static str,
}

/// Remote speech synthesizer returning WAV audio.
#[derive(Debug, Clone)]
pub struct Synthesizer {
    client: reqwest::Client,
    url: String,
    api_key: Option<String>,
    model: String,
    voice: String,
}

impl Synthesizer {
    /// Create a synthesizer from the configuration.
    ///
    /// # Returns
    /// `None` when no speech endpoint is configured.
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn from_config(config: &AppConfig) -> anyhow::Result<Option<Self>> {
        let Some(ref base) = config.tts_url else {
            info!("No TTS endpoint configured, utterances will be logged only");
            return Ok(None);
        };

        let synthesizer = Self::new(
            base,
            config.tts_api_key.clone(),
            &config.tts_model,
            &config.tts_voice,
            config.request_timeout(),
        )?;
        info!("TTS endpoint: {} (voice {})", synthesizer.url, synthesizer.voice);
        Ok(Some(synthesizer))
    }

    /// Create a synthesizer for an OpenAI-compatible endpoint.
    ///
    /// # Arguments
    /// * `base_url` - Endpoint root, `/audio/speech` is appended
    /// * `api_key` - Optional bearer token
    /// * `model` - Speech model name
    /// * `voice` - Voice name
    /// * `timeout` - Per-request timeout
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(base_url: &str, api_key: Option<String>, model: &str, voice: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: format!("{}/audio/speech", base_url.trim_end_matches('/')),
            api_key,
            model: model.to_string(),
            voice: voice.to_string(),
        })
    }

    /// Synthesize `text` into a WAV buffer.
    ///
    /// # Errors
    /// `Transport` for network failures and non-2xx statuses.
    pub async fn synthesize(&self, text: &str) -> KioskResult<Vec<u8>> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(Vec::new());
        }

        debug!("Synthesizing: \"{}\"", text);
        let body = SpeechRequest { model: &self.model, input: text, voice: &self.voice, response_format: "wav" };

        let mut request = self.client.post(&self.url).json(&body);
        if let Some(ref key) = self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(KioskError::Transport(format!("TTS API error {}: {}", status, detail.trim())));
        }

        let bytes = response.bytes().await?;
        Ok(bytes.to_vec())
    }
}

/// Rough speaking time for `text`, used to size the playback safety timeout.
pub fn estimated_duration(text: &str) -> Duration {
    const WORDS_PER_SECOND: f64 = 2.5;
    let words = text.split_whitespace().count() as f64;
    Duration::from_secs_f64(words / WORDS_PER_SECOND)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_body() {
        let body = serde_json::to_value(SpeechRequest { model: "tts-1", input: "Hello", voice: "alloy", response_format: "wav" }).unwrap();
        assert_eq!(body, serde_json::json!({"model": "tts-1", "input": "Hello", "voice": "alloy", "response_format": "wav"}));
    }

    #[test]
    fn test_estimated_duration() {
        assert_eq!(estimated_duration(""), Duration::ZERO);
        assert_eq!(estimated_duration("one two three four five"), Duration::from_secs(2));
    }
}
