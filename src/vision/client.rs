//! HTTP client for the sign analysis endpoint and the camera snapshot source.

use std::path::{Path, PathBuf};
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{KioskError, KioskResult};

/// Sentinel the service returns when the image holds no legible text.
const NO_TEXT_FOUND: &str = "no text found";

#[derive(Debug, Serialize)]
struct AnalyzeRequest<'a> {
    image: &'a str,
}

#[derive(Debug, Default, Deserialize)]
struct AnalyzeResponse {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// Reads the latest frame written by the kiosk camera.
#[derive(Debug, Clone)]
pub struct SnapshotSource {
    path: PathBuf,
}

impl SnapshotSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the current snapshot.
    ///
    /// # Errors
    /// `CameraUnavailable` when the file is missing or empty.
    pub async fn capture(&self) -> KioskResult<Vec<u8>> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) if !bytes.is_empty() => Ok(bytes),
            Ok(_) => Err(KioskError::CameraUnavailable),
            Err(e) => {
                debug!("Snapshot {} unreadable: {}", self.path.display(), e);
                Err(KioskError::CameraUnavailable)
            }
        }
    }
}

/// Submits images for text extraction.
#[derive(Debug, Clone)]
pub struct SignAnalyzer {
    client: reqwest::Client,
    url: String,
}

impl SignAnalyzer {
    /// Create an analyzer posting to `{api_url}/api/analyze_sign`.
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(api_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        let url = format!("{}/api/analyze_sign", api_url.trim_end_matches('/'));
        info!("Sign analysis endpoint: {}", url);
        Ok(Self { client, url })
    }

    /// Extract the text shown in `image`.
    ///
    /// # Returns
    /// The trimmed text.
    ///
    /// # Errors
    /// `Transport` for network failures and non-2xx statuses, `Server` for an
    /// explicit error field, `EmptyRecognition` when no text was found.
    pub async fn analyze(&self, image: &[u8]) -> KioskResult<String> {
        let encoded = STANDARD.encode(image);
        debug!("Submitting {} byte image for analysis", image.len());

        let response = self.client.post(&self.url).json(&AnalyzeRequest { image: &encoded }).send().await?;
        let status = response.status();
        let body = response.text().await?;

        interpret(status.as_u16(), &body)
    }
}

fn interpret(status: u16, body: &str) -> KioskResult<String> {
    if !(200..300).contains(&status) {
        return Err(KioskError::Transport(format!("sign analysis failed with status {}", status)));
    }

    let parsed: AnalyzeResponse =
        serde_json::from_str(body).map_err(|e| KioskError::Transport(format!("malformed analysis response: {}", e)))?;

    if let Some(error) = parsed.error {
        return Err(KioskError::Server(error));
    }

    match parsed.text.as_deref().map(str::trim) {
        Some(text) if !text.is_empty() && !text.eq_ignore_ascii_case(NO_TEXT_FOUND) => Ok(text.to_string()),
        _ => Err(KioskError::EmptyRecognition),
    }
}
