//! Application configuration and CLI argument parsing.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::steps;
use crate::dialog::DialogStep;
use crate::segmenter::SegmenterConfig;

/// Kiosk voice assistant configuration.
#[derive(Parser, Debug, Clone, Serialize, Deserialize)]
#[command(name = "kiosk-voice")]
#[command(author, version, about = "Hands-free voice assistant for a public kiosk", long_about = None)]
pub struct AppConfig {
    /// Print the guided form steps and exit
    #[arg(long)]
    pub list_steps: bool,

    /// Base URL of the backend serving /api/transcribe and /api/analyze_sign
    #[arg(long, short = 'u', env = "KIOSK_API_URL", default_value = "http://localhost:5000")]
    pub api_url: String,

    /// Base URL of an OpenAI-compatible speech endpoint (utterances are only logged when unset)
    #[arg(long, env = "KIOSK_TTS_URL")]
    pub tts_url: Option<String>,

    /// Bearer token for the speech endpoint
    #[arg(long, env = "KIOSK_TTS_API_KEY", hide_env_values = true)]
    #[serde(skip_serializing)]
    pub tts_api_key: Option<String>,

    /// Speech model name sent to the speech endpoint
    #[arg(long, default_value = "tts-1")]
    pub tts_model: String,

    /// Preferred voice; the endpoint may ignore it
    #[arg(long, default_value = "alloy")]
    pub tts_voice: String,

    /// Audio sample rate for captured segments
    #[arg(long, default_value = "16000")]
    pub sample_rate: u32,

    /// Energy level (0-255) above which a frame counts as speech
    #[arg(long, default_value = "20")]
    pub speech_threshold: f32,

    /// Silence in milliseconds that ends a recording
    #[arg(long, default_value = "1500")]
    pub silence_duration_ms: u64,

    /// Segments with fewer encoded bytes are dropped as noise
    #[arg(long, default_value = "1000")]
    pub min_segment_bytes: usize,

    /// Restart capture when no signal was seen for this long while listening
    #[arg(long, default_value = "10000")]
    pub watchdog_timeout_ms: u64,

    /// Energy sampling rate of the segmentation loop
    #[arg(long, default_value = "60")]
    pub tick_hz: u32,

    /// Quiet period in milliseconds before a dialog answer is finalized
    #[arg(long, default_value = "2000")]
    pub quiet_period_ms: u64,

    /// How long emergency mode stays active without a stop command
    #[arg(long, default_value = "20000")]
    pub emergency_duration_ms: u64,

    /// Upper bound for a single utterance; speaking is cleared after it
    #[arg(long, default_value = "30000")]
    pub speech_timeout_ms: u64,

    /// Delay in milliseconds before resuming the microphone after playback ends
    #[arg(long, default_value = "300")]
    pub post_playback_delay_ms: u64,

    /// Timeout for backend requests
    #[arg(long, default_value = "30")]
    pub request_timeout_secs: u64,

    /// JSON file with the guided form steps (built-in steps when omitted)
    #[arg(long, short = 'f')]
    pub form_steps: Option<PathBuf>,

    /// Camera snapshot read by the sign reader
    #[arg(long, env = "KIOSK_SNAPSHOT", default_value_os_t = default_snapshot_path())]
    pub snapshot_path: PathBuf,

    /// Enable verbose logging
    #[arg(long, short = 'v')]
    pub verbose: bool,
}

impl AppConfig {
    /// Parse configuration from command line arguments.
    pub fn from_args() -> Self {
        let config = Self::parse();

        if config.list_steps {
            match config.dialog_steps() {
                Ok(steps) => {
                    steps::print_steps(&steps);
                    std::process::exit(0);
                }
                Err(e) => {
                    eprintln!("Error: {:#}", e);
                    std::process::exit(1);
                }
            }
        }

        config
    }

    /// Steps of the guided form, from `--form-steps` or the built-in list.
    pub fn dialog_steps(&self) -> Result<Vec<DialogStep>> {
        match &self.form_steps {
            Some(path) => steps::load_steps(path),
            None => Ok(steps::default_steps()),
        }
    }

    /// Tunables of the segmentation controller.
    pub fn segmenter(&self) -> SegmenterConfig {
        SegmenterConfig {
            speech_threshold: self.speech_threshold,
            silence_duration: Duration::from_millis(self.silence_duration_ms),
            min_segment_bytes: self.min_segment_bytes,
            watchdog_timeout: Duration::from_millis(self.watchdog_timeout_ms),
        }
    }

    pub fn quiet_period(&self) -> Duration {
        Duration::from_millis(self.quiet_period_ms)
    }

    pub fn emergency_duration(&self) -> Duration {
        Duration::from_millis(self.emergency_duration_ms)
    }

    pub fn speech_timeout(&self) -> Duration {
        Duration::from_millis(self.speech_timeout_ms)
    }

    pub fn post_playback_delay(&self) -> Duration {
        Duration::from_millis(self.post_playback_delay_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Interval between energy samples.
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.tick_hz.max(1)))
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if !self.api_url.starts_with("http://") && !self.api_url.starts_with("https://") {
            anyhow::bail!("API URL must start with http:// or https://: {}", self.api_url);
        }

        if let Some(ref url) = self.tts_url
            && !url.starts_with("http://")
            && !url.starts_with("https://")
        {
            anyhow::bail!("TTS URL must start with http:// or https://: {}", url);
        }

        if !(0.0..=255.0).contains(&self.speech_threshold) {
            anyhow::bail!("Speech threshold must be between 0 and 255");
        }

        if self.tick_hz == 0 || self.tick_hz > 1000 {
            anyhow::bail!("Tick rate must be between 1 and 1000 Hz");
        }

        if self.silence_duration_ms == 0 || self.quiet_period_ms == 0 {
            anyhow::bail!("Silence duration and quiet period must be positive");
        }

        let steps = self.dialog_steps()?;
        if steps.is_empty() {
            anyhow::bail!("The guided form needs at least one step");
        }

        Ok(())
    }

    /// Log the current configuration.
    pub fn log_config(&self) {
        info!("Configuration:");
        info!("  API URL: {}", self.api_url);
        match self.tts_url {
            Some(ref url) => info!("  TTS URL: {} (model {}, voice {})", url, self.tts_model, self.tts_voice),
            None => info!("  TTS URL: none (utterances are logged only)"),
        }
        info!("  Sample rate: {} Hz", self.sample_rate);
        info!("  Speech threshold: {}", self.speech_threshold);
        info!("  Silence duration: {}ms", self.silence_duration_ms);
        info!("  Watchdog timeout: {}ms", self.watchdog_timeout_ms);
        info!("  Quiet period: {}ms", self.quiet_period_ms);
        info!("  Emergency duration: {}ms", self.emergency_duration_ms);
        info!("  Post-playback delay: {}ms", self.post_playback_delay_ms);
        match self.form_steps {
            Some(ref path) => info!("  Form steps: {}", path.display()),
            None => info!("  Form steps: built-in"),
        }
        info!("  Snapshot: {}", self.snapshot_path.display());
    }
}

/// Default camera snapshot location (~/.kiosk-voice/snapshot.jpg).
fn default_snapshot_path() -> PathBuf {
    if let Some(home_dir) = dirs::home_dir() {
        home_dir.join(".kiosk-voice").join("snapshot.jpg")
    } else {
        PathBuf::from("snapshot.jpg")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> AppConfig {
        let mut argv = vec!["kiosk-voice"];
        argv.extend_from_slice(args);
        AppConfig::try_parse_from(argv).expect("valid arguments")
    }

    #[test]
    fn test_defaults() {
        let config = parse(&["--api-url", "http://kiosk.local:5000"]);
        let segmenter = config.segmenter();
        assert_eq!(segmenter.speech_threshold, 20.0);
        assert_eq!(segmenter.silence_duration, Duration::from_millis(1500));
        assert_eq!(segmenter.min_segment_bytes, 1000);
        assert_eq!(segmenter.watchdog_timeout, Duration::from_secs(10));
        assert_eq!(config.quiet_period(), Duration::from_secs(2));
        assert_eq!(config.emergency_duration(), Duration::from_secs(20));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_tick_interval() {
        let config = parse(&["--tick-hz", "50"]);
        assert_eq!(config.tick_interval(), Duration::from_millis(20));
    }

    #[test]
    fn test_rejects_bad_urls_and_threshold() {
        assert!(parse(&["--api-url", "kiosk.local"]).validate().is_err());
        assert!(parse(&["--api-url", "http://a", "--tts-url", "ftp://b"]).validate().is_err());
        assert!(parse(&["--api-url", "http://a", "--speech-threshold", "300"]).validate().is_err());
    }

    #[test]
    fn test_missing_steps_file_fails_validation() {
        let config = parse(&["--api-url", "http://a", "--form-steps", "/nonexistent/steps.json"]);
        assert!(config.validate().is_err());
    }
}
