//! Shared tap between the capture callback and the event loop.
//!
//! The capture thread pushes every mono block through [`AudioTap::feed`]; the
//! event loop samples the energy level on each tick and drives the recorder.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use parking_lot::Mutex;
use tracing::{debug, warn};

use super::encode::{AudioSegment, encode_wav};
use super::util::energy_level;

/// Recordings are capped to keep a stuck-open recorder bounded.
const MAX_RECORDING_SECS: usize = 30;

#[derive(Debug, Default)]
struct TapState {
    level: f32,
    updated: Option<Instant>,
    recording: bool,
    samples: Vec<f32>,
}

/// Energy meter plus segment recorder fed by the capture callback.
#[derive(Debug)]
pub struct AudioTap {
    sample_rate: u32,
    stale_after: Duration,
    state: Mutex<TapState>,
}

impl AudioTap {
    /// # Arguments
    /// * `sample_rate` - Rate of the samples passed to [`AudioTap::feed`]
    /// * `stale_after` - Level reads as zero when no block arrived for this long
    pub fn new(sample_rate: u32, stale_after: Duration) -> Arc<Self> {
        Arc::new(Self { sample_rate, stale_after, state: Mutex::new(TapState::default()) })
    }

    /// Accept one block of mono samples from the capture thread.
    pub fn feed(&self, samples: &[f32]) {
        let level = energy_level(samples);
        let mut state = self.state.lock();
        state.level = level;
        state.updated = Some(Instant::now());

        if state.recording {
            let room = (self.sample_rate as usize * MAX_RECORDING_SECS).saturating_sub(state.samples.len());
            if room < samples.len() {
                warn!("Recording reached {}s, truncating", MAX_RECORDING_SECS);
            }
            state.samples.extend_from_slice(&samples[..samples.len().min(room)]);
        }
    }

    /// Latest energy level (0-255), or zero when the capture has gone quiet.
    pub fn level(&self, now: Instant) -> f32 {
        let state = self.state.lock();
        match state.updated {
            Some(at) if now.saturating_duration_since(at) <= self.stale_after => state.level,
            _ => 0.0,
        }
    }

    /// Start buffering samples for a new segment.
    pub fn begin(&self) {
        let mut state = self.state.lock();
        state.samples.clear();
        state.recording = true;
    }

    /// Stop buffering and encode what was recorded.
    pub fn finish(&self, seq: u64) -> Result<AudioSegment> {
        let samples = {
            let mut state = self.state.lock();
            state.recording = false;
            std::mem::take(&mut state.samples)
        };
        debug!("Segment #{}: {} samples ({:.2}s)", seq, samples.len(), samples.len() as f32 / self.sample_rate as f32);

        let bytes = if samples.is_empty() { Vec::new() } else { encode_wav(&samples, self.sample_rate)? };
        Ok(AudioSegment { seq, bytes, mime: AudioSegment::WAV })
    }

    /// Stop buffering and throw the samples away.
    pub fn discard(&self) {
        let mut state = self.state.lock();
        state.recording = false;
        state.samples.clear();
    }

    /// Forget the last level so a restarted capture starts from silence.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.level = 0.0;
        state.updated = None;
        state.recording = false;
        state.samples.clear();
    }
}
