//! Speaker output using cpal.
//!
//! Plays mono buffers through the default output device. [`Player::play`]
//! blocks until the buffer drains or [`Player::interrupt`] is called, so it
//! is run on a blocking thread.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Stream, StreamConfig};
use parking_lot::{Condvar, Mutex};
use ringbuf::HeapRb;
use ringbuf::traits::{Consumer, Observer, Producer, Split};
use tracing::{debug, error, info, warn};

use super::resampler::resample;
use super::util::{find_best_config, get_device_name};

/// ~11 seconds at 48 kHz.
const PLAYBACK_RING_SIZE: usize = 524288;
/// Slack added to the expected duration before giving up on a buffer.
const DRAIN_SLACK: Duration = Duration::from_secs(1);

/// Signals "ring buffer drained" from the audio callback to `play`.
#[derive(Default)]
struct Drained {
    lock: Mutex<()>,
    cond: Condvar,
}

/// Audio player for synthesized speech and cues.
pub struct Player {
    /// Kept alive to maintain the audio stream
    _stream: Stream,
    device_sample_rate: u32,
    producer: Mutex<ringbuf::HeapProd<f32>>,
    /// Makes the callback output silence and drop queued samples
    interrupt: Arc<AtomicBool>,
    playing: Arc<AtomicBool>,
    drained: Arc<Drained>,
}

impl Player {
    /// Open the default output device at its preferred rate.
    ///
    /// # Errors
    /// Returns an error if no output device is available or the stream cannot be built.
    pub fn new() -> Result<Self> {
        let host = cpal::default_host();
        let device = host.default_output_device().context("No output device available")?;

        info!("Using output device: {}", get_device_name(&device));

        let preferred_rate = match device.default_output_config() {
            Ok(default_config) => default_config.sample_rate(),
            Err(e) => {
                debug!("No default output config ({}), falling back to 48 kHz", e);
                48000
            }
        };
        let supported_configs = device.supported_output_configs().context("Failed to get supported output configs")?;
        let config = find_best_config(supported_configs, preferred_rate)?;
        let device_sample_rate = config.sample_rate();
        let channels = config.channels() as usize;

        debug!("Audio playback config: {} Hz, {} channels, {:?}", device_sample_rate, channels, config.sample_format());

        let (producer, mut consumer) = HeapRb::<f32>::new(PLAYBACK_RING_SIZE).split();

        let interrupt = Arc::new(AtomicBool::new(false));
        let playing = Arc::new(AtomicBool::new(false));
        let drained = Arc::new(Drained::default());

        let interrupt_clone = interrupt.clone();
        let playing_clone = playing.clone();
        let drained_clone = drained.clone();

        let stream_config: StreamConfig = config.config();
        let stream = device
            .build_output_stream(
                &stream_config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    let interrupted = interrupt_clone.load(Ordering::Relaxed);
                    if interrupted {
                        consumer.clear();
                    }

                    for frame in data.chunks_mut(channels) {
                        let sample = if interrupted { 0.0 } else { consumer.try_pop().unwrap_or(0.0) };
                        frame.fill(sample);
                    }

                    if consumer.is_empty() && playing_clone.swap(false, Ordering::SeqCst) {
                        let _guard = drained_clone.lock.lock();
                        drained_clone.cond.notify_all();
                    }
                },
                |err| error!("Audio playback error: {}", err),
                None,
            )
            .context("Failed to build output stream")?;

        stream.play().context("Failed to start playback stream")?;

        info!("Audio playback configured: device {} Hz", device_sample_rate);

        Ok(Self { _stream: stream, device_sample_rate, producer: Mutex::new(producer), interrupt, playing, drained })
    }

    /// Play mono samples recorded at `sample_rate`, blocking until done.
    ///
    /// # Returns
    /// `true` if playback completed, `false` if it was interrupted or timed out.
    pub fn play(&self, samples: &[f32], sample_rate: u32) -> bool {
        if samples.is_empty() {
            return true;
        }
        self.interrupt.store(false, Ordering::SeqCst);

        let samples = match resample(samples, sample_rate, self.device_sample_rate) {
            Ok(resampled) => resampled,
            Err(e) => {
                error!("Resampling failed: {}, playing without resampling", e);
                samples.to_vec()
            }
        };

        {
            let mut producer = self.producer.lock();
            let written = producer.push_slice(&samples);
            if written < samples.len() {
                warn!("Playback buffer overflow, dropped {} samples", samples.len() - written);
            }
        }
        self.playing.store(true, Ordering::SeqCst);

        debug!("Playing {} samples at {} Hz", samples.len(), self.device_sample_rate);

        let deadline = Instant::now() + Duration::from_secs_f64(samples.len() as f64 / self.device_sample_rate as f64) + DRAIN_SLACK;

        let mut guard = self.drained.lock.lock();
        while self.playing.load(Ordering::SeqCst) {
            if self.interrupt.load(Ordering::SeqCst) {
                debug!("Playback interrupted");
                self.playing.store(false, Ordering::SeqCst);
                return false;
            }
            if Instant::now() > deadline {
                warn!("Playback timeout exceeded");
                self.interrupt.store(true, Ordering::SeqCst);
                self.playing.store(false, Ordering::SeqCst);
                return false;
            }
            self.drained.cond.wait_for(&mut guard, Duration::from_millis(50));
        }

        debug!("Playback completed");
        true
    }

    /// Cut the current buffer short. The next `play` clears the flag.
    pub fn interrupt(&self) {
        self.interrupt.store(true, Ordering::SeqCst);
    }
}

impl Drop for Player {
    fn drop(&mut self) {
        self.interrupt.store(true, Ordering::SeqCst);
        self.playing.store(false, Ordering::SeqCst);
    }
}
