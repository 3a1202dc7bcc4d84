//! Microphone capture using cpal.
//!
//! Captures from the default input device, downmixes and resamples to the
//! target rate, and hands mono blocks to a callback on a dedicated thread.
//! The cpal callback only pushes into a lock-free ring buffer.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, SyncSender};
use std::time::Duration;

use anyhow::{Context, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Stream, StreamConfig};
use parking_lot::Mutex;
use ringbuf::HeapRb;
use ringbuf::traits::{Consumer, Observer, Producer, Split};
use tracing::{debug, error, info, warn};

use super::resampler::StreamResampler;
use super::util::{downmix, find_best_config, get_device_name};

/// ~4 seconds at 16 kHz.
const RING_SIZE: usize = 65536;
/// Blocks queued for the callback thread before the drain thread waits.
const CHANNEL_DEPTH: usize = 32;
const DRAIN_CHUNK: usize = 2048;

/// Microphone capturer. Dropping it releases the device.
pub struct Capturer {
    stream: Stream,
    shutdown: Arc<AtomicBool>,
    /// First stream error reported by cpal since the last check
    fault: Arc<Mutex<Option<String>>>,
    drain_handle: Option<std::thread::JoinHandle<()>>,
    callback_handle: Option<std::thread::JoinHandle<()>>,
    consumer: Option<ringbuf::HeapCons<f32>>,
    sender: Option<SyncSender<Vec<f32>>>,
}

impl Capturer {
    /// Open the default input device.
    ///
    /// # Arguments
    /// * `sample_rate` - Rate of the blocks handed to `callback`
    /// * `callback` - Receives mono f32 blocks on the callback thread
    ///
    /// # Errors
    /// Returns an error if no input device is available or the stream cannot be built.
    pub fn new<F>(sample_rate: u32, callback: F) -> Result<Self>
    where
        F: Fn(&[f32]) + Send + 'static,
    {
        let host = cpal::default_host();
        let device = host.default_input_device().context("No input device available")?;

        info!("Using input device: {}", get_device_name(&device));

        let supported_configs = device.supported_input_configs().context("Failed to get supported input configs")?;
        let config = find_best_config(supported_configs, sample_rate)?;
        let device_sample_rate = config.sample_rate();
        let channels = config.channels() as usize;

        debug!("Audio capture config: {} Hz, {} channels, {:?}", device_sample_rate, channels, config.sample_format());

        let mut resampler = if device_sample_rate != sample_rate {
            info!("Device sample rate {} Hz differs from target {} Hz - resampling will be applied", device_sample_rate, sample_rate);
            Some(StreamResampler::new(device_sample_rate, sample_rate)?)
        } else {
            None
        };

        let (mut producer, consumer) = HeapRb::<f32>::new(RING_SIZE).split();

        let fault = Arc::new(Mutex::new(None));
        let fault_clone = fault.clone();
        let err_fn = move |err: cpal::StreamError| {
            error!("Audio capture error: {}", err);
            fault_clone.lock().get_or_insert_with(|| err.to_string());
        };

        let mut dropped: u64 = 0;
        let stream_config: StreamConfig = config.config();
        let stream = device
            .build_input_stream(
                &stream_config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    let mono = downmix(data, channels);
                    let block = match resampler.as_mut() {
                        Some(resampler) => resampler.push(&mono),
                        None => mono,
                    };
                    if block.is_empty() {
                        return;
                    }

                    let written = producer.push_slice(&block);
                    if written < block.len() {
                        dropped += 1;
                        if dropped % 100 == 1 {
                            warn!("Ring buffer full, dropped {} audio blocks", dropped);
                        }
                    }
                },
                err_fn,
                None,
            )
            .context("Failed to build input stream")?;

        let (sender, receiver) = mpsc::sync_channel::<Vec<f32>>(CHANNEL_DEPTH);
        let callback_handle = std::thread::spawn(move || {
            while let Ok(samples) = receiver.recv() {
                callback(&samples);
            }
            debug!("Audio callback thread exiting");
        });

        info!("Audio capture configured: device {} Hz -> output {} Hz", device_sample_rate, sample_rate);

        Ok(Self {
            stream,
            shutdown: Arc::new(AtomicBool::new(false)),
            fault,
            drain_handle: None,
            callback_handle: Some(callback_handle),
            consumer: Some(consumer),
            sender: Some(sender),
        })
    }

    /// Start the stream and the drain thread.
    pub fn start(&mut self) -> Result<()> {
        if self.drain_handle.is_some() {
            return Ok(());
        }
        self.stream.play().context("Failed to start audio stream")?;

        let mut consumer = self.consumer.take().context("Consumer already taken")?;
        let sender = self.sender.take().context("Sender already taken")?;
        let shutdown = self.shutdown.clone();

        self.drain_handle = Some(std::thread::spawn(move || {
            let mut read_buffer = vec![0.0f32; DRAIN_CHUNK];

            while !shutdown.load(Ordering::Relaxed) {
                if consumer.is_empty() {
                    std::thread::sleep(Duration::from_micros(500));
                    continue;
                }

                let read = consumer.pop_slice(&mut read_buffer);
                if read > 0 && sender.send(read_buffer[..read].to_vec()).is_err() {
                    debug!("Audio channel closed, drain thread exiting");
                    return;
                }
            }
            debug!("Drain thread shutting down");
        }));

        info!("🎙️  Audio capture started");
        Ok(())
    }

    /// Take the pending stream error, if cpal reported one.
    pub fn take_fault(&self) -> Option<String> {
        self.fault.lock().take()
    }

    /// Stop the stream and join the worker threads.
    pub fn shutdown(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Err(e) = self.stream.pause() {
            debug!("Failed to pause input stream: {}", e);
        }

        // Unblocks the callback thread when the drain thread never started
        drop(self.sender.take());

        // The drain thread owns the last sender; joining it closes the channel
        for handle in [self.drain_handle.take(), self.callback_handle.take()].into_iter().flatten() {
            if let Err(e) = handle.join() {
                warn!("Failed to join audio thread: {:?}", e);
            }
        }

        debug!("Audio capture released");
    }
}

impl Drop for Capturer {
    fn drop(&mut self) {
        self.shutdown();
    }
}
