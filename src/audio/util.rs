//! Shared audio utilities for capture, metering and playback.

use anyhow::Result;
use cpal::traits::DeviceTrait;
use cpal::{Device, SampleFormat, SupportedStreamConfig, SupportedStreamConfigRange};

/// Bottom of the byte energy scale in dBFS.
const FLOOR_DB: f32 = -100.0;
/// Top of the byte energy scale in dBFS.
const CEILING_DB: f32 = -30.0;
/// Level drop from broadband RMS to the average of 256 analyser bins.
const BIN_SPREAD_DB: f32 = 24.0;

/// Get a human-readable device name.
///
/// # Arguments
/// * `device` - The audio device
///
/// # Returns
/// Device name string, or "Unknown" if the name cannot be retrieved.
pub fn get_device_name(device: &Device) -> String {
    device.description().ok().map(|desc| desc.name().to_string()).unwrap_or_else(|| "Unknown".to_string())
}

/// Find a mono/stereo F32 configuration at (or nearest to) `target_sample_rate`.
///
/// # Arguments
/// * `configs` - Iterator of supported stream configurations
/// * `target_sample_rate` - Desired sample rate (16000 for segments, device default for playback)
///
/// # Returns
/// The best matching `SupportedStreamConfig`, or an error if the device has no F32 config.
pub fn find_best_config(configs: impl Iterator<Item = SupportedStreamConfigRange>, target_sample_rate: u32) -> Result<SupportedStreamConfig> {
    let candidates: Vec<SupportedStreamConfigRange> =
        configs.filter(|c| c.channels() <= 2 && c.sample_format() == SampleFormat::F32).collect();

    let Some(first) = candidates.first() else {
        anyhow::bail!("No F32 audio configuration found - this is unexpected on modern hardware");
    };

    if let Some(exact) = candidates
        .iter()
        .find(|c| (c.min_sample_rate()..=c.max_sample_rate()).contains(&target_sample_rate))
    {
        return Ok((*exact).with_sample_rate(target_sample_rate));
    }

    let rate = target_sample_rate.clamp(first.min_sample_rate(), first.max_sample_rate());
    Ok((*first).with_sample_rate(rate))
}

/// Downmix interleaved samples to mono by averaging channels.
pub fn downmix(data: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        data.to_vec()
    } else {
        data.chunks(channels).map(|frame| frame.iter().sum::<f32>() / channels as f32).collect()
    }
}

/// Energy of a block of samples on a 0-255 scale.
///
/// Approximates the average of a 512-point analyser's byte frequency bins:
/// RMS in dBFS, lowered by the bin spread and mapped linearly from
/// -100 dB (0) to -30 dB (255).
pub fn energy_level(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let mean_square = samples.iter().map(|s| s * s).sum::<f32>() / samples.len() as f32;
    if mean_square <= f32::EPSILON * f32::EPSILON {
        return 0.0;
    }

    let db = 10.0 * mean_square.log10() - BIN_SPREAD_DB;
    ((db - FLOOR_DB) / (CEILING_DB - FLOOR_DB) * 255.0).clamp(0.0, 255.0)
}

/// Short sine blip played when recording starts.
///
/// # Arguments
/// * `sample_rate` - Rate of the returned samples
///
/// # Returns
/// 80 ms of an 880 Hz tone with a linear fade-out.
pub fn cue_tone(sample_rate: u32) -> Vec<f32> {
    const FREQUENCY: f32 = 880.0;
    const DURATION_MS: usize = 80;
    const GAIN: f32 = 0.2;

    let len = sample_rate as usize * DURATION_MS / 1000;
    (0..len)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            let fade = 1.0 - i as f32 / len as f32;
            (2.0 * std::f32::consts::PI * FREQUENCY * t).sin() * GAIN * fade
        })
        .collect()
}
