//! Audio resampling with rubato's FFT resampler.
//!
//! [`StreamResampler`] is used inside the capture callback, [`resample`] for
//! whole synthesized utterances before playback.

use anyhow::{Context, Result};
use audioadapter_buffers::direct::InterleavedSlice;
use rubato::{Fft, FixedSync, Resampler};

/// Input frames per FFT pass.
const CHUNK_SIZE: usize = 1024;
/// Sub-chunks per pass (higher = better quality, more CPU).
const SUB_CHUNKS: usize = 2;

fn mono_fft(from_rate: u32, to_rate: u32) -> Result<Fft<f32>> {
    Fft::<f32>::new(from_rate as usize, to_rate as usize, CHUNK_SIZE, SUB_CHUNKS, 1, FixedSync::Input)
        .context("Failed to create resampler")
}

/// One fixed-size pass through the resampler, appending to `out`.
fn run_chunk(resampler: &mut Fft<f32>, chunk: &[f32], scratch: &mut [f32], out: &mut Vec<f32>) -> Result<()> {
    let frames_max = scratch.len();
    let input = InterleavedSlice::new(chunk, 1, CHUNK_SIZE).context("Failed to create input adapter")?;
    let mut output = InterleavedSlice::new_mut(scratch, 1, frames_max).context("Failed to create output adapter")?;

    let (_, written) = resampler
        .process_into_buffer(&input, &mut output, None)
        .map_err(|e| anyhow::anyhow!("Resampling error: {}", e))?;
    out.extend_from_slice(&scratch[..written]);
    Ok(())
}

/// Resampler for audio arriving in callback-sized blocks.
pub struct StreamResampler {
    resampler: Fft<f32>,
    scratch: Vec<f32>,
    /// Input not yet forming a full chunk
    pending: Vec<f32>,
}

impl StreamResampler {
    pub fn new(from_rate: u32, to_rate: u32) -> Result<Self> {
        let resampler = mono_fft(from_rate, to_rate)?;
        let scratch = vec![0.0f32; resampler.output_frames_max()];
        Ok(Self { resampler, scratch, pending: Vec::with_capacity(CHUNK_SIZE * 2) })
    }

    /// Queue `samples` and return whatever full chunks produced (possibly nothing).
    pub fn push(&mut self, samples: &[f32]) -> Vec<f32> {
        self.pending.extend_from_slice(samples);

        let mut out = Vec::new();
        while self.pending.len() >= CHUNK_SIZE {
            let chunk: Vec<f32> = self.pending.drain(..CHUNK_SIZE).collect();
            if let Err(e) = run_chunk(&mut self.resampler, &chunk, &mut self.scratch, &mut out) {
                tracing::warn!("Dropping capture block: {}", e);
            }
        }
        out
    }
}

/// Resample a complete buffer from `from_rate` to `to_rate`.
///
/// The final partial chunk is zero-padded and the output trimmed back to the
/// expected length.
pub fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Result<Vec<f32>> {
    if from_rate == to_rate {
        return Ok(samples.to_vec());
    }

    let mut resampler = mono_fft(from_rate, to_rate)?;
    let mut scratch = vec![0.0f32; resampler.output_frames_max()];

    let expected = (samples.len() as f64 * to_rate as f64 / from_rate as f64) as usize;
    let mut output = Vec::with_capacity(expected + CHUNK_SIZE);

    for chunk in samples.chunks(CHUNK_SIZE) {
        if chunk.len() == CHUNK_SIZE {
            run_chunk(&mut resampler, chunk, &mut scratch, &mut output)?;
        } else {
            let mut padded = chunk.to_vec();
            padded.resize(CHUNK_SIZE, 0.0);
            run_chunk(&mut resampler, &padded, &mut scratch, &mut output)?;
        }
    }

    output.truncate(expected);
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resample_upsampling() {
        let result = resample(&[0.0; 24000], 24000, 48000).unwrap();
        assert!(result.len() <= 48000 && result.len() >= 47000, "got {}", result.len());
    }

    #[test]
    fn test_resample_same_rate_is_identity() {
        let samples = vec![0.1, 0.2, 0.3];
        assert_eq!(resample(&samples, 16000, 16000).unwrap(), samples);
    }

    #[test]
    fn test_stream_resampler_buffers_partial_chunks() {
        let mut resampler = StreamResampler::new(48000, 16000).unwrap();
        assert!(resampler.push(&[0.0; 512]).is_empty());

        let mut total = 0;
        for _ in 0..30 {
            total += resampler.push(&[0.0; 480]).len();
        }
        // 15360 input frames in, roughly a third out minus the FFT delay
        assert!(total > 3000 && total <= 5300, "got {}", total);
    }
}
