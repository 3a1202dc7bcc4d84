//! WAV container encoding and decoding via hound.

use std::io::Cursor;

use anyhow::{Context, Result};

/// One finished recording, ready to upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioSegment {
    /// Sequence number assigned by the segmentation controller
    pub seq: u64,
    /// Encoded container bytes
    pub bytes: Vec<u8>,
    /// Container MIME type
    pub mime: &'static str,
}

impl AudioSegment {
    pub const WAV: &'static str = "audio/wav";

    /// File name sent alongside the bytes in multipart uploads.
    pub fn file_name(&self) -> String {
        format!("segment-{}.wav", self.seq)
    }
}

/// Encode mono f32 samples as 16-bit PCM WAV.
pub fn encode_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec { channels: 1, sample_rate, bits_per_sample: 16, sample_format: hound::SampleFormat::Int };

    let mut cursor = Cursor::new(Vec::with_capacity(44 + samples.len() * 2));
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec).context("Failed to create WAV writer")?;
        for &sample in samples {
            let pcm = (sample.clamp(-1.0, 1.0) * f32::from(i16::MAX)) as i16;
            writer.write_sample(pcm).context("Failed to write WAV sample")?;
        }
        writer.finalize().context("Failed to finalize WAV")?;
    }

    Ok(cursor.into_inner())
}

/// Decode a WAV buffer into mono f32 samples.
///
/// # Returns
/// The samples and their sample rate.
pub fn decode_wav(bytes: &[u8]) -> Result<(Vec<f32>, u32)> {
    let mut reader = hound::WavReader::new(Cursor::new(bytes)).context("Response is not a WAV stream")?;
    let spec = reader.spec();

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader.samples::<f32>().collect::<Result<_, _>>()?,
        hound::SampleFormat::Int => {
            let scale = (1i64 << (spec.bits_per_sample.saturating_sub(1))) as f32;
            reader.samples::<i32>().map(|s| s.map(|v| v as f32 / scale)).collect::<Result<_, _>>()?
        }
    };

    Ok((super::util::downmix(&interleaved, spec.channels as usize), spec.sample_rate))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wav_header_and_size() {
        let bytes = encode_wav(&[0.0; 1600], 16000).unwrap();
        assert_eq!(&bytes[0..4], b"RIFF");
        assert_eq!(&bytes[8..12], b"WAVE");
        assert_eq!(bytes.len(), 44 + 3200);
    }

    #[test]
    fn test_decode_clamps_and_scales() {
        let bytes = encode_wav(&[0.5, -2.0, 1.0], 22050).unwrap();
        let (samples, rate) = decode_wav(&bytes).unwrap();
        assert_eq!(rate, 22050);
        assert_eq!(samples.len(), 3);
        assert!((samples[0] - 0.5).abs() < 1e-3);
        assert!((samples[1] + 1.0).abs() < 1e-3);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(decode_wav(b"{\"error\": \"quota\"}").is_err());
    }
}
