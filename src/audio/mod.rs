//! Audio I/O: microphone capture, energy metering, segment encoding and playback.
//!
//! Capture and playback use cpal, with resampling via rubato. Finished
//! segments are encoded as WAV with hound.

mod capture;
mod encode;
mod playback;
pub mod resampler;
mod tap;
pub mod util;

pub use capture::Capturer;
pub use encode::{AudioSegment, decode_wav};
pub use playback::Player;
pub use tap::AudioTap;
