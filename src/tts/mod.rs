//! Speech output: remote synthesis and the single-flight speech channel.

mod channel;
mod synthesizer;

pub use channel::{SpeechChannel, SpeechDone, SpeechTiming};
pub use synthesizer::Synthesizer;
