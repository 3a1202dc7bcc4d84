//! Speech-to-text through the remote transcription service.
//!
//! Segments are uploaded as multipart WAV; the service answers with the
//! recognized text.

mod client;

pub use client::Transcriber;
