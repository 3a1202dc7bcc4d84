//! Audio segmentation controller.
//!
//! Turns the per-tick energy signal into discrete recorded segments using
//! voice-activity heuristics, gated against the assistant's own speech and
//! self-healing when the capture pipeline stalls.

mod controller;
mod session;

pub use controller::{SegmenterConfig, SegmenterEffect, SegmenterEvent, Segmenter};
pub use session::{Session, Status};
