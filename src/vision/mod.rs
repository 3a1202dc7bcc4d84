//! Camera snapshots and remote sign text extraction.

mod client;

pub use client::{SignAnalyzer, SnapshotSource};
