//! Configuration module for the kiosk assistant.
//!
//! Provides CLI argument parsing and the guided form steps.

#[allow(clippy::module_inception)]
mod config;
mod steps;

pub use config::AppConfig;
