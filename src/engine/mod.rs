//! The kiosk engine: a pure reducer over every state machine, and the
//! runtime that connects it to devices, timers and HTTP services.

mod runtime;
mod state;

pub use runtime::{Runtime, spawn_scanner_task};
pub use state::{Command, Engine, EngineEvent, EngineSettings};
