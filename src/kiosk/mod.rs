//! Kiosk pages driven by voice: queue board, sign reader and waypoints.
//!
//! Each page only reacts while its view is current.

mod queue;
mod signs;
mod waypoints;

pub use queue::QueueBoard;
pub use signs::{SignAction, SignReader};
pub use waypoints::{Scan, Waypoints};

/// Spoken when the home view opens.
pub const HOME_WELCOME: &str = "Welcome. Please say a command like 'Go to Form', or 'Read Sign'.";

pub const SIGNS_ANNOUNCEMENT: &str = signs::ANNOUNCEMENT;
pub const WAYPOINTS_ANNOUNCEMENT: &str = waypoints::ANNOUNCEMENT;
