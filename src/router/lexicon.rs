//! Keyword lexicon, in matching priority order.

use serde::Serialize;

/// Kiosk destinations reachable by voice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum View {
    #[default]
    Home,
    /// Guided voice form
    Form,
    /// Token queue status
    Queue,
    /// QR waypoint directions
    Waypoints,
    /// Signboard reader
    Signs,
}

impl View {
    /// Route path of the view in the kiosk front-end.
    pub fn path(&self) -> &'static str {
        match self {
            View::Home => "/",
            View::Form => "/form",
            View::Queue => "/queue",
            View::Waypoints => "/qr",
            View::Signs => "/signs",
        }
    }
}

impl std::fmt::Display for View {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.path())
    }
}

pub(super) const EMERGENCY_KEYWORDS: &[&str] = &["help", "emergency", "medical alert"];

pub(super) const STOP_KEYWORDS: &[&str] = &["stop", "cancel", "exit"];

/// A navigation command: any keyword leads to `view`.
pub(super) struct Destination {
    pub view: View,
    pub keywords: &'static [&'static str],
    pub confirmation: &'static str,
}

pub(super) const DESTINATIONS: &[Destination] = &[
    Destination { view: View::Form, keywords: &["go to form", "open form"], confirmation: "Opening Voice Form" },
    Destination { view: View::Queue, keywords: &["go to token", "queue status"], confirmation: "Opening Token System" },
    Destination {
        view: View::Waypoints,
        keywords: &["go to map", "navigation", "open map"],
        confirmation: "Opening Navigation System",
    },
    Destination { view: View::Signs, keywords: &["read sign", "open reader"], confirmation: "Opening Sign Reader" },
    Destination { view: View::Home, keywords: &["go home", "main menu", "go to home"], confirmation: "Going to Main Menu" },
];

pub(super) const ALERT_PREFIX: &str = "Emergency Alert Activated. Assistance has been notified.";
pub(super) const ALERT_SUFFIX: &str = " Please stay where you are. I am alerting the medical staff.";
pub(super) const ALERT_NO_LOCATION: &str = " Location tracking is active.";
pub(super) const ALERT_REPEAT: &str = "Help is already on the way. Please stay where you are.";
pub(super) const EMERGENCY_CANCELLED: &str = "Emergency Alert Cancelled. Resetting to main menu.";
pub(super) const STOPPED: &str = "Stopping current action. Returning to main menu.";

/// Case-insensitive substring match against any keyword. `lower` must already be lowercase.
pub(super) fn contains_any(lower: &str, keywords: &[&str]) -> bool {
    keywords.iter().any(|k| lower.contains(k))
}
