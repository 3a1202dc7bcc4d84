//! QR waypoint directions.

use tracing::info;

pub const ANNOUNCEMENT: &str = "Navigation Mode. Scanning for QR codes.";

/// Walking directions per location code.
const DIRECTIONS: &[(&str, &str)] = &[
    ("QR_01", "Move right 1 step and walk down 8 steps infront of you."),
    ("QR_02", "Turn left and move forward 2 steps to access the 3rd QR."),
    ("QR_03", "Turn left and walk down 8 steps infront of you to reach floor 1 and turn right."),
    ("QR_04", "Turn left, walk straight 3 steps, turn left and walk straight 4 steps to reach entrance of room 1."),
];

/// Result of a scan while the waypoint view is active.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scan {
    pub message: String,
    /// Spoken place name for known codes
    pub location: Option<String>,
}

/// Remembers the last scanned code so a code held in front of the camera is
/// announced once.
#[derive(Debug, Default)]
pub struct Waypoints {
    last_code: Option<String>,
}

impl Waypoints {
    /// Start a fresh scanning session.
    pub fn reset(&mut self) {
        self.last_code = None;
    }

    /// Handle a decoded code. Returns `None` for a repeat of the last code.
    pub fn on_scan(&mut self, code: &str) -> Option<Scan> {
        let code = code.trim();
        if code.is_empty() || self.last_code.as_deref() == Some(code) {
            return None;
        }
        self.last_code = Some(code.to_string());

        let scan = match DIRECTIONS.iter().find(|(known, _)| *known == code) {
            Some((_, directions)) => {
                info!("📍 At {}", code);
                Scan { message: directions.to_string(), location: Some(location_label(code)) }
            }
            None => Scan { message: format!("Unknown Location Code: {}", code), location: None },
        };
        Some(scan)
    }
}

/// "QR_02" → "waypoint QR 02".
fn location_label(code: &str) -> String {
    format!("waypoint {}", code.replace('_', " "))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_code() {
        let mut waypoints = Waypoints::default();
        let scan = waypoints.on_scan("QR_02").unwrap();
        assert_eq!(scan.message, "Turn left and move forward 2 steps to access the 3rd QR.");
        assert_eq!(scan.location.as_deref(), Some("waypoint QR 02"));
    }

    #[test]
    fn test_repeat_is_ignored_until_reset() {
        let mut waypoints = Waypoints::default();
        assert!(waypoints.on_scan("QR_01").is_some());
        assert!(waypoints.on_scan("QR_01").is_none());
        assert!(waypoints.on_scan("QR_03").is_some());
        assert!(waypoints.on_scan("QR_01").is_some());

        waypoints.reset();
        assert!(waypoints.on_scan("QR_01").is_some());
    }

    #[test]
    fn test_unknown_code() {
        let mut waypoints = Waypoints::default();
        let scan = waypoints.on_scan("ROOM-9").unwrap();
        assert_eq!(scan.message, "Unknown Location Code: ROOM-9");
        assert_eq!(scan.location, None);
    }
}
