//! Command router with the interruptible emergency state machine.

use std::time::{Duration, Instant};

use tracing::{debug, info};

use super::lexicon::{
    ALERT_NO_LOCATION, ALERT_PREFIX, ALERT_REPEAT, ALERT_SUFFIX, DESTINATIONS, EMERGENCY_CANCELLED, EMERGENCY_KEYWORDS,
    STOP_KEYWORDS, STOPPED, View, contains_any,
};
use crate::timer::{TimerCommand, TimerFired, TimerKind, TimerSlot};

/// Emergency mode. `expires_at` is set only while active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EmergencyState {
    pub active: bool,
    pub expires_at: Option<Instant>,
}

/// Routing mode threaded through [`route`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Mode {
    pub emergency: EmergencyState,
}

/// Ambient facts the router needs besides the text.
#[derive(Debug, Clone, Copy)]
pub struct RouteContext<'a> {
    pub now: Instant,
    pub last_location: Option<&'a str>,
    pub emergency_duration: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouterEffect {
    Speak(String),
    Navigate(View),
    SetEmergency(bool),
}

/// Outcome of routing one utterance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub effects: Vec<RouterEffect>,
    pub mode: Mode,
}

impl Decision {
    /// Whether the text was claimed by a command. Unclaimed text stays
    /// available to the active page (e.g. the guided dialog).
    pub fn consumed(&self) -> bool {
        !self.effects.is_empty()
    }
}

/// Decide the effects of `text` under `mode`. First matching category wins.
pub fn route(text: &str, mode: &Mode, ctx: &RouteContext<'_>) -> Decision {
    let lower = text.to_lowercase();
    let mut effects = Vec::new();
    let mut next = *mode;

    if contains_any(&lower, EMERGENCY_KEYWORDS) {
        if mode.emergency.active {
            // The first activation's expiry governs
            effects.push(RouterEffect::Speak(ALERT_REPEAT.to_string()));
        } else {
            next.emergency = EmergencyState { active: true, expires_at: Some(ctx.now + ctx.emergency_duration) };
            effects.push(RouterEffect::SetEmergency(true));
            effects.push(RouterEffect::Speak(alert_message(ctx.last_location)));
        }
    } else if contains_any(&lower, STOP_KEYWORDS) {
        if mode.emergency.active {
            next.emergency = EmergencyState::default();
            effects.push(RouterEffect::SetEmergency(false));
            effects.push(RouterEffect::Speak(EMERGENCY_CANCELLED.to_string()));
        } else {
            effects.push(RouterEffect::Speak(STOPPED.to_string()));
        }
        effects.push(RouterEffect::Navigate(View::Home));
    } else if let Some(dest) = DESTINATIONS.iter().find(|d| contains_any(&lower, d.keywords)) {
        effects.push(RouterEffect::Speak(dest.confirmation.to_string()));
        effects.push(RouterEffect::Navigate(dest.view));
    }

    Decision { effects, mode: next }
}

fn alert_message(last_location: Option<&str>) -> String {
    let location = match last_location {
        Some(place) => format!(" You are near the {}.", place),
        None => ALERT_NO_LOCATION.to_string(),
    };
    format!("{}{}{}", ALERT_PREFIX, location, ALERT_SUFFIX)
}

/// Result of [`CommandRouter::handle_text`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Routed {
    pub effects: Vec<RouterEffect>,
    pub timers: Vec<TimerCommand>,
    pub consumed: bool,
}

/// Owns the routing mode and the emergency expiry timer.
#[derive(Debug, Default)]
pub struct CommandRouter {
    mode: Mode,
    expiry: TimerSlot,
}

impl CommandRouter {
    pub fn mode(&self) -> &Mode {
        &self.mode
    }

    pub fn emergency_active(&self) -> bool {
        self.mode.emergency.active
    }

    /// Route `text` and apply the resulting mode, scheduling or clearing the expiry timer.
    pub fn handle_text(&mut self, text: &str, ctx: &RouteContext<'_>) -> Routed {
        let decision = route(text, &self.mode, ctx);
        let consumed = decision.consumed();
        let mut timers = Vec::new();

        for effect in &decision.effects {
            if let RouterEffect::SetEmergency(active) = effect {
                if *active {
                    info!("🚨 Emergency mode activated");
                    let token = self.expiry.arm();
                    timers.push(TimerCommand::Schedule {
                        kind: TimerKind::EmergencyExpiry,
                        token,
                        after: ctx.emergency_duration,
                    });
                } else {
                    info!("Emergency mode cancelled");
                    if self.expiry.cancel() {
                        timers.push(TimerCommand::Cancel(TimerKind::EmergencyExpiry));
                    }
                }
            }
        }

        self.mode = decision.mode;
        Routed { effects: decision.effects, timers, consumed }
    }

    /// Handle an expiry timer. Returns `true` if emergency mode ended.
    pub fn on_timer(&mut self, fired: TimerFired) -> bool {
        if fired.kind != TimerKind::EmergencyExpiry || !self.expiry.fire(fired.token) {
            return false;
        }
        if !self.mode.emergency.active {
            return false;
        }
        info!("Emergency mode expired");
        self.mode.emergency = EmergencyState::default();
        true
    }

    /// Leave emergency mode unconditionally (global stop).
    pub fn reset(&mut self) -> Vec<TimerCommand> {
        self.mode = Mode::default();
        if self.expiry.cancel() {
            debug!("Emergency expiry timer cleared");
            vec![TimerCommand::Cancel(TimerKind::EmergencyExpiry)]
        } else {
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(now: Instant) -> RouteContext<'static> {
        RouteContext { now, last_location: None, emergency_duration: Duration::from_secs(20) }
    }

    #[test]
    fn test_go_to_form() {
        let decision = route("go to form", &Mode::default(), &ctx(Instant::now()));
        assert_eq!(
            decision.effects,
            vec![RouterEffect::Speak("Opening Voice Form".into()), RouterEffect::Navigate(View::Form)]
        );
        assert!(decision.consumed());
        assert_eq!(decision.mode, Mode::default());
    }

    #[test]
    fn test_matching_is_case_insensitive_substring() {
        let decision = route("Could you please OPEN MAP for me", &Mode::default(), &ctx(Instant::now()));
        assert_eq!(decision.effects.last(), Some(&RouterEffect::Navigate(View::Waypoints)));
    }

    #[test]
    fn test_emergency_wins_over_stop() {
        let decision = route("help me stop", &Mode::default(), &ctx(Instant::now()));
        assert_eq!(decision.effects.first(), Some(&RouterEffect::SetEmergency(true)));
        assert!(decision.mode.emergency.active);
    }

    #[test]
    fn test_unmatched_text_is_not_consumed() {
        let decision = route("John Smith", &Mode::default(), &ctx(Instant::now()));
        assert!(decision.effects.is_empty());
        assert!(!decision.consumed());
    }

    #[test]
    fn test_alert_mentions_last_location() {
        let now = Instant::now();
        let context = RouteContext { last_location: Some("waypoint QR 02"), ..ctx(now) };
        let decision = route("medical alert", &Mode::default(), &context);
        let RouterEffect::Speak(alert) = &decision.effects[1] else { panic!("expected alert speech") };
        assert!(alert.contains("You are near the waypoint QR 02."));
        assert_eq!(decision.mode.emergency.expires_at, Some(now + Duration::from_secs(20)));

        let decision = route("emergency", &Mode::default(), &ctx(now));
        let RouterEffect::Speak(alert) = &decision.effects[1] else { panic!("expected alert speech") };
        assert!(alert.contains("Location tracking is active."));
    }

    #[test]
    fn test_help_then_stop_cancels_emergency() {
        let mut router = CommandRouter::default();
        let now = Instant::now();

        let routed = router.handle_text("help", &ctx(now));
        assert!(routed.effects.contains(&RouterEffect::SetEmergency(true)));
        assert!(matches!(routed.timers[..], [TimerCommand::Schedule { kind: TimerKind::EmergencyExpiry, .. }]));
        assert!(router.emergency_active());

        let routed = router.handle_text("stop", &ctx(now + Duration::from_secs(5)));
        assert_eq!(
            routed.effects,
            vec![
                RouterEffect::SetEmergency(false),
                RouterEffect::Speak("Emergency Alert Cancelled. Resetting to main menu.".into()),
                RouterEffect::Navigate(View::Home),
            ]
        );
        assert_eq!(routed.timers, vec![TimerCommand::Cancel(TimerKind::EmergencyExpiry)]);
        assert!(!router.emergency_active());
    }

    #[test]
    fn test_repeated_emergency_keeps_first_expiry() {
        let mut router = CommandRouter::default();
        let now = Instant::now();

        let first = router.handle_text("help", &ctx(now));
        let TimerCommand::Schedule { token, .. } = first.timers[0] else { panic!("expected schedule") };
        let expires_at = router.mode().emergency.expires_at;

        let again = router.handle_text("emergency!", &ctx(now + Duration::from_secs(10)));
        assert!(again.consumed);
        assert!(again.timers.is_empty(), "no new expiry scheduled");
        assert_eq!(router.mode().emergency.expires_at, expires_at);

        // The original timer still governs
        assert!(router.on_timer(TimerFired { kind: TimerKind::EmergencyExpiry, token }));
        assert!(!router.emergency_active());
    }

    #[test]
    fn test_cancelled_expiry_timer_is_ignored() {
        let mut router = CommandRouter::default();
        let now = Instant::now();

        let first = router.handle_text("help", &ctx(now));
        let TimerCommand::Schedule { token, .. } = first.timers[0] else { panic!("expected schedule") };
        router.handle_text("cancel", &ctx(now));
        router.handle_text("help", &ctx(now));

        // The stale token from the first activation must not end the second one
        assert!(!router.on_timer(TimerFired { kind: TimerKind::EmergencyExpiry, token }));
        assert!(router.emergency_active());
    }

    #[test]
    fn test_stop_when_idle_is_idempotent() {
        let mut router = CommandRouter::default();
        for _ in 0..3 {
            let routed = router.handle_text("stop", &ctx(Instant::now()));
            assert_eq!(
                routed.effects,
                vec![
                    RouterEffect::Speak("Stopping current action. Returning to main menu.".into()),
                    RouterEffect::Navigate(View::Home),
                ]
            );
            assert!(routed.timers.is_empty());
            assert_eq!(router.mode(), &Mode::default());
        }
    }
}
