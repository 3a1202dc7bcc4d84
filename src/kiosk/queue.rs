//! Token queue board.

use std::sync::LazyLock;
use std::time::{Duration, Instant};

use regex::Regex;
use tracing::info;

/// First token served when the kiosk starts.
const FIRST_TOKEN: u32 = 100;
/// Minimum spacing between two "next token" commands.
const ADVANCE_DEBOUNCE: Duration = Duration::from_secs(2);

static TOKEN_NUMBER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(\d+)").expect("valid token regex"));

/// Currently served token and the token registered by the visitor.
#[derive(Debug, Clone)]
pub struct QueueBoard {
    current: u32,
    user: Option<u32>,
    last_advance: Option<Instant>,
}

impl Default for QueueBoard {
    fn default() -> Self {
        Self { current: FIRST_TOKEN, user: None, last_advance: None }
    }
}

impl QueueBoard {
    pub fn current(&self) -> u32 {
        self.current
    }

    pub fn user(&self) -> Option<u32> {
        self.user
    }

    /// Spoken when the queue view opens.
    pub fn announcement(&self) -> String {
        format!("Queue System Active. Current token is {}", self.current)
    }

    /// Handle an utterance while the queue view is active.
    ///
    /// # Returns
    /// What to say, or `None` when the text is not a queue command.
    pub fn on_text(&mut self, text: &str, now: Instant) -> Option<String> {
        let lower = text.to_lowercase();
        let mut changed = false;
        let mut parts = Vec::new();

        if lower.contains("my token is")
            && let Some(token) = TOKEN_NUMBER.captures(&lower).and_then(|c| c[1].parse::<u32>().ok())
        {
            info!("🎫 Visitor registered token {}", token);
            self.user = Some(token);
            parts.push(format!("Registered. Your token is {}. We will notify you.", token));
            changed = true;
        }

        if lower.contains("next token") {
            let due = self.last_advance.is_none_or(|at| now.saturating_duration_since(at) > ADVANCE_DEBOUNCE);
            if due {
                self.current += 1;
                self.last_advance = Some(now);
                info!("🎫 Now serving token {}", self.current);
                parts.push(format!("Token number {}.", self.current));
                changed = true;
            }
        }

        if changed && let Some(alert) = self.alert() {
            parts.push(alert);
        }

        (!parts.is_empty()).then(|| parts.join(" "))
    }

    fn alert(&self) -> Option<String> {
        let user = self.user?;
        if self.current == user {
            Some(format!("Attention please. Token number {}. It is your turn.", user))
        } else if self.current > user {
            Some(format!("Alert. Token {} has passed. You have missed your turn.", user))
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_token() {
        let mut board = QueueBoard::default();
        let said = board.on_text("My token is 102", Instant::now());
        assert_eq!(said.as_deref(), Some("Registered. Your token is 102. We will notify you."));
        assert_eq!(board.user(), Some(102));
    }

    #[test]
    fn test_registering_a_passed_token_alerts() {
        let mut board = QueueBoard::default();
        let said = board.on_text("my token is 99", Instant::now()).unwrap();
        assert!(said.ends_with("Alert. Token 99 has passed. You have missed your turn."));
    }

    #[test]
    fn test_next_token_until_turn() {
        let mut board = QueueBoard::default();
        let start = Instant::now();
        board.on_text("my token is 101", start);

        let said = board.on_text("next token", start + Duration::from_secs(3)).unwrap();
        assert_eq!(said, "Token number 101. Attention please. Token number 101. It is your turn.");

        let said = board.on_text("next token please", start + Duration::from_secs(6)).unwrap();
        assert_eq!(said, "Token number 102. Alert. Token 101 has passed. You have missed your turn.");
    }

    #[test]
    fn test_next_token_is_debounced() {
        let mut board = QueueBoard::default();
        let start = Instant::now();

        assert!(board.on_text("next token", start).is_some());
        assert!(board.on_text("next token", start + Duration::from_millis(1500)).is_none());
        assert_eq!(board.current(), 101);
        assert!(board.on_text("next token", start + Duration::from_millis(2500)).is_some());
        assert_eq!(board.current(), 102);
    }

    #[test]
    fn test_unrelated_text() {
        let mut board = QueueBoard::default();
        assert_eq!(board.on_text("my token is unknown", Instant::now()), None);
        assert_eq!(board.on_text("hello there", Instant::now()), None);
        assert_eq!(board.announcement(), "Queue System Active. Current token is 100");
    }
}
