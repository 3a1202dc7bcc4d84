//! Per-step phase machine of the guided dialog.
//!
//! `Prompting → AwaitingAnswer → Confirming → {Prompting (next step),
//! Prompting (retry), Submitted}`.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::matching::{Reply, classify, is_echo, spell_digits};
use crate::timer::{TimerCommand, TimerFired, TimerKind, TimerSlot};

/// Delay between the completion message and handing control back.
const HANDOFF_DELAY: Duration = Duration::from_secs(4);

const OPENING: &str = "Opening Form.";
const SAVED: &str = "Saved.";
const RETRY: &str = "Let's try again.";
const YES_OR_NO: &str = "Please say just Yes or No.";
const COMPLETED: &str = "Form completed. Submitting data. Thank you.";

/// One question of the dialog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DialogStep {
    /// Key the answer is stored under
    pub id: String,
    /// Question spoken to the user
    pub prompt: String,
    /// Read the answer back digit by digit (phone numbers, ids)
    #[serde(default)]
    pub spell_back: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Prompting,
    AwaitingAnswer,
    Confirming,
    Submitted,
}

/// Observable progress of the dialog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DialogState {
    pub step_index: usize,
    pub phase: Phase,
    pub pending_value: Option<String>,
    pub answers: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DialogEffect {
    Speak(String),
    Timer(TimerCommand),
    /// All answers confirmed, hand them to the caller
    Submit(BTreeMap<String, String>),
    /// Hand-off delay elapsed, the dialog is over
    Finished,
}

/// The guided dialog engine.
#[derive(Debug)]
pub struct Dialog {
    steps: Vec<DialogStep>,
    state: DialogState,
    quiet_period: Duration,
    /// Latest answer candidate heard while awaiting an answer
    heard: Option<String>,
    /// Spoken before the next prompt ("Saved.", "Let's try again.")
    preamble: Option<&'static str>,
    quiet: TimerSlot,
    handoff: TimerSlot,
}

impl Dialog {
    /// Create a dialog positioned on its first prompt. Call [`Dialog::issue_prompt`] to ask it.
    pub fn new(steps: Vec<DialogStep>, quiet_period: Duration) -> Self {
        Self {
            steps,
            state: DialogState { step_index: 0, phase: Phase::Prompting, pending_value: None, answers: BTreeMap::new() },
            quiet_period,
            heard: None,
            preamble: Some(OPENING),
            quiet: TimerSlot::default(),
            handoff: TimerSlot::default(),
        }
    }

    pub fn state(&self) -> &DialogState {
        &self.state
    }

    pub fn current_step(&self) -> Option<&DialogStep> {
        self.steps.get(self.state.step_index)
    }

    /// Speak the current question and start waiting for the answer.
    pub fn issue_prompt(&mut self) -> Vec<DialogEffect> {
        if self.state.phase != Phase::Prompting {
            return Vec::new();
        }
        let Some(step) = self.steps.get(self.state.step_index) else {
            return Vec::new();
        };

        let text = match self.preamble.take() {
            Some(preamble) => format!("{} {}", preamble, step.prompt),
            None => step.prompt.clone(),
        };
        self.state.phase = Phase::AwaitingAnswer;
        vec![DialogEffect::Speak(text)]
    }

    /// Feed one recognized utterance.
    pub fn on_text(&mut self, text: &str) -> Vec<DialogEffect> {
        let Some(step) = self.steps.get(self.state.step_index) else {
            return Vec::new();
        };

        if !matches!(self.state.phase, Phase::AwaitingAnswer | Phase::Confirming) {
            debug!("Dialog {:?}, ignoring \"{}\"", self.state.phase, text);
            return Vec::new();
        }
        if is_echo(text, &step.prompt) {
            debug!("Ignored potential echo: \"{}\"", text);
            return Vec::new();
        }

        match self.state.phase {
            Phase::AwaitingAnswer => self.hear_answer(text),
            Phase::Confirming => self.confirm(text),
            _ => Vec::new(),
        }
    }

    /// Handle a fired timer owned by the dialog.
    pub fn on_timer(&mut self, fired: TimerFired) -> Vec<DialogEffect> {
        match fired.kind {
            TimerKind::QuietPeriod if self.quiet.fire(fired.token) => self.finalize_answer(),
            TimerKind::FormHandoff if self.handoff.fire(fired.token) => vec![DialogEffect::Finished],
            _ => Vec::new(),
        }
    }

    /// Drop a half-heard answer without changing phase (emergency override).
    pub fn suspend(&mut self) -> Vec<DialogEffect> {
        self.heard = None;
        self.cancel_quiet().into_iter().collect()
    }

    /// Tear down: cancel every pending timer.
    pub fn cancel(&mut self) -> Vec<DialogEffect> {
        let mut effects: Vec<DialogEffect> = self.cancel_quiet().into_iter().collect();
        if self.handoff.cancel() {
            effects.push(DialogEffect::Timer(TimerCommand::Cancel(TimerKind::FormHandoff)));
        }
        effects
    }

    fn hear_answer(&mut self, text: &str) -> Vec<DialogEffect> {
        self.heard = Some(text.trim().to_string());
        let token = self.quiet.arm();
        vec![DialogEffect::Timer(TimerCommand::Schedule { kind: TimerKind::QuietPeriod, token, after: self.quiet_period })]
    }

    fn finalize_answer(&mut self) -> Vec<DialogEffect> {
        if self.state.phase != Phase::AwaitingAnswer {
            return Vec::new();
        }
        let Some(value) = self.heard.take() else {
            return Vec::new();
        };
        let Some(step) = self.steps.get(self.state.step_index) else {
            return Vec::new();
        };

        let spoken = if step.spell_back { spell_digits(&value) } else { value.clone() };
        debug!("Answer for '{}': \"{}\"", step.id, value);

        self.state.pending_value = Some(value);
        self.state.phase = Phase::Confirming;
        vec![DialogEffect::Speak(format!("You said {}. Is this correct? Say Yes or No.", spoken))]
    }

    fn confirm(&mut self, text: &str) -> Vec<DialogEffect> {
        match classify(text) {
            Reply::Affirmative => self.commit(),
            Reply::Negative => {
                debug!("Answer rejected, retrying step {}", self.state.step_index);
                self.state.pending_value = None;
                self.state.phase = Phase::Prompting;
                self.preamble = Some(RETRY);
                Vec::new()
            }
            Reply::Ambiguous => vec![DialogEffect::Speak(YES_OR_NO.to_string())],
        }
    }

    fn commit(&mut self) -> Vec<DialogEffect> {
        let Some(step) = self.steps.get(self.state.step_index) else {
            return Vec::new();
        };
        let value = self.state.pending_value.take().unwrap_or_default();
        self.state.answers.insert(step.id.clone(), value);

        if self.state.step_index + 1 >= self.steps.len() {
            info!("📝 Form completed ({} answers)", self.state.answers.len());
            self.state.phase = Phase::Submitted;
            let token = self.handoff.arm();
            return vec![
                DialogEffect::Speak(COMPLETED.to_string()),
                DialogEffect::Submit(self.state.answers.clone()),
                DialogEffect::Timer(TimerCommand::Schedule { kind: TimerKind::FormHandoff, token, after: HANDOFF_DELAY }),
            ];
        }

        self.state.step_index += 1;
        self.state.phase = Phase::Prompting;
        self.preamble = Some(SAVED);
        Vec::new()
    }

    fn cancel_quiet(&mut self) -> Option<DialogEffect> {
        self.quiet.cancel().then_some(DialogEffect::Timer(TimerCommand::Cancel(TimerKind::QuietPeriod)))
    }
}
