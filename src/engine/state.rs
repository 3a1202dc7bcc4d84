//! The engine reducer.
//!
//! Owns every state machine (segmenter, router, dialog, kiosk pages) and
//! turns one [`EngineEvent`] at a time into a list of [`Command`]s for the
//! runtime. Nothing here touches a device, the network or the clock.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::dialog::{Dialog, DialogEffect, DialogState, DialogStep, Phase};
use crate::error::{KioskError, KioskResult};
use crate::kiosk::{HOME_WELCOME, QueueBoard, SIGNS_ANNOUNCEMENT, SignAction, SignReader, WAYPOINTS_ANNOUNCEMENT, Waypoints};
use crate::router::{CommandRouter, RouteContext, RouterEffect, View};
use crate::segmenter::{Segmenter, SegmenterConfig, SegmenterEffect, SegmenterEvent, Session};
use crate::timer::{TimerCommand, TimerFired, TimerKind};
use crate::tts::SpeechDone;

const ASSISTANT_ACTIVE: &str = "Voice Assistant Active.";
const NOT_UNDERSTOOD: &str = "Sorry, I didn't catch that. Please try again.";

/// Everything that can happen to the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// Begin listening
    Start,
    /// Global stop
    Stop,
    /// Energy sample from the capture tap
    Tick { energy: f32 },
    CaptureReady,
    CaptureDenied(String),
    CaptureFault(String),
    RecordingRejected(String),
    SegmentCaptured { seq: u64, bytes: usize },
    Transcribed { seq: u64, result: KioskResult<String> },
    AnalysisDone { request: u64, result: KioskResult<String> },
    /// A location code was read by the scanner
    LocationScanned(String),
    Timer(TimerFired),
    SpeechDone(SpeechDone),
}

impl From<TimerFired> for EngineEvent {
    fn from(fired: TimerFired) -> Self {
        EngineEvent::Timer(fired)
    }
}

impl From<SpeechDone> for EngineEvent {
    fn from(done: SpeechDone) -> Self {
        EngineEvent::SpeechDone(done)
    }
}

/// Work for the runtime.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    AcquireCapture,
    RestartCapture,
    ReleaseCapture,
    BeginRecording,
    FinishRecording { seq: u64 },
    DiscardRecording,
    DropSegment { seq: u64 },
    PlayCue,
    Transcribe { seq: u64 },
    Timer(TimerCommand),
    /// Speak, superseding the current utterance
    Speak { id: u64, text: String },
    CancelSpeech,
    /// The active view changed
    Navigate(View),
    AnalyzeSign { request: u64 },
    SubmitForm(BTreeMap<String, String>),
}

/// Static engine settings.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub segmenter: SegmenterConfig,
    pub quiet_period: Duration,
    pub emergency_duration: Duration,
    pub steps: Vec<DialogStep>,
}

/// Utterance bookkeeping: which utterance, if any, is still playing.
#[derive(Debug, Default)]
struct SpeechState {
    next_id: u64,
    current: Option<u64>,
}

impl SpeechState {
    fn begin(&mut self) -> u64 {
        self.next_id += 1;
        self.current = Some(self.next_id);
        self.next_id
    }

    /// Returns `true` if `id` was the utterance in flight.
    fn finish(&mut self, id: u64) -> bool {
        if self.current == Some(id) {
            self.current = None;
            true
        } else {
            false
        }
    }
}

/// Commands collected while handling one event. Only the last utterance
/// survives; the single-flight channel would cut the earlier ones anyway.
#[derive(Debug, Default)]
struct Outbox {
    commands: Vec<Command>,
    utterance: Option<String>,
}

impl Outbox {
    fn say(&mut self, text: impl Into<String>) {
        let text = text.into();
        if let Some(ref superseded) = self.utterance {
            debug!("Superseding \"{}\"", superseded);
        }
        self.utterance = Some(text);
    }

    fn push(&mut self, command: Command) {
        self.commands.push(command);
    }
}

/// The kiosk engine.
#[derive(Debug)]
pub struct Engine {
    settings: EngineSettings,
    segmenter: Segmenter,
    router: CommandRouter,
    dialog: Option<Dialog>,
    view: View,
    queue: QueueBoard,
    signs: SignReader,
    waypoints: Waypoints,
    last_location: Option<String>,
    speech: SpeechState,
}

impl Engine {
    pub fn new(settings: EngineSettings) -> Self {
        Self {
            segmenter: Segmenter::new(settings.segmenter.clone()),
            settings,
            router: CommandRouter::default(),
            dialog: None,
            view: View::Home,
            queue: QueueBoard::default(),
            signs: SignReader::default(),
            waypoints: Waypoints::default(),
            last_location: None,
            speech: SpeechState::default(),
        }
    }

    pub fn session(&self) -> &Session {
        self.segmenter.session()
    }

    pub fn view(&self) -> View {
        self.view
    }

    pub fn dialog_state(&self) -> Option<&DialogState> {
        self.dialog.as_ref().map(Dialog::state)
    }

    pub fn emergency_active(&self) -> bool {
        self.router.emergency_active()
    }

    /// Process one event at `now`.
    pub fn handle(&mut self, event: EngineEvent, now: Instant) -> Vec<Command> {
        let mut out = Outbox::default();

        match event {
            EngineEvent::Start => self.on_start(&mut out),
            EngineEvent::Stop => self.on_stop(&mut out),
            EngineEvent::Tick { energy } => self.segment(SegmenterEvent::Tick { energy, now }, &mut out),
            EngineEvent::CaptureReady => self.segment(SegmenterEvent::CaptureReady { now }, &mut out),
            EngineEvent::CaptureDenied(reason) => self.segment(SegmenterEvent::CaptureDenied(reason), &mut out),
            EngineEvent::CaptureFault(reason) => self.segment(SegmenterEvent::CaptureFault(reason), &mut out),
            EngineEvent::RecordingRejected(reason) => self.segment(SegmenterEvent::RecordingRejected(reason), &mut out),
            EngineEvent::SegmentCaptured { seq, bytes } => self.segment(SegmenterEvent::SegmentCaptured { seq, bytes }, &mut out),
            EngineEvent::Transcribed { seq, result } => self.on_transcribed(seq, result, now, &mut out),
            EngineEvent::AnalysisDone { request, result } => {
                if let Some(message) = self.signs.on_result(request, result) {
                    out.say(message);
                }
            }
            EngineEvent::LocationScanned(code) => self.on_location(&code, &mut out),
            EngineEvent::Timer(fired) => self.on_timer(fired, &mut out),
            EngineEvent::SpeechDone(SpeechDone { id }) => {
                if self.speech.finish(id) {
                    self.segmenter.handle(SegmenterEvent::SpeakingChanged(false));
                }
            }
        }

        self.flush(out)
    }

    fn flush(&mut self, mut out: Outbox) -> Vec<Command> {
        if let Some(text) = out.utterance.take() {
            let id = self.speech.begin();
            self.segmenter.handle(SegmenterEvent::SpeakingChanged(true));
            out.push(Command::Speak { id, text });
        }
        out.commands
    }

    fn on_start(&mut self, out: &mut Outbox) {
        let effects = self.segmenter.handle(SegmenterEvent::Start);
        if effects.is_empty() {
            return;
        }
        info!("🎤 Voice control starting");
        self.apply_segmenter(effects, out);
        out.say(format!("{} {}", ASSISTANT_ACTIVE, HOME_WELCOME));
    }

    fn on_stop(&mut self, out: &mut Outbox) {
        info!("⏹️  Global stop");
        let effects = self.segmenter.handle(SegmenterEvent::Stop);
        self.apply_segmenter(effects, out);

        for timer in self.router.reset() {
            out.push(Command::Timer(timer));
        }
        if let Some(mut dialog) = self.dialog.take() {
            self.apply_dialog(dialog.cancel(), out);
        }
        self.signs.abandon();

        if self.view != View::Home {
            self.view = View::Home;
            out.push(Command::Navigate(View::Home));
        }

        self.speech.current = None;
        self.segmenter.handle(SegmenterEvent::SpeakingChanged(false));
        out.utterance = None;
        out.push(Command::CancelSpeech);
    }

    fn on_transcribed(&mut self, seq: u64, result: KioskResult<String>, now: Instant, out: &mut Outbox) {
        if !self.segmenter.settle_transcription(seq) {
            return;
        }
        match result {
            Ok(text) => self.on_text(&text, now, out),
            Err(KioskError::EmptyRecognition) => {
                debug!("Segment #{} produced no text", seq);
                out.say(NOT_UNDERSTOOD);
            }
            Err(e) => {
                warn!("Transcription of segment #{} failed: {}", seq, e);
                self.segmenter.report_failure(&e.to_string());
            }
        }
    }

    fn on_text(&mut self, text: &str, now: Instant, out: &mut Outbox) {
        info!("👤 Heard: \"{}\"", text);

        let ctx = RouteContext {
            now,
            last_location: self.last_location.as_deref(),
            emergency_duration: self.settings.emergency_duration,
        };
        let routed = self.router.handle_text(text, &ctx);

        for timer in routed.timers {
            out.push(Command::Timer(timer));
        }
        for effect in routed.effects {
            match effect {
                RouterEffect::Speak(message) => out.say(message),
                RouterEffect::Navigate(view) => self.navigate(view, true, out),
                RouterEffect::SetEmergency(true) => {
                    if let Some(ref mut dialog) = self.dialog {
                        let effects = dialog.suspend();
                        self.apply_dialog(effects, out);
                    }
                }
                RouterEffect::SetEmergency(false) => {}
            }
        }

        if routed.consumed {
            return;
        }
        if self.router.emergency_active() {
            debug!("Emergency active, ignoring \"{}\"", text);
            return;
        }

        match self.view {
            View::Form => {
                if let Some(ref mut dialog) = self.dialog {
                    let effects = dialog.on_text(text);
                    self.apply_dialog(effects, out);
                }
            }
            View::Queue => {
                if let Some(message) = self.queue.on_text(text, now) {
                    out.say(message);
                }
            }
            View::Signs => {
                for action in self.signs.on_text(text) {
                    match action {
                        SignAction::Speak(message) => out.say(message),
                        SignAction::Analyze { request } => out.push(Command::AnalyzeSign { request }),
                    }
                }
            }
            View::Home | View::Waypoints => debug!("No command in \"{}\"", text),
        }
    }

    fn on_location(&mut self, code: &str, out: &mut Outbox) {
        if self.view != View::Waypoints {
            debug!("Ignoring location code {} outside the map view", code);
            return;
        }
        if let Some(scan) = self.waypoints.on_scan(code) {
            if let Some(location) = scan.location {
                self.last_location = Some(location);
            }
            out.say(scan.message);
        }
    }

    fn on_timer(&mut self, fired: TimerFired, out: &mut Outbox) {
        match fired.kind {
            TimerKind::Silence => self.segment(SegmenterEvent::Timer(fired), out),
            TimerKind::EmergencyExpiry => {
                self.router.on_timer(fired);
            }
            TimerKind::QuietPeriod | TimerKind::FormHandoff => {
                if let Some(ref mut dialog) = self.dialog {
                    let effects = dialog.on_timer(fired);
                    self.apply_dialog(effects, out);
                }
            }
        }
    }

    /// Switch views. `by_command` is set when the router already spoke a confirmation.
    fn navigate(&mut self, view: View, by_command: bool, out: &mut Outbox) {
        if view == self.view {
            return;
        }

        match self.view {
            View::Form => {
                if let Some(mut dialog) = self.dialog.take() {
                    self.apply_dialog(dialog.cancel(), out);
                }
            }
            View::Signs => self.signs.abandon(),
            View::Home | View::Queue | View::Waypoints => {}
        }

        info!("🧭 Navigating to {}", view);
        self.view = view;
        out.push(Command::Navigate(view));

        match view {
            View::Home => {
                if !by_command {
                    out.say(HOME_WELCOME);
                }
            }
            View::Form => {
                let mut dialog = Dialog::new(self.settings.steps.clone(), self.settings.quiet_period);
                let effects = dialog.issue_prompt();
                self.dialog = Some(dialog);
                self.apply_dialog(effects, out);
            }
            View::Queue => out.say(self.queue.announcement()),
            View::Waypoints => {
                self.waypoints.reset();
                out.say(WAYPOINTS_ANNOUNCEMENT);
            }
            View::Signs => out.say(SIGNS_ANNOUNCEMENT),
        }
    }

    fn segment(&mut self, event: SegmenterEvent, out: &mut Outbox) {
        let effects = self.segmenter.handle(event);
        self.apply_segmenter(effects, out);
    }

    fn apply_segmenter(&mut self, effects: Vec<SegmenterEffect>, out: &mut Outbox) {
        for effect in effects {
            let command = match effect {
                SegmenterEffect::Speak(text) => {
                    out.say(text);
                    continue;
                }
                SegmenterEffect::Timer(timer) => Command::Timer(timer),
                SegmenterEffect::AcquireCapture => Command::AcquireCapture,
                SegmenterEffect::RestartCapture => Command::RestartCapture,
                SegmenterEffect::ReleaseCapture => Command::ReleaseCapture,
                SegmenterEffect::BeginRecording => Command::BeginRecording,
                SegmenterEffect::FinishRecording { seq } => Command::FinishRecording { seq },
                SegmenterEffect::DiscardRecording => Command::DiscardRecording,
                SegmenterEffect::PlayCue => Command::PlayCue,
                SegmenterEffect::Transcribe { seq } => Command::Transcribe { seq },
                SegmenterEffect::DropSegment { seq } => Command::DropSegment { seq },
            };
            out.push(command);
        }
    }

    fn apply_dialog(&mut self, effects: Vec<DialogEffect>, out: &mut Outbox) {
        let mut finished = false;
        for effect in effects {
            match effect {
                DialogEffect::Speak(text) => out.say(text),
                DialogEffect::Timer(timer) => out.push(Command::Timer(timer)),
                DialogEffect::Submit(answers) => out.push(Command::SubmitForm(answers)),
                DialogEffect::Finished => finished = true,
            }
        }

        if finished {
            self.dialog = None;
            self.navigate(View::Home, false, out);
            return;
        }

        // Committed or rejected answers leave the dialog on its next prompt
        if let Some(ref mut dialog) = self.dialog
            && dialog.state().phase == Phase::Prompting
        {
            let prompt = dialog.issue_prompt();
            for effect in prompt {
                if let DialogEffect::Speak(text) = effect {
                    out.say(text);
                }
            }
        }
    }
}
