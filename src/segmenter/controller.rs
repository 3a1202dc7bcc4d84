//! Voice-activity segmentation state machine.
//!
//! `Idle → Starting → Listening → Recording → (finalize) → Listening`, with
//! `Error` reached when the capture device cannot be acquired. The controller
//! is a pure reducer: device work, cues, timers and transcription are emitted
//! as [`SegmenterEffect`]s and their outcomes come back as [`SegmenterEvent`]s.

use std::collections::BTreeSet;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use super::session::{Session, Status};
use crate::timer::{TimerCommand, TimerFired, TimerKind, TimerSlot};

/// Energy at or below this level counts as "no signal" for the watchdog.
const WATCHDOG_FLOOR: f32 = 0.5;

/// Numeric voice-activity policy.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmenterConfig {
    /// Energy (0-255 scale) above which a tick counts as speech
    pub speech_threshold: f32,
    /// Trailing silence that ends a recording
    pub silence_duration: Duration,
    /// Segments smaller than this are treated as noise
    pub min_segment_bytes: usize,
    /// Zero-energy span after which the capture is considered stalled
    pub watchdog_timeout: Duration,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            speech_threshold: 20.0,
            silence_duration: Duration::from_millis(1500),
            min_segment_bytes: 1000,
            watchdog_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Starting,
    Listening,
    Recording,
}

/// Inputs to the controller.
#[derive(Debug, Clone, PartialEq)]
pub enum SegmenterEvent {
    /// Explicit request to start listening
    Start,
    /// The capture device is running
    CaptureReady { now: Instant },
    /// The capture device could not be acquired
    CaptureDenied(String),
    /// The running capture reported an error
    CaptureFault(String),
    /// Sampling tick with the current energy level
    Tick { energy: f32, now: Instant },
    /// The recorder refused to start (device busy)
    RecordingRejected(String),
    /// A finished recording was encoded into `bytes` bytes
    SegmentCaptured { seq: u64, bytes: usize },
    /// The speech output channel started or stopped talking
    SpeakingChanged(bool),
    Timer(TimerFired),
    /// Explicit stop: release everything
    Stop,
}

/// Work requested by the controller.
#[derive(Debug, Clone, PartialEq)]
pub enum SegmenterEffect {
    AcquireCapture,
    RestartCapture,
    ReleaseCapture,
    BeginRecording,
    FinishRecording { seq: u64 },
    DiscardRecording,
    /// Short audible cue that recording started
    PlayCue,
    /// Send the captured segment to the transcription service
    Transcribe { seq: u64 },
    /// Throw the captured segment away (noise)
    DropSegment { seq: u64 },
    Speak(String),
    Timer(TimerCommand),
}

/// The segmentation controller.
#[derive(Debug)]
pub struct Segmenter {
    config: SegmenterConfig,
    session: Session,
    phase: Phase,
    silence: TimerSlot,
    restarting: bool,
    last_signal_at: Option<Instant>,
    next_seq: u64,
    last_dispatched: Option<u64>,
    outstanding: BTreeSet<u64>,
}

impl Segmenter {
    pub fn new(config: SegmenterConfig) -> Self {
        Self {
            config,
            session: Session::default(),
            phase: Phase::Idle,
            silence: TimerSlot::default(),
            restarting: false,
            last_signal_at: None,
            next_seq: 1,
            last_dispatched: None,
            outstanding: BTreeSet::new(),
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Process one event.
    pub fn handle(&mut self, event: SegmenterEvent) -> Vec<SegmenterEffect> {
        let mut effects = Vec::new();

        match event {
            SegmenterEvent::Start => self.on_start(&mut effects),
            SegmenterEvent::CaptureReady { now } => self.on_capture_ready(now),
            SegmenterEvent::CaptureDenied(reason) => self.on_capture_denied(&reason, &mut effects),
            SegmenterEvent::CaptureFault(reason) => self.on_capture_fault(&reason, &mut effects),
            SegmenterEvent::Tick { energy, now } => self.on_tick(energy, now, &mut effects),
            SegmenterEvent::RecordingRejected(reason) => self.on_recording_rejected(&reason, &mut effects),
            SegmenterEvent::SegmentCaptured { seq, bytes } => self.on_segment_captured(seq, bytes, &mut effects),
            SegmenterEvent::SpeakingChanged(speaking) => self.session.system_speaking = speaking,
            SegmenterEvent::Timer(fired) => self.on_timer(fired, &mut effects),
            SegmenterEvent::Stop => self.on_stop(&mut effects),
        }

        self.refresh_status();
        effects
    }

    /// Validate a transcription response against the last dispatched segment.
    ///
    /// Returns `true` when `seq` is the most recently dispatched segment; any
    /// other sequence number is stale and its text must be discarded.
    pub fn settle_transcription(&mut self, seq: u64) -> bool {
        self.outstanding.remove(&seq);
        self.refresh_status();

        let current = self.last_dispatched == Some(seq);
        if !current {
            debug!("Discarding stale transcription for segment #{} (latest {:?})", seq, self.last_dispatched);
        }
        current
    }

    /// Surface a failed transcription through the status until the next recording.
    pub fn report_failure(&mut self, reason: &str) {
        self.session.last_error = Some(reason.to_string());
        self.refresh_status();
    }

    fn on_start(&mut self, effects: &mut Vec<SegmenterEffect>) {
        if self.phase != Phase::Idle {
            debug!("Start ignored, already {:?}", self.phase);
            return;
        }
        self.phase = Phase::Starting;
        self.restarting = false;
        self.session.listening = true;
        self.session.status = Status::Starting;
        effects.push(SegmenterEffect::AcquireCapture);
    }

    fn on_capture_ready(&mut self, now: Instant) {
        if self.phase != Phase::Starting {
            return;
        }
        if self.restarting {
            info!("🔁 Capture pipeline restarted");
        }
        self.phase = Phase::Listening;
        self.restarting = false;
        self.last_signal_at = Some(now);
    }

    fn on_capture_denied(&mut self, reason: &str, effects: &mut Vec<SegmenterEffect>) {
        if self.phase != Phase::Starting {
            return;
        }
        let message = if self.restarting {
            warn!("Capture restart failed: {}", reason);
            "The microphone stopped responding. Voice control is paused."
        } else {
            warn!("Capture unavailable: {}", reason);
            "Microphone access denied."
        };
        self.phase = Phase::Idle;
        self.restarting = false;
        self.session.listening = false;
        self.session.recording = false;
        self.session.status = Status::Error;
        effects.push(SegmenterEffect::Speak(message.to_string()));
    }

    fn on_capture_fault(&mut self, reason: &str, effects: &mut Vec<SegmenterEffect>) {
        if !matches!(self.phase, Phase::Listening | Phase::Recording) {
            return;
        }
        warn!("Capture failure, restarting: {}", reason);
        self.abort_recording(effects);
        self.begin_restart(effects);
    }

    fn on_tick(&mut self, energy: f32, now: Instant, effects: &mut Vec<SegmenterEffect>) {
        self.session.audio_level = energy;

        if !matches!(self.phase, Phase::Listening | Phase::Recording) {
            return;
        }

        if energy > WATCHDOG_FLOOR {
            self.last_signal_at = Some(now);
        }

        if energy > self.config.speech_threshold && !self.session.system_speaking {
            if self.phase == Phase::Listening {
                info!("🎤 Speech detected, recording...");
                self.phase = Phase::Recording;
                self.session.recording = true;
                self.session.last_error = None;
                effects.push(SegmenterEffect::BeginRecording);
                effects.push(SegmenterEffect::PlayCue);
            }

            let token = self.silence.arm();
            effects.push(SegmenterEffect::Timer(TimerCommand::Schedule {
                kind: TimerKind::Silence,
                token,
                after: self.config.silence_duration,
            }));
            return;
        }

        if self.phase == Phase::Listening
            && let Some(last) = self.last_signal_at
            && now.saturating_duration_since(last) >= self.config.watchdog_timeout
        {
            warn!("No audio signal for {:?}, restarting capture", now.saturating_duration_since(last));
            self.begin_restart(effects);
        }
    }

    fn on_recording_rejected(&mut self, reason: &str, effects: &mut Vec<SegmenterEffect>) {
        if self.phase != Phase::Recording {
            return;
        }
        debug!("Recorder refused to start ({}), will retry on next speech tick", reason);
        self.cancel_silence(effects);
        self.phase = Phase::Listening;
        self.session.recording = false;
    }

    fn on_timer(&mut self, fired: TimerFired, effects: &mut Vec<SegmenterEffect>) {
        if fired.kind != TimerKind::Silence || !self.silence.fire(fired.token) {
            return;
        }
        if self.phase != Phase::Recording {
            return;
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        info!("🤫 Silence detected, finalizing segment #{}", seq);

        self.phase = Phase::Listening;
        self.session.recording = false;
        self.outstanding.insert(seq);
        effects.push(SegmenterEffect::FinishRecording { seq });
    }

    fn on_segment_captured(&mut self, seq: u64, bytes: usize, effects: &mut Vec<SegmenterEffect>) {
        if bytes < self.config.min_segment_bytes {
            debug!("Segment #{} is {} bytes, discarding as noise", seq, bytes);
            self.outstanding.remove(&seq);
            effects.push(SegmenterEffect::DropSegment { seq });
            return;
        }
        if self.phase == Phase::Idle {
            // Captured after an explicit stop
            effects.push(SegmenterEffect::DropSegment { seq });
            return;
        }
        self.last_dispatched = Some(seq);
        effects.push(SegmenterEffect::Transcribe { seq });
    }

    fn on_stop(&mut self, effects: &mut Vec<SegmenterEffect>) {
        self.cancel_silence(effects);
        if self.session.recording {
            effects.push(SegmenterEffect::DiscardRecording);
        }
        if self.phase != Phase::Idle {
            effects.push(SegmenterEffect::ReleaseCapture);
        }

        self.phase = Phase::Idle;
        self.restarting = false;
        self.last_signal_at = None;
        self.last_dispatched = None;
        self.outstanding.clear();
        self.session = Session { system_speaking: self.session.system_speaking, ..Session::default() };
    }

    fn begin_restart(&mut self, effects: &mut Vec<SegmenterEffect>) {
        self.phase = Phase::Starting;
        self.restarting = true;
        self.last_signal_at = None;
        effects.push(SegmenterEffect::RestartCapture);
    }

    fn abort_recording(&mut self, effects: &mut Vec<SegmenterEffect>) {
        self.cancel_silence(effects);
        if self.session.recording {
            self.session.recording = false;
            effects.push(SegmenterEffect::DiscardRecording);
        }
    }

    fn cancel_silence(&mut self, effects: &mut Vec<SegmenterEffect>) {
        if self.silence.cancel() {
            effects.push(SegmenterEffect::Timer(TimerCommand::Cancel(TimerKind::Silence)));
        }
    }

    fn refresh_status(&mut self) {
        self.session.status = match self.phase {
            Phase::Idle => {
                if self.session.status == Status::Error {
                    Status::Error
                } else {
                    Status::Idle
                }
            }
            Phase::Starting => Status::Starting,
            Phase::Recording => Status::Recording,
            Phase::Listening if !self.outstanding.is_empty() => Status::Processing,
            Phase::Listening if self.session.last_error.is_some() => Status::Error,
            Phase::Listening => Status::Listening,
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timer::TimerToken;

    const FRAME: Duration = Duration::from_micros(16_667);

    /// Drives a segmenter against a virtual clock, firing timers when due.
    struct Harness {
        segmenter: Segmenter,
        now: Instant,
        timers: Vec<(TimerKind, TimerToken, Instant)>,
        log: Vec<SegmenterEffect>,
    }

    impl Harness {
        fn listening(config: SegmenterConfig) -> Self {
            let now = Instant::now();
            let mut harness = Self { segmenter: Segmenter::new(config), now, timers: Vec::new(), log: Vec::new() };
            harness.send(SegmenterEvent::Start);
            harness.send(SegmenterEvent::CaptureReady { now });
            harness
        }

        fn send(&mut self, event: SegmenterEvent) {
            let effects = self.segmenter.handle(event);
            for effect in effects {
                match &effect {
                    SegmenterEffect::Timer(TimerCommand::Schedule { kind, token, after }) => {
                        self.timers.retain(|(k, _, _)| k != kind);
                        self.timers.push((*kind, *token, self.now + *after));
                    }
                    SegmenterEffect::Timer(TimerCommand::Cancel(kind)) => self.timers.retain(|(k, _, _)| k != kind),
                    _ => {}
                }
                self.log.push(effect);
            }
        }

        fn advance(&mut self, by: Duration) {
            let target = self.now + by;
            while let Some(pos) = self.timers.iter().position(|(_, _, due)| *due <= target) {
                let (kind, token, due) = self.timers.remove(pos);
                self.now = due;
                self.send(SegmenterEvent::Timer(TimerFired { kind, token }));
            }
            self.now = target;
        }

        fn tick(&mut self, energy: f32) {
            self.advance(FRAME);
            let now = self.now;
            self.send(SegmenterEvent::Tick { energy, now });
        }

        fn finished(&self) -> Vec<u64> {
            self.log
                .iter()
                .filter_map(|e| match e {
                    SegmenterEffect::FinishRecording { seq } => Some(*seq),
                    _ => None,
                })
                .collect()
        }

        fn count(&self, wanted: &SegmenterEffect) -> usize {
            self.log.iter().filter(|e| *e == wanted).count()
        }
    }

    fn scenario_config() -> SegmenterConfig {
        SegmenterConfig { speech_threshold: 2.0, silence_duration: Duration::from_millis(1500), ..Default::default() }
    }

    #[test]
    fn test_energy_trace_yields_one_segment() {
        let mut h = Harness::listening(scenario_config());

        for energy in [0.0, 0.0, 0.0] {
            h.tick(energy);
            assert!(!h.segmenter.session().recording);
        }

        h.tick(15.0);
        assert!(h.segmenter.session().recording, "recording starts at the first sample above threshold");
        assert_eq!(h.segmenter.session().status, Status::Recording);
        assert_eq!(h.count(&SegmenterEffect::BeginRecording), 1);
        assert_eq!(h.count(&SegmenterEffect::PlayCue), 1);

        for energy in [18.0, 20.0, 19.0] {
            h.tick(energy);
        }
        assert_eq!(h.count(&SegmenterEffect::BeginRecording), 1);

        // 1600 ms of samples below the threshold
        for _ in 0..96 {
            h.tick(1.0);
        }

        assert!(!h.segmenter.session().recording);
        assert_eq!(h.finished(), vec![1]);
        assert_eq!(h.segmenter.session().status, Status::Processing);
    }

    #[test]
    fn test_one_segment_per_episode() {
        let mut h = Harness::listening(scenario_config());

        for _ in 0..3 {
            for _ in 0..10 {
                h.tick(30.0);
            }
            for _ in 0..100 {
                h.tick(1.0);
            }
        }

        assert_eq!(h.finished(), vec![1, 2, 3]);
    }

    #[test]
    fn test_short_pause_does_not_split_segment() {
        let mut h = Harness::listening(scenario_config());

        h.tick(30.0);
        for _ in 0..60 {
            h.tick(1.0); // 1 s pause, shorter than the silence window
        }
        h.tick(30.0);
        for _ in 0..100 {
            h.tick(1.0);
        }

        assert_eq!(h.finished(), vec![1]);
    }

    #[test]
    fn test_no_recording_while_system_speaks() {
        let mut h = Harness::listening(scenario_config());
        h.send(SegmenterEvent::SpeakingChanged(true));

        for _ in 0..200 {
            h.tick(120.0);
        }

        assert!(!h.segmenter.session().recording);
        assert_eq!(h.count(&SegmenterEffect::BeginRecording), 0);
        assert!(h.finished().is_empty());

        h.send(SegmenterEvent::SpeakingChanged(false));
        h.tick(120.0);
        assert!(h.segmenter.session().recording);
    }

    #[test]
    fn test_noise_segment_is_dropped() {
        let mut h = Harness::listening(scenario_config());
        h.tick(30.0);
        for _ in 0..100 {
            h.tick(1.0);
        }

        h.send(SegmenterEvent::SegmentCaptured { seq: 1, bytes: 400 });
        assert_eq!(h.log.last(), Some(&SegmenterEffect::DropSegment { seq: 1 }));
        assert_eq!(h.segmenter.session().status, Status::Listening);
        assert!(!h.segmenter.settle_transcription(1));
    }

    #[test]
    fn test_stale_transcription_is_rejected() {
        let mut h = Harness::listening(scenario_config());
        for _ in 0..2 {
            h.tick(30.0);
            for _ in 0..100 {
                h.tick(1.0);
            }
        }
        h.send(SegmenterEvent::SegmentCaptured { seq: 1, bytes: 5000 });
        h.send(SegmenterEvent::SegmentCaptured { seq: 2, bytes: 5000 });

        assert!(!h.segmenter.settle_transcription(1));
        assert_eq!(h.segmenter.session().status, Status::Processing);
        assert!(h.segmenter.settle_transcription(2));
        assert_eq!(h.segmenter.session().status, Status::Listening);
    }

    #[test]
    fn test_failed_transcription_shows_until_next_recording() {
        let mut h = Harness::listening(scenario_config());
        h.tick(30.0);
        for _ in 0..100 {
            h.tick(1.0);
        }
        h.send(SegmenterEvent::SegmentCaptured { seq: 1, bytes: 5000 });
        assert!(h.segmenter.settle_transcription(1));
        h.segmenter.report_failure("Transport error: connection refused");

        let session = h.segmenter.session();
        assert_eq!(session.status, Status::Error);
        assert_eq!(session.last_error.as_deref(), Some("Transport error: connection refused"));

        // Quiet ticks keep the failure visible, the next utterance clears it
        h.tick(1.0);
        assert_eq!(h.segmenter.session().status, Status::Error);
        h.tick(30.0);
        assert_eq!(h.segmenter.session().status, Status::Recording);
        assert_eq!(h.segmenter.session().last_error, None);
    }

    #[test]
    fn test_watchdog_restarts_stalled_capture() {
        let config = SegmenterConfig { watchdog_timeout: Duration::from_secs(10), ..scenario_config() };
        let mut h = Harness::listening(config);

        for _ in 0..(60 * 11) {
            h.tick(0.0);
        }

        assert_eq!(h.count(&SegmenterEffect::RestartCapture), 1);
        assert!(h.segmenter.session().listening, "listening survives the restart");
        assert_eq!(h.segmenter.session().status, Status::Starting);

        let now = h.now;
        h.send(SegmenterEvent::CaptureReady { now });
        assert_eq!(h.segmenter.session().status, Status::Listening);
        assert!(h.segmenter.session().listening);
    }

    #[test]
    fn test_background_noise_keeps_watchdog_quiet() {
        let mut h = Harness::listening(scenario_config());
        for _ in 0..(60 * 12) {
            h.tick(1.5);
        }
        assert_eq!(h.count(&SegmenterEffect::RestartCapture), 0);
    }

    #[test]
    fn test_permission_denied_stays_idle() {
        let mut segmenter = Segmenter::new(SegmenterConfig::default());
        assert_eq!(segmenter.handle(SegmenterEvent::Start), vec![SegmenterEffect::AcquireCapture]);

        let effects = segmenter.handle(SegmenterEvent::CaptureDenied("no input device".into()));
        assert_eq!(effects, vec![SegmenterEffect::Speak("Microphone access denied.".into())]);
        assert!(!segmenter.session().listening);
        assert_eq!(segmenter.session().status, Status::Error);

        // Ticks do nothing while idle
        let effects = segmenter.handle(SegmenterEvent::Tick { energy: 200.0, now: Instant::now() });
        assert!(effects.is_empty());
    }

    #[test]
    fn test_rejected_recording_retries_on_next_tick() {
        let mut h = Harness::listening(scenario_config());
        h.tick(30.0);
        h.send(SegmenterEvent::RecordingRejected("device busy".into()));
        assert!(!h.segmenter.session().recording);
        assert!(h.timers.is_empty(), "silence timer cancelled");

        h.tick(30.0);
        assert!(h.segmenter.session().recording);
        assert_eq!(h.count(&SegmenterEffect::BeginRecording), 2);
    }

    #[test]
    fn test_capture_fault_discards_recording_and_restarts() {
        let mut h = Harness::listening(scenario_config());
        h.tick(30.0);
        h.send(SegmenterEvent::CaptureFault("stream error".into()));

        assert_eq!(h.count(&SegmenterEffect::DiscardRecording), 1);
        assert_eq!(h.count(&SegmenterEffect::RestartCapture), 1);
        assert!(h.timers.is_empty());
        assert!(h.segmenter.session().listening);
    }

    #[test]
    fn test_stop_releases_everything() {
        let mut h = Harness::listening(scenario_config());
        h.tick(30.0);
        h.send(SegmenterEvent::Stop);

        assert!(h.timers.is_empty());
        assert_eq!(h.count(&SegmenterEffect::DiscardRecording), 1);
        assert_eq!(h.count(&SegmenterEffect::ReleaseCapture), 1);
        let session = h.segmenter.session();
        assert!(!session.listening && !session.recording);
        assert_eq!(session.status, Status::Idle);

        // Late silence timer or segment after stop produce nothing useful
        h.advance(Duration::from_secs(5));
        assert!(h.finished().is_empty());
    }
}
