//! Runs the engine against real devices and services.
//!
//! One loop owns the [`Engine`] and feeds it events one at a time: sampling
//! ticks, timer expiries, speech completions and results of spawned work.
//! Commands the engine returns are executed here; anything slow (HTTP, audio
//! playback) is spawned and reports back through the event channel.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use super::state::{Command, Engine, EngineEvent};
use crate::audio::util::cue_tone;
use crate::audio::{AudioSegment, AudioTap, Capturer, Player};
use crate::config::AppConfig;
use crate::error::KioskError;
use crate::stt::Transcriber;
use crate::timer::Scheduler;
use crate::tts::{SpeechChannel, SpeechTiming, Synthesizer};
use crate::vision::{SignAnalyzer, SnapshotSource};

/// Depth of the engine event channel.
const EVENT_QUEUE_DEPTH: usize = 64;
/// The meter reads zero when the capture callback went quiet for this long.
const LEVEL_STALE_AFTER: Duration = Duration::from_millis(500);

/// Remote services used by spawned work.
struct Services {
    transcriber: Transcriber,
    analyzer: SignAnalyzer,
    snapshots: SnapshotSource,
}

/// Owns the engine, the devices and the event loop.
pub struct Runtime {
    engine: Engine,
    sample_rate: u32,
    tick_interval: Duration,
    tap: Arc<AudioTap>,
    capturer: Option<Capturer>,
    player: Option<Arc<Player>>,
    scheduler: Scheduler<EngineEvent>,
    speech: SpeechChannel<EngineEvent>,
    services: Arc<Services>,
    /// Encoded segments waiting for a transcription verdict
    segments: HashMap<u64, AudioSegment>,
    events_tx: mpsc::Sender<EngineEvent>,
    events_rx: mpsc::Receiver<EngineEvent>,
}

impl Runtime {
    /// # Arguments
    /// * `config` - Application configuration
    /// * `engine` - The engine to drive
    /// * `player` - Output device, `None` to run without audio output
    /// * `synthesizer` - Remote synthesizer, `None` to only log utterances
    ///
    /// # Errors
    /// Returns an error if an HTTP client cannot be built.
    pub fn new(config: &AppConfig, engine: Engine, player: Option<Arc<Player>>, synthesizer: Option<Synthesizer>) -> Result<Self> {
        let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE_DEPTH);

        let services = Services {
            transcriber: Transcriber::new(&config.api_url, config.request_timeout())?,
            analyzer: SignAnalyzer::new(&config.api_url, config.request_timeout())?,
            snapshots: SnapshotSource::new(config.snapshot_path.clone()),
        };

        let timing = SpeechTiming { safety_timeout: config.speech_timeout(), post_playback_delay: config.post_playback_delay() };

        Ok(Self {
            engine,
            sample_rate: config.sample_rate,
            tick_interval: config.tick_interval(),
            tap: AudioTap::new(config.sample_rate, LEVEL_STALE_AFTER),
            capturer: None,
            player: player.clone(),
            scheduler: Scheduler::new(events_tx.clone()),
            speech: SpeechChannel::new(synthesizer, player, timing, events_tx.clone()),
            services: Arc::new(services),
            segments: HashMap::new(),
            events_tx,
            events_rx,
        })
    }

    /// Sender for events produced outside the runtime (location scanner).
    pub fn events(&self) -> mpsc::Sender<EngineEvent> {
        self.events_tx.clone()
    }

    /// Start listening and process events until `shutdown` resolves, then stop globally.
    pub async fn run(&mut self, shutdown: impl Future<Output = ()>) {
        self.dispatch(EngineEvent::Start);

        let mut ticker = tokio::time::interval(self.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = ticker.tick() => {
                    let event = self.sample();
                    self.dispatch(event);
                }
                Some(event) = self.events_rx.recv() => self.dispatch(event),
            }
        }

        self.dispatch(EngineEvent::Stop);
        self.scheduler.cancel_all();
        self.speech.cancel();
        debug!("Engine stopped on {} ({})", self.engine.view(), self.engine.session().status);
    }

    /// Energy sample for this tick, or the fault the capture stream reported.
    fn sample(&self) -> EngineEvent {
        if let Some(fault) = self.capturer.as_ref().and_then(Capturer::take_fault) {
            return EngineEvent::CaptureFault(fault);
        }
        EngineEvent::Tick { energy: self.tap.level(Instant::now()) }
    }

    /// Feed an event to the engine, executing commands until nothing follows up synchronously.
    fn dispatch(&mut self, event: EngineEvent) {
        let mut queue = VecDeque::from([event]);
        while let Some(event) = queue.pop_front() {
            for command in self.engine.handle(event, Instant::now()) {
                if let Some(follow_up) = self.execute(command) {
                    queue.push_back(follow_up);
                }
            }
        }
    }

    fn execute(&mut self, command: Command) -> Option<EngineEvent> {
        match command {
            Command::AcquireCapture => return Some(self.open_capture()),
            Command::RestartCapture => {
                self.close_capture();
                return Some(self.open_capture());
            }
            Command::ReleaseCapture => self.close_capture(),
            Command::BeginRecording => {
                if self.capturer.is_none() {
                    return Some(EngineEvent::RecordingRejected("capture is not running".to_string()));
                }
                self.tap.begin();
            }
            Command::FinishRecording { seq } => return Some(self.finish_recording(seq)),
            Command::DiscardRecording => self.tap.discard(),
            Command::DropSegment { seq } => {
                self.segments.remove(&seq);
            }
            Command::PlayCue => self.play_cue(),
            Command::Transcribe { seq } => return self.transcribe(seq),
            Command::Timer(timer) => self.scheduler.apply(timer),
            Command::Speak { id, text } => self.speech.speak(id, text),
            Command::CancelSpeech => self.speech.cancel(),
            Command::Navigate(view) => debug!("Active view: {}", view),
            Command::AnalyzeSign { request } => self.analyze_sign(request),
            Command::SubmitForm(answers) => submit_form(&answers),
        }
        None
    }

    fn open_capture(&mut self) -> EngineEvent {
        self.tap.reset();
        let tap = self.tap.clone();

        let opened = Capturer::new(self.sample_rate, move |samples: &[f32]| tap.feed(samples)).and_then(|mut capturer| {
            capturer.start()?;
            Ok(capturer)
        });

        match opened {
            Ok(capturer) => {
                self.capturer = Some(capturer);
                EngineEvent::CaptureReady
            }
            Err(e) => EngineEvent::CaptureDenied(KioskError::Permission(format!("{:#}", e)).to_string()),
        }
    }

    fn close_capture(&mut self) {
        if let Some(mut capturer) = self.capturer.take() {
            capturer.shutdown();
        }
        self.tap.reset();
    }

    fn finish_recording(&mut self, seq: u64) -> EngineEvent {
        match self.tap.finish(seq) {
            Ok(segment) => {
                let bytes = segment.bytes.len();
                self.segments.insert(seq, segment);
                EngineEvent::SegmentCaptured { seq, bytes }
            }
            Err(e) => {
                error!("❌ Failed to encode segment #{}: {:#}", seq, e);
                EngineEvent::SegmentCaptured { seq, bytes: 0 }
            }
        }
    }

    fn transcribe(&mut self, seq: u64) -> Option<EngineEvent> {
        let Some(segment) = self.segments.remove(&seq) else {
            warn!("Segment #{} is gone, nothing to transcribe", seq);
            return Some(EngineEvent::Transcribed { seq, result: Err(KioskError::Capture("segment missing".to_string())) });
        };

        let services = self.services.clone();
        let events = self.events_tx.clone();
        tokio::spawn(async move {
            let result = services.transcriber.transcribe(&segment).await;
            if events.send(EngineEvent::Transcribed { seq, result }).await.is_err() {
                debug!("Event channel closed before segment #{} was transcribed", seq);
            }
        });
        None
    }

    fn play_cue(&self) {
        let Some(player) = self.player.clone() else {
            return;
        };
        let sample_rate = self.sample_rate;
        tokio::task::spawn_blocking(move || {
            player.play(&cue_tone(sample_rate), sample_rate);
        });
    }

    fn analyze_sign(&self, request: u64) {
        let services = self.services.clone();
        let events = self.events_tx.clone();
        tokio::spawn(async move {
            let result = match services.snapshots.capture().await {
                Ok(image) => services.analyzer.analyze(&image).await,
                Err(e) => Err(e),
            };
            if events.send(EngineEvent::AnalysisDone { request, result }).await.is_err() {
                debug!("Event channel closed before sign analysis #{} finished", request);
            }
        });
    }
}

fn submit_form(answers: &BTreeMap<String, String>) {
    match serde_json::to_string(answers) {
        Ok(json) => info!("📝 Form submitted: {}", json),
        Err(e) => error!("❌ Failed to serialize form answers: {}", e),
    }
}

/// Spawn the location scanner task.
///
/// Reads one location code per line from stdin, which is how keyboard-wedge
/// QR scanners deliver what they decode.
///
/// # Arguments
/// * `events` - Engine event channel
///
/// # Returns
/// Join handle for the spawned task
pub fn spawn_scanner_task(events: mpsc::Sender<EngineEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    let code = line.trim();
                    if code.is_empty() {
                        continue;
                    }
                    if events.send(EngineEvent::LocationScanned(code.to_string())).await.is_err() {
                        debug!("Event channel closed, scanner stopping");
                        break;
                    }
                }
                Ok(None) => {
                    debug!("Scanner input closed");
                    break;
                }
                Err(e) => {
                    warn!("Failed to read scanner input: {}", e);
                    break;
                }
            }
        }
    })
}
