//! Single-flight speech output.
//!
//! Starting an utterance cancels the one in flight. Every utterance ends with
//! a [`SpeechDone`] notification, bounded by a safety timeout so a silent
//! backend cannot leave the assistant marked as speaking.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::synthesizer::{Synthesizer, estimated_duration};
use crate::audio::{Player, decode_wav};

/// An utterance finished, was cut off or timed out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpeechDone {
    pub id: u64,
}

/// Timing knobs of the channel.
#[derive(Debug, Clone, Copy)]
pub struct SpeechTiming {
    /// Base bound on one utterance, extended by its estimated speaking time
    pub safety_timeout: Duration,
    /// Pause after playback before reporting completion (lets room echo decay)
    pub post_playback_delay: Duration,
}

/// The speech output channel.
pub struct SpeechChannel<E> {
    synthesizer: Option<Synthesizer>,
    player: Option<Arc<Player>>,
    timing: SpeechTiming,
    events: mpsc::Sender<E>,
    current: Option<CancellationToken>,
}

impl<E> SpeechChannel<E>
where
    E: From<SpeechDone> + Send + 'static,
{
    /// # Arguments
    /// * `synthesizer` - Remote synthesizer, `None` to only log utterances
    /// * `player` - Output device, `None` to only log utterances
    /// * `events` - Receives a [`SpeechDone`] per utterance
    pub fn new(synthesizer: Option<Synthesizer>, player: Option<Arc<Player>>, timing: SpeechTiming, events: mpsc::Sender<E>) -> Self {
        Self { synthesizer, player, timing, events, current: None }
    }

    /// Speak `text`, superseding whatever is being said.
    pub fn speak(&mut self, id: u64, text: String) {
        self.cancel();

        let token = CancellationToken::new();
        self.current = Some(token.clone());

        let synthesizer = self.synthesizer.clone();
        let player = self.player.clone();
        let timing = self.timing;
        let events = self.events.clone();
        let bound = timing.safety_timeout + estimated_duration(&text);

        tokio::spawn(async move {
            info!("🗣️  \"{}\"", text);

            let rendered = tokio::select! {
                _ = token.cancelled() => {
                    debug!("Utterance #{} cancelled", id);
                    false
                }
                outcome = tokio::time::timeout(bound, render(&text, synthesizer.as_ref(), player.clone())) => match outcome {
                    Ok(()) => true,
                    Err(_) => {
                        warn!("Utterance #{} exceeded {:?}, releasing speech channel", id, bound);
                        if let Some(ref player) = player {
                            player.interrupt();
                        }
                        false
                    }
                },
            };

            if rendered {
                tokio::select! {
                    _ = token.cancelled() => {}
                    _ = tokio::time::sleep(timing.post_playback_delay) => {}
                }
            }

            // Marks the utterance finished, so a later cancel leaves the player alone
            token.cancel();
            if events.send(E::from(SpeechDone { id })).await.is_err() {
                debug!("Event channel closed before utterance #{} completed", id);
            }
        });
    }

    /// Cut off the current utterance, if any.
    ///
    /// The player is only interrupted while an utterance is still running, so
    /// other sounds (the recording cue) are not cut short.
    pub fn cancel(&mut self) {
        if self.cut_in_flight()
            && let Some(ref player) = self.player
        {
            player.interrupt();
        }
    }

    /// Cancel the utterance in flight. Returns `false` when it already finished.
    fn cut_in_flight(&mut self) -> bool {
        match self.current.take() {
            Some(token) if !token.is_cancelled() => {
                token.cancel();
                true
            }
            _ => false,
        }
    }
}

/// Synthesize and play `text`. Failures are logged; the utterance just ends.
async fn render(text: &str, synthesizer: Option<&Synthesizer>, player: Option<Arc<Player>>) {
    let Some(synthesizer) = synthesizer else {
        return;
    };

    let wav = match synthesizer.synthesize(text).await {
        Ok(wav) if !wav.is_empty() => wav,
        Ok(_) => return,
        Err(e) => {
            error!("❌ TTS error: {}", e);
            return;
        }
    };

    let Some(player) = player else {
        debug!("No output device, dropping {} bytes of speech", wav.len());
        return;
    };

    let (samples, sample_rate) = match decode_wav(&wav) {
        Ok(decoded) => decoded,
        Err(e) => {
            error!("❌ TTS returned unplayable audio: {:#}", e);
            return;
        }
    };

    debug!("🔊 Playing {} samples at {} Hz", samples.len(), sample_rate);
    match tokio::task::spawn_blocking(move || player.play(&samples, sample_rate)).await {
        Ok(true) => {}
        Ok(false) => debug!("Playback cut short"),
        Err(e) => error!("Playback task failed: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use tokio::net::TcpListener;
    use tokio::time::Instant;

    use super::*;

    fn timing() -> SpeechTiming {
        SpeechTiming { safety_timeout: Duration::from_secs(5), post_playback_delay: Duration::from_millis(10) }
    }

    #[tokio::test]
    async fn test_log_only_utterance_completes() {
        let (tx, mut rx) = mpsc::channel::<SpeechDone>(4);
        let mut channel = SpeechChannel::new(None, None, timing(), tx);

        channel.speak(1, "Welcome.".into());
        assert_eq!(rx.recv().await, Some(SpeechDone { id: 1 }));
    }

    #[tokio::test]
    async fn test_every_utterance_reports_completion() {
        let (tx, mut rx) = mpsc::channel::<SpeechDone>(4);
        let mut channel = SpeechChannel::new(None, None, timing(), tx);

        channel.speak(1, "Opening Voice Form".into());
        channel.speak(2, "Opening Form. What is your full name?".into());

        let mut ids = vec![rx.recv().await.unwrap().id, rx.recv().await.unwrap().id];
        ids.sort_unstable();
        assert_eq!(ids, vec![1, 2]);
    }

    /// A speech endpoint that accepts connections and never answers.
    async fn unresponsive_synthesizer() -> (TcpListener, Synthesizer) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        let synthesizer = Synthesizer::new(&url, None, "tts-1", "alloy", Duration::from_secs(600)).unwrap();
        (listener, synthesizer)
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_backend_is_released_by_safety_timeout() {
        let (_listener, synthesizer) = unresponsive_synthesizer().await;
        let (tx, mut rx) = mpsc::channel::<SpeechDone>(4);
        let mut channel = SpeechChannel::new(Some(synthesizer), None, timing(), tx);

        let text = "Emergency Alert Activated. Assistance has been notified.";
        let bound = timing().safety_timeout + estimated_duration(text);
        let started = Instant::now();
        channel.speak(7, text.into());

        assert_eq!(rx.recv().await, Some(SpeechDone { id: 7 }));
        assert!(started.elapsed() >= bound, "released after {:?}, bound is {:?}", started.elapsed(), bound);
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_utterance_cancels_the_one_in_flight() {
        let (_listener, synthesizer) = unresponsive_synthesizer().await;
        let (tx, mut rx) = mpsc::channel::<SpeechDone>(4);
        let mut channel = SpeechChannel::new(Some(synthesizer), None, timing(), tx);

        channel.speak(1, "Opening Voice Form".into());
        let first = channel.current.clone().unwrap();
        let started = Instant::now();
        channel.speak(2, "Opening Form. What is your full name?".into());

        assert!(first.is_cancelled());
        assert!(!channel.current.as_ref().unwrap().is_cancelled());
        assert_eq!(rx.recv().await, Some(SpeechDone { id: 1 }));
        assert!(started.elapsed() < timing().safety_timeout);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_only_cuts_running_utterance() {
        let (_listener, synthesizer) = unresponsive_synthesizer().await;
        let (tx, mut rx) = mpsc::channel::<SpeechDone>(4);
        let mut channel = SpeechChannel::new(Some(synthesizer), None, timing(), tx.clone());

        channel.speak(1, "Still talking".into());
        assert!(channel.cut_in_flight());
        assert_eq!(rx.recv().await, Some(SpeechDone { id: 1 }));

        let mut channel = SpeechChannel::new(None, None, timing(), tx);
        channel.speak(2, "Welcome.".into());
        assert_eq!(rx.recv().await, Some(SpeechDone { id: 2 }));
        assert!(!channel.cut_in_flight());
    }
}
