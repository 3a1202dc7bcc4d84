//! Cancelable one-shot timers.
//!
//! State machines never sleep. They arm a [`TimerSlot`], which hands out a fresh
//! [`TimerToken`], and emit a scheduling command. The [`Scheduler`] turns that
//! command into a tokio task that posts the token back when it elapses. A token
//! that no longer matches its slot (re-armed or cancelled meanwhile) is stale
//! and must be ignored by the owner.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{Notify, mpsc};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Every timer the engine can own. At most one of each kind is pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    /// Segmentation: trailing silence that ends a recording.
    Silence,
    /// Dialog: debounce window deciding an answer is complete.
    QuietPeriod,
    /// Router: automatic end of emergency mode.
    EmergencyExpiry,
    /// Dialog: delay between the completion message and returning home.
    FormHandoff,
}

/// Identity of one arming of a timer slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerToken(u64);

/// Owner-side bookkeeping for a single timer kind.
#[derive(Debug, Default, Clone)]
pub struct TimerSlot {
    generation: u64,
    armed: bool,
}

impl TimerSlot {
    /// Arm (or re-arm) the slot. Any previously issued token becomes stale.
    pub fn arm(&mut self) -> TimerToken {
        self.generation += 1;
        self.armed = true;
        TimerToken(self.generation)
    }

    /// Disarm the slot. Returns whether it was armed.
    pub fn cancel(&mut self) -> bool {
        std::mem::replace(&mut self.armed, false)
    }

    /// Consume a fired token. Returns `true` only for the live arming.
    pub fn fire(&mut self, token: TimerToken) -> bool {
        if self.armed && token.0 == self.generation {
            self.armed = false;
            true
        } else {
            false
        }
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }
}

/// Effect emitted by a state machine that owns timers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimerCommand {
    Schedule { kind: TimerKind, token: TimerToken, after: Duration },
    Cancel(TimerKind),
}

/// A timer elapsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerFired {
    pub kind: TimerKind,
    pub token: TimerToken,
}

/// Deadline and token of one running timer task, shared with the scheduler.
#[derive(Debug)]
struct Pending {
    deadline: Instant,
    token: TimerToken,
    fired: bool,
}

/// Handle on a running timer task.
struct Timer {
    cancel: CancellationToken,
    pending: Arc<Mutex<Pending>>,
    rearmed: Arc<Notify>,
}

impl Timer {
    /// Move the deadline of a timer that has not fired yet. Returns `false`
    /// once it has fired, in which case a new task is needed.
    fn rearm(&self, deadline: Instant, token: TimerToken) -> bool {
        let mut pending = self.pending.lock();
        if pending.fired {
            return false;
        }
        pending.deadline = deadline;
        pending.token = token;
        drop(pending);
        self.rearmed.notify_one();
        true
    }
}

/// Runs scheduled timers as tokio tasks and posts them back through a channel.
///
/// Re-scheduling a pending timer moves its deadline instead of replacing the
/// task, so a timer re-armed on every audio tick stays one sleeping task.
pub struct Scheduler<E> {
    timers: HashMap<TimerKind, Timer>,
    events: mpsc::Sender<E>,
}

impl<E> Scheduler<E>
where
    E: From<TimerFired> + Send + 'static,
{
    pub fn new(events: mpsc::Sender<E>) -> Self {
        Self { timers: HashMap::new(), events }
    }

    /// Apply a timer command.
    pub fn apply(&mut self, command: TimerCommand) {
        match command {
            TimerCommand::Schedule { kind, token, after } => self.schedule(kind, token, after),
            TimerCommand::Cancel(kind) => self.cancel(kind),
        }
    }

    fn schedule(&mut self, kind: TimerKind, token: TimerToken, after: Duration) {
        let deadline = Instant::now() + after;
        if self.timers.get(&kind).is_some_and(|timer| timer.rearm(deadline, token)) {
            return;
        }
        self.cancel(kind);

        let timer = Timer {
            cancel: CancellationToken::new(),
            pending: Arc::new(Mutex::new(Pending { deadline, token, fired: false })),
            rearmed: Arc::new(Notify::new()),
        };
        let cancel = timer.cancel.clone();
        let pending = timer.pending.clone();
        let rearmed = timer.rearmed.clone();
        self.timers.insert(kind, timer);

        let events = self.events.clone();
        tokio::spawn(async move {
            let sleep = tokio::time::sleep_until(deadline);
            tokio::pin!(sleep);

            let token = loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = rearmed.notified() => {
                        let deadline = pending.lock().deadline;
                        sleep.as_mut().reset(deadline);
                    }
                    _ = &mut sleep => {
                        let mut pending = pending.lock();
                        if Instant::now() < pending.deadline {
                            sleep.as_mut().reset(pending.deadline);
                            continue;
                        }
                        pending.fired = true;
                        break pending.token;
                    }
                }
            };

            if events.send(E::from(TimerFired { kind, token })).await.is_err() {
                debug!("Event channel closed before {:?} timer fired", kind);
            }
        });
    }

    fn cancel(&mut self, kind: TimerKind) {
        if let Some(timer) = self.timers.remove(&kind) {
            timer.cancel.cancel();
        }
    }

    /// Cancel every pending timer.
    pub fn cancel_all(&mut self) {
        for (_, timer) in self.timers.drain() {
            timer.cancel.cancel();
        }
    }
}
