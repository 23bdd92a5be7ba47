//! Turn playback scheduler
//!
//! Owns an ordered batch of turns and a cursor. For the turn at the cursor
//! it acquires exactly one playback handle, races the handle's completion
//! signal against a fallback timer of the turn's estimated duration, and
//! advances when either fires. Every mutation is guarded by a monotonically
//! increasing generation number: `start`, `cancel`, and each advance bump
//! it, and a completion signal or timer firing for a stale generation is
//! ignored. This is what makes exactly one advance happen per turn even
//! when callbacks race.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::{mpsc, watch};

use crate::session::sink::{PlaybackControl, PlaybackSink};
use crate::session::{PlaybackEvent, PlaybackStatus, SessionSnapshot, SpokenLine, Turn};

/// Turn playback scheduler. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct TurnScheduler {
    inner: Arc<Inner>,
}

struct Inner {
    state: Mutex<SchedulerState>,
    sink: Arc<dyn PlaybackSink>,
    line_tx: watch::Sender<Option<SpokenLine>>,
    event_tx: mpsc::UnboundedSender<PlaybackEvent>,
}

struct SchedulerState {
    batch: Vec<Turn>,
    cursor: Option<usize>,
    status: PlaybackStatus,
    generation: u64,
    /// Stop control of the active handle, if one has been acquired
    control: Option<PlaybackControl>,
}

impl SchedulerState {
    /// Stop and drop the active handle's control, if any
    fn release_handle(&mut self) {
        if let Some(control) = self.control.take() {
            control.stop();
        }
    }
}

impl TurnScheduler {
    /// Create a scheduler over the given sink.
    ///
    /// Returns the scheduler and the receiver for its lifecycle events.
    #[must_use]
    pub fn new(sink: Arc<dyn PlaybackSink>) -> (Self, mpsc::UnboundedReceiver<PlaybackEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (line_tx, _) = watch::channel(None);
        let scheduler = Self {
            inner: Arc::new(Inner {
                state: Mutex::new(SchedulerState {
                    batch: Vec::new(),
                    cursor: None,
                    status: PlaybackStatus::Idle,
                    generation: 0,
                    control: None,
                }),
                sink,
                line_tx,
                event_tx,
            }),
        };
        (scheduler, event_rx)
    }

    /// Subscribe to the display surface: the text of the turn currently
    /// rendering, or `None` between sessions.
    #[must_use]
    pub fn subscribe_lines(&self) -> watch::Receiver<Option<SpokenLine>> {
        self.inner.line_tx.subscribe()
    }

    /// Snapshot the current session state
    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        let state = self.lock();
        SessionSnapshot {
            status: state.status,
            cursor: state.cursor,
            batch_len: state.batch.len(),
        }
    }

    /// Replace any existing session with a new batch and begin turn 0.
    ///
    /// An empty batch releases any active session and leaves the scheduler
    /// idle. Pending callbacks from a previous session are invalidated.
    pub fn start(&self, batch: Vec<Turn>) {
        let begin = {
            let mut state = self.lock();
            state.generation += 1;
            state.release_handle();

            if batch.is_empty() {
                tracing::debug!("empty batch, nothing to play");
                state.batch.clear();
                state.cursor = None;
                state.status = PlaybackStatus::Idle;
                let _ = self.inner.line_tx.send(None);
                None
            } else {
                tracing::info!(turns = batch.len(), "starting playback session");
                state.batch = batch;
                state.cursor = Some(0);
                state.status = PlaybackStatus::Playing;
                Some((state.generation, state.batch[0].clone(), 0))
            }
        };

        if let Some((generation, turn, index)) = begin {
            self.begin_turn(generation, turn, index);
        }
    }

    /// Mark a submission in flight. Releases any active session so stale
    /// playback cannot outlive the request that supersedes it.
    pub fn begin_loading(&self) {
        let mut state = self.lock();
        state.generation += 1;
        state.release_handle();
        state.batch.clear();
        state.cursor = None;
        state.status = PlaybackStatus::Loading;
        let _ = self.inner.line_tx.send(None);
    }

    /// Cancel the current session, releasing the active handle and clearing
    /// the displayed text. Idempotent: cancelling an idle scheduler is a
    /// logged no-op.
    pub fn cancel(&self) {
        let mut state = self.lock();
        state.generation += 1;
        state.release_handle();

        let was_playing = state.status == PlaybackStatus::Playing;
        if state.status == PlaybackStatus::Idle {
            tracing::debug!("cancel with no active session");
            return;
        }

        state.batch.clear();
        state.cursor = None;
        state.status = PlaybackStatus::Idle;
        let _ = self.inner.line_tx.send(None);
        if was_playing {
            tracing::info!("playback session cancelled");
            let _ = self.inner.event_tx.send(PlaybackEvent::Cancelled);
        }
    }

    /// Begin rendering the turn at `index`. Text is exposed immediately;
    /// audio start and the fallback timer each race to call `advance` with
    /// the generation captured here.
    fn begin_turn(&self, generation: u64, turn: Turn, index: usize) {
        {
            // A cancel or newer start may have slipped in since the caller
            // released the lock; publishing under the lock keeps the
            // display consistent with whoever won.
            let state = self.lock();
            if state.generation != generation || state.status != PlaybackStatus::Playing {
                tracing::trace!(index, generation, "turn superseded before it began");
                return;
            }
            let _ = self.inner.line_tx.send(Some(SpokenLine {
                speaker_id: turn.speaker_id,
                text: turn.text.clone(),
            }));
            let _ = self.inner.event_tx.send(PlaybackEvent::TurnStarted {
                index,
                speaker_id: turn.speaker_id,
            });
        }

        // Fallback timer: guarantees forward progress even when the clip
        // never starts or never signals completion.
        let fallback = self.clone();
        let duration = Duration::from_millis(turn.duration_ms);
        tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            fallback.advance(generation, "fallback timer");
        });

        let scheduler = self.clone();
        tokio::spawn(async move {
            match scheduler.inner.sink.start(&turn).await {
                Ok(handle) => {
                    let (control, finished) = handle.split();
                    {
                        let mut state = scheduler.lock();
                        if state.generation != generation {
                            // Session moved on while the clip was loading
                            control.stop();
                            return;
                        }
                        state.control = Some(control);
                    }
                    // Completion or renderer teardown both count as done
                    let _ = finished.await;
                    scheduler.advance(generation, "completion signal");
                }
                Err(e) => {
                    tracing::debug!(
                        index,
                        error = %e,
                        "audio start failed, pacing by estimated duration"
                    );
                }
            }
        });
    }

    /// Advance past the turn that `generation` belongs to. Stale calls
    /// (generation already bumped by a newer advance, cancel, or start) are
    /// ignored, which is what limits each turn to exactly one advance.
    fn advance(&self, generation: u64, source: &str) {
        let begin = {
            let mut state = self.lock();
            if state.status != PlaybackStatus::Playing || state.generation != generation {
                tracing::trace!(source, generation, "ignoring stale advance");
                return;
            }
            state.generation += 1;
            state.release_handle();

            let next = state.cursor.map_or(0, |c| c + 1);
            if next >= state.batch.len() {
                let played = state.batch.len();
                tracing::info!(turns = played, "playback session complete");
                state.batch.clear();
                state.cursor = None;
                state.status = PlaybackStatus::Ended;
                let _ = self.inner.line_tx.send(None);
                let _ = self
                    .inner
                    .event_tx
                    .send(PlaybackEvent::SessionEnded { turns_played: played });
                None
            } else {
                tracing::debug!(source, index = next, "advancing to next turn");
                state.cursor = Some(next);
                Some((state.generation, state.batch[next].clone(), next))
            }
        };

        if let Some((generation, turn, index)) = begin {
            self.begin_turn(generation, turn, index);
        }
    }

    fn lock(&self) -> MutexGuard<'_, SchedulerState> {
        // Lock poisoning only happens if a holder panicked; state is still
        // consistent because critical sections never panic mid-update.
        self.inner
            .state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}
