//! Session orchestrator
//!
//! Thin boundary between the capture session, the conversation service,
//! and the playback scheduler. Each submission captures an epoch;
//! `cancel` and newer submissions bump it, so a response that arrives for
//! a superseded request never touches the scheduler.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::client::{ConversationClient, SubmissionContext};
use crate::session::{CaptureSession, Turn, TurnScheduler};
use crate::Result;

/// Outcome of a submission cycle
#[derive(Debug, Clone)]
pub struct SubmitOutcome {
    /// Number of turns handed to the scheduler
    pub turns: usize,
    /// Transcription of the captured audio, for audio submissions
    pub transcription: Option<String>,
    /// Whether the response was discarded because a cancel or newer
    /// submission happened while it was in flight
    pub superseded: bool,
}

/// Wires submissions into scheduler playback and capture into submissions
pub struct Orchestrator {
    client: ConversationClient,
    scheduler: TurnScheduler,
    capture: CaptureSession,
    context: SubmissionContext,
    epoch: AtomicU64,
    /// Serializes epoch transitions with their scheduler effect, so a
    /// cancel cannot slip between a submission's epoch check and the
    /// batch handed to the scheduler
    transition: Mutex<()>,
}

impl Orchestrator {
    /// Create an orchestrator over the given collaborators
    #[must_use]
    pub fn new(
        client: ConversationClient,
        scheduler: TurnScheduler,
        capture: CaptureSession,
        context: SubmissionContext,
    ) -> Self {
        Self {
            client,
            scheduler,
            capture,
            context,
            epoch: AtomicU64::new(0),
            transition: Mutex::new(()),
        }
    }

    /// The scheduler this orchestrator drives
    #[must_use]
    pub fn scheduler(&self) -> &TurnScheduler {
        &self.scheduler
    }

    /// Submit a text message; on success the resulting batch starts playing.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Submission`] on service failure; the scheduler is
    /// left idle so the user can resubmit.
    pub async fn submit_text(&self, message: &str) -> Result<SubmitOutcome> {
        let epoch = self.begin_submission();
        let turns = self.client.submit_text(message, &self.context).await;
        self.finish_submission(epoch, turns, None)
    }

    /// Ask one specific speaker to respond to the current history.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Submission`] on service failure.
    pub async fn trigger_speaker(&self, speaker_id: u32) -> Result<SubmitOutcome> {
        let epoch = self.begin_submission();
        let turns = self.client.single_turn(speaker_id, &self.context).await;
        self.finish_submission(epoch, turns, None)
    }

    /// Start recording a user utterance.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::PermissionDenied`] if device access is refused, or
    /// [`crate::Error::Capture`] if a recording is already in progress.
    pub async fn start_recording(&self) -> Result<()> {
        self.capture.start_recording().await
    }

    /// Whether a recording is in progress
    pub async fn is_recording(&self) -> bool {
        self.capture.is_recording().await
    }

    /// Finalize the recording and submit the packaged clip; on success the
    /// resulting batch starts playing.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::NoActiveSession`] if nothing is recording, or
    /// [`crate::Error::Submission`] on service failure.
    pub async fn stop_and_submit(&self) -> Result<SubmitOutcome> {
        let clip = self.capture.stop_recording().await?;
        let epoch = self.begin_submission();
        match self.client.submit_audio(&clip, &self.context).await {
            Ok((turns, transcription)) => {
                self.finish_submission(epoch, Ok(turns), Some(transcription))
            }
            Err(e) => self.finish_submission(epoch, Err(e), None),
        }
    }

    /// Cancel playback and invalidate any in-flight submission's effect on
    /// the scheduler.
    pub fn cancel(&self) {
        let _guard = self.transition_guard();
        self.epoch.fetch_add(1, Ordering::SeqCst);
        self.scheduler.cancel();
    }

    /// Clear the service's conversational memory and reset the scheduler.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Submission`] on service failure; local state is
    /// cleared regardless.
    pub async fn reset(&self) -> Result<()> {
        self.cancel();
        self.client.reset().await
    }

    /// Bump the epoch so older in-flight submissions are superseded, and
    /// mark the scheduler as loading.
    fn begin_submission(&self) -> u64 {
        let _guard = self.transition_guard();
        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        self.scheduler.begin_loading();
        epoch
    }

    fn finish_submission(
        &self,
        epoch: u64,
        turns: Result<Vec<Turn>>,
        transcription: Option<String>,
    ) -> Result<SubmitOutcome> {
        let _guard = self.transition_guard();
        if self.epoch.load(Ordering::SeqCst) != epoch {
            tracing::debug!("discarding superseded submission response");
            return Ok(SubmitOutcome {
                turns: 0,
                transcription,
                superseded: true,
            });
        }

        match turns {
            Ok(turns) => {
                let count = turns.len();
                self.scheduler.start(turns);
                Ok(SubmitOutcome {
                    turns: count,
                    transcription,
                    superseded: false,
                })
            }
            Err(e) => {
                // Leave the scheduler idle so the user can resubmit
                self.scheduler.cancel();
                Err(e)
            }
        }
    }

    fn transition_guard(&self) -> MutexGuard<'_, ()> {
        self.transition
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("epoch", &self.epoch.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

/// Convenience builder for the common wiring: client + scheduler + capture
/// behind one `Arc`.
///
/// # Errors
///
/// Returns [`crate::Error::Config`] if the server URL does not parse.
pub fn build(
    server_url: &str,
    scheduler: TurnScheduler,
    capture: CaptureSession,
    context: SubmissionContext,
) -> Result<Arc<Orchestrator>> {
    let client = ConversationClient::new(server_url)?;
    Ok(Arc::new(Orchestrator::new(
        client, scheduler, capture, context,
    )))
}
