//! Playback sink abstraction
//!
//! The scheduler acquires at most one [`PlaybackHandle`] at a time from a
//! [`PlaybackSink`]. The handle splits into a cloneable stop control (kept
//! by the scheduler so cancellation can release the resource synchronously)
//! and a completion signal (awaited by the turn's playback task).

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::oneshot;

use crate::session::Turn;
use crate::{Error, Result};

/// Source of audio playback handles
#[async_trait]
pub trait PlaybackSink: Send + Sync {
    /// Attempt to start rendering the turn's audio.
    ///
    /// Returns a handle whose completion signal fires when rendering ends.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Playback`] if the clip cannot be fetched, decoded,
    /// or started. The scheduler recovers via its duration fallback.
    async fn start(&self, turn: &Turn) -> Result<PlaybackHandle>;
}

/// Cloneable stop flag for an active playback handle
#[derive(Debug, Clone, Default)]
pub struct PlaybackControl {
    stopped: Arc<AtomicBool>,
}

impl PlaybackControl {
    /// Request that rendering stop as soon as possible
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    /// Whether a stop has been requested
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

/// The single live audio-rendering resource for the current turn
pub struct PlaybackHandle {
    control: PlaybackControl,
    finished: oneshot::Receiver<()>,
}

impl PlaybackHandle {
    /// Create a handle around an existing control, returning the sender the
    /// renderer must fire (or drop) when rendering ends.
    #[must_use]
    pub fn new(control: PlaybackControl) -> (Self, oneshot::Sender<()>) {
        let (tx, finished) = oneshot::channel();
        (Self { control, finished }, tx)
    }

    /// Split into the stop control and the completion signal
    #[must_use]
    pub fn split(self) -> (PlaybackControl, oneshot::Receiver<()>) {
        (self.control, self.finished)
    }
}

/// Sink used when audio output is disabled. Every start fails, so the
/// scheduler paces turns purely by their estimated durations.
pub struct SilentSink;

#[async_trait]
impl PlaybackSink for SilentSink {
    async fn start(&self, _turn: &Turn) -> Result<PlaybackHandle> {
        Err(Error::Playback("audio output disabled".to_string()))
    }
}
