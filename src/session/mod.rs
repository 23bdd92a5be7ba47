//! Conversation session state machines
//!
//! The two machines with real concurrency concerns live here: the turn
//! playback scheduler ([`TurnScheduler`]) and the audio capture session
//! ([`CaptureSession`]). Hardware adapters are in [`crate::voice`].

pub mod capture;
pub mod scheduler;
pub mod sink;

use serde::{Deserialize, Serialize};

pub use capture::{ActiveCapture, AudioClip, CaptureDevice, CaptureSession, ClipFormat, RawClipFormat};
pub use scheduler::TurnScheduler;
pub use sink::{PlaybackControl, PlaybackHandle, PlaybackSink, SilentSink};

/// Floor applied to turn durations at the wire boundary. The service
/// estimates duration from word count with the same minimum.
pub const MIN_TURN_DURATION_MS: u64 = 2000;

/// One speaker's text + audio unit within a batch. Immutable once received.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Turn {
    /// Identifier of the character speaking this turn
    pub speaker_id: u32,

    /// Text to display while the turn plays
    pub text: String,

    /// Locator of the audio clip; absolute after client normalization
    pub audio_url: String,

    /// Estimated render time in milliseconds; paces the turn when its
    /// audio fails to play
    pub duration_ms: u64,
}

/// Playback session status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackStatus {
    /// No session active
    Idle,
    /// A batch has been accepted but turn 0 has not started
    Loading,
    /// A turn is currently rendering
    Playing,
    /// The batch ran to completion
    Ended,
}

/// Read-only view of the scheduler's state at one instant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSnapshot {
    /// Current status
    pub status: PlaybackStatus,
    /// Index of the turn at the cursor, if a session is in progress
    pub cursor: Option<usize>,
    /// Number of turns in the current batch
    pub batch_len: usize,
}

/// Text currently exposed to the display surface
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpokenLine {
    /// Speaker of the displayed turn
    pub speaker_id: u32,
    /// Displayed text
    pub text: String,
}

/// Lifecycle events emitted by the scheduler
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackEvent {
    /// A turn began rendering
    TurnStarted {
        /// Index of the turn within its batch
        index: usize,
        /// Speaker of the turn
        speaker_id: u32,
    },
    /// The batch ran to completion
    SessionEnded {
        /// Number of turns played
        turns_played: usize,
    },
    /// The session was cancelled before completion
    Cancelled,
}
