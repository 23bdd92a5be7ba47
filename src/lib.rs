//! Chorus client - voice front end for multi-character conversations
//!
//! The client submits user input (typed text or a recorded utterance) to a
//! conversation service and plays back the ordered batch of spoken turns it
//! returns, one character at a time, keeping text display and audio
//! completion in step.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────┐
//! │                 chorus (CLI)                      │
//! │        chat loop │ say │ trigger │ reset          │
//! └───────────────────────┬──────────────────────────┘
//!                         │
//! ┌───────────────────────▼──────────────────────────┐
//! │                Orchestrator                       │
//! │  CaptureSession ──► ConversationClient ──► batch  │
//! │                                            │      │
//! │               TurnScheduler ◄──────────────┘      │
//! └───────────────────────┬──────────────────────────┘
//!                         │
//! ┌───────────────────────▼──────────────────────────┐
//! │          voice (cpal mic + speakers)              │
//! └──────────────────────────────────────────────────┘
//! ```
//!
//! The scheduler and capture session are plain state machines behind
//! trait-object seams ([`PlaybackSink`], [`session::CaptureDevice`]), so
//! all their concurrency properties are tested without audio hardware.

pub mod client;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod session;
pub mod voice;

pub use client::{ConversationClient, ConversationMode, SubmissionContext, VitalsSnapshot};
pub use config::Config;
pub use error::{Error, Result};
pub use orchestrator::{Orchestrator, SubmitOutcome};
pub use session::{
    AudioClip, CaptureSession, PlaybackEvent, PlaybackSink, PlaybackStatus, SessionSnapshot,
    SpokenLine, Turn, TurnScheduler,
};
