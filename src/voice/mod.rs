//! Audio hardware adapters
//!
//! cpal-backed implementations of the session layer's sink and device
//! traits, plus PCM/WAV helpers. Everything here touches real devices;
//! the session machines are tested against mocks instead.

mod capture;
mod playback;

pub use capture::{CAPTURE_SAMPLE_RATE, MicDevice, WavClipFormat, pcm16_bytes};
pub use playback::{PLAYBACK_SAMPLE_RATE, SpeakerSink, play_raw};
