//! Audio capture session
//!
//! Owns at most one active recording device handle. `start_recording`
//! requests device access and begins buffering chunks in arrival order;
//! `stop_recording` signals the device to finalize, drains what was
//! buffered, and packages it into a single immutable clip.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

use crate::{Error, Result};

/// How long to wait for a device to flush after the finalize signal before
/// packaging whatever arrived. A wedged device must not strand the session.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// One packaged, immutable audio clip
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioClip {
    /// Encoded clip bytes
    pub data: Vec<u8>,
    /// MIME content type (fixed per capture session)
    pub content_type: &'static str,
}

/// A recording device that has been opened and is delivering chunks
pub struct ActiveCapture {
    /// Byte chunks in arrival order. The device must close this channel
    /// after it has flushed in response to the finalize signal (or after
    /// failing), so a drain loop terminates.
    pub chunks: mpsc::UnboundedReceiver<Vec<u8>>,
    /// Fired once to ask the device to flush remaining data and shut down
    pub finalize: oneshot::Sender<()>,
}

/// Source of recording device handles
#[async_trait]
pub trait CaptureDevice: Send + Sync {
    /// Request device access and begin delivering chunks.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PermissionDenied`] if access is refused or no
    /// device is available.
    async fn open(&self) -> Result<ActiveCapture>;
}

/// Turns a session's concatenated raw bytes into a packaged clip
pub trait ClipFormat: Send + Sync {
    /// MIME content type of packaged clips
    fn content_type(&self) -> &'static str;

    /// Package the concatenated raw bytes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Audio`] if encoding fails.
    fn package(&self, raw: Vec<u8>) -> Result<AudioClip>;
}

/// Passthrough format for devices that already emit a contiguous container
/// (chunks concatenate into a valid clip as-is)
pub struct RawClipFormat {
    /// Content type to tag clips with
    pub content_type: &'static str,
}

impl ClipFormat for RawClipFormat {
    fn content_type(&self) -> &'static str {
        self.content_type
    }

    fn package(&self, raw: Vec<u8>) -> Result<AudioClip> {
        Ok(AudioClip {
            data: raw,
            content_type: self.content_type,
        })
    }
}

enum CaptureState {
    Idle,
    Recording(ActiveCapture),
}

/// Records one user utterance into a single packaged clip
pub struct CaptureSession {
    device: Arc<dyn CaptureDevice>,
    format: Arc<dyn ClipFormat>,
    state: tokio::sync::Mutex<CaptureState>,
}

impl CaptureSession {
    /// Create a session over the given device and packaging format
    #[must_use]
    pub fn new(device: Arc<dyn CaptureDevice>, format: Arc<dyn ClipFormat>) -> Self {
        Self {
            device,
            format,
            state: tokio::sync::Mutex::new(CaptureState::Idle),
        }
    }

    /// Whether a recording is in progress
    pub async fn is_recording(&self) -> bool {
        matches!(*self.state.lock().await, CaptureState::Recording(_))
    }

    /// Request device access and begin buffering.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PermissionDenied`] if device access is refused
    /// (the session stays idle), or [`Error::Capture`] if a recording is
    /// already in progress.
    pub async fn start_recording(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if matches!(*state, CaptureState::Recording(_)) {
            return Err(Error::Capture("recording already in progress".to_string()));
        }

        let active = self.device.open().await?;
        *state = CaptureState::Recording(active);
        tracing::info!("recording started");
        Ok(())
    }

    /// Finalize the recording and return the packaged clip.
    ///
    /// The clip is delivered exactly once, even when the device failed to
    /// flush: whatever was buffered is still packaged.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoActiveSession`] if nothing is recording, or
    /// [`Error::Audio`] if packaging fails.
    pub async fn stop_recording(&self) -> Result<AudioClip> {
        let active = {
            let mut state = self.state.lock().await;
            match std::mem::replace(&mut *state, CaptureState::Idle) {
                CaptureState::Idle => return Err(Error::NoActiveSession),
                CaptureState::Recording(active) => active,
            }
        };

        let ActiveCapture { mut chunks, finalize } = active;
        if finalize.send(()).is_err() {
            tracing::warn!("capture device gone before finalize, packaging buffered audio");
        }

        let mut raw = Vec::new();
        let mut chunk_count = 0usize;
        let drain = async {
            while let Some(chunk) = chunks.recv().await {
                chunk_count += 1;
                raw.extend_from_slice(&chunk);
            }
        };
        if tokio::time::timeout(DRAIN_TIMEOUT, drain).await.is_err() {
            tracing::warn!("capture device did not flush in time, packaging buffered audio");
        }

        let clip = self.format.package(raw)?;
        tracing::info!(
            chunks = chunk_count,
            bytes = clip.data.len(),
            content_type = clip.content_type,
            "recording finalized"
        );
        Ok(clip)
    }
}
