//! Shared test doubles for the session state machines
//!
//! No audio hardware involved: the sink is driven by a script, the capture
//! device by channels the test holds.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

use chorus_client::session::{
    ActiveCapture, CaptureDevice, PlaybackControl, PlaybackHandle, PlaybackSink, Turn,
};
use chorus_client::{Error, Result};

/// Behavior of one scripted `start` call
#[derive(Debug, Clone, Copy)]
pub enum PlayScript {
    /// Starting the clip fails
    Fail,
    /// Completes on its own after the given delay
    CompleteAfter(Duration),
    /// Never completes unless the test fires the pending sender
    Stall,
}

/// Playback sink driven by a script, recording every start
pub struct ScriptedSink {
    scripts: Mutex<VecDeque<PlayScript>>,
    started: Mutex<Vec<String>>,
    pending: Mutex<Vec<oneshot::Sender<()>>>,
    controls: Mutex<Vec<PlaybackControl>>,
}

impl ScriptedSink {
    pub fn new(scripts: impl IntoIterator<Item = PlayScript>) -> Arc<Self> {
        Arc::new(Self {
            scripts: Mutex::new(scripts.into_iter().collect()),
            started: Mutex::new(Vec::new()),
            pending: Mutex::new(Vec::new()),
            controls: Mutex::new(Vec::new()),
        })
    }

    /// URLs of every clip that was started, in order
    pub fn started_urls(&self) -> Vec<String> {
        self.started.lock().unwrap().clone()
    }

    /// Stop control of the `n`th started handle (fail/stall-free starts only)
    pub fn control(&self, n: usize) -> PlaybackControl {
        self.controls.lock().unwrap()[n].clone()
    }

    /// Fire the oldest stalled completion signal
    pub fn complete_next_stalled(&self) {
        let sender = self.pending.lock().unwrap().remove(0);
        let _ = sender.send(());
    }
}

#[async_trait]
impl PlaybackSink for ScriptedSink {
    async fn start(&self, turn: &Turn) -> Result<PlaybackHandle> {
        self.started.lock().unwrap().push(turn.audio_url.clone());
        let script = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(PlayScript::Stall);

        match script {
            PlayScript::Fail => Err(Error::Playback("scripted start failure".to_string())),
            PlayScript::CompleteAfter(delay) => {
                let control = PlaybackControl::default();
                self.controls.lock().unwrap().push(control.clone());
                let (handle, done) = PlaybackHandle::new(control);
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = done.send(());
                });
                Ok(handle)
            }
            PlayScript::Stall => {
                let control = PlaybackControl::default();
                self.controls.lock().unwrap().push(control.clone());
                let (handle, done) = PlaybackHandle::new(control);
                self.pending.lock().unwrap().push(done);
                Ok(handle)
            }
        }
    }
}

/// Build a turn with a distinct audio URL
pub fn turn(index: usize, speaker_id: u32, duration_ms: u64) -> Turn {
    Turn {
        speaker_id,
        text: format!("line {index}"),
        audio_url: format!("http://localhost:8000/static/audio/{index}.wav"),
        duration_ms,
    }
}

/// Let spawned tasks make progress
pub async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}

/// Capture device controlled by the test
pub struct MockDevice {
    /// Refuse device access
    pub deny: bool,
    /// Whether the device honors the finalize signal (a gone device drops
    /// its end immediately)
    pub honors_finalize: bool,
    /// Chunk flushed in response to finalize
    pub flush_chunk: Option<Vec<u8>>,
    taps: Mutex<Vec<mpsc::UnboundedSender<Vec<u8>>>>,
}

impl MockDevice {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            deny: false,
            honors_finalize: true,
            flush_chunk: None,
            taps: Mutex::new(Vec::new()),
        })
    }

    pub fn denying() -> Arc<Self> {
        Arc::new(Self {
            deny: true,
            honors_finalize: true,
            flush_chunk: None,
            taps: Mutex::new(Vec::new()),
        })
    }

    pub fn with_flush(chunk: Vec<u8>) -> Arc<Self> {
        Arc::new(Self {
            deny: false,
            honors_finalize: true,
            flush_chunk: Some(chunk),
            taps: Mutex::new(Vec::new()),
        })
    }

    pub fn gone_before_finalize() -> Arc<Self> {
        Arc::new(Self {
            deny: false,
            honors_finalize: false,
            flush_chunk: None,
            taps: Mutex::new(Vec::new()),
        })
    }

    /// Deliver one chunk to the most recently opened capture
    pub fn send_chunk(&self, data: Vec<u8>) {
        let taps = self.taps.lock().unwrap();
        taps.last()
            .expect("no capture opened")
            .send(data)
            .expect("capture closed");
    }

    /// Drop the test's chunk senders so the stream can close
    pub fn drop_taps(&self) {
        self.taps.lock().unwrap().clear();
    }
}

#[async_trait]
impl CaptureDevice for MockDevice {
    async fn open(&self) -> Result<ActiveCapture> {
        if self.deny {
            return Err(Error::PermissionDenied(
                "microphone access refused".to_string(),
            ));
        }

        let (tx, chunks) = mpsc::unbounded_channel();
        let (finalize, finalize_rx) = oneshot::channel();
        self.taps.lock().unwrap().push(tx.clone());

        let honors = self.honors_finalize;
        let flush = self.flush_chunk.clone();
        tokio::spawn(async move {
            if honors {
                let _ = finalize_rx.await;
                if let Some(chunk) = flush {
                    let _ = tx.send(chunk);
                }
            }
            drop(tx);
        });

        Ok(ActiveCapture { chunks, finalize })
    }
}
