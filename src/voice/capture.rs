//! Audio capture from microphone
//!
//! [`MicDevice`] adapts the default cpal input device to the session
//! layer's [`CaptureDevice`] contract: chunks of 16-bit little-endian PCM
//! flow over an unbounded channel, and the device thread tears the stream
//! down (closing the channel) when the finalize signal fires.

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, Stream, StreamConfig};
use tokio::sync::{mpsc, oneshot};

use crate::session::{ActiveCapture, AudioClip, CaptureDevice, ClipFormat};
use crate::{Error, Result};

/// Default sample rate for audio capture (16 kHz for speech)
pub const CAPTURE_SAMPLE_RATE: u32 = 16_000;

/// Default input device as a capture source
pub struct MicDevice {
    sample_rate: u32,
}

impl MicDevice {
    /// Create a device that captures at the given sample rate
    #[must_use]
    pub fn new(sample_rate: u32) -> Self {
        Self { sample_rate }
    }
}

impl Default for MicDevice {
    fn default() -> Self {
        Self::new(CAPTURE_SAMPLE_RATE)
    }
}

#[async_trait]
impl CaptureDevice for MicDevice {
    async fn open(&self) -> Result<ActiveCapture> {
        let (chunk_tx, chunks) = mpsc::unbounded_channel();
        let (finalize, finalize_rx) = oneshot::channel();
        let (setup_tx, setup_rx) = oneshot::channel();

        let sample_rate = self.sample_rate;
        std::thread::spawn(move || run_input_thread(sample_rate, chunk_tx, finalize_rx, setup_tx));

        setup_rx
            .await
            .map_err(|_| Error::PermissionDenied("capture thread exited".to_string()))??;
        Ok(ActiveCapture { chunks, finalize })
    }
}

/// Own the cpal stream for the lifetime of one recording. Blocks until the
/// finalize signal fires (or the session is dropped), then tears the
/// stream down, which closes the chunk channel.
fn run_input_thread(
    sample_rate: u32,
    chunk_tx: mpsc::UnboundedSender<Vec<u8>>,
    finalize_rx: oneshot::Receiver<()>,
    setup_tx: oneshot::Sender<Result<()>>,
) {
    match open_input_stream(sample_rate, chunk_tx) {
        Ok(stream) => {
            let _ = setup_tx.send(Ok(()));
            let _ = finalize_rx.blocking_recv();
            drop(stream);
            tracing::debug!("capture stream closed");
        }
        Err(e) => {
            let _ = setup_tx.send(Err(e));
        }
    }
}

fn open_input_stream(
    sample_rate: u32,
    chunk_tx: mpsc::UnboundedSender<Vec<u8>>,
) -> Result<Stream> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or_else(|| Error::PermissionDenied("no input device available".to_string()))?;

    let supported_config = device
        .supported_input_configs()
        .map_err(|e| Error::PermissionDenied(e.to_string()))?
        .find(|c| {
            c.channels() == 1
                && c.min_sample_rate() <= SampleRate(sample_rate)
                && c.max_sample_rate() >= SampleRate(sample_rate)
        })
        .ok_or_else(|| Error::Audio("no suitable input config found".to_string()))?;

    let config: StreamConfig = supported_config
        .with_sample_rate(SampleRate(sample_rate))
        .config();

    tracing::debug!(
        device = device.name().unwrap_or_default(),
        sample_rate,
        channels = config.channels,
        "audio capture initialized"
    );

    let stream = device
        .build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                // Send failure means the session is gone; the stream is
                // about to be torn down anyway
                let _ = chunk_tx.send(pcm16_bytes(data));
            },
            |err| {
                tracing::error!(error = %err, "audio capture error");
            },
            None,
        )
        .map_err(|e| match e {
            cpal::BuildStreamError::DeviceNotAvailable => {
                Error::PermissionDenied("input device not available".to_string())
            }
            other => Error::Audio(other.to_string()),
        })?;

    stream.play().map_err(|e| Error::Audio(e.to_string()))?;
    Ok(stream)
}

/// Convert f32 samples to 16-bit little-endian PCM bytes
#[must_use]
pub fn pcm16_bytes(samples: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        #[allow(clippy::cast_possible_truncation)]
        let value = (sample * 32767.0).clamp(-32768.0, 32767.0) as i16;
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

/// Packages concatenated 16-bit PCM chunks into a WAV clip
pub struct WavClipFormat {
    /// Sample rate recorded in the WAV header
    pub sample_rate: u32,
}

impl ClipFormat for WavClipFormat {
    fn content_type(&self) -> &'static str {
        "audio/wav"
    }

    fn package(&self, raw: Vec<u8>) -> Result<AudioClip> {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: self.sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };

        let mut cursor = std::io::Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec)
                .map_err(|e| Error::Audio(e.to_string()))?;
            for pair in raw.chunks_exact(2) {
                let sample = i16::from_le_bytes([pair[0], pair[1]]);
                writer
                    .write_sample(sample)
                    .map_err(|e| Error::Audio(e.to_string()))?;
            }
            writer.finalize().map_err(|e| Error::Audio(e.to_string()))?;
        }

        Ok(AudioClip {
            data: cursor.into_inner(),
            content_type: self.content_type(),
        })
    }
}
