//! Audio playback to speakers
//!
//! [`SpeakerSink`] fetches a turn's clip, decodes it (WAV or MP3), and
//! renders it on a dedicated thread. cpal streams are not `Send`, so the
//! stream lives entirely on that thread; setup results and completion come
//! back over oneshot channels.

use std::io::Cursor;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, Stream, StreamConfig};
use rubato::Resampler;
use tokio::sync::oneshot;

use crate::session::{PlaybackControl, PlaybackHandle, PlaybackSink, Turn};
use crate::{Error, Result};

/// Sample rate all clips are rendered at (matches common TTS output)
pub const PLAYBACK_SAMPLE_RATE: u32 = 24_000;

/// How often the render thread checks for completion or a stop request
const POLL_INTERVAL: std::time::Duration = std::time::Duration::from_millis(50);

/// Plays remote audio clips on the default output device
pub struct SpeakerSink {
    client: reqwest::Client,
}

impl SpeakerSink {
    /// Create a sink with its own HTTP client for clip fetches
    #[must_use]
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for SpeakerSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PlaybackSink for SpeakerSink {
    async fn start(&self, turn: &Turn) -> Result<PlaybackHandle> {
        let response = self
            .client
            .get(&turn.audio_url)
            .send()
            .await
            .map_err(|e| Error::Playback(format!("audio fetch failed: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::Playback(format!(
                "audio fetch {status} for {}",
                turn.audio_url
            )));
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|e| Error::Playback(format!("audio fetch failed: {e}")))?;

        let samples = decode_clip(&bytes).map_err(|e| Error::Playback(e.to_string()))?;
        tracing::debug!(
            url = %turn.audio_url,
            samples = samples.len(),
            "clip decoded, starting render"
        );

        let control = PlaybackControl::default();
        let (handle, done_tx) = PlaybackHandle::new(control.clone());
        let (setup_tx, setup_rx) = oneshot::channel();
        std::thread::spawn(move || render_blocking(samples, &control, setup_tx, done_tx));

        setup_rx
            .await
            .map_err(|_| Error::Playback("render thread exited during setup".to_string()))?
            .map_err(|e| Error::Playback(e.to_string()))?;
        Ok(handle)
    }
}

/// Play raw samples at the playback rate and wait for them to finish.
/// Used by the speaker test command.
///
/// # Errors
///
/// Returns error if the output device cannot be opened or started
pub async fn play_raw(samples: Vec<f32>) -> Result<()> {
    let control = PlaybackControl::default();
    let (handle, done_tx) = PlaybackHandle::new(control.clone());
    let (setup_tx, setup_rx) = oneshot::channel();
    std::thread::spawn(move || render_blocking(samples, &control, setup_tx, done_tx));

    setup_rx
        .await
        .map_err(|_| Error::Audio("render thread exited during setup".to_string()))??;
    let (_, finished) = handle.split();
    let _ = finished.await;
    Ok(())
}

/// Render samples on the calling thread, polling for completion or a stop
/// request. Reports setup success before entering the poll loop and fires
/// `done_tx` on exit.
fn render_blocking(
    samples: Vec<f32>,
    control: &PlaybackControl,
    setup_tx: oneshot::Sender<Result<()>>,
    done_tx: oneshot::Sender<()>,
) {
    if samples.is_empty() {
        let _ = setup_tx.send(Ok(()));
        let _ = done_tx.send(());
        return;
    }

    let sample_count = samples.len();
    let finished = Arc::new(AtomicBool::new(false));
    let stream = match build_output_stream(samples, Arc::clone(&finished)) {
        Ok(stream) => stream,
        Err(e) => {
            let _ = setup_tx.send(Err(e));
            return;
        }
    };
    if let Err(e) = stream.play() {
        let _ = setup_tx.send(Err(Error::Audio(e.to_string())));
        return;
    }
    let _ = setup_tx.send(Ok(()));

    // Cap the wait in case the device wedges without erroring
    let duration_ms = (sample_count as u64 * 1000) / u64::from(PLAYBACK_SAMPLE_RATE);
    let deadline = std::time::Instant::now() + std::time::Duration::from_millis(duration_ms + 500);

    while !finished.load(Ordering::SeqCst) && !control.is_stopped() {
        if std::time::Instant::now() > deadline {
            break;
        }
        std::thread::sleep(POLL_INTERVAL);
    }

    if finished.load(Ordering::SeqCst) {
        // Let the tail drain before tearing the stream down
        std::thread::sleep(std::time::Duration::from_millis(100));
    }

    drop(stream);
    let _ = done_tx.send(());
    tracing::debug!(samples = sample_count, "render finished");
}

/// Build a mono (or duplicated-stereo) output stream over the samples,
/// setting `finished` once the cursor passes the end.
fn build_output_stream(samples: Vec<f32>, finished: Arc<AtomicBool>) -> Result<Stream> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| Error::Audio("no output device available".to_string()))?;

    let supported_config = device
        .supported_output_configs()
        .map_err(|e| Error::Audio(e.to_string()))?
        .find(|c| {
            c.channels() == 1
                && c.min_sample_rate() <= SampleRate(PLAYBACK_SAMPLE_RATE)
                && c.max_sample_rate() >= SampleRate(PLAYBACK_SAMPLE_RATE)
        })
        .or_else(|| {
            // Fallback: try stereo
            device.supported_output_configs().ok()?.find(|c| {
                c.channels() == 2
                    && c.min_sample_rate() <= SampleRate(PLAYBACK_SAMPLE_RATE)
                    && c.max_sample_rate() >= SampleRate(PLAYBACK_SAMPLE_RATE)
            })
        })
        .ok_or_else(|| Error::Audio("no suitable output config found".to_string()))?;

    let config: StreamConfig = supported_config
        .with_sample_rate(SampleRate(PLAYBACK_SAMPLE_RATE))
        .config();
    let channels = config.channels as usize;
    let mut position = 0usize;

    let stream = device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                for frame in data.chunks_mut(channels) {
                    let sample = if position < samples.len() {
                        samples[position]
                    } else {
                        finished.store(true, Ordering::SeqCst);
                        0.0
                    };
                    for out in frame.iter_mut() {
                        *out = sample;
                    }
                    if position < samples.len() {
                        position += 1;
                    }
                }
            },
            |err| {
                tracing::error!(error = %err, "audio playback error");
            },
            None,
        )
        .map_err(|e| Error::Audio(e.to_string()))?;
    Ok(stream)
}

/// Decode WAV or MP3 bytes into mono f32 samples at the playback rate
fn decode_clip(data: &[u8]) -> Result<Vec<f32>> {
    let (samples, rate) = if data.len() >= 4 && &data[0..4] == b"RIFF" {
        decode_wav(data)?
    } else {
        decode_mp3(data)?
    };
    if rate == PLAYBACK_SAMPLE_RATE {
        Ok(samples)
    } else {
        resample(&samples, rate, PLAYBACK_SAMPLE_RATE)
    }
}

/// Decode WAV bytes to mono f32 samples, returning the source sample rate
fn decode_wav(data: &[u8]) -> Result<(Vec<f32>, u32)> {
    let mut reader =
        hound::WavReader::new(Cursor::new(data)).map_err(|e| Error::Audio(e.to_string()))?;
    let spec = reader.spec();

    let samples: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| Error::Audio(e.to_string()))?,
        hound::SampleFormat::Int => {
            #[allow(clippy::cast_precision_loss)]
            let scale = (1i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| {
                    #[allow(clippy::cast_precision_loss)]
                    s.map(|v| v as f32 / scale)
                })
                .collect::<std::result::Result<_, _>>()
                .map_err(|e| Error::Audio(e.to_string()))?
        }
    };

    Ok((downmix(&samples, spec.channels), spec.sample_rate))
}

/// Decode MP3 bytes to mono f32 samples, returning the source sample rate
fn decode_mp3(data: &[u8]) -> Result<(Vec<f32>, u32)> {
    let mut decoder = minimp3::Decoder::new(Cursor::new(data));
    let mut samples = Vec::new();
    let mut rate = None;

    loop {
        match decoder.next_frame() {
            Ok(frame) => {
                #[allow(clippy::cast_sign_loss)]
                let frame_rate = frame.sample_rate as u32;
                rate.get_or_insert(frame_rate);
                let frame_samples: Vec<f32> = frame
                    .data
                    .iter()
                    .map(|&s| f32::from(s) / 32768.0)
                    .collect();
                #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                samples.extend(downmix(&frame_samples, frame.channels as u16));
            }
            Err(minimp3::Error::Eof) => break,
            Err(e) => return Err(Error::Audio(format!("MP3 decode error: {e}"))),
        }
    }

    let rate = rate.ok_or_else(|| Error::Audio("empty MP3 clip".to_string()))?;
    Ok((samples, rate))
}

/// Average interleaved channels down to mono
fn downmix(samples: &[f32], channels: u16) -> Vec<f32> {
    if channels <= 1 {
        return samples.to_vec();
    }
    let channels = usize::from(channels);
    samples
        .chunks(channels)
        .map(|frame| {
            #[allow(clippy::cast_precision_loss)]
            let n = frame.len() as f32;
            frame.iter().sum::<f32>() / n
        })
        .collect()
}

/// Resample mono f32 samples between fixed rates
fn resample(input: &[f32], from: u32, to: u32) -> Result<Vec<f32>> {
    const CHUNK: usize = 1024;

    let mut resampler = rubato::FftFixedIn::<f32>::new(from as usize, to as usize, CHUNK, 2, 1)
        .map_err(|e| Error::Audio(format!("resampler init: {e}")))?;

    let expected = input.len() * to as usize / from as usize;
    let mut output = Vec::with_capacity(expected + CHUNK);
    let mut position = 0;
    while position < input.len() {
        let end = (position + CHUNK).min(input.len());
        let mut chunk = input[position..end].to_vec();
        chunk.resize(CHUNK, 0.0);
        let frames = resampler
            .process(&[chunk], None)
            .map_err(|e| Error::Audio(format!("resample: {e}")))?;
        output.extend_from_slice(&frames[0]);
        position = end;
    }
    Ok(output)
}
