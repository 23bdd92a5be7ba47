//! Conversation service client
//!
//! Submits user input (text or a captured clip) and receives an ordered
//! batch of turns in return. Audio locators in responses may be relative to
//! the service origin and are normalized to absolute URLs here, before the
//! scheduler ever sees them.

use serde::{Deserialize, Serialize};
use url::Url;

use crate::session::{AudioClip, MIN_TURN_DURATION_MS, Turn};
use crate::{Error, Result};

/// Conversation mode carried in submission payloads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationMode {
    /// User message joins the conversation history
    Chat,
    /// User message sets the topic directly
    Debug,
}

impl std::str::FromStr for ConversationMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "chat" => Ok(Self::Chat),
            "debug" => Ok(Self::Debug),
            other => Err(Error::Config(format!("unknown mode: {other}"))),
        }
    }
}

impl std::fmt::Display for ConversationMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Chat => write!(f, "chat"),
            Self::Debug => write!(f, "debug"),
        }
    }
}

/// Per-submission request context
#[derive(Debug, Clone)]
pub struct SubmissionContext {
    /// Display name the service attributes user messages to
    pub speaker_context: String,
    /// Conversation mode
    pub mode: ConversationMode,
    /// Number of turns requested per submission
    pub turn_count: u32,
}

/// One vitals snapshot, uploaded out of band of the conversation cycle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VitalsSnapshot {
    /// Seconds since the Unix epoch
    pub timestamp_s: f64,
    /// Heart rate, beats per minute
    pub heart_rate_bpm: f64,
    /// Breathing rate, breaths per minute
    pub breathing_rate_rpm: f64,
}

impl VitalsSnapshot {
    /// Snapshot stamped with the current time
    #[must_use]
    pub fn now(heart_rate_bpm: f64, breathing_rate_rpm: f64) -> Self {
        #[allow(clippy::cast_precision_loss)]
        let timestamp_s = chrono::Utc::now().timestamp_millis() as f64 / 1000.0;
        Self {
            timestamp_s,
            heart_rate_bpm,
            breathing_rate_rpm,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SpeakRequest<'a> {
    message: &'a str,
    speaker_context: &'a str,
    mode: ConversationMode,
    turn_count: u32,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SingleTurnRequest<'a> {
    speaker_id: u32,
    speaker_context: &'a str,
}

#[derive(Deserialize)]
struct SpeakResponse {
    speeches: Vec<Turn>,
}

#[derive(Deserialize)]
struct ListenResponse {
    speeches: Vec<Turn>,
    #[serde(default)]
    transcription: String,
}

/// Client for the conversation service
pub struct ConversationClient {
    http: reqwest::Client,
    base: Url,
}

impl ConversationClient {
    /// Create a client against the given service base URL.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the URL does not parse.
    pub fn new(base_url: &str) -> Result<Self> {
        let base = Url::parse(base_url)
            .map_err(|e| Error::Config(format!("invalid server url {base_url}: {e}")))?;
        Ok(Self {
            http: reqwest::Client::new(),
            base,
        })
    }

    /// Submit a text message and receive the resulting turn batch.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Submission`] on any transport or service failure.
    pub async fn submit_text(
        &self,
        message: &str,
        context: &SubmissionContext,
    ) -> Result<Vec<Turn>> {
        tracing::debug!(mode = %context.mode, turns = context.turn_count, "submitting message");
        let response: SpeakResponse = self
            .post_json(
                "speak",
                &SpeakRequest {
                    message,
                    speaker_context: &context.speaker_context,
                    mode: context.mode,
                    turn_count: context.turn_count,
                },
            )
            .await?;
        self.normalize(response.speeches)
    }

    /// Submit a captured audio clip; the service transcribes it and replies
    /// with a turn batch plus the transcription.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Submission`] on any transport or service failure.
    pub async fn submit_audio(
        &self,
        clip: &AudioClip,
        context: &SubmissionContext,
    ) -> Result<(Vec<Turn>, String)> {
        tracing::debug!(bytes = clip.data.len(), "submitting captured audio");
        let part = reqwest::multipart::Part::bytes(clip.data.clone())
            .file_name("utterance.wav")
            .mime_str(clip.content_type)
            .map_err(|e| Error::Submission(e.to_string()))?;
        let form = reqwest::multipart::Form::new()
            .part("audio", part)
            .text("speakerContext", context.speaker_context.clone())
            .text("mode", context.mode.to_string())
            .text("turnCount", context.turn_count.to_string());

        let response = self
            .http
            .post(self.endpoint("listen")?)
            .multipart(form)
            .send()
            .await
            .map_err(|e| Error::Submission(e.to_string()))?;
        let response: ListenResponse = Self::read_json(response).await?;
        let turns = self.normalize(response.speeches)?;
        Ok((turns, response.transcription))
    }

    /// Ask one specific speaker to respond to the current history.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Submission`] on any transport or service failure.
    pub async fn single_turn(
        &self,
        speaker_id: u32,
        context: &SubmissionContext,
    ) -> Result<Vec<Turn>> {
        tracing::debug!(speaker_id, "requesting single turn");
        let response: SpeakResponse = self
            .post_json(
                "single-turn",
                &SingleTurnRequest {
                    speaker_id,
                    speaker_context: &context.speaker_context,
                },
            )
            .await?;
        self.normalize(response.speeches)
    }

    /// Clear the service's conversational memory.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Submission`] on any transport or service failure.
    pub async fn reset(&self) -> Result<()> {
        let response = self
            .http
            .post(self.endpoint("reset")?)
            .send()
            .await
            .map_err(|e| Error::Submission(e.to_string()))?;
        if !response.status().is_success() {
            return Err(Error::Submission(format!(
                "reset failed with status {}",
                response.status()
            )));
        }
        tracing::info!("conversation history reset");
        Ok(())
    }

    /// Upload one vitals snapshot. Independent of the playback lifecycle.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Http`] on transport failure.
    pub async fn post_vitals(&self, snapshot: &VitalsSnapshot) -> Result<()> {
        self.http
            .post(self.endpoint("vitals")?)
            .json(snapshot)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn post_json<B: Serialize, R: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<R> {
        let response = self
            .http
            .post(self.endpoint(path)?)
            .json(body)
            .send()
            .await
            .map_err(|e| Error::Submission(e.to_string()))?;
        Self::read_json(response).await
    }

    async fn read_json<R: serde::de::DeserializeOwned>(response: reqwest::Response) -> Result<R> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "service error");
            return Err(Error::Submission(format!("service error {status}: {body}")));
        }
        response
            .json()
            .await
            .map_err(|e| Error::Submission(format!("malformed response: {e}")))
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base
            .join(path)
            .map_err(|e| Error::Config(format!("bad endpoint {path}: {e}")))
    }

    /// Normalize relative audio locators against the service origin and
    /// clamp durations to the positive floor the scheduler relies on.
    fn normalize(&self, mut turns: Vec<Turn>) -> Result<Vec<Turn>> {
        for turn in &mut turns {
            let absolute = self
                .base
                .join(&turn.audio_url)
                .map_err(|e| Error::Submission(format!("bad audio url {}: {e}", turn.audio_url)))?;
            turn.audio_url = absolute.to_string();
            if turn.duration_ms < MIN_TURN_DURATION_MS {
                turn.duration_ms = MIN_TURN_DURATION_MS;
            }
        }
        Ok(turns)
    }
}
