//! Configuration for the chorus client
//!
//! Layered: built-in defaults, then a TOML config file
//! (`~/.config/chorus/config.toml`), then `CHORUS_*` environment
//! variables. CLI flags override on top in `main`. All file fields are
//! optional; the file is a partial overlay.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::Deserialize;

use crate::client::{ConversationMode, SubmissionContext};
use crate::voice::CAPTURE_SAMPLE_RATE;
use crate::{Error, Result};

/// Default conversation service base URL
pub const DEFAULT_SERVER_URL: &str = "http://localhost:8000";

/// Default number of turns requested per submission
pub const DEFAULT_TURN_COUNT: u32 = 3;

/// Client configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Conversation service base URL
    pub server_url: String,

    /// Display name the service attributes user messages to
    pub speaker_context: String,

    /// Conversation mode carried in submissions
    pub mode: ConversationMode,

    /// Number of turns requested per submission
    pub turn_count: u32,

    /// Whether to render audio (false paces turns by estimated duration)
    pub audio_enabled: bool,

    /// Capture sample rate in Hz
    pub capture_sample_rate: u32,

    /// Optional display names per speaker ID
    pub speaker_names: HashMap<String, String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.to_string(),
            speaker_context: "User".to_string(),
            mode: ConversationMode::Chat,
            turn_count: DEFAULT_TURN_COUNT,
            audio_enabled: true,
            capture_sample_rate: CAPTURE_SAMPLE_RATE,
            speaker_names: HashMap::new(),
        }
    }
}

impl Config {
    /// Load configuration from the default file location and environment.
    ///
    /// # Errors
    ///
    /// Returns error if the config file exists but cannot be parsed, or if
    /// an environment override has an invalid value.
    pub fn load() -> Result<Self> {
        let mut config = Self::default();
        if let Some(path) = Self::default_path() {
            if path.exists() {
                let raw = std::fs::read_to_string(&path)?;
                let file: ConfigFile = toml::from_str(&raw)?;
                config.apply_file(file);
                tracing::debug!(path = %path.display(), "loaded config file");
            }
        }
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Default config file path (`~/.config/chorus/config.toml` on Linux)
    #[must_use]
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("dev", "chorus", "chorus")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Overlay a parsed config file onto this configuration
    pub fn apply_file(&mut self, file: ConfigFile) {
        if let Some(url) = file.server.url {
            self.server_url = url;
        }
        if let Some(name) = file.conversation.name {
            self.speaker_context = name;
        }
        if let Some(mode) = file.conversation.mode {
            self.mode = mode;
        }
        if let Some(turns) = file.conversation.turns {
            self.turn_count = turns;
        }
        if let Some(enabled) = file.voice.enabled {
            self.audio_enabled = enabled;
        }
        if let Some(rate) = file.voice.capture_sample_rate {
            self.capture_sample_rate = rate;
        }
        if !file.speakers.is_empty() {
            self.speaker_names = file.speakers;
        }
    }

    /// Overlay environment variables, using the provided lookup (injected
    /// for testability).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if a variable has an invalid value.
    pub fn apply_env(&mut self, get: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(url) = get("CHORUS_SERVER_URL") {
            self.server_url = url;
        }
        if let Some(name) = get("CHORUS_NAME") {
            self.speaker_context = name;
        }
        if let Some(mode) = get("CHORUS_MODE") {
            self.mode = mode.parse()?;
        }
        if let Some(turns) = get("CHORUS_TURNS") {
            self.turn_count = turns
                .parse()
                .map_err(|_| Error::Config(format!("invalid CHORUS_TURNS: {turns}")))?;
        }
        if let Some(disabled) = get("CHORUS_DISABLE_AUDIO") {
            self.audio_enabled = !matches!(disabled.as_str(), "1" | "true" | "yes");
        }
        Ok(())
    }

    /// Submission context derived from this configuration
    #[must_use]
    pub fn submission_context(&self) -> SubmissionContext {
        SubmissionContext {
            speaker_context: self.speaker_context.clone(),
            mode: self.mode,
            turn_count: self.turn_count,
        }
    }

    /// Display label for a speaker, falling back to the numeric ID
    #[must_use]
    pub fn speaker_label(&self, speaker_id: u32) -> String {
        self.speaker_names
            .get(&speaker_id.to_string())
            .cloned()
            .unwrap_or_else(|| format!("speaker {speaker_id}"))
    }
}

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct ConfigFile {
    /// Conversation service connection
    #[serde(default)]
    pub server: ServerFileConfig,

    /// Submission defaults
    #[serde(default)]
    pub conversation: ConversationFileConfig,

    /// Audio configuration
    #[serde(default)]
    pub voice: VoiceFileConfig,

    /// Display names per speaker ID (table keys are IDs)
    #[serde(default)]
    pub speakers: HashMap<String, String>,
}

/// Server connection configuration
#[derive(Debug, Default, Deserialize)]
pub struct ServerFileConfig {
    /// Base URL of the conversation service
    pub url: Option<String>,
}

/// Conversation defaults
#[derive(Debug, Default, Deserialize)]
pub struct ConversationFileConfig {
    /// Display name for the local user
    pub name: Option<String>,

    /// `"chat"` or `"debug"`
    #[serde(default, deserialize_with = "deserialize_mode")]
    pub mode: Option<ConversationMode>,

    /// Turns per submission
    pub turns: Option<u32>,
}

/// Audio configuration
#[derive(Debug, Default, Deserialize)]
pub struct VoiceFileConfig {
    /// Enable audio playback
    pub enabled: Option<bool>,

    /// Capture sample rate in Hz
    pub capture_sample_rate: Option<u32>,
}

fn deserialize_mode<'de, D>(deserializer: D) -> std::result::Result<Option<ConversationMode>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    raw.map(|s| s.parse().map_err(serde::de::Error::custom))
        .transpose()
}
