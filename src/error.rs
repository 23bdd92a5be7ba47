//! Error types for the chorus client

use thiserror::Error;

/// Result type alias for chorus operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the chorus client
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Recording device access was refused or the device is unavailable.
    /// Surfaced to the user for manual retry, never retried automatically.
    #[error("device access denied: {0}")]
    PermissionDenied(String),

    /// A submission to the conversation service failed. The scheduler is
    /// left untouched so the user can resubmit.
    #[error("submission failed: {0}")]
    Submission(String),

    /// An audio handle errored or never started. Recovered locally by the
    /// scheduler's duration fallback, not surfaced to the user.
    #[error("playback failed: {0}")]
    Playback(String),

    /// Stop or cancel was called with nothing active
    #[error("no active session")]
    NoActiveSession,

    /// Capture session error (other than device access)
    #[error("capture error: {0}")]
    Capture(String),

    /// Audio device or codec error
    #[error("audio error: {0}")]
    Audio(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),

    /// URL parsing error
    #[error("url error: {0}")]
    Url(#[from] url::ParseError),
}
