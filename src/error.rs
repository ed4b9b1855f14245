//! Error types for Vesper

use thiserror::Error;

/// Result type alias for Vesper operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the Vesper runtime
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Audio processing error
    #[error("audio error: {0}")]
    Audio(String),

    /// Microphone or speaker unavailable; the capability stays disabled
    #[error("device unavailable: {0}")]
    Device(String),

    /// Speech-to-text error
    #[error("STT error: {0}")]
    Stt(String),

    /// Text-to-speech error
    #[error("TTS error: {0}")]
    Tts(String),

    /// Text generation error
    #[error("LLM error: {0}")]
    Llm(String),

    /// Scheduled event handler error
    #[error("handler error: {0}")]
    Handler(String),

    /// Subprocess or network call exceeded its deadline
    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// Speech sink worker has stopped
    #[error("speech sink closed")]
    SinkClosed,

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

    /// Database error
    #[error("database error: {0}")]
    Database(String),

    /// `SQLite` error
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

impl Error {
    /// Whether this error means the underlying device is gone for good
    #[must_use]
    pub const fn is_device_failure(&self) -> bool {
        matches!(self, Self::Device(_))
    }
}
