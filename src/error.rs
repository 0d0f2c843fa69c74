//! Error types for Sotto

use thiserror::Error;

/// Result type alias for Sotto operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the dictation pipeline
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error (fatal at startup)
    #[error("configuration error: {0}")]
    Config(String),

    /// Audio capture/device error
    #[error("audio error: {0}")]
    Audio(String),

    /// Speech detector error
    #[error("speech detector error: {0}")]
    Detector(String),

    /// Wake word detection error
    #[error("wake word error: {0}")]
    WakeWord(String),

    /// Speech-to-text error
    #[error("STT error: {0}")]
    Stt(String),

    /// Transcription cache error
    #[error("cache error: {0}")]
    Cache(String),

    /// Downstream sink error
    #[error("sink error: {0}")]
    Sink(String),

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
}
