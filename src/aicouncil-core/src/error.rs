//! Error types for the council system.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CouncilError {
    #[error("No active participants: activate at least one AI participant")]
    NoActiveParticipants,

    #[error("OpenAI API error: {0}")]
    OpenAIError(#[from] async_openai::error::OpenAIError),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("WAV error: {0}")]
    WavError(#[from] hound::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Unknown provider: {0}")]
    UnknownProvider(String),

    #[error("Missing credential for participant '{0}'")]
    MissingCredential(String),

    #[error("Responder error: {0}")]
    ResponderError(String),

    #[error("TTS error: {0}")]
    TtsError(String),

    #[error("Video error: {0}")]
    VideoError(String),

    #[error("Asset error: {0}")]
    AssetError(String),
}
