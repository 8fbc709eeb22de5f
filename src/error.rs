//! Error types for the negotiation channel

use thiserror::Error;

/// Result type alias for Parley operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the negotiation channel
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error (missing credential, bad config value)
    #[error("configuration error: {0}")]
    Config(String),

    /// Audio device missing or unusable
    #[error("device error: {0}")]
    Device(String),

    /// Microphone or speaker access denied
    #[error("permission denied: {0}")]
    Permission(String),

    /// Session failed to open or closed unexpectedly
    #[error("transport error: {0}")]
    Transport(String),

    /// Malformed inbound fragment
    #[error("decode error: {0}")]
    Decode(String),

    /// Audio processing error (resampling, WAV writing)
    #[error("audio error: {0}")]
    Audio(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl Error {
    /// Whether this error ends the live session
    ///
    /// Decode errors only drop one fragment; everything else requires a reconnect.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        !matches!(self, Self::Decode(_))
    }
}
