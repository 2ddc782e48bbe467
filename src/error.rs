//! Error types for Oracle

use thiserror::Error;

/// Result type alias for Oracle operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in Oracle
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Capture device denied or unavailable
    #[error("permission error: {0}")]
    Permission(String),

    /// Remote session reported an error
    #[error("session error: {0}")]
    Session(String),

    /// Malformed transport text or audio payload
    #[error("decode error: {0}")]
    Decode(String),

    /// Start attempted while the focus precondition does not hold
    #[error("precondition error: {0}")]
    Precondition(String),

    /// Audio device or stream error
    #[error("audio error: {0}")]
    Audio(String),

    /// Persona error
    #[error("persona error: {0}")]
    Persona(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

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

impl Error {
    /// Single human-readable status line for the presentation shell
    #[must_use]
    pub const fn user_message(&self) -> &'static str {
        match self {
            Self::Permission(_) => {
                "Microphone access denied. Allow audio capture and try again."
            }
            Self::Session(_) => "Connection failed. Toggle to try again.",
            Self::Precondition(_) => "Oracle needs the session surface in focus to talk.",
            Self::Decode(_) => "Received audio that could not be decoded.",
            Self::Audio(_) => "Audio device error. Check your speakers and microphone.",
            Self::Config(_) | Self::Persona(_) | Self::Toml(_) | Self::Url(_) => {
                "Configuration problem. Check your API key and config file."
            }
            Self::Io(_) | Self::Serialization(_) => "Something went wrong. Toggle to try again.",
        }
    }

    /// Whether this error comes from the capture device
    #[must_use]
    pub const fn is_permission(&self) -> bool {
        matches!(self, Self::Permission(_))
    }
}
