//! Live conversation sessions
//!
//! A session is a bidirectional channel to a remote conversational model:
//! realtime audio goes up, transcriptions and synthesized speech come back.
//! The bridge only sees the [`SessionConnector`] and [`ConversationSession`]
//! traits; [`live`] implements them over the Gemini Live websocket API.

pub mod live;
mod protocol;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::Result;
use crate::voice::MediaBlob;

pub use live::{DEFAULT_CONNECT_TIMEOUT, DEFAULT_ENDPOINT, LiveConnector, LiveSession};

/// Default model for live audio sessions
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash-native-audio-preview-12-2025";

/// Default prebuilt voice
pub const DEFAULT_VOICE: &str = "Kore";

/// Capacity of the inbound session event channel
pub const SESSION_EVENT_BUFFER: usize = 100;

/// Kind of content the model responds with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Modality {
    /// Synthesized speech
    Audio,
    /// Plain text
    Text,
}

/// Parameters for opening a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Model identifier, without the `models/` prefix
    pub model: String,

    /// Persona instruction sent once at setup
    pub system_instruction: String,

    /// Prebuilt voice used for responses
    pub voice_name: String,

    /// Requested response modalities
    pub response_modalities: Vec<Modality>,

    /// Request transcription of the user's audio
    pub input_transcription: bool,

    /// Request transcription of the model's audio
    pub output_transcription: bool,
}

impl SessionConfig {
    /// Audio-out session with both transcriptions enabled
    #[must_use]
    pub fn new(
        model: impl Into<String>,
        system_instruction: impl Into<String>,
        voice_name: impl Into<String>,
    ) -> Self {
        Self {
            model: model.into(),
            system_instruction: system_instruction.into(),
            voice_name: voice_name.into(),
            response_modalities: vec![Modality::Audio],
            input_transcription: true,
            output_transcription: true,
        }
    }
}

/// One inbound server message, reduced to the fields the bridge consumes
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerMessage {
    /// Transcription delta of the user's speech
    pub input_transcription: Option<String>,

    /// Transcription delta of the model's speech
    pub output_transcription: Option<String>,

    /// The model finished its turn
    pub turn_complete: bool,

    /// The model was interrupted by the user
    pub interrupted: bool,

    /// Base64 PCM audio from the first inline-data part
    pub audio: Option<String>,
}

/// Events delivered by an open session, in arrival order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Setup finished; realtime input may be sent
    Open,
    /// A server content message
    Message(ServerMessage),
    /// The session failed
    Error(String),
    /// The session ended normally
    Closed,
}

/// Handle to an open session
pub trait ConversationSession: Send {
    /// Queue realtime audio for sending; never blocks
    ///
    /// # Errors
    ///
    /// Returns `Error::Session` if the session is no longer running
    fn send_realtime_input(&self, blob: MediaBlob) -> Result<()>;

    /// Close the session; further events are not delivered
    fn close(&mut self);
}

/// Opens sessions
#[async_trait]
pub trait SessionConnector: Send + Sync {
    /// Open a session and deliver its events on `events`
    ///
    /// # Errors
    ///
    /// Returns `Error::Session` if the connection cannot be established
    async fn connect(
        &self,
        config: SessionConfig,
        events: mpsc::Sender<SessionEvent>,
    ) -> Result<Box<dyn ConversationSession>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_config_defaults() {
        let config = SessionConfig::new(DEFAULT_MODEL, "be brief", DEFAULT_VOICE);
        assert_eq!(config.response_modalities, vec![Modality::Audio]);
        assert!(config.input_transcription);
        assert!(config.output_transcription);
    }

    #[test]
    fn test_modality_serialization() {
        assert_eq!(serde_json::to_string(&Modality::Audio).unwrap(), "\"AUDIO\"");
        assert_eq!(serde_json::to_string(&Modality::Text).unwrap(), "\"TEXT\"");
    }
}
