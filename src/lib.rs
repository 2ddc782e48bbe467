//! Oracle - Realtime voice front-end for live conversational AI sessions
//!
//! This library provides the core functionality for Oracle:
//! - Microphone capture and scheduled speaker playback
//! - PCM transport encoding for live sessions
//! - The streaming audio bridge with barge-in and turn transcripts
//! - Persona and configuration management
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                 Presentation Shell                   │
//! │        toggle  │  status  │  turns  │  errors        │
//! └────────────────────┬────────────────────────────────┘
//!                      │ commands / updates
//! ┌────────────────────▼────────────────────────────────┐
//! │               Streaming Audio Bridge                 │
//! │  Capture  │  Codec  │  Playback Schedule  │  Turns   │
//! └────────────────────┬────────────────────────────────┘
//!                      │ realtime input / server events
//! ┌────────────────────▼────────────────────────────────┐
//! │              Live Session (websocket)                │
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod bridge;
pub mod config;
pub mod error;
pub mod persona;
pub mod session;
pub mod shell;
pub mod voice;

pub use bridge::{
    BridgeCommand, BridgeOptions, BridgeUpdate, ConversationalTurn, SessionStatus,
    StreamingAudioBridge,
};
pub use config::Config;
pub use error::{Error, Result};
pub use persona::Persona;
pub use session::{
    ConversationSession, LiveConnector, ServerMessage, SessionConfig, SessionConnector,
    SessionEvent,
};
