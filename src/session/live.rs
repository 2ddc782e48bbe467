//! Gemini Live websocket session
//!
//! The socket is owned by a spawned link task. The bridge side holds a
//! [`LiveSession`] that forwards outbound messages over an unbounded command
//! channel, so sending never blocks the event loop.

use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use secrecy::{ExposeSecret, SecretString};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use url::Url;

use super::protocol::{LiveServerMessage, RealtimeInputMessage, SetupMessage};
use super::{ConversationSession, ServerMessage, SessionConfig, SessionConnector, SessionEvent};
use crate::voice::MediaBlob;
use crate::{Error, Result};

/// Gemini Live bidirectional streaming endpoint
pub const DEFAULT_ENDPOINT: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

/// How long the websocket upgrade and setup may take
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Commands from the session handle to the link task
#[derive(Debug)]
enum LinkCommand {
    Send(String),
    Close,
}

/// What an inbound frame means for the session
#[derive(Debug, PartialEq, Eq)]
enum Inbound {
    Event(SessionEvent),
    Ended(SessionEvent),
    Ignore,
}

/// Opens Gemini Live sessions
pub struct LiveConnector {
    endpoint: String,
    api_key: SecretString,
    connect_timeout: Duration,
}

impl LiveConnector {
    /// Connector for the public endpoint
    #[must_use]
    pub fn new(api_key: SecretString) -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            api_key,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    /// Override the websocket endpoint
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Give up on connecting after `timeout`
    #[must_use]
    pub const fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    fn url(&self) -> Result<Url> {
        let mut url = Url::parse(&self.endpoint)?;
        url.query_pairs_mut()
            .append_pair("key", self.api_key.expose_secret());
        Ok(url)
    }
}

impl std::fmt::Debug for LiveConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveConnector")
            .field("endpoint", &self.endpoint)
            .field("connect_timeout", &self.connect_timeout)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl SessionConnector for LiveConnector {
    async fn connect(
        &self,
        config: SessionConfig,
        events: mpsc::Sender<SessionEvent>,
    ) -> Result<Box<dyn ConversationSession>> {
        let url = self.url()?;

        tracing::debug!(
            endpoint = %self.endpoint,
            model = %config.model,
            voice = %config.voice_name,
            "connecting live session"
        );

        let setup = serde_json::to_string(&SetupMessage::from(&config))?;
        let handshake = async {
            let (mut ws, _) = connect_async(url.as_str())
                .await
                .map_err(|e| Error::Session(format!("connect failed: {e}")))?;
            ws.send(Message::Text(setup.into()))
                .await
                .map_err(|e| Error::Session(format!("setup failed: {e}")))?;
            Ok::<_, Error>(ws)
        };

        let ws = tokio::time::timeout(self.connect_timeout, handshake)
            .await
            .map_err(|_| {
                Error::Session(format!(
                    "connect timed out after {}ms",
                    self.connect_timeout.as_millis()
                ))
            })??;

        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_link(ws, rx, events));

        Ok(Box::new(LiveSession { commands: tx }))
    }
}

/// Handle to a running live session
#[derive(Debug)]
pub struct LiveSession {
    commands: mpsc::UnboundedSender<LinkCommand>,
}

impl ConversationSession for LiveSession {
    fn send_realtime_input(&self, blob: MediaBlob) -> Result<()> {
        let text = serde_json::to_string(&RealtimeInputMessage::from(blob))?;
        self.commands
            .send(LinkCommand::Send(text))
            .map_err(|_| Error::Session("session is closed".to_string()))
    }

    fn close(&mut self) {
        let _ = self.commands.send(LinkCommand::Close);
    }
}

/// Pump the socket until either side ends the session
async fn run_link(
    ws: WsStream,
    mut commands: mpsc::UnboundedReceiver<LinkCommand>,
    events: mpsc::Sender<SessionEvent>,
) {
    let (mut write, mut read) = ws.split();

    loop {
        tokio::select! {
            frame = read.next() => {
                let inbound = match frame {
                    Some(Ok(message)) => classify(&message),
                    Some(Err(e)) => Inbound::Ended(SessionEvent::Error(e.to_string())),
                    None => Inbound::Ended(SessionEvent::Closed),
                };

                match inbound {
                    Inbound::Event(event) => {
                        if events.send(event).await.is_err() {
                            break;
                        }
                    }
                    Inbound::Ended(event) => {
                        let _ = events.send(event).await;
                        break;
                    }
                    Inbound::Ignore => {}
                }
            }
            command = commands.recv() => {
                match command {
                    Some(LinkCommand::Send(text)) => {
                        if let Err(e) = write.send(Message::Text(text.into())).await {
                            tracing::warn!(error = %e, "live session send failed");
                            let _ = events.send(SessionEvent::Error(e.to_string())).await;
                            break;
                        }
                    }
                    Some(LinkCommand::Close) | None => {
                        let _ = write.send(Message::Close(None)).await;
                        tracing::debug!("live session closed by client");
                        break;
                    }
                }
            }
        }
    }
}

/// Map one websocket frame to a session event
fn classify(message: &Message) -> Inbound {
    match message {
        Message::Text(text) => parse_server_message(text.as_bytes()),
        Message::Binary(data) => parse_server_message(data),
        Message::Close(frame) => {
            let Some(frame) = frame else {
                return Inbound::Ended(SessionEvent::Closed);
            };
            match frame.code {
                CloseCode::Normal | CloseCode::Away => {
                    tracing::debug!(
                        reason = frame.reason.as_str(),
                        "live session closed by server"
                    );
                    Inbound::Ended(SessionEvent::Closed)
                }
                code => Inbound::Ended(SessionEvent::Error(format!(
                    "session closed ({}): {}",
                    u16::from(code),
                    frame.reason.as_str()
                ))),
            }
        }
        Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => Inbound::Ignore,
    }
}

fn parse_server_message(raw: &[u8]) -> Inbound {
    let message: LiveServerMessage = match serde_json::from_slice(raw) {
        Ok(message) => message,
        Err(e) => {
            tracing::debug!(error = %e, "ignoring unparseable server message");
            return Inbound::Ignore;
        }
    };

    if message.setup_complete.is_some() {
        return Inbound::Event(SessionEvent::Open);
    }
    if let Some(content) = message.server_content {
        return Inbound::Event(SessionEvent::Message(ServerMessage::from(content)));
    }
    if let Some(go_away) = message.go_away {
        tracing::warn!(time_left = ?go_away.time_left, "live session ending soon");
    }
    Inbound::Ignore
}
