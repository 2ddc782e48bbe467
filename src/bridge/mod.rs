//! Streaming audio bridge
//!
//! Connects the microphone, the live session and the speakers. One event loop
//! consumes shell commands, session events, capture frames and playback
//! completions, so all bridge state is owned by a single task.
//!
//! ```text
//! mic ─► capture frames ─► encode ─► session.send_realtime_input
//!                                            │
//! speaker ◄─ schedule ◄─ decode ◄─ session events ◄─┘
//! ```

mod schedule;
mod transcript;

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::persona::Persona;
use crate::session::{
    ConversationSession, DEFAULT_MODEL, DEFAULT_VOICE, SESSION_EVENT_BUFFER, ServerMessage,
    SessionConfig, SessionConnector, SessionEvent,
};
use crate::voice::{
    AudioBackend, AudioDeviceContext, Microphone, PLAYBACK_SAMPLE_RATE, PlaybackHandle,
    decode_base64, decode_playback_frame, encode_capture_frame,
};
use crate::{Error, Result};

pub use schedule::PlaybackSchedule;
pub use transcript::TurnAccumulator;

/// Samples per outbound capture frame
pub const CAPTURE_FRAME_SIZE: usize = 4096;

/// Session status as shown to the user
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    /// No session running
    Idle,
    /// Opening devices and the remote session
    Connecting,
    /// Streaming in both directions
    Listening,
    /// Idle after a failure, until the next start
    Error,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Connecting => write!(f, "connecting"),
            Self::Listening => write!(f, "listening"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// The most recently completed exchange
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConversationalTurn {
    /// What the user said
    pub user: Option<String>,
    /// What the model said
    pub agent: Option<String>,
}

/// Commands from the presentation shell
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeCommand {
    /// Start if idle, stop otherwise
    Toggle,
    /// Start a session
    Start,
    /// Stop the session
    Stop,
    /// The session surface gained or lost focus
    Focus(bool),
    /// Stop and leave the event loop
    Shutdown,
}

/// Notifications for the presentation shell
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeUpdate {
    /// Status changed
    Status(SessionStatus),
    /// A turn completed
    Turn(ConversationalTurn),
    /// Human-readable failure message
    Error(String),
}

/// Session parameters chosen at startup
#[derive(Debug, Clone)]
pub struct BridgeOptions {
    /// Model identifier
    pub model: String,
    /// Prebuilt voice name
    pub voice_name: String,
    /// Persona providing the system instruction
    pub persona: Persona,
    /// Samples per capture frame
    pub frame_size: usize,
}

impl Default for BridgeOptions {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            voice_name: DEFAULT_VOICE.to_string(),
            persona: Persona::default(),
            frame_size: CAPTURE_FRAME_SIZE,
        }
    }
}

/// An opened session and its event stream
type Connected = (Box<dyn ConversationSession>, mpsc::Receiver<SessionEvent>);

/// Connect in flight; dropping it abandons the attempt
type PendingConnect = Pin<Box<dyn Future<Output = Result<Connected>> + Send>>;

/// What woke the event loop
enum Next {
    Command(Option<BridgeCommand>),
    Connected(Result<Connected>),
    Session(Option<SessionEvent>),
    Frame(Option<Vec<f32>>),
    Ended(Option<PlaybackHandle>),
}

/// Bridges microphone, live session and speakers
pub struct StreamingAudioBridge<C: SessionConnector, B: AudioBackend> {
    connector: Arc<C>,
    audio: AudioDeviceContext<B>,
    options: BridgeOptions,
    updates: mpsc::UnboundedSender<BridgeUpdate>,

    phase: SessionStatus,
    last_error: Option<String>,
    focused: bool,

    connecting: Option<PendingConnect>,
    session: Option<Box<dyn ConversationSession>>,
    events: Option<mpsc::Receiver<SessionEvent>>,
    frames: Option<mpsc::UnboundedReceiver<Vec<f32>>>,
    mic_acquired: bool,

    transcript: TurnAccumulator,
    schedule: PlaybackSchedule,
    current_turn: Option<ConversationalTurn>,
}

impl<C: SessionConnector + 'static, B: AudioBackend> StreamingAudioBridge<C, B> {
    /// Create an idle bridge; focus starts released
    pub fn new(
        connector: C,
        audio: AudioDeviceContext<B>,
        options: BridgeOptions,
        updates: mpsc::UnboundedSender<BridgeUpdate>,
    ) -> Self {
        Self {
            connector: Arc::new(connector),
            audio,
            options,
            updates,
            phase: SessionStatus::Idle,
            last_error: None,
            focused: false,
            connecting: None,
            session: None,
            events: None,
            frames: None,
            mic_acquired: false,
            transcript: TurnAccumulator::new(),
            schedule: PlaybackSchedule::new(),
            current_turn: None,
        }
    }

    /// Current status, including the error annotation
    #[must_use]
    pub const fn status(&self) -> SessionStatus {
        match (self.phase, &self.last_error) {
            (SessionStatus::Idle, Some(_)) => SessionStatus::Error,
            (phase, _) => phase,
        }
    }

    /// Message of the last failure, until the next start
    #[must_use]
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Most recently completed turn
    #[must_use]
    pub const fn current_turn(&self) -> Option<&ConversationalTurn> {
        self.current_turn.as_ref()
    }

    /// Playback cursor and active buffers
    #[must_use]
    pub const fn schedule(&self) -> &PlaybackSchedule {
        &self.schedule
    }

    /// Transcription collected for the open turn
    #[must_use]
    pub const fn transcript(&self) -> &TurnAccumulator {
        &self.transcript
    }

    /// Whether the session surface holds focus
    #[must_use]
    pub const fn is_focused(&self) -> bool {
        self.focused
    }

    /// Whether a remote session is open
    #[must_use]
    pub const fn has_session(&self) -> bool {
        self.session.is_some()
    }

    /// Start a session
    ///
    /// Ignored unless idle. Failures are published to the shell, leave the
    /// bridge idle and are also returned.
    ///
    /// # Errors
    ///
    /// Returns `Error::Precondition` without focus, `Error::Permission` if the
    /// microphone is unavailable and `Error::Session` if connecting fails
    pub async fn start(&mut self) -> Result<()> {
        if !self.begin_start()? {
            return Ok(());
        }
        match self.connecting.take() {
            Some(connect) => {
                let result = connect.await;
                self.finish_connect(result)
            }
            None => Ok(()),
        }
    }

    /// Check preconditions, acquire devices and prepare the connect
    ///
    /// Returns `Ok(false)` when the start is ignored. The connect itself is
    /// left in `connecting` for the caller to drive.
    fn begin_start(&mut self) -> Result<bool> {
        if self.phase != SessionStatus::Idle {
            tracing::debug!(status = %self.phase, "start ignored, session already running");
            return Ok(false);
        }

        if !self.focused {
            let err = Error::Precondition("session surface is not focused".to_string());
            tracing::warn!(error = %err, "start rejected");
            let _ = self
                .updates
                .send(BridgeUpdate::Error(err.user_message().to_string()));
            return Err(err);
        }

        self.last_error = None;
        self.set_phase(SessionStatus::Connecting);

        if let Err(e) = self.acquire_devices() {
            return Err(self.fail(e));
        }

        let (tx, rx) = mpsc::channel(SESSION_EVENT_BUFFER);
        let config = self.session_config();
        let connector = Arc::clone(&self.connector);

        tracing::info!(model = %self.options.model, "voice session connecting");
        self.connecting = Some(Box::pin(async move {
            let session = connector.connect(config, tx).await?;
            Ok::<Connected, Error>((session, rx))
        }));
        Ok(true)
    }

    fn finish_connect(&mut self, result: Result<Connected>) -> Result<()> {
        match result {
            Ok((session, events)) => {
                self.session = Some(session);
                self.events = Some(events);
                tracing::debug!("voice session connected");
                Ok(())
            }
            Err(e) => {
                let e = match e {
                    Error::Session(_) => e,
                    other => Error::Session(other.to_string()),
                };
                Err(self.fail(e))
            }
        }
    }

    /// Tear everything down; safe to call in any state
    pub fn stop(&mut self) {
        let was_running = self.phase != SessionStatus::Idle;

        if self.connecting.take().is_some() {
            tracing::debug!("pending connect abandoned");
        }

        let capturing = self.frames.take().is_some();
        if let Some(input) = self.audio.input_mut() {
            if capturing {
                input.close_capture();
            }
            if self.mic_acquired {
                input.release();
            }
        }
        self.mic_acquired = false;

        match self.audio.output_mut() {
            Some(output) => {
                self.schedule.interrupt(output);
            }
            None => self.schedule.reset(),
        }

        if let Some(mut session) = self.session.take() {
            session.close();
        }
        self.events = None;
        self.transcript.clear();

        self.set_phase(SessionStatus::Idle);
        if was_running {
            tracing::info!("voice session stopped");
        }
    }

    /// Start if idle, stop otherwise
    ///
    /// # Errors
    ///
    /// Returns the start failure, if starting
    pub async fn toggle(&mut self) -> Result<()> {
        if self.phase == SessionStatus::Idle {
            self.start().await
        } else {
            self.stop();
            Ok(())
        }
    }

    /// Record a focus change; losing focus stops the session
    pub fn set_focus(&mut self, focused: bool) {
        self.focused = focused;
        if !focused && self.phase != SessionStatus::Idle {
            tracing::debug!("focus lost, stopping session");
            self.stop();
        }
    }

    /// Apply one event from the open session
    pub fn handle_session_event(&mut self, event: SessionEvent) {
        if self.session.is_none() {
            tracing::debug!(?event, "ignoring event without a session");
            return;
        }

        match event {
            SessionEvent::Open => self.on_open(),
            SessionEvent::Message(message) => self.on_message(message),
            SessionEvent::Error(message) => {
                self.fail(Error::Session(message));
            }
            SessionEvent::Closed => {
                tracing::info!("live session closed");
                self.stop();
            }
        }
    }

    /// Forward one capture frame to the session
    pub fn handle_capture_frame(&mut self, frame: &[f32]) {
        if self.phase != SessionStatus::Listening {
            return;
        }
        let Some(session) = self.session.as_ref() else {
            return;
        };
        if let Err(e) = session.send_realtime_input(encode_capture_frame(frame)) {
            tracing::debug!(error = %e, "dropping capture frame");
        }
    }

    /// A scheduled buffer finished playing
    pub fn handle_playback_ended(&mut self, handle: PlaybackHandle) {
        self.schedule.finished(handle);
    }

    /// Run until shutdown or until the command channel closes
    pub async fn run(&mut self, mut commands: mpsc::UnboundedReceiver<BridgeCommand>) {
        loop {
            let next = tokio::select! {
                command = commands.recv() => Next::Command(command),
                result = next_connect(&mut self.connecting) => Next::Connected(result),
                event = next_event(&mut self.events) => Next::Session(event),
                frame = next_frame(&mut self.frames) => Next::Frame(frame),
                handle = self.audio.next_ended() => Next::Ended(handle),
            };

            match next {
                Next::Command(None | Some(BridgeCommand::Shutdown)) => break,
                Next::Command(Some(command)) => self.apply(command),
                Next::Connected(result) => {
                    self.connecting = None;
                    let _ = self.finish_connect(result);
                }
                Next::Session(Some(event)) => self.handle_session_event(event),
                Next::Session(None) => {
                    self.events = None;
                    self.handle_session_event(SessionEvent::Closed);
                }
                Next::Frame(Some(frame)) => self.handle_capture_frame(&frame),
                Next::Frame(None) => self.frames = None,
                Next::Ended(Some(handle)) => self.handle_playback_ended(handle),
                Next::Ended(None) => {}
            }
        }

        self.stop();
        tracing::debug!("bridge event loop finished");
    }

    fn apply(&mut self, command: BridgeCommand) {
        let result = match command {
            BridgeCommand::Toggle if self.phase == SessionStatus::Idle => {
                self.begin_start().map(|_| ())
            }
            BridgeCommand::Toggle | BridgeCommand::Stop => {
                self.stop();
                Ok(())
            }
            BridgeCommand::Start => self.begin_start().map(|_| ()),
            BridgeCommand::Focus(focused) => {
                self.set_focus(focused);
                Ok(())
            }
            BridgeCommand::Shutdown => Ok(()),
        };

        if let Err(e) = result {
            tracing::debug!(?command, error = %e, "command failed");
        }
    }

    fn acquire_devices(&mut self) -> Result<()> {
        self.audio.ensure_ready()?;
        self.audio.require_input()?.acquire()?;
        self.mic_acquired = true;
        Ok(())
    }

    fn session_config(&self) -> SessionConfig {
        SessionConfig::new(
            self.options.model.clone(),
            self.options.persona.render_instruction(),
            self.options.voice_name.clone(),
        )
    }

    fn on_open(&mut self) {
        if self.phase != SessionStatus::Connecting {
            tracing::debug!(status = %self.phase, "ignoring duplicate open");
            return;
        }
        self.set_phase(SessionStatus::Listening);

        let frame_size = self.options.frame_size;
        match self
            .audio
            .require_input()
            .and_then(|input| input.open_capture(frame_size))
        {
            Ok(frames) => {
                self.frames = Some(frames);
                tracing::info!(frame_size, "voice session listening");
            }
            Err(e) => {
                self.fail(e);
            }
        }
    }

    fn on_message(&mut self, message: ServerMessage) {
        if let Some(delta) = message.input_transcription.as_deref() {
            self.transcript.push_user(delta);
        }
        if let Some(delta) = message.output_transcription.as_deref() {
            self.transcript.push_agent(delta);
        }

        if message.turn_complete
            && let Some(turn) = self.transcript.complete()
        {
            tracing::debug!(user = ?turn.user, agent = ?turn.agent, "turn complete");
            self.current_turn = Some(turn.clone());
            let _ = self.updates.send(BridgeUpdate::Turn(turn));
        }

        if let Some(data) = message.audio.as_deref() {
            self.play_fragment(data);
        }

        if message.interrupted {
            let stopped = match self.audio.output_mut() {
                Some(output) => self.schedule.interrupt(output),
                None => {
                    self.schedule.reset();
                    0
                }
            };
            tracing::debug!(stopped, "playback interrupted");
        }
    }

    fn play_fragment(&mut self, data: &str) {
        let buffer = match decode_base64(data)
            .and_then(|bytes| decode_playback_frame(&bytes, PLAYBACK_SAMPLE_RATE, 1))
        {
            Ok(buffer) => buffer,
            Err(e) => {
                tracing::debug!(error = %e, "dropping malformed audio fragment");
                return;
            }
        };
        if buffer.frames() == 0 {
            return;
        }

        let Some(output) = self.audio.output_mut() else {
            tracing::debug!("no playback context, dropping audio fragment");
            return;
        };
        if let Err(e) = self.schedule.enqueue(output, &buffer) {
            tracing::warn!(error = %e, "failed to schedule audio fragment");
        }
    }

    /// Tear down after a failure and surface it to the shell
    fn fail(&mut self, err: Error) -> Error {
        tracing::error!(error = %err, "voice session failed");
        let message = err.user_message().to_string();
        let _ = self.updates.send(BridgeUpdate::Error(message.clone()));
        self.last_error = Some(message);
        self.stop();
        err
    }

    fn set_phase(&mut self, phase: SessionStatus) {
        let before = self.status();
        self.phase = phase;
        let after = self.status();
        if before != after {
            tracing::debug!(from = %before, to = %after, "status changed");
            let _ = self.updates.send(BridgeUpdate::Status(after));
        }
    }
}

async fn next_connect(connecting: &mut Option<PendingConnect>) -> Result<Connected> {
    match connecting {
        Some(connect) => connect.await,
        None => std::future::pending().await,
    }
}

async fn next_event(events: &mut Option<mpsc::Receiver<SessionEvent>>) -> Option<SessionEvent> {
    match events {
        Some(events) => events.recv().await,
        None => std::future::pending().await,
    }
}

async fn next_frame(frames: &mut Option<mpsc::UnboundedReceiver<Vec<f32>>>) -> Option<Vec<f32>> {
    match frames {
        Some(frames) => frames.recv().await,
        None => std::future::pending().await,
    }
}
