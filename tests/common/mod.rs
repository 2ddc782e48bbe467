//! Shared test utilities
//!
//! Fake audio devices and a fake live session, with their state shared so
//! tests can drive them and inspect what the bridge did.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use tokio::sync::mpsc;

use oracle_voice::voice::{
    AudioBackend, AudioDeviceContext, MediaBlob, Microphone, PcmBuffer, PlaybackHandle,
    PlaybackScheduler,
};
use oracle_voice::{
    BridgeOptions, BridgeUpdate, ConversationSession, Error, Result, ServerMessage, SessionConfig,
    SessionConnector, SessionEvent, StreamingAudioBridge,
};

/// What the fake audio devices saw
#[derive(Debug, Default)]
pub struct AudioState {
    pub deny_microphone: bool,
    pub inputs_opened: usize,
    pub outputs_opened: usize,
    pub output_resumes: usize,
    pub acquires: usize,
    pub releases: usize,
    pub captures_opened: usize,
    pub captures_closed: usize,
    pub frame_size: Option<usize>,
    pub frame_tx: Option<mpsc::UnboundedSender<Vec<f32>>>,
    pub now: f64,
    pub scheduled: Vec<(PlaybackHandle, f64, f64)>,
    pub stopped: Vec<PlaybackHandle>,
    pub ended_tx: Option<mpsc::UnboundedSender<PlaybackHandle>>,
    next_handle: u64,
}

impl AudioState {
    /// Start times of every scheduled buffer, in scheduling order
    pub fn starts(&self) -> Vec<f64> {
        self.scheduled.iter().map(|(_, start, _)| *start).collect()
    }

    /// Handles of every scheduled buffer, in scheduling order
    pub fn handles(&self) -> Vec<PlaybackHandle> {
        self.scheduled.iter().map(|(handle, _, _)| *handle).collect()
    }
}

pub type Shared<T> = Arc<Mutex<T>>;

/// Audio backend backed by [`AudioState`]
pub struct FakeAudio {
    state: Shared<AudioState>,
}

pub struct FakeMicrophone {
    state: Shared<AudioState>,
}

pub struct FakeOutput {
    state: Shared<AudioState>,
}

impl AudioBackend for FakeAudio {
    type Input = FakeMicrophone;
    type Output = FakeOutput;

    fn open_input(&mut self, _sample_rate: u32) -> Result<Self::Input> {
        self.state.lock().unwrap().inputs_opened += 1;
        Ok(FakeMicrophone {
            state: Arc::clone(&self.state),
        })
    }

    fn open_output(
        &mut self,
        _sample_rate: u32,
        ended: mpsc::UnboundedSender<PlaybackHandle>,
    ) -> Result<Self::Output> {
        let mut state = self.state.lock().unwrap();
        state.outputs_opened += 1;
        state.ended_tx = Some(ended);
        Ok(FakeOutput {
            state: Arc::clone(&self.state),
        })
    }
}

impl Microphone for FakeMicrophone {
    fn acquire(&mut self) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.deny_microphone {
            return Err(Error::Permission("microphone access denied".to_string()));
        }
        state.acquires += 1;
        Ok(())
    }

    fn open_capture(&mut self, frame_size: usize) -> Result<mpsc::UnboundedReceiver<Vec<f32>>> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.state.lock().unwrap();
        state.captures_opened += 1;
        state.frame_size = Some(frame_size);
        state.frame_tx = Some(tx);
        Ok(rx)
    }

    fn close_capture(&mut self) {
        let mut state = self.state.lock().unwrap();
        state.captures_closed += 1;
        state.frame_tx = None;
    }

    fn release(&mut self) {
        self.state.lock().unwrap().releases += 1;
    }
}

impl PlaybackScheduler for FakeOutput {
    fn resume(&mut self) -> Result<()> {
        self.state.lock().unwrap().output_resumes += 1;
        Ok(())
    }

    fn current_time(&self) -> f64 {
        self.state.lock().unwrap().now
    }

    fn schedule(&mut self, buffer: &PcmBuffer, start_at: f64) -> Result<PlaybackHandle> {
        let mut state = self.state.lock().unwrap();
        state.next_handle += 1;
        let handle = PlaybackHandle(state.next_handle);
        state.scheduled.push((handle, start_at, buffer.duration()));
        Ok(handle)
    }

    fn stop(&mut self, handle: PlaybackHandle) {
        self.state.lock().unwrap().stopped.push(handle);
    }
}

/// What the fake session saw
#[derive(Debug, Default)]
pub struct SessionState {
    pub fail_with: Option<String>,
    pub stall_connect: bool,
    pub configs: Vec<SessionConfig>,
    pub sent: Vec<MediaBlob>,
    pub closes: usize,
    pub events: Option<mpsc::Sender<SessionEvent>>,
}

/// Session connector backed by [`SessionState`]
pub struct FakeConnector {
    state: Shared<SessionState>,
}

struct FakeSession {
    state: Shared<SessionState>,
}

#[async_trait]
impl SessionConnector for FakeConnector {
    async fn connect(
        &self,
        config: SessionConfig,
        events: mpsc::Sender<SessionEvent>,
    ) -> Result<Box<dyn ConversationSession>> {
        let stall = {
            let mut state = self.state.lock().unwrap();
            state.configs.push(config);
            if let Some(message) = &state.fail_with {
                return Err(Error::Session(message.clone()));
            }
            state.events = Some(events);
            state.stall_connect
        };

        // Like an endpoint that accepts TCP and never finishes the upgrade
        if stall {
            std::future::pending::<()>().await;
        }

        Ok(Box::new(FakeSession {
            state: Arc::clone(&self.state),
        }))
    }
}

impl ConversationSession for FakeSession {
    fn send_realtime_input(&self, blob: MediaBlob) -> Result<()> {
        self.state.lock().unwrap().sent.push(blob);
        Ok(())
    }

    fn close(&mut self) {
        self.state.lock().unwrap().closes += 1;
    }
}

/// A bridge wired to fakes
pub struct Harness {
    pub bridge: StreamingAudioBridge<FakeConnector, FakeAudio>,
    pub audio: Shared<AudioState>,
    pub session: Shared<SessionState>,
    pub updates: mpsc::UnboundedReceiver<BridgeUpdate>,
}

impl Harness {
    pub fn new() -> Self {
        let audio = Shared::default();
        let session = Shared::default();
        let (tx, updates) = mpsc::unbounded_channel();

        let bridge = StreamingAudioBridge::new(
            FakeConnector {
                state: Arc::clone(&session),
            },
            AudioDeviceContext::new(FakeAudio {
                state: Arc::clone(&audio),
            }),
            BridgeOptions::default(),
            tx,
        );

        Self {
            bridge,
            audio,
            session,
            updates,
        }
    }

    /// Focus, start and open a session so the bridge is listening
    pub async fn listening() -> Self {
        let mut harness = Self::new();
        harness.bridge.set_focus(true);
        harness.bridge.start().await.unwrap();
        harness.bridge.handle_session_event(SessionEvent::Open);
        harness
    }

    /// Everything published so far
    pub fn drain_updates(&mut self) -> Vec<BridgeUpdate> {
        let mut updates = Vec::new();
        while let Ok(update) = self.updates.try_recv() {
            updates.push(update);
        }
        updates
    }

    /// Deliver a server message to the bridge
    pub fn message(&mut self, message: ServerMessage) {
        self.bridge
            .handle_session_event(SessionEvent::Message(message));
    }
}

/// Base64 silence at the playback rate
pub fn audio_fragment(seconds: f64) -> String {
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let frames = (seconds * 24000.0).round() as usize;
    STANDARD.encode(vec![0u8; frames * 2])
}

/// A message carrying only audio
pub fn audio_message(seconds: f64) -> ServerMessage {
    ServerMessage {
        audio: Some(audio_fragment(seconds)),
        ..ServerMessage::default()
    }
}

/// Yield until `condition` holds, failing after a second
pub async fn wait_until(condition: impl Fn() -> bool) {
    tokio::time::timeout(Duration::from_secs(1), async {
        while !condition() {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("condition not reached in time");
}
