//! Audio device context shared across sessions
//!
//! The capture and playback contexts are created once per process, on first
//! use, and resumed at the start of every session.

use tokio::sync::mpsc;

use super::codec::{CAPTURE_SAMPLE_RATE, PLAYBACK_SAMPLE_RATE, PcmBuffer};
use crate::{Error, Result};

/// Identifies one buffer scheduled on the output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PlaybackHandle(pub u64);

/// Microphone capture context
///
/// Frames are delivered in capture order, each exactly `frame_size` samples
/// of mono audio at the capture rate.
pub trait Microphone {
    /// Resume the context if the platform suspended it
    ///
    /// # Errors
    ///
    /// Returns error if the context cannot be resumed
    fn resume(&mut self) -> Result<()> {
        Ok(())
    }

    /// Acquire microphone access
    ///
    /// # Errors
    ///
    /// Returns `Error::Permission` if access is denied or no device exists
    fn acquire(&mut self) -> Result<()>;

    /// Connect the fixed-size buffering stage and start delivering frames
    ///
    /// # Errors
    ///
    /// Returns error if the microphone was not acquired or capture fails
    fn open_capture(&mut self, frame_size: usize) -> Result<mpsc::UnboundedReceiver<Vec<f32>>>;

    /// Disconnect the buffering stage; no further frames are delivered
    fn close_capture(&mut self);

    /// Stop and release the microphone
    fn release(&mut self);
}

/// Playback context that renders buffers at absolute times on its own clock
pub trait PlaybackScheduler {
    /// Resume the context if the platform suspended it
    ///
    /// # Errors
    ///
    /// Returns error if the output stream cannot be restarted
    fn resume(&mut self) -> Result<()>;

    /// Current output clock in seconds
    fn current_time(&self) -> f64;

    /// Schedule a buffer to start at `start_at` seconds on the output clock
    ///
    /// Natural completion is reported on the context's ended channel.
    ///
    /// # Errors
    ///
    /// Returns error if the buffer format does not match the output
    fn schedule(&mut self, buffer: &PcmBuffer, start_at: f64) -> Result<PlaybackHandle>;

    /// Force-stop a scheduled buffer; stopping a finished handle is a no-op
    fn stop(&mut self, handle: PlaybackHandle);
}

/// Creates the platform contexts
pub trait AudioBackend {
    /// Capture context type
    type Input: Microphone;

    /// Playback context type
    type Output: PlaybackScheduler;

    /// Open the capture context at the given rate
    ///
    /// # Errors
    ///
    /// Returns error if no capture device can be opened
    fn open_input(&mut self, sample_rate: u32) -> Result<Self::Input>;

    /// Open the playback context at the given rate
    ///
    /// # Errors
    ///
    /// Returns error if no output device can be opened
    fn open_output(
        &mut self,
        sample_rate: u32,
        ended: mpsc::UnboundedSender<PlaybackHandle>,
    ) -> Result<Self::Output>;
}

/// The process-wide pair of audio contexts
pub struct AudioDeviceContext<B: AudioBackend> {
    backend: B,
    input: Option<B::Input>,
    output: Option<B::Output>,
    ended_tx: mpsc::UnboundedSender<PlaybackHandle>,
    ended_rx: mpsc::UnboundedReceiver<PlaybackHandle>,
}

impl<B: AudioBackend> AudioDeviceContext<B> {
    /// Create an empty context; devices open on first `ensure_ready`
    #[must_use]
    pub fn new(backend: B) -> Self {
        let (ended_tx, ended_rx) = mpsc::unbounded_channel();
        Self {
            backend,
            input: None,
            output: None,
            ended_tx,
            ended_rx,
        }
    }

    /// Construct both contexts if needed, then resume them
    ///
    /// # Errors
    ///
    /// Returns error if a context cannot be opened or resumed
    pub fn ensure_ready(&mut self) -> Result<()> {
        if self.input.is_none() {
            let input = self.backend.open_input(CAPTURE_SAMPLE_RATE)?;
            tracing::debug!(sample_rate = CAPTURE_SAMPLE_RATE, "capture context created");
            self.input = Some(input);
        }
        if self.output.is_none() {
            let output = self
                .backend
                .open_output(PLAYBACK_SAMPLE_RATE, self.ended_tx.clone())?;
            tracing::debug!(sample_rate = PLAYBACK_SAMPLE_RATE, "playback context created");
            self.output = Some(output);
        }

        if let Some(input) = self.input.as_mut() {
            input.resume()?;
        }
        if let Some(output) = self.output.as_mut() {
            output.resume()?;
        }
        Ok(())
    }

    /// Capture context, if created
    pub fn input_mut(&mut self) -> Option<&mut B::Input> {
        self.input.as_mut()
    }

    /// Playback context, if created
    pub fn output_mut(&mut self) -> Option<&mut B::Output> {
        self.output.as_mut()
    }

    /// Capture context, or an error if `ensure_ready` has not run
    ///
    /// # Errors
    ///
    /// Returns `Error::Audio` if the context does not exist yet
    pub fn require_input(&mut self) -> Result<&mut B::Input> {
        self.input
            .as_mut()
            .ok_or_else(|| Error::Audio("capture context not initialized".to_string()))
    }

    /// Wait for the next buffer to finish playing naturally
    pub async fn next_ended(&mut self) -> Option<PlaybackHandle> {
        self.ended_rx.recv().await
    }
}
