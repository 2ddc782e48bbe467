//! Audio playback to speakers
//!
//! Buffers are scheduled at absolute times on the output clock and mixed by
//! the output callback, so consecutive fragments play back to back.

use std::sync::{Arc, Mutex};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, Stream, StreamConfig};
use tokio::sync::mpsc;

use super::codec::PcmBuffer;
use super::device::{PlaybackHandle, PlaybackScheduler};
use crate::{Error, Result};

/// A buffer waiting for or in playback
#[derive(Debug)]
struct Voice {
    handle: PlaybackHandle,
    start_frame: u64,
    samples: Vec<f32>,
}

impl Voice {
    fn end_frame(&self) -> u64 {
        self.start_frame + self.samples.len() as u64
    }
}

/// Clock-driven mono mixer
///
/// The clock advances only as frames are rendered.
#[derive(Debug)]
pub struct Mixer {
    sample_rate: u32,
    frames_rendered: u64,
    voices: Vec<Voice>,
    next_handle: u64,
    scratch: Vec<f32>,
}

impl Mixer {
    /// Create a mixer at the given output rate
    #[must_use]
    pub const fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            frames_rendered: 0,
            voices: Vec::new(),
            next_handle: 1,
            scratch: Vec::new(),
        }
    }

    /// Output rate in Hz
    #[must_use]
    pub const fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Seconds of audio rendered so far
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn current_time(&self) -> f64 {
        self.frames_rendered as f64 / f64::from(self.sample_rate)
    }

    /// Number of buffers scheduled and not yet finished
    #[must_use]
    pub fn pending(&self) -> usize {
        self.voices.len()
    }

    /// Schedule mono samples to start at `start_at` seconds
    ///
    /// A start time in the past begins at the next rendered frame.
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    pub fn schedule(&mut self, samples: Vec<f32>, start_at: f64) -> PlaybackHandle {
        let requested = (start_at.max(0.0) * f64::from(self.sample_rate)).round() as u64;
        let start_frame = requested.max(self.frames_rendered);

        let handle = PlaybackHandle(self.next_handle);
        self.next_handle += 1;

        self.voices.push(Voice {
            handle,
            start_frame,
            samples,
        });
        handle
    }

    /// Remove a buffer before it finishes; returns false if it was not pending
    pub fn stop(&mut self, handle: PlaybackHandle) -> bool {
        let before = self.voices.len();
        self.voices.retain(|v| v.handle != handle);
        self.voices.len() != before
    }

    /// Render the next `out.len() / channels` frames
    ///
    /// Calls `on_finished` for every buffer that finished playing during this
    /// block. Runs on the audio thread; allocates only when the block grows.
    #[allow(clippy::cast_possible_truncation)]
    pub fn render(
        &mut self,
        out: &mut [f32],
        channels: usize,
        mut on_finished: impl FnMut(PlaybackHandle),
    ) {
        let channels = channels.max(1);
        let frames = out.len() / channels;
        let block_start = self.frames_rendered;
        let block_end = block_start + frames as u64;

        self.scratch.clear();
        self.scratch.resize(frames, 0.0);
        for voice in &self.voices {
            let from = voice.start_frame.max(block_start);
            let to = voice.end_frame().min(block_end);
            for frame in from..to {
                self.scratch[(frame - block_start) as usize] +=
                    voice.samples[(frame - voice.start_frame) as usize];
            }
        }

        for (frame, &sample) in out.chunks_mut(channels).zip(&self.scratch) {
            frame.fill(sample.clamp(-1.0, 1.0));
        }

        self.frames_rendered = block_end;

        self.voices.retain(|v| {
            if v.end_frame() <= block_end {
                on_finished(v.handle);
                false
            } else {
                true
            }
        });
    }
}

/// Plays scheduled buffers on the default output device
pub struct AudioPlayback {
    mixer: Arc<Mutex<Mixer>>,
    config: StreamConfig,
    stream: Stream,
}

impl AudioPlayback {
    /// Open the default output device at `sample_rate`
    ///
    /// Finished buffers are reported on `ended`.
    ///
    /// # Errors
    ///
    /// Returns error if audio device cannot be opened
    pub fn new(sample_rate: u32, ended: mpsc::UnboundedSender<PlaybackHandle>) -> Result<Self> {
        let host = cpal::default_host();

        let device = host
            .default_output_device()
            .ok_or_else(|| Error::Audio("no output device available".to_string()))?;

        let supported_config = device
            .supported_output_configs()
            .map_err(|e| Error::Audio(e.to_string()))?
            .find(|c| {
                c.channels() == 1
                    && c.min_sample_rate() <= SampleRate(sample_rate)
                    && c.max_sample_rate() >= SampleRate(sample_rate)
            })
            .or_else(|| {
                // Fallback: try stereo
                device.supported_output_configs().ok()?.find(|c| {
                    c.channels() == 2
                        && c.min_sample_rate() <= SampleRate(sample_rate)
                        && c.max_sample_rate() >= SampleRate(sample_rate)
                })
            })
            .ok_or_else(|| Error::Audio("no suitable output config found".to_string()))?;

        let config = supported_config
            .with_sample_rate(SampleRate(sample_rate))
            .config();

        let mixer = Arc::new(Mutex::new(Mixer::new(sample_rate)));
        let channels = usize::from(config.channels);

        let render_mixer = Arc::clone(&mixer);
        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    match render_mixer.lock() {
                        Ok(mut mixer) => mixer.render(data, channels, |handle| {
                            let _ = ended.send(handle);
                        }),
                        Err(_) => data.fill(0.0),
                    }
                },
                |err| {
                    tracing::error!(error = %err, "audio playback error");
                },
                None,
            )
            .map_err(|e| Error::Audio(e.to_string()))?;

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate,
            channels = config.channels,
            "audio playback initialized"
        );

        Ok(Self {
            mixer,
            config,
            stream,
        })
    }

    /// Output channel count negotiated with the device
    #[must_use]
    pub const fn channels(&self) -> u16 {
        self.config.channels
    }

    /// Pause the output stream
    pub fn suspend(&self) {
        if let Err(e) = self.stream.pause() {
            tracing::debug!(error = %e, "failed to pause playback stream");
        }
    }
}

impl PlaybackScheduler for AudioPlayback {
    fn resume(&mut self) -> Result<()> {
        self.stream.play().map_err(|e| Error::Audio(e.to_string()))
    }

    fn current_time(&self) -> f64 {
        self.mixer.lock().map(|m| m.current_time()).unwrap_or_default()
    }

    fn schedule(&mut self, buffer: &PcmBuffer, start_at: f64) -> Result<PlaybackHandle> {
        let mut mixer = self
            .mixer
            .lock()
            .map_err(|_| Error::Audio("playback mixer poisoned".to_string()))?;

        if buffer.sample_rate() != mixer.sample_rate() {
            return Err(Error::Audio(format!(
                "buffer rate {}Hz does not match output rate {}Hz",
                buffer.sample_rate(),
                mixer.sample_rate()
            )));
        }

        Ok(mixer.schedule(buffer.to_mono(), start_at))
    }

    fn stop(&mut self, handle: PlaybackHandle) {
        if let Ok(mut mixer) = self.mixer.lock() {
            mixer.stop(handle);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock_advances_with_rendering() {
        let mut mixer = Mixer::new(24000);
        assert!(mixer.current_time().abs() < f64::EPSILON);

        let mut out = vec![0.0; 12000];
        mixer.render(&mut out, 1, |_| {});
        assert!((mixer.current_time() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_buffer_starts_at_scheduled_frame() {
        let mut mixer = Mixer::new(10);
        mixer.schedule(vec![0.5, 0.5], 0.3);

        let mut out = vec![0.0; 6];
        let mut finished = Vec::new();
        mixer.render(&mut out, 1, |handle| finished.push(handle));
        assert_eq!(out, vec![0.0, 0.0, 0.0, 0.5, 0.5, 0.0]);
        assert_eq!(finished.len(), 1);
        assert_eq!(mixer.pending(), 0);
    }

    #[test]
    fn test_back_to_back_buffers_are_gapless() {
        let mut mixer = Mixer::new(10);
        mixer.schedule(vec![0.1; 3], 0.0);
        mixer.schedule(vec![0.2; 3], 0.3);

        let mut out = vec![0.0; 6];
        mixer.render(&mut out, 1, |_| {});
        assert_eq!(out, vec![0.1, 0.1, 0.1, 0.2, 0.2, 0.2]);
    }

    #[test]
    fn test_past_start_plays_immediately() {
        let mut mixer = Mixer::new(10);
        let mut out = vec![0.0; 5];
        mixer.render(&mut out, 1, |_| {});

        mixer.schedule(vec![0.4], 0.0);
        let mut out = vec![0.0; 2];
        mixer.render(&mut out, 1, |_| {});
        assert_eq!(out, vec![0.4, 0.0]);
    }

    #[test]
    fn test_stop_discards_pending_audio() {
        let mut mixer = Mixer::new(10);
        let handle = mixer.schedule(vec![0.5; 4], 0.0);

        let mut out = vec![0.0; 2];
        mixer.render(&mut out, 1, |_| {});
        assert!(mixer.stop(handle));
        assert!(!mixer.stop(handle));

        let mut out = vec![0.0; 2];
        let mut finished = Vec::new();
        mixer.render(&mut out, 1, |handle| finished.push(handle));
        assert_eq!(out, vec![0.0, 0.0]);
        assert!(finished.is_empty());
    }

    #[test]
    fn test_render_fans_out_to_channels() {
        let mut mixer = Mixer::new(10);
        mixer.schedule(vec![0.25, -0.25], 0.0);

        let mut out = vec![0.0; 4];
        mixer.render(&mut out, 2, |_| {});
        assert_eq!(out, vec![0.25, 0.25, -0.25, -0.25]);
    }

    #[test]
    fn test_overlapping_buffers_are_clamped() {
        let mut mixer = Mixer::new(10);
        mixer.schedule(vec![0.8], 0.0);
        mixer.schedule(vec![0.8], 0.0);

        let mut out = vec![0.0; 1];
        mixer.render(&mut out, 1, |_| {});
        assert!((out[0] - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_scratch_reused_across_blocks() {
        let mut mixer = Mixer::new(10);
        let first = mixer.schedule(vec![0.3; 4], 0.0);
        let second = mixer.schedule(vec![0.6; 2], 0.4);

        let mut finished = Vec::new();
        let mut out = vec![0.0; 4];
        mixer.render(&mut out, 1, |handle| finished.push(handle));
        assert_eq!(out, vec![0.3; 4]);
        let capacity = mixer.scratch.capacity();

        // A smaller block must not carry samples over from the previous one
        let mut out = vec![1.0; 2];
        mixer.render(&mut out, 1, |handle| finished.push(handle));
        assert_eq!(out, vec![0.6, 0.6]);
        assert_eq!(finished, vec![first, second]);
        assert_eq!(mixer.scratch.capacity(), capacity);
    }
}
