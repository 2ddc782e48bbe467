//! Audio capture from microphone

use std::sync::{Arc, Mutex};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, SampleRate, Stream, StreamConfig};
use rubato::{FftFixedIn, Resampler};
use tokio::sync::mpsc;

use super::device::{AudioBackend, Microphone, PlaybackHandle};
use super::playback::AudioPlayback;
use crate::{Error, Result};

/// Input chunk size fed to the resampler
const RESAMPLE_CHUNK: usize = 1024;

/// Converts device audio into fixed-size mono frames at the capture rate
struct FrameSink {
    frame_size: usize,
    channels: usize,
    resampler: Option<FftFixedIn<f32>>,
    resample_input: Vec<f32>,
    pending: Vec<f32>,
    frames: mpsc::UnboundedSender<Vec<f32>>,
}

impl FrameSink {
    fn new(
        frame_size: usize,
        channels: u16,
        device_rate: u32,
        target_rate: u32,
        frames: mpsc::UnboundedSender<Vec<f32>>,
    ) -> Result<Self> {
        if frame_size == 0 {
            return Err(Error::Audio("capture frame size must be non-zero".to_string()));
        }

        let resampler = if device_rate == target_rate {
            None
        } else {
            let resampler = FftFixedIn::<f32>::new(
                device_rate as usize,
                target_rate as usize,
                RESAMPLE_CHUNK,
                2,
                1,
            )
            .map_err(|e| Error::Audio(format!("resampler init failed: {e}")))?;
            Some(resampler)
        };

        Ok(Self {
            frame_size,
            channels: usize::from(channels.max(1)),
            resampler,
            resample_input: Vec::new(),
            pending: Vec::with_capacity(frame_size * 2),
            frames,
        })
    }

    /// Feed one device callback worth of interleaved samples
    fn push(&mut self, data: &[f32]) {
        let mono: Vec<f32> = if self.channels == 1 {
            data.to_vec()
        } else {
            #[allow(clippy::cast_precision_loss)]
            let channels = self.channels as f32;
            data.chunks_exact(self.channels)
                .map(|frame| frame.iter().sum::<f32>() / channels)
                .collect()
        };

        match self.resampler.as_mut() {
            None => self.pending.extend_from_slice(&mono),
            Some(resampler) => {
                self.resample_input.extend_from_slice(&mono);
                loop {
                    let needed = resampler.input_frames_next();
                    if self.resample_input.len() < needed {
                        break;
                    }
                    let chunk: Vec<f32> = self.resample_input.drain(..needed).collect();
                    match resampler.process(&[chunk], None) {
                        Ok(out) => {
                            if let Some(channel) = out.first() {
                                self.pending.extend_from_slice(channel);
                            }
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "capture resample failed");
                        }
                    }
                }
            }
        }

        while self.pending.len() >= self.frame_size {
            let frame: Vec<f32> = self.pending.drain(..self.frame_size).collect();
            if self.frames.send(frame).is_err() {
                self.pending.clear();
                return;
            }
        }
    }
}

/// Captures audio from the default input device
pub struct AudioCapture {
    device: Device,
    config: StreamConfig,
    target_rate: u32,
    sink: Arc<Mutex<Option<FrameSink>>>,
    stream: Option<Stream>,
}

impl AudioCapture {
    /// Open the default input device for capture at `target_rate`
    ///
    /// Devices that cannot run at the target rate in mono are opened at their
    /// default config and resampled.
    ///
    /// # Errors
    ///
    /// Returns `Error::Permission` if no input device is available
    pub fn new(target_rate: u32) -> Result<Self> {
        let host = cpal::default_host();

        let device = host
            .default_input_device()
            .ok_or_else(|| Error::Permission("no input device available".to_string()))?;

        let preferred = device
            .supported_input_configs()
            .map_err(|e| Error::Permission(e.to_string()))?
            .find(|c| {
                c.channels() == 1
                    && c.sample_format() == SampleFormat::F32
                    && c.min_sample_rate() <= SampleRate(target_rate)
                    && c.max_sample_rate() >= SampleRate(target_rate)
            });

        let config = match preferred {
            Some(supported) => supported.with_sample_rate(SampleRate(target_rate)).config(),
            None => device
                .default_input_config()
                .map_err(|e| Error::Permission(e.to_string()))?
                .config(),
        };

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            device_rate = config.sample_rate.0,
            target_rate,
            channels = config.channels,
            "audio capture initialized"
        );

        Ok(Self {
            device,
            config,
            target_rate,
            sink: Arc::new(Mutex::new(None)),
            stream: None,
        })
    }

    /// Whether capture runs through the resampler
    #[must_use]
    pub const fn is_resampling(&self) -> bool {
        self.config.sample_rate.0 != self.target_rate
    }

    /// Output sample rate of delivered frames
    #[must_use]
    pub const fn sample_rate(&self) -> u32 {
        self.target_rate
    }
}

impl Microphone for AudioCapture {
    fn acquire(&mut self) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }

        let sink = Arc::clone(&self.sink);
        let stream = self
            .device
            .build_input_stream(
                &self.config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    if let Ok(mut guard) = sink.lock()
                        && let Some(frames) = guard.as_mut()
                    {
                        frames.push(data);
                    }
                },
                |err| {
                    tracing::error!(error = %err, "audio capture error");
                },
                None,
            )
            .map_err(|e| Error::Permission(e.to_string()))?;

        // Some hosts start streams on creation
        stream.pause().map_err(|e| Error::Permission(e.to_string()))?;
        self.stream = Some(stream);

        tracing::debug!("microphone acquired");
        Ok(())
    }

    fn open_capture(&mut self, frame_size: usize) -> Result<mpsc::UnboundedReceiver<Vec<f32>>> {
        let stream = self
            .stream
            .as_ref()
            .ok_or_else(|| Error::Audio("microphone not acquired".to_string()))?;

        let (tx, rx) = mpsc::unbounded_channel();
        let sink = FrameSink::new(
            frame_size,
            self.config.channels,
            self.config.sample_rate.0,
            self.target_rate,
            tx,
        )?;

        self.sink
            .lock()
            .map_err(|_| Error::Audio("capture sink poisoned".to_string()))?
            .replace(sink);

        stream.play().map_err(|e| Error::Audio(e.to_string()))?;

        tracing::debug!(frame_size, "audio capture started");
        Ok(rx)
    }

    fn close_capture(&mut self) {
        if let Ok(mut sink) = self.sink.lock() {
            sink.take();
        }
        if let Some(stream) = self.stream.as_ref()
            && let Err(e) = stream.pause()
        {
            tracing::debug!(error = %e, "failed to pause capture stream");
        }
    }

    fn release(&mut self) {
        self.close_capture();
        if let Some(stream) = self.stream.take() {
            drop(stream);
            tracing::debug!("microphone released");
        }
    }
}

/// Default host audio devices
#[derive(Debug, Default, Clone, Copy)]
pub struct CpalBackend;

impl AudioBackend for CpalBackend {
    type Input = AudioCapture;
    type Output = AudioPlayback;

    fn open_input(&mut self, sample_rate: u32) -> Result<Self::Input> {
        AudioCapture::new(sample_rate)
    }

    fn open_output(
        &mut self,
        sample_rate: u32,
        ended: mpsc::UnboundedSender<PlaybackHandle>,
    ) -> Result<Self::Output> {
        AudioPlayback::new(sample_rate, ended)
    }
}

/// Convert f32 samples to WAV bytes for diagnostic recordings
///
/// # Errors
///
/// Returns error if WAV encoding fails
pub fn samples_to_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer =
            hound::WavWriter::new(&mut cursor, spec).map_err(|e| Error::Audio(e.to_string()))?;

        for &sample in samples {
            #[allow(clippy::cast_possible_truncation)]
            let sample_i16 = (sample.clamp(-1.0, 1.0) * 32768.0).clamp(-32768.0, 32767.0) as i16;
            writer
                .write_sample(sample_i16)
                .map_err(|e| Error::Audio(e.to_string()))?;
        }

        writer.finalize().map_err(|e| Error::Audio(e.to_string()))?;
    }

    Ok(cursor.into_inner())
}
