//! Voice processing module
//!
//! Handles microphone capture, PCM transport encoding and scheduled playback.
//! Device access sits behind the traits in [`device`] so the bridge can run
//! against any audio backend.

pub mod codec;
pub mod device;

mod capture;
mod playback;

pub use capture::{AudioCapture, CpalBackend, samples_to_wav};
pub use codec::{
    CAPTURE_MIME_TYPE, CAPTURE_SAMPLE_RATE, MediaBlob, PLAYBACK_SAMPLE_RATE, PcmBuffer,
    decode_base64, decode_playback_frame, encode_capture_frame,
};
pub use device::{AudioBackend, AudioDeviceContext, Microphone, PlaybackHandle, PlaybackScheduler};
pub use playback::{AudioPlayback, Mixer};
