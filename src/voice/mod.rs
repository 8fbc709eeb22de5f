//! Voice processing module
//!
//! Handles audio capture, PCM conversion and gapless playback of the remote
//! service's speech.

pub mod codec;
mod capture;
mod meter;
mod playback;
mod resample;
mod scheduler;

pub use capture::{
    CaptureDevice, CapturePipeline, EncodedChunk, FRAME_SIZE, MicrophoneCapture, SAMPLE_RATE,
    samples_to_wav,
};
pub use codec::{DecodedAudio, decode_pcm16, encode_pcm16};
pub use meter::compute_rms;
pub use playback::{Mixer, PLAYBACK_SAMPLE_RATE, PlaybackEvent, PlaybackOutput, SpeakerOutput};
pub use resample::{FragmentResampler, StreamResampler};
pub use scheduler::{BufferId, PlaybackScheduler, ScheduledBuffer};

use tokio::sync::mpsc;

use crate::Result;

/// Source of audio devices for a negotiation session
///
/// Devices are acquired on connect and released on cleanup.
pub trait AudioBackend {
    /// Acquire the microphone and stream encoded frames into `sink`
    ///
    /// # Errors
    ///
    /// Returns `Error::Device` or `Error::Permission` if the microphone is
    /// unavailable
    fn open_capture(
        &self,
        frame_size: usize,
        sink: mpsc::UnboundedSender<EncodedChunk>,
    ) -> Result<Box<dyn CaptureDevice>>;

    /// Acquire the output device, reporting buffer ends on `events`
    ///
    /// # Errors
    ///
    /// Returns `Error::Device` if no output device is usable
    fn open_playback(
        &self,
        events: mpsc::UnboundedSender<PlaybackEvent>,
    ) -> Result<Box<dyn PlaybackOutput>>;
}

/// Default host audio through cpal
#[derive(Debug, Clone, Copy, Default)]
pub struct CpalBackend;

impl AudioBackend for CpalBackend {
    fn open_capture(
        &self,
        frame_size: usize,
        sink: mpsc::UnboundedSender<EncodedChunk>,
    ) -> Result<Box<dyn CaptureDevice>> {
        Ok(Box::new(MicrophoneCapture::start(frame_size, sink)?))
    }

    fn open_playback(
        &self,
        events: mpsc::UnboundedSender<PlaybackEvent>,
    ) -> Result<Box<dyn PlaybackOutput>> {
        Ok(Box::new(SpeakerOutput::start(events)?))
    }
}
