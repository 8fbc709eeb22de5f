//! Audio capture from microphone
//!
//! The cpal input callback feeds a [`CapturePipeline`], which cuts the stream
//! into fixed frames, resamples them, measures their level and encodes them
//! for the outbound path. Nothing in the callback blocks or awaits.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleRate, Stream, StreamConfig};
use tokio::sync::mpsc;

use super::codec::{encode_pcm16, pcm_media_type};
use super::meter::compute_rms;
use super::resample::StreamResampler;
use crate::{Error, Result};

/// Sample rate required by the remote service (16kHz for speech)
pub const SAMPLE_RATE: u32 = 16000;

/// Samples per capture frame at the device rate
pub const FRAME_SIZE: usize = 4096;

/// One encoded frame ready for the transport
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedChunk {
    /// Base64 PCM16 mono audio
    pub data: String,
    /// Media descriptor, e.g. `audio/pcm;rate=16000`
    pub mime_type: String,
    /// Frame level from the volume meter
    pub rms: f32,
}

/// Frames, resamples and encodes raw device samples
pub struct CapturePipeline {
    channels: usize,
    frame: Vec<f32>,
    frame_size: usize,
    resampler: StreamResampler,
    mime_type: String,
    sink: mpsc::UnboundedSender<EncodedChunk>,
}

impl CapturePipeline {
    /// Build a pipeline for a device delivering `channels` interleaved channels at `device_rate`
    ///
    /// # Errors
    ///
    /// Returns error if the resampler cannot be configured
    pub fn new(
        device_rate: u32,
        channels: u16,
        frame_size: usize,
        sink: mpsc::UnboundedSender<EncodedChunk>,
    ) -> Result<Self> {
        Ok(Self {
            channels: usize::from(channels.max(1)),
            frame: Vec::with_capacity(frame_size),
            frame_size,
            resampler: StreamResampler::new(device_rate, SAMPLE_RATE, frame_size)?,
            mime_type: pcm_media_type(SAMPLE_RATE),
            sink,
        })
    }

    /// Feed interleaved device samples
    ///
    /// Returns the number of chunks emitted. Stops emitting once the receiver
    /// is gone.
    #[allow(clippy::cast_precision_loss)]
    pub fn push_samples(&mut self, data: &[f32]) -> usize {
        let mut emitted = 0;

        for frame in data.chunks(self.channels) {
            let mono = frame.iter().sum::<f32>() / frame.len() as f32;
            self.frame.push(mono);

            if self.frame.len() == self.frame_size {
                if self.flush_frame() {
                    emitted += 1;
                }
                self.frame.clear();
            }
        }

        emitted
    }

    /// Samples waiting for the current frame to fill
    #[must_use]
    pub fn pending(&self) -> usize {
        self.frame.len()
    }

    fn flush_frame(&mut self) -> bool {
        let samples = match self.resampler.process_frame(&self.frame) {
            Ok(samples) => samples,
            Err(e) => {
                tracing::warn!(error = %e, "dropping capture frame");
                return false;
            }
        };

        let chunk = EncodedChunk {
            rms: compute_rms(&samples),
            data: encode_pcm16(&samples),
            mime_type: self.mime_type.clone(),
        };

        self.sink.send(chunk).is_ok()
    }
}

/// Live microphone stream
pub trait CaptureDevice {
    /// Stop capturing and release the device
    ///
    /// # Errors
    ///
    /// Returns error if the device refuses to pause
    fn stop(&mut self) -> Result<()>;
}

/// Captures audio from the default input device
pub struct MicrophoneCapture {
    stream: Option<Stream>,
}

impl MicrophoneCapture {
    /// Acquire the default input device and start streaming frames into `sink`
    ///
    /// Prefers a native 16kHz config; otherwise the device default is used and
    /// resampled.
    ///
    /// # Errors
    ///
    /// Returns `Error::Device` if no input device exists or the stream cannot be
    /// built, `Error::Permission` if the host denies access
    pub fn start(frame_size: usize, sink: mpsc::UnboundedSender<EncodedChunk>) -> Result<Self> {
        let host = cpal::default_host();

        let device = host
            .default_input_device()
            .ok_or_else(|| Error::Device("no input device available".to_string()))?;

        let config = input_config(&device)?;

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate = config.sample_rate.0,
            channels = config.channels,
            "audio capture initialized"
        );

        let mut pipeline =
            CapturePipeline::new(config.sample_rate.0, config.channels, frame_size, sink)?;

        let stream = device
            .build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    pipeline.push_samples(data);
                },
                |err| {
                    tracing::error!(error = %err, "audio capture error");
                },
                None,
            )
            .map_err(build_error)?;

        stream.play().map_err(play_error)?;

        tracing::debug!("audio capture started");
        Ok(Self {
            stream: Some(stream),
        })
    }

    /// Check if currently capturing
    #[must_use]
    pub const fn is_capturing(&self) -> bool {
        self.stream.is_some()
    }
}

impl CaptureDevice for MicrophoneCapture {
    fn stop(&mut self) -> Result<()> {
        if let Some(stream) = self.stream.take() {
            let paused = stream.pause().map_err(|e| Error::Device(e.to_string()));
            drop(stream);
            tracing::debug!("audio capture stopped");
            paused?;
        }
        Ok(())
    }
}

impl Drop for MicrophoneCapture {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

fn input_config(device: &Device) -> Result<StreamConfig> {
    let native = device
        .supported_input_configs()
        .map_err(|e| Error::Device(e.to_string()))?
        .find(|c| {
            c.channels() == 1
                && c.sample_format() == cpal::SampleFormat::F32
                && c.min_sample_rate() <= SampleRate(SAMPLE_RATE)
                && c.max_sample_rate() >= SampleRate(SAMPLE_RATE)
        });

    if let Some(supported) = native {
        return Ok(supported.with_sample_rate(SampleRate(SAMPLE_RATE)).config());
    }

    let fallback = device
        .default_input_config()
        .map_err(|e| Error::Device(e.to_string()))?;

    if fallback.sample_format() != cpal::SampleFormat::F32 {
        return Err(Error::Device(format!(
            "unsupported input sample format {:?}",
            fallback.sample_format()
        )));
    }

    Ok(fallback.config())
}

fn build_error(err: cpal::BuildStreamError) -> Error {
    match err {
        cpal::BuildStreamError::DeviceNotAvailable => {
            Error::Permission("input device not available".to_string())
        }
        other => Error::Device(other.to_string()),
    }
}

fn play_error(err: cpal::PlayStreamError) -> Error {
    match err {
        cpal::PlayStreamError::DeviceNotAvailable => {
            Error::Permission("input device not available".to_string())
        }
        other => Error::Device(other.to_string()),
    }
}

/// Write mono samples as a 16-bit WAV file image
///
/// Uses the same sample scaling as the outbound wire format.
///
/// # Errors
///
/// Returns error if WAV encoding fails
#[allow(clippy::cast_possible_truncation)]
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
            writer
                .write_sample((sample * 32768.0) as i16)
                .map_err(|e| Error::Audio(e.to_string()))?;
        }

        writer.finalize().map_err(|e| Error::Audio(e.to_string()))?;
    }

    Ok(cursor.into_inner())
}
