//! Audio playback to speakers
//!
//! The output timeline is a [`Mixer`] shared with the cpal output callback.
//! Its clock is the number of frames rendered so far, so scheduled start times
//! are sample-accurate and consecutive buffers join without a gap.

use std::sync::{Arc, Mutex};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleRate, Stream, StreamConfig};
use tokio::sync::mpsc;

use super::scheduler::{BufferId, ScheduledBuffer};
use crate::{Error, Result};

/// Sample rate for playback (matches the remote service's audio output)
pub const PLAYBACK_SAMPLE_RATE: u32 = 24000;

/// Signals from the output timeline back to the session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackEvent {
    /// A buffer played to completion
    Ended(BufferId),
}

/// Output side of the audio pipeline
pub trait PlaybackOutput {
    /// Device sample rate buffers must be converted to
    fn sample_rate(&self) -> u32;

    /// Current position of the output clock in seconds
    fn current_time(&self) -> f64;

    /// Queue samples to begin at `buffer.start`
    ///
    /// Returns the start time actually used, in seconds. It is later than
    /// `buffer.start` when the clock has already moved past that point.
    ///
    /// # Errors
    ///
    /// Returns error if the output timeline is unusable
    fn start(&mut self, buffer: &ScheduledBuffer, samples: Vec<f32>) -> Result<f64>;

    /// Silence a buffer immediately, without an end signal
    ///
    /// # Errors
    ///
    /// Returns error if the output timeline is unusable
    fn stop(&mut self, id: BufferId) -> Result<()>;

    /// Release the output device
    ///
    /// # Errors
    ///
    /// Returns error if the device refuses to pause
    fn close(&mut self) -> Result<()>;
}

struct Source {
    id: BufferId,
    start_frame: u64,
    samples: Vec<f32>,
}

impl Source {
    fn end_frame(&self) -> u64 {
        self.start_frame + self.samples.len() as u64
    }
}

/// Sample-accurate render of scheduled sources
pub struct Mixer {
    sample_rate: u32,
    position: u64,
    sources: Vec<Source>,
    events: mpsc::UnboundedSender<PlaybackEvent>,
}

impl Mixer {
    /// Create an empty timeline at `sample_rate`
    #[must_use]
    pub const fn new(sample_rate: u32, events: mpsc::UnboundedSender<PlaybackEvent>) -> Self {
        Self {
            sample_rate,
            position: 0,
            sources: Vec::new(),
            events,
        }
    }

    /// Seconds rendered so far
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn current_time(&self) -> f64 {
        self.position as f64 / f64::from(self.sample_rate)
    }

    /// Frames rendered so far
    #[must_use]
    pub const fn position(&self) -> u64 {
        self.position
    }

    /// Add a source starting at `start` seconds
    ///
    /// A start time already in the past begins at the next rendered frame.
    /// Returns the start time the source was placed at.
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    pub fn add(&mut self, id: BufferId, start: f64, samples: Vec<f32>) -> f64 {
        let requested = (start.max(0.0) * f64::from(self.sample_rate)).round() as u64;
        let start_frame = requested.max(self.position);
        self.sources.push(Source {
            id,
            start_frame,
            samples,
        });
        start_frame as f64 / f64::from(self.sample_rate)
    }

    /// Remove a source; returns whether it was present
    pub fn remove(&mut self, id: BufferId) -> bool {
        let before = self.sources.len();
        self.sources.retain(|s| s.id != id);
        self.sources.len() != before
    }

    /// Remove every source
    pub fn clear(&mut self) {
        self.sources.clear();
    }

    /// Number of sources queued or playing
    #[must_use]
    pub fn active(&self) -> usize {
        self.sources.len()
    }

    /// Fill an interleaved output buffer and advance the clock
    ///
    /// Every channel of a frame receives the same mono value. Sources that end
    /// within this block report [`PlaybackEvent::Ended`].
    pub fn render(&mut self, out: &mut [f32], channels: usize) {
        let channels = channels.max(1);
        let mut frames = 0_u64;

        for (i, frame) in out.chunks_mut(channels).enumerate() {
            let t = self.position + i as u64;
            let mut value = 0.0;
            for source in &self.sources {
                if t >= source.start_frame {
                    if let Some(sample) = usize::try_from(t - source.start_frame)
                        .ok()
                        .and_then(|offset| source.samples.get(offset))
                    {
                        value += sample;
                    }
                }
            }
            frame.fill(value);
            frames += 1;
        }

        self.position += frames;

        let position = self.position;
        let events = &self.events;
        self.sources.retain(|source| {
            let done = source.end_frame() <= position;
            if done {
                let _ = events.send(PlaybackEvent::Ended(source.id));
            }
            !done
        });
    }
}

/// Plays scheduled buffers on the default output device
pub struct SpeakerOutput {
    mixer: Arc<Mutex<Mixer>>,
    sample_rate: u32,
    stream: Option<Stream>,
}

impl SpeakerOutput {
    /// Open the default output device and start the timeline clock
    ///
    /// # Errors
    ///
    /// Returns `Error::Device` if no output device is available or the stream
    /// cannot be started
    pub fn start(events: mpsc::UnboundedSender<PlaybackEvent>) -> Result<Self> {
        let host = cpal::default_host();

        let device = host
            .default_output_device()
            .ok_or_else(|| Error::Device("no output device available".to_string()))?;

        let config = output_config(&device)?;
        let sample_rate = config.sample_rate.0;
        let channels = usize::from(config.channels);

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate,
            channels,
            "audio playback initialized"
        );

        let mixer = Arc::new(Mutex::new(Mixer::new(sample_rate, events)));
        let callback_mixer = Arc::clone(&mixer);

        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    if let Ok(mut mixer) = callback_mixer.try_lock() {
                        mixer.render(data, channels);
                    } else {
                        data.fill(0.0);
                    }
                },
                |err| {
                    tracing::error!(error = %err, "audio playback error");
                },
                None,
            )
            .map_err(|e| Error::Device(e.to_string()))?;

        stream.play().map_err(|e| Error::Device(e.to_string()))?;

        Ok(Self {
            mixer,
            sample_rate,
            stream: Some(stream),
        })
    }

    fn with_mixer<T>(&self, f: impl FnOnce(&mut Mixer) -> T) -> Result<T> {
        let mut mixer = self
            .mixer
            .lock()
            .map_err(|_| Error::Audio("playback mixer poisoned".to_string()))?;
        Ok(f(&mut mixer))
    }
}

impl PlaybackOutput for SpeakerOutput {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn current_time(&self) -> f64 {
        self.with_mixer(|m| m.current_time()).unwrap_or_default()
    }

    fn start(&mut self, buffer: &ScheduledBuffer, samples: Vec<f32>) -> Result<f64> {
        self.with_mixer(|m| m.add(buffer.id, buffer.start, samples))
    }

    fn stop(&mut self, id: BufferId) -> Result<()> {
        self.with_mixer(|m| {
            m.remove(id);
        })
    }

    fn close(&mut self) -> Result<()> {
        let cleared = self.with_mixer(Mixer::clear);
        if let Some(stream) = self.stream.take() {
            let paused = stream.pause().map_err(|e| Error::Device(e.to_string()));
            drop(stream);
            tracing::debug!("audio playback stopped");
            paused?;
        }
        cleared
    }
}

impl Drop for SpeakerOutput {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

fn output_config(device: &Device) -> Result<StreamConfig> {
    let matches_rate = |c: &cpal::SupportedStreamConfigRange, channels: u16| {
        c.channels() == channels
            && c.sample_format() == cpal::SampleFormat::F32
            && c.min_sample_rate() <= SampleRate(PLAYBACK_SAMPLE_RATE)
            && c.max_sample_rate() >= SampleRate(PLAYBACK_SAMPLE_RATE)
    };

    let supported = device
        .supported_output_configs()
        .map_err(|e| Error::Device(e.to_string()))?
        .find(|c| matches_rate(c, 1))
        .or_else(|| {
            // Fallback: try stereo
            device
                .supported_output_configs()
                .ok()?
                .find(|c| matches_rate(c, 2))
        });

    if let Some(supported) = supported {
        return Ok(supported
            .with_sample_rate(SampleRate(PLAYBACK_SAMPLE_RATE))
            .config());
    }

    // Fallback: device default rate, buffers get resampled before scheduling
    let fallback = device
        .default_output_config()
        .map_err(|e| Error::Device(e.to_string()))?;

    if fallback.sample_format() != cpal::SampleFormat::F32 {
        return Err(Error::Device(format!(
            "unsupported output sample format {:?}",
            fallback.sample_format()
        )));
    }

    Ok(fallback.config())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mixer(rate: u32) -> (Mixer, mpsc::UnboundedReceiver<PlaybackEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Mixer::new(rate, tx), rx)
    }

    #[test]
    fn back_to_back_sources_leave_no_gap() {
        let (mut mixer, mut events) = mixer(4);
        mixer.add(0, 0.0, vec![0.1; 4]);
        mixer.add(1, 1.0, vec![0.2; 3]);

        let mut out = vec![-1.0; 8];
        mixer.render(&mut out, 1);

        assert_eq!(out, vec![0.1, 0.1, 0.1, 0.1, 0.2, 0.2, 0.2, 0.0]);
        assert_eq!(events.try_recv().unwrap(), PlaybackEvent::Ended(0));
        assert_eq!(events.try_recv().unwrap(), PlaybackEvent::Ended(1));
        assert!(events.try_recv().is_err());
        assert_eq!(mixer.active(), 0);
    }

    #[test]
    fn end_reported_once_across_blocks() {
        let (mut mixer, mut events) = mixer(10);
        mixer.add(7, 0.0, vec![0.5; 5]);

        let mut out = vec![0.0; 3];
        mixer.render(&mut out, 1);
        assert!(events.try_recv().is_err());

        mixer.render(&mut out, 1);
        assert_eq!(events.try_recv().unwrap(), PlaybackEvent::Ended(7));

        mixer.render(&mut out, 1);
        assert!(events.try_recv().is_err());
        assert!((mixer.current_time() - 0.9).abs() < 1e-9);
    }

    #[test]
    fn fills_every_channel() {
        let (mut mixer, _events) = mixer(8);
        mixer.add(0, 0.0, vec![0.25, 0.5]);

        let mut out = vec![0.0; 4];
        mixer.render(&mut out, 2);
        assert_eq!(out, vec![0.25, 0.25, 0.5, 0.5]);
        assert_eq!(mixer.position(), 2);
    }

    #[test]
    fn past_start_plays_at_next_frame() {
        let (mut mixer, _events) = mixer(4);
        let mut out = vec![0.0; 4];
        mixer.render(&mut out, 1);

        let placed = mixer.add(0, 0.0, vec![0.3; 2]);
        assert!((placed - 1.0).abs() < 1e-9);

        mixer.render(&mut out, 1);
        assert_eq!(out, vec![0.3, 0.3, 0.0, 0.0]);
    }

    #[test]
    fn future_start_is_kept() {
        let (mut mixer, _events) = mixer(100);
        let mut out = vec![0.0; 10];
        mixer.render(&mut out, 1);

        let placed = mixer.add(0, 0.5, vec![0.3; 2]);
        assert!((placed - 0.5).abs() < 1e-9);
    }

    #[test]
    fn removed_source_is_silent_and_not_reported() {
        let (mut mixer, mut events) = mixer(4);
        mixer.add(3, 0.0, vec![0.9; 4]);
        assert!(mixer.remove(3));
        assert!(!mixer.remove(3));

        let mut out = vec![1.0; 4];
        mixer.render(&mut out, 1);
        assert_eq!(out, vec![0.0; 4]);
        assert!(events.try_recv().is_err());
    }
}
