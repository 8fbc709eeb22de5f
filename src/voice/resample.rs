//! Sample rate conversion using rubato

use rubato::{FftFixedIn, Resampler};

use crate::{Error, Result};

/// Input chunk size for the playback resampler (20 ms at 24 kHz)
const FRAGMENT_CHUNK: usize = 480;

/// Upper bound on zero chunks fed while flushing
const MAX_FLUSH_ROUNDS: usize = 64;

/// Fixed-ratio resampler for the capture path
///
/// Built once when the input device is acquired. Every call consumes exactly
/// one frame of `frame_size` samples at the device rate, so the filter state
/// carries across frames and no drift accumulates.
pub struct StreamResampler {
    inner: Option<FftFixedIn<f32>>,
    frame_size: usize,
    from_rate: u32,
    to_rate: u32,
}

impl StreamResampler {
    /// Create a resampler from the device rate to the target rate
    ///
    /// # Errors
    ///
    /// Returns error if rubato rejects the rate pair
    pub fn new(from_rate: u32, to_rate: u32, frame_size: usize) -> Result<Self> {
        let inner = if from_rate == to_rate {
            None
        } else {
            let resampler =
                FftFixedIn::<f32>::new(from_rate as usize, to_rate as usize, frame_size, 2, 1)
                    .map_err(|e| Error::Audio(format!("resampler init failed: {e}")))?;
            Some(resampler)
        };

        tracing::debug!(from_rate, to_rate, frame_size, "capture resampler configured");

        Ok(Self {
            inner,
            frame_size,
            from_rate,
            to_rate,
        })
    }

    /// Whether frames pass through unchanged
    #[must_use]
    pub const fn is_passthrough(&self) -> bool {
        self.inner.is_none()
    }

    /// Device-side sample rate
    #[must_use]
    pub const fn from_rate(&self) -> u32 {
        self.from_rate
    }

    /// Output sample rate
    #[must_use]
    pub const fn to_rate(&self) -> u32 {
        self.to_rate
    }

    /// Convert one frame
    ///
    /// # Errors
    ///
    /// Returns error if the frame length differs from the configured frame size
    /// or rubato fails
    pub fn process_frame(&mut self, frame: &[f32]) -> Result<Vec<f32>> {
        if frame.len() != self.frame_size {
            return Err(Error::Audio(format!(
                "expected frame of {} samples, got {}",
                self.frame_size,
                frame.len()
            )));
        }

        let Some(resampler) = self.inner.as_mut() else {
            return Ok(frame.to_vec());
        };

        let mut output = resampler
            .process(&[frame], None)
            .map_err(|e| Error::Audio(format!("resample failed: {e}")))?;

        Ok(output.pop().unwrap_or_default())
    }
}

/// Streaming resampler for inbound fragments on the playback path
///
/// Fragments arrive in arbitrary lengths. Input is queued until the resampler
/// can take a whole chunk, and the filter state carries from one fragment to
/// the next, so consecutive fragments join without a discontinuity. Samples
/// still queued at the end of a turn are released by [`flush`](Self::flush).
pub struct FragmentResampler {
    inner: FftFixedIn<f32>,
    from_rate: u32,
    to_rate: u32,
    queued: Vec<f32>,
    /// Leading output samples that are filter latency, not signal
    skip: usize,
    consumed: u64,
    emitted: u64,
}

impl FragmentResampler {
    /// Create a resampler between two rates
    ///
    /// # Errors
    ///
    /// Returns error if rubato rejects the rate pair
    pub fn new(from_rate: u32, to_rate: u32) -> Result<Self> {
        let inner = Self::build(from_rate, to_rate)?;
        let skip = inner.output_delay();

        tracing::debug!(from_rate, to_rate, "playback resampler configured");

        Ok(Self {
            inner,
            from_rate,
            to_rate,
            queued: Vec::new(),
            skip,
            consumed: 0,
            emitted: 0,
        })
    }

    fn build(from_rate: u32, to_rate: u32) -> Result<FftFixedIn<f32>> {
        FftFixedIn::<f32>::new(from_rate as usize, to_rate as usize, FRAGMENT_CHUNK, 2, 1)
            .map_err(|e| Error::Audio(format!("resampler init failed: {e}")))
    }

    /// Input sample rate
    #[must_use]
    pub const fn from_rate(&self) -> u32 {
        self.from_rate
    }

    /// Output sample rate
    #[must_use]
    pub const fn to_rate(&self) -> u32 {
        self.to_rate
    }

    /// Convert one fragment, returning whatever output is ready
    ///
    /// # Errors
    ///
    /// Returns error if rubato fails
    pub fn push(&mut self, fragment: &[f32]) -> Result<Vec<f32>> {
        self.queued.extend_from_slice(fragment);
        self.consumed += fragment.len() as u64;

        let mut output = Vec::new();
        loop {
            let needed = self.inner.input_frames_next();
            if self.queued.len() < needed {
                break;
            }
            let chunk: Vec<f32> = self.queued.drain(..needed).collect();
            self.process_chunk(&chunk, &mut output)?;
        }

        Ok(output)
    }

    /// Release the queued tail and the filter latency, then start over
    ///
    /// # Errors
    ///
    /// Returns error if rubato fails
    #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
    pub fn flush(&mut self) -> Result<Vec<f32>> {
        let expected =
            (self.consumed as f64 * f64::from(self.to_rate) / f64::from(self.from_rate)).round()
                as u64;

        let mut output = Vec::new();
        let mut rounds = 0;
        while self.emitted < expected && rounds < MAX_FLUSH_ROUNDS {
            let needed = self.inner.input_frames_next();
            let mut chunk = std::mem::take(&mut self.queued);
            chunk.resize(needed, 0.0);
            self.process_chunk(&chunk, &mut output)?;
            rounds += 1;
        }

        let surplus = usize::try_from(self.emitted.saturating_sub(expected)).unwrap_or(0);
        output.truncate(output.len().saturating_sub(surplus));

        self.reset()?;
        Ok(output)
    }

    /// Drop queued input and filter state
    ///
    /// # Errors
    ///
    /// Returns error if the resampler cannot be rebuilt
    pub fn reset(&mut self) -> Result<()> {
        self.inner = Self::build(self.from_rate, self.to_rate)?;
        self.skip = self.inner.output_delay();
        self.queued.clear();
        self.consumed = 0;
        self.emitted = 0;
        Ok(())
    }

    fn process_chunk(&mut self, chunk: &[f32], output: &mut Vec<f32>) -> Result<()> {
        let mut result = self
            .inner
            .process(&[chunk], None)
            .map_err(|e| Error::Audio(format!("resample failed: {e}")))?;
        let produced = result.pop().unwrap_or_default();

        let skipped = self.skip.min(produced.len());
        self.skip -= skipped;
        self.emitted += (produced.len() - skipped) as u64;
        output.extend_from_slice(&produced[skipped..]);
        Ok(())
    }
}
