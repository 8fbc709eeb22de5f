//! Gapless playback scheduling on a shared output timeline
//!
//! Each inbound buffer starts at `max(now, next_start)`, and the cursor then
//! advances by the buffer's duration. Buffers that arrive ahead of their slot
//! queue back-to-back with no gap or overlap; a buffer that arrives late starts
//! immediately, leaving an audible but harmless gap.

use std::collections::BTreeMap;

/// Identifier of a scheduled buffer
pub type BufferId = u64;

/// Placement of one buffer on the output timeline
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledBuffer {
    /// Buffer identifier, unique for the scheduler's lifetime
    pub id: BufferId,
    /// Start time in seconds on the output clock
    pub start: f64,
    /// Duration in seconds
    pub duration: f64,
}

impl ScheduledBuffer {
    /// End time in seconds on the output clock
    #[must_use]
    pub fn end(&self) -> f64 {
        self.start + self.duration
    }
}

/// Tracks the playback cursor and the set of live buffers
#[derive(Debug, Default)]
pub struct PlaybackScheduler {
    next_start: f64,
    next_id: BufferId,
    live: BTreeMap<BufferId, ScheduledBuffer>,
}

impl PlaybackScheduler {
    /// Create an empty scheduler
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve a slot for a buffer of `duration` seconds given the current output time
    pub fn schedule(&mut self, now: f64, duration: f64) -> ScheduledBuffer {
        let start = now.max(self.next_start);
        let buffer = ScheduledBuffer {
            id: self.next_id,
            start,
            duration: duration.max(0.0),
        };

        self.next_id += 1;
        self.next_start = buffer.end();
        self.live.insert(buffer.id, buffer);

        tracing::trace!(
            id = buffer.id,
            start = buffer.start,
            duration = buffer.duration,
            "scheduled playback buffer"
        );

        buffer
    }

    /// Record where the output actually placed a buffer
    ///
    /// The clock keeps running between [`schedule`](Self::schedule) and the
    /// moment the output takes the samples, so a buffer can land later than
    /// its slot. The buffer moves to `actual_start` and the cursor advances to
    /// its real end, keeping the next buffer from overlapping it. Returns the
    /// updated placement, or `None` for an unknown id.
    pub fn settle(&mut self, id: BufferId, actual_start: f64) -> Option<ScheduledBuffer> {
        let buffer = self.live.get_mut(&id)?;
        if actual_start > buffer.start {
            tracing::trace!(
                id,
                slot = buffer.start,
                actual_start,
                "playback buffer placed late"
            );
            buffer.start = actual_start;
            self.next_start = self.next_start.max(buffer.end());
        }
        Some(*buffer)
    }

    /// Record that a buffer finished playing
    ///
    /// Returns `true` when this was the last live buffer. Unknown ids (already
    /// stopped or finished) return `false`.
    pub fn finish(&mut self, id: BufferId) -> bool {
        self.live.remove(&id).is_some() && self.live.is_empty()
    }

    /// Remove every live buffer and rewind the cursor
    ///
    /// Returns the ids that were still live so their sources can be stopped.
    pub fn drain(&mut self) -> Vec<BufferId> {
        self.next_start = 0.0;
        std::mem::take(&mut self.live).into_keys().collect()
    }

    /// Start time for the next buffer if it arrives before the cursor
    #[must_use]
    pub const fn next_start(&self) -> f64 {
        self.next_start
    }

    /// Whether any buffer is scheduled or playing
    #[must_use]
    pub fn is_playing(&self) -> bool {
        !self.live.is_empty()
    }

    /// Number of live buffers
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.live.len()
    }
}
