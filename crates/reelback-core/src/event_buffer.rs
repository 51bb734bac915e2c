//! Segment event buffer
//!
//! Accumulates recording frames in append order until the flush scheduler
//! decides to ship them. Draining takes the whole sequence atomically (it is
//! a move, so there is never a second winner for the same frames) and tags
//! the payload with the session's current segment id. The buffer itself
//! knows nothing about segments advancing; that happens in the container,
//! and only after a successful send.
//!
//! Unpromoted buffer-mode sessions retain only a trailing window of history;
//! [`EventBuffer::trim_older_than`] is the eviction half of that rule.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::frame::{RecordingFrame, SegmentPayload};

/// Lifetime counters exposed for diagnostics.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct BufferStats {
    /// Frames ever appended.
    pub appended_total: u64,
    /// Frames handed off through [`EventBuffer::drain`].
    pub drained_total: u64,
    /// Number of drains performed.
    pub drains: u64,
    /// Frames evicted by retention trimming or discarded by clears.
    pub evicted_total: u64,
}

/// Ordered frame accumulator for the current segment.
#[derive(Debug, Default)]
pub struct EventBuffer {
    frames: VecDeque<RecordingFrame>,
    stats: BufferStats,
}

impl EventBuffer {
    /// Empty buffer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a frame. O(1) amortized, never blocks.
    pub fn append(&mut self, frame: RecordingFrame) {
        self.frames.push_back(frame);
        self.stats.appended_total += 1;
    }

    /// Whether any frames are buffered.
    #[must_use]
    pub fn has_events(&self) -> bool {
        !self.frames.is_empty()
    }

    /// Buffered frame count.
    #[must_use]
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// Whether the buffer is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Take the buffered sequence, reset to empty, and return it as the
    /// payload for `segment_id`.
    pub fn drain(&mut self, segment_id: u32) -> SegmentPayload {
        let events: Vec<RecordingFrame> = std::mem::take(&mut self.frames).into();
        self.stats.drained_total += events.len() as u64;
        self.stats.drains += 1;
        SegmentPayload { segment_id, events }
    }

    /// Evict frames captured before `cutoff_ms` from the front of the
    /// buffer. Returns how many were evicted. Frames arrive in append order,
    /// so eviction stops at the first frame inside the window.
    pub fn trim_older_than(&mut self, cutoff_ms: u64) -> usize {
        let mut evicted = 0;
        while let Some(front) = self.frames.front() {
            if front.timestamp() >= cutoff_ms {
                break;
            }
            self.frames.pop_front();
            evicted += 1;
        }
        self.stats.evicted_total += evicted as u64;
        evicted
    }

    /// Discard everything, counting the drop as eviction. Used when a
    /// session is replaced and its unshipped frames no longer belong to
    /// anything.
    pub fn clear(&mut self) -> usize {
        let dropped = self.frames.len();
        self.frames.clear();
        self.stats.evicted_total += dropped as u64;
        dropped
    }

    /// Lifetime counters.
    #[must_use]
    pub fn stats(&self) -> BufferStats {
        self.stats
    }
}
