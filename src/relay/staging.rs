//! Outbound staging queue.
//!
//! Holds client frames while the peer is not ready to receive them. The
//! queue is drained in arrival order once per transition into the
//! deliverable state, and emptied without replay when the live connection
//! drops, since that traffic targets a session the restarted peer no longer
//! has.

use std::collections::VecDeque;

use tracing::warn;

use super::codec::Frame;

/// Bounded FIFO of outbound frames awaiting a deliverable connection.
#[derive(Debug)]
pub struct StagingQueue {
    frames: VecDeque<Frame>,
    capacity: usize,
}

impl StagingQueue {
    /// Create an empty queue holding at most `capacity` frames.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            frames: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    /// Append a frame; when full, the oldest frame is evicted and returned.
    pub fn push(&mut self, frame: Frame) -> Option<Frame> {
        let evicted = if self.frames.len() >= self.capacity {
            let oldest = self.frames.pop_front();
            warn!(
                capacity = self.capacity,
                "staging: queue full, dropping oldest outbound frame"
            );
            oldest
        } else {
            None
        };
        self.frames.push_back(frame);
        evicted
    }

    /// Take every queued frame in arrival order, leaving the queue empty.
    pub fn drain(&mut self) -> Vec<Frame> {
        std::mem::take(&mut self.frames).into()
    }

    /// Replace the contents with an empty queue, returning how many frames
    /// were discarded.
    pub fn clear(&mut self) -> usize {
        let discarded = self.frames.len();
        self.frames = VecDeque::new();
        discarded
    }

    /// Number of frames waiting.
    #[must_use]
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// `true` when nothing is waiting.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Maximum number of frames held.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
