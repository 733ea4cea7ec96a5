//! Bounded, time-ordered buffer of the most recent frames.
//!
//! The buffer keeps at most `capacity` frames and evicts the oldest first.
//! Sentinel frames (no valid gaze) are stored like any other frame; the
//! queries skip them.

use crate::tracker::types::Frame;
use std::collections::VecDeque;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

/// Ring of the most recent frames, oldest first.
#[derive(Debug, Clone)]
pub struct FrameBuffer {
    capacity: usize,
    frames: VecDeque<Frame>,
}

impl FrameBuffer {
    /// Create an empty buffer. A zero capacity is raised to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            frames: VecDeque::with_capacity(capacity),
        }
    }

    /// Number of frames needed to cover `retention` when the tracker
    /// delivers `frame_rate` frames per second (retention divided by the
    /// frame interval), rounded up.
    pub fn capacity_for(retention: Duration, frame_rate: f64) -> usize {
        if !(frame_rate.is_finite() && frame_rate > 0.0) {
            return 1;
        }
        let frames = (retention.as_secs_f64() * frame_rate).ceil();
        (frames as usize).max(1)
    }

    /// Append a frame, returning the evicted one when full.
    pub fn push(&mut self, frame: Frame) -> Option<Frame> {
        let evicted = if self.frames.len() >= self.capacity {
            self.frames.pop_front()
        } else {
            None
        };
        self.frames.push_back(frame);
        evicted
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Frame> {
        self.frames.iter()
    }

    /// Copy of the current contents in chronological order.
    pub fn to_vec(&self) -> Vec<Frame> {
        self.frames.iter().cloned().collect()
    }
}

impl Extend<Frame> for FrameBuffer {
    fn extend<I: IntoIterator<Item = Frame>>(&mut self, iter: I) {
        for frame in iter {
            self.push(frame);
        }
    }
}

/// Buffer shared between the ingestion task (sole writer) and queries.
///
/// Append and evict happen under one write lock, so a reader always sees
/// a complete state.
#[derive(Debug, Clone)]
pub struct SharedFrameBuffer {
    inner: Arc<RwLock<FrameBuffer>>,
}

impl SharedFrameBuffer {
    pub fn new(capacity: usize) -> Self {
        Self::from(FrameBuffer::new(capacity))
    }

    pub(crate) fn push(&self, frame: Frame) -> Option<Frame> {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(frame)
    }

    /// Snapshot-consistent copy of the buffered frames, oldest first.
    pub fn snapshot(&self) -> Vec<Frame> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .to_vec()
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .capacity()
    }
}

impl From<FrameBuffer> for SharedFrameBuffer {
    fn from(buffer: FrameBuffer) -> Self {
        Self {
            inner: Arc::new(RwLock::new(buffer)),
        }
    }
}
