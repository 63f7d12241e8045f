//! # VAD Adapter
//!
//! Bridges normalized audio into the segmentation engine's fixed-frame
//! contract and drains completed segments in FIFO order.
//!
//! Submitting frames never checks for completed segments; the ASR decode
//! loop drains the queue on its own schedule, so the ingestion rate and the
//! decode rate stay independent.

use super::{SegmentationEngine, SpeechSegment};

pub struct VadAdapter {
    engine: Box<dyn SegmentationEngine>,
    frame_size: usize,
    frames_submitted: u64,
}

impl VadAdapter {
    /// Wrap a freshly created engine. A zero frame size is treated as 1.
    pub fn new(engine: Box<dyn SegmentationEngine>, frame_size: usize) -> Self {
        Self {
            engine,
            frame_size: frame_size.max(1),
            frames_submitted: 0,
        }
    }

    /// Split `samples` into consecutive frames of the configured size and
    /// feed them to the engine. A final short frame is forwarded as-is.
    pub fn submit(&mut self, samples: &[f32]) {
        for frame in samples.chunks(self.frame_size) {
            self.engine.accept_frame(frame);
            self.frames_submitted += 1;
        }
    }

    /// True when at least one completed segment waits to be decoded.
    pub fn has_pending(&self) -> bool {
        !self.engine.is_empty()
    }

    /// Remove and return the oldest undecoded segment.
    pub fn pop_next(&mut self) -> Option<SpeechSegment> {
        let segment = self.engine.front()?.clone();
        self.engine.pop();
        Some(segment)
    }

    pub fn frames_submitted(&self) -> u64 {
        self.frames_submitted
    }

    pub fn engine_name(&self) -> &'static str {
        self.engine.name()
    }
}
