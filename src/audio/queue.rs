//! Bounded frame hand-off between the capture callback and the consumer loop

use std::collections::VecDeque;
use std::sync::Mutex;

use super::frame::AudioFrame;

/// Bounded queue of captured frames.
///
/// The capture callback pushes, the pipeline's single consumer drains.
/// When the producer outruns the consumer the oldest frame is dropped so
/// memory stays bounded and the stream stays current.
#[derive(Debug)]
pub struct FrameQueue {
    frames: Mutex<VecDeque<AudioFrame>>,
    capacity: usize,
}

impl FrameQueue {
    /// Create a queue holding at most `capacity` frames
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            frames: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    /// Push a frame, dropping the oldest on overflow
    pub fn push(&self, frame: AudioFrame) {
        let Ok(mut frames) = self.frames.lock() else {
            return;
        };

        if frames.len() >= self.capacity {
            frames.pop_front();
            tracing::warn!(capacity = self.capacity, "frame queue full, dropping oldest frame");
        }
        frames.push_back(frame);
    }

    /// Drain all queued frames in capture order
    #[must_use]
    pub fn drain(&self) -> Vec<AudioFrame> {
        self.frames
            .lock()
            .map(|mut frames| frames.drain(..).collect())
            .unwrap_or_default()
    }

    /// Number of queued frames
    #[must_use]
    pub fn len(&self) -> usize {
        self.frames.lock().map(|f| f.len()).unwrap_or(0)
    }

    /// Whether the queue is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Discard all queued frames
    pub fn clear(&self) {
        if let Ok(mut frames) = self.frames.lock() {
            frames.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;

    fn frame(marker: f32) -> AudioFrame {
        AudioFrame::new(vec![marker; 4], 16000, Instant::now(), 1.0)
    }

    #[test]
    fn drains_in_capture_order() {
        let queue = FrameQueue::new(8);
        queue.push(frame(0.1));
        queue.push(frame(0.2));

        let drained = queue.drain();
        assert_eq!(drained.len(), 2);
        assert!((drained[0].samples()[0] - 0.1).abs() < f32::EPSILON);
        assert!((drained[1].samples()[0] - 0.2).abs() < f32::EPSILON);
        assert!(queue.is_empty());
    }

    #[test]
    fn overflow_drops_oldest() {
        let queue = FrameQueue::new(2);
        queue.push(frame(0.1));
        queue.push(frame(0.2));
        queue.push(frame(0.3));

        let drained = queue.drain();
        assert_eq!(drained.len(), 2);
        assert!((drained[0].samples()[0] - 0.2).abs() < f32::EPSILON);
        assert!((drained[1].samples()[0] - 0.3).abs() < f32::EPSILON);
    }
}
