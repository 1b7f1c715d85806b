use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

/// Rolling store of the most recent mono samples, capped at two seconds of
/// audio. Older samples are dropped from the front once the cap is exceeded.
#[derive(Debug)]
pub struct SampleBuffer {
    samples: VecDeque<f32>,
    capacity: usize,
    /// Samples appended over the buffer's lifetime. Never decreases.
    written: u64,
}

impl SampleBuffer {
    pub fn new(sample_rate: u32) -> Self {
        let capacity = sample_rate as usize * 2;
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
            written: 0,
        }
    }

    pub fn append(&mut self, block: &[f32]) {
        self.written += block.len() as u64;

        // A block larger than the cap only contributes its tail.
        let block = if block.len() > self.capacity {
            &block[block.len() - self.capacity..]
        } else {
            block
        };

        self.samples.extend(block.iter().copied());

        let excess = self.samples.len().saturating_sub(self.capacity);
        if excess > 0 {
            self.samples.drain(..excess);
        }
    }

    /// The most recent `n` samples, oldest first.
    pub fn snapshot(&self, n: usize) -> Option<Vec<f32>> {
        if n == 0 || self.samples.len() < n {
            return None;
        }
        let start = self.samples.len() - n;
        Some(self.samples.range(start..).copied().collect())
    }

    /// The oldest `n` samples, oldest first.
    pub fn front(&self, n: usize) -> Option<Vec<f32>> {
        if n == 0 || self.samples.len() < n {
            return None;
        }
        Some(self.samples.range(..n).copied().collect())
    }

    pub fn consume_front(&mut self, n: usize) {
        let n = n.min(self.samples.len());
        self.samples.drain(..n);
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn written(&self) -> u64 {
        self.written
    }
}

/// `SampleBuffer` behind a mutex, shared between the capture callback, the
/// analysis worker and the engine. The lock is held only for the duration of
/// a single append/snapshot/consume call.
#[derive(Debug, Clone)]
pub struct SharedSampleBuffer {
    inner: Arc<Mutex<SampleBuffer>>,
}

impl SharedSampleBuffer {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            inner: Arc::new(Mutex::new(SampleBuffer::new(sample_rate))),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SampleBuffer> {
        // A panicked writer leaves plain sample data behind; keep using it.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn append(&self, block: &[f32]) {
        self.lock().append(block);
    }

    pub fn snapshot(&self, n: usize) -> Option<Vec<f32>> {
        self.lock().snapshot(n)
    }

    /// Like `snapshot`, paired with the `written` count it was taken at so
    /// readers can tell a fresh window from one they already saw.
    pub fn snapshot_marked(&self, n: usize) -> Option<(Vec<f32>, u64)> {
        let buffer = self.lock();
        buffer.snapshot(n).map(|window| (window, buffer.written()))
    }

    /// Copies the oldest `window` samples and drops `hop` of them in one
    /// critical section.
    pub fn take_window(&self, window: usize, hop: usize) -> Option<Vec<f32>> {
        let mut buffer = self.lock();
        let frame = buffer.front(window)?;
        buffer.consume_front(hop);
        Some(frame)
    }

    pub fn consume_front(&self, n: usize) {
        self.lock().consume_front(n);
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.lock().capacity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_never_exceeds_two_seconds() {
        let mut buffer = SampleBuffer::new(1000);
        for len in [10, 700, 1500, 3, 4000, 1] {
            buffer.append(&vec![0.5; len]);
            assert!(buffer.len() <= 2000, "len {} after block {}", buffer.len(), len);
        }
        assert_eq!(buffer.len(), 2000);
    }

    #[test]
    fn overflow_drops_oldest_samples() {
        let mut buffer = SampleBuffer::new(2);
        buffer.append(&[1.0, 2.0, 3.0]);
        buffer.append(&[4.0, 5.0]);
        assert_eq!(buffer.snapshot(4), Some(vec![2.0, 3.0, 4.0, 5.0]));
    }

    #[test]
    fn snapshot_requires_enough_samples_and_does_not_mutate() {
        let mut buffer = SampleBuffer::new(100);
        buffer.append(&[0.1, 0.2, 0.3]);
        assert_eq!(buffer.snapshot(4), None);
        assert_eq!(buffer.snapshot(2), Some(vec![0.2, 0.3]));
        assert_eq!(buffer.len(), 3);
    }

    #[test]
    fn take_window_reads_front_and_advances_by_hop() {
        let shared = SharedSampleBuffer::new(100);
        shared.append(&[1.0, 2.0, 3.0, 4.0, 5.0]);
        assert_eq!(shared.take_window(4, 2), Some(vec![1.0, 2.0, 3.0, 4.0]));
        assert_eq!(shared.len(), 3);
        assert_eq!(shared.take_window(4, 2), None);
        assert_eq!(shared.len(), 3);
    }

    #[test]
    fn written_count_survives_clear_and_consume() {
        let shared = SharedSampleBuffer::new(2);
        shared.append(&[1.0, 2.0, 3.0]);
        assert_eq!(shared.snapshot_marked(2), Some((vec![2.0, 3.0], 3)));

        shared.consume_front(1);
        shared.clear();
        shared.append(&[4.0, 5.0]);
        assert_eq!(shared.snapshot_marked(2), Some((vec![4.0, 5.0], 5)));
    }

    #[test]
    fn consume_front_tolerates_oversized_requests() {
        let mut buffer = SampleBuffer::new(100);
        buffer.append(&[1.0, 2.0]);
        buffer.consume_front(10);
        assert!(buffer.is_empty());
    }
}
