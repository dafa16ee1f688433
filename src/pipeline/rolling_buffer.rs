//! Fixed-capacity rolling window over the captured audio.

/// Channel-interleaved sample accumulator that always holds exactly
/// `capacity` frames, newest at the tail.
///
/// Backed by a circular store so [`push`](Self::push) costs O(chunk) rather
/// than copying the whole window. The store is zero-filled on creation, so
/// the window is full-length from the first block on.
///
/// ```
/// use vocal_stream::RollingBuffer;
///
/// let mut buffer = RollingBuffer::new(4, 2);
/// buffer.push(&[1.0, -1.0, 2.0, -2.0]);
///
/// let mut window = vec![0.0; 8];
/// buffer.window_into(&mut window);
/// assert_eq!(window, [0.0, 0.0, 0.0, 0.0, 1.0, -1.0, 2.0, -2.0]);
/// ```
#[derive(Debug, Clone)]
pub struct RollingBuffer {
    data: Vec<f32>,
    capacity: usize,
    channels: usize,
    /// Frame index of the oldest frame; also where the next frame is written.
    head: usize,
}

impl RollingBuffer {
    /// Creates a zero-filled buffer of `capacity` frames.
    pub fn new(capacity: usize, channels: u16) -> Self {
        let channels = usize::from(channels.max(1));
        Self {
            data: vec![0.0; capacity * channels],
            capacity,
            channels,
            head: 0,
        }
    }

    /// Window length in frames.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of frames held. Always equal to [`capacity`](Self::capacity).
    pub fn len(&self) -> usize {
        self.capacity
    }

    /// Returns `true` only for a zero-capacity buffer.
    pub fn is_empty(&self) -> bool {
        self.capacity == 0
    }

    /// Interleaved channel count.
    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Appends an interleaved chunk, discarding the oldest frames.
    ///
    /// The chunk length must be a multiple of the channel count. In release
    /// builds a trailing partial frame is ignored.
    pub fn push(&mut self, chunk: &[f32]) {
        debug_assert_eq!(
            chunk.len() % self.channels,
            0,
            "chunk is not a whole number of {}-channel frames",
            self.channels
        );
        if self.capacity == 0 {
            return;
        }

        let frames = chunk.len() / self.channels;
        // Only the newest `capacity` frames of an oversized chunk survive.
        let skip = frames.saturating_sub(self.capacity);
        let kept = &chunk[skip * self.channels..frames * self.channels];
        let kept_frames = frames - skip;

        let first = kept_frames.min(self.capacity - self.head);
        let split = first * self.channels;
        let start = self.head * self.channels;
        self.data[start..start + split].copy_from_slice(&kept[..split]);
        self.data[..kept.len() - split].copy_from_slice(&kept[split..]);

        self.head = (self.head + kept_frames) % self.capacity;
    }

    /// Copies the window, oldest frame first, into `out`.
    ///
    /// `out` must hold `capacity * channels` samples.
    pub fn window_into(&self, out: &mut [f32]) {
        debug_assert_eq!(out.len(), self.data.len());
        let split = self.head * self.channels;
        let tail = self.data.len() - split;
        out[..tail].copy_from_slice(&self.data[split..]);
        out[tail..].copy_from_slice(&self.data[..split]);
    }

    /// Returns the window as a contiguous vector, oldest frame first.
    pub fn to_vec(&self) -> Vec<f32> {
        let mut out = vec![0.0; self.data.len()];
        self.window_into(&mut out);
        out
    }

    /// Returns frame `index` of the window (0 = oldest).
    pub fn frame(&self, index: usize) -> Option<&[f32]> {
        if index >= self.capacity {
            return None;
        }
        let physical = (self.head + index) % self.capacity;
        let start = physical * self.channels;
        Some(&self.data[start..start + self.channels])
    }

    /// Returns the newest `count` frames, interleaved, oldest first.
    pub fn last_frames(&self, count: usize) -> Vec<f32> {
        let count = count.min(self.capacity);
        (self.capacity - count..self.capacity)
            .filter_map(|i| self.frame(i))
            .flatten()
            .copied()
            .collect()
    }

    /// Zeroes the window.
    pub fn clear(&mut self) {
        self.data.fill(0.0);
        self.head = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stereo_ramp(start: usize, frames: usize) -> Vec<f32> {
        (start..start + frames)
            .flat_map(|i| [i as f32, -(i as f32)])
            .collect()
    }

    #[test]
    fn test_starts_zeroed_and_full_length() {
        let buffer = RollingBuffer::new(16, 2);
        assert_eq!(buffer.len(), 16);
        assert!(buffer.to_vec().iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_length_constant_across_pushes() {
        let mut buffer = RollingBuffer::new(100, 2);
        for frames in [1, 7, 33, 99, 100, 101, 250, 0, 3] {
            buffer.push(&stereo_ramp(0, frames));
            assert_eq!(buffer.len(), 100);
            assert_eq!(buffer.to_vec().len(), 200);
        }
    }

    #[test]
    fn test_preserves_temporal_order() {
        let mut buffer = RollingBuffer::new(10, 2);
        let mut next = 0;
        for frames in [3, 4, 5, 2, 6] {
            buffer.push(&stereo_ramp(next, frames));
            next += frames;
        }

        // The last 10 frames pushed were 10..20.
        assert_eq!(buffer.to_vec(), stereo_ramp(10, 10));
        assert_eq!(buffer.last_frames(4), stereo_ramp(16, 4));
    }

    #[test]
    fn test_oversized_chunk_keeps_newest() {
        let mut buffer = RollingBuffer::new(4, 2);
        buffer.push(&stereo_ramp(0, 9));
        assert_eq!(buffer.to_vec(), stereo_ramp(5, 4));
    }

    #[test]
    fn test_wraparound_write() {
        let mut buffer = RollingBuffer::new(5, 1);
        buffer.push(&[1.0, 2.0, 3.0]);
        buffer.push(&[4.0, 5.0, 6.0, 7.0]);
        assert_eq!(buffer.to_vec(), vec![3.0, 4.0, 5.0, 6.0, 7.0]);
        assert_eq!(buffer.frame(0), Some(&[3.0][..]));
        assert_eq!(buffer.frame(4), Some(&[7.0][..]));
        assert_eq!(buffer.frame(5), None);
    }

    #[test]
    fn test_partial_initial_fill_is_zero_padded() {
        let mut buffer = RollingBuffer::new(6, 1);
        buffer.push(&[1.0, 2.0]);
        assert_eq!(buffer.to_vec(), vec![0.0, 0.0, 0.0, 0.0, 1.0, 2.0]);
    }

    #[test]
    fn test_clear() {
        let mut buffer = RollingBuffer::new(3, 1);
        buffer.push(&[1.0, 2.0]);
        buffer.clear();
        assert_eq!(buffer.to_vec(), vec![0.0, 0.0, 0.0]);
    }
}
