//! Selection of the model output that maps onto the current block.
//!
//! The model sees the whole rolling window but only the newest block is new
//! audio. Its last few frames sit on the window edge where the separation is
//! least reliable, so the policy takes the block that ends `back_offset`
//! frames before the end of the window. This costs `back_offset` frames of
//! extra latency.

/// Chooses the block-sized slice of a full-window model output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrimPolicy {
    block_size: usize,
    back_offset: usize,
}

impl TrimPolicy {
    /// Creates a policy for the given block size and trailing offset.
    pub fn new(block_size: usize, back_offset: usize) -> Self {
        Self {
            block_size,
            back_offset,
        }
    }

    /// Block size in frames.
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Trailing offset in frames.
    pub fn back_offset(&self) -> usize {
        self.back_offset
    }

    /// Frame range `[start, end)` selected from an output of `total_frames`.
    ///
    /// Bounds saturate at the window start, so a window shorter than
    /// `block_size + back_offset` yields a shorter range instead of panicking.
    pub fn frame_range(&self, total_frames: usize) -> std::ops::Range<usize> {
        let end = total_frames.saturating_sub(self.back_offset);
        let start = total_frames.saturating_sub(self.block_size + self.back_offset);
        start..end
    }

    /// Returns frames `[-(block + back), -back)` of an interleaved output,
    /// or the final `block` frames when `back` is zero.
    pub fn extract<'a>(&self, output: &'a [f32], channels: usize) -> &'a [f32] {
        extract(output, channels, self.block_size, self.back_offset)
    }
}

/// Free-function form of [`TrimPolicy::extract`].
///
/// ```
/// use vocal_stream::pipeline::extract;
///
/// // 10 mono frames, block of 4, skip the last 2
/// let output: Vec<f32> = (0..10).map(|i| i as f32).collect();
/// assert_eq!(extract(&output, 1, 4, 2), &[4.0, 5.0, 6.0, 7.0]);
/// assert_eq!(extract(&output, 1, 4, 0), &[6.0, 7.0, 8.0, 9.0]);
/// ```
pub fn extract(output: &[f32], channels: usize, block_size: usize, back_offset: usize) -> &[f32] {
    let channels = channels.max(1);
    let total_frames = output.len() / channels;
    let range = TrimPolicy::new(block_size, back_offset).frame_range(total_frames);
    &output[range.start * channels..range.end * channels]
}

/// Copies `src` into `dst`, truncating or zero-padding to `dst.len()`.
///
/// Returns the number of samples copied from `src`.
pub fn fit_to_frames(src: &[f32], dst: &mut [f32]) -> usize {
    let copied = src.len().min(dst.len());
    dst[..copied].copy_from_slice(&src[..copied]);
    dst[copied..].fill(0.0);
    copied
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stereo_index_signal(frames: usize) -> Vec<f32> {
        (0..frames).flat_map(|i| [i as f32, i as f32]).collect()
    }

    #[test]
    fn test_default_geometry_selects_expected_frames() {
        let output = stereo_index_signal(16000);
        let trimmed = TrimPolicy::new(4048, 1024).extract(&output, 2);

        assert_eq!(trimmed.len(), 4048 * 2);
        assert_eq!(trimmed[0], 10928.0);
        assert_eq!(trimmed[trimmed.len() - 1], 14975.0);
        assert_eq!(TrimPolicy::new(4048, 1024).frame_range(16000), 10928..14976);
    }

    #[test]
    fn test_zero_back_offset_takes_final_block() {
        let output = stereo_index_signal(16000);
        let trimmed = extract(&output, 2, 4048, 0);

        assert_eq!(trimmed, &output[(16000 - 4048) * 2..]);
    }

    #[test]
    fn test_degenerate_window_saturates() {
        let output = stereo_index_signal(100);
        let trimmed = extract(&output, 2, 80, 40);

        // Range collapses to [0, 60)
        assert_eq!(trimmed.len(), 60 * 2);
        assert_eq!(trimmed[0], 0.0);
    }

    #[test]
    fn test_back_offset_beyond_window_is_empty() {
        let output = stereo_index_signal(10);
        assert!(extract(&output, 2, 4, 20).is_empty());
    }

    #[test]
    fn test_fit_pads_short_input() {
        let mut dst = [9.0; 6];
        let copied = fit_to_frames(&[1.0, 2.0], &mut dst);
        assert_eq!(copied, 2);
        assert_eq!(dst, [1.0, 2.0, 0.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_fit_truncates_long_input() {
        let mut dst = [0.0; 2];
        let copied = fit_to_frames(&[1.0, 2.0, 3.0, 4.0], &mut dst);
        assert_eq!(copied, 2);
        assert_eq!(dst, [1.0, 2.0]);
    }
}
