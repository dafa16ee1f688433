//! Mock separation model for testing without model weights.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ndarray::{s, Array4, ArrayView3};

use crate::error::InferenceError;
use crate::model::{SeparationModel, DEFAULT_NUM_SOURCES, VOCALS_SOURCE_INDEX};

/// A deterministic stand-in for a separation model.
///
/// The vocals stem is the mixture scaled by a gain; every other stem is
/// silent. Failures, panics, latency and short outputs can be scripted to
/// exercise the pipeline's fallback paths in CI.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use vocal_stream::MockModel;
///
/// let model = MockModel::new()
///     .with_gain(0.8)
///     .with_latency(Duration::from_millis(5))
///     .failing_on_call(3);
/// ```
#[derive(Debug, Clone)]
pub struct MockModel {
    gain: f32,
    num_sources: usize,
    vocals_index: usize,
    latency: Option<Duration>,
    fail_on: Vec<u64>,
    panic_on: Vec<u64>,
    always_fail: bool,
    output_frames: Option<usize>,
    calls: Arc<AtomicU64>,
}

impl Default for MockModel {
    fn default() -> Self {
        Self::new()
    }
}

impl MockModel {
    /// Creates a four-stem mock that passes the mixture through as vocals.
    pub fn new() -> Self {
        Self {
            gain: 1.0,
            num_sources: DEFAULT_NUM_SOURCES,
            vocals_index: VOCALS_SOURCE_INDEX,
            latency: None,
            fail_on: Vec::new(),
            panic_on: Vec::new(),
            always_fail: false,
            output_frames: None,
            calls: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Scales the vocals stem.
    #[must_use]
    pub fn with_gain(mut self, gain: f32) -> Self {
        self.gain = gain;
        self
    }

    /// Sleeps this long inside every call.
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Changes the stem layout.
    #[must_use]
    pub fn with_sources(mut self, num_sources: usize, vocals_index: usize) -> Self {
        self.num_sources = num_sources;
        self.vocals_index = vocals_index;
        self
    }

    /// Returns an error on the given call (1-based).
    #[must_use]
    pub fn failing_on_call(mut self, call: u64) -> Self {
        self.fail_on.push(call);
        self
    }

    /// Returns an error on every call.
    #[must_use]
    pub fn always_failing(mut self) -> Self {
        self.always_fail = true;
        self
    }

    /// Panics on the given call (1-based).
    #[must_use]
    pub fn panicking_on_call(mut self, call: u64) -> Self {
        self.panic_on.push(call);
        self
    }

    /// Returns only the first `frames` frames of the window.
    #[must_use]
    pub fn with_output_frames(mut self, frames: usize) -> Self {
        self.output_frames = Some(frames);
        self
    }

    /// Shared counter of calls made so far, readable after the model moves.
    pub fn call_counter(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.calls)
    }
}

impl SeparationModel for MockModel {
    fn name(&self) -> &str {
        "mock"
    }

    fn num_sources(&self) -> usize {
        self.num_sources
    }

    fn vocals_index(&self) -> usize {
        self.vocals_index
    }

    fn separate(&mut self, mixture: ArrayView3<'_, f32>) -> Result<Array4<f32>, InferenceError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;

        if let Some(latency) = self.latency {
            std::thread::sleep(latency);
        }
        if self.panic_on.contains(&call) {
            panic!("mock model panic on call {call}");
        }
        if self.always_fail || self.fail_on.contains(&call) {
            return Err(InferenceError::model(format!(
                "mock model failure on call {call}"
            )));
        }

        let (batch, channels, frames) = mixture.dim();
        let out_frames = self.output_frames.unwrap_or(frames).min(frames);
        let mut stems = Array4::zeros((batch, self.num_sources, channels, out_frames));
        if self.vocals_index < self.num_sources {
            let mut vocals = stems.slice_mut(s![.., self.vocals_index, .., ..]);
            vocals.assign(&mixture.slice(s![.., .., ..out_frames]));
            vocals.mapv_inplace(|x| x * self.gain);
        }
        Ok(stems)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    #[test]
    fn test_mock_output_layout() {
        let mut model = MockModel::new().with_gain(2.0);
        let mixture = Array3::from_elem((1, 2, 8), 0.25);

        let stems = model.separate(mixture.view()).unwrap();
        assert_eq!(stems.shape(), &[1, 4, 2, 8]);
        assert!(stems
            .slice(s![0, VOCALS_SOURCE_INDEX, .., ..])
            .iter()
            .all(|&x| x == 0.5));
        assert!(stems.slice(s![0, 0, .., ..]).iter().all(|&x| x == 0.0));
    }

    #[test]
    fn test_mock_scripted_failures() {
        let mut model = MockModel::new().failing_on_call(2);
        let mixture = Array3::zeros((1, 2, 4));

        assert!(model.separate(mixture.view()).is_ok());
        assert!(model.separate(mixture.view()).is_err());
        assert!(model.separate(mixture.view()).is_ok());
        assert_eq!(model.call_counter().load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_mock_always_failing() {
        let mut model = MockModel::new().always_failing();
        let mixture = Array3::zeros((1, 2, 4));

        for _ in 0..3 {
            assert!(model.separate(mixture.view()).is_err());
        }
        assert_eq!(model.call_counter().load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_mock_custom_stem_layout() {
        let mut model = MockModel::new().with_sources(2, 1);
        let mixture = Array3::from_elem((1, 2, 4), 0.5);

        let stems = model.separate(mixture.view()).unwrap();
        assert_eq!(model.num_sources(), 2);
        assert_eq!(stems.shape(), &[1, 2, 2, 4]);
        assert!(stems.slice(s![0, 1, .., ..]).iter().all(|&x| x == 0.5));
        assert!(stems.slice(s![0, 0, .., ..]).iter().all(|&x| x == 0.0));
    }

    #[test]
    fn test_mock_short_output() {
        let mut model = MockModel::new().with_output_frames(3);
        let mixture = Array3::zeros((1, 2, 10));
        let stems = model.separate(mixture.view()).unwrap();
        assert_eq!(stems.shape(), &[1, 4, 2, 3]);
    }
}
