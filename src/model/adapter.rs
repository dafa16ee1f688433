//! Conversion between the interleaved audio path and the model's tensors.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::time::Instant;

use ndarray::{Array3, Axis};

use crate::error::InferenceError;
use crate::model::SharedModel;
use crate::pipeline::RollingBuffer;

/// Runs the separation model over a rolling-buffer window.
///
/// All scratch memory is allocated up front; a call allocates only what the
/// model itself allocates for its output tensor.
pub struct InferenceAdapter {
    model: SharedModel,
    channels: usize,
    frames: usize,
    /// Interleaved copy of the window, oldest frame first.
    window: Vec<f32>,
    /// Channels-first model input, `[1, channels, frames]`.
    input: Array3<f32>,
    /// Interleaved vocals stem from the last successful call.
    vocals: Vec<f32>,
    elapsed_ms: f64,
    /// Duration of the model call made by the latest `infer*`, if one ran.
    last_call_ms: Option<f64>,
}

impl InferenceAdapter {
    /// Creates an adapter for windows of `frames` frames.
    pub fn new(model: SharedModel, frames: usize, channels: u16) -> Self {
        let channels = usize::from(channels.max(1));
        Self {
            model,
            channels,
            frames,
            window: vec![0.0; frames * channels],
            input: Array3::zeros((1, channels, frames)),
            vocals: Vec::with_capacity(frames * channels),
            elapsed_ms: 0.0,
            last_call_ms: None,
        }
    }

    /// Wall-clock duration of the most recent model call, in milliseconds.
    ///
    /// Covers the model call only, not the layout conversion around it.
    pub fn elapsed_ms(&self) -> f64 {
        self.elapsed_ms
    }

    /// Duration of the model call made by the latest inference, in
    /// milliseconds.
    ///
    /// `Some` whenever the model was invoked, even if it failed, panicked or
    /// its output was rejected afterwards. `None` when the call was refused
    /// before reaching the model.
    pub fn last_call_ms(&self) -> Option<f64> {
        self.last_call_ms
    }

    /// Interleaved vocals from the last inference. Only meaningful after it
    /// returned `Ok`.
    pub fn vocals(&self) -> &[f32] {
        &self.vocals
    }

    /// Window length in frames.
    pub fn frames(&self) -> usize {
        self.frames
    }

    /// Separates the buffer's window and returns the interleaved vocals.
    ///
    /// # Errors
    ///
    /// Returns an error if the model fails, panics, returns an unexpected
    /// shape, or produces non-finite samples.
    pub fn infer(&mut self, buffer: &RollingBuffer) -> Result<&[f32], InferenceError> {
        debug_assert_eq!(buffer.capacity(), self.frames);
        debug_assert_eq!(buffer.channels(), self.channels);
        buffer.window_into(&mut self.window);
        self.run()
    }

    /// Separates an interleaved window of exactly `frames` frames.
    ///
    /// # Errors
    ///
    /// Same as [`infer`](Self::infer), plus a shape error when `window` has
    /// the wrong length.
    pub fn infer_interleaved(&mut self, window: &[f32]) -> Result<&[f32], InferenceError> {
        self.last_call_ms = None;
        if window.len() != self.window.len() {
            return Err(InferenceError::Shape {
                expected: format!("{} interleaved samples", self.window.len()),
                actual: vec![window.len()],
            });
        }
        self.window.copy_from_slice(window);
        self.run()
    }

    /// Runs one inference on silence so graph setup happens before the
    /// first live block. Returns the call's duration in milliseconds.
    ///
    /// # Errors
    ///
    /// Returns the inference error, if any.
    pub fn warmup(&mut self) -> Result<f64, InferenceError> {
        self.window.fill(0.0);
        self.run()?;
        Ok(self.elapsed_ms)
    }

    fn run(&mut self) -> Result<&[f32], InferenceError> {
        self.last_call_ms = None;
        for (i, frame) in self.window.chunks_exact(self.channels).enumerate() {
            for (c, &sample) in frame.iter().enumerate() {
                self.input[[0, c, i]] = sample;
            }
        }

        let (result, num_sources, vocals_index) = {
            let mut model = self.model.lock();
            let input = self.input.view();
            let start = Instant::now();
            let result = panic::catch_unwind(AssertUnwindSafe(|| model.separate(input)));
            self.elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
            self.last_call_ms = Some(self.elapsed_ms);
            (result, model.num_sources(), model.vocals_index())
        };

        let stems = match result {
            Ok(stems) => stems?,
            Err(payload) => return Err(InferenceError::Panicked(panic_message(&*payload))),
        };

        let shape = stems.shape();
        if shape.len() != 4
            || shape[0] != 1
            || shape[1] != num_sources
            || vocals_index >= num_sources
            || shape[2] != self.channels
        {
            return Err(InferenceError::Shape {
                expected: format!(
                    "[1, {num_sources}, {}, frames] with vocals at {vocals_index}",
                    self.channels
                ),
                actual: shape.to_vec(),
            });
        }

        let stem = stems.index_axis(Axis(0), 0);
        let stem = stem.index_axis(Axis(0), vocals_index);
        let out_frames = stem.len_of(Axis(1));

        self.vocals.clear();
        self.vocals.resize(out_frames * self.channels, 0.0);
        for (i, frame) in self.vocals.chunks_exact_mut(self.channels).enumerate() {
            for (c, sample) in frame.iter_mut().enumerate() {
                *sample = stem[[c, i]];
            }
        }

        if self.vocals.iter().any(|s| !s.is_finite()) {
            return Err(InferenceError::model("non-finite samples in model output"));
        }

        Ok(&self.vocals)
    }
}

impl std::fmt::Debug for InferenceAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InferenceAdapter")
            .field("channels", &self.channels)
            .field("frames", &self.frames)
            .field("elapsed_ms", &self.elapsed_ms)
            .finish_non_exhaustive()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{shared_model, MockModel, SeparationModel};
    use ndarray::{Array4, ArrayView3};

    #[test]
    fn test_infer_returns_interleaved_vocals() {
        let model = shared_model(MockModel::new().with_gain(0.5));
        let mut adapter = InferenceAdapter::new(model, 4, 2);

        let mut buffer = RollingBuffer::new(4, 2);
        buffer.push(&[1.0, 2.0, 3.0, 4.0]);

        let vocals = adapter.infer(&buffer).unwrap();
        assert_eq!(vocals, &[0.0, 0.0, 0.0, 0.0, 0.5, 1.0, 1.5, 2.0]);
    }

    #[test]
    fn test_model_failure_is_reported() {
        let model = shared_model(MockModel::new().failing_on_call(1));
        let mut adapter = InferenceAdapter::new(model, 8, 2);

        let err = adapter.infer_interleaved(&[0.0; 16]).unwrap_err();
        assert!(matches!(err, InferenceError::Model(_)));
        assert!(adapter.infer_interleaved(&[0.0; 16]).is_ok());
    }

    #[test]
    fn test_panic_is_caught() {
        let model = shared_model(MockModel::new().panicking_on_call(1));
        let mut adapter = InferenceAdapter::new(model, 8, 2);

        let err = adapter.infer_interleaved(&[0.0; 16]).unwrap_err();
        assert!(matches!(err, InferenceError::Panicked(ref msg) if msg.contains("mock")));
    }

    #[test]
    fn test_rejects_wrong_window_length() {
        let model = shared_model(MockModel::new());
        let mut adapter = InferenceAdapter::new(model, 8, 2);
        assert!(matches!(
            adapter.infer_interleaved(&[0.0; 10]),
            Err(InferenceError::Shape { .. })
        ));
    }

    struct TwoStemModel;

    impl SeparationModel for TwoStemModel {
        fn name(&self) -> &str {
            "two-stem"
        }

        fn separate(
            &mut self,
            mixture: ArrayView3<'_, f32>,
        ) -> Result<Array4<f32>, InferenceError> {
            let (_, channels, frames) = mixture.dim();
            Ok(Array4::zeros((1, 2, channels, frames)))
        }
    }

    #[test]
    fn test_rejects_missing_vocals_stem() {
        let mut adapter = InferenceAdapter::new(shared_model(TwoStemModel), 4, 2);
        let err = adapter.infer_interleaved(&[0.0; 8]).unwrap_err();
        assert!(matches!(err, InferenceError::Shape { ref actual, .. } if actual == &[1, 2, 2, 4]));
    }

    #[test]
    fn test_custom_stem_layout() {
        let model = shared_model(MockModel::new().with_sources(2, 1));
        let mut adapter = InferenceAdapter::new(model, 2, 2);
        assert_eq!(adapter.infer_interleaved(&[1.0; 4]).unwrap(), &[1.0; 4]);
    }

    #[test]
    fn test_rejects_vocals_index_outside_stems() {
        let model = shared_model(MockModel::new().with_sources(2, 3));
        let mut adapter = InferenceAdapter::new(model, 2, 2);
        let err = adapter.infer_interleaved(&[1.0; 4]).unwrap_err();
        assert!(matches!(err, InferenceError::Shape { ref actual, .. } if actual == &[1, 2, 2, 2]));
    }

    #[test]
    fn test_rejects_non_finite_output() {
        let model = shared_model(MockModel::new().with_gain(f32::INFINITY));
        let mut adapter = InferenceAdapter::new(model, 4, 2);
        assert!(adapter.infer_interleaved(&[1.0; 8]).is_err());
        assert!(adapter.last_call_ms().is_some());
    }

    #[test]
    fn test_refused_window_makes_no_call() {
        let model = shared_model(MockModel::new());
        let mut adapter = InferenceAdapter::new(model, 4, 2);
        adapter.infer_interleaved(&[0.0; 8]).unwrap();
        assert!(adapter.last_call_ms().is_some());

        assert!(adapter.infer_interleaved(&[0.0; 3]).is_err());
        assert_eq!(adapter.last_call_ms(), None);
    }

    #[test]
    fn test_elapsed_covers_model_call() {
        let model = shared_model(
            MockModel::new().with_latency(std::time::Duration::from_millis(20)),
        );
        let mut adapter = InferenceAdapter::new(model, 4, 2);
        let elapsed = adapter.warmup().unwrap();
        assert!(elapsed >= 20.0);
        assert_eq!(adapter.elapsed_ms(), elapsed);
    }
}
