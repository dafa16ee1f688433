//! Source-separation model boundary.
//!
//! The model is an opaque collaborator: it takes a mixture shaped
//! `[1, channels, frames]` and returns stems shaped
//! `[1, sources, channels, frames]`. [`InferenceAdapter`] handles everything
//! between the interleaved audio path and that tensor contract.

mod adapter;
mod mock;
#[cfg(feature = "onnx")]
mod onnx;

pub use adapter::InferenceAdapter;
pub use mock::MockModel;
#[cfg(feature = "onnx")]
pub use onnx::{ExecutionTarget, OnnxModel, OnnxModelLoader};

use std::sync::Arc;

use ndarray::{Array4, ArrayView3};
use parking_lot::Mutex;

use crate::error::{InferenceError, ModelError};

/// Stem index of the vocals in a {drums, bass, other, vocals} model.
pub const VOCALS_SOURCE_INDEX: usize = 3;

/// Number of stems produced by a {drums, bass, other, vocals} model.
pub const DEFAULT_NUM_SOURCES: usize = 4;

/// A neural source-separation model.
///
/// Implementations run inference only; they hold no training state.
pub trait SeparationModel: Send {
    /// Human-readable model name for logs.
    fn name(&self) -> &str;

    /// Number of stems in the output.
    fn num_sources(&self) -> usize {
        DEFAULT_NUM_SOURCES
    }

    /// Stem index holding the vocals.
    fn vocals_index(&self) -> usize {
        VOCALS_SOURCE_INDEX
    }

    /// Separates a `[1, channels, frames]` mixture into
    /// `[1, sources, channels, frames]` stems.
    ///
    /// # Errors
    ///
    /// Returns an error if the model reports a numerical or device failure.
    fn separate(&mut self, mixture: ArrayView3<'_, f32>) -> Result<Array4<f32>, InferenceError>;
}

/// A loaded model shared between the controller and the running session.
pub type SharedModel = Arc<Mutex<Box<dyn SeparationModel>>>;

/// Wraps a model for sharing.
pub fn shared_model<M: SeparationModel + 'static>(model: M) -> SharedModel {
    Arc::new(Mutex::new(Box::new(model)))
}

/// Acquires a separation model. Runs on a blocking worker, never on the
/// audio path.
///
/// Closures returning a boxed model implement this trait:
///
/// ```
/// use vocal_stream::{MockModel, ModelError, ModelLoader, SeparationModel};
///
/// let loader = || -> Result<Box<dyn SeparationModel>, ModelError> {
///     Ok(Box::new(MockModel::new()))
/// };
/// let model = loader.load().unwrap();
/// assert_eq!(model.vocals_index(), 3);
/// ```
pub trait ModelLoader: Send + 'static {
    /// Describes what is being loaded and where it will run.
    fn describe(&self) -> String {
        "separation model".to_string()
    }

    /// Loads and initializes the model.
    ///
    /// # Errors
    ///
    /// Returns an error if the weights are missing or initialization fails.
    fn load(self) -> Result<Box<dyn SeparationModel>, ModelError>;
}

impl<F> ModelLoader for F
where
    F: FnOnce() -> Result<Box<dyn SeparationModel>, ModelError> + Send + 'static,
{
    fn load(self) -> Result<Box<dyn SeparationModel>, ModelError> {
        self()
    }
}
