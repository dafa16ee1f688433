//! ONNX Runtime backed separation model.
//!
//! Loads a four-stem separation graph exported to ONNX. The graph takes one
//! `[1, channels, frames]` float input and produces `[1, sources, channels,
//! frames]` as its first output.

use std::path::{Path, PathBuf};

use ndarray::{Array4, ArrayView3};
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::Tensor;

use crate::error::{InferenceError, ModelError};
use crate::model::{ModelLoader, SeparationModel, DEFAULT_NUM_SOURCES, VOCALS_SOURCE_INDEX};

/// Where ONNX Runtime executes the graph.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ExecutionTarget {
    /// Default CPU provider.
    #[default]
    Cpu,
    /// CUDA provider. Falls back to CPU when the `cuda` feature is off or
    /// no GPU is available.
    Cuda,
}

impl ExecutionTarget {
    /// Picks CUDA when compiled with the `cuda` feature, CPU otherwise.
    pub fn preferred() -> Self {
        if cfg!(feature = "cuda") {
            Self::Cuda
        } else {
            Self::Cpu
        }
    }
}

impl std::fmt::Display for ExecutionTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cpu => f.write_str("cpu"),
            Self::Cuda => f.write_str("cuda"),
        }
    }
}

/// A separation model running in an ONNX Runtime session.
pub struct OnnxModel {
    session: Session,
    name: String,
    num_sources: usize,
    vocals_index: usize,
}

impl OnnxModel {
    /// Opens a session for the graph at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::NotFound`] for a missing file, or the runtime
    /// error if the session cannot be built.
    pub fn from_file(
        path: impl AsRef<Path>,
        target: ExecutionTarget,
        intra_threads: usize,
    ) -> Result<Self, ModelError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ModelError::NotFound {
                path: path.to_path_buf(),
            });
        }

        #[cfg_attr(not(feature = "cuda"), allow(unused_mut))]
        let mut builder = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(intra_threads.max(1))?;

        #[cfg(feature = "cuda")]
        if target == ExecutionTarget::Cuda {
            builder = builder.with_execution_providers([
                ort::execution_providers::CUDAExecutionProvider::default().build(),
            ])?;
        }
        #[cfg(not(feature = "cuda"))]
        if target == ExecutionTarget::Cuda {
            tracing::warn!("Built without the cuda feature, running on cpu");
        }

        let session = builder.commit_from_file(path)?;
        let name = path
            .file_stem()
            .map_or_else(|| "onnx".to_string(), |s| s.to_string_lossy().into_owned());

        tracing::debug!(model = %name, %target, "ONNX session ready");

        Ok(Self {
            session,
            name,
            num_sources: DEFAULT_NUM_SOURCES,
            vocals_index: VOCALS_SOURCE_INDEX,
        })
    }

    /// Overrides the stem layout for graphs that are not drums/bass/other/vocals.
    #[must_use]
    pub fn with_sources(mut self, num_sources: usize, vocals_index: usize) -> Self {
        self.num_sources = num_sources;
        self.vocals_index = vocals_index;
        self
    }
}

impl SeparationModel for OnnxModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn num_sources(&self) -> usize {
        self.num_sources
    }

    fn vocals_index(&self) -> usize {
        self.vocals_index
    }

    fn separate(&mut self, mixture: ArrayView3<'_, f32>) -> Result<Array4<f32>, InferenceError> {
        let (batch, channels, frames) = mixture.dim();
        let data: Vec<f32> = mixture.iter().copied().collect();
        let input = Tensor::from_array(([batch, channels, frames], data))?;

        let outputs = self.session.run(ort::inputs![input])?;
        let (shape, stems) = outputs[0].try_extract_tensor::<f32>()?;

        let dims: Vec<usize> = shape
            .iter()
            .map(|&d| usize::try_from(d).unwrap_or(0))
            .collect();
        if dims.len() != 4 {
            return Err(InferenceError::Shape {
                expected: "[1, sources, channels, frames]".to_string(),
                actual: dims,
            });
        }

        Array4::from_shape_vec((dims[0], dims[1], dims[2], dims[3]), stems.to_vec()).map_err(
            |e| InferenceError::model(format!("failed to reshape model output: {e}")),
        )
    }
}

impl std::fmt::Debug for OnnxModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OnnxModel")
            .field("name", &self.name)
            .field("num_sources", &self.num_sources)
            .field("vocals_index", &self.vocals_index)
            .finish_non_exhaustive()
    }
}

/// Loads an [`OnnxModel`] from disk on the blocking pool.
///
/// ```no_run
/// use vocal_stream::{ExecutionTarget, OnnxModelLoader};
///
/// let loader = OnnxModelLoader::new("models/htdemucs.onnx")
///     .with_target(ExecutionTarget::preferred())
///     .with_intra_threads(4);
/// ```
#[derive(Debug, Clone)]
pub struct OnnxModelLoader {
    path: PathBuf,
    target: ExecutionTarget,
    intra_threads: usize,
    sources: Option<(usize, usize)>,
}

impl OnnxModelLoader {
    /// Creates a CPU loader for the graph at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            target: ExecutionTarget::Cpu,
            intra_threads: 1,
            sources: None,
        }
    }

    /// Sets the execution target.
    #[must_use]
    pub fn with_target(mut self, target: ExecutionTarget) -> Self {
        self.target = target;
        self
    }

    /// Sets the number of intra-op threads.
    #[must_use]
    pub fn with_intra_threads(mut self, threads: usize) -> Self {
        self.intra_threads = threads;
        self
    }

    /// Overrides the stem layout.
    #[must_use]
    pub fn with_sources(mut self, num_sources: usize, vocals_index: usize) -> Self {
        self.sources = Some((num_sources, vocals_index));
        self
    }
}

impl ModelLoader for OnnxModelLoader {
    fn describe(&self) -> String {
        format!("{} on {}", self.path.display(), self.target)
    }

    fn load(self) -> Result<Box<dyn SeparationModel>, ModelError> {
        let mut model = OnnxModel::from_file(&self.path, self.target, self.intra_threads)?;
        if let Some((num_sources, vocals_index)) = self.sources {
            model = model.with_sources(num_sources, vocals_index);
        }
        Ok(Box::new(model))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe_names_target() {
        let loader = OnnxModelLoader::new("htdemucs.onnx").with_target(ExecutionTarget::Cuda);
        assert_eq!(loader.describe(), "htdemucs.onnx on cuda");
    }

    #[test]
    fn test_missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.onnx");

        let err = OnnxModelLoader::new(&path).load().unwrap_err();
        assert!(matches!(err, ModelError::NotFound { path: p } if p == path));
    }

    #[test]
    fn test_corrupt_file_fails_to_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("corrupt.onnx");
        std::fs::write(&path, b"not a model").unwrap();

        assert!(OnnxModelLoader::new(&path).load().is_err());
    }
}
