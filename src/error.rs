//! Error types for vocal-stream.
//!
//! Errors are split by where they can happen:
//! - **Control path** ([`VocalStreamError`]): configuration, model loading and
//!   device setup. These are returned to the caller and leave the engine in a
//!   well-defined `Stopped` or `Errored` state.
//! - **Real-time path** ([`InferenceError`]): recovered inside the audio
//!   callback by emitting a block of silence. They surface only as
//!   [`PipelineEvent::InferenceFailed`](crate::PipelineEvent::InferenceFailed).

use crate::engine::EngineState;

/// Fatal errors returned from control operations.
#[derive(Debug, thiserror::Error)]
pub enum VocalStreamError {
    /// The requested audio device was not found.
    #[error("{direction} device not found: {name}")]
    DeviceNotFound {
        /// Whether the input or the output device was missing.
        direction: Direction,
        /// Name or index that was requested.
        name: String,
    },

    /// No default device is configured on this system.
    #[error("no default {direction} device configured")]
    NoDefaultDevice {
        /// Whether the input or the output default was missing.
        direction: Direction,
    },

    /// The duplex stream could not be opened or started.
    #[error("failed to open audio stream: {reason}")]
    DeviceOpenFailed {
        /// Why the device could not be opened.
        reason: String,
    },

    /// The device's native sample format is not supported.
    #[error("unsupported sample format: {format}")]
    UnsupportedFormat {
        /// The format that wasn't supported.
        format: String,
    },

    /// An error from the underlying audio library (CPAL).
    #[error("audio backend error: {0}")]
    BackendError(String),

    /// The separation model failed to load or initialize.
    #[error("model load failed: {0}")]
    ModelLoadFailed(#[from] ModelError),

    /// `start()` was called before a model finished loading.
    #[error("model is not ready - load a model before starting the stream")]
    ModelNotReady,

    /// The pipeline configuration was rejected.
    #[error("invalid configuration: {0}")]
    InvalidConfig(#[from] ConfigError),

    /// The operation is not valid in the engine's current state.
    #[error("cannot {operation} while {state}")]
    InvalidState {
        /// The attempted operation.
        operation: &'static str,
        /// The state the engine was in.
        state: EngineState,
    },
}

/// Which side of the duplex stream an error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Capture side.
    Input,
    /// Playback side.
    Output,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Input => f.write_str("input"),
            Self::Output => f.write_str("output"),
        }
    }
}

/// Reasons a [`PipelineConfig`](crate::PipelineConfig) is rejected.
///
/// Invalid combinations are always rejected, never clamped.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// Block size must be positive.
    #[error("block size must be greater than zero")]
    ZeroBlockSize,

    /// Sample rate must be positive.
    #[error("sample rate must be greater than zero")]
    ZeroSampleRate,

    /// Channel count must be positive.
    #[error("channel count must be greater than zero")]
    ZeroChannels,

    /// The rolling buffer cannot hold a single block.
    #[error("buffer capacity {capacity} is smaller than block size {block_size}")]
    BufferSmallerThanBlock {
        /// Configured buffer capacity in frames.
        capacity: usize,
        /// Configured block size in frames.
        block_size: usize,
    },

    /// The back offset must leave at least one frame of each block.
    #[error("back offset {back_offset} must be smaller than block size {block_size}")]
    BackOffsetTooLarge {
        /// Configured back offset in frames.
        back_offset: usize,
        /// Configured block size in frames.
        block_size: usize,
    },

    /// The trimmed range would start before the window.
    #[error(
        "block size {block_size} + back offset {back_offset} exceeds buffer capacity {capacity}"
    )]
    TrimOutsideWindow {
        /// Configured block size in frames.
        block_size: usize,
        /// Configured back offset in frames.
        back_offset: usize,
        /// Configured buffer capacity in frames.
        capacity: usize,
    },

    /// A numeric field exceeds the accepted range.
    #[error("{field} = {value} exceeds the maximum of {max}")]
    OutOfRange {
        /// Name of the field.
        field: &'static str,
        /// Value that was given.
        value: usize,
        /// Largest accepted value.
        max: usize,
    },

    /// Decoupled scheduling needs room for at least one block.
    #[error("lookahead must be at least one block")]
    ZeroLookahead,

    /// More interleaved channels than the pipeline supports.
    #[error("{channels} channels exceeds the maximum of {max}")]
    TooManyChannels {
        /// Configured channel count.
        channels: u16,
        /// Largest accepted channel count.
        max: u16,
    },

    /// A buffer sized from the configuration would be too large to allocate.
    #[error("{buffer} would hold {samples} samples, more than the maximum of {max}")]
    BufferTooLarge {
        /// Which buffer.
        buffer: &'static str,
        /// Requested samples, saturated at `usize::MAX` on overflow.
        samples: usize,
        /// Largest accepted sample count.
        max: usize,
    },
}

/// Errors from a single inference call.
///
/// These never leave the audio callback: the affected block is replaced with
/// silence and the session continues.
#[derive(Debug, thiserror::Error)]
pub enum InferenceError {
    /// The model reported a numerical or device failure.
    #[error("model error: {0}")]
    Model(String),

    /// The model returned a tensor with an unexpected shape.
    #[error("unexpected model output shape {actual:?}, expected {expected}")]
    Shape {
        /// Human-readable description of the expected layout.
        expected: String,
        /// The shape that came back.
        actual: Vec<usize>,
    },

    /// The model panicked during inference.
    #[error("model panicked: {0}")]
    Panicked(String),

    /// ONNX Runtime failure.
    #[cfg(feature = "onnx")]
    #[error("onnx runtime error: {0}")]
    Onnx(#[from] ort::Error),
}

impl InferenceError {
    /// Creates a model error with the given message.
    pub fn model(msg: impl Into<String>) -> Self {
        Self::Model(msg.into())
    }
}

/// Errors raised while acquiring a separation model.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    /// The model file does not exist.
    #[error("model file not found: {}", path.display())]
    NotFound {
        /// Path that was looked up.
        path: std::path::PathBuf,
    },

    /// The model could not be initialized.
    #[error("{0}")]
    Init(String),

    /// The loader task failed before producing a model.
    #[error("loader task failed: {0}")]
    Task(String),

    /// ONNX Runtime failure.
    #[cfg(feature = "onnx")]
    #[error("onnx runtime error: {0}")]
    Onnx(#[from] ort::Error),
}

impl ModelError {
    /// Creates an initialization error with the given message.
    pub fn init(msg: impl Into<String>) -> Self {
        Self::Init(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_not_found_display() {
        let err = VocalStreamError::DeviceNotFound {
            direction: Direction::Input,
            name: "CABLE Output".to_string(),
        };
        assert_eq!(err.to_string(), "input device not found: CABLE Output");
    }

    #[test]
    fn test_invalid_state_display() {
        let err = VocalStreamError::InvalidState {
            operation: "start",
            state: EngineState::Running,
        };
        assert_eq!(err.to_string(), "cannot start while running");
    }

    #[test]
    fn test_config_error_wraps() {
        let err: VocalStreamError = ConfigError::ZeroBlockSize.into();
        assert!(matches!(
            err,
            VocalStreamError::InvalidConfig(ConfigError::ZeroBlockSize)
        ));
        assert!(err.to_string().contains("block size"));
    }

    #[test]
    fn test_model_error_wraps() {
        let err: VocalStreamError = ModelError::init("weights corrupted").into();
        assert_eq!(err.to_string(), "model load failed: weights corrupted");
    }

    #[test]
    fn test_inference_error_model() {
        let err = InferenceError::model("NaN in output");
        assert_eq!(err.to_string(), "model error: NaN in output");
    }
}
