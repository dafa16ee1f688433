//! # vocal-stream
//!
//! **Note:** This crate is under active development. The API may change before 1.0.
//!
//! Real-time vocal isolation on a live audio stream.
//!
//! `vocal-stream` captures audio from an input device, runs a neural
//! source-separation model over a rolling window of recent frames, and plays
//! the vocal stem on an output device with a bounded, measured latency.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use vocal_stream::{MockModel, ModelError, PipelineConfig, SeparationModel, VocalStream};
//!
//! # async fn run() -> Result<(), vocal_stream::VocalStreamError> {
//! let controller = VocalStream::builder()
//!     .config(PipelineConfig::default().with_block_size(2048).with_back_offset(512))
//!     .on_event(|e| tracing::info!(?e, "pipeline event"))
//!     .build()?;
//!
//! // Swap in a real model, e.g. `OnnxModelLoader` with the `onnx` feature
//! controller
//!     .load_model(|| -> Result<Box<dyn SeparationModel>, ModelError> {
//!         Ok(Box::new(MockModel::new()))
//!     })
//!     .await?;
//!
//! controller.start()?;
//! tokio::time::sleep(std::time::Duration::from_secs(30)).await;
//! controller.stop()?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - **Device thread**: owns the CPAL streams and bridges capture into the
//!   output callback, one block at a time
//! - **Pipeline**: rolling window, model inference, trim to one block, with
//!   silence substituted for any failed block
//! - **Inference thread** (decoupled scheduling): runs the pipeline off the
//!   audio thread, connected by lock-free SPSC rings
//! - **Tokio runtime**: loads the model on the blocking pool; never touches
//!   the audio path
//!
//! Output lags input by `block_size + back_offset` frames.

#![warn(missing_docs)]
// Audio code requires intentional numeric casts between frame counts and time
#![allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_possible_wrap,
    clippy::cast_lossless
)]
// unwrap/expect allowed in tests only
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]
// These doc lints are too strict for internal implementation details
#![allow(clippy::missing_panics_doc, clippy::missing_errors_doc)]

mod builder;
mod config;
mod controller;
pub mod device;
mod engine;
mod error;
mod event;
pub mod model;
pub mod pipeline;

pub use builder::{VocalStream, VocalStreamBuilder};
pub use config::{
    DeviceSelection, PipelineConfig, SchedulingStrategy, MAX_BUFFER_SAMPLES, MAX_CHANNELS,
    MAX_CONFIG_VALUE, MAX_LOOKAHEAD_BLOCKS,
};
pub use controller::LifecycleController;
pub use device::{
    list_input_devices, list_output_devices, AudioBackend, CpalBackend, DeviceInfo,
    MockBackend, StreamStatus,
};
pub use engine::{EngineState, SessionStats, StreamEngine};
pub use error::{ConfigError, Direction, InferenceError, ModelError, VocalStreamError};
pub use event::{event_callback, event_channel, EventCallback, LogLevel, PipelineEvent};
pub use model::{InferenceAdapter, MockModel, ModelLoader, SeparationModel, SharedModel};
pub use pipeline::{BlockProcessor, RollingBuffer, TimingMonitor, TimingSample, TrimPolicy};

#[cfg(feature = "onnx")]
pub use model::{ExecutionTarget, OnnxModel, OnnxModelLoader};
