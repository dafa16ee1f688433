//! Real-time processing pipeline.
//!
//! Every device callback moves one block through the same stages:
//!
//! ```text
//! input block → RollingBuffer → InferenceAdapter → TrimPolicy → output block
//!                                      │
//!                                      └→ TimingMonitor → PipelineEvent::Timing
//! ```
//!
//! - **RollingBuffer**: fixed-capacity window of the most recent frames
//! - **TrimPolicy**: picks the block-sized slice of the model output to play
//! - **TimingMonitor**: compares inference time against the block duration
//! - **BlockProcessor**: runs the stages and substitutes silence on failure
//!
//! With decoupled scheduling the processor runs on a worker thread and the
//! device callback only moves samples through two SPSC rings.

mod processor;
mod rolling_buffer;
mod timing;
mod trim;
mod worker;

pub use processor::BlockProcessor;
pub use rolling_buffer::RollingBuffer;
pub use timing::{block_ms, real_time_factor, TimingMonitor, TimingSample};
pub use trim::{extract, fit_to_frames, TrimPolicy};
pub(crate) use worker::{DecoupledFrontEnd, InferenceWorker};
