//! Builder pattern for `VocalStream`.

use std::sync::Arc;

use crate::config::PipelineConfig;
use crate::controller::LifecycleController;
use crate::device::{AudioBackend, CpalBackend};
use crate::engine::StreamEngine;
use crate::error::VocalStreamError;
use crate::event::{event_callback, EventCallback, EventSink, PipelineEvent};

/// Builder for a [`LifecycleController`].
///
/// Use [`VocalStream::builder()`] to create a new builder.
///
/// # Example
///
/// ```no_run
/// use vocal_stream::{DeviceSelection, PipelineConfig, VocalStream};
///
/// # fn main() -> Result<(), vocal_stream::VocalStreamError> {
/// let controller = VocalStream::builder()
///     .config(
///         PipelineConfig::default()
///             .with_output_device(DeviceSelection::name("BlackHole 2ch")),
///     )
///     .on_event(|e| tracing::info!(?e, "pipeline event"))
///     .build()?;
/// # Ok(())
/// # }
/// ```
///
/// [`VocalStream::builder()`]: crate::VocalStream::builder
#[must_use]
pub struct VocalStreamBuilder {
    /// Pipeline configuration.
    config: PipelineConfig,
    /// Device backend. `None` means CPAL on the default host.
    backend: Option<Arc<dyn AudioBackend>>,
    /// Event callback.
    event_callback: Option<EventCallback>,
}

impl Default for VocalStreamBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl VocalStreamBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self {
            config: PipelineConfig::default(),
            backend: None,
            event_callback: None,
        }
    }

    /// Set the pipeline configuration.
    ///
    /// Default: [`PipelineConfig::default()`]
    pub fn config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the device backend.
    ///
    /// Default: [`CpalBackend`] on the platform's default host.
    pub fn backend<B: AudioBackend + 'static>(mut self, backend: B) -> Self {
        self.backend = Some(Arc::new(backend));
        self
    }

    /// Set a callback to receive pipeline events.
    ///
    /// Events include log messages, per-block timing, model loading progress,
    /// stream lifecycle changes and device status reports. The callback may
    /// run on the audio thread and must not block.
    pub fn on_event<F>(mut self, callback: F) -> Self
    where
        F: Fn(PipelineEvent) + Send + Sync + 'static,
    {
        self.event_callback = Some(event_callback(callback));
        self
    }

    /// Set an already shared event callback, such as one half of
    /// [`event_channel`](crate::event_channel).
    pub fn on_event_callback(mut self, callback: EventCallback) -> Self {
        self.event_callback = Some(callback);
        self
    }

    /// Builds a stopped controller with no model loaded.
    ///
    /// No device is opened until [`LifecycleController::start`].
    ///
    /// # Errors
    ///
    /// Returns [`VocalStreamError::InvalidConfig`] if the configuration is
    /// rejected.
    pub fn build(self) -> Result<LifecycleController, VocalStreamError> {
        self.config.validate()?;

        let backend: Arc<dyn AudioBackend> = match self.backend {
            Some(backend) => backend,
            None => Arc::new(CpalBackend::new()),
        };
        let events = EventSink::new(self.event_callback);
        let engine = StreamEngine::with_sink(backend, events.clone());

        tracing::debug!(
            block_size = self.config.block_size,
            buffer_capacity = self.config.buffer_capacity,
            "VocalStream built"
        );
        Ok(LifecycleController::new(engine, self.config, events))
    }
}

/// Main entry point for vocal-stream.
///
/// Use [`VocalStream::builder()`] to start configuring the pipeline.
pub struct VocalStream;

impl VocalStream {
    /// Creates a new builder for configuring the pipeline.
    pub fn builder() -> VocalStreamBuilder {
        VocalStreamBuilder::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SchedulingStrategy;
    use crate::device::MockBackend;
    use crate::engine::EngineState;
    use crate::error::ConfigError;

    #[test]
    fn test_builder_default() {
        let builder = VocalStreamBuilder::new();
        assert_eq!(builder.config, PipelineConfig::default());
        assert!(builder.backend.is_none());
        assert!(builder.event_callback.is_none());
    }

    #[test]
    fn test_builder_config() {
        let builder = VocalStream::builder()
            .config(PipelineConfig::default().with_scheduling(SchedulingStrategy::Decoupled));
        assert_eq!(builder.config.scheduling, SchedulingStrategy::Decoupled);
    }

    #[test]
    fn test_builder_on_event() {
        let builder = VocalStream::builder().on_event(|_| {});
        assert!(builder.event_callback.is_some());
    }

    #[test]
    fn test_build_is_stopped_and_not_ready() {
        let backend = MockBackend::new();
        let controller = VocalStream::builder()
            .backend(backend.clone())
            .build()
            .unwrap();

        assert_eq!(controller.state(), EngineState::Stopped);
        assert!(!controller.is_ready());
        assert_eq!(backend.open_count(), 0);
    }

    #[test]
    fn test_build_rejects_invalid_config() {
        let result = VocalStream::builder()
            .backend(MockBackend::new())
            .config(
                PipelineConfig::default()
                    .with_block_size(8)
                    .with_buffer_capacity(4),
            )
            .build();

        assert!(matches!(
            result,
            Err(VocalStreamError::InvalidConfig(
                ConfigError::BufferSmallerThanBlock { .. }
            ))
        ));
    }
}
