//! Model acquisition and stream control for a front end.

use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Mutex, RwLock};

use crate::config::PipelineConfig;
use crate::engine::{EngineState, SessionStats, StreamEngine};
use crate::error::{ModelError, VocalStreamError};
use crate::event::{EventSink, PipelineEvent};
use crate::model::{InferenceAdapter, ModelLoader, SharedModel};

/// Sequences model loading and gates the stream on model readiness.
///
/// Cheap to clone; clones share the same engine and model. Created with
/// [`VocalStream::builder()`](crate::VocalStream::builder).
///
/// # Example
///
/// ```no_run
/// use vocal_stream::{MockModel, ModelError, SeparationModel, VocalStream};
///
/// # async fn run() -> Result<(), vocal_stream::VocalStreamError> {
/// let controller = VocalStream::builder()
///     .on_event(|event| println!("{event:?}"))
///     .build()?;
///
/// controller
///     .load_model(|| -> Result<Box<dyn SeparationModel>, ModelError> {
///         Ok(Box::new(MockModel::new()))
///     })
///     .await?;
///
/// controller.start()?;
/// tokio::time::sleep(std::time::Duration::from_secs(10)).await;
/// controller.stop()?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct LifecycleController {
    inner: Arc<ControllerInner>,
}

struct ControllerInner {
    engine: Mutex<StreamEngine>,
    model: RwLock<Option<SharedModel>>,
    config: RwLock<PipelineConfig>,
    events: EventSink,
}

impl LifecycleController {
    pub(crate) fn new(engine: StreamEngine, config: PipelineConfig, events: EventSink) -> Self {
        Self {
            inner: Arc::new(ControllerInner {
                engine: Mutex::new(engine),
                model: RwLock::new(None),
                config: RwLock::new(config),
                events,
            }),
        }
    }

    /// Loads a model on the blocking pool and marks the controller ready.
    ///
    /// The model is warmed up with one inference on silence before it is
    /// published; a warmup failure is logged but does not fail the load.
    /// While loading, the controller is not ready. After a failure it stays
    /// not ready and the call may simply be repeated.
    ///
    /// # Errors
    ///
    /// Returns [`VocalStreamError::ModelLoadFailed`] if the loader fails.
    pub async fn load_model<L: ModelLoader>(&self, loader: L) -> Result<(), VocalStreamError> {
        let description = loader.describe();
        let (frames, channels) = {
            let config = self.inner.config.read();
            (config.buffer_capacity, config.channels)
        };

        *self.inner.model.write() = None;
        self.inner
            .events
            .emit(PipelineEvent::info(format!("Loading model on {description}")));
        self.inner.events.emit(PipelineEvent::ModelLoading {
            description: description.clone(),
        });

        let started = Instant::now();
        let loaded = tokio::task::spawn_blocking(move || -> Result<SharedModel, ModelError> {
            let model: SharedModel = Arc::new(Mutex::new(loader.load()?));
            match InferenceAdapter::new(Arc::clone(&model), frames, channels).warmup() {
                Ok(ms) => tracing::debug!("Model warmup took {:.1}ms", ms),
                Err(err) => tracing::warn!("Model warmup failed (continuing): {}", err),
            }
            Ok(model)
        })
        .await
        .unwrap_or_else(|e| Err(ModelError::Task(e.to_string())));

        match loaded {
            Ok(model) => {
                let name = model.lock().name().to_string();
                let load_time = started.elapsed();
                *self.inner.model.write() = Some(model);

                tracing::info!(model = %name, ?load_time, "Model ready");
                self.inner
                    .events
                    .emit(PipelineEvent::info("Model loaded successfully."));
                self.inner
                    .events
                    .emit(PipelineEvent::ModelReady { model: name, load_time });
                Ok(())
            }
            Err(err) => {
                self.inner
                    .events
                    .emit(PipelineEvent::error(format!("Model Load Error: {err}")));
                self.inner.events.emit(PipelineEvent::ModelLoadFailed {
                    error: err.to_string(),
                });
                Err(err.into())
            }
        }
    }

    /// Starts [`load_model`](Self::load_model) as a background task.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn_model_load<L: ModelLoader>(
        &self,
        loader: L,
    ) -> tokio::task::JoinHandle<Result<(), VocalStreamError>> {
        let controller = self.clone();
        tokio::spawn(async move { controller.load_model(loader).await })
    }

    /// Returns `true` once a model is loaded.
    pub fn is_ready(&self) -> bool {
        self.inner.model.read().is_some()
    }

    /// The configuration the next session will use.
    pub fn config(&self) -> PipelineConfig {
        self.inner.config.read().clone()
    }

    /// Replaces the configuration.
    ///
    /// # Errors
    ///
    /// Rejects the change unless the engine is stopped, and rejects invalid
    /// configurations. The current configuration is kept in both cases.
    pub fn set_config(&self, config: PipelineConfig) -> Result<(), VocalStreamError> {
        let engine = self.inner.engine.lock();
        let state = engine.state();
        if state != EngineState::Stopped {
            return Err(VocalStreamError::InvalidState {
                operation: "change configuration",
                state,
            });
        }
        config.validate()?;
        *self.inner.config.write() = config;
        Ok(())
    }

    /// Starts a session with the current configuration and model.
    ///
    /// # Errors
    ///
    /// See [`StreamEngine::start`].
    pub fn start(&self) -> Result<(), VocalStreamError> {
        let model = self.inner.model.read().clone();
        let config = self.config();

        let result = self.inner.engine.lock().start(&config, model);
        if let Err(
            ref err @ (VocalStreamError::ModelNotReady
            | VocalStreamError::InvalidConfig(_)
            | VocalStreamError::InvalidState { .. }),
        ) = result
        {
            self.inner
                .events
                .emit(PipelineEvent::warn(format!("Start Error: {err}")));
        }
        result
    }

    /// Stops the running session. Does nothing when already stopped.
    ///
    /// # Errors
    ///
    /// See [`StreamEngine::stop`].
    pub fn stop(&self) -> Result<(), VocalStreamError> {
        self.inner.engine.lock().stop()
    }

    /// Current engine state.
    pub fn state(&self) -> EngineState {
        self.inner.engine.lock().state()
    }

    /// Returns `true` while audio is flowing.
    pub fn is_running(&self) -> bool {
        self.state() == EngineState::Running
    }

    /// Statistics of the current or most recent session.
    pub fn stats(&self) -> SessionStats {
        self.inner.engine.lock().stats()
    }
}

impl std::fmt::Debug for LifecycleController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleController")
            .field("ready", &self.is_ready())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::MockBackend;
    use crate::model::{MockModel, SeparationModel};
    use crate::VocalStream;

    fn mock_loader() -> impl ModelLoader {
        || -> Result<Box<dyn SeparationModel>, ModelError> { Ok(Box::new(MockModel::new())) }
    }

    fn controller(backend: &MockBackend) -> LifecycleController {
        VocalStream::builder()
            .backend(backend.clone())
            .config(
                PipelineConfig::default()
                    .with_block_size(4)
                    .with_buffer_capacity(12)
                    .with_back_offset(2),
            )
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_not_ready_until_loaded() {
        let backend = MockBackend::new();
        let controller = controller(&backend);

        assert!(!controller.is_ready());
        assert!(matches!(
            controller.start(),
            Err(VocalStreamError::ModelNotReady)
        ));

        controller.load_model(mock_loader()).await.unwrap();
        assert!(controller.is_ready());
        controller.start().unwrap();
        assert_eq!(controller.state(), EngineState::Running);
        controller.stop().unwrap();
    }

    #[tokio::test]
    async fn test_set_config_only_while_stopped() {
        let backend = MockBackend::new();
        let controller = controller(&backend);
        controller.load_model(mock_loader()).await.unwrap();
        controller.start().unwrap();

        let result = controller.set_config(PipelineConfig::default());
        assert!(matches!(
            result,
            Err(VocalStreamError::InvalidState {
                state: EngineState::Running,
                ..
            })
        ));

        controller.stop().unwrap();
        controller.set_config(PipelineConfig::default()).unwrap();
        assert_eq!(controller.config().block_size, 4048);
    }

    #[tokio::test]
    async fn test_set_config_rejects_invalid() {
        let backend = MockBackend::new();
        let controller = controller(&backend);

        let result = controller.set_config(PipelineConfig::default().with_block_size(0));
        assert!(matches!(result, Err(VocalStreamError::InvalidConfig(_))));
        assert_eq!(controller.config().block_size, 4);
    }

    #[tokio::test]
    async fn test_spawned_load_completes() {
        let backend = MockBackend::new();
        let controller = controller(&backend);

        controller
            .spawn_model_load(mock_loader())
            .await
            .unwrap()
            .unwrap();
        assert!(controller.is_ready());
    }
}
