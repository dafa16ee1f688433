//! Stream session lifecycle.

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use crate::config::{PipelineConfig, SchedulingStrategy};
use crate::device::{
    AudioBackend, DeviceFault, DuplexCallback, DuplexSpec, DuplexStream, FaultCallback,
    StreamStatus,
};
use crate::error::VocalStreamError;
use crate::event::{EventCallback, EventSink, PipelineEvent};
use crate::model::SharedModel;
use crate::pipeline::{BlockProcessor, InferenceWorker};

/// Lifecycle state of a [`StreamEngine`].
///
/// ```text
/// Stopped → Starting → Running → Stopping → Stopped
///              │          │
///              └──────────┴──→ Errored ──stop()──→ Stopped
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// No stream is open.
    Stopped,
    /// Devices are being opened.
    Starting,
    /// Audio is flowing.
    Running,
    /// The stream is being torn down.
    Stopping,
    /// The session failed; call `stop()` to release it.
    Errored,
}

impl EngineState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Starting,
            2 => Self::Running,
            3 => Self::Stopping,
            4 => Self::Errored,
            _ => Self::Stopped,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            Self::Stopped => 0,
            Self::Starting => 1,
            Self::Running => 2,
            Self::Stopping => 3,
            Self::Errored => 4,
        }
    }
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Errored => "errored",
        };
        f.write_str(name)
    }
}

/// Engine state shared with the device fault handler.
#[derive(Debug)]
struct StateCell(AtomicU8);

impl StateCell {
    fn new(state: EngineState) -> Self {
        Self(AtomicU8::new(state.as_u8()))
    }

    fn load(&self) -> EngineState {
        EngineState::from_u8(self.0.load(Ordering::SeqCst))
    }

    fn store(&self, state: EngineState) {
        self.0.store(state.as_u8(), Ordering::SeqCst);
    }

    fn swap(&self, state: EngineState) -> EngineState {
        EngineState::from_u8(self.0.swap(state.as_u8(), Ordering::SeqCst))
    }

    fn transition(&self, from: EngineState, to: EngineState) -> bool {
        self.0
            .compare_exchange(from.as_u8(), to.as_u8(), Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }
}

/// Statistics about a stream session.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionStats {
    /// Blocks handed to the processor.
    pub blocks_processed: u64,
    /// Blocks replaced with silence because inference failed.
    pub inference_failures: u64,
    /// Blocks for which the device raised status flags.
    pub device_status_events: u64,
    /// Blocks whose inference took longer than the block lasts.
    pub overruns: u64,
    /// Playback callbacks with no processed block ready (decoupled only).
    pub starved_callbacks: u64,
    /// Blocks discarded because a decoupled queue was full.
    pub dropped_blocks: u64,
    /// Duration of the most recent inference.
    pub last_processing_ms: f64,
    /// Longest inference this session.
    pub peak_processing_ms: f64,
}

/// Counters shared between the engine and the real-time context.
#[derive(Debug, Default)]
pub(crate) struct SessionState {
    pub blocks_processed: AtomicU64,
    pub inference_failures: AtomicU64,
    pub device_status_events: AtomicU64,
    pub overruns: AtomicU64,
    pub starved_callbacks: AtomicU64,
    pub dropped_blocks: AtomicU64,
    pub last_processing_us: AtomicU64,
    pub peak_processing_us: AtomicU64,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> SessionStats {
        SessionStats {
            blocks_processed: self.blocks_processed.load(Ordering::Relaxed),
            inference_failures: self.inference_failures.load(Ordering::Relaxed),
            device_status_events: self.device_status_events.load(Ordering::Relaxed),
            overruns: self.overruns.load(Ordering::Relaxed),
            starved_callbacks: self.starved_callbacks.load(Ordering::Relaxed),
            dropped_blocks: self.dropped_blocks.load(Ordering::Relaxed),
            last_processing_ms: self.last_processing_us.load(Ordering::Relaxed) as f64 / 1000.0,
            peak_processing_ms: self.peak_processing_us.load(Ordering::Relaxed) as f64 / 1000.0,
        }
    }
}

/// Resources owned by a running session.
struct ActiveSession {
    stream: Box<dyn DuplexStream>,
    worker: Option<InferenceWorker>,
}

/// Owns the duplex stream and the per-session processing state.
///
/// Most callers use [`LifecycleController`](crate::LifecycleController),
/// which adds model management on top.
pub struct StreamEngine {
    backend: Arc<dyn AudioBackend>,
    events: EventSink,
    state: Arc<StateCell>,
    session: Option<ActiveSession>,
    stats: Arc<SessionState>,
}

impl StreamEngine {
    /// Creates a stopped engine.
    pub fn new(backend: Arc<dyn AudioBackend>, on_event: Option<EventCallback>) -> Self {
        Self::with_sink(backend, EventSink::new(on_event))
    }

    pub(crate) fn with_sink(backend: Arc<dyn AudioBackend>, events: EventSink) -> Self {
        Self {
            backend,
            events,
            state: Arc::new(StateCell::new(EngineState::Stopped)),
            session: None,
            stats: Arc::new(SessionState::new()),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> EngineState {
        self.state.load()
    }

    /// Returns `true` while audio is flowing.
    pub fn is_running(&self) -> bool {
        self.state() == EngineState::Running
    }

    /// Statistics of the current or most recent session.
    pub fn stats(&self) -> SessionStats {
        self.stats.snapshot()
    }

    /// Opens the devices and starts processing.
    ///
    /// Checks run in order: state, model readiness, configuration. None of
    /// them touches a device. A device failure leaves the engine `Errored`.
    ///
    /// # Errors
    ///
    /// - [`VocalStreamError::InvalidState`] unless stopped
    /// - [`VocalStreamError::ModelNotReady`] when `model` is `None`
    /// - [`VocalStreamError::InvalidConfig`] for a rejected configuration
    /// - any device error from the backend
    pub fn start(
        &mut self,
        config: &PipelineConfig,
        model: Option<SharedModel>,
    ) -> Result<(), VocalStreamError> {
        let current = self.state.load();
        if current != EngineState::Stopped {
            return Err(VocalStreamError::InvalidState {
                operation: "start",
                state: current,
            });
        }
        let model = model.ok_or(VocalStreamError::ModelNotReady)?;
        config.validate()?;

        self.state.store(EngineState::Starting);
        tracing::info!(
            block_size = config.block_size,
            buffer_capacity = config.buffer_capacity,
            back_offset = config.back_offset,
            scheduling = ?config.scheduling,
            "Starting stream"
        );

        let stats = Arc::new(SessionState::new());
        self.stats = Arc::clone(&stats);
        let processor =
            BlockProcessor::with_session(config, model, Arc::clone(&stats), self.events.clone());

        let (callback, worker) = match config.scheduling {
            SchedulingStrategy::Inline => {
                let mut processor = processor;
                let callback: DuplexCallback =
                    Box::new(move |input: &[f32], output: &mut [f32], status: StreamStatus| {
                        processor.process(input, output, status);
                    });
                (callback, None)
            }
            SchedulingStrategy::Decoupled => {
                let spawned = InferenceWorker::spawn(
                    processor,
                    config.block_samples(),
                    config.lookahead_blocks,
                    stats,
                );
                let (mut front_end, worker) = match spawned {
                    Ok(pair) => pair,
                    Err(err) => return Err(self.fail_start(err)),
                };
                let callback: DuplexCallback =
                    Box::new(move |input: &[f32], output: &mut [f32], status: StreamStatus| {
                        front_end.process(input, output, status);
                    });
                (callback, Some(worker))
            }
        };

        let spec = DuplexSpec::from_config(config);
        let mut stream = match self.backend.open_duplex(&spec, callback, self.fault_handler()) {
            Ok(stream) => stream,
            Err(err) => {
                drop(worker);
                return Err(self.fail_start(err));
            }
        };
        if let Err(err) = stream.start() {
            stream.close();
            drop(worker);
            return Err(self.fail_start(err));
        }

        self.session = Some(ActiveSession { stream, worker });

        if !self.state.transition(EngineState::Starting, EngineState::Running) {
            // A fatal fault arrived while starting; stop() releases the session
            return Err(VocalStreamError::DeviceOpenFailed {
                reason: "device failed while starting".to_string(),
            });
        }

        self.events.emit(PipelineEvent::info("Stream started."));
        self.events.emit(PipelineEvent::StreamStarted {
            latency: config.nominal_latency(),
        });
        Ok(())
    }

    /// Stops the stream and releases the session.
    ///
    /// When this returns no callback is in flight and the rolling buffer has
    /// been dropped. Calling it while already stopped does nothing.
    ///
    /// # Errors
    ///
    /// Currently infallible; the `Result` leaves room for backends whose
    /// shutdown can fail.
    pub fn stop(&mut self) -> Result<(), VocalStreamError> {
        let previous = self.state.swap(EngineState::Stopping);
        if previous == EngineState::Stopped {
            self.state.store(EngineState::Stopped);
            return Ok(());
        }

        if let Some(ActiveSession { mut stream, worker }) = self.session.take() {
            if let Err(err) = stream.stop() {
                tracing::debug!("Stream pause before close failed: {}", err);
            }
            stream.close();
            drop(worker);
        }

        self.state.store(EngineState::Stopped);
        let stats = self.stats.snapshot();
        tracing::debug!(
            blocks = stats.blocks_processed,
            failures = stats.inference_failures,
            overruns = stats.overruns,
            "Session finished"
        );
        self.events.emit(PipelineEvent::info("Stream stopped."));
        self.events.emit(PipelineEvent::StreamStopped);
        Ok(())
    }

    fn fail_start(&self, err: VocalStreamError) -> VocalStreamError {
        self.state.store(EngineState::Errored);
        self.events
            .emit(PipelineEvent::error(format!("Start Error: {err}")));
        self.events.emit(PipelineEvent::StreamErrored {
            error: err.to_string(),
        });
        err
    }

    fn fault_handler(&self) -> FaultCallback {
        let state = Arc::clone(&self.state);
        let events = self.events.clone();
        Arc::new(move |fault: DeviceFault| {
            if !fault.fatal {
                events.emit(PipelineEvent::warn(format!("Stream Error: {}", fault.message)));
                return;
            }
            let errored = state.transition(EngineState::Running, EngineState::Errored)
                || state.transition(EngineState::Starting, EngineState::Errored);
            if errored {
                events.emit(PipelineEvent::error(format!("Stream Error: {}", fault.message)));
                events.emit(PipelineEvent::StreamErrored {
                    error: fault.message,
                });
            }
        })
    }
}

impl Drop for StreamEngine {
    fn drop(&mut self) {
        if self.session.is_some() {
            let _ = self.stop();
        }
    }
}

impl std::fmt::Debug for StreamEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamEngine")
            .field("state", &self.state())
            .field("events", &self.events)
            .finish_non_exhaustive()
    }
}
