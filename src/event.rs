//! Events emitted to the UI layer.
//!
//! The pipeline never talks to a UI directly. Everything a front end needs to
//! display - log lines, timing, readiness, stream transitions - is delivered
//! as a [`PipelineEvent`] to a subscriber registered on the builder.
//!
//! Some events are emitted from the real-time audio context. Subscribers must
//! return quickly and must not block; [`event_channel`] gives a subscriber
//! that never blocks by dropping events when its queue is full.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::pipeline::TimingSample;

/// Severity of a [`PipelineEvent::Log`] line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Informational progress.
    Info,
    /// Degraded but still running.
    Warn,
    /// An operation failed.
    Error,
}

/// Notifications about pipeline state and health.
///
/// # Example
///
/// ```
/// use vocal_stream::PipelineEvent;
///
/// fn handle_event(event: PipelineEvent) {
///     match event {
///         PipelineEvent::Log { message, .. } => println!("{message}"),
///         PipelineEvent::Timing(sample) => {
///             println!("RT factor: {:.2}", sample.real_time_factor);
///         }
///         PipelineEvent::ModelReady { .. } => println!("ready"),
///         _ => {}
///     }
/// }
/// ```
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    /// A human-readable log line.
    Log {
        /// Severity.
        level: LogLevel,
        /// The message.
        message: String,
    },

    /// Timing for one inference call.
    Timing(TimingSample),

    /// Model acquisition has started.
    ModelLoading {
        /// Loader description, including the execution target.
        description: String,
    },

    /// The model is loaded and the stream may be started.
    ModelReady {
        /// Name reported by the model.
        model: String,
        /// Wall-clock load time.
        load_time: Duration,
    },

    /// Model acquisition failed. The controller stays not ready.
    ModelLoadFailed {
        /// Description of the failure.
        error: String,
    },

    /// The duplex stream is running.
    StreamStarted {
        /// Nominal lag between capture and playback.
        latency: Duration,
    },

    /// The duplex stream was stopped and its buffers released.
    StreamStopped,

    /// The stream failed and the session is in the errored state.
    StreamErrored {
        /// Description of the failure.
        error: String,
    },

    /// The audio device reported a non-fatal condition.
    DeviceStatus {
        /// Flags raised for this block.
        status: crate::device::StreamStatus,
    },

    /// One block could not be processed and was replaced with silence.
    InferenceFailed {
        /// Description of the failure.
        error: String,
        /// Total failures in this session so far.
        total_failures: u64,
    },
}

impl PipelineEvent {
    pub(crate) fn info(message: impl Into<String>) -> Self {
        Self::Log {
            level: LogLevel::Info,
            message: message.into(),
        }
    }

    pub(crate) fn warn(message: impl Into<String>) -> Self {
        Self::Log {
            level: LogLevel::Warn,
            message: message.into(),
        }
    }

    pub(crate) fn error(message: impl Into<String>) -> Self {
        Self::Log {
            level: LogLevel::Error,
            message: message.into(),
        }
    }
}

/// Callback type for receiving pipeline events.
pub type EventCallback = Arc<dyn Fn(PipelineEvent) + Send + Sync>;

/// Creates an [`EventCallback`] from a closure.
///
/// # Example
///
/// ```
/// use vocal_stream::{event_callback, PipelineEvent};
///
/// let callback = event_callback(|event| {
///     println!("Got event: {:?}", event);
/// });
/// ```
pub fn event_callback<F>(f: F) -> EventCallback
where
    F: Fn(PipelineEvent) + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Creates a bounded event queue and a non-blocking callback feeding it.
///
/// Events that arrive while the queue is full are dropped, so the callback
/// is safe to invoke from the audio thread.
///
/// # Example
///
/// ```
/// use vocal_stream::event_channel;
///
/// let (callback, mut rx) = event_channel(64);
/// // pass `callback` to VocalStream::builder().on_event_callback(...)
/// # drop(callback);
/// # assert!(rx.try_recv().is_err());
/// ```
pub fn event_channel(capacity: usize) -> (EventCallback, mpsc::Receiver<PipelineEvent>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let callback = event_callback(move |event| {
        let _ = tx.try_send(event);
    });
    (callback, rx)
}

/// Optional subscriber plus the `tracing` mirror of every log line.
#[derive(Clone, Default)]
pub(crate) struct EventSink {
    callback: Option<EventCallback>,
}

impl EventSink {
    pub fn new(callback: Option<EventCallback>) -> Self {
        Self { callback }
    }

    pub fn emit(&self, event: PipelineEvent) {
        if let PipelineEvent::Log { level, message } = &event {
            match level {
                LogLevel::Info => tracing::info!("{message}"),
                LogLevel::Warn => tracing::warn!("{message}"),
                LogLevel::Error => tracing::error!("{message}"),
            }
        }
        if let Some(ref callback) = self.callback {
            callback(event);
        }
    }
}

impl std::fmt::Debug for EventSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventSink")
            .field("subscribed", &self.callback.is_some())
            .finish()
    }
}
