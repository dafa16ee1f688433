//! Per-block processing: rolling window, inference, trim, timing.
//!
//! The processor is owned by exactly one real-time context at a time: the
//! output callback for inline scheduling, or the inference thread for
//! decoupled scheduling. Nothing here blocks on anything but the model.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use crate::config::PipelineConfig;
use crate::device::StreamStatus;
use crate::engine::SessionState;
use crate::error::InferenceError;
use crate::event::{EventSink, PipelineEvent};
use crate::model::{InferenceAdapter, SharedModel};
use crate::pipeline::{fit_to_frames, RollingBuffer, TimingMonitor, TimingSample, TrimPolicy};

/// Blocks between periodic debug log lines.
const LOG_EVERY_BLOCKS: u64 = 50;

/// Turns one block of captured audio into one block of isolated vocals.
///
/// Any failure inside a block is contained here: the output becomes a full
/// block of silence and the next block starts fresh.
///
/// ```
/// use vocal_stream::model::shared_model;
/// use vocal_stream::pipeline::BlockProcessor;
/// use vocal_stream::{MockModel, PipelineConfig};
///
/// let config = PipelineConfig::default()
///     .with_block_size(256)
///     .with_buffer_capacity(1024)
///     .with_back_offset(64);
/// let mut processor = BlockProcessor::new(&config, shared_model(MockModel::new()));
///
/// let input = vec![0.1; 256 * 2];
/// let mut output = vec![0.0; 256 * 2];
/// processor.process_block(&input, &mut output);
/// ```
#[derive(Debug)]
pub struct BlockProcessor {
    buffer: RollingBuffer,
    adapter: InferenceAdapter,
    trim: TrimPolicy,
    timing: TimingMonitor,
    channels: usize,
    state: Arc<SessionState>,
    events: EventSink,
    last_timing: Option<TimingSample>,
}

impl BlockProcessor {
    /// Creates a processor with a zero-filled window for `config`.
    ///
    /// `config` should already be validated.
    pub fn new(config: &PipelineConfig, model: SharedModel) -> Self {
        Self::with_session(
            config,
            model,
            Arc::new(SessionState::new()),
            EventSink::default(),
        )
    }

    pub(crate) fn with_session(
        config: &PipelineConfig,
        model: SharedModel,
        state: Arc<SessionState>,
        events: EventSink,
    ) -> Self {
        tracing::debug!(
            "BlockProcessor creating: block={}, window={}, back={}, {}Hz/{}ch",
            config.block_size,
            config.buffer_capacity,
            config.back_offset,
            config.sample_rate,
            config.channels
        );

        Self {
            buffer: RollingBuffer::new(config.buffer_capacity, config.channels),
            adapter: InferenceAdapter::new(model, config.buffer_capacity, config.channels),
            trim: TrimPolicy::new(config.block_size, config.back_offset),
            timing: TimingMonitor::new(config.block_size, config.sample_rate)
                .with_state(Arc::clone(&state)),
            channels: usize::from(config.channels.max(1)),
            state,
            events,
            last_timing: None,
        }
    }

    /// Timing of the most recent model call.
    pub fn last_timing(&self) -> Option<TimingSample> {
        self.last_timing
    }

    /// Read access to the rolling window.
    pub fn window(&self) -> &RollingBuffer {
        &self.buffer
    }

    /// Processes one block with no device status flags.
    pub fn process_block(&mut self, input: &[f32], output: &mut [f32]) {
        self.process(input, output, StreamStatus::default());
    }

    /// Processes one block.
    ///
    /// `output` is always fully written: with vocals on success, with
    /// silence on failure.
    pub fn process(&mut self, input: &[f32], output: &mut [f32], status: StreamStatus) {
        if !status.is_empty() {
            self.report_status(status);
        }

        if let Err(err) = self.render(input, output) {
            output.fill(0.0);
            let total_failures = self.state.inference_failures.fetch_add(1, Ordering::Relaxed) + 1;
            tracing::warn!(total_failures, "Inference failed, playing silence: {}", err);
            self.events.emit(PipelineEvent::InferenceFailed {
                error: err.to_string(),
                total_failures,
            });
        }

        let blocks = self.state.blocks_processed.fetch_add(1, Ordering::Relaxed);
        if blocks % LOG_EVERY_BLOCKS == 0 {
            tracing::debug!(
                "BlockProcessor: block #{}, {} samples, last={:?}",
                blocks,
                output.len(),
                self.last_timing.map(|t| t.real_time_factor)
            );
        }
    }

    fn render(&mut self, input: &[f32], output: &mut [f32]) -> Result<(), InferenceError> {
        self.buffer.push(input);

        let inferred = self.adapter.infer(&self.buffer).map(|_| ());
        // Timed even when the output is rejected afterwards
        if let Some(processing_ms) = self.adapter.last_call_ms() {
            let sample = self.timing.record(processing_ms);
            self.last_timing = Some(sample);
            self.events.emit(PipelineEvent::Timing(sample));
        }
        inferred?;

        let block = self.trim.extract(self.adapter.vocals(), self.channels);
        fit_to_frames(block, output);
        Ok(())
    }

    fn report_status(&self, status: StreamStatus) {
        self.state
            .device_status_events
            .fetch_add(1, Ordering::Relaxed);
        self.events
            .emit(PipelineEvent::warn(format!("Status Error: {status}")));
        self.events.emit(PipelineEvent::DeviceStatus { status });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::event_callback;
    use crate::model::{shared_model, MockModel};
    use parking_lot::Mutex;

    fn small_config() -> PipelineConfig {
        PipelineConfig::default()
            .with_block_size(4)
            .with_buffer_capacity(12)
            .with_back_offset(2)
    }

    fn collecting_sink() -> (EventSink, Arc<Mutex<Vec<PipelineEvent>>>) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let events_clone = Arc::clone(&events);
        let sink = EventSink::new(Some(event_callback(move |e| events_clone.lock().push(e))));
        (sink, events)
    }

    /// Stereo block where both channels carry the running frame number.
    fn ramp_block(start: usize, frames: usize) -> Vec<f32> {
        (start..start + frames)
            .flat_map(|i| [i as f32, i as f32])
            .collect()
    }

    #[test]
    fn test_output_lags_by_back_offset() {
        let config = small_config();
        let mut processor = BlockProcessor::new(&config, shared_model(MockModel::new()));
        let mut output = vec![0.0; 8];

        processor.process_block(&ramp_block(1, 4), &mut output);
        processor.process_block(&ramp_block(5, 4), &mut output);

        // Window ends at frame 8; trim takes frames 3..=6 of the ramp
        assert_eq!(output, vec![3.0, 3.0, 4.0, 4.0, 5.0, 5.0, 6.0, 6.0]);
    }

    #[test]
    fn test_failure_writes_silence_then_recovers() {
        let config = small_config();
        let state = Arc::new(SessionState::new());
        let (sink, events) = collecting_sink();
        let model = shared_model(MockModel::new().failing_on_call(1));
        let mut processor =
            BlockProcessor::with_session(&config, model, Arc::clone(&state), sink);

        let mut output = vec![9.0; 8];
        processor.process_block(&ramp_block(1, 4), &mut output);
        assert!(output.iter().all(|&s| s == 0.0));

        processor.process_block(&ramp_block(5, 4), &mut output);
        assert_eq!(output[0], 3.0);

        let stats = state.snapshot();
        assert_eq!(stats.inference_failures, 1);
        assert_eq!(stats.blocks_processed, 2);
        assert!(events
            .lock()
            .iter()
            .any(|e| matches!(e, PipelineEvent::InferenceFailed { total_failures: 1, .. })));
    }

    #[test]
    fn test_panicking_model_yields_silence() {
        let config = small_config();
        let model = shared_model(MockModel::new().panicking_on_call(1));
        let mut processor = BlockProcessor::new(&config, model);

        let mut output = vec![1.0; 8];
        processor.process_block(&ramp_block(1, 4), &mut output);
        assert!(output.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_short_model_output_is_padded() {
        let config = small_config();
        let model = shared_model(MockModel::new().with_output_frames(3));
        let mut processor = BlockProcessor::new(&config, model);

        let mut output = vec![9.0; 8];
        processor.process_block(&ramp_block(1, 4), &mut output);
        assert_eq!(output.len(), 8);
        assert!(output[6..].iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_status_flags_are_reported() {
        let config = small_config();
        let state = Arc::new(SessionState::new());
        let (sink, events) = collecting_sink();
        let mut processor = BlockProcessor::with_session(
            &config,
            shared_model(MockModel::new()),
            Arc::clone(&state),
            sink,
        );

        let status = StreamStatus {
            input_overflow: true,
            ..StreamStatus::default()
        };
        let mut output = vec![0.0; 8];
        processor.process(&ramp_block(1, 4), &mut output, status);

        assert_eq!(state.snapshot().device_status_events, 1);
        let events = events.lock();
        assert!(events.iter().any(|e| matches!(
            e,
            PipelineEvent::Log { message, .. } if message.starts_with("Status Error:")
        )));
        assert!(events
            .iter()
            .any(|e| matches!(e, PipelineEvent::DeviceStatus { .. })));
    }

    #[test]
    fn test_rejected_output_is_still_timed() {
        let config = small_config();
        let state = Arc::new(SessionState::new());
        let (sink, events) = collecting_sink();
        let model = MockModel::new()
            .with_gain(f32::INFINITY)
            .with_latency(std::time::Duration::from_millis(5));
        let mut processor =
            BlockProcessor::with_session(&config, shared_model(model), Arc::clone(&state), sink);

        let mut output = vec![9.0; 8];
        processor.process_block(&ramp_block(1, 4), &mut output);

        assert!(output.iter().all(|&s| s == 0.0));
        let events = events.lock();
        let timing = events.iter().find_map(|e| match e {
            PipelineEvent::Timing(sample) => Some(*sample),
            _ => None,
        });
        assert!(timing.is_some_and(|t| t.processing_ms >= 5.0));
        assert!(events
            .iter()
            .any(|e| matches!(e, PipelineEvent::InferenceFailed { .. })));

        let stats = state.snapshot();
        assert_eq!(stats.inference_failures, 1);
        assert!(stats.last_processing_ms >= 5.0);
        assert!(processor.last_timing().is_some());
    }

    #[test]
    fn test_window_holds_latest_block() {
        let config = small_config();
        let mut processor = BlockProcessor::new(&config, shared_model(MockModel::new()));
        let mut output = vec![0.0; 8];

        processor.process_block(&ramp_block(1, 4), &mut output);

        assert_eq!(processor.window().capacity(), 12);
        assert_eq!(processor.window().last_frames(1), vec![4.0, 4.0]);
    }

    #[test]
    fn test_timing_emitted_per_block() {
        let config = small_config();
        let (sink, events) = collecting_sink();
        let mut processor = BlockProcessor::with_session(
            &config,
            shared_model(MockModel::new()),
            Arc::new(SessionState::new()),
            sink,
        );

        let mut output = vec![0.0; 8];
        for i in 0..3 {
            processor.process_block(&ramp_block(i * 4, 4), &mut output);
        }

        let timings = events
            .lock()
            .iter()
            .filter(|e| matches!(e, PipelineEvent::Timing(_)))
            .count();
        assert_eq!(timings, 3);
        assert!(processor.last_timing().is_some());
    }
}
