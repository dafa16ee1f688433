//! Decoupled scheduling: inference on its own thread.
//!
//! ```text
//! duplex callback ──capture ring──► inference thread ──playback ring──► duplex callback
//! ```
//!
//! The callback never waits on the model. It queues captured frames, plays
//! whatever processed block is ready, and substitutes silence when nothing is.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};

use crate::config::MAX_BUFFER_SAMPLES;
use crate::device::StreamStatus;
use crate::engine::SessionState;
use crate::error::{ConfigError, VocalStreamError};
use crate::pipeline::BlockProcessor;

/// Upper bound on how long the worker sleeps without a wakeup.
const WAIT_TIMEOUT: Duration = Duration::from_millis(5);

/// Wakeup and shutdown signalling between the callback and the worker.
#[derive(Debug)]
struct WorkerSignal {
    running: AtomicBool,
    pending: Mutex<bool>,
    condvar: Condvar,
    /// Device status flags not yet handed to the processor.
    status: AtomicU8,
}

impl WorkerSignal {
    fn new() -> Self {
        Self {
            running: AtomicBool::new(true),
            pending: Mutex::new(false),
            condvar: Condvar::new(),
            status: AtomicU8::new(0),
        }
    }

    /// Wakes the worker without blocking the caller.
    fn notify(&self) {
        if let Some(mut pending) = self.pending.try_lock() {
            *pending = true;
        }
        self.condvar.notify_one();
    }
}

/// The half of the decoupled pipeline that runs inside the duplex callback.
pub(crate) struct DecoupledFrontEnd {
    capture: HeapProd<f32>,
    playback: HeapCons<f32>,
    signal: Arc<WorkerSignal>,
    state: Arc<SessionState>,
}

impl DecoupledFrontEnd {
    /// Queues `input` for inference and fills `output` from finished blocks.
    pub fn process(&mut self, input: &[f32], output: &mut [f32], status: StreamStatus) {
        if !status.is_empty() {
            self.signal.status.fetch_or(status.bits(), Ordering::Relaxed);
        }

        let pushed = self.capture.push_slice(input);
        if pushed < input.len() {
            self.state.dropped_blocks.fetch_add(1, Ordering::Relaxed);
        }

        if self.playback.occupied_len() >= output.len() {
            self.playback.pop_slice(output);
        } else {
            output.fill(0.0);
            self.state.starved_callbacks.fetch_add(1, Ordering::Relaxed);
        }

        self.signal.notify();
    }
}

/// Handle to the inference thread. Stopping joins it.
pub(crate) struct InferenceWorker {
    signal: Arc<WorkerSignal>,
    handle: Option<JoinHandle<()>>,
}

impl InferenceWorker {
    /// Spawns the inference thread and returns the callback-side front end.
    ///
    /// The playback queue holds at most `lookahead_blocks` processed blocks.
    pub fn spawn(
        processor: BlockProcessor,
        block_samples: usize,
        lookahead_blocks: usize,
        state: Arc<SessionState>,
    ) -> Result<(DecoupledFrontEnd, Self), VocalStreamError> {
        let lookahead_blocks = lookahead_blocks.max(1);
        let capture_len = lookahead_blocks
            .checked_add(1)
            .and_then(|blocks| block_samples.checked_mul(blocks));
        let playback_len = block_samples.checked_mul(lookahead_blocks);
        let (Some(capture_len), Some(playback_len)) = (capture_len, playback_len) else {
            return Err(ConfigError::BufferTooLarge {
                buffer: "decoupled queues",
                samples: usize::MAX,
                max: MAX_BUFFER_SAMPLES,
            }
            .into());
        };

        let (capture_prod, capture_cons) = HeapRb::<f32>::new(capture_len).split();
        let (playback_prod, playback_cons) = HeapRb::<f32>::new(playback_len).split();

        let signal = Arc::new(WorkerSignal::new());
        let thread_signal = Arc::clone(&signal);
        let thread_state = Arc::clone(&state);

        let handle = thread::Builder::new()
            .name("vocal-stream-inference".into())
            .spawn(move || {
                run(
                    processor,
                    capture_cons,
                    playback_prod,
                    block_samples,
                    &thread_signal,
                    &thread_state,
                );
            })
            .map_err(|e| {
                VocalStreamError::BackendError(format!("failed to spawn inference thread: {e}"))
            })?;

        tracing::debug!(
            block_samples,
            lookahead_blocks,
            "Inference worker started"
        );

        let front_end = DecoupledFrontEnd {
            capture: capture_prod,
            playback: playback_cons,
            signal: Arc::clone(&signal),
            state,
        };
        Ok((
            front_end,
            Self {
                signal,
                handle: Some(handle),
            },
        ))
    }

    /// Stops the thread and waits for the block in progress to finish.
    pub fn stop(&mut self) {
        self.signal.running.store(false, Ordering::Release);
        self.signal.condvar.notify_all();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!("Inference worker panicked");
            }
        }
    }
}

impl Drop for InferenceWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run(
    mut processor: BlockProcessor,
    mut capture: HeapCons<f32>,
    mut playback: HeapProd<f32>,
    block_samples: usize,
    signal: &WorkerSignal,
    state: &SessionState,
) {
    let mut input = vec![0.0; block_samples];
    let mut output = vec![0.0; block_samples];

    while signal.running.load(Ordering::Acquire) {
        if capture.occupied_len() >= block_samples {
            capture.pop_slice(&mut input);
            let status = StreamStatus::from_bits(signal.status.swap(0, Ordering::Relaxed));
            processor.process(&input, &mut output, status);

            if playback.vacant_len() >= block_samples {
                playback.push_slice(&output);
            } else {
                state.dropped_blocks.fetch_add(1, Ordering::Relaxed);
            }
            continue;
        }

        let mut pending = signal.pending.lock();
        if !*pending {
            signal.condvar.wait_for(&mut pending, WAIT_TIMEOUT);
        }
        *pending = false;
    }

    tracing::debug!("Inference worker finished");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;
    use crate::model::{shared_model, MockModel};
    use std::time::Instant;

    fn small_config() -> PipelineConfig {
        PipelineConfig::default()
            .with_block_size(4)
            .with_buffer_capacity(8)
            .with_back_offset(0)
    }

    /// Calls the front end until it yields a non-silent block or times out.
    fn drive_until_audible(front_end: &mut DecoupledFrontEnd, input: &[f32]) -> Vec<f32> {
        let mut output = vec![0.0; input.len()];
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            front_end.process(input, &mut output, StreamStatus::default());
            if output.iter().any(|&s| s != 0.0) {
                break;
            }
            thread::sleep(Duration::from_millis(2));
        }
        output
    }

    #[test]
    fn test_processed_blocks_reach_playback() {
        let config = small_config();
        let state = Arc::new(SessionState::new());
        let processor = BlockProcessor::new(&config, shared_model(MockModel::new()));
        let (mut front_end, mut worker) =
            InferenceWorker::spawn(processor, 8, 2, Arc::clone(&state)).unwrap();

        let output = drive_until_audible(&mut front_end, &[0.5; 8]);
        worker.stop();

        assert!(output.iter().all(|&s| s == 0.5));
        assert!(state.snapshot().starved_callbacks >= 1);
    }

    #[test]
    fn test_starved_callback_plays_silence() {
        let config = small_config();
        let state = Arc::new(SessionState::new());
        let model = shared_model(MockModel::new().with_latency(Duration::from_millis(200)));
        let processor = BlockProcessor::new(&config, model);
        let (mut front_end, mut worker) =
            InferenceWorker::spawn(processor, 8, 1, Arc::clone(&state)).unwrap();

        let mut output = vec![1.0; 8];
        let start = Instant::now();
        front_end.process(&[0.5; 8], &mut output, StreamStatus::default());

        // The callback returns immediately even though the model is slow
        assert!(start.elapsed() < Duration::from_millis(100));
        assert!(output.iter().all(|&s| s == 0.0));
        assert_eq!(state.snapshot().starved_callbacks, 1);

        worker.stop();
    }

    #[test]
    fn test_overflowing_queue_size_is_rejected() {
        let config = small_config();
        let processor = BlockProcessor::new(&config, shared_model(MockModel::new()));

        let result = InferenceWorker::spawn(processor, 8, usize::MAX, Arc::new(SessionState::new()));

        assert!(matches!(
            result,
            Err(VocalStreamError::InvalidConfig(ConfigError::BufferTooLarge { .. }))
        ));
    }

    #[test]
    fn test_stop_is_idempotent() {
        let config = small_config();
        let processor = BlockProcessor::new(&config, shared_model(MockModel::new()));
        let (_front_end, mut worker) =
            InferenceWorker::spawn(processor, 8, 2, Arc::new(SessionState::new())).unwrap();

        worker.stop();
        worker.stop();
    }
}
