//! Per-block timing and real-time factor accounting.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use crate::engine::SessionState;

/// Timing for one inference call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimingSample {
    /// Wall-clock time spent inside the model.
    pub processing_ms: f64,
    /// Nominal duration of one block at the configured sample rate.
    pub block_ms: f64,
    /// `processing_ms / block_ms`; above 1.0 the pipeline cannot keep up.
    pub real_time_factor: f64,
}

impl TimingSample {
    /// Builds a sample, computing the real-time factor.
    pub fn new(processing_ms: f64, block_ms: f64) -> Self {
        Self {
            processing_ms,
            block_ms,
            real_time_factor: real_time_factor(processing_ms, block_ms),
        }
    }

    /// Returns `true` when processing took longer than the block lasts.
    pub fn is_overrun(&self) -> bool {
        self.real_time_factor > 1.0
    }
}

/// Processing time divided by block time, or 0 for a non-positive block time.
pub fn real_time_factor(processing_ms: f64, block_ms: f64) -> f64 {
    if block_ms > 0.0 {
        processing_ms / block_ms
    } else {
        0.0
    }
}

/// Nominal block duration in milliseconds.
pub fn block_ms(block_size: usize, sample_rate: u32) -> f64 {
    if sample_rate == 0 {
        return 0.0;
    }
    block_size as f64 / f64::from(sample_rate) * 1000.0
}

/// Observes inference timing and folds it into the session statistics.
///
/// Informational only: nothing in the scheduler reacts to these numbers.
#[derive(Debug)]
pub struct TimingMonitor {
    block_ms: f64,
    state: Option<Arc<SessionState>>,
    in_overrun: bool,
}

impl TimingMonitor {
    /// Creates a monitor for blocks of `block_size` frames.
    pub fn new(block_size: usize, sample_rate: u32) -> Self {
        Self {
            block_ms: block_ms(block_size, sample_rate),
            state: None,
            in_overrun: false,
        }
    }

    /// Attaches the shared session counters.
    pub(crate) fn with_state(mut self, state: Arc<SessionState>) -> Self {
        self.state = Some(state);
        self
    }

    /// Nominal block duration this monitor reports against.
    pub fn block_ms(&self) -> f64 {
        self.block_ms
    }

    /// Records one inference measured against the nominal block time.
    pub fn record(&mut self, processing_ms: f64) -> TimingSample {
        self.observe(processing_ms, self.block_ms)
    }

    /// Records one inference against an explicit block time.
    pub fn observe(&mut self, processing_ms: f64, block_ms: f64) -> TimingSample {
        let sample = TimingSample::new(processing_ms, block_ms);

        if sample.is_overrun() && !self.in_overrun {
            tracing::warn!(
                processing_ms = sample.processing_ms,
                block_ms = sample.block_ms,
                rtf = sample.real_time_factor,
                "Inference slower than real time"
            );
        }
        self.in_overrun = sample.is_overrun();

        if let Some(ref state) = self.state {
            state.record_timing(&sample);
        }
        sample
    }
}

impl SessionState {
    fn record_timing(&self, sample: &TimingSample) {
        let micros = (sample.processing_ms * 1000.0).max(0.0) as u64;
        self.last_processing_us.store(micros, Ordering::Relaxed);
        self.peak_processing_us.fetch_max(micros, Ordering::Relaxed);
        if sample.is_overrun() {
            self.overruns.fetch_add(1, Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_ms_default_geometry() {
        assert!((block_ms(4048, 44_100) - 91.79).abs() < 0.01);
    }

    #[test]
    fn test_slow_inference_reports_rtf_above_one() {
        let mut monitor = TimingMonitor::new(4048, 44_100);
        let sample = monitor.record(150.0);
        assert!((sample.real_time_factor - 1.634).abs() < 0.01);
        assert!(sample.is_overrun());
    }

    #[test]
    fn test_zero_block_time_reports_zero() {
        assert_eq!(real_time_factor(10.0, 0.0), 0.0);
        assert_eq!(real_time_factor(10.0, -1.0), 0.0);
        assert_eq!(block_ms(4048, 0), 0.0);
    }

    #[test]
    fn test_observe_updates_session_state() {
        let state = Arc::new(SessionState::new());
        let mut monitor = TimingMonitor::new(4410, 44_100).with_state(state.clone());

        monitor.record(50.0);
        monitor.record(120.0);
        monitor.record(80.0);

        let stats = state.snapshot();
        assert_eq!(stats.overruns, 1);
        assert!((stats.last_processing_ms - 80.0).abs() < 0.01);
        assert!((stats.peak_processing_ms - 120.0).abs() < 0.01);
    }
}
