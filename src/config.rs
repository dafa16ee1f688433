//! Configuration types for the vocal isolation pipeline.

use std::time::Duration;

use crate::error::ConfigError;

/// Default block size in frames (one device callback).
pub const DEFAULT_BLOCK_SIZE: usize = 4048;
/// Default rolling buffer capacity in frames (the inference window).
pub const DEFAULT_BUFFER_CAPACITY: usize = 16000;
/// Default number of trailing frames trimmed from the model output.
pub const DEFAULT_BACK_OFFSET: usize = 1024;
/// Nominal device sample rate in Hz.
pub const DEFAULT_SAMPLE_RATE: u32 = 44_100;
/// Stereo in, stereo out.
pub const DEFAULT_CHANNELS: u16 = 2;
/// Default number of processed blocks the decoupled playback queue may hold.
pub const DEFAULT_LOOKAHEAD_BLOCKS: usize = 2;
/// Largest value accepted for any frame-count field.
pub const MAX_CONFIG_VALUE: usize = 1_000_000;
/// Largest accepted interleaved channel count.
pub const MAX_CHANNELS: u16 = 8;
/// Largest accepted decoupled playback queue, in blocks.
pub const MAX_LOOKAHEAD_BLOCKS: usize = 16;
/// Largest number of samples any one session buffer may hold (16 MB of f32).
pub const MAX_BUFFER_SAMPLES: usize = 4_000_000;

/// Selects an audio device on the host.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum DeviceSelection {
    /// Use the host's default device.
    #[default]
    Default,
    /// Use the device whose name matches, ignoring ASCII case.
    ByName(String),
    /// Use the device at this position in the host's enumeration.
    ByIndex(usize),
}

impl DeviceSelection {
    /// Selects a device by name.
    pub fn name(name: impl Into<String>) -> Self {
        Self::ByName(name.into())
    }

    /// Selects a device by enumeration index.
    pub fn index(index: usize) -> Self {
        Self::ByIndex(index)
    }
}

impl std::fmt::Display for DeviceSelection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Default => f.write_str("default"),
            Self::ByName(name) => f.write_str(name),
            Self::ByIndex(index) => write!(f, "#{index}"),
        }
    }
}

/// Where inference runs relative to the audio callback.
///
/// The strategy is fixed for the lifetime of a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SchedulingStrategy {
    /// Run inference synchronously inside the output callback.
    ///
    /// Lowest latency. When processing takes longer than a block, the device
    /// underruns and the listener hears gaps.
    #[default]
    Inline,

    /// Run inference on a dedicated thread fed by a bounded capture queue.
    ///
    /// The playback callback only copies finished blocks and substitutes
    /// silence when none is ready, so it never waits on the model. Adds up to
    /// `lookahead_blocks` blocks of latency.
    Decoupled,
}

/// Pipeline parameters for one stream session.
///
/// Use [`PipelineConfig::default()`] for the stock settings, or customize:
///
/// ```
/// use vocal_stream::{PipelineConfig, DeviceSelection};
///
/// let config = PipelineConfig::default()
///     .with_block_size(2048)
///     .with_back_offset(512)
///     .with_output_device(DeviceSelection::index(3));
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    /// Frames exchanged with the device per callback.
    ///
    /// Default: 4048
    pub block_size: usize,

    /// Frames held by the rolling buffer and fed to the model.
    ///
    /// Default: 16000
    pub buffer_capacity: usize,

    /// Trailing frames of model output skipped to avoid edge artifacts.
    ///
    /// Must be smaller than `block_size`. Default: 1024
    pub back_offset: usize,

    /// Device sample rate in Hz.
    ///
    /// Default: 44100
    pub sample_rate: u32,

    /// Interleaved channel count on both sides.
    ///
    /// Default: 2
    pub channels: u16,

    /// Capture device.
    pub input_device: DeviceSelection,

    /// Playback device.
    pub output_device: DeviceSelection,

    /// Inline or decoupled inference.
    pub scheduling: SchedulingStrategy,

    /// Capacity of the decoupled playback queue, in blocks.
    ///
    /// Ignored for inline scheduling. Default: 2
    pub lookahead_blocks: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            back_offset: DEFAULT_BACK_OFFSET,
            sample_rate: DEFAULT_SAMPLE_RATE,
            channels: DEFAULT_CHANNELS,
            input_device: DeviceSelection::Default,
            output_device: DeviceSelection::Default,
            scheduling: SchedulingStrategy::Inline,
            lookahead_blocks: DEFAULT_LOOKAHEAD_BLOCKS,
        }
    }
}

impl PipelineConfig {
    /// Sets the block size in frames.
    #[must_use]
    pub fn with_block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size;
        self
    }

    /// Sets the rolling buffer capacity in frames.
    #[must_use]
    pub fn with_buffer_capacity(mut self, buffer_capacity: usize) -> Self {
        self.buffer_capacity = buffer_capacity;
        self
    }

    /// Sets the trailing trim offset in frames.
    #[must_use]
    pub fn with_back_offset(mut self, back_offset: usize) -> Self {
        self.back_offset = back_offset;
        self
    }

    /// Sets the capture device.
    #[must_use]
    pub fn with_input_device(mut self, device: DeviceSelection) -> Self {
        self.input_device = device;
        self
    }

    /// Sets the playback device.
    #[must_use]
    pub fn with_output_device(mut self, device: DeviceSelection) -> Self {
        self.output_device = device;
        self
    }

    /// Sets the scheduling strategy.
    #[must_use]
    pub fn with_scheduling(mut self, scheduling: SchedulingStrategy) -> Self {
        self.scheduling = scheduling;
        self
    }

    /// Sets the decoupled playback queue capacity in blocks.
    #[must_use]
    pub fn with_lookahead_blocks(mut self, blocks: usize) -> Self {
        self.lookahead_blocks = blocks;
        self
    }

    /// Checks every field and field combination.
    ///
    /// # Errors
    ///
    /// Returns the first rule that the configuration breaks.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in [
            ("block_size", self.block_size),
            ("buffer_capacity", self.buffer_capacity),
            ("back_offset", self.back_offset),
        ] {
            if value > MAX_CONFIG_VALUE {
                return Err(ConfigError::OutOfRange {
                    field,
                    value,
                    max: MAX_CONFIG_VALUE,
                });
            }
        }

        if self.block_size == 0 {
            return Err(ConfigError::ZeroBlockSize);
        }
        if self.sample_rate == 0 {
            return Err(ConfigError::ZeroSampleRate);
        }
        if self.channels == 0 {
            return Err(ConfigError::ZeroChannels);
        }
        if self.channels > MAX_CHANNELS {
            return Err(ConfigError::TooManyChannels {
                channels: self.channels,
                max: MAX_CHANNELS,
            });
        }
        if self.lookahead_blocks > MAX_LOOKAHEAD_BLOCKS {
            return Err(ConfigError::OutOfRange {
                field: "lookahead_blocks",
                value: self.lookahead_blocks,
                max: MAX_LOOKAHEAD_BLOCKS,
            });
        }
        if self.buffer_capacity < self.block_size {
            return Err(ConfigError::BufferSmallerThanBlock {
                capacity: self.buffer_capacity,
                block_size: self.block_size,
            });
        }
        if self.back_offset >= self.block_size {
            return Err(ConfigError::BackOffsetTooLarge {
                back_offset: self.back_offset,
                block_size: self.block_size,
            });
        }
        if self.block_size + self.back_offset > self.buffer_capacity {
            return Err(ConfigError::TrimOutsideWindow {
                block_size: self.block_size,
                back_offset: self.back_offset,
                capacity: self.buffer_capacity,
            });
        }
        if self.scheduling == SchedulingStrategy::Decoupled && self.lookahead_blocks == 0 {
            return Err(ConfigError::ZeroLookahead);
        }

        check_buffer(
            "rolling window",
            self.buffer_capacity.checked_mul(usize::from(self.channels)),
        )?;
        if self.scheduling == SchedulingStrategy::Decoupled {
            check_buffer("decoupled queues", self.queue_samples())?;
        }
        Ok(())
    }

    /// Total samples held by the decoupled capture and playback queues.
    ///
    /// The capture queue holds `lookahead_blocks + 1` blocks and the playback
    /// queue `lookahead_blocks`. Returns `None` on overflow.
    pub fn queue_samples(&self) -> Option<usize> {
        let blocks = self.lookahead_blocks.checked_mul(2)?.checked_add(1)?;
        self.block_samples_checked()?.checked_mul(blocks)
    }

    fn block_samples_checked(&self) -> Option<usize> {
        self.block_size.checked_mul(usize::from(self.channels))
    }

    /// Nominal duration of one block at the configured sample rate.
    pub fn block_duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.block_size as f64 / f64::from(self.sample_rate))
    }

    /// Nominal duration of one block in milliseconds.
    pub fn block_ms(&self) -> f64 {
        self.block_duration().as_secs_f64() * 1000.0
    }

    /// Lag between a captured frame and its processed counterpart.
    ///
    /// One block of buffering plus the trimmed trailing frames. Decoupled
    /// scheduling adds up to `lookahead_blocks` blocks on top.
    pub fn nominal_latency(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        let mut frames = self.block_size.saturating_add(self.back_offset);
        if self.scheduling == SchedulingStrategy::Decoupled {
            frames = frames.saturating_add(self.block_size.saturating_mul(self.lookahead_blocks));
        }
        Duration::from_secs_f64(frames as f64 / f64::from(self.sample_rate))
    }

    /// Interleaved samples in one block.
    pub fn block_samples(&self) -> usize {
        self.block_size.saturating_mul(usize::from(self.channels))
    }
}

fn check_buffer(buffer: &'static str, samples: Option<usize>) -> Result<(), ConfigError> {
    match samples {
        Some(samples) if samples <= MAX_BUFFER_SAMPLES => Ok(()),
        samples => Err(ConfigError::BufferTooLarge {
            buffer,
            samples: samples.unwrap_or(usize::MAX),
            max: MAX_BUFFER_SAMPLES,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.block_size, 4048);
        assert_eq!(config.buffer_capacity, 16000);
        assert_eq!(config.back_offset, 1024);
        assert_eq!(config.sample_rate, 44_100);
        assert_eq!(config.channels, 2);
        assert_eq!(config.scheduling, SchedulingStrategy::Inline);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_block_ms() {
        let config = PipelineConfig::default();
        assert!((config.block_ms() - 91.79).abs() < 0.01);
    }

    #[test]
    fn test_rejects_zero_block() {
        let config = PipelineConfig::default().with_block_size(0);
        assert_eq!(config.validate(), Err(ConfigError::ZeroBlockSize));
    }

    #[test]
    fn test_rejects_buffer_smaller_than_block() {
        let config = PipelineConfig::default()
            .with_block_size(4096)
            .with_buffer_capacity(2048)
            .with_back_offset(0);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::BufferSmallerThanBlock { .. })
        ));
    }

    #[test]
    fn test_rejects_back_offset_equal_to_block() {
        let config = PipelineConfig::default().with_back_offset(4048);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::BackOffsetTooLarge { .. })
        ));
    }

    #[test]
    fn test_rejects_trim_outside_window() {
        let config = PipelineConfig::default()
            .with_block_size(4000)
            .with_buffer_capacity(4000)
            .with_back_offset(100);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::TrimOutsideWindow { .. })
        ));
    }

    #[test]
    fn test_rejects_out_of_range() {
        let config = PipelineConfig::default().with_buffer_capacity(MAX_CONFIG_VALUE + 1);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::OutOfRange {
                field: "buffer_capacity",
                ..
            })
        ));
    }

    #[test]
    fn test_rejects_zero_lookahead_only_when_decoupled() {
        let inline = PipelineConfig::default().with_lookahead_blocks(0);
        assert!(inline.validate().is_ok());

        let decoupled = inline.with_scheduling(SchedulingStrategy::Decoupled);
        assert_eq!(decoupled.validate(), Err(ConfigError::ZeroLookahead));
    }

    #[test]
    fn test_rejects_huge_lookahead() {
        let config = PipelineConfig::default()
            .with_scheduling(SchedulingStrategy::Decoupled)
            .with_lookahead_blocks(usize::MAX);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::OutOfRange {
                field: "lookahead_blocks",
                max: MAX_LOOKAHEAD_BLOCKS,
                ..
            })
        ));
        assert_eq!(config.queue_samples(), None);
    }

    #[test]
    fn test_rejects_too_many_channels() {
        let config = PipelineConfig {
            channels: u16::MAX,
            ..PipelineConfig::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::TooManyChannels {
                channels: u16::MAX,
                max: MAX_CHANNELS,
            })
        );
    }

    #[test]
    fn test_rejects_oversized_window() {
        let config = PipelineConfig {
            channels: MAX_CHANNELS,
            ..PipelineConfig::default()
        }
        .with_buffer_capacity(MAX_CONFIG_VALUE);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::BufferTooLarge {
                buffer: "rolling window",
                samples: 8_000_000,
                ..
            })
        ));

        let stereo = PipelineConfig {
            channels: 2,
            ..config
        };
        assert!(stereo.validate().is_ok());
    }

    #[test]
    fn test_rejects_oversized_decoupled_queues() {
        let config = PipelineConfig::default()
            .with_block_size(MAX_CONFIG_VALUE / 2)
            .with_buffer_capacity(MAX_CONFIG_VALUE)
            .with_scheduling(SchedulingStrategy::Decoupled)
            .with_lookahead_blocks(MAX_LOOKAHEAD_BLOCKS);
        assert_eq!(config.queue_samples(), Some(33_000_000));
        assert!(matches!(
            config.validate(),
            Err(ConfigError::BufferTooLarge {
                buffer: "decoupled queues",
                ..
            })
        ));

        let inline = config.with_scheduling(SchedulingStrategy::Inline);
        assert!(inline.validate().is_ok());
    }

    #[test]
    fn test_nominal_latency() {
        let config = PipelineConfig::default()
            .with_block_size(4410)
            .with_back_offset(441);
        assert!((config.nominal_latency().as_secs_f64() - 0.110).abs() < 1e-6);

        let decoupled = config
            .with_scheduling(SchedulingStrategy::Decoupled)
            .with_lookahead_blocks(1);
        assert!((decoupled.nominal_latency().as_secs_f64() - 0.210).abs() < 1e-6);
    }

    #[test]
    fn test_device_selection_display() {
        assert_eq!(DeviceSelection::Default.to_string(), "default");
        assert_eq!(DeviceSelection::name("Speakers").to_string(), "Speakers");
        assert_eq!(DeviceSelection::index(4).to_string(), "#4");
    }
}
