//! Audio device abstraction.
//!
//! The engine talks to hardware through [`AudioBackend`], which opens one
//! full-duplex stream per session. A duplex stream invokes a single callback
//! per block with the captured input and the output buffer to fill.
//!
//! - [`CpalBackend`]: real devices via CPAL
//! - [`MockBackend`]: drives the callback by hand, for tests

mod cpal_backend;
mod mock;

pub use cpal_backend::CpalBackend;
pub use mock::MockBackend;

use std::sync::Arc;

use crate::config::{DeviceSelection, PipelineConfig};
use crate::error::VocalStreamError;

/// Non-fatal conditions the device reported for a block.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamStatus {
    /// Captured frames were discarded because the input queue was full.
    pub input_overflow: bool,
    /// Fewer frames were captured than the block needed; the rest is silence.
    pub input_underflow: bool,
    /// The output device ran dry before the block was delivered.
    pub output_underflow: bool,
}

const INPUT_OVERFLOW: u8 = 1;
const INPUT_UNDERFLOW: u8 = 1 << 1;
const OUTPUT_UNDERFLOW: u8 = 1 << 2;

impl StreamStatus {
    /// Returns `true` when no flag is raised.
    pub fn is_empty(&self) -> bool {
        !(self.input_overflow || self.input_underflow || self.output_underflow)
    }

    pub(crate) fn bits(self) -> u8 {
        let mut bits = 0;
        if self.input_overflow {
            bits |= INPUT_OVERFLOW;
        }
        if self.input_underflow {
            bits |= INPUT_UNDERFLOW;
        }
        if self.output_underflow {
            bits |= OUTPUT_UNDERFLOW;
        }
        bits
    }

    pub(crate) fn from_bits(bits: u8) -> Self {
        Self {
            input_overflow: bits & INPUT_OVERFLOW != 0,
            input_underflow: bits & INPUT_UNDERFLOW != 0,
            output_underflow: bits & OUTPUT_UNDERFLOW != 0,
        }
    }
}

impl std::fmt::Display for StreamStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_empty() {
            return f.write_str("ok");
        }
        let flags = [
            (self.input_overflow, "input overflow"),
            (self.input_underflow, "input underflow"),
            (self.output_underflow, "output underflow"),
        ];
        let mut first = true;
        for (_, name) in flags.iter().filter(|(set, _)| *set) {
            if !first {
                f.write_str(", ")?;
            }
            f.write_str(name)?;
            first = false;
        }
        Ok(())
    }
}

/// An error reported asynchronously by a running stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceFault {
    /// Description from the backend.
    pub message: String,
    /// The stream cannot continue (for example, the device was unplugged).
    pub fatal: bool,
}

/// Per-block duplex callback: `(input, output, status)`.
///
/// `input` and `output` hold the same number of interleaved frames. The
/// callback must write every sample of `output`.
pub type DuplexCallback = Box<dyn FnMut(&[f32], &mut [f32], StreamStatus) + Send>;

/// Receives asynchronous stream faults.
pub type FaultCallback = Arc<dyn Fn(DeviceFault) + Send + Sync>;

/// Parameters for opening a duplex stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuplexSpec {
    /// Capture device.
    pub input_device: DeviceSelection,
    /// Playback device.
    pub output_device: DeviceSelection,
    /// Sample rate for both sides.
    pub sample_rate: u32,
    /// Interleaved channel count for both sides.
    pub channels: u16,
    /// Frames per callback.
    pub block_size: usize,
}

impl DuplexSpec {
    /// Extracts the device parameters of a pipeline configuration.
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            input_device: config.input_device.clone(),
            output_device: config.output_device.clone(),
            sample_rate: config.sample_rate,
            channels: config.channels,
            block_size: config.block_size,
        }
    }

    /// Interleaved samples per callback.
    pub fn block_samples(&self) -> usize {
        self.block_size * usize::from(self.channels)
    }
}

/// Opens duplex streams.
pub trait AudioBackend: Send + Sync {
    /// Opens (but does not start) a duplex stream.
    ///
    /// The callback runs on the backend's real-time thread. `on_fault` may be
    /// called from any thread.
    ///
    /// # Errors
    ///
    /// Returns an error if a device cannot be found, opened or configured.
    fn open_duplex(
        &self,
        spec: &DuplexSpec,
        callback: DuplexCallback,
        on_fault: FaultCallback,
    ) -> Result<Box<dyn DuplexStream>, VocalStreamError>;
}

/// An open duplex stream.
pub trait DuplexStream: Send {
    /// Starts delivering callbacks.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend refuses to start.
    fn start(&mut self) -> Result<(), VocalStreamError>;

    /// Pauses callbacks, keeping the stream open.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend refuses to pause.
    fn stop(&mut self) -> Result<(), VocalStreamError>;

    /// Releases the stream. Once this returns, no callback is running and
    /// the callback has been dropped.
    fn close(self: Box<Self>);
}

/// An enumerated audio device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    /// Position in the host's enumeration, usable with
    /// [`DeviceSelection::ByIndex`].
    pub index: usize,
    /// Device name.
    pub name: String,
    /// Channel count of the default configuration.
    pub channels: u16,
    /// Sample rate of the default configuration.
    pub default_sample_rate: u32,
    /// Whether this is the host's default device for its direction.
    pub is_default: bool,
}

/// Lists capture devices on the default host.
///
/// # Errors
///
/// Returns an error if the host cannot enumerate devices.
pub fn list_input_devices() -> Result<Vec<DeviceInfo>, VocalStreamError> {
    CpalBackend::new().input_devices()
}

/// Lists playback devices with at least one output channel on the default
/// host.
///
/// # Errors
///
/// Returns an error if the host cannot enumerate devices.
pub fn list_output_devices() -> Result<Vec<DeviceInfo>, VocalStreamError> {
    CpalBackend::new().output_devices()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_display() {
        assert_eq!(StreamStatus::default().to_string(), "ok");
        let status = StreamStatus {
            input_overflow: true,
            output_underflow: true,
            ..StreamStatus::default()
        };
        assert_eq!(status.to_string(), "input overflow, output underflow");
    }

    #[test]
    fn test_status_bits() {
        let status = StreamStatus {
            input_underflow: true,
            ..StreamStatus::default()
        };
        assert_eq!(StreamStatus::from_bits(status.bits()), status);
        assert!(StreamStatus::from_bits(0).is_empty());
    }

    #[test]
    fn test_spec_from_config() {
        let config = PipelineConfig::default().with_output_device(DeviceSelection::index(2));
        let spec = DuplexSpec::from_config(&config);
        assert_eq!(spec.block_size, 4048);
        assert_eq!(spec.block_samples(), 8096);
        assert_eq!(spec.output_device, DeviceSelection::ByIndex(2));
    }
}
