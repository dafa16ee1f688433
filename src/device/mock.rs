//! Mock duplex backend for testing without audio hardware.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::device::{
    AudioBackend, DeviceFault, DuplexCallback, DuplexSpec, DuplexStream, FaultCallback,
    StreamStatus,
};
use crate::error::VocalStreamError;

/// A backend whose callback is driven by hand.
///
/// Clones share state, so a test can keep one clone while the engine owns
/// another.
///
/// # Example
///
/// ```
/// use vocal_stream::MockBackend;
///
/// let backend = MockBackend::new();
/// // hand `backend.clone()` to the engine, then:
/// assert!(backend.drive(&[0.0; 8]).is_none()); // nothing open yet
/// ```
#[derive(Clone, Default)]
pub struct MockBackend {
    inner: Arc<MockInner>,
}

#[derive(Default)]
struct MockInner {
    fail_open: AtomicBool,
    opens: AtomicUsize,
    slot: Arc<Mutex<Option<OpenStream>>>,
}

struct OpenStream {
    spec: DuplexSpec,
    callback: DuplexCallback,
    on_fault: FaultCallback,
    playing: bool,
}

impl MockBackend {
    /// Creates a backend that opens successfully.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every open fail, as if the device were missing.
    #[must_use]
    pub fn failing_open(self) -> Self {
        self.set_fail_open(true);
        self
    }

    /// Toggles open failure.
    pub fn set_fail_open(&self, fail: bool) {
        self.inner.fail_open.store(fail, Ordering::SeqCst);
    }

    /// Number of streams successfully opened so far.
    pub fn open_count(&self) -> usize {
        self.inner.opens.load(Ordering::SeqCst)
    }

    /// Returns `true` while a stream is open.
    pub fn is_open(&self) -> bool {
        self.inner.slot.lock().is_some()
    }

    /// Returns `true` while a stream is open and started.
    pub fn is_playing(&self) -> bool {
        self.inner.slot.lock().as_ref().is_some_and(|s| s.playing)
    }

    /// Parameters of the open stream.
    pub fn spec(&self) -> Option<DuplexSpec> {
        self.inner.slot.lock().as_ref().map(|s| s.spec.clone())
    }

    /// Runs one callback with `input` and returns the output it produced.
    ///
    /// Returns `None` when no stream is playing.
    pub fn drive(&self, input: &[f32]) -> Option<Vec<f32>> {
        self.drive_with_status(input, StreamStatus::default())
    }

    /// Like [`drive`](Self::drive), raising the given status flags.
    pub fn drive_with_status(&self, input: &[f32], status: StreamStatus) -> Option<Vec<f32>> {
        let mut slot = self.inner.slot.lock();
        let stream = slot.as_mut().filter(|s| s.playing)?;
        let mut output = vec![0.0; input.len()];
        (stream.callback)(input, &mut output, status);
        Some(output)
    }

    /// Reports an asynchronous fault, as a backend error callback would.
    ///
    /// Returns `false` when no stream is open.
    pub fn trigger_fault(&self, message: &str, fatal: bool) -> bool {
        let on_fault = self.inner.slot.lock().as_ref().map(|s| Arc::clone(&s.on_fault));
        match on_fault {
            Some(on_fault) => {
                on_fault(DeviceFault {
                    message: message.to_string(),
                    fatal,
                });
                true
            }
            None => false,
        }
    }
}

impl std::fmt::Debug for MockBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockBackend")
            .field("open_count", &self.open_count())
            .field("is_open", &self.is_open())
            .finish()
    }
}

impl AudioBackend for MockBackend {
    fn open_duplex(
        &self,
        spec: &DuplexSpec,
        callback: DuplexCallback,
        on_fault: FaultCallback,
    ) -> Result<Box<dyn DuplexStream>, VocalStreamError> {
        if self.inner.fail_open.load(Ordering::SeqCst) {
            return Err(VocalStreamError::DeviceOpenFailed {
                reason: "mock device unavailable".to_string(),
            });
        }

        let mut slot = self.inner.slot.lock();
        if slot.is_some() {
            return Err(VocalStreamError::DeviceOpenFailed {
                reason: "mock device busy".to_string(),
            });
        }
        *slot = Some(OpenStream {
            spec: spec.clone(),
            callback,
            on_fault,
            playing: false,
        });
        self.inner.opens.fetch_add(1, Ordering::SeqCst);

        Ok(Box::new(MockStream {
            slot: Arc::clone(&self.inner.slot),
        }))
    }
}

struct MockStream {
    slot: Arc<Mutex<Option<OpenStream>>>,
}

impl MockStream {
    fn set_playing(&self, playing: bool) -> Result<(), VocalStreamError> {
        match self.slot.lock().as_mut() {
            Some(stream) => {
                stream.playing = playing;
                Ok(())
            }
            None => Err(VocalStreamError::BackendError("stream closed".to_string())),
        }
    }
}

impl DuplexStream for MockStream {
    fn start(&mut self) -> Result<(), VocalStreamError> {
        self.set_playing(true)
    }

    fn stop(&mut self) -> Result<(), VocalStreamError> {
        self.set_playing(false)
    }

    fn close(self: Box<Self>) {
        drop(self);
    }
}

impl Drop for MockStream {
    fn drop(&mut self) {
        // Waits for an in-flight drive(), then drops the callback
        let stream = self.slot.lock().take();
        drop(stream);
    }
}
