//! CPAL implementation of the duplex backend.
//!
//! CPAL opens input and output as separate streams. They are bridged by an
//! SPSC ring: the input callback pushes captured samples, the output callback
//! pops exactly one block of input, runs the duplex callback on it and plays
//! the result. Hosts that ignore the requested buffer size still see whole
//! blocks, because the output side re-blocks whatever the host asks for.
//!
//! `cpal::Stream` is not `Send` on every platform, so both streams are built
//! and owned by a dedicated device thread that takes commands over a channel.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{
    BufferSize, Device, FromSample, SampleFormat, SizedSample, Stream, StreamConfig,
    SupportedBufferSize,
};
use ringbuf::traits::{Consumer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};

use crate::config::DeviceSelection;
use crate::device::{
    AudioBackend, DeviceFault, DeviceInfo, DuplexCallback, DuplexSpec, DuplexStream,
    FaultCallback, StreamStatus,
};
use crate::error::{Direction, VocalStreamError};

/// Blocks of captured audio the bridge ring can hold.
const BRIDGE_BLOCKS: usize = 4;

/// Audio devices through CPAL.
///
/// ```no_run
/// use vocal_stream::CpalBackend;
///
/// let backend = CpalBackend::new();
/// for device in backend.output_devices()? {
///     println!("{}: {} ({} ch)", device.index, device.name, device.channels);
/// }
/// # Ok::<(), vocal_stream::VocalStreamError>(())
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct CpalBackend {
    host_id: Option<cpal::HostId>,
}

impl CpalBackend {
    /// Uses the platform's default host.
    pub fn new() -> Self {
        Self::default()
    }

    /// Uses a specific host (for example ASIO or JACK).
    pub fn with_host(host_id: cpal::HostId) -> Self {
        Self {
            host_id: Some(host_id),
        }
    }

    /// Lists capture devices.
    ///
    /// # Errors
    ///
    /// Returns an error if the host cannot enumerate devices.
    pub fn input_devices(&self) -> Result<Vec<DeviceInfo>, VocalStreamError> {
        let host = open_host(self.host_id)?;
        let default_name = host.default_input_device().and_then(|d| d.name().ok());
        let devices = enumerate(&host, Direction::Input)?;

        Ok(devices
            .iter()
            .enumerate()
            .map(|(index, device)| {
                let (channels, default_sample_rate) = device
                    .default_input_config()
                    .map(|c| (c.channels(), c.sample_rate().0))
                    .unwrap_or((0, 0));
                describe(index, device, channels, default_sample_rate, default_name.as_deref())
            })
            .collect())
    }

    /// Lists playback devices with at least one output channel.
    ///
    /// # Errors
    ///
    /// Returns an error if the host cannot enumerate devices.
    pub fn output_devices(&self) -> Result<Vec<DeviceInfo>, VocalStreamError> {
        let host = open_host(self.host_id)?;
        let default_name = host.default_output_device().and_then(|d| d.name().ok());
        let devices = enumerate(&host, Direction::Output)?;

        Ok(devices
            .iter()
            .enumerate()
            .filter_map(|(index, device)| {
                let (channels, default_sample_rate) = device
                    .default_output_config()
                    .map(|c| (c.channels(), c.sample_rate().0))
                    .unwrap_or((0, 0));
                (channels > 0).then(|| {
                    describe(index, device, channels, default_sample_rate, default_name.as_deref())
                })
            })
            .collect())
    }
}

impl AudioBackend for CpalBackend {
    fn open_duplex(
        &self,
        spec: &DuplexSpec,
        callback: DuplexCallback,
        on_fault: FaultCallback,
    ) -> Result<Box<dyn DuplexStream>, VocalStreamError> {
        let (command_tx, command_rx) = mpsc::channel::<DeviceCommand>();
        let (ready_tx, ready_rx) = mpsc::sync_channel::<Result<(), VocalStreamError>>(1);
        let host_id = self.host_id;
        let spec = spec.clone();

        let handle = thread::Builder::new()
            .name("vocal-stream-device".into())
            .spawn(move || {
                let streams = match DuplexStreams::build(host_id, &spec, callback, on_fault) {
                    Ok(streams) => {
                        let _ = ready_tx.send(Ok(()));
                        streams
                    }
                    Err(err) => {
                        let _ = ready_tx.send(Err(err));
                        return;
                    }
                };
                device_loop(&streams, &command_rx);
                drop(streams);
                tracing::debug!("Device thread finished");
            })
            .map_err(|e| VocalStreamError::DeviceOpenFailed {
                reason: format!("failed to spawn device thread: {e}"),
            })?;

        let opened = ready_rx
            .recv()
            .unwrap_or_else(|_| {
                Err(VocalStreamError::DeviceOpenFailed {
                    reason: "device thread exited during setup".to_string(),
                })
            });

        if let Err(err) = opened {
            let _ = handle.join();
            return Err(err);
        }

        Ok(Box::new(CpalDuplexStream {
            commands: command_tx,
            thread: Some(handle),
        }))
    }
}

enum DeviceCommand {
    Play(mpsc::SyncSender<Result<(), VocalStreamError>>),
    Pause(mpsc::SyncSender<Result<(), VocalStreamError>>),
    Close,
}

fn device_loop(streams: &DuplexStreams, commands: &mpsc::Receiver<DeviceCommand>) {
    for command in commands {
        match command {
            DeviceCommand::Play(reply) => {
                let _ = reply.send(streams.play());
            }
            DeviceCommand::Pause(reply) => {
                let _ = reply.send(streams.pause());
            }
            DeviceCommand::Close => break,
        }
    }
}

/// Handle to the device thread.
struct CpalDuplexStream {
    commands: mpsc::Sender<DeviceCommand>,
    thread: Option<JoinHandle<()>>,
}

impl CpalDuplexStream {
    fn request(
        &self,
        make: fn(mpsc::SyncSender<Result<(), VocalStreamError>>) -> DeviceCommand,
    ) -> Result<(), VocalStreamError> {
        let (reply_tx, reply_rx) = mpsc::sync_channel(1);
        self.commands
            .send(make(reply_tx))
            .map_err(|_| VocalStreamError::BackendError("device thread is gone".to_string()))?;
        reply_rx
            .recv()
            .map_err(|_| VocalStreamError::BackendError("device thread is gone".to_string()))?
    }

    fn shutdown(&mut self) {
        let _ = self.commands.send(DeviceCommand::Close);
        if let Some(handle) = self.thread.take() {
            if handle.join().is_err() {
                tracing::error!("Device thread panicked");
            }
        }
    }
}

impl DuplexStream for CpalDuplexStream {
    fn start(&mut self) -> Result<(), VocalStreamError> {
        self.request(DeviceCommand::Play)
    }

    fn stop(&mut self) -> Result<(), VocalStreamError> {
        self.request(DeviceCommand::Pause)
    }

    fn close(mut self: Box<Self>) {
        self.shutdown();
    }
}

impl Drop for CpalDuplexStream {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Both CPAL streams. Lives on the device thread only.
struct DuplexStreams {
    input: Stream,
    output: Stream,
}

impl DuplexStreams {
    fn build(
        host_id: Option<cpal::HostId>,
        spec: &DuplexSpec,
        callback: DuplexCallback,
        on_fault: FaultCallback,
    ) -> Result<Self, VocalStreamError> {
        let host = open_host(host_id)?;
        let input_device = resolve_device(&host, &spec.input_device, Direction::Input)?;
        let output_device = resolve_device(&host, &spec.output_device, Direction::Output)?;

        tracing::info!(
            "Opening duplex stream: in='{}', out='{}', {}Hz/{}ch, block={}",
            device_name(&input_device),
            device_name(&output_device),
            spec.sample_rate,
            spec.channels,
            spec.block_size
        );

        let block_samples = spec.block_samples();
        let (producer, consumer) = HeapRb::<f32>::new(block_samples * BRIDGE_BLOCKS).split();
        let overflow = Arc::new(AtomicU8::new(0));
        let frames = u32::try_from(spec.block_size).unwrap_or(u32::MAX);

        let supported = input_device
            .default_input_config()
            .map_err(|e| open_failed(Direction::Input, &e))?;
        let input_config = stream_config(spec, supported.buffer_size(), frames);
        let input = match supported.sample_format() {
            SampleFormat::F32 => build_input::<f32>(
                &input_device,
                &input_config,
                producer,
                Arc::clone(&overflow),
                Arc::clone(&on_fault),
            ),
            SampleFormat::I16 => build_input::<i16>(
                &input_device,
                &input_config,
                producer,
                Arc::clone(&overflow),
                Arc::clone(&on_fault),
            ),
            SampleFormat::U16 => build_input::<u16>(
                &input_device,
                &input_config,
                producer,
                Arc::clone(&overflow),
                Arc::clone(&on_fault),
            ),
            format => {
                return Err(VocalStreamError::UnsupportedFormat {
                    format: format!("{format:?}"),
                })
            }
        }
        .map_err(|e| open_failed(Direction::Input, &e))?;

        let supported = output_device
            .default_output_config()
            .map_err(|e| open_failed(Direction::Output, &e))?;
        let output_config = stream_config(spec, supported.buffer_size(), frames);
        let bridge = OutputBridge::new(consumer, callback, overflow, block_samples);
        let output = match supported.sample_format() {
            SampleFormat::F32 => {
                build_output::<f32>(&output_device, &output_config, bridge, on_fault)
            }
            SampleFormat::I16 => {
                build_output::<i16>(&output_device, &output_config, bridge, on_fault)
            }
            SampleFormat::U16 => {
                build_output::<u16>(&output_device, &output_config, bridge, on_fault)
            }
            format => {
                return Err(VocalStreamError::UnsupportedFormat {
                    format: format!("{format:?}"),
                })
            }
        }
        .map_err(|e| open_failed(Direction::Output, &e))?;

        Ok(Self { input, output })
    }

    fn play(&self) -> Result<(), VocalStreamError> {
        self.input
            .play()
            .map_err(|e| VocalStreamError::BackendError(e.to_string()))?;
        self.output
            .play()
            .map_err(|e| VocalStreamError::BackendError(e.to_string()))
    }

    fn pause(&self) -> Result<(), VocalStreamError> {
        self.output
            .pause()
            .map_err(|e| VocalStreamError::BackendError(e.to_string()))?;
        self.input
            .pause()
            .map_err(|e| VocalStreamError::BackendError(e.to_string()))
    }
}

/// Output-side state: re-blocks host buffers into duplex callbacks.
struct OutputBridge {
    consumer: HeapCons<f32>,
    callback: DuplexCallback,
    overflow: Arc<AtomicU8>,
    input: Vec<f32>,
    processed: Vec<f32>,
    cursor: usize,
}

impl OutputBridge {
    fn new(
        consumer: HeapCons<f32>,
        callback: DuplexCallback,
        overflow: Arc<AtomicU8>,
        block_samples: usize,
    ) -> Self {
        Self {
            consumer,
            callback,
            overflow,
            input: vec![0.0; block_samples],
            processed: vec![0.0; block_samples],
            // Forces a block on the first fill
            cursor: block_samples,
        }
    }

    fn fill<T>(&mut self, data: &mut [T])
    where
        T: SizedSample + FromSample<f32>,
    {
        let mut written = 0;
        while written < data.len() {
            if self.cursor >= self.processed.len() {
                self.next_block();
            }
            let n = (self.processed.len() - self.cursor).min(data.len() - written);
            for (out, &sample) in data[written..written + n]
                .iter_mut()
                .zip(&self.processed[self.cursor..self.cursor + n])
            {
                *out = T::from_sample_(sample);
            }
            self.cursor += n;
            written += n;
        }
    }

    fn next_block(&mut self) {
        let mut status = StreamStatus::from_bits(self.overflow.swap(0, Ordering::Relaxed));
        let popped = self.consumer.pop_slice(&mut self.input);
        if popped < self.input.len() {
            self.input[popped..].fill(0.0);
            status.input_underflow = true;
        }
        (self.callback)(&self.input, &mut self.processed, status);
        self.cursor = 0;
    }
}

fn build_input<T>(
    device: &Device,
    config: &StreamConfig,
    mut producer: HeapProd<f32>,
    overflow: Arc<AtomicU8>,
    on_fault: FaultCallback,
) -> Result<Stream, cpal::BuildStreamError>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    let overflow_bits = StreamStatus {
        input_overflow: true,
        ..StreamStatus::default()
    }
    .bits();

    device.build_input_stream(
        config,
        move |data: &[T], _: &cpal::InputCallbackInfo| {
            // Non-blocking push - drops samples if the ring is full
            let pushed = producer.push_iter(data.iter().map(|&s| f32::from_sample_(s)));
            if pushed < data.len() {
                overflow.fetch_or(overflow_bits, Ordering::Relaxed);
            }
        },
        fault_handler(Direction::Input, on_fault),
        None,
    )
}

fn build_output<T>(
    device: &Device,
    config: &StreamConfig,
    mut bridge: OutputBridge,
    on_fault: FaultCallback,
) -> Result<Stream, cpal::BuildStreamError>
where
    T: SizedSample + FromSample<f32>,
{
    device.build_output_stream(
        config,
        move |data: &mut [T], _: &cpal::OutputCallbackInfo| bridge.fill(data),
        fault_handler(Direction::Output, on_fault),
        None,
    )
}

fn fault_handler(
    direction: Direction,
    on_fault: FaultCallback,
) -> impl FnMut(cpal::StreamError) + Send + 'static {
    move |err| {
        tracing::error!("Audio stream error: {}", err);
        let fatal = matches!(err, cpal::StreamError::DeviceNotAvailable);
        on_fault(DeviceFault {
            message: format!("{direction} stream: {err}"),
            fatal,
        });
    }
}

/// Requests `frames` per callback when the device advertises support for it.
fn stream_config(spec: &DuplexSpec, supported: &SupportedBufferSize, frames: u32) -> StreamConfig {
    StreamConfig {
        channels: spec.channels,
        sample_rate: cpal::SampleRate(spec.sample_rate),
        buffer_size: buffer_size(supported, frames),
    }
}

fn buffer_size(supported: &SupportedBufferSize, frames: u32) -> BufferSize {
    match supported {
        SupportedBufferSize::Range { min, max } if (*min..=*max).contains(&frames) => {
            BufferSize::Fixed(frames)
        }
        _ => {
            tracing::debug!(frames, "Fixed buffer size not advertised, using host default");
            BufferSize::Default
        }
    }
}

fn open_host(host_id: Option<cpal::HostId>) -> Result<cpal::Host, VocalStreamError> {
    match host_id {
        Some(id) => {
            cpal::host_from_id(id).map_err(|e| VocalStreamError::BackendError(e.to_string()))
        }
        None => Ok(cpal::default_host()),
    }
}

fn enumerate(host: &cpal::Host, direction: Direction) -> Result<Vec<Device>, VocalStreamError> {
    let devices: Result<Vec<Device>, cpal::DevicesError> = match direction {
        Direction::Input => host.input_devices().map(Iterator::collect),
        Direction::Output => host.output_devices().map(Iterator::collect),
    };
    devices.map_err(|e| VocalStreamError::BackendError(e.to_string()))
}

fn resolve_device(
    host: &cpal::Host,
    selection: &DeviceSelection,
    direction: Direction,
) -> Result<Device, VocalStreamError> {
    let not_found = || VocalStreamError::DeviceNotFound {
        direction,
        name: selection.to_string(),
    };

    match selection {
        DeviceSelection::Default => {
            let device = match direction {
                Direction::Input => host.default_input_device(),
                Direction::Output => host.default_output_device(),
            };
            device.ok_or(VocalStreamError::NoDefaultDevice { direction })
        }
        DeviceSelection::ByName(name) => enumerate(host, direction)?
            .into_iter()
            .find(|d| d.name().is_ok_and(|n| n.eq_ignore_ascii_case(name.trim())))
            .ok_or_else(not_found),
        DeviceSelection::ByIndex(index) => enumerate(host, direction)?
            .into_iter()
            .nth(*index)
            .ok_or_else(not_found),
    }
}

fn describe(
    index: usize,
    device: &Device,
    channels: u16,
    default_sample_rate: u32,
    default_name: Option<&str>,
) -> DeviceInfo {
    let name = device_name(device);
    DeviceInfo {
        index,
        is_default: default_name == Some(name.as_str()),
        name,
        channels,
        default_sample_rate,
    }
}

fn device_name(device: &Device) -> String {
    device.name().unwrap_or_else(|_| "unknown".to_string())
}

fn open_failed(direction: Direction, err: &impl std::fmt::Display) -> VocalStreamError {
    VocalStreamError::DeviceOpenFailed {
        reason: format!("{direction} stream: {err}"),
    }
}
