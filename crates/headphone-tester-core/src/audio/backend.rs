//! Native audio transport seam and its cpal implementation
//!
//! cpal delivers audio through callbacks on its own thread. The controllers
//! want blocking "write N frames" / "read N frames" calls instead, so each
//! stream is bridged through a lock-free SPSC ring:
//! - Output: `write` pushes into the ring, the callback pops (silence on
//!   shortage, counted as an underrun once playback is armed)
//! - Input: the callback pushes, `read` pops (drops counted as overruns)
//!
//! Device error callbacks are forwarded through a bounded crossbeam channel
//! and surface as a stream error on the next read or write.

use crate::audio::device::DeviceInfo;
use crate::cancel::CancelToken;
use crate::error::{Direction, EngineError};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize, BuildStreamError, Device, Host, SampleRate, Stream, StreamConfig};
use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Ring capacity in blocks
const RING_BLOCKS: usize = 16;

/// Blocks queued before output playback starts (fixed block size)
const PREFILL_BLOCKS: usize = 2;

/// Sleep between polls of the ring while a blocking call waits
const POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Capacity of the device error channel
const ERROR_CHANNEL_CAPACITY: usize = 8;

/// Fallback when a device reports no default config
const FALLBACK_SAMPLE_RATE: u32 = 48000;

/// Format requested from the transport for one direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamRequest {
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Frames per block
    pub block_size: u32,
    /// Interleaved channel count
    pub channels: u16,
    /// Treat output underruns as a stream failure
    pub fail_on_underrun: bool,
    /// Longest a blocking call may wait without progress
    pub stall_timeout: Duration,
}

impl StreamRequest {
    /// Samples in one interleaved block
    pub fn block_len(&self) -> usize {
        self.block_size as usize * self.channels as usize
    }
}

/// Result of a blocking read or write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoStatus {
    /// All requested samples were transferred
    Complete,
    /// Cancellation was observed before the transfer finished
    Cancelled,
}

/// Blocking output stream; closed when dropped
pub trait OutputStream {
    /// Device name for error context
    fn device_name(&self) -> &str;

    /// Queue interleaved samples, blocking while the device buffer is full
    fn write(&mut self, samples: &[f32], cancel: &CancelToken) -> Result<IoStatus, EngineError>;

    /// Block until every queued sample has been handed to the device
    fn drain(&mut self, cancel: &CancelToken) -> Result<IoStatus, EngineError>;
}

/// Blocking input stream; closed when dropped
pub trait InputStream {
    /// Device name for error context
    fn device_name(&self) -> &str;

    /// Fill `samples` with captured interleaved audio, blocking until available
    fn read(&mut self, samples: &mut [f32], cancel: &CancelToken)
        -> Result<IoStatus, EngineError>;
}

/// Native audio transport
pub trait AudioBackend {
    /// Enumerate devices in host order
    fn devices(&self) -> Result<Vec<DeviceInfo>, EngineError>;

    /// Open an output stream on `device`
    fn open_output(
        &self,
        device: &DeviceInfo,
        request: &StreamRequest,
    ) -> Result<Box<dyn OutputStream>, EngineError>;

    /// Open an input stream on `device`; capture starts immediately
    fn open_input(
        &self,
        device: &DeviceInfo,
        request: &StreamRequest,
    ) -> Result<Box<dyn InputStream>, EngineError>;
}

/// Callback-side counters shared with the blocking half of a stream
#[derive(Debug, Default)]
struct StreamCounters {
    /// Output callbacks that ran short of samples while armed
    underruns: AtomicU64,
    /// Input callbacks that found the ring full
    overruns: AtomicU64,
    /// Underruns are only counted between playback start and drain
    armed: AtomicBool,
}

/// cpal-backed transport using the host's default audio API
pub struct CpalBackend {
    host: Host,
}

impl CpalBackend {
    /// Use the platform default host (ALSA on Linux)
    pub fn new() -> Self {
        let host = cpal::default_host();
        tracing::info!("Using audio host: {:?}", host.id());
        Self { host }
    }

    /// Look up the cpal device behind a [`DeviceInfo`]
    fn device(&self, info: &DeviceInfo) -> Result<Device, EngineError> {
        let unavailable = |reason: String| EngineError::DeviceUnavailable {
            device: info.to_string(),
            reason,
        };
        let device = self
            .host
            .devices()
            .map_err(|e| unavailable(e.to_string()))?
            .nth(info.index)
            .ok_or_else(|| unavailable("device disappeared".to_string()))?;
        let name = device.name().unwrap_or_default();
        if name != info.name {
            return Err(unavailable(format!(
                "device list changed (index now names {name:?})"
            )));
        }
        Ok(device)
    }

    fn unsupported(info: &DeviceInfo, request: &StreamRequest) -> EngineError {
        EngineError::UnsupportedFormat {
            device: info.to_string(),
            format: format!("{} ch @ {} Hz", request.channels, request.sample_rate),
        }
    }

    fn map_build_error(
        info: &DeviceInfo,
        request: &StreamRequest,
        err: BuildStreamError,
        direction: Direction,
    ) -> EngineError {
        match err {
            BuildStreamError::StreamConfigNotSupported | BuildStreamError::InvalidArgument => {
                Self::unsupported(info, request)
            }
            BuildStreamError::DeviceNotAvailable => EngineError::DeviceUnavailable {
                device: info.to_string(),
                reason: "device not available".to_string(),
            },
            other => EngineError::stream(info.name.clone(), direction, other),
        }
    }

    /// Stream configs to try: the requested fixed block size, then the device default
    fn configs(request: &StreamRequest) -> [StreamConfig; 2] {
        let base = |buffer_size| StreamConfig {
            channels: request.channels,
            sample_rate: SampleRate(request.sample_rate),
            buffer_size,
        };
        [base(BufferSize::Fixed(request.block_size)), base(BufferSize::Default)]
    }
}

impl Default for CpalBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioBackend for CpalBackend {
    fn devices(&self) -> Result<Vec<DeviceInfo>, EngineError> {
        let default_input = self.host.default_input_device().and_then(|d| d.name().ok());
        let default_output = self.host.default_output_device().and_then(|d| d.name().ok());

        let devices = self
            .host
            .devices()
            .map_err(|e| EngineError::DeviceUnavailable {
                device: "host".to_string(),
                reason: e.to_string(),
            })?;

        let mut infos = Vec::new();
        for (index, device) in devices.enumerate() {
            let name = device.name().unwrap_or_else(|_| "Unknown".to_string());
            let output_config = device.default_output_config().ok();
            let input_config = device.default_input_config().ok();

            let default_sample_rate = output_config
                .as_ref()
                .or(input_config.as_ref())
                .map(|c| c.sample_rate().0)
                .unwrap_or(FALLBACK_SAMPLE_RATE);

            infos.push(DeviceInfo {
                index,
                is_default_input: default_input.as_deref() == Some(name.as_str()),
                is_default_output: default_output.as_deref() == Some(name.as_str()),
                input_channels: input_config.map(|c| c.channels()).unwrap_or(0),
                output_channels: output_config.map(|c| c.channels()).unwrap_or(0),
                default_sample_rate,
                name,
            });
        }
        Ok(infos)
    }

    fn open_output(
        &self,
        info: &DeviceInfo,
        request: &StreamRequest,
    ) -> Result<Box<dyn OutputStream>, EngineError> {
        let device = self.device(info)?;

        let supported = device
            .supported_output_configs()
            .map_err(|e| EngineError::stream(info.name.clone(), Direction::Output, e))?
            .any(|range| {
                range.channels() == request.channels
                    && (range.min_sample_rate().0..=range.max_sample_rate().0)
                        .contains(&request.sample_rate)
            });
        if !supported {
            return Err(Self::unsupported(info, request));
        }

        let capacity = request.block_len() * RING_BLOCKS;
        let counters = Arc::new(StreamCounters::default());
        let (error_tx, error_rx) = crossbeam_channel::bounded::<String>(ERROR_CHANNEL_CAPACITY);

        let mut last_error = None;
        for (attempt, config) in Self::configs(request).into_iter().enumerate() {
            let (producer, mut consumer) = HeapRb::<f32>::new(capacity).split();
            let cb_counters = Arc::clone(&counters);
            let cb_error_tx = error_tx.clone();
            let cb_name = info.name.clone();

            let built = device.build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    let popped = consumer.pop_slice(data);
                    if popped < data.len() {
                        data[popped..].fill(0.0);
                        if cb_counters.armed.load(Ordering::Relaxed) {
                            cb_counters.underruns.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                },
                move |err| {
                    tracing::error!("Output stream error on {}: {}", cb_name, err);
                    let _ = cb_error_tx.try_send(err.to_string());
                },
                None,
            );

            match built {
                Ok(stream) => {
                    let fixed = attempt == 0;
                    let prefill = if fixed {
                        request.block_len() * PREFILL_BLOCKS
                    } else {
                        capacity / 2
                    };
                    tracing::info!(
                        "Output stream opened: {} @ {}Hz, {} ch, block {} ({})",
                        info.name,
                        request.sample_rate,
                        request.channels,
                        request.block_size,
                        if fixed { "fixed" } else { "device default" }
                    );
                    return Ok(Box::new(CpalOutput {
                        name: info.name.clone(),
                        stream,
                        producer,
                        counters,
                        errors: error_rx,
                        playing: false,
                        prefill,
                        request: *request,
                    }));
                }
                Err(BuildStreamError::StreamConfigNotSupported) if attempt == 0 => {
                    tracing::warn!(
                        "{} rejected fixed block size {}, using device default",
                        info.name,
                        request.block_size
                    );
                    last_error = Some(BuildStreamError::StreamConfigNotSupported);
                }
                Err(e) => return Err(Self::map_build_error(info, request, e, Direction::Output)),
            }
        }

        Err(Self::map_build_error(
            info,
            request,
            last_error.unwrap_or(BuildStreamError::StreamConfigNotSupported),
            Direction::Output,
        ))
    }

    fn open_input(
        &self,
        info: &DeviceInfo,
        request: &StreamRequest,
    ) -> Result<Box<dyn InputStream>, EngineError> {
        let device = self.device(info)?;

        let supported = device
            .supported_input_configs()
            .map_err(|e| EngineError::stream(info.name.clone(), Direction::Input, e))?
            .any(|range| {
                range.channels() == request.channels
                    && (range.min_sample_rate().0..=range.max_sample_rate().0)
                        .contains(&request.sample_rate)
            });
        if !supported {
            return Err(Self::unsupported(info, request));
        }

        let capacity = request.block_len() * RING_BLOCKS;
        let counters = Arc::new(StreamCounters::default());
        let (error_tx, error_rx) = crossbeam_channel::bounded::<String>(ERROR_CHANNEL_CAPACITY);

        let mut last_error = None;
        for (attempt, config) in Self::configs(request).into_iter().enumerate() {
            let (mut producer, consumer) = HeapRb::<f32>::new(capacity).split();
            let cb_counters = Arc::clone(&counters);
            let cb_error_tx = error_tx.clone();
            let cb_name = info.name.clone();

            let built = device.build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    if producer.push_slice(data) < data.len() {
                        cb_counters.overruns.fetch_add(1, Ordering::Relaxed);
                    }
                },
                move |err| {
                    tracing::error!("Input stream error on {}: {}", cb_name, err);
                    let _ = cb_error_tx.try_send(err.to_string());
                },
                None,
            );

            match built {
                Ok(stream) => {
                    stream
                        .play()
                        .map_err(|e| EngineError::stream(info.name.clone(), Direction::Input, e))?;
                    tracing::info!(
                        "Input stream opened: {} @ {}Hz, {} ch, block {}",
                        info.name,
                        request.sample_rate,
                        request.channels,
                        request.block_size
                    );
                    return Ok(Box::new(CpalInput {
                        name: info.name.clone(),
                        _stream: stream,
                        consumer,
                        counters,
                        errors: error_rx,
                        request: *request,
                    }));
                }
                Err(BuildStreamError::StreamConfigNotSupported) if attempt == 0 => {
                    tracing::warn!(
                        "{} rejected fixed block size {}, using device default",
                        info.name,
                        request.block_size
                    );
                    last_error = Some(BuildStreamError::StreamConfigNotSupported);
                }
                Err(e) => return Err(Self::map_build_error(info, request, e, Direction::Input)),
            }
        }

        Err(Self::map_build_error(
            info,
            request,
            last_error.unwrap_or(BuildStreamError::StreamConfigNotSupported),
            Direction::Input,
        ))
    }
}

/// Output half of a cpal stream
struct CpalOutput {
    name: String,
    stream: Stream,
    producer: HeapProd<f32>,
    counters: Arc<StreamCounters>,
    errors: crossbeam_channel::Receiver<String>,
    playing: bool,
    /// Samples queued before playback starts
    prefill: usize,
    request: StreamRequest,
}

impl CpalOutput {
    fn check_errors(&self) -> Result<(), EngineError> {
        match self.errors.try_recv() {
            Ok(cause) => Err(EngineError::stream(self.name.clone(), Direction::Output, cause)),
            Err(_) => Ok(()),
        }
    }

    fn start(&mut self) -> Result<(), EngineError> {
        self.stream
            .play()
            .map_err(|e| EngineError::stream(self.name.clone(), Direction::Output, e))?;
        self.playing = true;
        self.counters.armed.store(true, Ordering::Relaxed);
        tracing::debug!("Output playback started on {}", self.name);
        Ok(())
    }

    fn check_underruns(&self) -> Result<(), EngineError> {
        let underruns = self.counters.underruns.swap(0, Ordering::Relaxed);
        if underruns == 0 {
            return Ok(());
        }
        if self.request.fail_on_underrun {
            return Err(EngineError::stream(
                self.name.clone(),
                Direction::Output,
                format!("underrun ({underruns} short callbacks)"),
            ));
        }
        tracing::warn!("{} output underruns on {}", underruns, self.name);
        Ok(())
    }

    fn stalled(&self) -> EngineError {
        EngineError::stream(
            self.name.clone(),
            Direction::Output,
            format!(
                "device stopped consuming samples for {}ms",
                self.request.stall_timeout.as_millis()
            ),
        )
    }
}

impl OutputStream for CpalOutput {
    fn device_name(&self) -> &str {
        &self.name
    }

    fn write(&mut self, samples: &[f32], cancel: &CancelToken) -> Result<IoStatus, EngineError> {
        let mut offset = 0;
        let mut last_progress = Instant::now();

        while offset < samples.len() {
            self.check_errors()?;
            if cancel.is_cancelled() {
                return Ok(IoStatus::Cancelled);
            }

            let pushed = self.producer.push_slice(&samples[offset..]);
            offset += pushed;
            if pushed > 0 {
                last_progress = Instant::now();
            }

            if !self.playing && self.producer.occupied_len() >= self.prefill {
                self.start()?;
            }

            if offset < samples.len() {
                if last_progress.elapsed() > self.request.stall_timeout {
                    return Err(self.stalled());
                }
                std::thread::sleep(POLL_INTERVAL);
            }
        }

        self.check_underruns()?;
        Ok(IoStatus::Complete)
    }

    fn drain(&mut self, cancel: &CancelToken) -> Result<IoStatus, EngineError> {
        self.check_underruns()?;
        // The tail of the signal is allowed to run the ring dry
        self.counters.armed.store(false, Ordering::Relaxed);
        if !self.playing && self.producer.occupied_len() > 0 {
            self.start()?;
            self.counters.armed.store(false, Ordering::Relaxed);
        }

        let mut last_level = self.producer.occupied_len();
        let mut last_progress = Instant::now();
        while self.producer.occupied_len() > 0 {
            self.check_errors()?;
            if cancel.is_cancelled() {
                return Ok(IoStatus::Cancelled);
            }
            let level = self.producer.occupied_len();
            if level < last_level {
                last_level = level;
                last_progress = Instant::now();
            } else if last_progress.elapsed() > self.request.stall_timeout {
                return Err(self.stalled());
            }
            std::thread::sleep(POLL_INTERVAL);
        }

        // Let the device play out its own buffer
        let tail = Duration::from_secs_f64(
            self.request.block_size as f64 / self.request.sample_rate as f64,
        );
        std::thread::sleep(tail);
        Ok(IoStatus::Complete)
    }
}

impl Drop for CpalOutput {
    fn drop(&mut self) {
        self.counters.armed.store(false, Ordering::Relaxed);
        let _ = self.stream.pause();
        tracing::info!("Output stream closed: {}", self.name);
    }
}

/// Input half of a cpal stream
struct CpalInput {
    name: String,
    _stream: Stream,
    consumer: HeapCons<f32>,
    counters: Arc<StreamCounters>,
    errors: crossbeam_channel::Receiver<String>,
    request: StreamRequest,
}

impl InputStream for CpalInput {
    fn device_name(&self) -> &str {
        &self.name
    }

    fn read(
        &mut self,
        samples: &mut [f32],
        cancel: &CancelToken,
    ) -> Result<IoStatus, EngineError> {
        let started = Instant::now();
        while self.consumer.occupied_len() < samples.len() {
            if let Ok(cause) = self.errors.try_recv() {
                return Err(EngineError::stream(self.name.clone(), Direction::Input, cause));
            }
            if cancel.is_cancelled() {
                return Ok(IoStatus::Cancelled);
            }
            if started.elapsed() > self.request.stall_timeout {
                return Err(EngineError::stream(
                    self.name.clone(),
                    Direction::Input,
                    format!(
                        "no samples captured for {}ms",
                        self.request.stall_timeout.as_millis()
                    ),
                ));
            }
            std::thread::sleep(POLL_INTERVAL);
        }

        self.consumer.pop_slice(samples);

        let overruns = self.counters.overruns.swap(0, Ordering::Relaxed);
        if overruns > 0 {
            tracing::warn!("{} input overruns on {}, samples dropped", overruns, self.name);
        }
        Ok(IoStatus::Complete)
    }
}

impl Drop for CpalInput {
    fn drop(&mut self) {
        tracing::info!("Input stream closed: {}", self.name);
    }
}
