//! In-memory virtual devices
//!
//! A transport that needs no sound hardware: output streams record every
//! written sample, input streams synthesize silence or a sine. Used by the
//! `--virtual` CLI mode and by the test suite. Streams can optionally be
//! paced in real time, and a stream failure can be injected after a given
//! number of block operations. Recording can be switched off for long runs,
//! in which case only the written frame count is kept.

use crate::audio::backend::{AudioBackend, InputStream, IoStatus, OutputStream, StreamRequest};
use crate::audio::device::DeviceInfo;
use crate::cancel::CancelToken;
use crate::error::{Direction, EngineError};
use std::f64::consts::PI;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Sleep slice while pacing in real time
const PACE_SLICE: Duration = Duration::from_millis(1);

/// A virtual device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryDevice {
    /// Device name
    pub name: String,
    /// Input channels (0 = no capture)
    pub input_channels: u16,
    /// Output channels (0 = no playback)
    pub output_channels: u16,
    /// Accepted sample rates; the first is the default
    pub sample_rates: Vec<u32>,
    /// System default input
    pub is_default_input: bool,
    /// System default output
    pub is_default_output: bool,
}

impl MemoryDevice {
    /// Device with the given channel counts at 48kHz
    pub fn new(name: &str, input_channels: u16, output_channels: u16) -> Self {
        Self {
            name: name.to_string(),
            input_channels,
            output_channels,
            sample_rates: vec![48000],
            is_default_input: false,
            is_default_output: false,
        }
    }

    /// Replace the accepted sample rates
    pub fn with_rates(mut self, rates: &[u32]) -> Self {
        self.sample_rates = rates.to_vec();
        self
    }

    /// Mark as the system default in both directions it supports
    pub fn as_default(mut self) -> Self {
        self.is_default_input = self.input_channels > 0;
        self.is_default_output = self.output_channels > 0;
        self
    }
}

/// What virtual inputs capture
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InputSource {
    /// Digital silence
    Silence,
    /// Sine on every channel
    Sine {
        /// Frequency in Hz
        frequency: f64,
        /// Peak amplitude
        amplitude: f32,
    },
}

#[derive(Debug, Default)]
struct Recording {
    samples: Vec<f32>,
    /// Frames per write call
    writes: Vec<usize>,
}

#[derive(Debug)]
struct Shared {
    devices: Vec<MemoryDevice>,
    input: Mutex<InputSource>,
    recording: Mutex<Recording>,
    open_streams: AtomicUsize,
    opened_total: AtomicUsize,
    block_ops: AtomicUsize,
    fail_after: Mutex<Option<usize>>,
    realtime: AtomicBool,
    record: AtomicBool,
    frames_written: AtomicU64,
}

impl Shared {
    /// Count one block operation and apply any injected failure
    fn tick(&self, name: &str, direction: Direction) -> Result<(), EngineError> {
        let done = self.block_ops.fetch_add(1, Ordering::SeqCst);
        let limit = self.fail_after.lock().ok().and_then(|f| *f);
        match limit {
            Some(limit) if done >= limit => Err(EngineError::stream(
                name.to_string(),
                direction,
                "device disconnected",
            )),
            _ => Ok(()),
        }
    }

    /// Sleep until `frames` of audio have elapsed since `opened`, waking
    /// early on cancellation
    ///
    /// Each stream keeps its own clock, so a duplex loop that reads and
    /// then writes a block still moves one block per block period.
    fn pace(
        &self,
        opened: Instant,
        frames: u64,
        sample_rate: u32,
        cancel: &CancelToken,
    ) -> IoStatus {
        if !self.realtime.load(Ordering::Relaxed) {
            return IoStatus::Complete;
        }
        let deadline = opened + Duration::from_secs_f64(frames as f64 / sample_rate as f64);
        while Instant::now() < deadline {
            if cancel.is_cancelled() {
                return IoStatus::Cancelled;
            }
            std::thread::sleep(PACE_SLICE.min(deadline.saturating_duration_since(Instant::now())));
        }
        IoStatus::Complete
    }
}

/// Transport backed by in-memory virtual devices
///
/// Clones share devices, recordings, and counters, so a test can keep a
/// handle while the engine owns another.
#[derive(Debug, Clone)]
pub struct MemoryBackend {
    shared: Arc<Shared>,
}

impl MemoryBackend {
    /// Backend exposing the given devices in order
    pub fn new(devices: Vec<MemoryDevice>) -> Self {
        Self {
            shared: Arc::new(Shared {
                devices,
                input: Mutex::new(InputSource::Silence),
                recording: Mutex::new(Recording::default()),
                open_streams: AtomicUsize::new(0),
                opened_total: AtomicUsize::new(0),
                block_ops: AtomicUsize::new(0),
                fail_after: Mutex::new(None),
                realtime: AtomicBool::new(false),
                record: AtomicBool::new(true),
                frames_written: AtomicU64::new(0),
            }),
        }
    }

    /// A small desk setup: onboard jack, a USB headset, HDMI out, a USB mic
    ///
    /// Inputs capture a -6dB 1kHz sine so the meter has something to show.
    pub fn virtual_devices() -> Self {
        Self::new(vec![
            MemoryDevice::new("Built-in Audio Analog Stereo", 2, 2)
                .with_rates(&[48000, 44100])
                .as_default(),
            MemoryDevice::new("USB Audio Headset", 1, 2).with_rates(&[48000, 44100]),
            MemoryDevice::new("HDMI / DisplayPort Output", 0, 2),
            MemoryDevice::new("USB PnP Sound Device", 1, 0).with_rates(&[44100]),
        ])
        .with_input(InputSource::Sine {
            frequency: 1000.0,
            amplitude: 0.5,
        })
    }

    /// Virtual devices that behave like hardware for interactive use
    ///
    /// Streams run in real time and output is counted but not kept, so a
    /// loopback left running holds constant memory.
    pub fn live() -> Self {
        Self::virtual_devices()
            .with_realtime(true)
            .with_recording(false)
    }

    /// Set what inputs capture
    pub fn with_input(self, source: InputSource) -> Self {
        self.set_input(source);
        self
    }

    /// Pace reads and writes at the stream's sample rate
    pub fn with_realtime(self, realtime: bool) -> Self {
        self.shared.realtime.store(realtime, Ordering::Relaxed);
        self
    }

    /// Keep written samples and write sizes (on by default)
    pub fn with_recording(self, record: bool) -> Self {
        self.shared.record.store(record, Ordering::Relaxed);
        self
    }

    /// Change what inputs capture
    pub fn set_input(&self, source: InputSource) {
        if let Ok(mut input) = self.shared.input.lock() {
            *input = source;
        }
    }

    /// Fail every block operation after `ops` more have succeeded
    pub fn fail_after(&self, ops: usize) {
        let done = self.shared.block_ops.load(Ordering::SeqCst);
        if let Ok(mut limit) = self.shared.fail_after.lock() {
            *limit = Some(done + ops);
        }
    }

    /// Remove an injected failure
    pub fn clear_failure(&self) {
        if let Ok(mut limit) = self.shared.fail_after.lock() {
            *limit = None;
        }
    }

    /// Every sample written to any output so far
    pub fn recorded(&self) -> Vec<f32> {
        self.shared
            .recording
            .lock()
            .map(|r| r.samples.clone())
            .unwrap_or_default()
    }

    /// Frame count of each write call so far
    pub fn write_sizes(&self) -> Vec<usize> {
        self.shared
            .recording
            .lock()
            .map(|r| r.writes.clone())
            .unwrap_or_default()
    }

    /// Forget everything recorded so far
    pub fn clear_recording(&self) {
        if let Ok(mut recording) = self.shared.recording.lock() {
            *recording = Recording::default();
        }
    }

    /// Frames written to any output so far, recorded or not
    pub fn frames_written(&self) -> u64 {
        self.shared.frames_written.load(Ordering::SeqCst)
    }

    /// Streams currently open
    pub fn open_streams(&self) -> usize {
        self.shared.open_streams.load(Ordering::SeqCst)
    }

    /// Streams opened since creation
    pub fn opened_total(&self) -> usize {
        self.shared.opened_total.load(Ordering::SeqCst)
    }

    fn check(
        &self,
        info: &DeviceInfo,
        request: &StreamRequest,
        direction: Direction,
    ) -> Result<(), EngineError> {
        let device = self
            .shared
            .devices
            .get(info.index)
            .filter(|d| d.name == info.name)
            .ok_or_else(|| EngineError::DeviceUnavailable {
                device: info.to_string(),
                reason: "no such device".to_string(),
            })?;

        let available = match direction {
            Direction::Input => device.input_channels,
            Direction::Output => device.output_channels,
        };
        if request.channels == 0
            || request.channels > available
            || !device.sample_rates.contains(&request.sample_rate)
        {
            return Err(EngineError::UnsupportedFormat {
                device: info.to_string(),
                format: format!("{} ch @ {} Hz", request.channels, request.sample_rate),
            });
        }

        self.shared.open_streams.fetch_add(1, Ordering::SeqCst);
        self.shared.opened_total.fetch_add(1, Ordering::SeqCst);
        tracing::info!(
            "Virtual {} stream opened: {} @ {}Hz, {} ch",
            direction,
            info.name,
            request.sample_rate,
            request.channels
        );
        Ok(())
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::virtual_devices()
    }
}

impl AudioBackend for MemoryBackend {
    fn devices(&self) -> Result<Vec<DeviceInfo>, EngineError> {
        Ok(self
            .shared
            .devices
            .iter()
            .enumerate()
            .map(|(index, d)| DeviceInfo {
                index,
                name: d.name.clone(),
                input_channels: d.input_channels,
                output_channels: d.output_channels,
                default_sample_rate: d.sample_rates.first().copied().unwrap_or(48000),
                is_default_input: d.is_default_input,
                is_default_output: d.is_default_output,
            })
            .collect())
    }

    fn open_output(
        &self,
        device: &DeviceInfo,
        request: &StreamRequest,
    ) -> Result<Box<dyn OutputStream>, EngineError> {
        self.check(device, request, Direction::Output)?;
        Ok(Box::new(MemoryOutput {
            name: device.name.clone(),
            shared: Arc::clone(&self.shared),
            request: *request,
            opened: Instant::now(),
            position: 0,
        }))
    }

    fn open_input(
        &self,
        device: &DeviceInfo,
        request: &StreamRequest,
    ) -> Result<Box<dyn InputStream>, EngineError> {
        self.check(device, request, Direction::Input)?;
        Ok(Box::new(MemoryInput {
            name: device.name.clone(),
            shared: Arc::clone(&self.shared),
            request: *request,
            opened: Instant::now(),
            position: 0,
        }))
    }
}

struct MemoryOutput {
    name: String,
    shared: Arc<Shared>,
    request: StreamRequest,
    opened: Instant,
    /// Frames written so far
    position: u64,
}

impl OutputStream for MemoryOutput {
    fn device_name(&self) -> &str {
        &self.name
    }

    fn write(&mut self, samples: &[f32], cancel: &CancelToken) -> Result<IoStatus, EngineError> {
        self.shared.tick(&self.name, Direction::Output)?;
        if cancel.is_cancelled() {
            return Ok(IoStatus::Cancelled);
        }
        let frames = samples.len() / self.request.channels as usize;
        let end = self.position + frames as u64;
        if self.shared.pace(self.opened, end, self.request.sample_rate, cancel)
            == IoStatus::Cancelled
        {
            return Ok(IoStatus::Cancelled);
        }
        self.position = end;
        self.shared
            .frames_written
            .fetch_add(frames as u64, Ordering::SeqCst);
        if !self.shared.record.load(Ordering::Relaxed) {
            return Ok(IoStatus::Complete);
        }
        if let Ok(mut recording) = self.shared.recording.lock() {
            recording.samples.extend_from_slice(samples);
            recording.writes.push(frames);
        }
        Ok(IoStatus::Complete)
    }

    fn drain(&mut self, cancel: &CancelToken) -> Result<IoStatus, EngineError> {
        if cancel.is_cancelled() {
            return Ok(IoStatus::Cancelled);
        }
        Ok(IoStatus::Complete)
    }
}

impl Drop for MemoryOutput {
    fn drop(&mut self) {
        self.shared.open_streams.fetch_sub(1, Ordering::SeqCst);
        tracing::info!("Virtual output stream closed: {}", self.name);
    }
}

struct MemoryInput {
    name: String,
    shared: Arc<Shared>,
    request: StreamRequest,
    opened: Instant,
    /// Frames captured so far, for a continuous sine
    position: u64,
}

impl InputStream for MemoryInput {
    fn device_name(&self) -> &str {
        &self.name
    }

    fn read(
        &mut self,
        samples: &mut [f32],
        cancel: &CancelToken,
    ) -> Result<IoStatus, EngineError> {
        self.shared.tick(&self.name, Direction::Input)?;
        if cancel.is_cancelled() {
            return Ok(IoStatus::Cancelled);
        }
        let channels = self.request.channels as usize;
        let frames = samples.len() / channels;
        let end = self.position + frames as u64;
        if self.shared.pace(self.opened, end, self.request.sample_rate, cancel)
            == IoStatus::Cancelled
        {
            return Ok(IoStatus::Cancelled);
        }

        let source = self
            .shared
            .input
            .lock()
            .map(|s| *s)
            .unwrap_or(InputSource::Silence);
        let sample_rate = self.request.sample_rate as f64;
        for (i, frame) in samples.chunks_mut(channels).enumerate() {
            let value = match source {
                InputSource::Silence => 0.0,
                InputSource::Sine {
                    frequency,
                    amplitude,
                } => {
                    let t = (self.position + i as u64) as f64 / sample_rate;
                    (amplitude as f64 * (2.0 * PI * frequency * t).sin()) as f32
                }
            };
            frame.fill(value);
        }
        self.position += frames as u64;
        Ok(IoStatus::Complete)
    }
}

impl Drop for MemoryInput {
    fn drop(&mut self) {
        self.shared.open_streams.fetch_sub(1, Ordering::SeqCst);
        tracing::info!("Virtual input stream closed: {}", self.name);
    }
}
