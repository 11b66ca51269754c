//! Scoped stream lifecycle for one operation
//!
//! A [`StreamSession`] resolves the device selection, negotiates stream
//! parameters, and owns the native stream handles. Handles are released when
//! the session is dropped, so every exit path (completion, cancellation, `?`
//! on an error) closes the device before control returns to the caller.

use crate::audio::backend::{AudioBackend, InputStream, IoStatus, OutputStream, StreamRequest};
use crate::audio::device::{self, DeviceInfo, DeviceSelection};
use crate::cancel::CancelToken;
use crate::config::EngineConfig;
use crate::error::{Direction, EngineError};
use std::time::Duration;

/// Negotiated stream format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamParams {
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Frames per block
    pub block_size: u32,
    /// Input channels (0 when the session has no input)
    pub input_channels: u16,
    /// Output channels (0 when the session has no output)
    pub output_channels: u16,
}

impl StreamParams {
    /// Nominal buffer latency: block_size / sample_rate
    pub fn latency(&self) -> Duration {
        Duration::from_secs_f64(self.block_size as f64 / self.sample_rate as f64)
    }

    /// Samples in one interleaved output block
    pub fn output_block_len(&self) -> usize {
        self.block_size as usize * self.output_channels as usize
    }

    /// Samples in one interleaved input block
    pub fn input_block_len(&self) -> usize {
        self.block_size as usize * self.input_channels as usize
    }
}

/// One open audio operation: output-only, input-only, or duplex
pub struct StreamSession {
    params: StreamParams,
    output_device: Option<DeviceInfo>,
    input_device: Option<DeviceInfo>,
    output: Option<Box<dyn OutputStream>>,
    input: Option<Box<dyn InputStream>>,
}

impl StreamSession {
    /// Open an output-only session with at least `min_channels` channels
    pub fn open_output<B: AudioBackend + ?Sized>(
        backend: &B,
        selection: &DeviceSelection,
        config: &EngineConfig,
        min_channels: u16,
    ) -> Result<Self, EngineError> {
        Self::open(backend, selection, config, false, Some(min_channels))
    }

    /// Open an input-only session
    pub fn open_input<B: AudioBackend + ?Sized>(
        backend: &B,
        selection: &DeviceSelection,
        config: &EngineConfig,
    ) -> Result<Self, EngineError> {
        Self::open(backend, selection, config, true, None)
    }

    /// Open input and output at the same rate and block size
    pub fn open_duplex<B: AudioBackend + ?Sized>(
        backend: &B,
        selection: &DeviceSelection,
        config: &EngineConfig,
    ) -> Result<Self, EngineError> {
        Self::open(backend, selection, config, true, Some(1))
    }

    fn open<B: AudioBackend + ?Sized>(
        backend: &B,
        selection: &DeviceSelection,
        config: &EngineConfig,
        with_input: bool,
        min_output_channels: Option<u16>,
    ) -> Result<Self, EngineError> {
        config.validate()?;
        let devices = backend.devices()?;

        let output_device = match min_output_channels {
            Some(_) => Some(device::resolve(&devices, selection, Direction::Output)?.clone()),
            None => None,
        };
        let input_device = if with_input {
            Some(device::resolve(&devices, selection, Direction::Input)?.clone())
        } else {
            None
        };

        // The output device's clock drives duplex sessions
        let sample_rate = match (config.sample_rate, &output_device, &input_device) {
            (Some(rate), _, _) => rate,
            (None, Some(out), _) => out.default_sample_rate,
            (None, None, Some(inp)) => inp.default_sample_rate,
            (None, None, None) => return Err(EngineError::invalid("session needs a direction")),
        };

        let output_channels = output_device
            .as_ref()
            .map(|d| d.output_channels.min(config.max_channels))
            .unwrap_or(0);
        let input_channels = input_device
            .as_ref()
            .map(|d| d.input_channels.min(config.max_channels))
            .unwrap_or(0);

        if let (Some(required), Some(out)) = (min_output_channels, &output_device) {
            if output_channels < required {
                return Err(EngineError::UnsupportedFormat {
                    device: out.to_string(),
                    format: format!("{required} output channels"),
                });
            }
        }

        let params = StreamParams {
            sample_rate,
            block_size: config.block_size,
            input_channels,
            output_channels,
        };
        let stall_timeout = Duration::from_millis(config.stall_timeout_ms);

        let input = match &input_device {
            Some(dev) => Some(backend.open_input(
                dev,
                &StreamRequest {
                    sample_rate,
                    block_size: config.block_size,
                    channels: input_channels,
                    fail_on_underrun: false,
                    stall_timeout,
                },
            )?),
            None => None,
        };
        let output = match &output_device {
            Some(dev) => Some(backend.open_output(
                dev,
                &StreamRequest {
                    sample_rate,
                    block_size: config.block_size,
                    channels: output_channels,
                    // Duplex output follows a separate input clock; drift is tolerated
                    fail_on_underrun: input.is_none(),
                    stall_timeout,
                },
            )?),
            None => None,
        };

        tracing::info!(
            "Stream session opened: out={} in={} @ {}Hz, block {} ({:.1}ms)",
            output_device.as_ref().map(|d| d.name.as_str()).unwrap_or("-"),
            input_device.as_ref().map(|d| d.name.as_str()).unwrap_or("-"),
            sample_rate,
            config.block_size,
            params.latency().as_secs_f64() * 1000.0
        );

        Ok(Self {
            params,
            output_device,
            input_device,
            output,
            input,
        })
    }

    /// Negotiated stream parameters
    pub fn params(&self) -> &StreamParams {
        &self.params
    }

    /// Nominal added latency of one block
    pub fn latency(&self) -> Duration {
        self.params.latency()
    }

    /// Output device, if the session plays audio
    pub fn output_device(&self) -> Option<&DeviceInfo> {
        self.output_device.as_ref()
    }

    /// Input device, if the session captures audio
    pub fn input_device(&self) -> Option<&DeviceInfo> {
        self.input_device.as_ref()
    }

    /// Push one interleaved block to the output device
    pub fn write(
        &mut self,
        samples: &[f32],
        cancel: &CancelToken,
    ) -> Result<IoStatus, EngineError> {
        match self.output.as_mut() {
            Some(output) => output.write(samples, cancel),
            None => Err(EngineError::stream("none", Direction::Output, "session has no output")),
        }
    }

    /// Wait for queued output to reach the device
    pub fn drain(&mut self, cancel: &CancelToken) -> Result<IoStatus, EngineError> {
        match self.output.as_mut() {
            Some(output) => output.drain(cancel),
            None => Ok(IoStatus::Complete),
        }
    }

    /// Pull one interleaved block from the input device
    pub fn read(
        &mut self,
        samples: &mut [f32],
        cancel: &CancelToken,
    ) -> Result<IoStatus, EngineError> {
        match self.input.as_mut() {
            Some(input) => input.read(samples, cancel),
            None => Err(EngineError::stream("none", Direction::Input, "session has no input")),
        }
    }

    /// Close the streams now
    pub fn close(self) {}
}

impl Drop for StreamSession {
    fn drop(&mut self) {
        self.output = None;
        self.input = None;
        tracing::debug!("Stream session closed");
    }
}
