//! Unbounded monitoring loops: mic level meter and mic-to-headphone loopback
//!
//! These loops have no natural end. Cancellation is the only normal exit;
//! any read or write failure ends the run as failed and is not retried.

use crate::audio::backend::IoStatus;
use crate::audio::meter::LevelMeter;
use crate::audio::playback::ControllerState;
use crate::audio::session::StreamSession;
use crate::cancel::CancelToken;
use crate::display::DisplaySink;
use crate::error::EngineError;
use crate::TerminalState;

/// What a monitor run does with captured blocks
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MonitorMode {
    /// Meter the input level
    Meter,
    /// Pass input straight to the output at a fixed gain
    Loopback {
        /// Linear gain applied to every sample
        gain: f32,
    },
}

/// Copy an input block to an output block, adapting channel counts
///
/// Mono (or any narrower) input is duplicated from channel 0 onto every
/// output channel; wider input is truncated. `gain` scales every sample.
pub fn route_channels(
    input: &[f32],
    input_channels: u16,
    output: &mut [f32],
    output_channels: u16,
    gain: f32,
) {
    let in_ch = input_channels.max(1) as usize;
    let out_ch = output_channels.max(1) as usize;
    for (src, dst) in input.chunks(in_ch).zip(output.chunks_mut(out_ch)) {
        for (c, slot) in dst.iter_mut().enumerate() {
            let sample = if in_ch < out_ch { src[0] } else { src[c] };
            *slot = sample * gain;
        }
    }
}

/// Runs a meter or loopback loop until cancelled
pub struct MonitorController<'a> {
    session: StreamSession,
    mode: MonitorMode,
    meter: LevelMeter,
    cancel: &'a CancelToken,
    state: ControllerState,
    /// Frames captured so far
    frames: u64,
}

impl<'a> MonitorController<'a> {
    /// Mic meter on an input session
    pub fn meter(
        session: StreamSession,
        meter: LevelMeter,
        cancel: &'a CancelToken,
    ) -> Result<Self, EngineError> {
        if session.input_device().is_none() {
            return Err(EngineError::invalid("mic meter needs an input stream"));
        }
        Ok(Self::new(session, MonitorMode::Meter, meter, cancel))
    }

    /// Loopback on a duplex session
    ///
    /// The meter tracks the captured level so the display can show it.
    pub fn loopback(
        session: StreamSession,
        gain: f32,
        meter: LevelMeter,
        cancel: &'a CancelToken,
    ) -> Result<Self, EngineError> {
        if session.input_device().is_none() || session.output_device().is_none() {
            return Err(EngineError::invalid(
                "loopback needs both an input and an output stream",
            ));
        }
        if !(0.0..=1.0).contains(&gain) {
            return Err(EngineError::invalid(format!(
                "loopback gain must be in [0, 1], got {gain}"
            )));
        }
        Ok(Self::new(session, MonitorMode::Loopback { gain }, meter, cancel))
    }

    fn new(
        session: StreamSession,
        mode: MonitorMode,
        meter: LevelMeter,
        cancel: &'a CancelToken,
    ) -> Self {
        Self {
            session,
            mode,
            meter,
            cancel,
            state: ControllerState::Idle,
            frames: 0,
        }
    }

    /// Current lifecycle state
    pub fn state(&self) -> ControllerState {
        self.state
    }

    /// Frames captured so far
    pub fn frames(&self) -> u64 {
        self.frames
    }

    fn transition(&mut self, next: ControllerState) {
        tracing::debug!("Monitor {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    /// Run until cancelled or failed
    pub fn run(&mut self, display: &mut dyn DisplaySink) -> Result<TerminalState, EngineError> {
        self.transition(ControllerState::Running);
        let result = match self.mode {
            MonitorMode::Meter => {
                display.status("Mic level meter (Ctrl+C to stop)");
                self.run_meter(display)
            }
            MonitorMode::Loopback { gain } => {
                let latency_ms = self.session.latency().as_secs_f64() * 1000.0;
                tracing::info!("Loopback started, nominal latency {:.1}ms", latency_ms);
                display.status(&format!(
                    "Loopback: mic → headphones (latency ~{latency_ms:.1}ms, Ctrl+C to stop)"
                ));
                self.run_loopback(gain, display)
            }
        };
        display.finish();

        match &result {
            Ok(_) => {
                tracing::info!("Monitor stopped after {} frames", self.frames);
                self.transition(ControllerState::Cancelled);
            }
            Err(e) => {
                tracing::warn!("Monitor failed after {} frames: {}", self.frames, e);
                self.transition(ControllerState::Failed);
            }
        }
        result
    }

    fn run_meter(&mut self, display: &mut dyn DisplaySink) -> Result<TerminalState, EngineError> {
        let params = *self.session.params();
        let mut input = vec![0.0f32; params.input_block_len()];

        while !self.cancel.is_cancelled() {
            if self.session.read(&mut input, self.cancel)? == IoStatus::Cancelled {
                break;
            }
            self.frames += params.block_size as u64;
            let reading = self.meter.process(&input, params.input_channels);
            display.level(&reading);
        }
        Ok(TerminalState::Cancelled {
            frames: self.frames,
        })
    }

    fn run_loopback(
        &mut self,
        gain: f32,
        display: &mut dyn DisplaySink,
    ) -> Result<TerminalState, EngineError> {
        let params = *self.session.params();
        let mut input = vec![0.0f32; params.input_block_len()];
        let mut output = vec![0.0f32; params.output_block_len()];

        while !self.cancel.is_cancelled() {
            if self.session.read(&mut input, self.cancel)? == IoStatus::Cancelled {
                break;
            }
            self.frames += params.block_size as u64;
            route_channels(
                &input,
                params.input_channels,
                &mut output,
                params.output_channels,
                gain,
            );
            if self.session.write(&output, self.cancel)? == IoStatus::Cancelled {
                break;
            }
            let reading = self.meter.process(&input, params.input_channels);
            display.level(&reading);
        }
        Ok(TerminalState::Cancelled {
            frames: self.frames,
        })
    }
}
