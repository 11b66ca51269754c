//! Finite-duration playback of tones, channel tests, and sweeps
//!
//! Blocks are generated and written strictly in sequence; the generator
//! position only advances once per block, which keeps the signal phase
//! continuous across block boundaries.

use crate::audio::backend::IoStatus;
use crate::audio::session::StreamSession;
use crate::audio::signal::{SignalGenerator, SignalSpec};
use crate::cancel::CancelToken;
use crate::display::DisplaySink;
use crate::error::EngineError;
use crate::TerminalState;

/// Controller lifecycle, shared by playback and monitor controllers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    /// Created, not yet started
    Idle,
    /// Playback loop running (finite)
    Streaming,
    /// Monitor loop running (unbounded)
    Running,
    /// Every requested frame was written
    Completed,
    /// Stopped by cancellation
    Cancelled,
    /// Stopped by a stream error
    Failed,
}

/// Streams one finite [`SignalSpec`] to an output session
pub struct PlaybackController<'a> {
    session: StreamSession,
    generator: SignalGenerator,
    cancel: &'a CancelToken,
    state: ControllerState,
    /// Frames accepted by the device so far
    written: u64,
}

impl<'a> PlaybackController<'a> {
    /// Bind a spec to an open output session
    ///
    /// Fails with `InvalidParameter` for unbounded or malformed specs.
    pub fn new(
        session: StreamSession,
        spec: SignalSpec,
        cancel: &'a CancelToken,
    ) -> Result<Self, EngineError> {
        let params = *session.params();
        let generator = SignalGenerator::new(spec, params.sample_rate, params.output_channels)?;
        if generator.total_frames().is_none() {
            return Err(EngineError::invalid("playback needs a finite duration"));
        }
        Ok(Self {
            session,
            generator,
            cancel,
            state: ControllerState::Idle,
            written: 0,
        })
    }

    /// Current lifecycle state
    pub fn state(&self) -> ControllerState {
        self.state
    }

    /// Frames written so far
    pub fn frames_written(&self) -> u64 {
        self.written
    }

    /// Total frames the spec asks for
    pub fn total_frames(&self) -> u64 {
        self.generator.total_frames().unwrap_or(0)
    }

    fn transition(&mut self, next: ControllerState) {
        tracing::debug!("Playback {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    /// Run to completion, cancellation, or failure
    ///
    /// Stream errors are returned unchanged and never retried.
    pub fn run(&mut self, display: &mut dyn DisplaySink) -> Result<TerminalState, EngineError> {
        self.transition(ControllerState::Streaming);
        tracing::info!(
            "Playback started: {} ({} frames)",
            self.generator.spec().describe(),
            self.total_frames()
        );

        let result = self.stream(display);
        display.finish();

        match &result {
            Ok(TerminalState::Completed { .. }) => self.transition(ControllerState::Completed),
            Ok(TerminalState::Cancelled { frames }) => {
                tracing::info!("Playback cancelled after {} frames", frames);
                self.transition(ControllerState::Cancelled);
            }
            Err(e) => {
                tracing::warn!("Playback failed after {} frames: {}", self.written, e);
                self.transition(ControllerState::Failed);
            }
        }
        result
    }

    fn stream(&mut self, display: &mut dyn DisplaySink) -> Result<TerminalState, EngineError> {
        let params = *self.session.params();
        let channels = params.output_channels as usize;
        let total = self.total_frames();
        let mut block = vec![0.0f32; params.output_block_len()];

        loop {
            if self.cancel.is_cancelled() {
                return Ok(TerminalState::Cancelled {
                    frames: self.written,
                });
            }

            let frames = self.generator.fill(&mut block);
            if frames == 0 {
                break;
            }

            match self.session.write(&block[..frames * channels], self.cancel)? {
                IoStatus::Complete => self.written += frames as u64,
                IoStatus::Cancelled => {
                    return Ok(TerminalState::Cancelled {
                        frames: self.written,
                    })
                }
            }
            display.progress(self.written, total, params.sample_rate);
        }

        match self.session.drain(self.cancel)? {
            IoStatus::Complete => Ok(TerminalState::Completed {
                frames: self.written,
            }),
            IoStatus::Cancelled => Ok(TerminalState::Cancelled {
                frames: self.written,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::device::DeviceSelection;
    use crate::audio::memory::{MemoryBackend, MemoryDevice};
    use crate::config::EngineConfig;
    use crate::display::NullDisplay;

    fn session(backend: &MemoryBackend) -> StreamSession {
        StreamSession::open_output(
            backend,
            &DeviceSelection::default(),
            &EngineConfig::default(),
            2,
        )
        .unwrap()
    }

    fn backend(rate: u32) -> MemoryBackend {
        MemoryBackend::new(vec![
            MemoryDevice::new("Phones", 0, 2).with_rates(&[rate]).as_default(),
        ])
    }

    #[test]
    fn test_block_schedule() {
        let backend = backend(44100);
        let cancel = CancelToken::new();
        let mut controller =
            PlaybackController::new(session(&backend), SignalSpec::tone(440.0, 2.0), &cancel)
                .unwrap();
        assert_eq!(controller.state(), ControllerState::Idle);

        let state = controller.run(&mut NullDisplay).unwrap();
        assert_eq!(state, TerminalState::Completed { frames: 88200 });
        assert_eq!(controller.state(), ControllerState::Completed);

        let sizes = backend.write_sizes();
        assert_eq!(sizes.len(), 345);
        assert!(sizes[..344].iter().all(|&n| n == 256));
        assert_eq!(sizes[344], 136);
        assert_eq!(backend.recorded().len(), 88200 * 2);
    }

    #[test]
    fn test_cancel_before_start() {
        let backend = backend(48000);
        let cancel = CancelToken::new();
        cancel.request_cancel();
        let mut controller =
            PlaybackController::new(session(&backend), SignalSpec::tone(440.0, 1.0), &cancel)
                .unwrap();
        let state = controller.run(&mut NullDisplay).unwrap();
        assert_eq!(state, TerminalState::Cancelled { frames: 0 });
        assert_eq!(controller.state(), ControllerState::Cancelled);
        assert!(backend.write_sizes().is_empty());
    }

    #[test]
    fn test_stream_error_fails_without_retry() {
        let backend = backend(48000);
        let cancel = CancelToken::new();
        let mut controller =
            PlaybackController::new(session(&backend), SignalSpec::tone(440.0, 1.0), &cancel)
                .unwrap();
        backend.fail_after(3);

        let err = controller.run(&mut NullDisplay).unwrap_err();
        assert!(matches!(err, EngineError::Stream { .. }));
        assert_eq!(controller.state(), ControllerState::Failed);
        assert_eq!(controller.frames_written(), 3 * 256);
        assert_eq!(backend.write_sizes().len(), 3);
    }

    #[test]
    fn test_written_signal_matches_generator() {
        let backend = backend(48000);
        let cancel = CancelToken::new();
        let spec = SignalSpec::sweep(20.0, 20_000.0, 0.1);
        let mut controller = PlaybackController::new(session(&backend), spec, &cancel).unwrap();
        controller.run(&mut NullDisplay).unwrap();

        let reference = SignalGenerator::new(spec, 48000, 2).unwrap().render(0, 4800);
        assert_eq!(backend.recorded(), reference);
    }
}
