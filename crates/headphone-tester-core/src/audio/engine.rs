//! The command-facing engine
//!
//! [`Engine`] ties a transport, the configuration and the cancellation token
//! together. Every operation claims the token first, so at most one stream
//! session is open at a time: starting a new operation stops the running one
//! and waits for it to close its session.

use crate::audio::backend::AudioBackend;
use crate::audio::device::{DeviceInfo, DeviceSelection};
use crate::audio::meter::LevelMeter;
use crate::audio::monitor::MonitorController;
use crate::audio::playback::PlaybackController;
use crate::audio::session::StreamSession;
use crate::audio::signal::{ChannelRoute, SignalSpec};
use crate::cancel::CancelToken;
use crate::config::EngineConfig;
use crate::display::DisplaySink;
use crate::error::EngineError;
use crate::TerminalState;

/// Signal generation, metering and loopback over one audio transport
pub struct Engine<B: AudioBackend> {
    backend: B,
    config: EngineConfig,
    cancel: CancelToken,
}

impl<B: AudioBackend> Engine<B> {
    /// Create an engine, rejecting an invalid configuration
    pub fn new(backend: B, config: EngineConfig) -> Result<Self, EngineError> {
        config.validate()?;
        Ok(Self {
            backend,
            config,
            cancel: CancelToken::new(),
        })
    }

    /// Transport in use
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Active configuration
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Handle for cancelling from another thread or a signal handler
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Stop the running operation at its next block boundary
    ///
    /// Returns `false` when nothing was running.
    pub fn request_cancel(&self) -> bool {
        self.cancel.request_cancel()
    }

    /// Whether an operation is running
    pub fn is_busy(&self) -> bool {
        self.cancel.is_active()
    }

    /// Enumerate devices
    pub fn devices(&self) -> Result<Vec<DeviceInfo>, EngineError> {
        self.backend.devices()
    }

    /// Tone at the configured amplitude and fade
    pub fn tone_spec(&self, frequency: f64, duration: f64) -> SignalSpec {
        self.shape(SignalSpec::tone(frequency, duration))
    }

    /// Default tone on one side only
    pub fn channel_spec(&self, route: ChannelRoute) -> SignalSpec {
        self.shape(SignalSpec::channel_tone(
            route,
            self.config.tone_frequency,
            self.config.tone_duration,
        ))
    }

    /// Configured sweep range over `duration` seconds
    pub fn sweep_spec(&self, duration: f64) -> SignalSpec {
        self.shape(SignalSpec::sweep(
            self.config.sweep_start,
            self.config.sweep_end,
            duration,
        ))
    }

    fn shape(&self, spec: SignalSpec) -> SignalSpec {
        spec.with_amplitude(self.config.amplitude)
            .with_fade(self.config.fade_ms / 1000.0)
    }

    fn meter(&self) -> LevelMeter {
        LevelMeter::new(
            self.config.meter_floor_db,
            self.config.meter_ceiling_db,
            self.config.meter_smoothing,
        )
    }

    /// Play a finite signal to the selected output
    ///
    /// Malformed specs fail before any device is touched. Blocks until the
    /// signal has played, the operation is cancelled, or the stream fails.
    pub fn generate_and_play(
        &self,
        spec: SignalSpec,
        selection: &DeviceSelection,
        display: &mut dyn DisplaySink,
    ) -> Result<TerminalState, EngineError> {
        spec.validate()?;
        if spec.duration.is_none() {
            return Err(EngineError::invalid("playback needs a finite duration"));
        }

        let guard = self.cancel.begin();
        let session = StreamSession::open_output(
            &self.backend,
            selection,
            &self.config,
            spec.route.required_channels(),
        )?;
        let device = session
            .output_device()
            .map(|d| d.to_string())
            .unwrap_or_default();
        display.status(&format!("Playing {} on {}...", spec.describe(), device));

        let mut controller = PlaybackController::new(session, spec, guard.token())?;
        let result = controller.run(display);
        // Close the session before reporting so the device is free again
        drop(controller);

        if let Ok(state) = &result {
            display.status(match state {
                TerminalState::Completed { .. } => "Done.",
                TerminalState::Cancelled { .. } => "Stopped.",
            });
        }
        result
    }

    /// Meter the selected input until cancelled
    pub fn run_meter(
        &self,
        selection: &DeviceSelection,
        display: &mut dyn DisplaySink,
    ) -> Result<TerminalState, EngineError> {
        let guard = self.cancel.begin();
        let session = StreamSession::open_input(&self.backend, selection, &self.config)?;
        if let Some(device) = session.input_device() {
            display.status(&format!("Listening on {device}"));
        }

        let mut controller = MonitorController::meter(session, self.meter(), guard.token())?;
        let result = controller.run(display);
        drop(controller);

        if result.is_ok() {
            display.status("Stopped.");
        }
        result
    }

    /// Route the selected input to the selected output until cancelled
    pub fn run_loopback(
        &self,
        selection: &DeviceSelection,
        display: &mut dyn DisplaySink,
    ) -> Result<TerminalState, EngineError> {
        let guard = self.cancel.begin();
        let session = StreamSession::open_duplex(&self.backend, selection, &self.config)?;

        let mut controller = MonitorController::loopback(
            session,
            self.config.loopback_gain,
            self.meter(),
            guard.token(),
        )?;
        let result = controller.run(display);
        drop(controller);

        if result.is_ok() {
            display.status("Stopped.");
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::memory::{MemoryBackend, MemoryDevice};
    use crate::display::NullDisplay;

    fn engine() -> (Engine<MemoryBackend>, MemoryBackend) {
        let backend = MemoryBackend::new(vec![MemoryDevice::new("Phones", 1, 2).as_default()]);
        let engine = Engine::new(backend.clone(), EngineConfig::default()).unwrap();
        (engine, backend)
    }

    /// Collects status lines
    #[derive(Default)]
    struct Statuses(Vec<String>);

    impl DisplaySink for Statuses {
        fn status(&mut self, message: &str) {
            self.0.push(message.to_string());
        }
        fn progress(&mut self, _: u64, _: u64, _: u32) {}
        fn level(&mut self, _: &crate::MeterReading) {}
    }

    #[test]
    fn test_rejects_invalid_config() {
        let config = EngineConfig {
            block_size: 0,
            ..Default::default()
        };
        assert!(Engine::new(MemoryBackend::default(), config).is_err());
    }

    #[test]
    fn test_specs_use_config() {
        let (engine, _) = engine();
        let spec = engine.channel_spec(ChannelRoute::Left);
        assert_eq!(spec.route, ChannelRoute::Left);
        assert_eq!(spec.amplitude, 0.3);
        assert_eq!(spec.duration, Some(2.0));
        assert!((spec.fade - 0.01).abs() < 1e-12);
    }

    #[test]
    fn test_play_reports_and_releases() {
        let (engine, backend) = engine();
        let mut display = Statuses::default();
        let state = engine
            .generate_and_play(
                engine.tone_spec(1000.0, 0.5),
                &DeviceSelection::default(),
                &mut display,
            )
            .unwrap();
        assert_eq!(state, TerminalState::Completed { frames: 24000 });
        assert!(display.0[0].starts_with("Playing"));
        assert_eq!(display.0.last().map(String::as_str), Some("Done."));
        assert_eq!(backend.open_streams(), 0);
        assert!(!engine.is_busy());
    }

    #[test]
    fn test_invalid_spec_never_opens() {
        let (engine, backend) = engine();
        let err = engine
            .generate_and_play(
                SignalSpec::tone(0.0, 1.0),
                &DeviceSelection::default(),
                &mut NullDisplay,
            )
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidParameter(_)));
        assert_eq!(backend.opened_total(), 0);
    }

    #[test]
    fn test_unavailable_device_leaves_engine_idle() {
        let (engine, backend) = engine();
        let selection = DeviceSelection {
            output: Some(7),
            input: None,
        };
        let err = engine
            .generate_and_play(engine.tone_spec(440.0, 1.0), &selection, &mut NullDisplay)
            .unwrap_err();
        assert!(matches!(err, EngineError::DeviceUnavailable { .. }));
        assert!(!engine.is_busy());
        assert_eq!(backend.opened_total(), 0);
    }

    #[test]
    fn test_request_cancel_when_idle() {
        let (engine, _) = engine();
        assert!(!engine.request_cancel());
        // A stale request must not stop the next operation
        let state = engine
            .generate_and_play(
                engine.tone_spec(440.0, 0.1),
                &DeviceSelection::default(),
                &mut NullDisplay,
            )
            .unwrap();
        assert_eq!(state, TerminalState::Completed { frames: 4800 });
    }
}
