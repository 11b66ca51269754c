//! E2E tests for the mic meter and loopback
//!
//! Monitoring runs until cancelled, so each test drives the engine with a
//! display that requests cancellation after a fixed number of meter updates.

use approx::assert_relative_eq;
use headphone_tester::audio::memory::{InputSource, MemoryDevice};
use headphone_tester::{
    CancelToken, DeviceSelection, DisplaySink, Engine, EngineConfig, EngineError, LevelMeter,
    MemoryBackend, MeterReading, SignalGenerator, SignalSpec, TerminalState,
};
use std::time::{Duration, Instant};

/// Collects output and stops the engine after `limit` level updates
struct Recorder {
    cancel: CancelToken,
    limit: usize,
    statuses: Vec<String>,
    levels: Vec<MeterReading>,
}

impl Recorder {
    fn new(cancel: CancelToken, limit: usize) -> Self {
        Self {
            cancel,
            limit,
            statuses: Vec::new(),
            levels: Vec::new(),
        }
    }
}

impl DisplaySink for Recorder {
    fn status(&mut self, message: &str) {
        self.statuses.push(message.to_string());
    }

    fn progress(&mut self, _frames_done: u64, _total_frames: u64, _sample_rate: u32) {}

    fn level(&mut self, reading: &MeterReading) {
        self.levels.push(*reading);
        if self.levels.len() >= self.limit {
            self.cancel.request_cancel();
        }
    }
}

/// Runs `run` on a worker, cancels it from this thread after 100ms, and
/// returns its result with the time from cancellation to return
fn cancel_while_running<F>(
    engine: &Engine<MemoryBackend>,
    run: F,
) -> (Result<TerminalState, EngineError>, Duration)
where
    F: FnOnce() -> Result<TerminalState, EngineError> + Send,
{
    let token = engine.cancel_token();
    std::thread::scope(|s| {
        let worker = s.spawn(move || {
            let result = run();
            (result, Instant::now())
        });
        while !token.is_active() {
            std::thread::sleep(Duration::from_millis(1));
        }
        std::thread::sleep(Duration::from_millis(100));
        assert!(token.request_cancel());
        let cancelled_at = Instant::now();
        let (result, returned_at) = worker.join().unwrap();
        (result, returned_at.saturating_duration_since(cancelled_at))
    })
}

fn headset(source: InputSource) -> (Engine<MemoryBackend>, MemoryBackend) {
    let headset = MemoryDevice::new("USB Audio Headset", 1, 2).as_default();
    let backend = MemoryBackend::new(vec![headset]).with_input(source);
    let engine = Engine::new(backend.clone(), EngineConfig::default()).unwrap();
    (engine, backend)
}

#[test]
fn test_meter_levels() {
    let mut meter = LevelMeter::new(-60.0, 0.0, 0.0);

    let silence = vec![0.0f32; 512];
    let reading = meter.process(&silence, 2);
    assert_eq!(reading.db, -60.0);
    assert_eq!(reading.bar, 0.0);

    // A full-scale sine reads 0 dB and fills the bar
    let full = SignalGenerator::new(SignalSpec::tone(1000.0, 1.0).with_amplitude(1.0), 48000, 1)
        .unwrap()
        .render(0, 4800);
    let reading = meter.process(&full, 1);
    assert_relative_eq!(reading.db, 0.0, epsilon = 0.01);
    assert_relative_eq!(reading.bar, 1.0, epsilon = 0.001);

    // Half amplitude is 6 dB down
    let half = SignalGenerator::new(SignalSpec::tone(1000.0, 1.0).with_amplitude(0.5), 48000, 1)
        .unwrap()
        .render(0, 4800);
    let reading = meter.process(&half, 1);
    assert_relative_eq!(reading.db, -6.02, epsilon = 0.02);
    assert_relative_eq!(reading.bar, 0.9, epsilon = 0.001);
}

#[test]
fn test_run_meter_on_silence() {
    let (engine, backend) = headset(InputSource::Silence);
    let mut display = Recorder::new(engine.cancel_token(), 20);

    let state = engine
        .run_meter(&DeviceSelection::default(), &mut display)
        .unwrap();
    assert_eq!(state, TerminalState::Cancelled { frames: 20 * 256 });
    assert_eq!(display.levels.len(), 20);
    assert!(display.levels.iter().all(|r| r.db == -60.0 && r.bar == 0.0));
    assert!(display.statuses.iter().any(|s| s.contains("Mic level meter")));
    assert_eq!(display.statuses.last().map(String::as_str), Some("Stopped."));
    assert_eq!(backend.open_streams(), 0);
    assert!(backend.recorded().is_empty());
}

#[test]
fn test_run_meter_tracks_signal() {
    let (engine, _) = headset(InputSource::Sine {
        frequency: 1000.0,
        amplitude: 0.5,
    });
    let mut display = Recorder::new(engine.cancel_token(), 40);
    engine
        .run_meter(&DeviceSelection::default(), &mut display)
        .unwrap();

    let last = display.levels.last().unwrap();
    assert_relative_eq!(last.db, -6.02, epsilon = 0.15);
    // Smoothing converges on the raw level
    assert_relative_eq!(last.smoothed_db, -6.02, epsilon = 0.25);
}

#[test]
fn test_loopback_mono_mic_to_stereo_phones() {
    let (engine, backend) = headset(InputSource::Sine {
        frequency: 1000.0,
        amplitude: 0.5,
    });
    let mut display = Recorder::new(engine.cancel_token(), 10);

    let state = engine
        .run_loopback(&DeviceSelection::default(), &mut display)
        .unwrap();
    assert_eq!(state.frames(), 10 * 256);
    assert!(display.statuses[0].starts_with("Loopback: mic → headphones (latency ~5.3ms"));

    let recorded = backend.recorded();
    assert_eq!(recorded.len(), 10 * 256 * 2);
    assert!(recorded.chunks(2).all(|f| f[0] == f[1]));
    // Default loopback gain halves the 0.5 peak
    let peak = recorded.iter().fold(0.0f32, |m, s| m.max(s.abs()));
    assert_relative_eq!(peak, 0.25, epsilon = 0.005);
    assert_eq!(backend.open_streams(), 0);
}

#[test]
fn test_loopback_needs_an_input() {
    let backend = MemoryBackend::new(vec![MemoryDevice::new("HDMI Output", 0, 2).as_default()]);
    let engine = Engine::new(backend.clone(), EngineConfig::default()).unwrap();
    let mut display = Recorder::new(engine.cancel_token(), 1);

    let err = engine
        .run_loopback(&DeviceSelection::default(), &mut display)
        .unwrap_err();
    assert!(matches!(err, EngineError::DeviceUnavailable { .. }));
    assert_eq!(backend.opened_total(), 0);
    assert!(!engine.is_busy());
}

#[test]
fn test_mic_failure_is_reported() {
    let (engine, backend) = headset(InputSource::Silence);
    backend.fail_after(5);
    let mut display = Recorder::new(engine.cancel_token(), 1000);

    let err = engine
        .run_meter(&DeviceSelection::default(), &mut display)
        .unwrap_err();
    assert!(matches!(err, EngineError::Stream { .. }));
    assert_eq!(display.levels.len(), 5);
    assert_eq!(backend.open_streams(), 0);
    assert!(!display.statuses.iter().any(|s| s == "Stopped."));
}

/// Starting a tone while the meter runs stops the meter first
#[test]
fn test_new_operation_replaces_running_one() {
    let (engine, backend) = headset(InputSource::Silence);
    let backend = backend.with_realtime(true);

    let (meter_result, tone_result) = std::thread::scope(|s| {
        let meter = s.spawn(|| {
            let mut display = Recorder::new(CancelToken::new(), usize::MAX);
            engine.run_meter(&DeviceSelection::default(), &mut display)
        });
        while !engine.is_busy() {
            std::thread::sleep(Duration::from_millis(1));
        }
        std::thread::sleep(Duration::from_millis(30));

        let mut display = Recorder::new(CancelToken::new(), usize::MAX);
        let tone = engine.generate_and_play(
            engine.tone_spec(440.0, 0.05),
            &DeviceSelection::default(),
            &mut display,
        );
        (meter.join().unwrap(), tone)
    });

    assert!(matches!(meter_result, Ok(TerminalState::Cancelled { .. })));
    assert_eq!(tone_result.unwrap(), TerminalState::Completed { frames: 2400 });
    assert_eq!(backend.open_streams(), 0);
    assert_eq!(backend.opened_total(), 2);
}

/// Cancelling a running meter or loopback returns within about one block and
/// leaves the device free for the next command
#[test]
fn test_cancel_running_monitor() {
    let (engine, backend) = headset(InputSource::Sine {
        frequency: 1000.0,
        amplitude: 0.5,
    });
    let backend = backend.with_realtime(true);
    let selection = DeviceSelection::default();

    let (result, latency) = cancel_while_running(&engine, || {
        let mut display = Recorder::new(CancelToken::new(), usize::MAX);
        engine.run_meter(&selection, &mut display)
    });
    let TerminalState::Cancelled { frames } = result.unwrap() else {
        panic!("meter should end cancelled");
    };
    // Paced capture: 100ms is about 18 blocks
    assert!(frames >= 10 * 256 && frames % 256 == 0);
    // One 5.3ms block plus scheduling slack
    assert!(latency < Duration::from_millis(250), "meter took {latency:?}");
    assert_eq!(backend.open_streams(), 0);
    assert!(!engine.is_busy());

    let (result, latency) = cancel_while_running(&engine, || {
        let mut display = Recorder::new(CancelToken::new(), usize::MAX);
        engine.run_loopback(&selection, &mut display)
    });
    assert!(matches!(result, Ok(TerminalState::Cancelled { .. })));
    assert!(latency < Duration::from_millis(250), "loopback took {latency:?}");
    assert_eq!(backend.open_streams(), 0);
    assert!(!engine.is_busy());

    // The same device opens again
    let mut display = Recorder::new(engine.cancel_token(), 5);
    let state = engine.run_meter(&selection, &mut display).unwrap();
    assert_eq!(state, TerminalState::Cancelled { frames: 5 * 256 });
    assert_eq!(backend.open_streams(), 0);
    assert_eq!(backend.opened_total(), 4);
}
