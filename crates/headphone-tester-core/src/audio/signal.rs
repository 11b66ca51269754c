//! Test signal synthesis: pure tones, channel-isolated tones, and log sweeps
//!
//! Every sample is a pure function of its absolute frame index, so a signal
//! rendered block by block is bit-identical to the same signal rendered in a
//! single call. Phase is never accumulated across blocks.

use crate::error::EngineError;
use std::f64::consts::PI;
use std::fmt;

/// Which output channels carry the signal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelRoute {
    /// Same signal on every channel
    Both,
    /// Channel 0 only, all others silent
    Left,
    /// Channel 1 only, all others silent
    Right,
}

impl ChannelRoute {
    /// Minimum output channel count the route needs to be meaningful
    pub fn required_channels(&self) -> u16 {
        match self {
            Self::Both => 1,
            Self::Left | Self::Right => 2,
        }
    }

    /// Whether interleaved slot `channel` carries signal
    pub fn is_active(&self, channel: usize) -> bool {
        match self {
            Self::Both => true,
            Self::Left => channel == 0,
            Self::Right => channel == 1,
        }
    }
}

impl fmt::Display for ChannelRoute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Both => f.write_str("both channels"),
            Self::Left => f.write_str("LEFT channel"),
            Self::Right => f.write_str("RIGHT channel"),
        }
    }
}

/// Shape of the generated signal
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SignalKind {
    /// Constant-frequency sine
    Tone {
        /// Frequency in Hz
        frequency: f64,
    },
    /// Logarithmic (exponential) sine sweep
    Sweep {
        /// Frequency at t = 0 in Hz
        start: f64,
        /// Frequency at t = duration in Hz
        end: f64,
    },
}

/// Immutable description of what to generate
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SignalSpec {
    /// Tone or sweep
    pub kind: SignalKind,
    /// Channel routing
    pub route: ChannelRoute,
    /// Peak amplitude (0.0 to 1.0)
    pub amplitude: f32,
    /// Duration in seconds, `None` for unbounded signals
    pub duration: Option<f64>,
    /// Linear fade-in/fade-out length in seconds
    pub fade: f64,
}

impl SignalSpec {
    /// Sine tone on all channels
    ///
    /// # Example
    /// ```
    /// use headphone_tester_core::audio::signal::SignalSpec;
    ///
    /// let spec = SignalSpec::tone(440.0, 2.0);
    /// assert_eq!(spec.total_frames(44100), Some(88200));
    /// ```
    pub fn tone(frequency: f64, duration: f64) -> Self {
        Self::channel_tone(ChannelRoute::Both, frequency, duration)
    }

    /// Sine tone routed to the given channels only
    pub fn channel_tone(route: ChannelRoute, frequency: f64, duration: f64) -> Self {
        Self {
            kind: SignalKind::Tone { frequency },
            route,
            amplitude: crate::DEFAULT_AMPLITUDE,
            duration: Some(duration),
            fade: 0.0,
        }
    }

    /// Logarithmic sweep from `start` to `end` Hz over `duration` seconds
    pub fn sweep(start: f64, end: f64, duration: f64) -> Self {
        Self {
            kind: SignalKind::Sweep { start, end },
            route: ChannelRoute::Both,
            amplitude: crate::DEFAULT_AMPLITUDE,
            duration: Some(duration),
            fade: 0.0,
        }
    }

    /// Replace the peak amplitude
    pub fn with_amplitude(mut self, amplitude: f32) -> Self {
        self.amplitude = amplitude;
        self
    }

    /// Replace the fade length (seconds)
    pub fn with_fade(mut self, seconds: f64) -> Self {
        self.fade = seconds;
        self
    }

    /// Check the spec before any device is touched
    pub fn validate(&self) -> Result<(), EngineError> {
        match self.kind {
            SignalKind::Tone { frequency } => {
                if !(frequency.is_finite() && frequency > 0.0) {
                    return Err(EngineError::invalid(format!(
                        "frequency must be positive, got {frequency} Hz"
                    )));
                }
            }
            SignalKind::Sweep { start, end } => {
                if !(start.is_finite() && start > 0.0 && end.is_finite() && end > 0.0) {
                    return Err(EngineError::invalid(format!(
                        "sweep frequencies must be positive, got {start} Hz to {end} Hz"
                    )));
                }
                if !(end / start).ln().is_finite() {
                    return Err(EngineError::invalid(format!(
                        "sweep range {start} Hz to {end} Hz has no finite log ratio"
                    )));
                }
                if self.duration.is_none() {
                    return Err(EngineError::invalid("sweep requires a duration"));
                }
            }
        }

        if let Some(duration) = self.duration {
            if !(duration.is_finite() && duration > 0.0) {
                return Err(EngineError::invalid(format!(
                    "duration must be positive, got {duration} s"
                )));
            }
        }
        if !(self.amplitude > 0.0 && self.amplitude <= 1.0) {
            return Err(EngineError::invalid(format!(
                "amplitude must be in (0, 1], got {}",
                self.amplitude
            )));
        }
        if !(self.fade.is_finite() && self.fade >= 0.0) {
            return Err(EngineError::invalid(format!(
                "fade must be non-negative, got {} s",
                self.fade
            )));
        }
        Ok(())
    }

    /// Total frames for a finite signal: round(duration × sample_rate)
    pub fn total_frames(&self, sample_rate: u32) -> Option<u64> {
        self.duration
            .map(|d| (d * sample_rate as f64).round().max(0.0) as u64)
    }

    /// Instantaneous phase in radians at time `t` seconds
    ///
    /// For sweeps this is the integral of the instantaneous angular frequency:
    /// `2π·f0·T / ln(f1/f0) · ((f1/f0)^(t/T) − 1)`.
    pub fn phase_at(&self, t: f64) -> f64 {
        match self.kind {
            SignalKind::Tone { frequency } => 2.0 * PI * frequency * t,
            SignalKind::Sweep { start, end } => {
                let duration = self.duration.unwrap_or(0.0);
                let log_ratio = (end / start).ln();
                if duration <= 0.0 || log_ratio.abs() < f64::EPSILON {
                    return 2.0 * PI * start * t;
                }
                2.0 * PI * start * duration / log_ratio * ((log_ratio * t / duration).exp() - 1.0)
            }
        }
    }

    /// Instantaneous frequency in Hz at time `t` seconds
    pub fn frequency_at(&self, t: f64) -> f64 {
        match self.kind {
            SignalKind::Tone { frequency } => frequency,
            SignalKind::Sweep { start, end } => match self.duration {
                Some(duration) if duration > 0.0 => start * (end / start).powf(t / duration),
                _ => start,
            },
        }
    }

    /// Short human-readable description for progress messages
    pub fn describe(&self) -> String {
        let duration = self
            .duration
            .map(|d| format!(" for {d}s"))
            .unwrap_or_default();
        match (self.kind, self.route) {
            (SignalKind::Tone { frequency }, ChannelRoute::Both) => {
                format!("{frequency}Hz tone{duration}")
            }
            (SignalKind::Tone { frequency }, route) => format!("{frequency}Hz in {route}{duration}"),
            (SignalKind::Sweep { start, end }, _) => {
                format!("sweep {start}Hz → {end}Hz{duration}")
            }
        }
    }
}

/// Renders a [`SignalSpec`] into interleaved sample blocks
///
/// Holds only the current frame position; every rendered sample depends on
/// the spec, the stream format, and its absolute frame index.
///
/// # Example
/// ```
/// use headphone_tester_core::audio::signal::{SignalGenerator, SignalSpec};
///
/// let mut gen = SignalGenerator::new(SignalSpec::tone(440.0, 1.0), 48000, 2).unwrap();
/// let mut block = vec![0.0f32; 256 * 2];
/// assert_eq!(gen.fill(&mut block), 256);
/// assert_eq!(gen.position(), 256);
/// ```
#[derive(Debug, Clone)]
pub struct SignalGenerator {
    spec: SignalSpec,
    sample_rate: u32,
    channels: u16,
    /// Next frame to render
    position: u64,
    total_frames: Option<u64>,
    fade_frames: u64,
}

impl SignalGenerator {
    /// Create a generator for the given stream format
    ///
    /// Fails with `InvalidParameter` if the spec is malformed or the channel
    /// count cannot carry the requested routing.
    pub fn new(spec: SignalSpec, sample_rate: u32, channels: u16) -> Result<Self, EngineError> {
        spec.validate()?;
        if sample_rate == 0 {
            return Err(EngineError::invalid("sample rate must be positive"));
        }
        if channels < spec.route.required_channels() {
            return Err(EngineError::invalid(format!(
                "{} needs {} output channels, stream has {}",
                spec.route,
                spec.route.required_channels(),
                channels
            )));
        }

        let nyquist = sample_rate as f64 / 2.0;
        let highest = match spec.kind {
            SignalKind::Tone { frequency } => frequency,
            SignalKind::Sweep { start, end } => start.max(end),
        };
        if highest >= nyquist {
            tracing::warn!(
                "{} Hz is at or above Nyquist ({} Hz) for {} Hz; output will alias",
                highest,
                nyquist,
                sample_rate
            );
        }

        let total_frames = spec.total_frames(sample_rate);
        let mut fade_frames = (spec.fade * sample_rate as f64).round() as u64;
        if let Some(total) = total_frames {
            fade_frames = fade_frames.min(total / 2);
        }

        Ok(Self {
            spec,
            sample_rate,
            channels,
            position: 0,
            total_frames,
            fade_frames,
        })
    }

    /// Spec being rendered
    pub fn spec(&self) -> &SignalSpec {
        &self.spec
    }

    /// Sample rate in Hz
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Interleaved channel count
    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Next frame index to be rendered by [`Self::fill`]
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Total frames for finite signals
    pub fn total_frames(&self) -> Option<u64> {
        self.total_frames
    }

    /// Frames left before a finite signal ends
    pub fn remaining(&self) -> Option<u64> {
        self.total_frames
            .map(|total| total.saturating_sub(self.position))
    }

    /// Whether a finite signal has been fully rendered
    pub fn is_finished(&self) -> bool {
        self.remaining() == Some(0)
    }

    /// Rewind to frame 0
    pub fn reset(&mut self) {
        self.position = 0;
    }

    /// Mono sample value at absolute frame `frame`
    pub fn sample_at(&self, frame: u64) -> f32 {
        let t = frame as f64 / self.sample_rate as f64;
        let value = self.spec.amplitude as f64 * self.spec.phase_at(t).sin() * self.envelope(frame);
        value as f32
    }

    /// Fade envelope gain at absolute frame `frame`
    fn envelope(&self, frame: u64) -> f64 {
        if self.fade_frames == 0 {
            return 1.0;
        }
        let fade = self.fade_frames as f64;
        let rise = (frame as f64 / fade).min(1.0);
        let fall = self
            .total_frames
            .map(|total| (total.saturating_sub(frame) as f64 / fade).min(1.0))
            .unwrap_or(1.0);
        rise.min(fall)
    }

    /// Render frames starting at `start_frame` into an interleaved buffer
    ///
    /// Renders `out.len() / channels` frames. Inactive channels are written
    /// as exact zeros. Does not move the generator position.
    pub fn render_into(&self, start_frame: u64, out: &mut [f32]) {
        let channels = self.channels as usize;
        for (i, frame) in out.chunks_mut(channels).enumerate() {
            let sample = self.sample_at(start_frame + i as u64);
            for (ch, slot) in frame.iter_mut().enumerate() {
                *slot = if self.spec.route.is_active(ch) {
                    sample
                } else {
                    0.0
                };
            }
        }
    }

    /// Render `frames` frames starting at `start_frame` into a new buffer
    pub fn render(&self, start_frame: u64, frames: usize) -> Vec<f32> {
        let mut out = vec![0.0f32; frames * self.channels as usize];
        self.render_into(start_frame, &mut out);
        out
    }

    /// Fill the next block and advance the position
    ///
    /// For finite signals the block is truncated at the end of the signal;
    /// frames past the end are left as silence. Returns the number of frames
    /// rendered.
    pub fn fill(&mut self, out: &mut [f32]) -> usize {
        let channels = self.channels as usize;
        let mut frames = out.len() / channels;
        if let Some(remaining) = self.remaining() {
            frames = frames.min(remaining as usize);
        }
        let used = frames * channels;
        self.render_into(self.position, &mut out[..used]);
        out[used..].fill(0.0);
        self.position += frames as u64;
        frames
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_total_frames_rounds() {
        assert_eq!(SignalSpec::tone(440.0, 2.0).total_frames(44100), Some(88200));
        assert_eq!(SignalSpec::tone(440.0, 0.5).total_frames(48000), Some(24000));
        assert_eq!(SignalSpec::tone(440.0, 0.1).total_frames(44100), Some(4410));
    }

    #[test]
    fn test_tone_formula() {
        let gen = SignalGenerator::new(SignalSpec::tone(1000.0, 1.0), 48000, 1).unwrap();
        for n in [0u64, 1, 7, 100, 4799] {
            let expected = 0.3 * (2.0 * PI * 1000.0 * n as f64 / 48000.0).sin();
            assert_relative_eq!(gen.sample_at(n), expected as f32, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_fill_is_phase_continuous() {
        let spec = SignalSpec::tone(441.0, 1.0).with_fade(0.01);
        let mut gen = SignalGenerator::new(spec, 44100, 2).unwrap();

        let mut first = vec![0.0f32; 256 * 2];
        let mut second = vec![0.0f32; 256 * 2];
        gen.fill(&mut first);
        gen.fill(&mut second);

        let whole = gen.render(0, 512);
        let mut joined = first.clone();
        joined.extend_from_slice(&second);
        assert_eq!(joined, whole);
    }

    #[test]
    fn test_fill_truncates_last_block() {
        let spec = SignalSpec::tone(440.0, 0.01);
        let mut gen = SignalGenerator::new(spec, 48000, 2).unwrap();
        assert_eq!(gen.total_frames(), Some(480));

        let mut block = vec![1.0f32; 256 * 2];
        assert_eq!(gen.fill(&mut block), 256);
        assert_eq!(gen.fill(&mut block), 224);
        assert!(block[224 * 2..].iter().all(|&s| s == 0.0));
        assert!(gen.is_finished());
        assert_eq!(gen.fill(&mut block), 0);
    }

    #[test]
    fn test_left_and_right_isolation() {
        for (route, silent) in [(ChannelRoute::Left, 1usize), (ChannelRoute::Right, 0usize)] {
            let spec = SignalSpec::channel_tone(route, 440.0, 0.1);
            let gen = SignalGenerator::new(spec, 48000, 2).unwrap();
            let buf = gen.render(0, 4800);
            let active = 1 - silent;
            assert!(buf.chunks(2).all(|f| f[silent] == 0.0));
            assert!(buf.chunks(2).any(|f| f[active] != 0.0));
        }
    }

    #[test]
    fn test_channel_test_needs_stereo() {
        let spec = SignalSpec::channel_tone(ChannelRoute::Right, 440.0, 1.0);
        assert!(matches!(
            SignalGenerator::new(spec, 48000, 1),
            Err(EngineError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_sweep_geometric_midpoint() {
        let spec = SignalSpec::sweep(20.0, 20_000.0, 5.0);
        assert_relative_eq!(spec.frequency_at(2.5), 632.455_532, epsilon = 1e-3);
        assert_relative_eq!(spec.frequency_at(0.0), 20.0, epsilon = 1e-9);
        assert_relative_eq!(spec.frequency_at(5.0), 20_000.0, epsilon = 1e-6);
    }

    #[test]
    fn test_sweep_phase_derivative_matches_frequency() {
        let spec = SignalSpec::sweep(20.0, 20_000.0, 5.0);
        let dt = 1e-6;
        for t in [0.5, 2.5, 4.0] {
            let derived = (spec.phase_at(t + dt) - spec.phase_at(t - dt)) / (2.0 * dt) / (2.0 * PI);
            assert_relative_eq!(derived, spec.frequency_at(t), max_relative = 1e-4);
        }
    }

    #[test]
    fn test_sweep_starts_at_zero_phase() {
        let spec = SignalSpec::sweep(100.0, 1000.0, 1.0);
        assert_eq!(spec.phase_at(0.0), 0.0);
    }

    #[test]
    fn test_flat_sweep_degrades_to_tone() {
        let sweep = SignalSpec::sweep(440.0, 440.0, 1.0);
        let tone = SignalSpec::tone(440.0, 1.0);
        for t in [0.0, 0.1, 0.77] {
            assert_relative_eq!(sweep.phase_at(t), tone.phase_at(t), epsilon = 1e-9);
            assert_eq!(sweep.frequency_at(t), 440.0);
        }
    }

    #[test]
    fn test_invalid_specs() {
        let cases = [
            SignalSpec::tone(0.0, 2.0),
            SignalSpec::tone(-5.0, 2.0),
            SignalSpec::tone(f64::NAN, 2.0),
            SignalSpec::tone(440.0, -1.0),
            SignalSpec::tone(440.0, 0.0),
            SignalSpec::sweep(0.0, 20_000.0, 5.0),
            SignalSpec::sweep(20.0, f64::INFINITY, 5.0),
            SignalSpec::sweep(f64::MIN_POSITIVE / 1e10, 20_000.0, 5.0),
            SignalSpec::tone(440.0, 1.0).with_amplitude(0.0),
        ];
        for spec in cases {
            assert!(
                matches!(spec.validate(), Err(EngineError::InvalidParameter(_))),
                "{spec:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_fade_envelope() {
        let spec = SignalSpec::tone(1000.0, 1.0).with_amplitude(1.0).with_fade(0.01);
        let gen = SignalGenerator::new(spec, 48000, 1).unwrap();
        assert_eq!(gen.sample_at(0), 0.0);
        // Fade is 480 frames; peaks inside it stay below the fade gain
        for n in 1..480u64 {
            assert!(gen.sample_at(n).abs() as f64 <= n as f64 / 480.0 + 1e-6);
        }
        let last = gen.sample_at(47_999).abs();
        assert!(last <= 1.0 / 480.0 + 1e-6);
    }

    #[test]
    fn test_amplitude_bound() {
        let gen = SignalGenerator::new(SignalSpec::sweep(20.0, 20_000.0, 0.5), 48000, 2).unwrap();
        let buf = gen.render(0, 24000);
        assert!(buf.iter().all(|s| s.abs() <= 0.3 + 1e-6));
    }

    #[test]
    fn test_reset() {
        let mut gen = SignalGenerator::new(SignalSpec::tone(440.0, 1.0), 48000, 2).unwrap();
        let mut block = vec![0.0f32; 512];
        gen.fill(&mut block);
        assert_eq!(gen.position(), 256);
        gen.reset();
        assert_eq!(gen.position(), 0);
    }
}
