//! RMS level metering for the mic meter
//!
//! Levels are reported in dBFS referenced to a full-scale sine (AES17), so a
//! sine peaking at 1.0 reads 0 dB rather than −3 dB.

use std::f32::consts::SQRT_2;

/// Glyph for the filled part of the bar
const BAR_FILLED: char = '█';

/// Glyph for the empty part of the bar
const BAR_EMPTY: char = '░';

/// One meter update
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MeterReading {
    /// Level of the latest block in dB (never below the floor)
    pub db: f32,
    /// Exponentially smoothed level in dB
    pub smoothed_db: f32,
    /// Smoothed level mapped to 0.0..=1.0 between floor and ceiling
    pub bar: f32,
}

/// RMS of a buffer after reducing it to mono by averaging channels
///
/// Trailing samples that do not form a whole frame are ignored.
pub fn mono_rms(samples: &[f32], channels: u16) -> f32 {
    let channels = channels.max(1) as usize;
    let frames = samples.len() / channels;
    if frames == 0 {
        return 0.0;
    }
    let sum_sq: f64 = samples
        .chunks_exact(channels)
        .map(|frame| {
            let mono = frame.iter().map(|&s| s as f64).sum::<f64>() / channels as f64;
            mono * mono
        })
        .sum();
    (sum_sq / frames as f64).sqrt() as f32
}

/// Convert an RMS value to sine-referenced dBFS, clamped at `floor_db`
pub fn rms_to_db(rms: f32, floor_db: f32) -> f32 {
    if !(rms > 0.0) {
        return floor_db;
    }
    (20.0 * (rms * SQRT_2).log10()).max(floor_db)
}

/// Map a dB value linearly onto 0.0..=1.0 between floor and ceiling
pub fn bar_fraction(db: f32, floor_db: f32, ceiling_db: f32) -> f32 {
    ((db - floor_db) / (ceiling_db - floor_db)).clamp(0.0, 1.0)
}

/// Render a bar fraction as a fixed-width text bar
///
/// # Example
/// ```
/// use headphone_tester_core::audio::meter::render_bar;
///
/// assert_eq!(render_bar(0.5, 4), "██░░");
/// ```
pub fn render_bar(fraction: f32, width: usize) -> String {
    let filled = ((fraction.clamp(0.0, 1.0) * width as f32) as usize).min(width);
    let mut bar = String::with_capacity(width * BAR_FILLED.len_utf8());
    bar.extend(std::iter::repeat(BAR_FILLED).take(filled));
    bar.extend(std::iter::repeat(BAR_EMPTY).take(width - filled));
    bar
}

/// Level meter with exponential smoothing
///
/// Owned by one monitor run; the smoothed level starts at the floor.
///
/// # Example
/// ```
/// use headphone_tester_core::audio::meter::LevelMeter;
///
/// let mut meter = LevelMeter::new(-60.0, 0.0, 0.0);
/// let reading = meter.process(&[0.0; 512], 2);
/// assert_eq!(reading.db, -60.0);
/// assert_eq!(reading.bar, 0.0);
/// ```
#[derive(Debug, Clone)]
pub struct LevelMeter {
    floor_db: f32,
    ceiling_db: f32,
    /// Weight of the previous smoothed value (0.0 = no smoothing)
    smoothing: f32,
    smoothed_db: f32,
}

impl LevelMeter {
    /// Create a meter with the given floor, ceiling, and smoothing factor
    pub fn new(floor_db: f32, ceiling_db: f32, smoothing: f32) -> Self {
        Self {
            floor_db,
            ceiling_db,
            smoothing: smoothing.clamp(0.0, 0.99),
            smoothed_db: floor_db,
        }
    }

    /// Current smoothed level in dB
    pub fn smoothed_db(&self) -> f32 {
        self.smoothed_db
    }

    /// Measure one interleaved block and update the smoothed level
    pub fn process(&mut self, samples: &[f32], channels: u16) -> MeterReading {
        let db = rms_to_db(mono_rms(samples, channels), self.floor_db);
        self.smoothed_db = self.smoothing * self.smoothed_db + (1.0 - self.smoothing) * db;
        MeterReading {
            db,
            smoothed_db: self.smoothed_db,
            bar: bar_fraction(self.smoothed_db, self.floor_db, self.ceiling_db),
        }
    }

    /// Return to the floor
    pub fn reset(&mut self) {
        self.smoothed_db = self.floor_db;
    }
}
