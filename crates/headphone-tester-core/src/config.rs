//! Engine configuration
//!
//! Defaults for test signals, stream block size, and meter scaling. Loaded
//! from an optional JSON file; nothing is ever written back.

use crate::error::EngineError;
use serde::{Deserialize, Serialize};
use std::path::Path;

fn default_tone_frequency() -> f64 {
    440.0
}

fn default_tone_duration() -> f64 {
    2.0
}

fn default_sweep_start() -> f64 {
    20.0
}

fn default_sweep_end() -> f64 {
    20_000.0
}

fn default_sweep_duration() -> f64 {
    5.0
}

fn default_block_size() -> u32 {
    crate::DEFAULT_BLOCK_SIZE
}

fn default_amplitude() -> f32 {
    crate::DEFAULT_AMPLITUDE
}

fn default_meter_floor_db() -> f32 {
    -60.0
}

fn default_meter_ceiling_db() -> f32 {
    0.0
}

fn default_meter_smoothing() -> f32 {
    0.5
}

fn default_loopback_gain() -> f32 {
    0.5
}

fn default_fade_ms() -> f64 {
    10.0
}

fn default_max_channels() -> u16 {
    2
}

fn default_stall_timeout_ms() -> u64 {
    2000
}

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Frequency of `tone`, `left`, and `right` in Hz
    #[serde(default = "default_tone_frequency")]
    pub tone_frequency: f64,
    /// Duration of `tone`, `left`, and `right` in seconds
    #[serde(default = "default_tone_duration")]
    pub tone_duration: f64,
    /// Sweep start frequency in Hz
    #[serde(default = "default_sweep_start")]
    pub sweep_start: f64,
    /// Sweep end frequency in Hz
    #[serde(default = "default_sweep_end")]
    pub sweep_end: f64,
    /// Sweep duration in seconds
    #[serde(default = "default_sweep_duration")]
    pub sweep_duration: f64,
    /// Frames per block exchanged with the device
    #[serde(default = "default_block_size")]
    pub block_size: u32,
    /// Peak amplitude of generated signals (0.0 to 1.0)
    #[serde(default = "default_amplitude")]
    pub amplitude: f32,
    /// Meter silence floor in dB
    #[serde(default = "default_meter_floor_db")]
    pub meter_floor_db: f32,
    /// Meter clip ceiling in dB
    #[serde(default = "default_meter_ceiling_db")]
    pub meter_ceiling_db: f32,
    /// Exponential smoothing factor for the meter (0 = none)
    #[serde(default = "default_meter_smoothing")]
    pub meter_smoothing: f32,
    /// Linear gain applied to mic samples in loopback (-6dB by default)
    #[serde(default = "default_loopback_gain")]
    pub loopback_gain: f32,
    /// Fade-in/fade-out length for finite signals in milliseconds
    #[serde(default = "default_fade_ms")]
    pub fade_ms: f64,
    /// Force a sample rate instead of the output device default
    #[serde(default)]
    pub sample_rate: Option<u32>,
    /// Upper bound on channels opened per direction
    #[serde(default = "default_max_channels")]
    pub max_channels: u16,
    /// How long a blocking read/write may wait before the device is declared stalled
    #[serde(default = "default_stall_timeout_ms")]
    pub stall_timeout_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tone_frequency: default_tone_frequency(),
            tone_duration: default_tone_duration(),
            sweep_start: default_sweep_start(),
            sweep_end: default_sweep_end(),
            sweep_duration: default_sweep_duration(),
            block_size: default_block_size(),
            amplitude: default_amplitude(),
            meter_floor_db: default_meter_floor_db(),
            meter_ceiling_db: default_meter_ceiling_db(),
            meter_smoothing: default_meter_smoothing(),
            loopback_gain: default_loopback_gain(),
            fade_ms: default_fade_ms(),
            sample_rate: None,
            max_channels: default_max_channels(),
            stall_timeout_ms: default_stall_timeout_ms(),
        }
    }
}

impl EngineConfig {
    /// Load config from a JSON file
    ///
    /// A missing file yields the defaults; an unreadable or malformed file
    /// is an error.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            tracing::info!(path = %path.display(), "No config file found, using defaults");
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&contents)?;
        config.validate()?;
        tracing::info!(path = %path.display(), "Loaded config from disk");
        Ok(config)
    }

    /// Reject values the engine cannot run with
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.block_size == 0 {
            return Err(EngineError::invalid("block_size must be at least 1 frame"));
        }
        if !(self.amplitude > 0.0 && self.amplitude <= 1.0) {
            return Err(EngineError::invalid(format!(
                "amplitude must be in (0, 1], got {}",
                self.amplitude
            )));
        }
        if !(self.meter_floor_db < self.meter_ceiling_db) {
            return Err(EngineError::invalid(format!(
                "meter floor {} dB must be below ceiling {} dB",
                self.meter_floor_db, self.meter_ceiling_db
            )));
        }
        if !(0.0..1.0).contains(&self.meter_smoothing) {
            return Err(EngineError::invalid(format!(
                "meter_smoothing must be in [0, 1), got {}",
                self.meter_smoothing
            )));
        }
        if !(0.0..=1.0).contains(&self.loopback_gain) {
            return Err(EngineError::invalid(format!(
                "loopback_gain must be in [0, 1], got {}",
                self.loopback_gain
            )));
        }
        if !(self.fade_ms >= 0.0 && self.fade_ms.is_finite()) {
            return Err(EngineError::invalid("fade_ms must be a non-negative number"));
        }
        if self.max_channels == 0 {
            return Err(EngineError::invalid("max_channels must be at least 1"));
        }
        if self.sample_rate == Some(0) {
            return Err(EngineError::invalid("sample_rate must be positive"));
        }
        Ok(())
    }
}
