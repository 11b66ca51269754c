//! Headphone Tester Core - signal generation, metering, and stream control
//!
//! This library provides the engine behind the interactive headphone and
//! microphone tester: phase-continuous test signal synthesis, RMS level
//! metering, and blocking real-time stream loops with cooperative
//! cancellation.

pub mod audio;
pub mod cancel;
pub mod config;
pub mod display;
pub mod error;

pub use audio::{
    backend::{AudioBackend, CpalBackend},
    device::{DeviceInfo, DeviceSelection},
    engine::Engine,
    memory::MemoryBackend,
    meter::{LevelMeter, MeterReading},
    signal::{ChannelRoute, SignalGenerator, SignalKind, SignalSpec},
};
pub use cancel::CancelToken;
pub use config::EngineConfig;
pub use display::{DisplaySink, TerminalDisplay};
pub use error::EngineError;

/// Application version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build date stamped by build.rs
pub const BUILD_DATE: &str = env!("BUILD_DATE");

/// Preferred frames per block (≈5.3ms at 48kHz)
pub const DEFAULT_BLOCK_SIZE: u32 = 256;

/// Amplitude for generated signals (30% of full scale to avoid clipping)
pub const DEFAULT_AMPLITUDE: f32 = 0.3;

/// Outcome of an operation that ended without failing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalState {
    /// All requested frames were written
    Completed {
        /// Frames written to the output device
        frames: u64,
    },
    /// Stopped by a cancellation request
    Cancelled {
        /// Frames processed before cancellation was observed
        frames: u64,
    },
}

impl TerminalState {
    /// Frames processed before the operation ended
    pub fn frames(&self) -> u64 {
        match self {
            Self::Completed { frames } | Self::Cancelled { frames } => *frames,
        }
    }
}
