//! Audio processing module
//!
//! This module contains all audio-related functionality including:
//! - Test signal synthesis ([`signal`])
//! - RMS level metering ([`meter`])
//! - Device metadata and selection ([`device`])
//! - Native transport seam and cpal implementation ([`backend`])
//! - In-memory virtual devices ([`memory`])
//! - Scoped stream lifecycle ([`session`])
//! - Finite playback and unbounded monitoring loops ([`playback`], [`monitor`])
//! - The command-facing facade ([`engine`])

pub mod backend;
pub mod device;
pub mod engine;
pub mod memory;
pub mod meter;
pub mod monitor;
pub mod playback;
pub mod session;
pub mod signal;
