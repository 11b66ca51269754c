//! Engine error kinds

use std::fmt;
use thiserror::Error;

/// Stream direction, used to give stream failures context
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Capture from an input device
    Input,
    /// Playback to an output device
    Output,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Input => f.write_str("input"),
            Self::Output => f.write_str("output"),
        }
    }
}

/// Errors that can occur during engine operations
///
/// Cancellation is not an error; it ends an operation with
/// [`crate::TerminalState::Cancelled`].
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Device {device} unavailable: {reason}")]
    DeviceUnavailable { device: String, reason: String },

    #[error("Device {device} does not support {format}")]
    UnsupportedFormat { device: String, format: String },

    #[error("{direction} stream on {device} failed: {cause}")]
    Stream {
        device: String,
        direction: Direction,
        cause: String,
    },
}

impl EngineError {
    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidParameter(message.into())
    }

    pub(crate) fn stream(
        device: impl Into<String>,
        direction: Direction,
        cause: impl fmt::Display,
    ) -> Self {
        Self::Stream {
            device: device.into(),
            direction,
            cause: cause.to_string(),
        }
    }

    /// Whether this error was raised before any stream was opened
    pub fn is_setup_error(&self) -> bool {
        !matches!(self, Self::Stream { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_error_message_names_device_and_direction() {
        let err = EngineError::stream("USB Headset", Direction::Output, "underrun");
        assert_eq!(
            err.to_string(),
            "output stream on USB Headset failed: underrun"
        );
        assert!(!err.is_setup_error());
    }

    #[test]
    fn test_setup_errors() {
        assert!(EngineError::invalid("frequency must be positive").is_setup_error());
        let err = EngineError::DeviceUnavailable {
            device: "#7".to_string(),
            reason: "no such device".to_string(),
        };
        assert!(err.is_setup_error());
        assert_eq!(err.to_string(), "Device #7 unavailable: no such device");
    }
}
