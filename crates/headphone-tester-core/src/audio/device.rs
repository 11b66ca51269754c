//! Device metadata and selection
//!
//! The selection is a plain value owned by the command layer and passed into
//! every session; the engine never keeps its own copy.

use crate::error::{Direction, EngineError};
use std::fmt;

/// Audio device information
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    /// Position in the host's device enumeration
    pub index: usize,
    /// Device name
    pub name: String,
    /// Number of input channels (0 = playback only)
    pub input_channels: u16,
    /// Number of output channels (0 = capture only)
    pub output_channels: u16,
    /// Default sample rate in Hz
    pub default_sample_rate: u32,
    /// Whether this is the system default input
    pub is_default_input: bool,
    /// Whether this is the system default output
    pub is_default_output: bool,
}

impl DeviceInfo {
    /// Channel count in the given direction
    pub fn channels(&self, direction: Direction) -> u16 {
        match direction {
            Direction::Input => self.input_channels,
            Direction::Output => self.output_channels,
        }
    }

    /// Whether the device name identifies a USB device
    pub fn is_usb(&self) -> bool {
        self.name.to_lowercase().contains("usb")
    }

    /// Short "in/out" label for device tables
    pub fn kind_label(&self) -> &'static str {
        match (self.input_channels > 0, self.output_channels > 0) {
            (true, true) => "in/out",
            (true, false) => "input ",
            (false, true) => "output",
            (false, false) => "      ",
        }
    }
}

impl fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (#{})", self.name, self.index)
    }
}

/// Kind of device picked by [`select_by_type`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    /// Name contains "usb"
    Usb,
    /// Anything else (onboard line out / jack)
    Line,
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Usb => f.write_str("usb"),
            Self::Line => f.write_str("line"),
        }
    }
}

/// Output and input device choice; `None` means the system default
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeviceSelection {
    /// Output device index
    pub output: Option<usize>,
    /// Input device index
    pub input: Option<usize>,
}

impl DeviceSelection {
    /// Both directions on the system default
    pub fn system_default() -> Self {
        Self::default()
    }

    /// Selected index in the given direction
    pub fn get(&self, direction: Direction) -> Option<usize> {
        match direction {
            Direction::Input => self.input,
            Direction::Output => self.output,
        }
    }

    /// Replace the index in the given direction
    pub fn set(&mut self, direction: Direction, index: Option<usize>) {
        match direction {
            Direction::Input => self.input = index,
            Direction::Output => self.output = index,
        }
    }
}

/// Resolve a selection entry against the device list
///
/// Fails with `DeviceUnavailable` when the index does not exist, when no
/// system default exists, or when the device has no channels in `direction`.
pub fn resolve<'a>(
    devices: &'a [DeviceInfo],
    selection: &DeviceSelection,
    direction: Direction,
) -> Result<&'a DeviceInfo, EngineError> {
    let device = match selection.get(direction) {
        Some(index) => devices.iter().find(|d| d.index == index).ok_or_else(|| {
            EngineError::DeviceUnavailable {
                device: format!("#{index}"),
                reason: "no such device".to_string(),
            }
        })?,
        None => devices
            .iter()
            .find(|d| match direction {
                Direction::Input => d.is_default_input,
                Direction::Output => d.is_default_output,
            })
            .ok_or_else(|| EngineError::DeviceUnavailable {
                device: "default".to_string(),
                reason: format!("no default {direction} device"),
            })?,
    };

    if device.channels(direction) == 0 {
        return Err(EngineError::DeviceUnavailable {
            device: device.to_string(),
            reason: format!("device has no {direction} channels"),
        });
    }
    Ok(device)
}

/// Validate an explicit device choice for one direction
pub fn select_device(
    devices: &[DeviceInfo],
    direction: Direction,
    index: usize,
) -> Result<&DeviceInfo, EngineError> {
    let selection = match direction {
        Direction::Input => DeviceSelection {
            input: Some(index),
            output: None,
        },
        Direction::Output => DeviceSelection {
            output: Some(index),
            input: None,
        },
    };
    resolve(devices, &selection, direction)
}

/// Pick the first output and first input of the given kind
///
/// Either side is `None` when no matching device exists in that direction.
pub fn select_by_type(devices: &[DeviceInfo], kind: DeviceKind) -> DeviceSelection {
    let matches = |d: &&DeviceInfo| match kind {
        DeviceKind::Usb => d.is_usb(),
        DeviceKind::Line => !d.is_usb(),
    };
    DeviceSelection {
        output: devices
            .iter()
            .filter(matches)
            .find(|d| d.output_channels > 0)
            .map(|d| d.index),
        input: devices
            .iter()
            .filter(matches)
            .find(|d| d.input_channels > 0)
            .map(|d| d.index),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(index: usize, name: &str, input: u16, output: u16) -> DeviceInfo {
        DeviceInfo {
            index,
            name: name.to_string(),
            input_channels: input,
            output_channels: output,
            default_sample_rate: 48000,
            is_default_input: false,
            is_default_output: false,
        }
    }

    fn devices() -> Vec<DeviceInfo> {
        let mut onboard = device(0, "HDA Intel PCH: ALC257 Analog", 2, 2);
        onboard.is_default_input = true;
        onboard.is_default_output = true;
        vec![
            onboard,
            device(1, "HDMI 0", 0, 8),
            device(2, "Jabra EVOLVE USB Audio", 1, 2),
            device(3, "USB PnP Sound Device", 1, 0),
        ]
    }

    #[test]
    fn test_resolve_default() {
        let devices = devices();
        let out = resolve(&devices, &DeviceSelection::default(), Direction::Output).unwrap();
        assert_eq!(out.index, 0);
    }

    #[test]
    fn test_resolve_missing_index() {
        let devices = devices();
        let selection = DeviceSelection {
            output: Some(9),
            input: None,
        };
        let err = resolve(&devices, &selection, Direction::Output).unwrap_err();
        assert!(matches!(err, EngineError::DeviceUnavailable { .. }));
        assert!(err.to_string().contains("#9"));
    }

    #[test]
    fn test_resolve_wrong_direction() {
        let devices = devices();
        let err = select_device(&devices, Direction::Input, 1).unwrap_err();
        assert!(err.to_string().contains("no input channels"));
        assert!(select_device(&devices, Direction::Output, 1).is_ok());
    }

    #[test]
    fn test_no_default_device() {
        let devices = vec![device(0, "Loopback", 2, 2)];
        let err = resolve(&devices, &DeviceSelection::default(), Direction::Input).unwrap_err();
        assert!(err.to_string().contains("no default input device"));
    }

    #[test]
    fn test_select_usb() {
        let selection = select_by_type(&devices(), DeviceKind::Usb);
        assert_eq!(selection.output, Some(2));
        assert_eq!(selection.input, Some(2));
    }

    #[test]
    fn test_select_line() {
        let selection = select_by_type(&devices(), DeviceKind::Line);
        assert_eq!(selection.output, Some(0));
        assert_eq!(selection.input, Some(0));
    }

    #[test]
    fn test_select_by_type_partial() {
        let devices = vec![device(0, "USB Mic", 1, 0), device(1, "Speakers", 0, 2)];
        let selection = select_by_type(&devices, DeviceKind::Usb);
        assert_eq!(selection.output, None);
        assert_eq!(selection.input, Some(0));
    }

    #[test]
    fn test_selection_set() {
        let mut selection = DeviceSelection::system_default();
        selection.set(Direction::Output, Some(3));
        assert_eq!(selection.get(Direction::Output), Some(3));
        assert_eq!(selection.get(Direction::Input), None);
    }
}
