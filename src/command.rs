//! Command grammar of the interactive shell
//!
//! One line of user input parses into at most one [`Command`]. Parsing never
//! touches the audio engine; malformed input becomes a [`CommandError`] whose
//! message is shown to the user as-is.

use headphone_tester_core::audio::device::DeviceKind;
use thiserror::Error;

/// Command reference printed by `help`
pub const HELP: &str = "
  Commands:
    devices          List audio devices
    tone [freq] [s]  Play test tone (default: 440Hz, 2s)
    left             Play tone in left channel only
    right            Play tone in right channel only
    sweep [s]        Frequency sweep 20Hz→20kHz (default: 5s)
    mic              Show mic level meter (Ctrl+C to stop)
    loopback         Mic→headphone passthrough (Ctrl+C to stop)
    output <id>      Set output device
    input <id>       Set input device
    use <line|usb>   Select devices by type
    help             Show this help
    quit             Exit
";

/// A parsed shell command
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Command {
    /// List devices
    Devices,
    /// Tone on both channels; missing values use the configured defaults
    Tone {
        frequency: Option<f64>,
        duration: Option<f64>,
    },
    /// Default tone on the left channel
    Left,
    /// Default tone on the right channel
    Right,
    /// Log sweep over the configured range
    Sweep { duration: Option<f64> },
    /// Mic level meter
    Mic,
    /// Mic to headphone passthrough
    Loopback,
    /// Select the output device by index
    Output(usize),
    /// Select the input device by index
    Input(usize),
    /// Select both devices by kind
    Use(DeviceKind),
    /// Print the command reference
    Help,
    /// Leave the shell
    Quit,
}

/// Why a line did not parse
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("Unknown command: {0}. Type 'help' for commands.")]
    Unknown(String),

    #[error("Usage: {0}")]
    Usage(&'static str),

    #[error("Error: '{0}' is not a valid number")]
    InvalidNumber(String),
}

impl Command {
    /// Parse one input line
    ///
    /// Blank lines yield `Ok(None)`. The command word is case-insensitive;
    /// extra trailing arguments are ignored.
    pub fn parse(line: &str) -> Result<Option<Self>, CommandError> {
        let mut words = line.split_whitespace();
        let Some(name) = words.next() else {
            return Ok(None);
        };
        let args: Vec<&str> = words.collect();

        let command = match name.to_lowercase().as_str() {
            "devices" => Self::Devices,
            "tone" => Self::Tone {
                frequency: number(args.first())?,
                duration: number(args.get(1))?,
            },
            "left" => Self::Left,
            "right" => Self::Right,
            "sweep" => Self::Sweep {
                duration: number(args.first())?,
            },
            "mic" => Self::Mic,
            "loopback" => Self::Loopback,
            "output" => Self::Output(index(args.first(), "output <device_id>")?),
            "input" => Self::Input(index(args.first(), "input <device_id>")?),
            "use" => match args.first().map(|a| a.to_lowercase()).as_deref() {
                Some("usb") => Self::Use(DeviceKind::Usb),
                Some("line") => Self::Use(DeviceKind::Line),
                _ => return Err(CommandError::Usage("use <line|usb>")),
            },
            "help" | "?" => Self::Help,
            "quit" | "exit" | "q" => Self::Quit,
            other => return Err(CommandError::Unknown(other.to_string())),
        };
        Ok(Some(command))
    }
}

fn number(arg: Option<&&str>) -> Result<Option<f64>, CommandError> {
    arg.map(|a| {
        a.parse::<f64>()
            .map_err(|_| CommandError::InvalidNumber(a.to_string()))
    })
    .transpose()
}

fn index(arg: Option<&&str>, usage: &'static str) -> Result<usize, CommandError> {
    let arg = arg.ok_or(CommandError::Usage(usage))?;
    arg.parse()
        .map_err(|_| CommandError::InvalidNumber(arg.to_string()))
}
