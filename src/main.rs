//! Headphone Tester - interactive headphone and microphone checks
//!
//! Entry point for the command shell.

use anyhow::Result;
use clap::Parser;
use headphone_tester::audio::device::{self, DeviceKind};
use headphone_tester::command::{Command, HELP};
use headphone_tester::error::Direction;
use headphone_tester::{
    AudioBackend, ChannelRoute, CpalBackend, DeviceInfo, DeviceSelection, Engine, EngineConfig,
    EngineError, MemoryBackend, SignalSpec, TerminalDisplay,
};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Headphone Tester - test USB and line-out headphones and microphones
#[derive(Parser, Debug)]
#[command(name = "headphone-tester")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Start with USB devices selected
    #[arg(long, conflicts_with = "line")]
    usb: bool,

    /// Start with line (non-USB) devices selected
    #[arg(long)]
    line: bool,

    /// JSON config file (defaults apply when absent)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Use in-memory virtual devices instead of the sound card
    #[arg(long = "virtual")]
    virtual_devices: bool,

    /// Increase logging verbosity (-v = info, -vv = debug)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl Args {
    fn log_level(&self) -> &'static str {
        match self.verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    }

    fn initial_kind(&self) -> Option<DeviceKind> {
        if self.usb {
            Some(DeviceKind::Usb)
        } else if self.line {
            Some(DeviceKind::Line)
        } else {
            None
        }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Logs go to stderr at warn by default so they stay off the live meter line
    let level = args.log_level();
    let filter = EnvFilter::try_from_default_env().or_else(|_| {
        EnvFilter::try_new(format!(
            "warn,headphone_tester={level},headphone_tester_core={level}"
        ))
    })?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    let config = match &args.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };

    println!();
    println!(
        "  === Headphone Tester v{} ({}) ===",
        headphone_tester::VERSION,
        headphone_tester::BUILD_DATE
    );

    if args.virtual_devices {
        println!("  Using virtual devices");
        run(Engine::new(MemoryBackend::live(), config)?, &args)
    } else {
        run(Engine::new(CpalBackend::new(), config)?, &args)
    }
}

fn run<B: AudioBackend>(engine: Engine<B>, args: &Args) -> Result<()> {
    // Ctrl+C stops the running test, or leaves the shell at the prompt
    let token = engine.cancel_token();
    if let Err(e) = ctrlc::set_handler(move || {
        if !token.request_cancel() {
            println!();
            std::process::exit(0);
        }
    }) {
        tracing::warn!("Could not install Ctrl+C handler: {}", e);
    }

    let mut shell = Shell {
        engine,
        selection: DeviceSelection::system_default(),
        display: TerminalDisplay::stdout(),
    };
    if let Some(kind) = args.initial_kind() {
        shell.use_kind(kind);
    }
    println!("{HELP}");

    let stdin = io::stdin();
    let mut line = String::new();
    loop {
        print!("  > ");
        io::stdout().flush()?;

        line.clear();
        if stdin.lock().read_line(&mut line)? == 0 {
            println!();
            break;
        }

        match Command::parse(&line) {
            Ok(None) => continue,
            Ok(Some(Command::Quit)) => break,
            Ok(Some(command)) => shell.execute(command),
            Err(e) => println!("  {e}"),
        }
    }
    Ok(())
}

/// Shell state between commands
struct Shell<B: AudioBackend> {
    engine: Engine<B>,
    selection: DeviceSelection,
    display: TerminalDisplay,
}

impl<B: AudioBackend> Shell<B> {
    fn execute(&mut self, command: Command) {
        let config = self.engine.config().clone();
        let result = match command {
            Command::Devices => {
                self.list_devices();
                Ok(())
            }
            Command::Tone {
                frequency,
                duration,
            } => self.play(self.engine.tone_spec(
                frequency.unwrap_or(config.tone_frequency),
                duration.unwrap_or(config.tone_duration),
            )),
            Command::Left => self.play(self.engine.channel_spec(ChannelRoute::Left)),
            Command::Right => self.play(self.engine.channel_spec(ChannelRoute::Right)),
            Command::Sweep { duration } => self.play(
                self.engine
                    .sweep_spec(duration.unwrap_or(config.sweep_duration)),
            ),
            Command::Mic => self
                .engine
                .run_meter(&self.selection, &mut self.display)
                .map(|_| ()),
            Command::Loopback => self
                .engine
                .run_loopback(&self.selection, &mut self.display)
                .map(|_| ()),
            Command::Output(index) => self.set_device(Direction::Output, index),
            Command::Input(index) => self.set_device(Direction::Input, index),
            Command::Use(kind) => {
                self.use_kind(kind);
                Ok(())
            }
            Command::Help => {
                println!("{HELP}");
                Ok(())
            }
            Command::Quit => Ok(()),
        };

        if let Err(e) = result {
            if e.is_setup_error() {
                println!("  Error: {e}");
            } else {
                println!("  Audio error: {e}");
            }
        }
    }

    fn play(&mut self, spec: SignalSpec) -> Result<(), EngineError> {
        self.engine
            .generate_and_play(spec, &self.selection, &mut self.display)
            .map(|_| ())
    }

    fn devices(&self) -> Vec<DeviceInfo> {
        match self.engine.devices() {
            Ok(devices) => devices,
            Err(e) => {
                println!("  Error: {e}");
                Vec::new()
            }
        }
    }

    fn list_devices(&self) {
        let devices = self.devices();

        println!();
        println!("  #  Type     Ch(I/O)  SampleRate  Name");
        println!("  {}", "-".repeat(65));
        for dev in &devices {
            let mut markers = Vec::new();
            if dev.is_default_input {
                markers.push("*IN");
            }
            if dev.is_default_output {
                markers.push("*OUT");
            }
            if dev.is_usb() {
                markers.push("USB");
            }
            let markers = if markers.is_empty() {
                String::new()
            } else {
                format!(" [{}]", markers.join(", "))
            };
            println!(
                "  {:<3} {}   {}/{}      {:>5}Hz  {}{}",
                dev.index,
                dev.kind_label(),
                dev.input_channels,
                dev.output_channels,
                dev.default_sample_rate,
                dev.name,
                markers
            );
        }
        println!();

        let selected = |index: Option<usize>| {
            index.and_then(|i| devices.iter().find(|d| d.index == i))
        };
        if let Some(dev) = selected(self.selection.output) {
            println!("  Selected output: {dev}");
        }
        if let Some(dev) = selected(self.selection.input) {
            println!("  Selected input:  {dev}");
        }
        println!();
    }

    fn set_device(&mut self, direction: Direction, index: usize) -> Result<(), EngineError> {
        let devices = self.engine.devices()?;
        let dev = device::select_device(&devices, direction, index)?;
        self.selection.set(direction, Some(dev.index));
        let label = match direction {
            Direction::Output => "Output",
            Direction::Input => "Input",
        };
        println!("  {label} device set to: {dev}");
        Ok(())
    }

    fn use_kind(&mut self, kind: DeviceKind) {
        let devices = self.devices();
        let found = device::select_by_type(&devices, kind);
        if found.output.is_none() && found.input.is_none() {
            println!("  No {kind} devices found.");
            return;
        }

        for direction in [Direction::Output, Direction::Input] {
            let label = match direction {
                Direction::Output => "Output",
                Direction::Input => "Input",
            };
            match found.get(direction).and_then(|i| devices.iter().find(|d| d.index == i)) {
                Some(dev) => {
                    self.selection.set(direction, Some(dev.index));
                    println!("  {label} device set to: {dev}");
                }
                None => println!("  No {kind} {direction} device found."),
            }
        }
    }
}
