//! Fire-and-forget progress and level output
//!
//! Controllers report through a [`DisplaySink`] and never read anything back.
//! [`TerminalDisplay`] redraws a single status line in place with `\r`,
//! throttled so a 5ms block cadence does not flood the terminal.

use crate::audio::meter::{render_bar, MeterReading};
use std::io::{self, Stdout, Write};
use std::time::{Duration, Instant};

/// Width of the level bar in characters
const LEVEL_BAR_WIDTH: usize = 50;

/// Width of the playback progress bar in characters
const PROGRESS_BAR_WIDTH: usize = 30;

/// Minimum time between redraws of the live line
const REFRESH_INTERVAL: Duration = Duration::from_millis(50);

/// Receiver for controller output
pub trait DisplaySink {
    /// One-off message (start, stop, latency notice)
    fn status(&mut self, message: &str);

    /// Playback position update
    fn progress(&mut self, frames_done: u64, total_frames: u64, sample_rate: u32);

    /// Meter update
    fn level(&mut self, reading: &MeterReading);

    /// Operation ended; close any live line
    fn finish(&mut self) {}
}

/// Sink that drops everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NullDisplay;

impl DisplaySink for NullDisplay {
    fn status(&mut self, _message: &str) {}
    fn progress(&mut self, _frames_done: u64, _total_frames: u64, _sample_rate: u32) {}
    fn level(&mut self, _reading: &MeterReading) {}
}

/// Terminal renderer with an in-place live line
pub struct TerminalDisplay<W: Write = Stdout> {
    out: W,
    refresh: Duration,
    last_draw: Option<Instant>,
    /// A `\r` line is on screen and needs a newline before the next message
    line_open: bool,
}

impl TerminalDisplay<Stdout> {
    /// Render to stdout
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write> TerminalDisplay<W> {
    /// Render to any writer
    pub fn new(out: W) -> Self {
        Self {
            out,
            refresh: REFRESH_INTERVAL,
            last_draw: None,
            line_open: false,
        }
    }

    /// Redraw on every update instead of throttling
    pub fn unthrottled(mut self) -> Self {
        self.refresh = Duration::ZERO;
        self
    }

    /// Consume the display and return the writer
    pub fn into_inner(self) -> W {
        self.out
    }

    fn due(&mut self, force: bool) -> bool {
        let now = Instant::now();
        let due = force
            || self
                .last_draw
                .map(|last| now.duration_since(last) >= self.refresh)
                .unwrap_or(true);
        if due {
            self.last_draw = Some(now);
        }
        due
    }

    fn draw_line(&mut self, line: &str) {
        // Display output is best effort; a closed stdout must not stop audio
        let _ = write!(self.out, "\r  {line}");
        let _ = self.out.flush();
        self.line_open = true;
    }

    fn close_line(&mut self) {
        if self.line_open {
            let _ = writeln!(self.out);
            self.line_open = false;
        }
    }
}

impl<W: Write> DisplaySink for TerminalDisplay<W> {
    fn status(&mut self, message: &str) {
        self.close_line();
        let _ = writeln!(self.out, "  {message}");
        let _ = self.out.flush();
    }

    fn progress(&mut self, frames_done: u64, total_frames: u64, sample_rate: u32) {
        if !self.due(frames_done >= total_frames) {
            return;
        }
        let fraction = if total_frames == 0 {
            1.0
        } else {
            frames_done as f32 / total_frames as f32
        };
        let rate = sample_rate.max(1) as f64;
        let line = format!(
            "[{}] {:.1}s / {:.1}s",
            render_bar(fraction, PROGRESS_BAR_WIDTH),
            frames_done as f64 / rate,
            total_frames as f64 / rate
        );
        self.draw_line(&line);
    }

    fn level(&mut self, reading: &MeterReading) {
        if !self.due(false) {
            return;
        }
        let line = format!(
            "[{}] {:+6.1} dB",
            render_bar(reading.bar, LEVEL_BAR_WIDTH),
            reading.smoothed_db
        );
        self.draw_line(&line);
    }

    fn finish(&mut self) {
        self.close_line();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(display: TerminalDisplay<Vec<u8>>) -> String {
        String::from_utf8(display.into_inner()).unwrap()
    }

    #[test]
    fn test_level_line() {
        let mut display = TerminalDisplay::new(Vec::new()).unthrottled();
        display.level(&MeterReading {
            db: -30.0,
            smoothed_db: -30.0,
            bar: 0.5,
        });
        display.finish();
        let out = text(display);
        assert!(out.starts_with("\r  ["));
        assert!(out.contains(" -30.0 dB"));
        assert_eq!(out.matches('█').count(), 25);
        assert!(out.ends_with('\n'));
    }

    #[test]
    fn test_status_closes_live_line() {
        let mut display = TerminalDisplay::new(Vec::new()).unthrottled();
        display.progress(24000, 48000, 48000);
        display.status("Stopped.");
        let out = text(display);
        assert!(out.contains("0.5s / 1.0s"));
        assert!(out.ends_with("\n  Stopped.\n"));
    }

    #[test]
    fn test_throttled_but_final_progress_drawn() {
        let mut display = TerminalDisplay::new(Vec::new());
        display.progress(0, 1000, 1000);
        display.progress(10, 1000, 1000);
        display.progress(1000, 1000, 1000);
        let out = text(display);
        assert_eq!(out.matches('\r').count(), 2);
        assert!(out.contains("1.0s / 1.0s"));
    }
}
