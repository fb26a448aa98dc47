//! Progress display for the CLI
//!
//! The flash worker writes a [`SharedProgress`]; this module reads it on a
//! fixed tick and redraws, the way the device's display loop does.

use indicatif::{ProgressBar, ProgressStyle};
use smartprog_lib::{FlashHandle, ProgressSnapshot, SharedProgress};
use std::io::{self, IsTerminal, Write};
use std::thread;
use std::time::Duration;

/// Redraw period of the display loop.
pub const TICK: Duration = Duration::from_millis(100);

pub trait ProgressView {
    fn update(&mut self, snapshot: &ProgressSnapshot);

    fn finish(&mut self, snapshot: &ProgressSnapshot) {
        self.update(snapshot);
    }
}

/// Plain text output for non-terminal stdout: one line per stage and per
/// whole percent.
pub struct PercentProgressView<W: Write> {
    out: W,
    last_stage: Option<String>,
    last_percent: Option<u64>,
}

impl<W: Write> PercentProgressView<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            last_stage: None,
            last_percent: None,
        }
    }

    fn print_line(&mut self, line: &str) {
        let _ = writeln!(self.out, "{}", line);
        let _ = self.out.flush();
    }
}

impl<W: Write> ProgressView for PercentProgressView<W> {
    fn update(&mut self, snapshot: &ProgressSnapshot) {
        if !snapshot.stage.is_empty() && self.last_stage.as_deref() != Some(snapshot.stage.as_str())
        {
            self.last_stage = Some(snapshot.stage.clone());
            self.print_line(&snapshot.stage);
        }
        let percent = snapshot.percent.clamp(0.0, 100.0) as u64;
        if self.last_percent != Some(percent) {
            self.last_percent = Some(percent);
            self.print_line(&format!("{}%", percent));
        }
    }
}

/// indicatif bar, message set to the current stage
pub struct IndicatifProgressView {
    bar: ProgressBar,
}

impl IndicatifProgressView {
    pub fn new() -> Self {
        let bar = ProgressBar::new(100);
        bar.set_style(
            ProgressStyle::with_template("{msg:<16} {wide_bar} {pos:>3}%")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=>-"),
        );
        Self { bar }
    }
}

impl Default for IndicatifProgressView {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressView for IndicatifProgressView {
    fn update(&mut self, snapshot: &ProgressSnapshot) {
        self.bar.set_message(snapshot.stage.clone());
        self.bar.set_position(snapshot.percent.clamp(0.0, 100.0) as u64);
    }

    fn finish(&mut self, snapshot: &ProgressSnapshot) {
        self.update(snapshot);
        match snapshot.outcome {
            Some(true) => self.bar.finish_with_message(snapshot.stage.clone()),
            _ => self.bar.abandon_with_message(snapshot.stage.clone()),
        }
    }
}

struct QuietProgressView;

impl ProgressView for QuietProgressView {
    fn update(&mut self, _snapshot: &ProgressSnapshot) {}
}

pub fn create_progress_view(quiet: bool) -> Box<dyn ProgressView> {
    if quiet {
        Box::new(QuietProgressView)
    } else if io::stdout().is_terminal() {
        Box::new(IndicatifProgressView::new())
    } else {
        Box::new(PercentProgressView::new(io::stdout()))
    }
}

/// Redraws `view` every [`TICK`] until the attempt behind `handle` ends.
pub fn watch(handle: &FlashHandle, progress: &SharedProgress, view: &mut dyn ProgressView) {
    while !handle.is_finished() {
        view.update(&progress.snapshot());
        thread::sleep(TICK);
    }
    view.finish(&progress.snapshot());
}
