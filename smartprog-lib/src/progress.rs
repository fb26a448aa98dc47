//! Progress reporting channel
//!
//! The flashing sequence runs on a worker thread and reports through a
//! [`ProgressCallback`]. Callbacks are invoked synchronously on that thread, so
//! implementations must be cheap: store the value and return. A display reads
//! whatever was stored last on its next redraw.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use strum::Display;

/// Start of the write window on the overall 0..=100 scale.
pub const WRITE_WINDOW_START: f32 = 15.0;
/// Share of the overall scale taken by the write phase.
pub const WRITE_WINDOW_SPAN: f32 = 85.0;

/// Stage labels shown to the operator.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    #[strum(serialize = "Enter Bootloader")]
    EnterBootloader,
    #[strum(serialize = "Burn fuses")]
    BurnFuses,
    #[strum(serialize = "Erase Flash")]
    EraseFlash,
    #[strum(serialize = "Flash...")]
    Flash,
    #[strum(serialize = "Done")]
    Done,
    #[strum(serialize = "Error")]
    Error,
}

/// Receiver for stage and percent updates.
///
/// Every method has a no-op default, so an implementation only overrides the
/// slots it cares about.
pub trait ProgressCallback: Send + Sync {
    /// A new stage started.
    fn on_stage(&self, _stage: &str) {}

    /// Overall completion, 0.0..=100.0.
    fn on_progress(&self, _percent: f32) {}

    /// Raw output line from the flashing tool.
    fn on_log_line(&self, _line: &str) {}
}

/// Callback that ignores everything.
#[derive(Debug, Default)]
pub struct NoOpProgressCallback;

impl ProgressCallback for NoOpProgressCallback {}

type StageFn = Box<dyn Fn(&str) + Send + Sync>;
type PercentFn = Box<dyn Fn(f32) + Send + Sync>;

/// Two optional closures, for callers that do not want a dedicated type.
#[derive(Default)]
pub struct FnProgressCallback {
    stage: Option<StageFn>,
    progress: Option<PercentFn>,
}

impl FnProgressCallback {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_stage(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.stage = Some(Box::new(f));
        self
    }

    pub fn with_progress(mut self, f: impl Fn(f32) + Send + Sync + 'static) -> Self {
        self.progress = Some(Box::new(f));
        self
    }
}

impl ProgressCallback for FnProgressCallback {
    fn on_stage(&self, stage: &str) {
        if let Some(f) = &self.stage {
            f(stage);
        }
    }

    fn on_progress(&self, percent: f32) {
        if let Some(f) = &self.progress {
            f(percent);
        }
    }
}

/// Maps a write-phase percentage reported by the flashing tool onto the
/// overall scale: `15 + local * 0.85`.
pub fn remap_write_percent(local: f32) -> f32 {
    WRITE_WINDOW_START + clamp_local(local) * WRITE_WINDOW_SPAN / 100.0
}

fn clamp_local(local: f32) -> f32 {
    if local.is_nan() {
        0.0
    } else {
        local.clamp(0.0, 100.0)
    }
}

/// Follows the per-image bars of one write command.
///
/// The tool restarts its bar for every image. The first bar uses the plain
/// [`remap_write_percent`] mapping. When a bar restarts, the finished bar is
/// credited with its share of the write window and the new bar gets an equal
/// share of whatever is left. A bar reaching 100% is held back while later
/// images may follow; the final 100 comes with the last bar or with `Done`.
#[derive(Debug, Clone)]
pub struct WriteProgress {
    images: usize,
    bar: usize,
    last_local: Option<f32>,
    window_start: f32,
    window_span: f32,
    last_reported: f32,
}

impl WriteProgress {
    pub fn new(images: usize) -> Self {
        Self {
            images: images.max(1),
            bar: 0,
            last_local: None,
            window_start: WRITE_WINDOW_START,
            window_span: WRITE_WINDOW_SPAN,
            last_reported: WRITE_WINDOW_START,
        }
    }

    /// Index of the bar currently followed.
    pub fn bar(&self) -> usize {
        self.bar
    }

    /// Overall percent for one percent parsed from the tool, or `None` when
    /// nothing should be reported.
    pub fn update(&mut self, local: f32) -> Option<f32> {
        let local = clamp_local(local);
        if let Some(last) = self.last_local
            && local < last
            && !self.on_last_bar()
        {
            self.start_next_bar(last);
        }
        self.last_local = Some(local);

        if local >= 100.0 && !self.on_last_bar() {
            return None;
        }
        let overall = if self.bar == 0 {
            remap_write_percent(local)
        } else {
            self.window_start + local * self.window_span / 100.0
        };
        self.last_reported = self.last_reported.max(overall);
        Some(overall)
    }

    fn on_last_bar(&self) -> bool {
        self.bar + 1 >= self.images
    }

    fn start_next_bar(&mut self, finished_local: f32) {
        let finished_end = if self.bar == 0 {
            WRITE_WINDOW_START + WRITE_WINDOW_SPAN / self.images as f32 * finished_local / 100.0
        } else {
            self.window_start + self.window_span * finished_local / 100.0
        };
        self.bar += 1;
        self.window_start = finished_end.max(self.last_reported);
        self.window_span = (100.0 - self.window_start) / (self.images - self.bar) as f32;
        tracing::debug!(
            "Write bar {} of {} starts at {:.1}%",
            self.bar + 1,
            self.images,
            self.window_start
        );
    }
}

/// Wraps a callback for one attempt and keeps the reported percent from ever
/// going backwards.
pub struct ProgressReporter<'a> {
    callback: &'a dyn ProgressCallback,
    last_percent: Option<f32>,
}

impl<'a> ProgressReporter<'a> {
    pub fn new(callback: &'a dyn ProgressCallback) -> Self {
        Self {
            callback,
            last_percent: None,
        }
    }

    pub fn stage(&self, stage: Stage) {
        tracing::info!("Stage: {}", stage);
        self.callback.on_stage(&stage.to_string());
    }

    /// Forwards `percent` unless it is lower than what was already reported.
    pub fn progress(&mut self, percent: f32) {
        let percent = percent.clamp(0.0, 100.0);
        if let Some(last) = self.last_percent
            && percent < last
        {
            tracing::trace!("Dropping regressive progress {:.1} < {:.1}", percent, last);
            return;
        }
        self.last_percent = Some(percent);
        self.callback.on_progress(percent);
    }

    pub fn log_line(&self, line: &str) {
        self.callback.on_log_line(line);
    }

    pub fn last_percent(&self) -> Option<f32> {
        self.last_percent
    }
}

/// Latest values as seen by a reader.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressSnapshot {
    pub stage: String,
    pub percent: f32,
    /// `None` while the attempt is running, then its success flag.
    pub outcome: Option<bool>,
}

const LOG_TAIL_LINES: usize = 200;

/// Progress state written by the flashing thread and read by the UI tick.
///
/// Only the flashing thread writes; any number of readers may take
/// snapshots. Readers see the most recent value of each field and may miss
/// intermediate ones.
#[derive(Debug)]
pub struct SharedProgress {
    stage: Mutex<String>,
    percent_bits: AtomicU32,
    finished: AtomicBool,
    success: AtomicBool,
    log_tail: Mutex<VecDeque<String>>,
}

impl Default for SharedProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl SharedProgress {
    pub fn new() -> Self {
        Self {
            stage: Mutex::new(String::new()),
            percent_bits: AtomicU32::new(0f32.to_bits()),
            finished: AtomicBool::new(false),
            success: AtomicBool::new(false),
            log_tail: Mutex::new(VecDeque::with_capacity(LOG_TAIL_LINES)),
        }
    }

    pub fn stage(&self) -> String {
        self.stage
            .lock()
            .map(|s| s.clone())
            .unwrap_or_else(|e| e.into_inner().clone())
    }

    pub fn percent(&self) -> f32 {
        f32::from_bits(self.percent_bits.load(Ordering::Acquire))
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        let outcome = if self.is_finished() {
            Some(self.success.load(Ordering::Acquire))
        } else {
            None
        };
        ProgressSnapshot {
            stage: self.stage(),
            percent: self.percent(),
            outcome,
        }
    }

    /// Last lines of tool output, oldest first.
    pub fn log_tail(&self) -> Vec<String> {
        match self.log_tail.lock() {
            Ok(tail) => tail.iter().cloned().collect(),
            Err(e) => e.into_inner().iter().cloned().collect(),
        }
    }

    /// Records the terminal state and its label.
    pub fn finish(&self, success: bool, stage: &str) {
        self.set_stage(stage);
        self.success.store(success, Ordering::Release);
        self.finished.store(true, Ordering::Release);
    }

    /// Clears everything for a fresh attempt.
    pub fn reset(&self) {
        self.set_stage("");
        self.percent_bits.store(0f32.to_bits(), Ordering::Release);
        self.success.store(false, Ordering::Release);
        self.finished.store(false, Ordering::Release);
        match self.log_tail.lock() {
            Ok(mut tail) => tail.clear(),
            Err(e) => e.into_inner().clear(),
        }
    }

    fn set_stage(&self, stage: &str) {
        let mut guard = match self.stage.lock() {
            Ok(guard) => guard,
            Err(e) => e.into_inner(),
        };
        guard.clear();
        guard.push_str(stage);
    }
}

impl ProgressCallback for SharedProgress {
    fn on_stage(&self, stage: &str) {
        self.set_stage(stage);
    }

    fn on_progress(&self, percent: f32) {
        self.percent_bits.store(percent.to_bits(), Ordering::Release);
    }

    fn on_log_line(&self, line: &str) {
        let mut tail = match self.log_tail.lock() {
            Ok(tail) => tail,
            Err(e) => e.into_inner(),
        };
        if tail.len() == LOG_TAIL_LINES {
            tail.pop_front();
        }
        tail.push_back(line.to_string());
    }
}

impl<T: ProgressCallback + ?Sized> ProgressCallback for Arc<T> {
    fn on_stage(&self, stage: &str) {
        (**self).on_stage(stage)
    }

    fn on_progress(&self, percent: f32) {
        (**self).on_progress(percent)
    }

    fn on_log_line(&self, line: &str) {
        (**self).on_log_line(line)
    }
}
