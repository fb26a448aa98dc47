//! Live UART log of the target, kept as a scrollable buffer of wrapped lines.

use std::io::Read;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, LazyLock, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use regex::Regex;

use crate::Result;
use crate::lines::LineSplitter;

static ANSI_ESCAPE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\x1B\[[0-?]*[ -/]*[@-~]").expect("ANSI escape regex is valid")
});

/// Drops ANSI escape sequences and anything outside printable ASCII.
pub fn clean_line(raw: &str) -> String {
    ANSI_ESCAPE_RE
        .replace_all(raw, "")
        .chars()
        .filter(|c| (' '..='~').contains(c))
        .collect()
}

/// One row on screen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrappedLine {
    pub text: String,
    /// Continuation of the previous row, drawn indented.
    pub continued: bool,
}

/// Word-wraps `text` to rows of at most `width` characters. Words longer than
/// a row are cut.
pub fn wrap_text(text: &str, width: usize) -> Vec<WrappedLine> {
    let width = width.max(1);
    let mut rows: Vec<String> = Vec::new();
    let mut current = String::new();

    for word in text.split(' ').filter(|w| !w.is_empty()) {
        let candidate_len = if current.is_empty() {
            word.chars().count()
        } else {
            current.chars().count() + 1 + word.chars().count()
        };
        if candidate_len <= width {
            if !current.is_empty() {
                current.push(' ');
            }
            current.push_str(word);
            continue;
        }

        if !current.is_empty() {
            rows.push(std::mem::take(&mut current));
        }
        let mut chars: Vec<char> = word.chars().collect();
        while chars.len() > width {
            rows.push(chars.drain(..width).collect());
        }
        current = chars.into_iter().collect();
    }
    if !current.is_empty() {
        rows.push(current);
    }

    rows.into_iter()
        .enumerate()
        .map(|(i, text)| WrappedLine {
            text,
            continued: i > 0,
        })
        .collect()
}

/// Scrollable log with auto-scroll, the way the log screen shows it.
#[derive(Debug, Clone)]
pub struct LogBuffer {
    rows: Vec<WrappedLine>,
    width: usize,
    visible_rows: usize,
    capacity: usize,
    total_rows: u64,
    scroll: usize,
    auto_scroll: bool,
    alert_markers: Vec<String>,
}

impl LogBuffer {
    pub const DEFAULT_CAPACITY: usize = 2000;

    /// `width` is in characters, `visible_rows` the number of rows on screen.
    pub fn new(width: usize, visible_rows: usize, alert_markers: Vec<String>) -> Self {
        Self {
            rows: Vec::new(),
            width: width.max(1),
            visible_rows: visible_rows.max(1),
            capacity: Self::DEFAULT_CAPACITY,
            total_rows: 0,
            scroll: 0,
            auto_scroll: true,
            alert_markers,
        }
    }

    /// Keeps at most `capacity` rows, discarding the oldest.
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(self.visible_rows);
        self
    }

    pub fn add_line(&mut self, raw: &str) {
        let clean = clean_line(raw);
        let wrapped = wrap_text(&clean, self.width);
        self.total_rows += wrapped.len() as u64;
        self.rows.extend(wrapped);

        if self.rows.len() > self.capacity {
            let excess = self.rows.len() - self.capacity;
            self.rows.drain(..excess);
            self.scroll = self.scroll.saturating_sub(excess);
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Rows added since creation, including those already discarded.
    pub fn total_rows(&self) -> u64 {
        self.total_rows
    }

    /// Rows added after the buffer had seen `total` rows, as far as they are
    /// still held.
    pub fn rows_since(&self, total: u64) -> &[WrappedLine] {
        let new = self.total_rows.saturating_sub(total);
        let new = usize::try_from(new).unwrap_or(usize::MAX).min(self.rows.len());
        &self.rows[self.rows.len() - new..]
    }

    fn max_scroll(&self) -> usize {
        self.rows.len().saturating_sub(self.visible_rows)
    }

    /// Rows currently on screen. Follows the tail while auto-scroll is on.
    pub fn visible(&mut self) -> &[WrappedLine] {
        if self.auto_scroll {
            self.scroll = self.max_scroll();
        }
        let start = self.scroll.min(self.rows.len());
        let end = (start + self.visible_rows).min(self.rows.len());
        &self.rows[start..end]
    }

    pub fn scroll_up(&mut self) {
        if self.auto_scroll {
            self.scroll = self.max_scroll();
        }
        self.auto_scroll = false;
        self.scroll = self.scroll.saturating_sub(1);
    }

    pub fn scroll_down(&mut self) {
        if self.auto_scroll {
            self.scroll = self.max_scroll();
        }
        self.auto_scroll = false;
        self.scroll = (self.scroll + 1).min(self.max_scroll());
    }

    /// Jumps to the tail and turns auto-scroll back on.
    pub fn scroll_to_end(&mut self) {
        self.auto_scroll = true;
    }

    pub fn is_auto_scroll(&self) -> bool {
        self.auto_scroll
    }

    /// True when `text` contains one of the alert markers.
    pub fn is_alert(&self, text: &str) -> bool {
        self.alert_markers.iter().any(|m| text.contains(m.as_str()))
    }
}

/// Background reader that feeds a [`LogBuffer`] from a serial port.
pub struct LogReader {
    active: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl LogReader {
    /// Opens `port` and starts appending its lines to `buffer`.
    pub fn start(port: &str, baud: u32, buffer: Arc<Mutex<LogBuffer>>) -> Result<Self> {
        let serial = serialport::new(port, baud)
            .timeout(Duration::from_millis(100))
            .open()?;
        tracing::info!("Reading UART log from {} at {} baud", port, baud);
        Self::from_reader(serial, buffer)
    }

    /// Starts appending lines read from `reader`. Read timeouts are treated
    /// as "no data yet".
    pub fn from_reader<R: Read + Send + 'static>(
        mut reader: R,
        buffer: Arc<Mutex<LogBuffer>>,
    ) -> Result<Self> {
        let active = Arc::new(AtomicBool::new(true));
        let running = Arc::clone(&active);

        let thread = thread::Builder::new()
            .name("uart-log".to_string())
            .spawn(move || {
                let mut splitter = LineSplitter::new();
                let mut buf = [0u8; 256];
                while running.load(Ordering::Acquire) {
                    match reader.read(&mut buf) {
                        Ok(0) => break,
                        Ok(n) => {
                            let lines = splitter.push(&buf[..n]);
                            if !lines.is_empty() {
                                let mut log = lock(&buffer);
                                for line in lines {
                                    log.add_line(&line);
                                }
                            }
                        }
                        Err(e)
                            if matches!(
                                e.kind(),
                                std::io::ErrorKind::TimedOut | std::io::ErrorKind::Interrupted
                            ) =>
                        {
                            continue;
                        }
                        Err(e) => {
                            tracing::error!("UART read failed: {}", e);
                            lock(&buffer).add_line(&format!("Error: {}", e));
                            break;
                        }
                    }
                }
                if let Some(line) = splitter.finish() {
                    lock(&buffer).add_line(&line);
                }
            })?;

        Ok(Self {
            active,
            thread: Some(thread),
        })
    }

    pub fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Stops reading and waits for the reader thread.
    pub fn stop(&mut self) {
        self.active.store(false, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for LogReader {
    fn drop(&mut self) {
        self.stop();
    }
}

fn lock(buffer: &Mutex<LogBuffer>) -> MutexGuard<'_, LogBuffer> {
    buffer.lock().unwrap_or_else(|e| e.into_inner())
}
