//! Runs flash attempts off the UI thread, one at a time.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};

use crate::flasher::{FlashOutcome, Flasher};
use crate::gpio::OutputLine;
use crate::progress::SharedProgress;
use crate::tool::ToolRunner;
use crate::{Error, Result};

/// Owns the target's [`Flasher`] and hands out background attempts.
///
/// A second [`start`](Self::start) while an attempt is in flight is refused
/// with [`Error::Busy`]. Dropping the returned [`FlashHandle`] does not stop
/// the attempt; it always runs to completion.
pub struct FlashService<L: OutputLine + 'static, R: ToolRunner + 'static> {
    flasher: Arc<Mutex<Flasher<L, R>>>,
    busy: Arc<AtomicBool>,
}

impl<L: OutputLine + 'static, R: ToolRunner + 'static> Clone for FlashService<L, R> {
    fn clone(&self) -> Self {
        Self {
            flasher: Arc::clone(&self.flasher),
            busy: Arc::clone(&self.busy),
        }
    }
}

impl<L: OutputLine + 'static, R: ToolRunner + 'static> FlashService<L, R> {
    pub fn new(flasher: Flasher<L, R>) -> Self {
        Self {
            flasher: Arc::new(Mutex::new(flasher)),
            busy: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Starts flashing `variant_file` on a background thread.
    ///
    /// `progress` is reset, then written by the worker only; the caller reads
    /// it on its own schedule.
    pub fn start(
        &self,
        variant_file: PathBuf,
        progress: Arc<SharedProgress>,
    ) -> Result<FlashHandle> {
        let guard = BusyGuard::acquire(&self.busy)?;
        progress.reset();

        let flasher = Arc::clone(&self.flasher);
        let thread = thread::Builder::new()
            .name("flash-worker".to_string())
            .spawn(move || {
                let _guard = guard;
                let outcome = lock(&flasher).flash_firmware(&variant_file, progress.as_ref());
                progress.finish(outcome.success, &outcome.stage);
                outcome
            })?;

        Ok(FlashHandle { thread })
    }

    /// Reads the target MAC address on the calling thread. Refused while an
    /// attempt is running.
    pub fn read_mac_address(&self) -> Result<String> {
        let _guard = BusyGuard::acquire(&self.busy)?;
        lock(&self.flasher).read_mac_address()
    }
}

/// Handle to a running attempt.
pub struct FlashHandle {
    thread: JoinHandle<FlashOutcome>,
}

impl FlashHandle {
    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Blocks until the attempt reaches a terminal state.
    pub fn join(self) -> Result<FlashOutcome> {
        self.thread
            .join()
            .map_err(|_| Error::protocol("flash worker panicked"))
    }
}

struct BusyGuard {
    busy: Arc<AtomicBool>,
}

impl BusyGuard {
    fn acquire(busy: &Arc<AtomicBool>) -> Result<Self> {
        busy.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| Error::Busy)?;
        Ok(Self {
            busy: Arc::clone(busy),
        })
    }
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::Release);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // Every attempt starts by re-entering the bootloader, so a poisoned
    // flasher is still safe to reuse.
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}
