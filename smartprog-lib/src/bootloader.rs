//! BOOT/EN strapping sequences for the target's ROM bootloader.

use std::thread::sleep;
use std::time::Duration;

use crate::gpio::{Level, OutputLine};

/// Delays used by the strapping sequences.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BootTiming {
    /// BOOT held low before the reset pulse.
    pub enter_boot_setup: Duration,
    /// Width of the EN reset pulse on entry.
    pub enter_reset_pulse: Duration,
    /// BOOT released before the reset pulse.
    pub exit_boot_setup: Duration,
    /// Width of the EN reset pulse on exit.
    pub exit_reset_pulse: Duration,
    /// Time for the application to come up after reset.
    pub exit_settle: Duration,
}

impl Default for BootTiming {
    fn default() -> Self {
        Self {
            enter_boot_setup: Duration::from_millis(150),
            enter_reset_pulse: Duration::from_millis(100),
            exit_boot_setup: Duration::from_millis(100),
            exit_reset_pulse: Duration::from_millis(120),
            exit_settle: Duration::from_millis(800),
        }
    }
}

impl BootTiming {
    /// No delays at all. Only meaningful with simulated lines.
    pub fn immediate() -> Self {
        Self {
            enter_boot_setup: Duration::ZERO,
            enter_reset_pulse: Duration::ZERO,
            exit_boot_setup: Duration::ZERO,
            exit_reset_pulse: Duration::ZERO,
            exit_settle: Duration::ZERO,
        }
    }
}

/// Owns the BOOT and EN lines of one target.
///
/// Both lines are driven HIGH on construction and again on drop, so the chip
/// is left running its application whenever no transition is in progress.
pub struct BootloaderController<L: OutputLine> {
    boot: L,
    enable: L,
    timing: BootTiming,
}

impl<L: OutputLine> BootloaderController<L> {
    pub fn new(boot: L, enable: L) -> Self {
        Self::with_timing(boot, enable, BootTiming::default())
    }

    pub fn with_timing(mut boot: L, mut enable: L, timing: BootTiming) -> Self {
        boot.set_level(Level::High);
        enable.set_level(Level::High);
        Self {
            boot,
            enable,
            timing,
        }
    }

    /// Resets the chip into serial download mode. Safe to call repeatedly.
    pub fn enter_bootloader(&mut self) {
        tracing::info!("Entering bootloader");
        self.drive_boot(Level::Low);
        pause(self.timing.enter_boot_setup);
        self.drive_enable(Level::Low);
        pause(self.timing.enter_reset_pulse);
        self.drive_enable(Level::High);
        tracing::debug!("Target is in download mode");
    }

    /// Releases BOOT and resets the chip into its application.
    pub fn exit_bootloader(&mut self) {
        tracing::info!("Leaving bootloader");
        self.drive_boot(Level::High);
        pause(self.timing.exit_boot_setup);
        self.drive_enable(Level::Low);
        pause(self.timing.exit_reset_pulse);
        self.drive_enable(Level::High);
        pause(self.timing.exit_settle);
        tracing::debug!("Target restarted in normal mode");
    }

    fn drive_boot(&mut self, level: Level) {
        tracing::debug!("BOOT ({}) -> {}", self.boot.name(), level);
        self.boot.set_level(level);
    }

    fn drive_enable(&mut self, level: Level) {
        tracing::debug!("EN ({}) -> {}", self.enable.name(), level);
        self.enable.set_level(level);
    }
}

impl<L: OutputLine> Drop for BootloaderController<L> {
    fn drop(&mut self) {
        self.boot.set_level(Level::High);
        self.enable.set_level(Level::High);
    }
}

fn pause(duration: Duration) {
    if !duration.is_zero() {
        sleep(duration);
    }
}
