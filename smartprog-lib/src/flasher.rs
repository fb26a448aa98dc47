//! The flashing state machine.
//!
//! ```text
//! Idle -> EnteringBootloader -> BurningFuses -> Erasing -> ReenteringBootloader
//!      -> Writing -> ExitingBootloader -> Done | Failed
//! ```
//!
//! The first failing tool call skips the rest of the sequence, but
//! `ExitingBootloader` always runs so the target is never left in download
//! mode. Nothing is retried.

use std::path::Path;

use strum::Display;

use crate::bootloader::BootloaderController;
use crate::esptool::{self, EsptoolConfig};
use crate::gpio::OutputLine;
use crate::image_set::ImageSet;
use crate::progress::{
    ProgressCallback, ProgressReporter, Stage, WriteProgress, remap_write_percent,
};
use crate::tool::ToolRunner;
use crate::{Error, Result};

#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
pub enum FlashState {
    Idle,
    EnteringBootloader,
    BurningFuses,
    Erasing,
    ReenteringBootloader,
    Writing,
    ExitingBootloader,
    Done,
    Failed,
}

/// One flashing attempt. Single use: once terminal it stays terminal.
#[derive(Debug, Clone)]
pub(crate) struct FlashAttempt {
    images: ImageSet,
    state: FlashState,
}

impl FlashAttempt {
    fn new(images: ImageSet) -> Self {
        Self {
            images,
            state: FlashState::Idle,
        }
    }

    fn images(&self) -> &ImageSet {
        &self.images
    }

    fn state(&self) -> FlashState {
        self.state
    }

    fn advance(&mut self, next: FlashState) {
        debug_assert!(
            !matches!(self.state, FlashState::Done | FlashState::Failed),
            "attempt already terminal"
        );
        tracing::debug!("flash state {} -> {}", self.state, next);
        self.state = next;
    }
}

/// Result handed back to the UI: a success flag and the label to leave on
/// screen. The underlying error is kept for logging only.
#[derive(Debug)]
pub struct FlashOutcome {
    pub success: bool,
    pub stage: String,
    /// Terminal state, `Done` or `Failed`.
    pub state: FlashState,
    /// State the attempt was in when it failed. `None` on success and for
    /// image resolution failures, which happen before the attempt starts.
    pub failed_in: Option<FlashState>,
    pub error: Option<Error>,
}

impl FlashOutcome {
    fn done() -> Self {
        Self {
            success: true,
            stage: Stage::Done.to_string(),
            state: FlashState::Done,
            failed_in: None,
            error: None,
        }
    }

    fn failed(failed_in: Option<FlashState>, error: Error) -> Self {
        Self {
            success: false,
            stage: Stage::Error.to_string(),
            state: FlashState::Failed,
            failed_in,
            error: Some(error),
        }
    }
}

/// Drives one target: its serial port, its BOOT/EN lines and the tool runner.
///
/// Taking `&mut self` for every operation is what keeps attempts on the same
/// target from overlapping.
pub struct Flasher<L: OutputLine, R: ToolRunner> {
    port: String,
    esptool: EsptoolConfig,
    bootloader: BootloaderController<L>,
    runner: R,
}

impl<L: OutputLine, R: ToolRunner> Flasher<L, R> {
    pub fn new(
        port: impl Into<String>,
        esptool: EsptoolConfig,
        bootloader: BootloaderController<L>,
        runner: R,
    ) -> Self {
        Self {
            port: port.into(),
            esptool,
            bootloader,
            runner,
        }
    }

    pub fn port(&self) -> &str {
        &self.port
    }

    /// Flashes the version that contains `variant_file`, using that file as
    /// the variant data blob.
    pub fn flash_firmware(
        &mut self,
        variant_file: &Path,
        progress: &dyn ProgressCallback,
    ) -> FlashOutcome {
        tracing::info!("Flashing {}", variant_file.display());
        match ImageSet::resolve_variant_file(variant_file) {
            Ok(images) => self.flash_images(images, progress),
            Err(e) => {
                tracing::error!("Image resolution failed: {}", e);
                FlashOutcome::failed(None, e)
            }
        }
    }

    /// Flashes `variant` from `version_dir`.
    pub fn flash_version(
        &mut self,
        version_dir: &Path,
        variant: &str,
        progress: &dyn ProgressCallback,
    ) -> FlashOutcome {
        tracing::info!("Flashing {} from {}", variant, version_dir.display());
        match ImageSet::resolve(version_dir, variant) {
            Ok(images) => self.flash_images(images, progress),
            Err(e) => {
                tracing::error!("Image resolution failed: {}", e);
                FlashOutcome::failed(None, e)
            }
        }
    }

    /// Runs the full sequence against an already resolved image set.
    pub fn flash_images(
        &mut self,
        images: ImageSet,
        progress: &dyn ProgressCallback,
    ) -> FlashOutcome {
        let mut attempt = FlashAttempt::new(images);
        let mut reporter = ProgressReporter::new(progress);

        let result = self.run_sequence(&mut attempt, &mut reporter);
        let failed_in = result.is_err().then_some(attempt.state());

        attempt.advance(FlashState::ExitingBootloader);
        self.bootloader.exit_bootloader();

        match result {
            Ok(()) => {
                attempt.advance(FlashState::Done);
                tracing::info!("Flashing finished");
                reporter.stage(Stage::Done);
                reporter.progress(100.0);
                FlashOutcome::done()
            }
            Err(e) => {
                attempt.advance(FlashState::Failed);
                tracing::error!("Flashing failed during {:?}: {}", failed_in, e);
                FlashOutcome::failed(failed_in, e)
            }
        }
    }

    fn run_sequence(
        &mut self,
        attempt: &mut FlashAttempt,
        reporter: &mut ProgressReporter<'_>,
    ) -> Result<()> {
        attempt.advance(FlashState::EnteringBootloader);
        self.bootloader.enter_bootloader();
        reporter.stage(Stage::EnterBootloader);
        reporter.progress(0.0);

        // The fuse stage is only shown once the eFuse is actually set.
        attempt.advance(FlashState::BurningFuses);
        let command = self.esptool.set_flash_voltage(&self.port);
        self.runner
            .run_checked(&command, &mut |line| forward_line(reporter, line))?;
        reporter.stage(Stage::BurnFuses);
        reporter.progress(5.0);

        attempt.advance(FlashState::Erasing);
        reporter.stage(Stage::EraseFlash);
        reporter.progress(10.0);
        let command = self.esptool.erase_flash(&self.port);
        self.runner
            .run_checked(&command, &mut |line| forward_line(reporter, line))?;

        // Erasing resets the chip out of download mode.
        attempt.advance(FlashState::ReenteringBootloader);
        self.bootloader.enter_bootloader();

        attempt.advance(FlashState::Writing);
        reporter.stage(Stage::Flash);
        reporter.progress(remap_write_percent(0.0));
        let command = self.esptool.write_flash(&self.port, attempt.images());
        let mut bars = WriteProgress::new(attempt.images().write_order().len());
        self.runner.run_checked(&command, &mut |line| {
            forward_line(reporter, line);
            if let Some(overall) = esptool::parse_progress_line(line).and_then(|l| bars.update(l)) {
                reporter.progress(overall);
            }
        })?;

        Ok(())
    }

    /// Reads the factory MAC address of the target.
    pub fn read_mac_address(&mut self) -> Result<String> {
        self.bootloader.enter_bootloader();

        let command = self.esptool.read_mac(&self.port);
        let mut mac = None;
        let result = self.runner.run_checked(&command, &mut |line| {
            tracing::trace!("{}", line);
            if mac.is_none() {
                mac = esptool::parse_mac_line(line);
            }
        });

        self.bootloader.exit_bootloader();

        result?;
        let mac = mac.ok_or_else(|| Error::protocol("no MAC address in read_mac output"))?;
        tracing::info!("MAC address: {}", mac);
        Ok(mac)
    }
}

fn forward_line(reporter: &ProgressReporter<'_>, line: &str) {
    tracing::trace!("{}", line);
    reporter.log_line(line);
}
