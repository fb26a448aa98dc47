//! Core of the hand-held ESP32 programmer.
//!
//! [`Flasher`] drives the whole flashing sequence against one target:
//! strapping it into its ROM bootloader through the BOOT/EN lines, burning the
//! flash voltage eFuse, erasing, writing the five images of a firmware version
//! and strapping it back into its application. [`FlashService`] runs that
//! sequence on a background thread and publishes its progress through a
//! [`SharedProgress`] that the UI polls.

pub mod bootloader;
pub mod error;
pub mod esptool;
pub mod flasher;
pub mod gpio;
pub mod image_set;
mod lines;
pub mod progress;
pub mod tool;
pub mod uart_log;
pub mod worker;

pub use crate::bootloader::{BootTiming, BootloaderController};
pub use crate::error::{Error, Result};
pub use crate::esptool::{EsptoolConfig, FlashMode};
pub use crate::flasher::{FlashOutcome, FlashState, Flasher};
pub use crate::gpio::{Level, NullLine, OutputLine};
#[cfg(feature = "raspberry")]
pub use crate::gpio::RppalLine;
pub use crate::image_set::{ImageRole, ImageSet, list_variants, list_versions};
pub use crate::progress::{
    FnProgressCallback, NoOpProgressCallback, ProgressCallback, ProgressSnapshot, SharedProgress,
    Stage, WriteProgress,
};
pub use crate::tool::{ProcessRunner, ToolCommand, ToolExit, ToolRunner};
pub use crate::uart_log::{LogBuffer, LogReader};
pub use crate::worker::{FlashHandle, FlashService};
