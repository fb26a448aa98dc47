//! Command lines for `esptool.py` / `espefuse.py` and parsers for their output.

use std::sync::LazyLock;

use regex::Regex;
use strum::{Display, EnumString};

use crate::image_set::ImageSet;
use crate::tool::ToolCommand;

/// SPI flash access mode passed to `write_flash`.
#[derive(EnumString, Display, Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "cli", derive(clap::ValueEnum))]
#[strum(serialize_all = "lowercase")]
pub enum FlashMode {
    Qio,
    Qout,
    Dio,
    Dout,
}

/// Everything needed to build the tool command lines for one target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EsptoolConfig {
    pub esptool: String,
    pub espefuse: String,
    pub chip: String,
    pub baud: u32,
    pub flash_voltage: String,
    pub flash_mode: FlashMode,
    pub flash_freq: String,
    pub flash_size: String,
}

impl Default for EsptoolConfig {
    fn default() -> Self {
        Self {
            esptool: "esptool.py".to_string(),
            espefuse: "espefuse.py".to_string(),
            chip: "esp32".to_string(),
            baud: 460800,
            flash_voltage: "3.3V".to_string(),
            flash_mode: FlashMode::Dio,
            flash_freq: "40m".to_string(),
            flash_size: "4MB".to_string(),
        }
    }
}

impl EsptoolConfig {
    /// Burns the VDD_SDIO voltage eFuse. Repeating it with the same value is
    /// harmless.
    pub fn set_flash_voltage(&self, port: &str) -> ToolCommand {
        ToolCommand::new(&self.espefuse)
            .args(["--chip", self.chip.as_str(), "-p", port, "--do-not-confirm"])
            .subcommand("set_flash_voltage")
            .arg(&self.flash_voltage)
    }

    pub fn erase_flash(&self, port: &str) -> ToolCommand {
        ToolCommand::new(&self.esptool)
            .args(["--chip", self.chip.as_str(), "-b"])
            .arg(self.baud.to_string())
            .args(["-p", port])
            .subcommand("erase_flash")
    }

    /// One `write_flash` for the whole image set.
    pub fn write_flash(&self, port: &str, images: &ImageSet) -> ToolCommand {
        let mut command = ToolCommand::new(&self.esptool)
            .args(["--chip", self.chip.as_str(), "-b"])
            .arg(self.baud.to_string())
            .args(["-p", port])
            .subcommand("write_flash")
            .arg("--flash_mode")
            .arg(self.flash_mode.to_string())
            .arg("--flash_freq")
            .arg(&self.flash_freq)
            .arg("--flash_size")
            .arg(&self.flash_size);
        for (address, path) in images.write_order() {
            command = command
                .arg(format!("{:#x}", address))
                .arg(path.to_string_lossy());
        }
        command
    }

    pub fn read_mac(&self, port: &str) -> ToolCommand {
        ToolCommand::new(&self.esptool)
            .args(["--chip", self.chip.as_str(), "-p", port])
            .subcommand("read_mac")
    }
}

static PROGRESS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[[=>\s-]*\]\s*(\d{1,3}(?:\.\d+)?)\s*%").expect("progress regex is valid")
});

/// Extracts the percentage from a progress bar line such as
/// `[====>     ] 42.5%`. Anything else yields `None`.
pub fn parse_progress_line(line: &str) -> Option<f32> {
    let caps = PROGRESS_RE.captures(line)?;
    let percent: f32 = caps.get(1)?.as_str().parse().ok()?;
    (0.0..=100.0).contains(&percent).then_some(percent)
}

/// Extracts the lower-cased address from a `MAC: aa:bb:..` line.
pub fn parse_mac_line(line: &str) -> Option<String> {
    let (_, mac) = line.split_once("MAC:")?;
    let mac = mac.trim();
    if mac.is_empty() {
        None
    } else {
        Some(mac.to_lowercase())
    }
}
