use std::str::FromStr;

use serde::{Deserialize, Serialize};
use smartprog_lib::FlashMode;

/// Default values of the programmer
pub struct Defaults;

impl Defaults {
    pub const PORT: &'static str = "/dev/ttyS0";
    pub const FLASH_DIR: &'static str = "/root/smart_programmer/firmware";
    pub const BOOT_PIN: u8 = 24;
    pub const EN_PIN: u8 = 23;
    pub const CHIP: &'static str = "esp32";
    pub const BAUD: u32 = 460800;
    pub const FLASH_VOLTAGE: &'static str = "3.3V";
    pub const FLASH_MODE: &'static str = "dio";
    pub const FLASH_FREQ: &'static str = "40m";
    pub const FLASH_SIZE: &'static str = "4MB";
    pub const ESPTOOL: &'static str = "esptool.py";
    pub const ESPEFUSE: &'static str = "espefuse.py";
    pub const VARIANT_MARKERS: [&'static str; 4] = ["sw_nvs_a", "sw_a", "lr_a", "lr_nvs_a"];
    pub const LOG_BAUD: u32 = 115200;
    pub const ALERT_MARKERS: [&'static str; 1] = ["ReportBuilder:"];
}

/// Root of the JSON configuration file. Every field may be omitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SmartProgConfig {
    #[serde(default = "default_port")]
    pub port: String,
    #[serde(default = "default_flash_dir")]
    pub flash_dir: String,
    #[serde(default = "default_boot_pin")]
    pub boot_pin: u8,
    #[serde(default = "default_en_pin")]
    pub en_pin: u8,
    #[serde(default = "default_chip")]
    pub chip: String,
    #[serde(default = "default_baud")]
    pub baud: u32,
    #[serde(default = "default_flash_voltage")]
    pub flash_voltage: String,
    #[serde(default = "default_flash_mode")]
    pub flash_mode: String,
    #[serde(default = "default_flash_freq")]
    pub flash_freq: String,
    #[serde(default = "default_flash_size")]
    pub flash_size: String,
    #[serde(default = "default_esptool")]
    pub esptool: String,
    #[serde(default = "default_espefuse")]
    pub espefuse: String,
    #[serde(default = "default_variant_markers")]
    pub variant_markers: Vec<String>,
    /// Per-invocation limit for the external tools. Absent means no limit.
    #[serde(default)]
    pub tool_timeout_secs: Option<u64>,
    #[serde(default = "default_log_baud")]
    pub log_baud: u32,
    #[serde(default = "default_alert_markers")]
    pub alert_markers: Vec<String>,
}

fn default_port() -> String {
    Defaults::PORT.to_string()
}
fn default_flash_dir() -> String {
    Defaults::FLASH_DIR.to_string()
}
fn default_boot_pin() -> u8 {
    Defaults::BOOT_PIN
}
fn default_en_pin() -> u8 {
    Defaults::EN_PIN
}
fn default_chip() -> String {
    Defaults::CHIP.to_string()
}
fn default_baud() -> u32 {
    Defaults::BAUD
}
fn default_flash_voltage() -> String {
    Defaults::FLASH_VOLTAGE.to_string()
}
fn default_flash_mode() -> String {
    Defaults::FLASH_MODE.to_string()
}
fn default_flash_freq() -> String {
    Defaults::FLASH_FREQ.to_string()
}
fn default_flash_size() -> String {
    Defaults::FLASH_SIZE.to_string()
}
fn default_esptool() -> String {
    Defaults::ESPTOOL.to_string()
}
fn default_espefuse() -> String {
    Defaults::ESPEFUSE.to_string()
}
fn default_variant_markers() -> Vec<String> {
    Defaults::VARIANT_MARKERS.iter().map(|m| m.to_string()).collect()
}
fn default_log_baud() -> u32 {
    Defaults::LOG_BAUD
}
fn default_alert_markers() -> Vec<String> {
    Defaults::ALERT_MARKERS.iter().map(|m| m.to_string()).collect()
}

impl Default for SmartProgConfig {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl SmartProgConfig {
    /// Loads the configuration from a JSON file
    pub fn from_file(path: &str) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        let content = std::fs::read_to_string(path)?;
        let config: SmartProgConfig = serde_json::from_str(&content)?;
        Ok(config)
    }

    pub fn with_defaults() -> Self {
        Self {
            port: default_port(),
            flash_dir: default_flash_dir(),
            boot_pin: default_boot_pin(),
            en_pin: default_en_pin(),
            chip: default_chip(),
            baud: default_baud(),
            flash_voltage: default_flash_voltage(),
            flash_mode: default_flash_mode(),
            flash_freq: default_flash_freq(),
            flash_size: default_flash_size(),
            esptool: default_esptool(),
            espefuse: default_espefuse(),
            variant_markers: default_variant_markers(),
            tool_timeout_secs: None,
            log_baud: default_log_baud(),
            alert_markers: default_alert_markers(),
        }
    }

    pub fn parse_flash_mode(&self) -> Result<FlashMode, String> {
        FlashMode::from_str(&self.flash_mode.to_lowercase())
            .map_err(|_| format!("Invalid flash mode: {}", self.flash_mode))
    }

    /// Checks the configuration before anything touches the device
    pub fn validate(&self) -> Result<(), String> {
        if self.port.trim().is_empty() {
            return Err("Port must not be empty".to_string());
        }
        if self.flash_dir.trim().is_empty() {
            return Err("Firmware directory must not be empty".to_string());
        }
        if self.boot_pin == self.en_pin {
            return Err(format!(
                "BOOT and EN must be different pins, both are {}",
                self.boot_pin
            ));
        }
        if self.baud == 0 || self.log_baud == 0 {
            return Err("Baud rates must be greater than zero".to_string());
        }
        if self.tool_timeout_secs == Some(0) {
            return Err("tool_timeout_secs must be greater than zero when set".to_string());
        }
        for (name, value) in [
            ("chip", &self.chip),
            ("flash_voltage", &self.flash_voltage),
            ("flash_freq", &self.flash_freq),
            ("flash_size", &self.flash_size),
            ("esptool", &self.esptool),
            ("espefuse", &self.espefuse),
        ] {
            if value.trim().is_empty() {
                return Err(format!("{} must not be empty", name));
            }
        }
        self.parse_flash_mode()?;
        Ok(())
    }
}
