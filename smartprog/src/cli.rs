use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Result, anyhow, bail};
use clap::{Parser, Subcommand};
use smartprog_lib::{EsptoolConfig, FlashMode};

use crate::config::SmartProgConfig;

/// Effective settings after merging the config file and the command line.
#[derive(Debug, Clone, PartialEq)]
pub struct MergedConfig {
    pub port: String,
    pub flash_dir: PathBuf,
    pub boot_pin: u8,
    pub en_pin: u8,
    pub esptool: EsptoolConfig,
    pub tool_timeout: Option<Duration>,
    pub variant_markers: Vec<String>,
    pub log_baud: u32,
    pub alert_markers: Vec<String>,
    pub dry_run: bool,
    pub quiet: bool,
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Hand-held ESP32 programmer", long_about = None)]
pub struct Cli {
    /// JSON configuration file path
    #[arg(long = "config", short = 'f')]
    pub config: Option<String>,

    /// Serial port of the target (default: /dev/ttyS0)
    #[arg(short = 'p', long = "port")]
    pub port: Option<String>,

    /// Directory holding one sub-directory per firmware version
    #[arg(short = 'd', long = "flash-dir")]
    pub flash_dir: Option<String>,

    /// BCM number of the GPIO wired to the target's BOOT strap (default: 24)
    #[arg(long = "boot-pin")]
    pub boot_pin: Option<u8>,

    /// BCM number of the GPIO wired to the target's EN/reset line (default: 23)
    #[arg(long = "en-pin")]
    pub en_pin: Option<u8>,

    /// Baud rate used by esptool (default: 460800)
    #[arg(short = 'b', long = "baud")]
    pub baud: Option<u32>,

    /// Chip name passed to esptool (default: esp32)
    #[arg(short = 'c', long = "chip")]
    pub chip: Option<String>,

    /// SPI flash mode (default: dio)
    #[arg(long = "flash-mode", value_enum)]
    pub flash_mode: Option<FlashMode>,

    /// Kill an external tool that runs longer than this many seconds
    #[arg(long = "timeout")]
    pub timeout: Option<u64>,

    /// Log the BOOT/EN writes instead of driving GPIO
    #[arg(long = "dry-run")]
    pub dry_run: bool,

    /// Suppress progress bar output (default: false)
    #[arg(short = 'q', long = "quiet")]
    pub quiet: bool,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// List the firmware versions, newest first
    #[command(name = "versions")]
    Versions,

    /// List the variant data files of a firmware version
    #[command(name = "variants")]
    Variants(Variants),

    /// Flash a firmware version with one of its variants
    #[command(name = "flash")]
    Flash(Flash),

    /// Read the factory MAC address of the target
    #[command(name = "read_mac")]
    ReadMac,

    /// Follow the target's UART log
    #[command(name = "monitor")]
    Monitor(Monitor),
}

#[derive(Parser, Debug, Clone, PartialEq, Eq)]
#[command(about = "List the variant data files of a firmware version")]
pub struct Variants {
    /// Firmware version, e.g. 2.0.47
    #[arg(required = true)]
    pub version: String,

    /// Also list variants that match none of the configured markers
    #[arg(short = 'a', long = "all")]
    pub all: bool,
}

#[derive(Parser, Debug, Clone, PartialEq, Eq)]
#[command(about = "Flash a firmware version with one of its variants")]
pub struct Flash {
    /// Firmware version, e.g. 2.0.47
    #[arg(required = true)]
    pub version: String,

    /// Variant name, with or without the _0x9000.bin suffix
    #[arg(required = true)]
    pub variant: String,
}

#[derive(Parser, Debug, Clone, PartialEq, Eq)]
#[command(about = "Follow the target's UART log")]
pub struct Monitor {
    /// Log baud rate (default: 115200)
    #[arg(long = "log-baud")]
    pub log_baud: Option<u32>,

    /// Wrap width in characters
    #[arg(long = "width", default_value_t = 80)]
    pub width: usize,
}

/// Merge CLI arguments with configuration file, CLI args take precedence
pub fn merge_config(args: &Cli, config: Option<SmartProgConfig>) -> Result<MergedConfig> {
    let base_config = config.unwrap_or_else(SmartProgConfig::with_defaults);
    base_config
        .validate()
        .map_err(|e| anyhow!("Invalid configuration: {}", e))?;

    let flash_mode = match args.flash_mode {
        Some(mode) => mode,
        None => base_config
            .parse_flash_mode()
            .map_err(|e| anyhow!("Invalid flash mode in config: {}", e))?,
    };

    let port = args
        .port
        .clone()
        .unwrap_or_else(|| base_config.port.clone());
    let flash_dir = args
        .flash_dir
        .clone()
        .unwrap_or_else(|| base_config.flash_dir.clone());
    let boot_pin = args.boot_pin.unwrap_or(base_config.boot_pin);
    let en_pin = args.en_pin.unwrap_or(base_config.en_pin);
    let baud = args.baud.unwrap_or(base_config.baud);
    let chip = args.chip.clone().unwrap_or_else(|| base_config.chip.clone());
    let timeout_secs = args.timeout.or(base_config.tool_timeout_secs);
    let log_baud = match &args.command {
        Commands::Monitor(monitor) => monitor.log_baud.unwrap_or(base_config.log_baud),
        _ => base_config.log_baud,
    };

    if port.is_empty() {
        bail!("Port must be specified either via --port or in config file");
    }
    if boot_pin == en_pin {
        bail!("BOOT and EN must be different pins, both are {}", boot_pin);
    }
    if baud == 0 || log_baud == 0 {
        bail!("Baud rates must be greater than zero");
    }
    if timeout_secs == Some(0) {
        bail!("--timeout must be greater than zero");
    }

    Ok(MergedConfig {
        port,
        flash_dir: PathBuf::from(flash_dir),
        boot_pin,
        en_pin,
        esptool: EsptoolConfig {
            esptool: base_config.esptool,
            espefuse: base_config.espefuse,
            chip,
            baud,
            flash_voltage: base_config.flash_voltage,
            flash_mode,
            flash_freq: base_config.flash_freq,
            flash_size: base_config.flash_size,
        },
        tool_timeout: timeout_secs.map(Duration::from_secs),
        variant_markers: base_config.variant_markers,
        log_baud,
        alert_markers: base_config.alert_markers,
        dry_run: args.dry_run,
        quiet: args.quiet,
    })
}
