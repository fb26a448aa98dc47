use std::sync::{Arc, Mutex};
use std::thread;

use anyhow::{Context, Result, anyhow, bail};
use smartprog_lib::image_set::{VARIANT_SUFFIX, variant_base};
use smartprog_lib::{
    BootloaderController, FlashService, Flasher, LogBuffer, LogReader, NullLine, OutputLine,
    ProcessRunner, SharedProgress, list_variants, list_versions,
};

use crate::cli::{Flash, MergedConfig, Monitor, Variants};
use crate::progress::{self, TICK};

type Line = Box<dyn OutputLine>;
type CliFlasher = Flasher<Line, ProcessRunner>;

/// Lines of the tool log echoed after a failed attempt.
const FAILURE_TAIL_LINES: usize = 15;
/// Rows shown by `monitor` when following the log.
const MONITOR_ROWS: usize = 24;

pub fn versions(config: &MergedConfig) -> Result<()> {
    let versions = list_versions(&config.flash_dir)
        .with_context(|| format!("Failed to list {}", config.flash_dir.display()))?;
    if versions.is_empty() {
        bail!("No firmware versions in {}", config.flash_dir.display());
    }
    for version in versions {
        println!("{}", version);
    }
    Ok(())
}

pub fn variants(config: &MergedConfig, args: &Variants) -> Result<()> {
    let version_dir = config.flash_dir.join(&args.version);
    let markers: &[String] = if args.all {
        &[]
    } else {
        &config.variant_markers
    };
    let variants = list_variants(&version_dir, markers)
        .with_context(|| format!("Failed to list variants of {}", args.version))?;
    if variants.is_empty() {
        bail!("No variants in {}", version_dir.display());
    }
    for variant in variants {
        println!("{}", variant);
    }
    Ok(())
}

pub fn flash(config: &MergedConfig, args: &Flash) -> Result<()> {
    let base = variant_base(&args.variant).context("Invalid variant name")?;
    let variant_file = config
        .flash_dir
        .join(&args.version)
        .join(format!("{}{}", base, VARIANT_SUFFIX));

    let service = FlashService::new(build_flasher(config)?);
    let shared = Arc::new(SharedProgress::new());
    let handle = service
        .start(variant_file, Arc::clone(&shared))
        .context("Failed to start flashing")?;

    let mut view = progress::create_progress_view(config.quiet);
    progress::watch(&handle, &shared, view.as_mut());

    let outcome = handle.join()?;
    if outcome.success {
        println!("{} {} flashed", args.version, base);
        return Ok(());
    }

    let tail = shared.log_tail();
    for line in &tail[tail.len().saturating_sub(FAILURE_TAIL_LINES)..] {
        eprintln!("  | {}", line);
    }
    let stage = outcome
        .failed_in
        .map(|state| format!(" while {}", state))
        .unwrap_or_default();
    match outcome.error {
        Some(e) => Err(anyhow!(e)).context(format!("Flashing failed{}", stage)),
        None => bail!("Flashing failed{}", stage),
    }
}

pub fn read_mac(config: &MergedConfig) -> Result<()> {
    let mut flasher = build_flasher(config)?;
    let mac = flasher
        .read_mac_address()
        .context("Failed to read MAC address")?;
    println!("{}", mac);
    Ok(())
}

pub fn monitor(config: &MergedConfig, args: &Monitor) -> Result<()> {
    let buffer = Arc::new(Mutex::new(LogBuffer::new(
        args.width,
        MONITOR_ROWS,
        config.alert_markers.clone(),
    )));
    let mut reader = LogReader::start(&config.port, config.log_baud, Arc::clone(&buffer))
        .with_context(|| format!("Failed to open {}", config.port))?;

    let mut seen = 0;
    loop {
        let running = reader.is_running();
        {
            let log = buffer.lock().unwrap_or_else(|e| e.into_inner());
            for row in log.rows_since(seen) {
                let marker = if log.is_alert(&row.text) { '!' } else { ' ' };
                let indent = if row.continued { "  " } else { "" };
                println!("{}{}{}", marker, indent, row.text);
            }
            seen = log.total_rows();
        }
        if !running {
            break;
        }
        thread::sleep(TICK);
    }
    reader.stop();
    Ok(())
}

fn build_flasher(config: &MergedConfig) -> Result<CliFlasher> {
    let (boot, enable) = open_lines(config)?;
    let flasher = Flasher::new(
        config.port.clone(),
        config.esptool.clone(),
        BootloaderController::new(boot, enable),
        ProcessRunner::with_timeout(config.tool_timeout),
    );
    tracing::debug!(
        "Target on {} ({} at {} baud)",
        flasher.port(),
        config.esptool.chip,
        config.esptool.baud
    );
    Ok(flasher)
}

fn open_lines(config: &MergedConfig) -> Result<(Line, Line)> {
    if config.dry_run {
        tracing::warn!("Dry run: BOOT/EN writes are only logged");
        return Ok((
            Box::new(NullLine::new(format!("BOOT/GPIO{}", config.boot_pin))),
            Box::new(NullLine::new(format!("EN/GPIO{}", config.en_pin))),
        ));
    }
    open_gpio_lines(config.boot_pin, config.en_pin)
}

#[cfg(feature = "raspberry")]
fn open_gpio_lines(boot_pin: u8, en_pin: u8) -> Result<(Line, Line)> {
    use smartprog_lib::RppalLine;

    let boot = RppalLine::open(boot_pin)
        .with_context(|| format!("Failed to claim BOOT pin GPIO{}", boot_pin))?;
    let enable =
        RppalLine::open(en_pin).with_context(|| format!("Failed to claim EN pin GPIO{}", en_pin))?;
    Ok((Box::new(boot), Box::new(enable)))
}

#[cfg(not(feature = "raspberry"))]
fn open_gpio_lines(_boot_pin: u8, _en_pin: u8) -> Result<(Line, Line)> {
    bail!("Built without GPIO support: rebuild with `--features raspberry` or pass --dry-run")
}
