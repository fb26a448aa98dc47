use anyhow::{Context, Result, bail};
use std::path::Path;

pub fn normalize_port_name(port_name: &str) -> String {
    port_name.trim().to_string()
}

/// Fails unless `port_name` names a UART the target can be reached on.
pub fn check_port_available(port_name: &str) -> Result<()> {
    let known: Vec<String> = serialport::available_ports()
        .context("Failed to enumerate serial ports")?
        .into_iter()
        .map(|p| p.port_name)
        .collect();
    accept_port(port_name, &known)
}

// The Pi's built-in UARTs (/dev/ttyS0, /dev/serial0) are often missing from
// enumeration, so an existing node under /dev is good enough.
fn accept_port(port_name: &str, known: &[String]) -> Result<()> {
    if known.iter().any(|p| p == port_name) {
        return Ok(());
    }
    if port_name.starts_with("/dev/") && Path::new(port_name).exists() {
        tracing::debug!("Using {} without enumeration", port_name);
        return Ok(());
    }

    let listed = if known.is_empty() {
        "none found".to_string()
    } else {
        known.join(", ")
    };
    bail!("Serial port '{}' not found (known ports: {})", port_name, listed)
}
