mod cli;
mod commands;
mod config;
mod progress;
mod serial;

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use std::process;

use crate::cli::{Cli, Commands, merge_config};
use crate::config::SmartProgConfig;

fn main() {
    let args = Cli::parse();

    // RUST_LOG wins over --verbose, e.g. RUST_LOG=smartprog_lib=trace shows
    // every line printed by esptool.
    let default_filter = if args.verbose {
        "smartprog=debug,smartprog_lib=debug"
    } else {
        "smartprog=info,smartprog_lib=info"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run(args) {
        eprintln!("Error: {:?}", e);
        process::exit(1);
    }
}

fn run(args: Cli) -> Result<()> {
    let config = match &args.config {
        Some(path) => Some(
            SmartProgConfig::from_file(path)
                .map_err(|e| anyhow!("{}", e))
                .with_context(|| format!("Failed to load config file {}", path))?,
        ),
        None => None,
    };
    let mut config = merge_config(&args, config)?;
    config.port = serial::normalize_port_name(&config.port);

    let needs_port = matches!(
        args.command,
        Commands::Flash(_) | Commands::ReadMac | Commands::Monitor(_)
    );
    if needs_port && !config.dry_run {
        serial::check_port_available(&config.port)?;
    }

    match &args.command {
        Commands::Versions => commands::versions(&config),
        Commands::Variants(params) => commands::variants(&config, params),
        Commands::Flash(params) => commands::flash(&config, params),
        Commands::ReadMac => commands::read_mac(&config),
        Commands::Monitor(params) => commands::monitor(&config, params),
    }
}
