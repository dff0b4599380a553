//! # DIA Gateway Binary
//!
//! Loads a settings document, brings up every logger, device,
//! presentation and service it lists, and runs until interrupted.
//!
//! # Usage
//!
//! ```bash
//! # TOML settings in the working directory
//! dia
//!
//! # YAML settings, verbose logging
//! dia --settings gateway.yaml -v
//!
//! # Extension-less file, explicit format, JSON logs
//! dia --settings /etc/dia/settings --format json --json
//! ```

use clap::Parser;
use dia_common::config::{LogLevel, TracingConfig};
use dia_common::settings::SettingsFormat;
use dia_core::driver_registry::DriverCatalog;
use dia_core::gateway::Gateway;
use dia_core::settings::SettingsContext;
use std::path::PathBuf;
use tracing::{error, info};

/// DIA gateway - device integration runtime
#[derive(Parser, Debug)]
#[command(name = "dia")]
#[command(version)]
#[command(about = "Device integration gateway runtime")]
#[command(long_about = None)]
struct Args {
    /// Settings document (TOML, YAML or JSON).
    #[arg(short, long, default_value = "dia.toml")]
    settings: PathBuf,

    /// Settings format; guessed from the file extension when omitted.
    #[arg(short, long)]
    format: Option<SettingsFormat>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Output logs in JSON format
    #[arg(long)]
    json: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    if let Err(e) = run() {
        error!("Gateway failed: {}", e);
        eprintln!("dia: {e}");
        std::process::exit(1);
    }
    Ok(())
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let settings = SettingsContext::load(&args.settings, args.format)?;
    let tracing_config = TracingConfig::from_document(&settings.pending_snapshot())?;
    setup_tracing(&args, tracing_config);

    info!("DIA gateway v{} starting...", env!("CARGO_PKG_VERSION"));
    info!("Settings: {} ({})", args.settings.display(), settings.format_name());

    let gateway = Gateway::new(settings, DriverCatalog::with_builtin_drivers())?;

    let signal = gateway.shutdown_signal();
    ctrlc::set_handler(move || {
        info!("Received shutdown signal");
        signal.request();
    })?;

    gateway.run()?;

    info!("DIA gateway shutdown complete");
    Ok(())
}

/// Setup tracing subscriber from the document's `tracing` section and
/// the command line, which wins.
fn setup_tracing(args: &Args, mut config: TracingConfig) {
    if args.verbose {
        config.level = LogLevel::Debug;
    }
    let filter = config.env_filter();

    if args.json || config.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}
