//! owfsd - 1-Wire filesystem daemon
//!
//! Opens the configured bus masters and serves the filesystem callbacks
//! over HTTP.

mod api;
mod config;
mod server;
mod state;

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "owfsd")]
#[command(about = "1-Wire virtual filesystem daemon")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "owfs.toml")]
    config: PathBuf,

    /// Bind address for web server
    #[arg(short, long)]
    bind: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Search every bus once, print the devices and exit
    #[arg(long)]
    scan_once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!("owfsd v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let mut config = config::load_config(&args.config)?;

    // Override bind address if specified
    if let Some(bind) = args.bind {
        config.daemon.bind = bind;
    }

    info!(
        buses = config.buses.len(),
        scale = %config.units.temperature_scale,
        "Configuration loaded"
    );

    let bind = config.daemon.bind.clone();
    let state = state::AppState::new(config)?;

    if args.scan_once {
        info!("Running single bus search");
        let scan = state.clone();
        let results = tokio::task::spawn_blocking(move || scan.ctx.scanner().survey()).await?;
        for (index, result) in results {
            let name = state.ctx.bus(index).map(|bus| bus.name().to_string()).unwrap_or_default();
            match result {
                Ok(devices) => {
                    println!("bus.{} ({}): {} devices", index, name, devices.len());
                    for address in devices {
                        let device = state.ctx.registry().find_family(address.family());
                        println!("  - {} {}", address, device.name());
                    }
                }
                Err(e) => println!("bus.{} ({}): search failed: {}", index, name, e),
            }
        }
    } else {
        server::run(state, &bind).await?;
    }

    Ok(())
}
