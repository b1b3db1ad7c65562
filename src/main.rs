//! TRITON Submarine Bridge Simulation
//!
//! Main entry point for the TRITON simulation engine. Wires settings,
//! logging, the telemetry bus, and the append-only event store around
//! the authoritative tick loop.

use clap::{Parser, Subcommand};
use log::{LevelFilter, error, info};
use std::path::PathBuf;
use std::sync::Arc;
use triton::bus::TelemetryBus;
use triton::config::SimConfig;
use triton::sim::simulation::Simulation;
use triton::storage::JsonlEventStore;

/// TRITON - Submarine Bridge Simulation Engine
#[derive(Parser, Debug)]
#[command(name = "triton")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the TRITON simulation
    Start {
        /// Path to the data directory (settings, catalogs, event store)
        #[arg(short, long, default_value = "./data")]
        data_dir: PathBuf,

        /// Log level (error, warn, info, debug, trace)
        #[arg(short, long, default_value = "info")]
        log_level: String,

        /// RNG seed; 0 derives one from the clock
        #[arg(short, long, default_value_t = 0)]
        seed: u64,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Start {
            data_dir,
            log_level,
            seed,
        } => {
            let level_filter = match log_level.to_lowercase().as_str() {
                "error" => LevelFilter::Error,
                "warn" => LevelFilter::Warn,
                "info" => LevelFilter::Info,
                "debug" => LevelFilter::Debug,
                "trace" => LevelFilter::Trace,
                _ => {
                    eprintln!("Invalid log level '{}', defaulting to 'info'", log_level);
                    LevelFilter::Info
                }
            };

            env_logger::Builder::new()
                .filter_level(level_filter)
                .init();

            info!("Starting TRITON simulation");
            info!("Data directory: {}", data_dir.display());

            let mut config = match SimConfig::load_from_directory(&data_dir) {
                Ok(cfg) => {
                    info!("Settings loaded successfully");
                    cfg
                }
                Err(e) => {
                    error!("Failed to load settings: {}", e);
                    return Err(e.into());
                }
            };
            if seed != 0 {
                config.seed = seed;
            }

            let bus = Arc::new(TelemetryBus::new());
            let store = Arc::new(JsonlEventStore::new(data_dir.join("store")));
            let mut sim = Simulation::new(config, bus, store);

            let stop = sim.stop_handle();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("Shutdown signal received");
                    stop.store(true, std::sync::atomic::Ordering::Relaxed);
                }
            });

            sim.run().await;
            Ok(())
        }
    }
}
