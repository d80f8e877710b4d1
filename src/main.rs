//! CLI Entry Point for instrument-gateway
//!
//! Provides command-line interface for:
//! - Serving the gateway (driver rescan, auto-connect, TCP front end)
//! - Scanning a driver directory and printing what was found
//!
//! # Usage
//!
//! Serve with the default configuration (`config/gateway.toml` + environment):
//! ```bash
//! instrument-gateway serve --port 8765
//! ```
//!
//! Inspect a driver directory:
//! ```bash
//! instrument-gateway scan --dir src/drivers
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use instrument_gateway::config::{GatewayConfig, DEFAULT_CONFIG_PATH};
use instrument_gateway::network::GatewayServer;
use instrument_gateway::{logging, scanner, Gateway};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "instrument-gateway")]
#[command(about = "Instrument-control gateway with driver discovery and RPC", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gateway
    Serve {
        /// Override server.port
        #[arg(long)]
        port: Option<u16>,
    },

    /// Scan a driver directory and print the descriptors as JSON
    Scan {
        /// Driver directory (defaults to drivers.directory)
        #[arg(long)]
        dir: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = GatewayConfig::load_from(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    logging::init_from_config(&config).map_err(anyhow::Error::msg)?;

    match cli.command {
        Commands::Serve { port } => {
            if let Some(port) = port {
                config.server.port = port;
            }
            serve(config).await
        }
        Commands::Scan { dir } => scan(dir.unwrap_or(config.drivers.directory)),
    }
}

async fn serve(config: GatewayConfig) -> Result<()> {
    info!("{} starting", config.application.name);
    let gateway = Arc::new(Gateway::from_config(&config)?);
    gateway.start().await?;

    let server = GatewayServer::bind(&config.listen_addr(), gateway.clone()).await?;
    let result = server
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for Ctrl-C: {}", e);
            }
        })
        .await;

    info!("Shutting down");
    gateway.shutdown().await;
    result?;
    Ok(())
}

fn scan(dir: PathBuf) -> Result<()> {
    let drivers: Vec<_> = scanner::scan_directory(&dir)
        .into_iter()
        .map(|d| {
            json!({
                "file": d.file,
                "module": d.module,
                "name": d.class_name,
                "class_doc": d.class_doc,
                "init": {
                    "positional_args": d.init_positional,
                    "keyword_args": d.init_keyword,
                },
                "functions": d.functions,
            })
        })
        .collect();
    println!("{}", serde_json::to_string_pretty(&drivers)?);
    Ok(())
}
