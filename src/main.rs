//! CLI entry point for the lab gateway daemon.
//!
//! # Usage
//!
//! Start the daemon with the default configuration:
//! ```bash
//! lab-gateway daemon
//! ```
//!
//! Override the port and config profile:
//! ```bash
//! lab-gateway daemon --port 50060 --config bench
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};
use lab_gateway::{grpc, telemetry, Settings};
use tracing::info;

#[derive(Parser)]
#[command(name = "lab-gateway")]
#[command(about = "gRPC gateway for bench instrument control", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gateway daemon
    Daemon {
        /// gRPC port (overrides the config file)
        #[arg(long)]
        port: Option<u16>,

        /// Config profile name, loaded from config/{name}.toml
        #[arg(long)]
        config: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Daemon { port, config } => {
            let mut settings = Settings::new(config.as_deref())?;
            if let Some(port) = port {
                settings.server.port = port;
            }

            telemetry::init(&settings.log_level)
                .map_err(|e| anyhow::anyhow!("failed to initialise tracing: {}", e))?;
            info!(port = settings.server.port, "starting lab gateway");
            grpc::start_server(settings).await
        }
    }
}
