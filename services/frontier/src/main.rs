//! Frontier gateway binary
//!
//! Usage:
//!   frontier --config frontier.yaml
//!   FRONTIER_EXCHANGE__HASH_BY=srcip frontier --log-level debug

use anyhow::Result;
use clap::Parser;
use frontier::Frontier;
use frontier_config::FrontierConfig;
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "frontier")]
#[command(about = "Bidirectional edge/service gateway")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Enable JSON logging format
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args);

    let config = FrontierConfig::load(args.config.as_deref()).map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;
    config.daemon.rlimit.apply();

    info!(
        edgebound = %config.edgebound.listen.addr,
        servicebound = %config.servicebound.listen.addr,
        hash_by = ?config.exchange.hash_by,
        "Starting Frontier"
    );
    let frontier = Frontier::bind(&config).await?;

    tokio::signal::ctrl_c().await?;
    info!("Received shutdown signal");
    frontier.close().await;
    Ok(())
}

fn init_logging(args: &Args) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    if args.json_logs {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}
