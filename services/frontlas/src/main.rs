//! Frontlas locator binary
//!
//! Usage:
//!   frontlas --config frontlas.yaml
//!   FRONTLAS_REDIS__MODE=sentinel frontlas --json-logs

use anyhow::Result;
use clap::Parser;
use frontier_config::FrontlasConfig;
use frontlas::Frontlas;
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "frontlas")]
#[command(about = "Cluster locator for Frontier gateways")]
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

    let config = FrontlasConfig::load(args.config.as_deref()).map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;
    config.daemon.rlimit.apply();

    info!(
        redis_mode = %config.redis.mode,
        frontier_plane = %config.frontier_plane.listen.addr,
        control_plane = %config.control_plane.listen.addr,
        "Starting Frontlas"
    );
    let frontlas = Frontlas::bind(&config).await?;

    tokio::signal::ctrl_c().await?;
    info!("Received shutdown signal");
    frontlas.close().await;
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
