use anyhow::Result;
use colored::Colorize;
use std::path::PathBuf;
use telemetry_gateway::{config, init_tracing, server};
use tracing::info;

/// Execute the start command
///
/// Tracing is initialized after the configuration is loaded so that the
/// configured level and format apply from the first log line.
pub async fn execute(config_path: PathBuf) -> Result<()> {
    println!("{}", "Starting telemetry gateway...".green());

    let cfg = config::load_config(&config_path)?;
    init_tracing(&cfg.server);

    info!(config = %config_path.display(), "Starting telemetry gateway");

    // Blocks until shutdown
    server::start_server(cfg, config_path).await?;

    Ok(())
}
