use anyhow::Result;
use colored::Colorize;
use std::path::Path;
use telemetry_gateway::config;
use tracing::info;

/// Execute the test command
///
/// This validates the configuration file without starting the server
pub fn execute(config_path: &Path) -> Result<()> {
    println!("{}", "Testing configuration...".yellow());
    info!("Loading and validating configuration");

    let cfg = config::load_config(config_path)?;

    println!("{}", "✓ Configuration test successful".green());
    println!();

    println!("{}", "Configuration Summary:".bold());
    println!("  {}: {}:{}", "Server".cyan(), cfg.server.host, cfg.server.port);
    println!("  {}: {}", "Log Level".cyan(), cfg.server.log_level);
    println!("  {}: {}", "Log Format".cyan(), cfg.server.log_format);
    println!("  {}: {}", "Database".cyan(), cfg.database.url);
    println!();

    println!(
        "  {}: {} requests / {}s per client",
        "Rate Limit".cyan(),
        cfg.rate_limit.requests_per_window,
        cfg.rate_limit.window_seconds
    );
    println!();

    let auth_status = if cfg.auth.is_enabled() {
        "enabled".green()
    } else {
        "DISABLED".red()
    };
    println!("  {}: {}", "Authentication".cyan(), auth_status);
    println!(
        "    API key: {}  Signed tokens: {}",
        yes_no(cfg.auth.api_key().is_some()),
        yes_no(cfg.auth.jwt_secret().is_some())
    );
    let mut roles: Vec<_> = cfg.auth.endpoint_roles.iter().collect();
    roles.sort();
    for (path, role) in roles {
        println!("    {} → {}", path, role);
    }
    println!();

    println!("  {}: {}", "Max Bulk Entries".cyan(), cfg.ingest.max_bulk_entries);
    println!("  {}: {}", "Metrics".cyan(), if cfg.metrics.enabled {
        "enabled".green()
    } else {
        "disabled".red()
    });
    if cfg.metrics.enabled {
        println!("    Endpoint: {}", cfg.metrics.endpoint);
    }

    info!("Configuration validation completed successfully");
    Ok(())
}

fn yes_no(value: bool) -> colored::ColoredString {
    if value {
        "yes".green()
    } else {
        "no".dimmed()
    }
}
