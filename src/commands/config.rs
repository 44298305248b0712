use anyhow::Result;
use colored::Colorize;
use std::path::Path;
use telemetry_gateway::config::{self, Config};
use tracing::info;

/// Execute the config show command
///
/// Displays the current configuration with secrets masked
pub fn show(config_path: &Path) -> Result<()> {
    println!("{}", "Loading configuration...".yellow());
    info!("Loading configuration for display");

    let cfg = config::load_config(config_path)?;
    let sanitized = sanitize_secrets(&cfg);

    println!("{}", "Current Configuration:".green().bold());
    println!();

    let toml_string = toml::to_string_pretty(&sanitized)?;
    println!("{}", toml_string);

    info!("Configuration displayed successfully");
    Ok(())
}

/// Execute the config validate command
pub fn validate(config_path: &Path) -> Result<()> {
    println!("{}", "Validating configuration...".yellow());
    info!("Validating configuration file");

    let cfg = config::load_config(config_path)?;

    println!("{}", "✓ Configuration is valid".green());
    println!();
    println!("{}", "Summary:".bold());
    println!("  Authentication: {}", if cfg.auth.is_enabled() { "enabled" } else { "disabled" });
    println!("  Role-protected paths: {}", cfg.auth.endpoint_roles.len());
    println!("  Public paths: {}", cfg.auth.public_paths.len());

    info!("Configuration validation successful");
    Ok(())
}

/// Sanitize secrets in configuration for safe display
fn sanitize_secrets(cfg: &Config) -> Config {
    let mut sanitized = cfg.clone();
    sanitized.auth.api_key = sanitized.auth.api_key.as_deref().map(mask_secret);
    sanitized.auth.jwt_secret = sanitized.auth.jwt_secret.as_deref().map(mask_secret);
    sanitized
}

/// Mask a secret for safe display
///
/// Shows first 4 and last 4 characters with an ellipsis in between
/// Example: "tg-1234567890abcdef" -> "tg-1...cdef"
fn mask_secret(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();
    if chars.len() <= 11 {
        // Too short to mask meaningfully
        return "***".to_string();
    }

    let prefix: String = chars[..4].iter().collect();
    let suffix: String = chars[chars.len() - 4..].iter().collect();

    format!("{}...{}", prefix, suffix)
}
