use anyhow::{bail, Result};
use colored::Colorize;
use std::path::Path;
use telemetry_gateway::{
    auth::{sign_token, Claims},
    config,
};

/// Execute the token command
///
/// Prints a signed token for `role` to stdout so it can be piped into a client
pub fn execute(config_path: &Path, role: &str, ttl: u64) -> Result<()> {
    let cfg = config::load_config(config_path)?;
    let Some(secret) = cfg.auth.jwt_secret() else {
        bail!("No signing secret configured (auth.jwt_secret or JWT_SECRET)");
    };

    let claims = build_claims(role, ttl, chrono::Utc::now().timestamp())?;
    let token = sign_token(&claims, secret)?;

    let expiry = if claims.exp > 0 {
        format!("expires={}", claims.exp)
    } else {
        "no expiry".to_string()
    };
    eprintln!("{} role={} {}", "Signed token".green(), claims.role.cyan(), expiry.dimmed());
    println!("{}", token);

    Ok(())
}

fn build_claims(role: &str, ttl: u64, now: i64) -> Result<Claims> {
    if role.trim().is_empty() {
        bail!("Role cannot be empty");
    }
    let exp = match ttl {
        0 => 0,
        ttl => now.saturating_add(i64::try_from(ttl)?),
    };

    Ok(Claims {
        role: role.to_string(),
        exp,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_claims() {
        let claims = build_claims("user", 60, 1_000).unwrap();
        assert_eq!(claims.exp, 1_060);

        let forever = build_claims("admin", 0, 1_000).unwrap();
        assert_eq!(forever.exp, 0);

        assert!(build_claims(" ", 60, 1_000).is_err());
    }
}
