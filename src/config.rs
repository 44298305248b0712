use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Environment variable prefix for layered overrides, e.g.
/// `TELEMETRY_GATEWAY__RATE_LIMIT__REQUESTS_PER_WINDOW=120`
pub const ENV_PREFIX: &str = "TELEMETRY_GATEWAY";

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// "text" or "json"
    #[serde(default = "default_log_format")]
    pub log_format: String,
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            log_level: default_log_level(),
            log_format: default_log_format(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    /// SQLite database URL (e.g., "sqlite://./data/telemetry.db")
    #[serde(default = "default_database_url")]
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_acquire_timeout_seconds")]
    pub acquire_timeout_seconds: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            max_connections: default_max_connections(),
            acquire_timeout_seconds: default_acquire_timeout_seconds(),
        }
    }
}

/// Admission control settings (fixed window per client)
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_requests_per_window")]
    pub requests_per_window: u32,
    #[serde(default = "default_window_seconds")]
    pub window_seconds: u64,
    /// How often expired client buckets are evicted
    #[serde(default = "default_sweep_interval_seconds")]
    pub sweep_interval_seconds: u64,
    /// Path that bypasses admission entirely
    #[serde(default = "default_health_path")]
    pub health_path: String,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_window: default_requests_per_window(),
            window_seconds: default_window_seconds(),
            sweep_interval_seconds: default_sweep_interval_seconds(),
            health_path: default_health_path(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AuthConfig {
    /// Static shared secret; a match always resolves to the admin role
    #[serde(default)]
    pub api_key: Option<String>,
    /// Secret used to sign and verify role tokens
    #[serde(default)]
    pub jwt_secret: Option<String>,
    /// Authenticated-router paths exempted from credential extraction.
    /// Health, readiness and metrics routes are mounted outside the gate and
    /// need no entry here.
    #[serde(default)]
    pub public_paths: Vec<String>,
    /// Exact request path -> minimum required role
    #[serde(default = "default_endpoint_roles")]
    pub endpoint_roles: HashMap<String, String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            jwt_secret: None,
            public_paths: Vec::new(),
            endpoint_roles: default_endpoint_roles(),
        }
    }
}

impl AuthConfig {
    /// Configured shared secret, treating an empty string as absent
    pub fn api_key(&self) -> Option<&str> {
        self.api_key.as_deref().filter(|k| !k.is_empty())
    }

    /// Configured signing secret, treating an empty string as absent
    pub fn jwt_secret(&self) -> Option<&str> {
        self.jwt_secret.as_deref().filter(|s| !s.is_empty())
    }

    /// Authentication is disabled when neither secret is configured
    pub fn is_enabled(&self) -> bool {
        self.api_key().is_some() || self.jwt_secret().is_some()
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IngestConfig {
    #[serde(default = "default_max_bulk_entries")]
    pub max_bulk_entries: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            max_bulk_entries: default_max_bulk_entries(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,
    #[serde(default = "default_metrics_endpoint")]
    pub endpoint: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
            endpoint: default_metrics_endpoint(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

fn default_max_body_bytes() -> usize {
    10 * 1024 * 1024
}

fn default_database_url() -> String {
    "sqlite://./data/telemetry.db".to_string()
}

fn default_max_connections() -> u32 {
    10
}

fn default_acquire_timeout_seconds() -> u64 {
    30
}

fn default_requests_per_window() -> u32 {
    60
}

fn default_window_seconds() -> u64 {
    60
}

fn default_sweep_interval_seconds() -> u64 {
    300
}

fn default_health_path() -> String {
    "/health".to_string()
}

fn default_endpoint_roles() -> HashMap<String, String> {
    [
        "/api/metrics",
        "/api/logs",
        "/api/logs/bulk",
        "/api/traces",
        "/api/spans",
    ]
    .into_iter()
    .map(|path| (path.to_string(), "user".to_string()))
    .collect()
}

fn default_max_bulk_entries() -> usize {
    1000
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_metrics_endpoint() -> String {
    "/internal/metrics".to_string()
}

/// Load configuration from a TOML file (optional) layered with environment variables
pub fn load_config(path: &Path) -> anyhow::Result<Config> {
    let config = config::Config::builder()
        .add_source(config::File::from(path).required(false))
        .add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    let mut cfg: Config = config.try_deserialize()?;
    apply_legacy_env(&mut cfg);
    validate_config(&cfg)?;

    Ok(cfg)
}

/// `API_KEY` and `JWT_SECRET` predate the layered configuration and still win when set
fn apply_legacy_env(cfg: &mut Config) {
    if let Ok(key) = std::env::var("API_KEY") {
        if !key.is_empty() {
            cfg.auth.api_key = Some(key);
        }
    }
    if let Ok(secret) = std::env::var("JWT_SECRET") {
        if !secret.is_empty() {
            cfg.auth.jwt_secret = Some(secret);
        }
    }
}

pub fn validate_config(cfg: &Config) -> anyhow::Result<()> {
    if cfg.server.port == 0 {
        anyhow::bail!("Server port cannot be 0");
    }

    if !matches!(cfg.server.log_format.as_str(), "text" | "json") {
        anyhow::bail!(
            "Invalid log format '{}', expected 'text' or 'json'",
            cfg.server.log_format
        );
    }

    if cfg.database.url.is_empty() {
        anyhow::bail!("Database URL cannot be empty");
    }

    if cfg.rate_limit.requests_per_window == 0 {
        anyhow::bail!("rate_limit.requests_per_window must be at least 1");
    }

    if cfg.rate_limit.window_seconds == 0 {
        anyhow::bail!("rate_limit.window_seconds must be at least 1");
    }

    if cfg.rate_limit.window_seconds > crate::rate_limit::MAX_WINDOW.as_secs() {
        anyhow::bail!(
            "rate_limit.window_seconds must be at most {}",
            crate::rate_limit::MAX_WINDOW.as_secs()
        );
    }

    if cfg.ingest.max_bulk_entries == 0 {
        anyhow::bail!("ingest.max_bulk_entries must be at least 1");
    }

    for (path, role) in &cfg.auth.endpoint_roles {
        if role.is_empty() {
            anyhow::bail!("Endpoint role for '{}' cannot be empty", path);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_match_admission_contract() {
        let cfg = Config::default();
        assert_eq!(cfg.rate_limit.requests_per_window, 60);
        assert_eq!(cfg.rate_limit.window_seconds, 60);
        assert_eq!(cfg.rate_limit.health_path, "/health");
        assert!(cfg.auth.public_paths.is_empty());
        assert!(validate_config(&cfg).is_ok());
    }

    #[test]
    fn test_empty_secrets_disable_auth() {
        let mut cfg = Config::default();
        cfg.auth.api_key = Some(String::new());
        cfg.auth.jwt_secret = None;
        assert!(!cfg.auth.is_enabled());

        cfg.auth.jwt_secret = Some("signing-secret".to_string());
        assert!(cfg.auth.is_enabled());
    }

    #[test]
    fn test_validate_config_rejects_zero_limit() {
        let mut cfg = Config::default();
        cfg.rate_limit.requests_per_window = 0;

        let result = validate_config(&cfg);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("requests_per_window"));
    }

    #[test]
    fn test_validate_config_caps_window() {
        let mut cfg = Config::default();
        cfg.rate_limit.window_seconds = u64::MAX;

        let result = validate_config(&cfg);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("window_seconds"));

        cfg.rate_limit.window_seconds = crate::rate_limit::MAX_WINDOW.as_secs();
        assert!(validate_config(&cfg).is_ok());
    }

    #[test]
    fn test_validate_config_rejects_unknown_log_format() {
        let mut cfg = Config::default();
        cfg.server.log_format = "yaml".to_string();
        assert!(validate_config(&cfg).is_err());
    }

    #[test]
    fn test_load_config_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[server]
port = 9090

[rate_limit]
requests_per_window = 5
window_seconds = 10

[auth]
api_key = "secret-key"

[auth.endpoint_roles]
"/api/logs" = "writer"
"#
        )
        .unwrap();

        let cfg = load_config(file.path()).unwrap();
        assert_eq!(cfg.server.port, 9090);
        assert_eq!(cfg.server.host, "0.0.0.0");
        assert_eq!(cfg.rate_limit.requests_per_window, 5);
        assert_eq!(cfg.rate_limit.window_seconds, 10);
        assert_eq!(cfg.auth.endpoint_roles.get("/api/logs").map(String::as_str), Some("writer"));
        assert!(cfg.auth.is_enabled());
    }
}
