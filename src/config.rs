//! Configuration management
//!
//! Loads configuration from:
//! 1. Default values
//! 2. Configuration files (config/default.toml, config/local.toml)
//! 3. Environment variables (override)

use serde::Deserialize;
use std::collections::HashSet;
use std::path::PathBuf;

/// Largest accepted `pause_days` (about a century)
pub const MAX_PAUSE_DAYS: i64 = 36_500;

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub ap: ApConfig,
    pub database: DatabaseConfig,
    pub delivery: DeliveryConfig,
    pub logging: LoggingConfig,
    /// Days after the first recorded delivery failure before a destination
    /// stops receiving deliveries.
    pub pause_days: i64,
    /// Dedup cache capacity (object ids)
    #[serde(rename = "cache-size")]
    pub cache_size: u64,
    /// Operator note shown on the homepage
    #[serde(default)]
    pub note: String,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0")
    pub host: String,
    /// Port number (e.g., 8080)
    pub port: u16,
}

/// ActivityPub policy configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ApConfig {
    /// Public hostname of this relay (e.g., "relay.example.com")
    pub host: String,
    /// Only accept activities from whitelisted hosts
    #[serde(default)]
    pub whitelist_enabled: bool,
    #[serde(default)]
    pub whitelist: HashSet<String>,
    /// Hosts whose Follow requests are ignored
    #[serde(default)]
    pub blocked_instances: HashSet<String>,
    /// Lowercase nodeinfo software names that are refused outright
    #[serde(default)]
    pub blocked_software: HashSet<String>,
}

impl ApConfig {
    /// Relay actor URI, e.g. "https://relay.example.com/actor"
    pub fn actor_uri(&self) -> String {
        format!("https://{}/actor", self.host)
    }

    /// Key id used in outbound signatures
    pub fn key_id(&self) -> String {
        format!("https://{}/actor#main-key", self.host)
    }

    /// Whether a remote host passes whitelist mode.
    pub fn is_whitelisted(&self, host: &str) -> bool {
        !self.whitelist_enabled || self.whitelist.contains(host)
    }
}

/// Database configuration (SQLite only)
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to SQLite database file
    pub path: PathBuf,
}

/// Outbound delivery configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DeliveryConfig {
    /// Maximum number of in-flight outbound POSTs across the process
    pub max_concurrent: usize,
    /// HTTP client timeout in seconds
    pub timeout_seconds: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    pub level: String,
    /// Log format: "pretty" or "json"
    pub format: String,
}

impl AppConfig {
    /// Load configuration from file and environment
    ///
    /// # Loading Order
    /// 1. Default values
    /// 2. config/default.toml (if exists)
    /// 3. config/local.toml (if exists)
    /// 4. Environment variables (RELAY__*)
    ///
    /// # Errors
    /// Returns error if configuration is invalid
    pub fn load() -> Result<Self, crate::error::AppError> {
        use config::{Config, Environment, File};

        let config = Config::builder()
            // Start with default values
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.port", 8080)?
            .set_default("database.path", "relay.db")?
            .set_default("delivery.max_concurrent", 500)?
            .set_default("delivery.timeout_seconds", 30)?
            .set_default("ap.whitelist_enabled", false)?
            .set_default("pause_days", 7)?
            .set_default("cache-size", 16384)?
            .set_default("note", "Make a note about your instance here.")?
            .set_default("logging.level", "info")?
            .set_default("logging.format", "pretty")?
            // Load from config/default.toml if it exists
            .add_source(File::with_name("config/default").required(false))
            // Load from config/local.toml if it exists (overrides default)
            .add_source(File::with_name("config/local").required(false))
            // Load from environment variables (RELAY__*)
            .add_source(
                Environment::with_prefix("RELAY")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("ap.whitelist")
                    .with_list_parse_key("ap.blocked_instances")
                    .with_list_parse_key("ap.blocked_software")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| crate::error::AppError::Config(e.to_string()))?;

        let mut app_config: Self = config
            .try_deserialize()
            .map_err(|e| crate::error::AppError::Config(e.to_string()))?;
        app_config.normalize();
        app_config.validate()?;
        Ok(app_config)
    }

    /// Pause threshold as a chrono duration
    pub fn pause_threshold(&self) -> chrono::Duration {
        chrono::Duration::days(self.pause_days.clamp(0, MAX_PAUSE_DAYS))
    }

    /// Lowercase host sets so lookups match `url::Url::host_str` output.
    fn normalize(&mut self) {
        fn lower(set: &HashSet<String>) -> HashSet<String> {
            set.iter()
                .map(|entry| entry.trim().to_ascii_lowercase())
                .filter(|entry| !entry.is_empty())
                .collect()
        }

        self.ap.host = self.ap.host.trim().trim_end_matches('/').to_ascii_lowercase();
        self.ap.whitelist = lower(&self.ap.whitelist);
        self.ap.blocked_instances = lower(&self.ap.blocked_instances);
        self.ap.blocked_software = lower(&self.ap.blocked_software);
    }

    fn validate(&self) -> Result<(), crate::error::AppError> {
        if self.ap.host.is_empty() {
            return Err(crate::error::AppError::Config(
                "ap.host must be set to the relay's public hostname".to_string(),
            ));
        }

        if self.ap.host.contains("://") {
            return Err(crate::error::AppError::Config(
                "ap.host must be a bare hostname without a scheme".to_string(),
            ));
        }

        if self.pause_days < 0 {
            return Err(crate::error::AppError::Config(
                "pause_days must not be negative".to_string(),
            ));
        }

        if self.pause_days > MAX_PAUSE_DAYS {
            return Err(crate::error::AppError::Config(format!(
                "pause_days must not exceed {}",
                MAX_PAUSE_DAYS
            )));
        }

        if self.cache_size == 0 {
            return Err(crate::error::AppError::Config(
                "cache-size must be greater than 0".to_string(),
            ));
        }

        if self.delivery.max_concurrent == 0 {
            return Err(crate::error::AppError::Config(
                "delivery.max_concurrent must be greater than 0".to_string(),
            ));
        }

        if self.ap.whitelist_enabled && self.ap.whitelist.is_empty() {
            tracing::warn!("Whitelist mode is enabled with an empty whitelist; all activities will be refused");
        }

        Ok(())
    }
}
