//! Configuration management for the Multi-Shop Commerce Platform
//!
//! Supports hierarchical configuration loading:
//! 1. Default values in code
//! 2. Configuration files (development.toml, production.toml)
//! 3. Environment variable overrides with SHOP_ prefix

use config::{ConfigError, Environment, File};
use serde::Deserialize;

/// Main application configuration
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Current environment (development, production)
    pub environment: String,

    /// Server configuration
    pub server: ServerConfig,

    /// Database configuration
    pub database: DatabaseConfig,

    /// JWT verification configuration
    pub jwt: JwtConfig,

    /// Order lifecycle settings
    pub orders: OrderSettings,

    /// Domain event outbox settings
    pub outbox: OutboxConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    /// Server port
    pub port: u16,

    /// Server host
    pub host: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,

    /// Maximum number of connections in the pool
    pub max_connections: u32,

    /// Minimum number of connections in the pool
    pub min_connections: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct JwtConfig {
    /// Secret key used to verify bearer tokens
    pub secret: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct OrderSettings {
    /// Days after delivery during which a return may be requested
    pub return_window_days: i64,

    /// Longest accepted X-Idempotency-Key; capped at the stored column width
    pub idempotency_key_max_len: usize,
}

impl OrderSettings {
    /// Key length accepted at the API, never above what the schema stores
    pub fn max_key_len(&self) -> usize {
        self.idempotency_key_max_len.min(shared::MAX_IDEMPOTENCY_KEY_LEN)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct OutboxConfig {
    /// Run the background dispatcher in this process
    pub enabled: bool,

    /// Delay between polls when the outbox is empty
    pub poll_interval_ms: u64,

    /// Events claimed per poll
    pub batch_size: i64,

    /// Attempts before an event is left for manual inspection
    pub max_attempts: i32,

    /// Webhook receiving events; events are only logged when unset
    pub webhook_url: Option<String>,

    /// Secret for the X-Signature HMAC header
    pub webhook_secret: Option<String>,

    /// Per-request timeout of webhook deliveries
    pub webhook_timeout_secs: u64,

    /// How long a claimed event stays invisible to other dispatchers
    pub lease_secs: i64,
}

impl Default for OrderSettings {
    fn default() -> Self {
        Self {
            return_window_days: 7,
            idempotency_key_max_len: shared::MAX_IDEMPOTENCY_KEY_LEN,
        }
    }
}

impl Config {
    /// Load configuration from files and environment variables
    pub fn load() -> Result<Self, ConfigError> {
        let environment = std::env::var("SHOP_ENVIRONMENT").unwrap_or_else(|_| "development".into());

        let config = config::Config::builder()
            // Start with default values
            .set_default("environment", environment.clone())?
            .set_default("server.port", 3000)?
            .set_default("server.host", "0.0.0.0")?
            .set_default("database.max_connections", 10)?
            .set_default("database.min_connections", 2)?
            .set_default("orders.return_window_days", 7)?
            .set_default(
                "orders.idempotency_key_max_len",
                shared::MAX_IDEMPOTENCY_KEY_LEN as u64,
            )?
            .set_default("outbox.enabled", true)?
            .set_default("outbox.poll_interval_ms", 1000)?
            .set_default("outbox.batch_size", 50)?
            .set_default("outbox.max_attempts", 10)?
            .set_default("outbox.webhook_timeout_secs", 10)?
            .set_default("outbox.lease_secs", 60)?
            // Load environment-specific config file
            .add_source(File::with_name(&format!("config/{}", environment)).required(false))
            // Override with environment variables (SHOP_ prefix)
            .add_source(
                Environment::with_prefix("SHOP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 3000,
            host: "0.0.0.0".to_string(),
        }
    }
}
