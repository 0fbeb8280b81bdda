use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while validating configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required configuration: {0}")]
    MissingRequired(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Main configuration for the records service
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Service configuration
    #[serde(default)]
    pub service: ServiceConfig,
    /// Database configuration
    pub database: DatabaseConfig,
    /// Media storage configuration
    #[serde(default)]
    pub storage: StorageConfig,
    /// API configuration
    #[serde(default)]
    pub api: ApiConfig,
    /// Outbound notification configuration
    #[serde(default)]
    pub notifications: NotificationConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Service name for logging/metrics
    #[serde(default = "default_service_name")]
    pub name: String,
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Metrics port
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
}

/// Database configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,
    /// Maximum number of connections in the pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Minimum number of connections in the pool
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Idle connection timeout in seconds
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    /// Run migrations on startup
    #[serde(default = "default_run_migrations")]
    pub run_migrations: bool,
}

/// Filesystem layout for user media
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Root of the statically served tree
    #[serde(default = "default_static_root")]
    pub static_root: PathBuf,
    /// Directory under the static root holding one directory per user key
    #[serde(default = "default_users_dir")]
    pub users_dir: String,
    /// How many fresh keys to try before giving up on a create
    #[serde(default = "default_key_attempts")]
    pub key_attempts: u32,
}

/// HTTP API configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// API listen address
    #[serde(default = "default_api_host")]
    pub host: String,
    /// API listen port
    #[serde(default = "default_api_port")]
    pub port: u16,
    /// Enable CORS
    #[serde(default = "default_true")]
    pub cors_enabled: bool,
    /// Allowed CORS origins (empty = any)
    #[serde(default)]
    pub cors_origins: Vec<String>,
    /// Maximum request body size, uploads included
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
    /// Serve the storage tree under /static
    #[serde(default = "default_true")]
    pub serve_static: bool,
}

/// Telegram notification settings for incoming contact requests
#[derive(Debug, Clone, Deserialize)]
pub struct NotificationConfig {
    /// Send notifications through the bot API; when false they are only logged
    #[serde(default)]
    pub enabled: bool,
    /// Bot API base URL
    #[serde(default = "default_telegram_api_base")]
    pub api_base: String,
    /// Bot token
    pub bot_token: Option<String>,
    /// Chat receiving request notifications
    pub target_chat_id: Option<String>,
    /// Request timeout in seconds
    #[serde(default = "default_notification_timeout_secs")]
    pub timeout_secs: u64,
    /// Chat whose text messages are relayed to the target chat
    pub relay_source_chat_id: Option<i64>,
    /// Long-poll timeout of the relay in seconds
    #[serde(default = "default_relay_poll_timeout_secs")]
    pub relay_poll_timeout_secs: u64,
}

// Default value functions
fn default_service_name() -> String {
    "records-service".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_max_connections() -> u32 {
    10
}

fn default_min_connections() -> u32 {
    2
}

fn default_connect_timeout_secs() -> u64 {
    30
}

fn default_idle_timeout_secs() -> u64 {
    600
}

fn default_run_migrations() -> bool {
    true
}

fn default_static_root() -> PathBuf {
    PathBuf::from("static")
}

fn default_users_dir() -> String {
    "users".to_string()
}

fn default_key_attempts() -> u32 {
    3
}

fn default_api_host() -> String {
    "0.0.0.0".to_string()
}

fn default_api_port() -> u16 {
    8081
}

fn default_true() -> bool {
    true
}

fn default_max_body_bytes() -> usize {
    256 * 1024 * 1024 // 256MB, videos included
}

fn default_telegram_api_base() -> String {
    "https://api.telegram.org".to_string()
}

fn default_notification_timeout_secs() -> u64 {
    10
}

fn default_relay_poll_timeout_secs() -> u64 {
    30
}

impl Config {
    /// Load configuration from environment and config files
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            // Start with default values
            .set_default("service.name", "records-service")?
            .set_default("service.log_level", "info")?
            .set_default("service.metrics_port", 9090)?
            // Add config file if present
            .add_source(config::File::with_name("config/records").required(false))
            .add_source(config::File::with_name("/etc/roster/records").required(false))
            // Override with environment variables
            // RECORDS__DATABASE__URL -> database.url
            .add_source(
                config::Environment::with_prefix("RECORDS")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("api.cors_origins"),
            )
            .build()?;

        let config: Config = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints serde cannot express
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database.url.is_empty() {
            return Err(ConfigError::MissingRequired("database.url".to_string()));
        }

        if self.storage.key_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                key: "storage.key_attempts".to_string(),
                message: "must be at least 1".to_string(),
            });
        }

        let users_dir = &self.storage.users_dir;
        if users_dir.is_empty() || users_dir.contains(['/', '\\']) || users_dir == ".." {
            return Err(ConfigError::InvalidValue {
                key: "storage.users_dir".to_string(),
                message: format!("{users_dir:?} is not a single directory name"),
            });
        }

        if self.notifications.enabled {
            if self.notifications.bot_token.is_none() {
                return Err(ConfigError::MissingRequired(
                    "notifications.bot_token (required when enabled)".to_string(),
                ));
            }
            if self.notifications.target_chat_id.is_none() {
                return Err(ConfigError::MissingRequired(
                    "notifications.target_chat_id (required when enabled)".to_string(),
                ));
            }
        }

        Ok(())
    }

    /// Directory holding one subdirectory per user key
    pub fn users_root(&self) -> PathBuf {
        self.storage.static_root.join(&self.storage.users_dir)
    }

    /// Get notification request timeout as Duration
    pub fn notification_timeout(&self) -> Duration {
        Duration::from_secs(self.notifications.timeout_secs)
    }

    /// Get relay long-poll timeout as Duration
    pub fn relay_poll_timeout(&self) -> Duration {
        Duration::from_secs(self.notifications.relay_poll_timeout_secs)
    }
}

impl DatabaseConfig {
    /// Get connection timeout as Duration
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Get idle connection timeout as Duration
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            log_level: default_log_level(),
            metrics_port: default_metrics_port(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            static_root: default_static_root(),
            users_dir: default_users_dir(),
            key_attempts: default_key_attempts(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_api_host(),
            port: default_api_port(),
            cors_enabled: true,
            cors_origins: Vec::new(),
            max_body_bytes: default_max_body_bytes(),
            serve_static: true,
        }
    }
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            api_base: default_telegram_api_base(),
            bot_token: None,
            target_chat_id: None,
            timeout_secs: default_notification_timeout_secs(),
            relay_source_chat_id: None,
            relay_poll_timeout_secs: default_relay_poll_timeout_secs(),
        }
    }
}
