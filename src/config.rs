use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use tracing::info;
use validator::Validate;

const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_PORT: u16 = 8080;
const CONFIG_DIR: &str = "config";

/// Application configuration with validation.
///
/// Values are layered from `config/default.toml`, an environment-specific
/// file, and `APP__`-prefixed environment variables, in that order.
#[derive(Clone, Debug, Deserialize, Validate)]
pub struct AppConfig {
    /// Database connection URL
    #[serde(default = "default_database_url")]
    pub database_url: String,

    /// Bind address for the HTTP server
    #[serde(default = "default_host")]
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Deployment environment name (development, test, production)
    #[serde(default = "default_environment")]
    pub environment: String,

    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Emit logs as JSON instead of text
    #[serde(default)]
    pub log_json: bool,

    /// Apply embedded migrations at startup
    #[serde(default = "default_true")]
    pub auto_migrate: bool,

    /// CORS: comma-separated list of allowed origins
    #[serde(default)]
    pub cors_allowed_origins: Option<String>,

    /// DB pool: max connections
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,

    /// DB pool: min connections
    #[serde(default = "default_db_min_connections")]
    pub db_min_connections: u32,

    /// DB timeouts (seconds)
    #[serde(default = "default_db_connect_timeout_secs")]
    pub db_connect_timeout_secs: u64,
    #[serde(default = "default_db_idle_timeout_secs")]
    pub db_idle_timeout_secs: u64,
    #[serde(default = "default_db_acquire_timeout_secs")]
    pub db_acquire_timeout_secs: u64,

    /// Secret used to verify identity-provider bearer tokens (HS256)
    #[validate(length(min = 32))]
    #[serde(default = "default_identity_secret")]
    pub identity_jwt_secret: String,

    /// Payment provider API base URL; checkout is rejected when unset
    #[serde(default)]
    pub payment_gateway_url: Option<String>,

    /// Payment provider API secret key
    #[serde(default)]
    pub payment_gateway_secret: Option<String>,

    /// Bound on outbound gateway calls (seconds)
    #[serde(default = "default_gateway_timeout_secs")]
    pub payment_gateway_timeout_secs: u64,

    /// Shared secret for verifying gateway webhook signatures
    #[serde(default)]
    pub payment_webhook_secret: Option<String>,

    /// Accepted clock skew for webhook timestamps (seconds)
    #[serde(default = "default_webhook_tolerance_secs")]
    pub payment_webhook_tolerance_secs: u64,

    /// Pending intents older than this are expired by the sweeper (seconds)
    #[serde(default = "default_intent_expiry_secs")]
    pub intent_expiry_secs: u64,

    /// Interval between sweeper runs (seconds)
    #[serde(default = "default_intent_sweep_interval_secs")]
    pub intent_sweep_interval_secs: u64,

    /// Default currency code for checkout
    #[serde(default = "default_currency")]
    pub default_currency: String,

    /// Bound of the in-process event queue
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,
}

fn default_database_url() -> String {
    "sqlite::memory:".to_string()
}
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_environment() -> String {
    DEFAULT_ENV.to_string()
}
fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}
fn default_true() -> bool {
    true
}
fn default_db_max_connections() -> u32 {
    10
}
fn default_db_min_connections() -> u32 {
    1
}
fn default_db_connect_timeout_secs() -> u64 {
    30
}
fn default_db_idle_timeout_secs() -> u64 {
    600
}
fn default_db_acquire_timeout_secs() -> u64 {
    8
}
fn default_identity_secret() -> String {
    "development_identity_secret_at_least_32_chars_long".to_string()
}
fn default_gateway_timeout_secs() -> u64 {
    10
}
fn default_webhook_tolerance_secs() -> u64 {
    300
}
fn default_intent_expiry_secs() -> u64 {
    24 * 3600
}
fn default_intent_sweep_interval_secs() -> u64 {
    300
}
fn default_currency() -> String {
    "usd".to_string()
}
fn default_event_channel_capacity() -> usize {
    1024
}

impl AppConfig {
    pub fn is_development(&self) -> bool {
        self.environment == "development"
    }

    pub fn log_level(&self) -> &str {
        &self.log_level
    }
}

/// Loads configuration from files and environment.
pub fn load_config() -> Result<AppConfig, ConfigError> {
    let run_env = env::var("RUN_ENV").unwrap_or_else(|_| DEFAULT_ENV.to_string());

    let cfg = Config::builder()
        .add_source(File::with_name(&format!("{}/default", CONFIG_DIR)).required(false))
        .add_source(File::with_name(&format!("{}/{}", CONFIG_DIR, run_env)).required(false))
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?;

    let app_config: AppConfig = cfg.try_deserialize()?;

    app_config
        .validate()
        .map_err(|e| ConfigError::Message(format!("Invalid configuration: {}", e)))?;

    info!(environment = %app_config.environment, "Configuration loaded");
    Ok(app_config)
}

/// Initializes the global tracing subscriber.
pub fn init_tracing(log_level: &str, json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    if json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}
