use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::path::Path;
use validator::Validate;

const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const CONFIG_DIR: &str = "config";

const DEFAULT_TTL_MINUTES: i64 = 15;
const DEFAULT_MAX_TTL_MINUTES: i64 = 120;
const DEFAULT_MAX_EXTEND_MINUTES: i64 = 60;
const DEFAULT_MAX_BATCH_ITEMS: usize = 50;
const DEFAULT_MAX_BULK_AVAILABILITY: usize = 100;
const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 30;
const DEFAULT_SWEEP_BATCH_SIZE: u64 = 500;

/// Reservation admission and expiry tuning.
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct ReservationSettings {
    /// TTL applied when the caller does not pass one, in minutes.
    #[serde(default = "default_ttl_minutes")]
    #[validate(range(min = 1))]
    pub default_ttl_minutes: i64,

    /// Hard ceiling for a single reservation's TTL; larger requests are
    /// clamped down to this value.
    #[serde(default = "default_max_ttl_minutes")]
    #[validate(range(min = 1))]
    pub max_ttl_minutes: i64,

    /// Per-call ceiling for `extend`.
    #[serde(default = "default_max_extend_minutes")]
    #[validate(range(min = 1))]
    pub max_extend_minutes: i64,

    /// Item cap for `reserve_batch` / `confirm_batch`.
    #[serde(default = "default_max_batch_items")]
    #[validate(range(min = 1))]
    pub max_batch_items: usize,

    /// Key cap for `available_bulk`.
    #[serde(default = "default_max_bulk_availability")]
    #[validate(range(min = 1))]
    pub max_bulk_availability: usize,
}

impl Default for ReservationSettings {
    fn default() -> Self {
        Self {
            default_ttl_minutes: DEFAULT_TTL_MINUTES,
            max_ttl_minutes: DEFAULT_MAX_TTL_MINUTES,
            max_extend_minutes: DEFAULT_MAX_EXTEND_MINUTES,
            max_batch_items: DEFAULT_MAX_BATCH_ITEMS,
            max_bulk_availability: DEFAULT_MAX_BULK_AVAILABILITY,
        }
    }
}

/// Expiration sweeper cadence.
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct SweeperSettings {
    #[serde(default = "default_sweep_interval_secs")]
    #[validate(range(min = 1))]
    pub interval_secs: u64,

    /// Upper bound on rows flipped per sweep pass.
    #[serde(default = "default_sweep_batch_size")]
    #[validate(range(min = 1))]
    pub batch_size: u64,
}

impl Default for SweeperSettings {
    fn default() -> Self {
        Self {
            interval_secs: DEFAULT_SWEEP_INTERVAL_SECS,
            batch_size: DEFAULT_SWEEP_BATCH_SIZE,
        }
    }
}

/// Application configuration with validation.
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Database connection URL
    pub database_url: String,

    /// Application environment ("development", "test", "production")
    #[serde(default = "default_environment")]
    pub environment: String,

    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log in JSON format (structured logging)
    #[serde(default)]
    pub log_json: bool,

    /// Whether to run database migrations on startup
    #[serde(default)]
    pub auto_migrate: bool,

    /// Maximum number of DB connections
    #[serde(default = "default_db_max_connections")]
    #[validate(range(min = 1, max = 200))]
    pub db_max_connections: u32,

    /// Minimum number of DB connections
    #[serde(default = "default_db_min_connections")]
    pub db_min_connections: u32,

    /// Connection timeout in seconds
    #[serde(default = "default_db_timeout_secs")]
    pub db_connect_timeout_secs: u64,

    /// Acquire timeout in seconds
    #[serde(default = "default_db_acquire_timeout_secs")]
    pub db_acquire_timeout_secs: u64,

    /// Idle timeout in seconds
    #[serde(default = "default_db_idle_timeout_secs")]
    pub db_idle_timeout_secs: u64,

    #[serde(default)]
    #[validate]
    pub reservations: ReservationSettings,

    #[serde(default)]
    #[validate]
    pub sweeper: SweeperSettings,
}

fn default_environment() -> String {
    DEFAULT_ENV.to_string()
}
fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}
fn default_db_max_connections() -> u32 {
    10
}
fn default_db_min_connections() -> u32 {
    1
}
fn default_db_timeout_secs() -> u64 {
    30
}
fn default_db_acquire_timeout_secs() -> u64 {
    8
}
fn default_db_idle_timeout_secs() -> u64 {
    600
}
fn default_ttl_minutes() -> i64 {
    DEFAULT_TTL_MINUTES
}
fn default_max_ttl_minutes() -> i64 {
    DEFAULT_MAX_TTL_MINUTES
}
fn default_max_extend_minutes() -> i64 {
    DEFAULT_MAX_EXTEND_MINUTES
}
fn default_max_batch_items() -> usize {
    DEFAULT_MAX_BATCH_ITEMS
}
fn default_max_bulk_availability() -> usize {
    DEFAULT_MAX_BULK_AVAILABILITY
}
fn default_sweep_interval_secs() -> u64 {
    DEFAULT_SWEEP_INTERVAL_SECS
}
fn default_sweep_batch_size() -> u64 {
    DEFAULT_SWEEP_BATCH_SIZE
}

impl AppConfig {
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}

/// Loads configuration from `config/default.toml`, an optional
/// per-environment file, and `STOCKCONTROL_*` environment variables
/// (later sources win).
pub fn load_config() -> Result<AppConfig, ConfigError> {
    let environment = env::var("RUN_ENV").unwrap_or_else(|_| DEFAULT_ENV.to_string());

    let mut builder = Config::builder()
        .set_default("environment", environment.clone())?
        .add_source(File::from(Path::new(CONFIG_DIR).join("default")).required(false))
        .add_source(File::from(Path::new(CONFIG_DIR).join(&environment)).required(false))
        .add_source(Environment::with_prefix("STOCKCONTROL").separator("__"));

    // Bare DATABASE_URL wins over files for container deployments.
    if let Ok(url) = env::var("DATABASE_URL") {
        builder = builder.set_override("database_url", url)?;
    }

    let config: AppConfig = builder.build()?.try_deserialize()?;

    config
        .validate()
        .map_err(|e| ConfigError::Message(format!("invalid configuration: {}", e)))?;

    Ok(config)
}
