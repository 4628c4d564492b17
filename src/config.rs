use config::{Config, ConfigError, Environment, File};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::env;
use std::path::Path;
use thiserror::Error;
use tracing::{error, info};
use validator::{Validate, ValidationError, ValidationErrors};

use crate::entities::reservation::ReservationStatus;
use crate::quantity::COMMIT_EPSILON;
use crate::repositories::lot_candidate_repository::AllocationPolicyKind;

/// Default values for configuration
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const CONFIG_DIR: &str = "config";
const DEFAULT_GATEWAY_TIMEOUT_SECS: u64 = 10;

/// ERP adapter selected at startup
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Default, Deserialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case", ascii_case_insensitive)]
pub enum GatewayMode {
    #[default]
    MockSuccess,
    MockFailure,
    Http,
}

impl GatewayMode {
    pub fn is_mock(&self) -> bool {
        matches!(self, GatewayMode::MockSuccess | GatewayMode::MockFailure)
    }
}

/// Status given to reservations created by commit
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Default, Deserialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum CommitReservationStatus {
    #[default]
    Active,
    Temporary,
}

impl From<CommitReservationStatus> for ReservationStatus {
    fn from(status: CommitReservationStatus) -> Self {
        match status {
            CommitReservationStatus::Active => ReservationStatus::Active,
            CommitReservationStatus::Temporary => ReservationStatus::Temporary,
        }
    }
}

/// ERP gateway selection
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct GatewayConfig {
    #[serde(default)]
    pub mode: GatewayMode,

    /// Registration endpoint for the "http" adapter
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Request timeout for the "http" adapter
    #[serde(default = "default_gateway_timeout_secs")]
    #[validate(range(min = 1, max = 300))]
    pub timeout_secs: u64,

    /// Error message reported by the "mock-failure" gateway
    #[serde(default)]
    pub failure_message: Option<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            mode: GatewayMode::default(),
            endpoint: None,
            timeout_secs: default_gateway_timeout_secs(),
            failure_message: None,
        }
    }
}

/// Allocation engine tuning
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AllocationConfig {
    /// "fefo" or "fifo"
    #[serde(default)]
    pub default_policy: AllocationPolicyKind,

    /// Tolerance when comparing available against required quantity under lock
    #[serde(default = "default_commit_epsilon")]
    pub commit_epsilon: Decimal,

    /// Allow hard demand to evict lower-priority soft reservations
    #[serde(default = "default_true_bool")]
    pub enable_preemption: bool,

    /// Refuse lots whose item has no external item linkage
    #[serde(default)]
    pub require_external_mapping: bool,

    #[serde(default)]
    pub reservation_status_on_commit: CommitReservationStatus,

    #[serde(default)]
    #[validate]
    pub gateway: GatewayConfig,
}

impl Default for AllocationConfig {
    fn default() -> Self {
        Self {
            default_policy: AllocationPolicyKind::default(),
            commit_epsilon: default_commit_epsilon(),
            enable_preemption: true,
            require_external_mapping: false,
            reservation_status_on_commit: CommitReservationStatus::default(),
            gateway: GatewayConfig::default(),
        }
    }
}

impl AllocationConfig {
    pub fn initial_reservation_status(&self) -> ReservationStatus {
        self.reservation_status_on_commit.into()
    }
}

/// Application configuration structure with validation
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Database connection URL
    pub database_url: String,

    /// Application environment
    pub environment: String,

    /// Logging level
    #[serde(default = "default_log_level")]
    #[validate(custom = "validate_log_level")]
    pub log_level: String,

    /// Log in JSON format (structured logging)
    #[serde(default)]
    pub log_json: bool,

    /// Whether to run database migrations on startup
    #[serde(default)]
    pub auto_migrate: bool,

    /// DB pool: max connections
    #[serde(default = "default_db_max_connections")]
    #[validate(range(min = 1))]
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

    /// Event channel capacity for published allocation events
    #[serde(default = "default_event_channel_capacity")]
    #[validate(range(min = 1))]
    pub event_channel_capacity: usize,

    #[serde(default)]
    #[validate]
    pub allocation: AllocationConfig,
}

impl AppConfig {
    /// Creates a new configuration with defaults for everything but the essentials
    pub fn new(database_url: String, environment: String) -> Self {
        Self {
            database_url,
            environment,
            log_level: default_log_level(),
            log_json: false,
            auto_migrate: false,
            db_max_connections: default_db_max_connections(),
            db_min_connections: default_db_min_connections(),
            db_connect_timeout_secs: default_db_connect_timeout_secs(),
            db_idle_timeout_secs: default_db_idle_timeout_secs(),
            db_acquire_timeout_secs: default_db_acquire_timeout_secs(),
            event_channel_capacity: default_event_channel_capacity(),
            allocation: AllocationConfig::default(),
        }
    }

    /// Checks if running in production environment
    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }

    /// Gets log level reference
    pub fn log_level(&self) -> &str {
        &self.log_level
    }

    fn validate_additional_constraints(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        if self.db_min_connections > self.db_max_connections {
            let mut err = ValidationError::new("db_min_connections");
            err.message = Some("db_min_connections must not exceed db_max_connections".into());
            errors.add("db_min_connections", err);
        }

        let gateway = &self.allocation.gateway;
        if gateway.mode == GatewayMode::Http
            && gateway.endpoint.as_deref().map_or(true, |e| e.trim().is_empty())
        {
            let mut err = ValidationError::new("gateway_endpoint");
            err.message = Some("APP__ALLOCATION__GATEWAY__ENDPOINT is required in http mode".into());
            errors.add("allocation", err);
        }

        if self.is_production() && gateway.mode.is_mock() {
            let mut err = ValidationError::new("gateway_mode_production");
            err.message = Some("Mock ERP gateways must not be used in production".into());
            errors.add("allocation", err);
        }

        if self.allocation.commit_epsilon.is_sign_negative() {
            let mut err = ValidationError::new("commit_epsilon");
            err.message = Some("commit_epsilon must not be negative".into());
            errors.add("allocation", err);
        }

        if errors.errors().is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("Configuration loading failed: {0}")]
    Load(#[from] ConfigError),

    #[error("Configuration validation failed: {0}")]
    Validation(#[from] validator::ValidationErrors),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Default value functions
fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_db_max_connections() -> u32 {
    16
}
fn default_db_min_connections() -> u32 {
    2
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

fn default_true_bool() -> bool {
    true
}

fn default_event_channel_capacity() -> usize {
    1024
}

fn default_commit_epsilon() -> Decimal {
    COMMIT_EPSILON
}

fn default_gateway_timeout_secs() -> u64 {
    DEFAULT_GATEWAY_TIMEOUT_SECS
}

/// Validates log level values
fn validate_log_level(level: &str) -> Result<(), ValidationError> {
    let valid_levels = ["trace", "debug", "info", "warn", "error"];
    if valid_levels.contains(&level.to_lowercase().as_str()) {
        Ok(())
    } else {
        let mut err = ValidationError::new("log_level");
        err.message = Some("Must be one of: trace, debug, info, warn, error".into());
        Err(err)
    }
}

/// Initializes tracing using the provided log level as the default filter
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default_directive = format!("lot_allocation={},sea_orm=warn", level);
    let filter_directive = env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(default_directive);

    if json {
        let _ = fmt()
            .with_env_filter(EnvFilter::new(filter_directive))
            .json()
            .try_init();
    } else {
        let _ = fmt()
            .with_env_filter(EnvFilter::new(filter_directive))
            .try_init();
    }
}

/// Loads application configuration
///
/// Layers configuration sources in this order:
/// 1. Built-in defaults
/// 2. Default config (config/default.toml)
/// 3. Environment-specific config (config/{env}.toml)
/// 4. Environment variables (APP__*)
pub fn load_config() -> Result<AppConfig, AppConfigError> {
    let run_env = env::var("RUN_ENV")
        .or_else(|_| env::var("APP_ENV"))
        .unwrap_or_else(|_| DEFAULT_ENV.to_string());
    info!("Loading configuration for environment: {}", run_env);

    if !Path::new(CONFIG_DIR).exists() {
        info!(
            "Config directory '{}' not found; relying on built-in defaults and environment variables",
            CONFIG_DIR
        );
    }

    let config = Config::builder()
        .set_default("database_url", "sqlite://lot_allocation.db?mode=rwc")?
        .set_default("environment", run_env.as_str())?
        .set_default("log_level", DEFAULT_LOG_LEVEL)?
        .set_default("log_json", false)?
        .add_source(File::with_name(&format!("{}/default", CONFIG_DIR)).required(false))
        .add_source(File::with_name(&format!("{}/{}", CONFIG_DIR, run_env)).required(false))
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?;

    let app_config: AppConfig = config.try_deserialize()?;

    app_config.validate().map_err(|e| {
        error!("Configuration validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    app_config.validate_additional_constraints().map_err(|e| {
        error!("Configuration constraint validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    info!("Configuration loaded successfully");
    Ok(app_config)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> AppConfig {
        AppConfig::new("sqlite::memory:".into(), "development".into())
    }

    #[test]
    fn defaults_are_valid() {
        let cfg = base_config();
        assert!(cfg.validate().is_ok());
        assert!(cfg.validate_additional_constraints().is_ok());
        assert_eq!(
            cfg.allocation.initial_reservation_status(),
            ReservationStatus::Active
        );
        assert_eq!(cfg.allocation.commit_epsilon, COMMIT_EPSILON);
    }

    #[test]
    fn http_gateway_requires_endpoint() {
        let mut cfg = base_config();
        cfg.allocation.gateway.mode = GatewayMode::Http;
        assert!(cfg.validate_additional_constraints().is_err());

        cfg.allocation.gateway.endpoint = Some("https://erp.example.com/allocations".into());
        assert!(cfg.validate_additional_constraints().is_ok());
    }

    #[test]
    fn production_rejects_mock_gateway() {
        let mut cfg = base_config();
        cfg.environment = "production".into();
        assert!(cfg.validate_additional_constraints().is_err());
    }

    #[test]
    fn gateway_mode_parses_kebab_case() {
        use std::str::FromStr;

        assert_eq!(GatewayMode::from_str("mock-failure").unwrap(), GatewayMode::MockFailure);
        assert_eq!(GatewayMode::from_str("HTTP").unwrap(), GatewayMode::Http);
        assert!(GatewayMode::from_str("carrier-pigeon").is_err());
        assert_eq!(GatewayMode::MockSuccess.to_string(), "mock-success");
    }

    #[test]
    fn unknown_gateway_mode_fails_to_load() {
        let parsed = Config::builder()
            .set_override("mode", "carrier-pigeon")
            .and_then(|b| b.build())
            .and_then(|c| c.try_deserialize::<GatewayConfig>());
        assert!(parsed.is_err());
    }

    #[test]
    fn temporary_status_on_commit() {
        let mut cfg = base_config();
        cfg.allocation.reservation_status_on_commit = CommitReservationStatus::Temporary;
        assert!(cfg.validate_additional_constraints().is_ok());
        assert_eq!(
            cfg.allocation.initial_reservation_status(),
            ReservationStatus::Temporary
        );
    }

    #[test]
    fn invalid_log_level_fails_validation() {
        let mut cfg = base_config();
        cfg.log_level = "chatty".into();
        assert!(cfg.validate().is_err());
    }
}
