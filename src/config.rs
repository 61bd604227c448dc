use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info};
use validator::{Validate, ValidationError, ValidationErrors};

/// Default values for configuration
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_PORT: u16 = 8080;
const CONFIG_DIR: &str = "config";
const DEFAULT_SHIPPING_BASE_URL: &str = "https://api-sandbox.collaborator.komerce.id";
const DEFAULT_TRACKING_BASE_URL: &str = "https://api.binderbyte.com";
const DEFAULT_SNAP_SANDBOX_URL: &str = "https://app.sandbox.midtrans.com";
const DEFAULT_CORE_SANDBOX_URL: &str = "https://api.sandbox.midtrans.com";
const DEFAULT_SNAP_PRODUCTION_URL: &str = "https://app.midtrans.com";
const DEFAULT_CORE_PRODUCTION_URL: &str = "https://api.midtrans.com";
const DEV_DEFAULT_JWT_SECRET: &str =
    "this_is_a_development_secret_key_that_is_at_least_64_characters_long_for_testing";

/// Carrier-aggregation (shipping rate) provider settings
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct ShippingConfig {
    #[validate(length(min = 1))]
    #[serde(default = "default_shipping_base_url")]
    pub base_url: String,

    #[serde(default)]
    pub api_key: String,

    /// Destination id of the warehouse every parcel ships from
    #[serde(default)]
    pub warehouse_destination_id: String,

    #[serde(default = "default_shipping_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ShippingConfig {
    fn default() -> Self {
        Self {
            base_url: default_shipping_base_url(),
            api_key: String::new(),
            warehouse_destination_id: String::new(),
            timeout_secs: default_shipping_timeout_secs(),
        }
    }
}

impl ShippingConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Parcel tracking provider settings
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct TrackingConfig {
    #[validate(length(min = 1))]
    #[serde(default = "default_tracking_base_url")]
    pub base_url: String,

    #[serde(default)]
    pub api_key: String,

    #[serde(default = "default_tracking_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            base_url: default_tracking_base_url(),
            api_key: String::new(),
            timeout_secs: default_tracking_timeout_secs(),
        }
    }
}

impl TrackingConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Hosted payment gateway settings
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct PaymentConfig {
    #[serde(default)]
    pub server_key: String,

    #[serde(default)]
    pub is_production: bool,

    /// Overrides the hosted-checkout base URL (sandbox/production chosen by `is_production`)
    #[serde(default)]
    pub snap_base_url: Option<String>,

    /// Overrides the transaction status/cancel API base URL
    #[serde(default)]
    pub api_base_url: Option<String>,

    #[serde(default = "default_payment_timeout_secs")]
    pub timeout_secs: u64,

    /// Hours before an unpaid hosted session expires
    #[validate(range(min = 1, max = 168))]
    #[serde(default = "default_payment_expiry_hours")]
    pub expiry_hours: u32,

    #[serde(default = "default_enabled_payments")]
    pub enabled_payments: Vec<String>,

    /// Storefront URL used to build the finish/error/pending redirect callbacks
    #[serde(default = "default_frontend_url")]
    pub frontend_url: String,
}

impl Default for PaymentConfig {
    fn default() -> Self {
        Self {
            server_key: String::new(),
            is_production: false,
            snap_base_url: None,
            api_base_url: None,
            timeout_secs: default_payment_timeout_secs(),
            expiry_hours: default_payment_expiry_hours(),
            enabled_payments: default_enabled_payments(),
            frontend_url: default_frontend_url(),
        }
    }
}

impl PaymentConfig {
    pub fn snap_base_url(&self) -> String {
        self.snap_base_url.clone().unwrap_or_else(|| {
            if self.is_production {
                DEFAULT_SNAP_PRODUCTION_URL.to_string()
            } else {
                DEFAULT_SNAP_SANDBOX_URL.to_string()
            }
        })
    }

    pub fn api_base_url(&self) -> String {
        self.api_base_url.clone().unwrap_or_else(|| {
            if self.is_production {
                DEFAULT_CORE_PRODUCTION_URL.to_string()
            } else {
                DEFAULT_CORE_SANDBOX_URL.to_string()
            }
        })
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Checkout orchestration budgets
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct CheckoutConfig {
    #[validate(range(min = 1, max = 120))]
    #[serde(default = "default_checkout_timeout_secs")]
    pub transaction_timeout_secs: u64,

    #[validate(range(min = 1, max = 20))]
    #[serde(default = "default_keyword_min_length")]
    pub destination_keyword_min_length: usize,
}

impl Default for CheckoutConfig {
    fn default() -> Self {
        Self {
            transaction_timeout_secs: default_checkout_timeout_secs(),
            destination_keyword_min_length: default_keyword_min_length(),
        }
    }
}

impl CheckoutConfig {
    pub fn transaction_timeout(&self) -> Duration {
        Duration::from_secs(self.transaction_timeout_secs)
    }
}

/// Application configuration structure with validation
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Database connection URL
    #[validate(length(min = 1))]
    pub database_url: String,

    /// JWT secret used to verify bearer tokens issued by the auth service
    #[validate(length(min = 64), custom = "validate_jwt_secret")]
    pub jwt_secret: String,

    /// Server host address
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Application environment
    #[validate(length(min = 1))]
    pub environment: String,

    /// Logging level
    #[validate(custom = "validate_log_level")]
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log in JSON format (structured logging)
    #[serde(default)]
    pub log_json: bool,

    /// Whether to run database migrations on startup
    #[serde(default)]
    pub auto_migrate: bool,

    /// CORS: comma-separated list of allowed origins (production)
    #[serde(default)]
    pub cors_allowed_origins: Option<String>,

    /// Allow permissive CORS fallback
    #[serde(default)]
    pub cors_allow_any_origin: bool,

    /// Per-request timeout applied by the HTTP layer
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// DB pool: max connections
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,

    /// DB pool: min connections
    #[serde(default = "default_db_min_connections")]
    pub db_min_connections: u32,

    #[serde(default = "default_db_connect_timeout_secs")]
    pub db_connect_timeout_secs: u64,

    #[serde(default = "default_db_idle_timeout_secs")]
    pub db_idle_timeout_secs: u64,

    #[serde(default = "default_db_acquire_timeout_secs")]
    pub db_acquire_timeout_secs: u64,

    /// Capacity of the in-process domain event channel
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,

    #[validate]
    #[serde(default)]
    pub shipping: ShippingConfig,

    #[validate]
    #[serde(default)]
    pub tracking: TrackingConfig,

    #[validate]
    #[serde(default)]
    pub payment: PaymentConfig,

    #[validate]
    #[serde(default)]
    pub checkout: CheckoutConfig,
}

impl AppConfig {
    /// Creates a configuration with defaults for everything but the essentials.
    pub fn new(database_url: String, jwt_secret: String, environment: String) -> Self {
        Self {
            database_url,
            jwt_secret,
            host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            environment,
            log_level: default_log_level(),
            log_json: false,
            auto_migrate: false,
            cors_allowed_origins: None,
            cors_allow_any_origin: false,
            request_timeout_secs: default_request_timeout_secs(),
            db_max_connections: default_db_max_connections(),
            db_min_connections: default_db_min_connections(),
            db_connect_timeout_secs: default_db_connect_timeout_secs(),
            db_idle_timeout_secs: default_db_idle_timeout_secs(),
            db_acquire_timeout_secs: default_db_acquire_timeout_secs(),
            event_channel_capacity: default_event_channel_capacity(),
            shipping: ShippingConfig::default(),
            tracking: TrackingConfig::default(),
            payment: PaymentConfig::default(),
            checkout: CheckoutConfig::default(),
        }
    }

    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }

    pub fn is_development(&self) -> bool {
        matches!(
            self.environment.to_ascii_lowercase().as_str(),
            "development" | "dev" | "local" | "test"
        )
    }

    pub fn has_cors_allowed_origins(&self) -> bool {
        self.cors_allowed_origins
            .as_deref()
            .map(|s| s.split(',').any(|o| !o.trim().is_empty()))
            .unwrap_or(false)
    }

    pub fn should_allow_permissive_cors(&self) -> bool {
        self.cors_allow_any_origin || self.is_development()
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    fn validate_additional_constraints(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        if !self.should_allow_permissive_cors() && !self.has_cors_allowed_origins() {
            let mut err = ValidationError::new("cors_allowed_origins_required");
            err.message = Some(
                "Set APP__CORS_ALLOWED_ORIGINS for non-development environments or explicitly opt-in via APP__CORS_ALLOW_ANY_ORIGIN=true".into(),
            );
            errors.add("cors_allowed_origins", err);
        }

        if !self.is_development() && self.jwt_secret.trim() == DEV_DEFAULT_JWT_SECRET {
            let mut err = ValidationError::new("jwt_secret_default_dev");
            err.message = Some(
                "The bundled development JWT secret must not be used outside development. Set APP__JWT_SECRET to a unique, secure value."
                    .into(),
            );
            errors.add("jwt_secret", err);
        }

        if !self.is_development() && self.payment.server_key.trim().is_empty() {
            let mut err = ValidationError::new("payment_server_key_required");
            err.message = Some("Set APP__PAYMENT__SERVER_KEY outside development".into());
            errors.add("payment", err);
        }

        if !self.is_development() && self.shipping.warehouse_destination_id.trim().is_empty() {
            let mut err = ValidationError::new("warehouse_destination_required");
            err.message =
                Some("Set APP__SHIPPING__WAREHOUSE_DESTINATION_ID outside development".into());
            errors.add("shipping", err);
        }

        if errors.errors().is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    pub fn log_level(&self) -> &str {
        &self.log_level
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("Configuration loading failed: {0}")]
    Load(#[from] ConfigError),

    #[error("Configuration validation failed: {0}")]
    Validation(#[from] validator::ValidationErrors),
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_request_timeout_secs() -> u64 {
    30
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

fn default_event_channel_capacity() -> usize {
    1024
}

fn default_shipping_base_url() -> String {
    DEFAULT_SHIPPING_BASE_URL.to_string()
}

fn default_shipping_timeout_secs() -> u64 {
    8
}

fn default_tracking_base_url() -> String {
    DEFAULT_TRACKING_BASE_URL.to_string()
}

fn default_tracking_timeout_secs() -> u64 {
    5
}

fn default_payment_timeout_secs() -> u64 {
    10
}

fn default_payment_expiry_hours() -> u32 {
    24
}

fn default_enabled_payments() -> Vec<String> {
    [
        "gopay",
        "bca_va",
        "permata_va",
        "bank_transfer",
        "indomaret",
        "shopeepay",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_frontend_url() -> String {
    "http://localhost:3000".to_string()
}

fn default_checkout_timeout_secs() -> u64 {
    15
}

fn default_keyword_min_length() -> usize {
    3
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

fn validate_jwt_secret(secret: &str) -> Result<(), ValidationError> {
    let trimmed = secret.trim();

    const DISALLOWED: [&str; 3] = [
        "CHANGE_THIS_SECRET_IN_PRODUCTION",
        "your-secret-key",
        "default-secret-key",
    ];
    if DISALLOWED
        .iter()
        .any(|&bad| trimmed.eq_ignore_ascii_case(bad))
    {
        let mut err = ValidationError::new("jwt_secret");
        err.message = Some("JWT secret must be overridden with a secure random value".into());
        return Err(err);
    }

    if let Some(first) = trimmed.chars().next() {
        if trimmed.chars().all(|c| c == first) {
            let mut err = ValidationError::new("jwt_secret");
            err.message = Some("JWT secret cannot be a repeated character sequence".into());
            return Err(err);
        }
    }

    let unique_chars: std::collections::HashSet<char> = trimmed.chars().collect();
    if unique_chars.len() < 10 {
        let mut err = ValidationError::new("jwt_secret");
        err.message =
            Some("JWT secret must have at least 10 unique characters for adequate entropy".into());
        return Err(err);
    }

    Ok(())
}

/// Initializes tracing using the provided log level as the default filter
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default_directive = format!("storefront_api={},tower_http=debug", level);
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
        .set_default("database_url", "sqlite://storefront.db?mode=rwc")?
        .set_default("host", "0.0.0.0")?
        .set_default("port", DEFAULT_PORT as i64)?
        .set_default("environment", run_env.as_str())?
        .set_default("log_level", DEFAULT_LOG_LEVEL)?
        .set_default("log_json", false)?
        .add_source(File::with_name(&format!("{}/default", CONFIG_DIR)).required(false))
        .add_source(File::with_name(&format!("{}/{}", CONFIG_DIR, run_env)).required(false))
        .add_source(
            Environment::with_prefix("APP")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("payment.enabled_payments")
                .try_parsing(true),
        )
        .build()?;

    if config.get_string("jwt_secret").is_err() {
        error!("JWT secret is not configured. Set APP__JWT_SECRET (minimum 64 characters).");
        return Err(AppConfigError::Load(ConfigError::NotFound(
            "jwt_secret is required but not configured. Set APP__JWT_SECRET environment variable."
                .into(),
        )));
    }

    let app_config: AppConfig = config.try_deserialize()?;

    app_config.validate().map_err(|e| {
        error!("Configuration validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    app_config.validate_additional_constraints().map_err(|e| {
        error!("Configuration security validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    info!("Configuration loaded successfully");
    Ok(app_config)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> AppConfig {
        let mut cfg = AppConfig::new(
            "sqlite://storefront.db?mode=memory".into(),
            "super_secure_jwt_secret_that_is_long_enough_1234567890_abcdefghijklmnop".into(),
            "production".into(),
        );
        cfg.payment.server_key = "SB-Mid-server-key".into();
        cfg.shipping.warehouse_destination_id = "31597".into();
        cfg
    }

    #[test]
    fn non_dev_requires_cors_origins() {
        let cfg = base_config();
        assert!(cfg.validate_additional_constraints().is_err());
    }

    #[test]
    fn non_dev_with_origins_passes() {
        let mut cfg = base_config();
        cfg.cors_allowed_origins = Some("https://shop.example.com".into());
        assert!(cfg.validate_additional_constraints().is_ok());
    }

    #[test]
    fn non_dev_requires_gateway_server_key() {
        let mut cfg = base_config();
        cfg.cors_allow_any_origin = true;
        cfg.payment.server_key = "  ".into();
        let errors = cfg.validate_additional_constraints().unwrap_err();
        assert!(errors.field_errors().contains_key("payment"));
    }

    #[test]
    fn development_allows_permissive_by_default() {
        let mut cfg = base_config();
        cfg.environment = "development".into();
        cfg.payment.server_key.clear();
        assert!(cfg.validate_additional_constraints().is_ok());
    }

    #[test]
    fn weak_jwt_secrets_are_rejected() {
        assert!(validate_jwt_secret(&"a".repeat(80)).is_err());
        assert!(validate_jwt_secret("your-secret-key").is_err());
        assert!(validate_jwt_secret(DEV_DEFAULT_JWT_SECRET).is_ok());
    }

    #[test]
    fn gateway_urls_follow_production_flag() {
        let mut payment = PaymentConfig::default();
        assert_eq!(payment.snap_base_url(), DEFAULT_SNAP_SANDBOX_URL);
        payment.is_production = true;
        assert_eq!(payment.api_base_url(), DEFAULT_CORE_PRODUCTION_URL);
        payment.api_base_url = Some("http://127.0.0.1:9999".into());
        assert_eq!(payment.api_base_url(), "http://127.0.0.1:9999");
    }

    #[test]
    fn nested_sections_are_validated() {
        let mut cfg = base_config();
        cfg.payment.expiry_hours = 0;
        assert!(cfg.validate().is_err());
    }
}
