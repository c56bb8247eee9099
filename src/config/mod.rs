//! Configuration management for the lending engine
//!
//! This module handles loading and validating configuration from environment variables,
//! with support for different environments (development, staging, production).

use std::env;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid environment value: {0}")]
    InvalidValue(String),

    #[error("Invalid port number: {0}")]
    InvalidPort(String),
}

/// Application environment
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Environment {
    #[default]
    Development,
    Staging,
    Production,
}

impl Environment {
    /// Parse environment from string
    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        match s.to_lowercase().as_str() {
            "dev" | "development" => Ok(Environment::Development),
            "staging" => Ok(Environment::Staging),
            "prod" | "production" => Ok(Environment::Production),
            _ => Err(ConfigError::InvalidValue(format!(
                "Invalid environment: '{}'. Expected: dev, staging, or prod",
                s
            ))),
        }
    }

    /// Check if this is a production environment
    pub fn is_production(&self) -> bool {
        matches!(self, Environment::Production)
    }

    /// Get the environment name as a string
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Development => "development",
            Environment::Staging => "staging",
            Environment::Production => "production",
        }
    }
}

/// Settings for the enforcement sweep
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnforcementConfig {
    /// Days after a due date before an unpaid installment counts as overdue
    pub grace_period_days: i64,
    /// Interval between scheduled sweeps
    pub sweep_interval: Duration,
    /// Maximum number of loans enforced per run
    pub batch_size: i64,
}

impl Default for EnforcementConfig {
    fn default() -> Self {
        Self {
            grace_period_days: 5,
            sweep_interval: Duration::from_secs(300),
            batch_size: 500,
        }
    }
}

/// Settings for partner webhook delivery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookConfig {
    pub poll_interval: Duration,
    pub batch_size: i64,
    /// Attempts after which an event is marked permanently failed
    pub max_attempts: i32,
    /// Per-attempt HTTP timeout
    pub request_timeout: Duration,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(1000),
            batch_size: 100,
            max_attempts: 8,
            request_timeout: Duration::from_millis(5000),
            backoff_base: Duration::from_secs(2),
            backoff_max: Duration::from_secs(3600),
        }
    }
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Database connection URL. When absent the in-memory ledger is used.
    pub database_url: Option<String>,

    /// Current environment
    pub environment: Environment,

    /// Server port
    pub port: u16,

    /// Maximum database connections
    pub db_max_connections: u32,

    /// CORS allowed origins
    pub cors_allowed_origins: Option<String>,

    /// Log level (RUST_LOG)
    pub log_level: String,

    /// Secret shared with the identity service for verifying access tokens
    pub jwt_secret: String,

    /// HMAC secret used by the payment gateway bridge to sign notifications
    pub gateway_secret: Option<String>,

    /// Shared key presented by device agents
    pub device_api_key: Option<String>,

    /// Minimum down payment as basis points of the financed amount
    pub min_down_payment_bps: i64,

    pub enforcement: EnforcementConfig,

    pub webhooks: WebhookConfig,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors)
        dotenvy::dotenv().ok();

        let environment = env::var("ENVIRONMENT")
            .map(|s| Environment::parse(&s))
            .unwrap_or(Ok(Environment::Development))?;

        let database_url = env::var("DATABASE_URL").ok().filter(|s| !s.is_empty());
        if database_url.is_none() && environment.is_production() {
            return Err(ConfigError::MissingEnvVar("DATABASE_URL".to_string()));
        }

        let port = env::var("PORT")
            .unwrap_or_else(|_| "3001".to_string())
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidPort("PORT must be a valid number".to_string()))?;

        let jwt_secret = match env::var("JWT_SECRET") {
            Ok(secret) => secret,
            Err(_) if environment.is_production() => {
                return Err(ConfigError::MissingEnvVar("JWT_SECRET".to_string()))
            }
            Err(_) => "development-secret-change-in-production".to_string(),
        };

        let enforcement = EnforcementConfig {
            grace_period_days: parse_or("GRACE_PERIOD_DAYS", 5)?,
            sweep_interval: Duration::from_secs(parse_or("SWEEP_INTERVAL_SECS", 300)?),
            batch_size: parse_or("SWEEP_BATCH_SIZE", 500)?,
        };
        if enforcement.grace_period_days < 0 {
            return Err(ConfigError::InvalidValue(
                "GRACE_PERIOD_DAYS must not be negative".to_string(),
            ));
        }

        let webhooks = WebhookConfig {
            poll_interval: Duration::from_millis(parse_or("WEBHOOK_POLL_INTERVAL_MS", 1000)?),
            batch_size: parse_or("WEBHOOK_BATCH_SIZE", 100)?,
            max_attempts: parse_or("WEBHOOK_MAX_ATTEMPTS", 8)?,
            request_timeout: Duration::from_millis(parse_or("WEBHOOK_TIMEOUT_MS", 5000)?),
            backoff_base: Duration::from_secs(parse_or("WEBHOOK_BACKOFF_BASE_SECS", 2)?),
            backoff_max: Duration::from_secs(parse_or("WEBHOOK_BACKOFF_MAX_SECS", 3600)?),
        };
        if webhooks.max_attempts < 1 {
            return Err(ConfigError::InvalidValue(
                "WEBHOOK_MAX_ATTEMPTS must be at least 1".to_string(),
            ));
        }

        let min_down_payment_bps: i64 = parse_or("MIN_DOWN_PAYMENT_BPS", 0)?;
        if !(0..=10_000).contains(&min_down_payment_bps) {
            return Err(ConfigError::InvalidValue(
                "MIN_DOWN_PAYMENT_BPS must be between 0 and 10000".to_string(),
            ));
        }

        Ok(Config {
            database_url,
            environment,
            port,
            db_max_connections: parse_or("DB_MAX_CONNECTIONS", 5)?,
            cors_allowed_origins: env::var("CORS_ALLOWED_ORIGINS").ok(),
            log_level: env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            jwt_secret,
            gateway_secret: env::var("GATEWAY_SECRET").ok(),
            device_api_key: env::var("DEVICE_API_KEY").ok(),
            min_down_payment_bps,
            enforcement,
            webhooks,
        })
    }

    /// Get database URL with the password masked, for logging
    pub fn database_url_masked(&self) -> String {
        let Some(url) = &self.database_url else {
            return "<in-memory>".to_string();
        };
        if let Some(at_pos) = url.find('@') {
            if let Some(colon_pos) = url[..at_pos].rfind(':') {
                let prefix = &url[..colon_pos + 1];
                let suffix = &url[at_pos..];
                return format!("{}****{}", prefix, suffix);
            }
        }
        url.clone()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: None,
            environment: Environment::Development,
            port: 3001,
            db_max_connections: 5,
            cors_allowed_origins: None,
            log_level: "info".to_string(),
            jwt_secret: "development-secret-change-in-production".to_string(),
            gateway_secret: None,
            device_api_key: None,
            min_down_payment_bps: 0,
            enforcement: EnforcementConfig::default(),
            webhooks: WebhookConfig::default(),
        }
    }
}

fn parse_or<T: FromStr>(key: &str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| ConfigError::InvalidValue(format!("{} has an invalid value: '{}'", key, raw))),
        Err(_) => Ok(default),
    }
}
