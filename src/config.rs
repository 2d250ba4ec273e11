//! Configuration module
//!
//! Loads configuration from environment variables.

use rust_decimal::Decimal;
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::api::middleware::ServiceKey;
use crate::jobs::{MaintenanceConfig, RetryPolicy, WorkerConfig};
use crate::ledger::LedgerConfig;

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

impl FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" | "text" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            _ => Err(ConfigError::InvalidValue("LOG_FORMAT")),
        }
    }
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Database connection URL
    pub database_url: String,

    /// Maximum database connections in pool
    pub database_max_connections: u32,

    /// Server host
    pub host: String,

    /// Server port
    pub port: u16,

    /// Environment (development, production)
    pub environment: String,

    /// Upper bound on one ledger unit, also the Postgres lock timeout
    pub unit_timeout: Duration,

    /// Smallest amount accepted by the HTTP layer
    pub min_transaction_amount: Decimal,

    pub job_poll_interval: Duration,
    pub job_max_attempts: i32,
    pub job_retry_backoff: Duration,
    pub job_stale_after: Duration,

    /// Apply embedded migrations on startup
    pub run_migrations: bool,

    pub log_format: LogFormat,

    /// Shared secret guarding the account lifecycle routes
    pub service_key: ServiceKey,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url = lookup("DATABASE_URL").ok_or(ConfigError::MissingEnv("DATABASE_URL"))?;

        let service_key = lookup("SERVICE_API_KEY")
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty())
            .map(ServiceKey::new)
            .ok_or(ConfigError::MissingEnv("SERVICE_API_KEY"))?;

        let database_max_connections = parse_or(&lookup, "DATABASE_MAX_CONNECTIONS", 10)?;
        let host = lookup("HOST").unwrap_or_else(|| "127.0.0.1".to_string());
        let port = parse_or(&lookup, "PORT", 3000)?;
        let environment = lookup("ENVIRONMENT").unwrap_or_else(|| "development".to_string());

        let unit_timeout_ms: u64 = parse_or(&lookup, "LEDGER_UNIT_TIMEOUT_MS", 5000)?;
        if unit_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue("LEDGER_UNIT_TIMEOUT_MS"));
        }

        let min_transaction_amount: Decimal =
            parse_or(&lookup, "MIN_TRANSACTION_AMOUNT", Decimal::from(10))?;
        if min_transaction_amount <= Decimal::ZERO {
            return Err(ConfigError::InvalidValue("MIN_TRANSACTION_AMOUNT"));
        }

        let job_poll_interval_ms: u64 = parse_or(&lookup, "JOB_POLL_INTERVAL_MS", 1000)?;
        if job_poll_interval_ms == 0 {
            return Err(ConfigError::InvalidValue("JOB_POLL_INTERVAL_MS"));
        }

        let job_max_attempts: i32 = parse_or(&lookup, "JOB_MAX_ATTEMPTS", 5)?;
        if job_max_attempts < 1 {
            return Err(ConfigError::InvalidValue("JOB_MAX_ATTEMPTS"));
        }

        let job_retry_backoff_ms: u64 = parse_or(&lookup, "JOB_RETRY_BACKOFF_MS", 2000)?;
        let job_stale_after_secs: u64 = parse_or(&lookup, "JOB_STALE_AFTER_SECS", 300)?;
        let run_migrations = parse_or(&lookup, "RUN_MIGRATIONS", false)?;
        let log_format = parse_or(&lookup, "LOG_FORMAT", LogFormat::Pretty)?;

        Ok(Self {
            database_url,
            database_max_connections,
            host,
            port,
            environment,
            unit_timeout: Duration::from_millis(unit_timeout_ms),
            min_transaction_amount,
            job_poll_interval: Duration::from_millis(job_poll_interval_ms),
            job_max_attempts,
            job_retry_backoff: Duration::from_millis(job_retry_backoff_ms),
            job_stale_after: Duration::from_secs(job_stale_after_secs),
            run_migrations,
            log_format,
            service_key,
        })
    }

    /// Check if running in production
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }

    pub fn ledger(&self) -> LedgerConfig {
        LedgerConfig {
            unit_timeout: self.unit_timeout,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.job_max_attempts,
            backoff: self.job_retry_backoff,
        }
    }

    pub fn worker(&self) -> WorkerConfig {
        WorkerConfig {
            poll_interval: self.job_poll_interval,
            retry: self.retry_policy(),
        }
    }

    pub fn maintenance(&self) -> MaintenanceConfig {
        MaintenanceConfig {
            stale_after: self.job_stale_after,
            ..MaintenanceConfig::default()
        }
    }
}

fn parse_or<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::InvalidValue(key)),
        None => Ok(default),
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnv(&'static str),

    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(&'static str),
}
