//! Environment-driven configuration.

use crate::error::{AppError, AppResult};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Postgres connection string; absent means the in-memory store.
    pub database_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct InvokerConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub multiplier: u32,
    pub call_timeout_ms: u64,
}

#[derive(Debug, Clone)]
pub struct ReconcileConfig {
    pub ledger_base_url: String,
    pub tolerance_units: i64,
    pub poll_interval_secs: u64,
    pub crypto_asset: String,
}

#[derive(Debug, Clone)]
pub struct ExpiryConfig {
    pub max_age_secs: u64,
    pub sweep_interval_secs: u64,
}

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub store: StoreConfig,
    pub invoker: InvokerConfig,
    pub reconcile: ReconcileConfig,
    pub expiry: ExpiryConfig,
    pub logging: LoggingConfig,
    /// Hosted checkout page; `{id}` is replaced with the transaction id.
    pub checkout_url_template: String,
    /// Public base URL providers use to reach the finalize endpoint.
    pub public_base_url: String,
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> AppResult<T> {
    match std::env::var(key) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| AppError::validation(format!("cannot parse {}: {}", key, raw), Some(key))),
        Err(_) => Ok(default),
    }
}

impl AppConfig {
    pub fn from_env() -> AppResult<Self> {
        let config = Self {
            server: ServerConfig {
                host: env_or("HOST", "0.0.0.0"),
                port: env_parse("PORT", 8080)?,
            },
            store: StoreConfig {
                database_url: std::env::var("DATABASE_URL").ok(),
            },
            invoker: InvokerConfig {
                max_attempts: env_parse("INVOKER_MAX_ATTEMPTS", 3)?,
                base_delay_ms: env_parse("INVOKER_BASE_DELAY_MS", 1_000)?,
                multiplier: env_parse("INVOKER_BACKOFF_MULTIPLIER", 2)?,
                call_timeout_ms: env_parse("INVOKER_CALL_TIMEOUT_MS", 10_000)?,
            },
            reconcile: ReconcileConfig {
                ledger_base_url: env_or("LEDGER_BASE_URL", "https://mempool.space"),
                tolerance_units: env_parse("RECONCILE_TOLERANCE_UNITS", 5_000)?,
                poll_interval_secs: env_parse("RECONCILE_POLL_INTERVAL_SECS", 30)?,
                crypto_asset: env_or("CRYPTO_ASSET", "BTC"),
            },
            expiry: ExpiryConfig {
                max_age_secs: env_parse("EXPIRY_MAX_AGE_SECS", 1_800)?,
                sweep_interval_secs: env_parse("EXPIRY_SWEEP_INTERVAL_SECS", 300)?,
            },
            logging: LoggingConfig {
                level: env_or("LOG_LEVEL", "info"),
                json: env_or("LOG_FORMAT", "plain").eq_ignore_ascii_case("json"),
            },
            checkout_url_template: env_or(
                "CHECKOUT_URL_TEMPLATE",
                "http://localhost:8080/checkout/{id}",
            ),
            public_base_url: env_or("PUBLIC_BASE_URL", "http://localhost:8080"),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> AppResult<()> {
        if self.invoker.max_attempts == 0 {
            return Err(AppError::validation(
                "INVOKER_MAX_ATTEMPTS must be at least 1",
                Some("INVOKER_MAX_ATTEMPTS"),
            ));
        }
        if self.invoker.multiplier == 0 {
            return Err(AppError::validation(
                "INVOKER_BACKOFF_MULTIPLIER must be at least 1",
                Some("INVOKER_BACKOFF_MULTIPLIER"),
            ));
        }
        if self.reconcile.tolerance_units < 0 {
            return Err(AppError::validation(
                "RECONCILE_TOLERANCE_UNITS must not be negative",
                Some("RECONCILE_TOLERANCE_UNITS"),
            ));
        }
        if !self.checkout_url_template.contains("{id}") {
            return Err(AppError::validation(
                "CHECKOUT_URL_TEMPLATE must contain {id}",
                Some("CHECKOUT_URL_TEMPLATE"),
            ));
        }
        Ok(())
    }

    pub fn finalize_url(&self) -> String {
        format!(
            "{}/payments/finalize",
            self.public_base_url.trim_end_matches('/')
        )
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.invoker.call_timeout_ms)
    }

    pub fn backoff_base_delay(&self) -> Duration {
        Duration::from_millis(self.invoker.base_delay_ms)
    }
}
