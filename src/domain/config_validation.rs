//! Worker configuration: validation and typed settings.
//!
//! Validates every INI key the worker reads before anything is started.

use std::time::Duration;

use crate::domain::error::TradebotError;
use crate::domain::signal::{FeeSchedule, DEFAULT_FEE_RATE_PCT};
use crate::ports::config_port::ConfigPort;

pub const DEFAULT_WORKERS: i64 = 4;
pub const DEFAULT_MAX_OPEN_SIGNALS: i64 = 4;
pub const DEFAULT_POOL_SIZE: i64 = 8;
pub const DEFAULT_BROKER_TIMEOUT_SECS: i64 = 30;
pub const DEFAULT_REST_URL: &str = "https://api.binance.com";

/// Typed view of the worker configuration file.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerSettings {
    pub sqlite_path: String,
    pub pool_size: u32,
    pub account_amount: f64,
    pub account_orders: i64,
    pub currency: String,
    pub rest_url: String,
    pub broker_timeout: Duration,
    pub workers: usize,
    pub max_open_signals: usize,
    pub fees: FeeSchedule,
    pub metrics_enabled: bool,
}

impl WorkerSettings {
    /// Validates `config` and reads it with defaults applied.
    pub fn from_config(config: &dyn ConfigPort) -> Result<Self, TradebotError> {
        validate_worker_config(config)?;
        let sqlite_path = config
            .get_string("sqlite", "path")
            .ok_or_else(|| missing("sqlite", "path"))?;

        Ok(WorkerSettings {
            sqlite_path,
            pool_size: config.get_int("sqlite", "pool_size", DEFAULT_POOL_SIZE) as u32,
            account_amount: config.get_double("account", "amount", 0.0),
            account_orders: config.get_int("account", "available_orders", 0),
            currency: config
                .get_string("account", "currency")
                .unwrap_or_else(|| "USDT".to_string()),
            rest_url: config
                .get_string("broker", "rest_url")
                .unwrap_or_else(|| DEFAULT_REST_URL.to_string()),
            broker_timeout: Duration::from_secs(
                config.get_int("broker", "timeout_secs", DEFAULT_BROKER_TIMEOUT_SECS) as u64,
            ),
            workers: config.get_int("scheduler", "workers", DEFAULT_WORKERS) as usize,
            max_open_signals: config.get_int(
                "scheduler",
                "max_open_signals",
                DEFAULT_MAX_OPEN_SIGNALS,
            ) as usize,
            fees: FeeSchedule {
                rate_pct: config.get_double("fees", "rate_pct", DEFAULT_FEE_RATE_PCT),
            },
            metrics_enabled: config.get_bool("metrics", "enabled", true),
        })
    }
}

pub fn validate_worker_config(config: &dyn ConfigPort) -> Result<(), TradebotError> {
    validate_sqlite(config)?;
    validate_account(config)?;
    validate_broker(config)?;
    validate_scheduler(config)?;
    validate_fees(config)?;
    Ok(())
}

fn missing(section: &str, key: &str) -> TradebotError {
    TradebotError::ConfigMissing {
        section: section.to_string(),
        key: key.to_string(),
    }
}

fn invalid(section: &str, key: &str, reason: &str) -> TradebotError {
    TradebotError::ConfigInvalid {
        section: section.to_string(),
        key: key.to_string(),
        reason: reason.to_string(),
    }
}

fn validate_sqlite(config: &dyn ConfigPort) -> Result<(), TradebotError> {
    match config.get_string("sqlite", "path") {
        Some(path) if !path.trim().is_empty() => {}
        _ => return Err(missing("sqlite", "path")),
    }
    if config.get_int("sqlite", "pool_size", DEFAULT_POOL_SIZE) < 1 {
        return Err(invalid("sqlite", "pool_size", "pool_size must be at least 1"));
    }
    Ok(())
}

fn validate_account(config: &dyn ConfigPort) -> Result<(), TradebotError> {
    if config.get_double("account", "amount", 0.0) < 0.0 {
        return Err(invalid("account", "amount", "amount must be non-negative"));
    }
    if config.get_int("account", "available_orders", 0) < 0 {
        return Err(invalid(
            "account",
            "available_orders",
            "available_orders must be non-negative",
        ));
    }
    Ok(())
}

fn validate_broker(config: &dyn ConfigPort) -> Result<(), TradebotError> {
    if let Some(url) = config.get_string("broker", "rest_url") {
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(invalid("broker", "rest_url", "rest_url must be an http(s) URL"));
        }
    }
    if config.get_int("broker", "timeout_secs", DEFAULT_BROKER_TIMEOUT_SECS) < 1 {
        return Err(invalid("broker", "timeout_secs", "timeout_secs must be at least 1"));
    }
    Ok(())
}

fn validate_scheduler(config: &dyn ConfigPort) -> Result<(), TradebotError> {
    if config.get_int("scheduler", "workers", DEFAULT_WORKERS) < 1 {
        return Err(invalid("scheduler", "workers", "workers must be at least 1"));
    }
    if config.get_int("scheduler", "max_open_signals", DEFAULT_MAX_OPEN_SIGNALS) < 1 {
        return Err(invalid(
            "scheduler",
            "max_open_signals",
            "max_open_signals must be at least 1",
        ));
    }
    Ok(())
}

fn validate_fees(config: &dyn ConfigPort) -> Result<(), TradebotError> {
    let rate = config.get_double("fees", "rate_pct", DEFAULT_FEE_RATE_PCT);
    if !(0.0..100.0).contains(&rate) {
        return Err(invalid("fees", "rate_pct", "rate_pct must be in [0, 100)"));
    }
    Ok(())
}
