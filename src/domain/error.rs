//! Domain error types.

use crate::domain::strategy::AlgorithmKind;

/// Top-level error type for tradebot.
#[derive(Debug, thiserror::Error)]
pub enum TradebotError {
    #[error("database error: {reason}")]
    Database { reason: String },

    #[error("database query error: {reason}")]
    DatabaseQuery { reason: String },

    #[error("config parse error in {file}: {reason}")]
    ConfigParse { file: String, reason: String },

    #[error("missing config key [{section}] {key}")]
    ConfigMissing { section: String, key: String },

    #[error("invalid config value [{section}] {key}: {reason}")]
    ConfigInvalid {
        section: String,
        key: String,
        reason: String,
    },

    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("market data error for {symbol}: {reason}")]
    MarketData { symbol: String, reason: String },

    #[error("deadline exceeded while {operation}")]
    Timeout { operation: String },

    #[error("task queue error: {reason}")]
    Queue { reason: String },

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),

    #[error("signal not found for {key}")]
    SignalNotFound { key: String },

    #[error("an open signal already exists for {key}")]
    DuplicateOpenSignal { key: String },

    #[error("signal {id} is already closed")]
    SignalAlreadyClosed { id: i64 },

    #[error("no available order slots on the account")]
    NoAvailableOrders,

    #[error("account not found")]
    AccountNotFound,

    #[error("account already exists")]
    AccountExists,

    #[error("strategy {id} not found")]
    StrategyNotFound { id: String },

    #[error("algorithm {kind} is not implemented")]
    AlgorithmNotImplemented { kind: AlgorithmKind },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl TradebotError {
    /// Infrastructure failures that may clear up on the next scheduler tick.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            TradebotError::Database { .. }
                | TradebotError::DatabaseQuery { .. }
                | TradebotError::MarketData { .. }
                | TradebotError::Timeout { .. }
                | TradebotError::Queue { .. }
                | TradebotError::Io(_)
        )
    }

    pub fn validation(field: &str, reason: impl Into<String>) -> Self {
        TradebotError::Validation {
            field: field.to_string(),
            reason: reason.into(),
        }
    }
}

impl From<&TradebotError> for std::process::ExitCode {
    fn from(err: &TradebotError) -> Self {
        let code: u8 = match err {
            TradebotError::Io(_) => 1,
            TradebotError::ConfigParse { .. }
            | TradebotError::ConfigMissing { .. }
            | TradebotError::ConfigInvalid { .. }
            | TradebotError::Validation { .. }
            | TradebotError::Serialization(_) => 2,
            TradebotError::Database { .. } | TradebotError::DatabaseQuery { .. } => 3,
            TradebotError::MarketData { .. }
            | TradebotError::Timeout { .. }
            | TradebotError::Queue { .. } => 4,
            TradebotError::SignalNotFound { .. }
            | TradebotError::SignalAlreadyClosed { .. }
            | TradebotError::DuplicateOpenSignal { .. }
            | TradebotError::NoAvailableOrders
            | TradebotError::AccountNotFound
            | TradebotError::AccountExists
            | TradebotError::StrategyNotFound { .. }
            | TradebotError::AlgorithmNotImplemented { .. } => 5,
        };
        std::process::ExitCode::from(code)
    }
}
