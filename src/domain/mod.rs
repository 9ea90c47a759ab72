//! Core domain types and logic.

pub mod account;
pub mod algorithm;
pub mod config_validation;
pub mod error;
pub mod indicator;
pub mod lifecycle;
pub mod ohlcv;
pub mod scheduler;
pub mod signal;
pub mod strategy;
pub mod strategy_validation;
