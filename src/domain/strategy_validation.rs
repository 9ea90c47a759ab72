//! Strategy validation, applied before a strategy is saved or scheduled.

use crate::domain::error::TradebotError;
use crate::domain::strategy::{AlgorithmConfig, Strategy};

pub fn validate_strategy(strategy: &Strategy) -> Result<(), TradebotError> {
    validate_identity(strategy)?;
    validate_symbols(strategy)?;
    validate_algorithm(strategy)?;
    validate_algorithm_config(&strategy.config)?;
    Ok(())
}

fn validate_identity(strategy: &Strategy) -> Result<(), TradebotError> {
    if strategy.name.trim().is_empty() {
        return Err(TradebotError::validation("name", "name can't be empty"));
    }
    if strategy.description.trim().is_empty() {
        return Err(TradebotError::validation(
            "description",
            "description can't be empty",
        ));
    }
    Ok(())
}

fn validate_symbols(strategy: &Strategy) -> Result<(), TradebotError> {
    if strategy.monitored_symbols.is_empty() {
        return Err(TradebotError::validation(
            "monitored_symbols",
            "at least one symbol is required",
        ));
    }
    if strategy
        .monitored_symbols
        .iter()
        .any(|s| s.trim().is_empty())
    {
        return Err(TradebotError::validation(
            "monitored_symbols",
            "symbols can't be blank",
        ));
    }
    Ok(())
}

fn validate_algorithm(strategy: &Strategy) -> Result<(), TradebotError> {
    if strategy.config.kind() != strategy.algorithm {
        return Err(TradebotError::validation(
            "config",
            format!(
                "{} configuration does not match algorithm {}",
                strategy.config.kind(),
                strategy.algorithm
            ),
        ));
    }
    Ok(())
}

fn non_negative(field: &str, value: f64) -> Result<(), TradebotError> {
    if value < 0.0 || value.is_nan() {
        return Err(TradebotError::validation(field, "must be non-negative"));
    }
    Ok(())
}

fn positive(field: &str, value: f64) -> Result<(), TradebotError> {
    if !(value > 0.0) {
        return Err(TradebotError::validation(field, "must be greater than zero"));
    }
    Ok(())
}

pub fn validate_algorithm_config(config: &AlgorithmConfig) -> Result<(), TradebotError> {
    match config {
        AlgorithmConfig::Grid(grid) => {
            if grid.grid_levels < 1 {
                return Err(TradebotError::validation(
                    "grid_levels",
                    "at least one level is required",
                ));
            }
            positive("grid_spacing_pct", grid.grid_spacing_pct)?;
            non_negative("take_profit_pct", grid.take_profit_pct)?;
            non_negative("stop_loss_pct", grid.stop_loss_pct)?;
            non_negative("volume_filter", grid.volume_filter)?;
            non_negative("rsi_oversold", grid.rsi_oversold)?;
            non_negative("min_move_pct", grid.min_move_pct)?;
            non_negative("leverage", grid.leverage)?;
        }
        AlgorithmConfig::Bollinger(bollinger) => {
            positive("take_profit_pct", bollinger.take_profit_pct)?;
            positive("stop_loss_pct", bollinger.stop_loss_pct)?;
            non_negative("leverage", bollinger.leverage)?;
            if bollinger.period < 2 {
                return Err(TradebotError::validation("period", "period must be at least 2"));
            }
            positive("std_dev", bollinger.std_dev)?;
        }
        AlgorithmConfig::Scalping(scalping) => {
            positive("take_profit_pct", scalping.take_profit_pct)?;
            positive("stop_loss_pct", scalping.stop_loss_pct)?;
            non_negative("leverage", scalping.leverage)?;
            non_negative("rsi_max", scalping.rsi_max)?;
            non_negative("volume_multiplier", scalping.volume_multiplier)?;
            if scalping.rsi_max > 0.0 && scalping.rsi_period == 0 {
                return Err(TradebotError::validation(
                    "rsi_period",
                    "rsi_period is required when rsi_max is set",
                ));
            }
        }
        AlgorithmConfig::HeikinAshi | AlgorithmConfig::Volume => {}
    }
    Ok(())
}
