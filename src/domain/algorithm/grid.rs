//! Grid trading.
//!
//! Each cycle rebuilds a symmetric price ladder around the latest close and
//! evaluates it synchronously: buy at the highest rung below the close, take
//! profit once price clears the next rung above the entry.

use chrono::Utc;
use tracing::{debug, info, warn};

use super::{
    config_mismatch, for_each_symbol, request_buy, request_sell, AlgorithmProcessor,
    ExecutionEnv, ExecutionOutcome, SymbolAction,
};
use crate::domain::error::TradebotError;
use crate::domain::indicator::{calculate_rsi, latest};
use crate::domain::ohlcv::closes;
use crate::domain::signal::{EntrySignal, ExitSignal, MarginType, Signal};
use crate::domain::strategy::{AlgorithmConfig, AlgorithmKind, GridConfig, Strategy};
use crate::ports::market_data_port::CallContext;

pub const GRID_KLINE_LIMIT: usize = 100;
pub const GRID_RSI_PERIOD: usize = 14;

/// `level[i] = close + (i - levels/2) × close × spacing%` with integer halving.
pub fn grid_levels(close: f64, levels: u32, spacing_pct: f64) -> Vec<f64> {
    let spacing = close * spacing_pct / 100.0;
    let half = i64::from(levels / 2);
    (0..i64::from(levels))
        .map(|i| close + (i - half) as f64 * spacing)
        .collect()
}

/// Highest rung strictly below `price`.
pub fn buy_level(levels: &[f64], price: f64) -> Option<f64> {
    levels
        .iter()
        .copied()
        .filter(|&level| level < price)
        .max_by(f64::total_cmp)
}

/// Lowest rung strictly above `price`.
pub fn next_level_above(levels: &[f64], price: f64) -> Option<f64> {
    levels
        .iter()
        .copied()
        .filter(|&level| level > price)
        .min_by(f64::total_cmp)
}

#[derive(Debug, Default, Clone, Copy)]
pub struct GridProcessor;

impl GridProcessor {
    fn evaluate(
        &self,
        strategy: &Strategy,
        config: &GridConfig,
        env: &ExecutionEnv<'_>,
        symbol: &str,
        ctx: &CallContext,
    ) -> Result<SymbolAction, TradebotError> {
        let klines = env.market.list_klines(
            ctx,
            symbol,
            strategy.cycle.broker_interval(),
            GRID_KLINE_LIMIT,
        )?;
        let Some(last) = klines.last() else {
            debug!(%symbol, "no klines returned");
            return Ok(SymbolAction::Hold);
        };
        let close = last.close;

        if config.volume_filter > 0.0 {
            match env.market.get_24h_volume(ctx, symbol) {
                Ok(volume) if volume < config.volume_filter => {
                    info!(
                        %symbol,
                        volume,
                        minimum = config.volume_filter,
                        "24h volume under minimum, skipping symbol"
                    );
                    return Ok(SymbolAction::Hold);
                }
                Ok(_) => {}
                Err(e) => warn!(%symbol, error = %e, "24h volume unavailable, filter not applied"),
            }
        }

        let levels = grid_levels(close, config.grid_levels, config.grid_spacing_pct);

        match env.signals.get_open_signal(symbol, strategy.id)? {
            Some(signal) => self.evaluate_exit(strategy, config, env, symbol, ctx, &signal, &levels),
            None => {
                let Some(entry_price) = buy_level(&levels, close) else {
                    return Ok(SymbolAction::Hold);
                };

                if config.rsi_oversold > 0.0 {
                    let rsi = latest(&calculate_rsi(&closes(&klines), GRID_RSI_PERIOD));
                    match rsi {
                        Some(value) if value <= config.rsi_oversold => {}
                        other => {
                            debug!(%symbol, rsi = ?other, "rsi gate closed");
                            return Ok(SymbolAction::Hold);
                        }
                    }
                }

                request_buy(
                    env.signals,
                    EntrySignal {
                        symbol: symbol.to_string(),
                        strategy_id: strategy.id,
                        entry_price,
                        leverage: config.leverage,
                        margin_type: MarginType::Isolated,
                    },
                )
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn evaluate_exit(
        &self,
        strategy: &Strategy,
        config: &GridConfig,
        env: &ExecutionEnv<'_>,
        symbol: &str,
        ctx: &CallContext,
        signal: &Signal,
        levels: &[f64],
    ) -> Result<SymbolAction, TradebotError> {
        let Some(order) = signal.order() else {
            return Ok(SymbolAction::Hold);
        };
        let price = env.market.current_price(ctx, symbol)?;
        let pnl = order.pnl_pct(price);

        let stop_loss = config.stop_loss_pct > 0.0 && pnl <= -config.stop_loss_pct;

        let target = next_level_above(levels, order.entry_price);
        let take_profit = config.take_profit_pct > 0.0
            && pnl >= config.take_profit_pct
            && target.is_none_or(|level| price >= level);

        let held_minutes = (Utc::now() - signal.created_at).num_minutes();
        let moved_pct = (price - order.entry_price).abs() / order.entry_price * 100.0;
        let churn_ok = held_minutes >= i64::from(config.min_hold_minutes)
            && moved_pct >= config.min_move_pct;

        if stop_loss || (take_profit && churn_ok) {
            info!(%symbol, price, pnl, stop_loss, "grid exit");
            return request_sell(
                env.signals,
                ExitSignal {
                    symbol: symbol.to_string(),
                    strategy_id: strategy.id,
                    exit_price: price,
                },
            );
        }

        if take_profit {
            debug!(%symbol, held_minutes, moved_pct, "take profit held back by churn gates");
        }
        Ok(SymbolAction::Hold)
    }
}

impl AlgorithmProcessor for GridProcessor {
    fn kind(&self) -> AlgorithmKind {
        AlgorithmKind::Grid
    }

    fn execute(
        &self,
        strategy: &Strategy,
        env: &ExecutionEnv<'_>,
    ) -> Result<ExecutionOutcome, TradebotError> {
        let AlgorithmConfig::Grid(config) = &strategy.config else {
            return Err(config_mismatch(strategy, AlgorithmKind::Grid));
        };
        Ok(for_each_symbol(strategy, env, |symbol, ctx| {
            self.evaluate(strategy, config, env, symbol, ctx)
        }))
    }
}
