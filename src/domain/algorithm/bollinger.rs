//! Mean reversion on Bollinger Bands.

use tracing::debug;

use super::{
    config_mismatch, for_each_symbol, request_buy, request_sell, tp_sl_hit, AlgorithmProcessor,
    ExecutionEnv, ExecutionOutcome, SymbolAction,
};
use crate::domain::error::TradebotError;
use crate::domain::indicator::{calculate_bollinger, latest};
use crate::domain::ohlcv::closes;
use crate::domain::signal::{EntrySignal, ExitSignal, MarginType};
use crate::domain::strategy::{AlgorithmConfig, AlgorithmKind, BollingerConfig, Strategy};
use crate::ports::market_data_port::CallContext;

pub const BOLLINGER_KLINE_LIMIT: usize = 30;

#[derive(Debug, Default, Clone, Copy)]
pub struct BollingerProcessor;

impl BollingerProcessor {
    fn evaluate(
        &self,
        strategy: &Strategy,
        config: &BollingerConfig,
        env: &ExecutionEnv<'_>,
        symbol: &str,
        ctx: &CallContext,
    ) -> Result<SymbolAction, TradebotError> {
        let limit = BOLLINGER_KLINE_LIMIT.max(config.period);
        let klines = env
            .market
            .list_klines(ctx, symbol, strategy.cycle.broker_interval(), limit)?;
        if klines.len() < config.period {
            return Err(TradebotError::MarketData {
                symbol: symbol.to_string(),
                reason: format!(
                    "not enough candles to analyze: {} < {}",
                    klines.len(),
                    config.period
                ),
            });
        }

        let closes = closes(&klines);
        let bands = latest(&calculate_bollinger(&closes, config.period, config.std_dev))
            .ok_or_else(|| TradebotError::MarketData {
                symbol: symbol.to_string(),
                reason: "bollinger bands unavailable".to_string(),
            })?;

        if let Some(signal) = env.signals.get_open_signal(symbol, strategy.id)? {
            let Some(order) = signal.order() else {
                return Ok(SymbolAction::Hold);
            };
            let price = env.market.current_price(ctx, symbol)?;
            if tp_sl_hit(order, price, config.take_profit_pct, config.stop_loss_pct)
                || price > bands.upper
            {
                return request_sell(
                    env.signals,
                    ExitSignal {
                        symbol: symbol.to_string(),
                        strategy_id: strategy.id,
                        exit_price: price,
                    },
                );
            }
            return Ok(SymbolAction::Hold);
        }

        let current = closes[closes.len() - 1];
        if current < bands.lower {
            return request_buy(
                env.signals,
                EntrySignal {
                    symbol: symbol.to_string(),
                    strategy_id: strategy.id,
                    entry_price: current,
                    leverage: config.leverage,
                    margin_type: MarginType::Isolated,
                },
            );
        }

        debug!(%symbol, current, lower = bands.lower, upper = bands.upper, "inside bands");
        Ok(SymbolAction::Hold)
    }
}

impl AlgorithmProcessor for BollingerProcessor {
    fn kind(&self) -> AlgorithmKind {
        AlgorithmKind::Bollinger
    }

    fn execute(
        &self,
        strategy: &Strategy,
        env: &ExecutionEnv<'_>,
    ) -> Result<ExecutionOutcome, TradebotError> {
        let AlgorithmConfig::Bollinger(config) = &strategy.config else {
            return Err(config_mismatch(strategy, AlgorithmKind::Bollinger));
        };
        Ok(for_each_symbol(strategy, env, |symbol, ctx| {
            self.evaluate(strategy, config, env, symbol, ctx)
        }))
    }
}
