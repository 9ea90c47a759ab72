//! Short-horizon momentum entries with fixed take-profit / stop-loss exits.

use tracing::debug;

use super::{
    config_mismatch, for_each_symbol, request_buy, request_sell, tp_sl_hit, AlgorithmProcessor,
    ExecutionEnv, ExecutionOutcome, SymbolAction,
};
use crate::domain::error::TradebotError;
use crate::domain::indicator::{calculate_ema, calculate_rsi, latest};
use crate::domain::ohlcv::{closes, mean_volume};
use crate::domain::signal::{EntrySignal, ExitSignal, MarginType};
use crate::domain::strategy::{AlgorithmConfig, AlgorithmKind, ScalpingConfig, Strategy};
use crate::ports::market_data_port::CallContext;

/// Enough candles for both indicators plus the rising-close comparison.
pub fn kline_limit(config: &ScalpingConfig) -> usize {
    config.ema_period.max(config.rsi_period + 1).max(3) + 2
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ScalpingProcessor;

impl ScalpingProcessor {
    fn evaluate(
        &self,
        strategy: &Strategy,
        config: &ScalpingConfig,
        env: &ExecutionEnv<'_>,
        symbol: &str,
        ctx: &CallContext,
    ) -> Result<SymbolAction, TradebotError> {
        let klines = env.market.list_klines(
            ctx,
            symbol,
            strategy.cycle.broker_interval(),
            kline_limit(config),
        )?;
        if klines.len() < 2 {
            return Err(TradebotError::MarketData {
                symbol: symbol.to_string(),
                reason: format!("not enough candles to analyze: {}", klines.len()),
            });
        }

        if let Some(signal) = env.signals.get_open_signal(symbol, strategy.id)? {
            let Some(order) = signal.order() else {
                return Ok(SymbolAction::Hold);
            };
            let price = env.market.current_price(ctx, symbol)?;
            if tp_sl_hit(order, price, config.take_profit_pct, config.stop_loss_pct) {
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

        let closes = closes(&klines);
        let latest_close = closes[closes.len() - 1];
        let prev_close = closes[closes.len() - 2];

        if latest_close <= prev_close {
            return Ok(SymbolAction::Hold);
        }

        if config.ema_period > 0 {
            match latest(&calculate_ema(&closes, config.ema_period)) {
                Some(ema) if latest_close > ema => {}
                ema => {
                    debug!(%symbol, latest_close, ?ema, "not above trend");
                    return Ok(SymbolAction::Hold);
                }
            }
        }

        if config.rsi_max > 0.0 {
            match latest(&calculate_rsi(&closes, config.rsi_period)) {
                Some(rsi) if rsi <= config.rsi_max => {}
                rsi => {
                    debug!(%symbol, ?rsi, max = config.rsi_max, "rsi too high");
                    return Ok(SymbolAction::Hold);
                }
            }
        }

        if config.volume_multiplier > 0.0 {
            let (prior, last) = klines.split_at(klines.len() - 1);
            let threshold = config.volume_multiplier * mean_volume(prior);
            if last[0].volume < threshold {
                debug!(%symbol, volume = last[0].volume, threshold, "volume too thin");
                return Ok(SymbolAction::Hold);
            }
        }

        request_buy(
            env.signals,
            EntrySignal {
                symbol: symbol.to_string(),
                strategy_id: strategy.id,
                entry_price: latest_close,
                leverage: config.leverage,
                margin_type: MarginType::Isolated,
            },
        )
    }
}

impl AlgorithmProcessor for ScalpingProcessor {
    fn kind(&self) -> AlgorithmKind {
        AlgorithmKind::Scalping
    }

    fn execute(
        &self,
        strategy: &Strategy,
        env: &ExecutionEnv<'_>,
    ) -> Result<ExecutionOutcome, TradebotError> {
        let AlgorithmConfig::Scalping(config) = &strategy.config else {
            return Err(config_mismatch(strategy, AlgorithmKind::Scalping));
        };
        Ok(for_each_symbol(strategy, env, |symbol, ctx| {
            self.evaluate(strategy, config, env, symbol, ctx)
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::algorithm::test_support::*;
    use crate::domain::strategy::Cycle;

    fn strategy(config: ScalpingConfig) -> Strategy {
        Strategy::new(
            "scalper",
            "scalping test",
            vec!["SOLUSDT".into()],
            Cycle::OneMinute,
            AlgorithmConfig::Scalping(config),
        )
    }

    fn plain() -> ScalpingConfig {
        ScalpingConfig {
            take_profit_pct: 1.0,
            stop_loss_pct: 1.0,
            ema_period: 0,
            rsi_period: 14,
            ..ScalpingConfig::default()
        }
    }

    #[test]
    fn limit_covers_indicators() {
        assert_eq!(kline_limit(&ScalpingConfig::default()), 17);
        assert_eq!(kline_limit(&plain()), 17);
        let small = ScalpingConfig {
            ema_period: 0,
            rsi_period: 0,
            ..ScalpingConfig::default()
        };
        assert_eq!(kline_limit(&small), 5);
    }

    #[test]
    fn rising_close_buys() {
        let market = ScriptedMarket::default()
            .with_klines("SOLUSDT", klines_from(&[10.0, 10.0, 10.5], &[]));
        let signals = RecordingSignals::default();
        let env = ExecutionEnv::new(&market, &signals);

        let outcome = ScalpingProcessor.execute(&strategy(plain()), &env).unwrap();
        assert_eq!(outcome.buys, 1);
        assert!((signals.buys.borrow()[0].entry_price - 10.5).abs() < 1e-9);
    }

    #[test]
    fn falling_close_holds() {
        let market = ScriptedMarket::default()
            .with_klines("SOLUSDT", klines_from(&[10.0, 10.5, 10.2], &[]));
        let signals = RecordingSignals::default();
        let env = ExecutionEnv::new(&market, &signals);

        let outcome = ScalpingProcessor.execute(&strategy(plain()), &env).unwrap();
        assert_eq!(outcome.buys, 0);
    }

    #[test]
    fn below_ema_holds() {
        // sharp drop then a small bounce: rising, but under the trend
        let closes = [20.0, 20.0, 20.0, 20.0, 12.0, 12.5];
        let market = ScriptedMarket::default().with_klines("SOLUSDT", klines_from(&closes, &[]));
        let signals = RecordingSignals::default();
        let env = ExecutionEnv::new(&market, &signals);
        let config = ScalpingConfig {
            ema_period: 4,
            ..plain()
        };

        let outcome = ScalpingProcessor.execute(&strategy(config), &env).unwrap();
        assert_eq!(outcome.buys, 0);
    }

    #[test]
    fn rsi_cap_blocks_overbought() {
        let closes: Vec<f64> = (0..17).map(|i| 10.0 + i as f64).collect();
        let market = ScriptedMarket::default().with_klines("SOLUSDT", klines_from(&closes, &[]));
        let signals = RecordingSignals::default();
        let env = ExecutionEnv::new(&market, &signals);
        let config = ScalpingConfig {
            rsi_max: 70.0,
            ..plain()
        };

        let outcome = ScalpingProcessor.execute(&strategy(config), &env).unwrap();
        assert_eq!(outcome.buys, 0);
    }

    #[test]
    fn volume_confirmation() {
        let closes = [10.0, 10.0, 10.0, 10.5];
        let config = ScalpingConfig {
            volume_multiplier: 2.0,
            ..plain()
        };

        let thin = ScriptedMarket::default()
            .with_klines("SOLUSDT", klines_from(&closes, &[100.0, 100.0, 100.0, 150.0]));
        let signals = RecordingSignals::default();
        let outcome = ScalpingProcessor
            .execute(&strategy(config.clone()), &ExecutionEnv::new(&thin, &signals))
            .unwrap();
        assert_eq!(outcome.buys, 0);

        let heavy = ScriptedMarket::default()
            .with_klines("SOLUSDT", klines_from(&closes, &[100.0, 100.0, 100.0, 250.0]));
        let signals = RecordingSignals::default();
        let outcome = ScalpingProcessor
            .execute(&strategy(config), &ExecutionEnv::new(&heavy, &signals))
            .unwrap();
        assert_eq!(outcome.buys, 1);
    }

    #[test]
    fn open_signal_only_exits_on_thresholds() {
        let s = strategy(plain());
        let market = ScriptedMarket::default()
            .with_klines("SOLUSDT", klines_from(&[10.0, 10.0, 10.5], &[]))
            .with_price("SOLUSDT", 10.05);
        let signals = RecordingSignals::default().with_open("SOLUSDT", s.id, 10.0, 0.0);
        let env = ExecutionEnv::new(&market, &signals);

        let outcome = ScalpingProcessor.execute(&s, &env).unwrap();
        assert_eq!(outcome.sells, 0);
        assert!(signals.buys.borrow().is_empty());

        let market = market.with_price("SOLUSDT", 10.2);
        let env = ExecutionEnv::new(&market, &signals);
        let outcome = ScalpingProcessor.execute(&s, &env).unwrap();
        assert_eq!(outcome.sells, 1);
    }

    #[test]
    fn single_candle_is_symbol_failure() {
        let market = ScriptedMarket::default().with_klines("SOLUSDT", klines_from(&[10.0], &[]));
        let signals = RecordingSignals::default();
        let env = ExecutionEnv::new(&market, &signals);

        let outcome = ScalpingProcessor.execute(&strategy(plain()), &env).unwrap();
        assert_eq!(outcome.failures.len(), 1);
    }
}
