//! Algorithm processors and their registry.
//!
//! A processor evaluates every monitored symbol of a strategy and turns its
//! decisions into buy/sell requests on a [`SignalPort`]. One symbol failing is
//! logged and counted; it never stops the remaining symbols.

pub mod bollinger;
pub mod grid;
pub mod placeholder;
pub mod scalping;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::domain::error::TradebotError;
use crate::domain::lifecycle::{BuyOutcome, SignalPort, DEFAULT_BROKER_TIMEOUT};
use crate::domain::signal::{EntrySignal, ExitSignal, Order};
use crate::domain::strategy::{AlgorithmKind, Strategy};
use crate::ports::market_data_port::{CallContext, MarketDataPort};

pub use bollinger::BollingerProcessor;
pub use grid::GridProcessor;
pub use placeholder::PlaceholderProcessor;
pub use scalping::ScalpingProcessor;

/// Ports a processor works against during one execution.
pub struct ExecutionEnv<'a> {
    pub market: &'a dyn MarketDataPort,
    pub signals: &'a dyn SignalPort,
    /// Deadline budget for the broker calls of a single symbol.
    pub symbol_timeout: Duration,
}

impl<'a> ExecutionEnv<'a> {
    pub fn new(market: &'a dyn MarketDataPort, signals: &'a dyn SignalPort) -> Self {
        ExecutionEnv {
            market,
            signals,
            symbol_timeout: DEFAULT_BROKER_TIMEOUT,
        }
    }

    pub fn with_symbol_timeout(mut self, timeout: Duration) -> Self {
        self.symbol_timeout = timeout;
        self
    }
}

/// What a per-symbol evaluation ended up doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolAction {
    Hold,
    Bought,
    Sold,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionOutcome {
    pub symbols_evaluated: usize,
    pub buys: usize,
    pub sells: usize,
    pub failures: Vec<(String, String)>,
}

impl ExecutionOutcome {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn summary(&self) -> String {
        let mut msg = format!(
            "evaluated {} symbol(s): {} buy(s), {} sell(s)",
            self.symbols_evaluated, self.buys, self.sells
        );
        if !self.failures.is_empty() {
            let detail: Vec<String> = self
                .failures
                .iter()
                .map(|(symbol, reason)| format!("{symbol}: {reason}"))
                .collect();
            msg.push_str(&format!("; {} failure(s): {}", self.failures.len(), detail.join("; ")));
        }
        msg
    }
}

pub trait AlgorithmProcessor {
    fn kind(&self) -> AlgorithmKind;

    fn execute(
        &self,
        strategy: &Strategy,
        env: &ExecutionEnv<'_>,
    ) -> Result<ExecutionOutcome, TradebotError>;
}

/// Runs `evaluate` for each monitored symbol with a fresh deadline.
pub fn for_each_symbol<F>(strategy: &Strategy, env: &ExecutionEnv<'_>, mut evaluate: F) -> ExecutionOutcome
where
    F: FnMut(&str, &CallContext) -> Result<SymbolAction, TradebotError>,
{
    let mut outcome = ExecutionOutcome::default();

    for symbol in &strategy.monitored_symbols {
        outcome.symbols_evaluated += 1;
        let ctx = CallContext::with_timeout(env.symbol_timeout);
        match evaluate(symbol, &ctx) {
            Ok(SymbolAction::Hold) => debug!(strategy = %strategy.name, %symbol, "hold"),
            Ok(SymbolAction::Bought) => outcome.buys += 1,
            Ok(SymbolAction::Sold) => outcome.sells += 1,
            Err(e) => {
                warn!(
                    strategy = %strategy.name,
                    algorithm = %strategy.algorithm,
                    %symbol,
                    error = %e,
                    "symbol evaluation failed"
                );
                outcome.failures.push((symbol.clone(), e.to_string()));
            }
        }
    }

    outcome
}

/// Submits a buy request; only a newly opened signal counts as a buy.
pub(crate) fn request_buy(
    signals: &dyn SignalPort,
    entry: EntrySignal,
) -> Result<SymbolAction, TradebotError> {
    match signals.generate_buy_signal(&entry)? {
        BuyOutcome::Opened(_) => Ok(SymbolAction::Bought),
        BuyOutcome::NoCapacity | BuyOutcome::AlreadyOpen => Ok(SymbolAction::Hold),
    }
}

pub(crate) fn request_sell(
    signals: &dyn SignalPort,
    exit: ExitSignal,
) -> Result<SymbolAction, TradebotError> {
    signals.generate_sell_signal(&exit)?;
    Ok(SymbolAction::Sold)
}

/// Take-profit / stop-loss check on the leverage-scaled pnl of an order.
/// A threshold of zero or less is disabled.
pub(crate) fn tp_sl_hit(order: &Order, price: f64, take_profit_pct: f64, stop_loss_pct: f64) -> bool {
    let pnl = order.pnl_pct(price);
    (take_profit_pct > 0.0 && pnl >= take_profit_pct) || (stop_loss_pct > 0.0 && pnl <= -stop_loss_pct)
}

pub(crate) fn config_mismatch(strategy: &Strategy, expected: AlgorithmKind) -> TradebotError {
    TradebotError::validation(
        "config",
        format!(
            "strategy {} carries {} configuration, expected {expected}",
            strategy.id,
            strategy.config.kind()
        ),
    )
}

/// Processors keyed by algorithm kind.
#[derive(Default, Clone)]
pub struct AlgorithmRegistry {
    processors: HashMap<AlgorithmKind, Arc<dyn AlgorithmProcessor + Send + Sync>>,
}

impl AlgorithmRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every known algorithm, including placeholders.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(GridProcessor));
        registry.register(Arc::new(BollingerProcessor));
        registry.register(Arc::new(ScalpingProcessor));
        registry.register(Arc::new(PlaceholderProcessor::new(AlgorithmKind::HeikinAshi)));
        registry.register(Arc::new(PlaceholderProcessor::new(AlgorithmKind::Volume)));
        registry
    }

    pub fn register(&mut self, processor: Arc<dyn AlgorithmProcessor + Send + Sync>) {
        self.processors.insert(processor.kind(), processor);
    }

    pub fn get(&self, kind: AlgorithmKind) -> Option<Arc<dyn AlgorithmProcessor + Send + Sync>> {
        self.processors.get(&kind).cloned()
    }

    pub fn len(&self) -> usize {
        self.processors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processors.is_empty()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    //! Scripted broker and signal port shared by the processor tests.

    use std::cell::RefCell;
    use std::collections::HashMap;

    use chrono::{DateTime, Duration as ChronoDuration, Utc};

    use super::*;
    use crate::domain::ohlcv::{Kline, TickerPrice};
    use crate::domain::signal::{
        entry_economics, open_signal, FeeSchedule, MarginType, Signal,
    };
    use crate::domain::strategy::StrategyId;

    pub fn klines_from(closes: &[f64], volumes: &[f64]) -> Vec<Kline> {
        let start = DateTime::<Utc>::UNIX_EPOCH;
        closes
            .iter()
            .enumerate()
            .map(|(i, &close)| Kline {
                open_time: start + ChronoDuration::minutes(i as i64),
                open: close,
                high: close,
                low: close,
                close,
                volume: volumes.get(i).copied().unwrap_or(1.0),
                close_time: start + ChronoDuration::minutes(i as i64 + 1),
            })
            .collect()
    }

    #[derive(Default)]
    pub struct ScriptedMarket {
        pub klines: HashMap<String, Vec<Kline>>,
        pub prices: HashMap<String, f64>,
        pub volume_24h: f64,
        pub kline_requests: RefCell<Vec<(String, String, usize)>>,
    }

    impl ScriptedMarket {
        pub fn with_klines(mut self, symbol: &str, klines: Vec<Kline>) -> Self {
            self.klines.insert(symbol.to_string(), klines);
            self
        }

        pub fn with_price(mut self, symbol: &str, price: f64) -> Self {
            self.prices.insert(symbol.to_string(), price);
            self
        }

        pub fn with_volume(mut self, volume: f64) -> Self {
            self.volume_24h = volume;
            self
        }
    }

    impl MarketDataPort for ScriptedMarket {
        fn list_ticker_prices(
            &self,
            _ctx: &CallContext,
            symbol: &str,
        ) -> Result<Vec<TickerPrice>, TradebotError> {
            Ok(self
                .prices
                .get(symbol)
                .map(|&price| TickerPrice {
                    symbol: symbol.to_string(),
                    price,
                })
                .into_iter()
                .collect())
        }

        fn list_klines(
            &self,
            _ctx: &CallContext,
            symbol: &str,
            interval: &str,
            limit: usize,
        ) -> Result<Vec<Kline>, TradebotError> {
            self.kline_requests
                .borrow_mut()
                .push((symbol.to_string(), interval.to_string(), limit));
            match self.klines.get(symbol) {
                Some(klines) => Ok(klines[klines.len().saturating_sub(limit)..].to_vec()),
                None => Err(TradebotError::MarketData {
                    symbol: symbol.to_string(),
                    reason: "unknown symbol".to_string(),
                }),
            }
        }

        fn get_24h_volume(&self, _ctx: &CallContext, _symbol: &str) -> Result<f64, TradebotError> {
            Ok(self.volume_24h)
        }
    }

    /// Records requests; holds at most one open signal per symbol.
    #[derive(Default)]
    pub struct RecordingSignals {
        pub open: RefCell<HashMap<String, Signal>>,
        pub buys: RefCell<Vec<EntrySignal>>,
        pub sells: RefCell<Vec<ExitSignal>>,
    }

    impl RecordingSignals {
        pub fn with_open(self, symbol: &str, strategy_id: StrategyId, entry_price: f64, leverage: f64) -> Self {
            self.with_open_since(symbol, strategy_id, entry_price, leverage, Utc::now())
        }

        pub fn with_open_since(
            self,
            symbol: &str,
            strategy_id: StrategyId,
            entry_price: f64,
            leverage: f64,
            opened_at: DateTime<Utc>,
        ) -> Self {
            let entry = EntrySignal {
                symbol: symbol.to_string(),
                strategy_id,
                entry_price,
                leverage,
                margin_type: MarginType::Isolated,
            };
            let economics = entry_economics(100.0, entry_price, leverage, &FeeSchedule::default());
            let signal = open_signal(&entry, &economics, opened_at);
            self.open.borrow_mut().insert(symbol.to_string(), signal);
            self
        }
    }

    impl SignalPort for RecordingSignals {
        fn get_open_signal(
            &self,
            symbol: &str,
            _strategy_id: StrategyId,
        ) -> Result<Option<Signal>, TradebotError> {
            Ok(self.open.borrow().get(symbol).cloned())
        }

        fn generate_buy_signal(&self, entry: &EntrySignal) -> Result<BuyOutcome, TradebotError> {
            self.buys.borrow_mut().push(entry.clone());
            if self.open.borrow().contains_key(&entry.symbol) {
                return Ok(BuyOutcome::AlreadyOpen);
            }
            let economics =
                entry_economics(100.0, entry.entry_price, entry.leverage, &FeeSchedule::default());
            let signal = open_signal(entry, &economics, Utc::now());
            self.open
                .borrow_mut()
                .insert(entry.symbol.clone(), signal.clone());
            Ok(BuyOutcome::Opened(signal))
        }

        fn generate_sell_signal(&self, exit: &ExitSignal) -> Result<Signal, TradebotError> {
            self.sells.borrow_mut().push(exit.clone());
            self.open
                .borrow_mut()
                .remove(&exit.symbol)
                .ok_or_else(|| TradebotError::SignalNotFound {
                    key: exit.symbol.clone(),
                })
        }
    }
}
