#![allow(dead_code)]

use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tradebot::domain::algorithm::{AlgorithmProcessor, ExecutionEnv, ExecutionOutcome};
use tradebot::domain::error::TradebotError;
pub use tradebot::domain::ohlcv::{Kline, TickerPrice};
use tradebot::domain::strategy::{
    AlgorithmConfig, AlgorithmKind, Cycle, GridConfig, Strategy, StrategyExecution, StrategyId,
};
use tradebot::ports::market_data_port::{CallContext, MarketDataPort};
use tradebot::ports::metrics_port::MetricsSink;
use tradebot::ports::strategy_port::StrategyRepository;
use tradebot::ports::task_queue_port::{Task, TaskQueue};

/// Broker with fixed prices and klines per symbol.
#[derive(Default)]
pub struct MockBroker {
    pub prices: HashMap<String, f64>,
    pub klines: HashMap<String, Vec<Kline>>,
    pub volume: f64,
}

impl MockBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_price(mut self, symbol: &str, price: f64) -> Self {
        self.prices.insert(symbol.to_string(), price);
        self
    }

    pub fn with_closes(mut self, symbol: &str, closes: &[f64]) -> Self {
        self.klines.insert(symbol.to_string(), make_klines(closes));
        self
    }
}

impl MarketDataPort for MockBroker {
    fn list_ticker_prices(
        &self,
        _ctx: &CallContext,
        symbol: &str,
    ) -> Result<Vec<TickerPrice>, TradebotError> {
        match self.prices.get(symbol) {
            Some(price) => Ok(vec![TickerPrice {
                symbol: symbol.to_string(),
                price: *price,
            }]),
            None => Err(TradebotError::MarketData {
                symbol: symbol.to_string(),
                reason: "unknown symbol".into(),
            }),
        }
    }

    fn list_klines(
        &self,
        _ctx: &CallContext,
        symbol: &str,
        _interval: &str,
        limit: usize,
    ) -> Result<Vec<Kline>, TradebotError> {
        let klines = self.klines.get(symbol).cloned().unwrap_or_default();
        let skip = klines.len().saturating_sub(limit);
        Ok(klines.into_iter().skip(skip).collect())
    }

    fn get_24h_volume(&self, _ctx: &CallContext, _symbol: &str) -> Result<f64, TradebotError> {
        Ok(self.volume)
    }
}

pub fn make_klines(closes: &[f64]) -> Vec<Kline> {
    let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    closes
        .iter()
        .enumerate()
        .map(|(i, &close)| {
            let open_time = start + ChronoDuration::minutes(5 * i as i64);
            Kline {
                open_time,
                open: close,
                high: close,
                low: close,
                close,
                volume: 1000.0,
                close_time: open_time + ChronoDuration::minutes(5) - ChronoDuration::milliseconds(1),
            }
        })
        .collect()
}

/// Queue that records every enqueue instead of delivering it.
#[derive(Default)]
pub struct RecordingQueue {
    pub enqueued: Mutex<Vec<(Task, Duration)>>,
}

impl RecordingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn take(&self) -> Vec<(Task, Duration)> {
        std::mem::take(&mut *self.enqueued.lock())
    }

    pub fn len(&self) -> usize {
        self.enqueued.lock().len()
    }
}

impl TaskQueue for RecordingQueue {
    fn enqueue(&self, task: Task, delay: Duration) -> Result<(), TradebotError> {
        self.enqueued.lock().push((task, delay));
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingMetrics {
    pub counters: Mutex<Vec<(String, Vec<(String, String)>)>>,
    pub histograms: Mutex<Vec<(String, f64)>>,
}

impl RecordingMetrics {
    pub fn counter_total(&self, name: &str, label: (&str, &str)) -> usize {
        self.counters
            .lock()
            .iter()
            .filter(|(n, labels)| {
                n == name && labels.iter().any(|(k, v)| k == label.0 && v == label.1)
            })
            .count()
    }
}

impl MetricsSink for RecordingMetrics {
    fn increment_counter(&self, name: &str, labels: &[(&str, &str)]) {
        self.counters.lock().push((
            name.to_string(),
            labels
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        ));
    }

    fn observe_histogram(&self, name: &str, _labels: &[(&str, &str)], value: f64) {
        self.histograms.lock().push((name.to_string(), value));
    }
}

/// Strategy repository whose reads fail; writes are recorded.
#[derive(Default)]
pub struct FailingStrategies {
    pub executions: Mutex<Vec<StrategyExecution>>,
}

impl StrategyRepository for FailingStrategies {
    fn save_strategy(&self, _strategy: &Strategy) -> Result<(), TradebotError> {
        Ok(())
    }

    fn update_strategy(&self, _strategy: &Strategy) -> Result<(), TradebotError> {
        Ok(())
    }

    fn get_strategy(&self, _id: StrategyId) -> Result<Option<Strategy>, TradebotError> {
        Err(TradebotError::Database {
            reason: "database is locked".into(),
        })
    }

    fn list_strategies(&self) -> Result<Vec<Strategy>, TradebotError> {
        Ok(Vec::new())
    }

    fn save_execution(&self, execution: &StrategyExecution) -> Result<(), TradebotError> {
        self.executions.lock().push(execution.clone());
        Ok(())
    }

    fn list_executions(
        &self,
        _strategy_id: StrategyId,
        _limit: usize,
    ) -> Result<Vec<StrategyExecution>, TradebotError> {
        Ok(self.executions.lock().clone())
    }
}

/// Processor that only counts invocations.
pub struct CountingProcessor {
    pub kind: AlgorithmKind,
    pub calls: Arc<AtomicUsize>,
}

impl CountingProcessor {
    pub fn new(kind: AlgorithmKind) -> (Self, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        (
            CountingProcessor {
                kind,
                calls: calls.clone(),
            },
            calls,
        )
    }
}

impl AlgorithmProcessor for CountingProcessor {
    fn kind(&self) -> AlgorithmKind {
        self.kind
    }

    fn execute(
        &self,
        strategy: &Strategy,
        _env: &ExecutionEnv<'_>,
    ) -> Result<ExecutionOutcome, TradebotError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(ExecutionOutcome {
            symbols_evaluated: strategy.monitored_symbols.len(),
            ..ExecutionOutcome::default()
        })
    }
}

pub fn grid_strategy(symbols: &[&str], cycle: Cycle) -> Strategy {
    Strategy::new(
        "grid test",
        "grid ladder",
        symbols.iter().map(|s| s.to_string()).collect(),
        cycle,
        AlgorithmConfig::Grid(GridConfig {
            grid_levels: 5,
            grid_spacing_pct: 1.0,
            take_profit_pct: 2.0,
            ..GridConfig::default()
        }),
    )
}
