//! Strategy execution scheduler.
//!
//! Every firing of a strategy task reloads the strategy, runs its processor
//! when allowed, records an execution row and re-arms the next firing one
//! cycle later. Successive firings of one strategy never overlap because the
//! next one is only enqueued once the current one has finished.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{error, info, warn};

use crate::domain::algorithm::{AlgorithmRegistry, ExecutionEnv};
use crate::domain::error::TradebotError;
use crate::domain::lifecycle::{SignalPort, DEFAULT_BROKER_TIMEOUT};
use crate::domain::strategy::{
    ExecutionStatus, Strategy, StrategyExecution, STRATEGY_TASK_PREFIX,
};
use crate::domain::strategy_validation::validate_strategy;
use crate::ports::market_data_port::MarketDataPort;
use crate::ports::metrics_port::MetricsSink;
use crate::ports::signal_port::SignalRepository;
use crate::ports::strategy_port::StrategyRepository;
use crate::ports::task_queue_port::{Task, TaskHandler, TaskQueue};

pub const DEFAULT_MAX_OPEN_SIGNALS: usize = 4;
pub const EXECUTIONS_COUNTER: &str = "strategy_executions_total";
pub const TASK_DURATION_HISTOGRAM: &str = "strategy_task_duration_seconds";

/// What one firing did.
#[derive(Debug, Clone, PartialEq)]
pub struct FiringReport {
    /// Status of the recorded execution row, if one was written.
    pub status: Option<ExecutionStatus>,
    pub processor_invoked: bool,
    pub rearmed: bool,
    pub message: String,
}

impl FiringReport {
    fn dropped(message: impl Into<String>) -> Self {
        FiringReport {
            status: None,
            processor_invoked: false,
            rearmed: false,
            message: message.into(),
        }
    }
}

pub struct StrategyScheduler {
    strategies: Arc<dyn StrategyRepository + Send + Sync>,
    signal_store: Arc<dyn SignalRepository + Send + Sync>,
    signals: Arc<dyn SignalPort + Send + Sync>,
    market: Arc<dyn MarketDataPort + Send + Sync>,
    queue: Arc<dyn TaskQueue + Send + Sync>,
    metrics: Arc<dyn MetricsSink + Send + Sync>,
    registry: AlgorithmRegistry,
    max_open_signals: usize,
    symbol_timeout: Duration,
}

impl StrategyScheduler {
    pub fn new(
        strategies: Arc<dyn StrategyRepository + Send + Sync>,
        signal_store: Arc<dyn SignalRepository + Send + Sync>,
        signals: Arc<dyn SignalPort + Send + Sync>,
        market: Arc<dyn MarketDataPort + Send + Sync>,
        queue: Arc<dyn TaskQueue + Send + Sync>,
        metrics: Arc<dyn MetricsSink + Send + Sync>,
    ) -> Self {
        StrategyScheduler {
            strategies,
            signal_store,
            signals,
            market,
            queue,
            metrics,
            registry: AlgorithmRegistry::with_defaults(),
            max_open_signals: DEFAULT_MAX_OPEN_SIGNALS,
            symbol_timeout: DEFAULT_BROKER_TIMEOUT,
        }
    }

    pub fn with_registry(mut self, registry: AlgorithmRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_max_open_signals(mut self, cap: usize) -> Self {
        self.max_open_signals = cap;
        self
    }

    pub fn with_symbol_timeout(mut self, timeout: Duration) -> Self {
        self.symbol_timeout = timeout;
        self
    }

    /// Validates `strategy` and enqueues its first firing immediately.
    pub fn schedule(&self, strategy: &Strategy) -> Result<(), TradebotError> {
        validate_strategy(strategy)?;
        self.enqueue(strategy, Duration::ZERO)?;
        info!(strategy = %strategy.name, id = %strategy.id, "strategy scheduled");
        Ok(())
    }

    /// Schedules every stored strategy that is not disabled.
    pub fn schedule_all(&self) -> Result<usize, TradebotError> {
        let mut scheduled = 0;
        for strategy in self.strategies.list_strategies()? {
            if strategy.is_disabled() {
                continue;
            }
            match self.schedule(&strategy) {
                Ok(()) => scheduled += 1,
                Err(e) => warn!(strategy = %strategy.name, error = %e, "strategy not scheduled"),
            }
        }
        Ok(scheduled)
    }

    fn enqueue(&self, strategy: &Strategy, delay: Duration) -> Result<(), TradebotError> {
        let payload = serde_json::to_vec(strategy)?;
        self.queue
            .enqueue(Task::new(strategy.task_type(), payload), delay)
    }

    fn rearm(&self, strategy: &Strategy) -> Result<(), TradebotError> {
        self.enqueue(strategy, strategy.cycle.as_duration())
            .inspect_err(|e| {
                error!(strategy = %strategy.name, id = %strategy.id, error = %e, "failed to re-arm strategy")
            })
    }

    fn record(&self, strategy: &Strategy, status: ExecutionStatus, message: &str) {
        let execution = StrategyExecution {
            strategy_id: strategy.id,
            executed_at: Utc::now(),
            status,
            message: message.to_string(),
        };
        if let Err(e) = self.strategies.save_execution(&execution) {
            error!(strategy = %strategy.name, error = %e, "failed to record execution");
        }
        self.metrics.increment_counter(
            EXECUTIONS_COUNTER,
            &[("strategy", strategy.name.as_str()), ("status", status.as_str())],
        );
    }

    /// Runs one firing for the serialized strategy in `payload`.
    pub fn handle_task(&self, payload: &[u8]) -> Result<FiringReport, TradebotError> {
        let started = Instant::now();
        let snapshot: Strategy = serde_json::from_slice(payload)?;

        let strategy = match self.strategies.get_strategy(snapshot.id) {
            Ok(Some(strategy)) => strategy,
            Ok(None) => {
                warn!(id = %snapshot.id, name = %snapshot.name, "strategy no longer exists, dropping task");
                return Ok(FiringReport::dropped("strategy not found"));
            }
            Err(e) => {
                let message = format!("failed to reload strategy: {e}");
                error!(id = %snapshot.id, error = %e, "failed to reload strategy");
                self.record(&snapshot, ExecutionStatus::Error, &message);
                self.rearm(&snapshot)?;
                return Ok(FiringReport {
                    status: Some(ExecutionStatus::Error),
                    processor_invoked: false,
                    rearmed: true,
                    message,
                });
            }
        };

        if strategy.is_disabled() {
            info!(strategy = %strategy.name, "strategy disabled, not re-arming");
            return Ok(FiringReport::dropped("strategy disabled"));
        }

        let (status, message, invoked) = self.run_processor(&strategy);
        match status {
            ExecutionStatus::Ok => info!(strategy = %strategy.name, %message, "strategy executed"),
            ExecutionStatus::Error => {
                warn!(strategy = %strategy.name, %message, "strategy execution failed")
            }
        }
        self.record(&strategy, status, &message);
        self.metrics.observe_histogram(
            TASK_DURATION_HISTOGRAM,
            &[("strategy", strategy.name.as_str())],
            started.elapsed().as_secs_f64(),
        );

        self.rearm(&strategy)?;
        Ok(FiringReport {
            status: Some(status),
            processor_invoked: invoked,
            rearmed: true,
            message,
        })
    }

    fn run_processor(&self, strategy: &Strategy) -> (ExecutionStatus, String, bool) {
        let open = match self.signal_store.count_open_signals(strategy.id) {
            Ok(open) => open,
            Err(e) => {
                return (
                    ExecutionStatus::Error,
                    format!("failed to count open signals: {e}"),
                    false,
                )
            }
        };
        if open >= self.max_open_signals {
            return (
                ExecutionStatus::Ok,
                format!(
                    "skipped: {open} open signal(s) at limit {}",
                    self.max_open_signals
                ),
                false,
            );
        }

        let Some(processor) = self.registry.get(strategy.algorithm) else {
            warn!(strategy = %strategy.name, algorithm = %strategy.algorithm, "no processor registered");
            return (
                ExecutionStatus::Ok,
                format!("no processor registered for {}", strategy.algorithm),
                false,
            );
        };

        let env = ExecutionEnv::new(self.market.as_ref(), self.signals.as_ref())
            .with_symbol_timeout(self.symbol_timeout);
        match processor.execute(strategy, &env) {
            Ok(outcome) => (ExecutionStatus::Ok, outcome.summary(), true),
            Err(e) => (ExecutionStatus::Error, e.to_string(), true),
        }
    }
}

impl TaskHandler for StrategyScheduler {
    fn task_prefix(&self) -> &str {
        STRATEGY_TASK_PREFIX
    }

    fn handle(&self, task: &Task) -> Result<(), TradebotError> {
        self.handle_task(&task.payload).map(|_| ())
    }
}

/// Saving a strategy validates, persists and schedules it.
pub struct StrategyService {
    strategies: Arc<dyn StrategyRepository + Send + Sync>,
    scheduler: Arc<StrategyScheduler>,
}

impl StrategyService {
    pub fn new(
        strategies: Arc<dyn StrategyRepository + Send + Sync>,
        scheduler: Arc<StrategyScheduler>,
    ) -> Self {
        StrategyService {
            strategies,
            scheduler,
        }
    }

    pub fn save(&self, strategy: &Strategy) -> Result<(), TradebotError> {
        validate_strategy(strategy)?;
        self.strategies.save_strategy(strategy)?;
        if strategy.is_disabled() {
            return Ok(());
        }
        self.scheduler.schedule(strategy)
    }
}
