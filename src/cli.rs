//! CLI definition and dispatch.

use clap::{Parser, Subcommand};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use crate::adapters::file_config_adapter::FileConfigAdapter;
use crate::domain::config_validation::WorkerSettings;
use crate::domain::error::TradebotError;
use crate::domain::signal::Signal;
use crate::domain::strategy::{AlgorithmConfig, Cycle, Strategy, StrategyStatus};
use crate::domain::strategy_validation::validate_strategy;

/// Drift allowed by `reconcile` before the account is reported inconsistent.
pub const RECONCILE_TOLERANCE: f64 = 1e-6;

#[derive(Parser, Debug)]
#[command(name = "tradebot", about = "Scheduled trading strategy worker")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the strategy worker until interrupted
    Run {
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Create the account row from the [account] section
    InitAccount {
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Validate and store a strategy definition (JSON)
    ///
    /// A worker started with `run` schedules stored strategies at start-up,
    /// so restart it to pick up a strategy added while it runs.
    AddStrategy {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(short, long)]
        file: PathBuf,
    },
    /// List every signal with its canonical order
    ListSignals {
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Close an open signal at the current market price
    CloseSignal {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(long)]
        id: i64,
    },
    /// Compare the account with the state implied by signal history
    Reconcile {
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Validate a strategy definition without storing it
    Validate {
        #[arg(short, long)]
        file: PathBuf,
    },
}

/// Strategy definition as written by an operator.
#[derive(Debug, Deserialize)]
pub struct StrategyFile {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub monitored_symbols: Vec<String>,
    pub cycle: Cycle,
    #[serde(default)]
    pub status: Option<StrategyStatus>,
    pub config: AlgorithmConfig,
}

impl StrategyFile {
    pub fn into_strategy(self) -> Strategy {
        let mut strategy = Strategy::new(
            self.name,
            self.description,
            self.monitored_symbols
                .into_iter()
                .map(|s| s.trim().to_uppercase())
                .collect(),
            self.cycle,
            self.config,
        );
        if let Some(status) = self.status {
            strategy.status = status;
        }
        strategy
    }
}

pub fn parse_strategy(content: &str) -> Result<Strategy, TradebotError> {
    let file: StrategyFile = serde_json::from_str(content)?;
    let strategy = file.into_strategy();
    validate_strategy(&strategy)?;
    Ok(strategy)
}

pub fn load_strategy(path: &Path) -> Result<Strategy, TradebotError> {
    parse_strategy(&fs::read_to_string(path)?)
}

pub fn run(cli: Cli) -> ExitCode {
    match cli.command {
        Command::Run { config } => run_worker(&config),
        Command::InitAccount { config } => run_init_account(&config),
        Command::AddStrategy { config, file } => run_add_strategy(&config, &file),
        Command::ListSignals { config } => run_list_signals(&config),
        Command::CloseSignal { config, id } => run_close_signal(&config, id),
        Command::Reconcile { config } => run_reconcile(&config),
        Command::Validate { file } => run_validate(&file),
    }
}

fn fail(err: TradebotError) -> ExitCode {
    eprintln!("error: {err}");
    (&err).into()
}

pub fn load_config(path: &Path) -> Result<FileConfigAdapter, ExitCode> {
    FileConfigAdapter::from_file(path).map_err(|e| {
        fail(TradebotError::ConfigParse {
            file: path.display().to_string(),
            reason: e.to_string(),
        })
    })
}

fn load_settings(path: &Path) -> Result<WorkerSettings, ExitCode> {
    eprintln!("Loading config from {}", path.display());
    let config = load_config(path)?;
    WorkerSettings::from_config(&config).map_err(fail)
}

pub fn format_signal(signal: &Signal) -> String {
    match signal.order() {
        Some(order) => format!(
            "{:>6}  {:<12} {:<7} entry={:.8} exit={:.8} qty={:.8} invested={:.2} profit={:.2}  strategy={}",
            signal.id,
            signal.symbol,
            signal.status.as_str(),
            order.entry_price,
            order.exit_price,
            order.quantity,
            order.invested_amount,
            order.profit,
            signal.strategy_id,
        ),
        None => format!(
            "{:>6}  {:<12} {:<7} (no orders)  strategy={}",
            signal.id,
            signal.symbol,
            signal.status.as_str(),
            signal.strategy_id,
        ),
    }
}

#[cfg(feature = "sqlite")]
fn open_store(
    settings: &WorkerSettings,
) -> Result<std::sync::Arc<crate::adapters::sqlite_adapter::SqliteStore>, ExitCode> {
    use crate::adapters::sqlite_adapter::SqliteStore;

    let store = SqliteStore::open(&settings.sqlite_path, settings.pool_size).map_err(fail)?;
    store.initialize_schema().map_err(fail)?;
    Ok(std::sync::Arc::new(store))
}

#[cfg(all(feature = "sqlite", feature = "binance"))]
fn open_lifecycle(
    settings: &WorkerSettings,
    store: std::sync::Arc<crate::adapters::sqlite_adapter::SqliteStore>,
) -> Result<crate::domain::lifecycle::SignalLifecycleManager, ExitCode> {
    use crate::adapters::binance_adapter::BinanceAdapter;
    use crate::domain::lifecycle::SignalLifecycleManager;
    use std::sync::Arc;

    let broker = BinanceAdapter::new(&settings.rest_url).map_err(fail)?;
    Ok(
        SignalLifecycleManager::new(store, Arc::new(broker), settings.fees)
            .with_broker_timeout(settings.broker_timeout),
    )
}

fn run_worker(config_path: &Path) -> ExitCode {
    let settings = match load_settings(config_path) {
        Ok(s) => s,
        Err(code) => return code,
    };

    #[cfg(all(feature = "sqlite", feature = "binance"))]
    {
        use crate::adapters::binance_adapter::BinanceAdapter;
        use crate::adapters::prometheus_metrics::PrometheusMetrics;
        use crate::adapters::tokio_queue::{TokioTaskQueue, WorkerPool};
        use crate::domain::account::AccountLedger;
        use crate::domain::lifecycle::SignalLifecycleManager;
        use crate::domain::scheduler::StrategyScheduler;
        use crate::ports::metrics_port::{MetricsSink, NoopMetrics};
        use std::sync::Arc;
        use tracing::info;

        let store = match open_store(&settings) {
            Ok(s) => s,
            Err(code) => return code,
        };

        match AccountLedger::new(store.as_ref()).get_account() {
            Ok(account) => info!(
                amount = account.amount,
                available_orders = account.available_orders,
                currency = %account.currency,
                "account loaded"
            ),
            Err(TradebotError::AccountNotFound) => {
                match AccountLedger::new(store.as_ref()).create_account(
                    settings.account_amount,
                    settings.account_orders,
                    &settings.currency,
                ) {
                    Ok(account) => info!(amount = account.amount, "account created from config"),
                    Err(e) => return fail(e),
                }
            }
            Err(e) => return fail(e),
        }

        // The blocking HTTP client must be built outside the runtime.
        let broker = match BinanceAdapter::new(&settings.rest_url) {
            Ok(b) => Arc::new(b),
            Err(e) => return fail(e),
        };

        let runtime = match tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
        {
            Ok(rt) => rt,
            Err(e) => return fail(e.into()),
        };

        let (queue, receiver) = TokioTaskQueue::new(runtime.handle().clone());
        let prometheus = settings.metrics_enabled.then(|| Arc::new(PrometheusMetrics::new()));
        let metrics: Arc<dyn MetricsSink + Send + Sync> = match &prometheus {
            Some(p) => p.clone(),
            None => Arc::new(NoopMetrics),
        };

        let lifecycle = Arc::new(
            SignalLifecycleManager::new(store.clone(), broker.clone(), settings.fees)
                .with_broker_timeout(settings.broker_timeout),
        );
        let scheduler = Arc::new(
            StrategyScheduler::new(
                store.clone(),
                store.clone(),
                lifecycle,
                broker,
                Arc::new(queue),
                metrics,
            )
            .with_max_open_signals(settings.max_open_signals)
            .with_symbol_timeout(settings.broker_timeout),
        );

        match scheduler.schedule_all() {
            Ok(count) => eprintln!("Scheduled {count} strategies on {} workers", settings.workers),
            Err(e) => return fail(e),
        }

        let pool = WorkerPool::new(settings.workers).with_handler(scheduler);
        runtime.block_on(pool.run(receiver, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "cannot listen for ctrl-c");
                std::future::pending::<()>().await;
            }
        }));

        if let Some(p) = prometheus {
            match p.render() {
                Ok(text) => eprint!("{text}"),
                Err(e) => eprintln!("error: {e}"),
            }
        }
        ExitCode::SUCCESS
    }

    #[cfg(not(all(feature = "sqlite", feature = "binance")))]
    {
        let _ = settings;
        eprintln!("error: sqlite and binance features are required for run");
        ExitCode::from(1)
    }
}

fn run_init_account(config_path: &Path) -> ExitCode {
    let settings = match load_settings(config_path) {
        Ok(s) => s,
        Err(code) => return code,
    };

    #[cfg(feature = "sqlite")]
    {
        use crate::domain::account::AccountLedger;

        let store = match open_store(&settings) {
            Ok(s) => s,
            Err(code) => return code,
        };
        match AccountLedger::new(store.as_ref()).create_account(
            settings.account_amount,
            settings.account_orders,
            &settings.currency,
        ) {
            Ok(account) => {
                println!(
                    "account created: {:.2} {} across {} orders",
                    account.amount, account.currency, account.available_orders
                );
                ExitCode::SUCCESS
            }
            Err(e) => fail(e),
        }
    }

    #[cfg(not(feature = "sqlite"))]
    {
        let _ = settings;
        eprintln!("error: sqlite feature is required for init-account");
        ExitCode::from(1)
    }
}

fn run_add_strategy(config_path: &Path, file: &Path) -> ExitCode {
    let settings = match load_settings(config_path) {
        Ok(s) => s,
        Err(code) => return code,
    };
    let strategy = match load_strategy(file) {
        Ok(s) => s,
        Err(e) => return fail(e),
    };

    #[cfg(feature = "sqlite")]
    {
        use crate::ports::strategy_port::StrategyRepository;

        let store = match open_store(&settings) {
            Ok(s) => s,
            Err(code) => return code,
        };
        if let Err(e) = store.save_strategy(&strategy) {
            return fail(e);
        }
        println!("{}", strategy.id);
        eprintln!(
            "Stored {} strategy '{}' ({} symbols, every {} min); a running worker picks it up on restart",
            strategy.algorithm,
            strategy.name,
            strategy.monitored_symbols.len(),
            strategy.cycle.minutes()
        );
        ExitCode::SUCCESS
    }

    #[cfg(not(feature = "sqlite"))]
    {
        let _ = (settings, strategy);
        eprintln!("error: sqlite feature is required for add-strategy");
        ExitCode::from(1)
    }
}

fn run_list_signals(config_path: &Path) -> ExitCode {
    let settings = match load_settings(config_path) {
        Ok(s) => s,
        Err(code) => return code,
    };

    #[cfg(feature = "sqlite")]
    {
        use crate::ports::signal_port::SignalRepository;

        let store = match open_store(&settings) {
            Ok(s) => s,
            Err(code) => return code,
        };
        let signals = match store.list_signals() {
            Ok(s) => s,
            Err(e) => return fail(e),
        };
        if signals.is_empty() {
            eprintln!("No signals recorded");
        }
        for signal in &signals {
            println!("{}", format_signal(signal));
        }
        ExitCode::SUCCESS
    }

    #[cfg(not(feature = "sqlite"))]
    {
        let _ = settings;
        eprintln!("error: sqlite feature is required for list-signals");
        ExitCode::from(1)
    }
}

fn run_close_signal(config_path: &Path, id: i64) -> ExitCode {
    let settings = match load_settings(config_path) {
        Ok(s) => s,
        Err(code) => return code,
    };

    #[cfg(all(feature = "sqlite", feature = "binance"))]
    {
        let lifecycle = match open_store(&settings).and_then(|s| open_lifecycle(&settings, s)) {
            Ok(l) => l,
            Err(code) => return code,
        };
        match lifecycle.close(id) {
            Ok(signal) => {
                println!("{}", format_signal(&signal));
                ExitCode::SUCCESS
            }
            Err(e) => fail(e),
        }
    }

    #[cfg(not(all(feature = "sqlite", feature = "binance")))]
    {
        let _ = (settings, id);
        eprintln!("error: sqlite and binance features are required for close-signal");
        ExitCode::from(1)
    }
}

fn run_reconcile(config_path: &Path) -> ExitCode {
    let settings = match load_settings(config_path) {
        Ok(s) => s,
        Err(code) => return code,
    };

    #[cfg(all(feature = "sqlite", feature = "binance"))]
    {
        let lifecycle = match open_store(&settings).and_then(|s| open_lifecycle(&settings, s)) {
            Ok(l) => l,
            Err(code) => return code,
        };
        let report = match lifecycle.reconcile(settings.account_amount, settings.account_orders) {
            Ok(r) => r,
            Err(e) => return fail(e),
        };

        println!("amount: stored {:.8} expected {:.8} drift {:+.8}",
            report.stored_amount, report.expected_amount, report.amount_drift());
        println!("orders: stored {} expected {} drift {:+}",
            report.stored_orders, report.expected_orders, report.orders_drift());

        if report.is_consistent(RECONCILE_TOLERANCE) {
            eprintln!("Account is consistent with signal history");
            ExitCode::SUCCESS
        } else {
            eprintln!("Account drifted from signal history");
            ExitCode::from(6)
        }
    }

    #[cfg(not(all(feature = "sqlite", feature = "binance")))]
    {
        let _ = settings;
        eprintln!("error: sqlite and binance features are required for reconcile");
        ExitCode::from(1)
    }
}

fn run_validate(file: &Path) -> ExitCode {
    eprintln!("Validating strategy: {}", file.display());
    let strategy = match load_strategy(file) {
        Ok(s) => s,
        Err(e) => return fail(e),
    };

    eprintln!("\nName:      {}", strategy.name);
    eprintln!("Algorithm: {}", strategy.algorithm);
    eprintln!("Cycle:     {} min ({} candles)", strategy.cycle.minutes(), strategy.cycle.broker_interval());
    eprintln!("Status:    {}", strategy.status.as_str());
    eprintln!("Symbols:   {}", strategy.monitored_symbols.join(", "));
    eprintln!("\nStrategy definition is valid.");
    ExitCode::SUCCESS
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::strategy::AlgorithmKind;

    const GRID: &str = r#"{
        "name": "grid btc",
        "description": "ladder",
        "monitored_symbols": ["btcusdt", " ETHUSDT "],
        "cycle": 5,
        "config": {"algorithm": "grid", "grid_levels": 5, "grid_spacing_pct": 1.0,
                   "take_profit_pct": 2.0, "stop_loss_pct": 3.0}
    }"#;

    #[test]
    fn parses_strategy_file() {
        let strategy = parse_strategy(GRID).unwrap();
        assert_eq!(strategy.algorithm, AlgorithmKind::Grid);
        assert_eq!(strategy.monitored_symbols, vec!["BTCUSDT", "ETHUSDT"]);
        assert_eq!(strategy.cycle.minutes(), 5);
        assert_eq!(strategy.status, StrategyStatus::Testing);
    }

    #[test]
    fn status_override() {
        let content = GRID.replace("\"cycle\": 5,", "\"cycle\": 5, \"status\": \"disabled\",");
        assert!(parse_strategy(&content).unwrap().is_disabled());
    }

    #[test]
    fn invalid_cycle_is_serialization_error() {
        let content = GRID.replace("\"cycle\": 5", "\"cycle\": 7");
        assert!(matches!(
            parse_strategy(&content),
            Err(TradebotError::Serialization(_))
        ));
    }

    #[test]
    fn empty_symbols_fail_validation() {
        let content = GRID.replace("[\"btcusdt\", \" ETHUSDT \"]", "[]");
        assert!(matches!(
            parse_strategy(&content),
            Err(TradebotError::Validation { .. })
        ));
    }

    #[test]
    fn cli_parses_close_signal() {
        let cli = Cli::try_parse_from(["tradebot", "close-signal", "-c", "w.ini", "--id", "7"]).unwrap();
        assert!(matches!(cli.command, Command::CloseSignal { id: 7, .. }));
    }

    #[test]
    fn add_strategy_help_mentions_restart() {
        use clap::CommandFactory;

        let mut command = Cli::command();
        let help = command
            .find_subcommand_mut("add-strategy")
            .unwrap()
            .render_long_help()
            .to_string();
        assert!(help.contains("restart"), "{help}");
    }
}
