//! Signal lifecycle: `NONE -> OPEN -> CLOSED` per (symbol, strategy).
//!
//! Opening and closing each run as one atomic store unit while the per-key
//! lock is held, so the open-signal check, the signal write and the ledger
//! update can never interleave with another writer on the same key. The store
//! also rejects a second open signal for a key on its own.

use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::domain::account::{reconcile, AccountLedger, Reconciliation};
use crate::domain::error::TradebotError;
use crate::domain::signal::{
    close_signal, entry_economics, open_signal, EntrySignal, ExitSignal, FeeSchedule, Signal,
    SignalKey,
};
use crate::domain::strategy::StrategyId;
use crate::ports::market_data_port::{CallContext, MarketDataPort};
use crate::ports::unit_of_work::{LedgerScope, TradeStore};

pub const DEFAULT_BROKER_TIMEOUT: Duration = Duration::from_secs(30);

/// Result of a buy request. Only `Opened` changed any state.
#[derive(Debug, Clone, PartialEq)]
pub enum BuyOutcome {
    Opened(Signal),
    NoCapacity,
    AlreadyOpen,
}

impl BuyOutcome {
    pub fn is_opened(&self) -> bool {
        matches!(self, BuyOutcome::Opened(_))
    }
}

/// Operations algorithm processors use to act on their decisions.
pub trait SignalPort {
    fn get_open_signal(
        &self,
        symbol: &str,
        strategy_id: StrategyId,
    ) -> Result<Option<Signal>, TradebotError>;

    fn generate_buy_signal(&self, entry: &EntrySignal) -> Result<BuyOutcome, TradebotError>;

    fn generate_sell_signal(&self, exit: &ExitSignal) -> Result<Signal, TradebotError>;
}

pub struct SignalLifecycleManager {
    store: Arc<dyn TradeStore + Send + Sync>,
    broker: Arc<dyn MarketDataPort + Send + Sync>,
    fees: FeeSchedule,
    broker_timeout: Duration,
    key_locks: DashMap<SignalKey, Arc<Mutex<()>>>,
}

impl SignalLifecycleManager {
    pub fn new(
        store: Arc<dyn TradeStore + Send + Sync>,
        broker: Arc<dyn MarketDataPort + Send + Sync>,
        fees: FeeSchedule,
    ) -> Self {
        SignalLifecycleManager {
            store,
            broker,
            fees,
            broker_timeout: DEFAULT_BROKER_TIMEOUT,
            key_locks: DashMap::new(),
        }
    }

    pub fn with_broker_timeout(mut self, timeout: Duration) -> Self {
        self.broker_timeout = timeout;
        self
    }

    pub fn fees(&self) -> &FeeSchedule {
        &self.fees
    }

    /// Runs `f` while holding the lock for `key`. The entry is dropped
    /// afterwards unless another caller still holds or awaits it.
    fn with_key_lock<T>(&self, key: &SignalKey, f: impl FnOnce() -> T) -> T {
        let lock = self
            .key_locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let result = {
            let _guard = lock.lock();
            f()
        };
        drop(lock);
        self.key_locks
            .remove_if(key, |_, lock| Arc::strong_count(lock) == 1);
        result
    }

    /// Closes `signal` at `price` and credits principal plus profit, inside
    /// the caller's unit of work.
    fn settle(
        &self,
        scope: &dyn LedgerScope,
        mut signal: Signal,
        price: f64,
    ) -> Result<Signal, TradebotError> {
        let profit = close_signal(&mut signal, price, &self.fees, Utc::now())?;
        let invested = signal.order().map_or(0.0, |o| o.invested_amount);
        scope.update_signal(&signal)?;
        AccountLedger::new(scope).add_order(invested + profit)?;
        Ok(signal)
    }

    pub fn get_all(&self) -> Result<Vec<Signal>, TradebotError> {
        self.store.list_signals()
    }

    pub fn get_by_id(&self, id: i64) -> Result<Option<Signal>, TradebotError> {
        self.store.get_signal(id)
    }

    /// Administrative close of one signal at the current market price.
    ///
    /// The signal is reloaded under its key lock once the price is known, so
    /// if a cycle closed it meanwhile this fails with `SignalAlreadyClosed`
    /// and a newer signal on the same key is left alone.
    pub fn close(&self, signal_id: i64) -> Result<Signal, TradebotError> {
        let not_found = || TradebotError::SignalNotFound {
            key: format!("id {signal_id}"),
        };
        let signal = self.store.get_signal(signal_id)?.ok_or_else(not_found)?;
        if !signal.is_open() {
            return Err(TradebotError::SignalAlreadyClosed { id: signal_id });
        }

        let ctx = CallContext::with_timeout(self.broker_timeout);
        let price = self.broker.current_price(&ctx, &signal.symbol)?;
        info!(signal_id, symbol = %signal.symbol, price, "closing signal on request");

        let key = SignalKey::new(&signal.symbol, signal.strategy_id);
        let mut closed = None;
        self.with_key_lock(&key, || {
            self.store.atomically(&mut |scope: &dyn LedgerScope| {
                let current = scope.get_signal(signal_id)?.ok_or_else(not_found)?;
                if !current.is_open() {
                    return Err(TradebotError::SignalAlreadyClosed { id: signal_id });
                }
                closed = Some(self.settle(scope, current, price)?);
                Ok(())
            })
        })?;

        let signal = closed.ok_or_else(not_found)?;
        info!(
            %key,
            signal_id,
            price,
            profit = signal.order().map_or(0.0, |o| o.profit),
            "closed signal"
        );
        Ok(signal)
    }

    /// Compares the stored account with the state implied by signal history.
    pub fn reconcile(
        &self,
        initial_amount: f64,
        total_orders: i64,
    ) -> Result<Reconciliation, TradebotError> {
        let mut report = None;
        self.store.atomically(&mut |scope: &dyn LedgerScope| {
            let account = scope.get_account()?;
            let signals = scope.list_signals()?;
            report = Some(reconcile(&account, &signals, initial_amount, total_orders));
            Ok(())
        })?;
        report.ok_or(TradebotError::AccountNotFound)
    }
}

impl SignalPort for SignalLifecycleManager {
    fn get_open_signal(
        &self,
        symbol: &str,
        strategy_id: StrategyId,
    ) -> Result<Option<Signal>, TradebotError> {
        self.store.get_open_signal(symbol, strategy_id)
    }

    fn generate_buy_signal(&self, entry: &EntrySignal) -> Result<BuyOutcome, TradebotError> {
        if !(entry.entry_price > 0.0) {
            return Err(TradebotError::validation(
                "entry_price",
                format!("must be positive, got {}", entry.entry_price),
            ));
        }

        let key = SignalKey::new(&entry.symbol, entry.strategy_id);
        let mut outcome = BuyOutcome::NoCapacity;
        let result = self.with_key_lock(&key, || {
            self.store.atomically(&mut |scope: &dyn LedgerScope| {
                let ledger = AccountLedger::new(scope);
                if !ledger.can_open_order()? {
                    outcome = BuyOutcome::NoCapacity;
                    return Ok(());
                }

                if scope
                    .get_open_signal(&entry.symbol, entry.strategy_id)?
                    .is_some()
                {
                    outcome = BuyOutcome::AlreadyOpen;
                    return Ok(());
                }

                let capital = ledger.available_capital_per_order()?;
                if !(capital > 0.0) {
                    outcome = BuyOutcome::NoCapacity;
                    return Ok(());
                }
                let economics =
                    entry_economics(capital, entry.entry_price, entry.leverage, &self.fees);
                let created = scope.create_signal(&open_signal(entry, &economics, Utc::now()))?;

                // Principal only; leverage widens exposure, not commitment.
                ledger.deduct_order(economics.capital)?;
                outcome = BuyOutcome::Opened(created);
                Ok(())
            })
        });

        match result {
            Ok(()) => {
                match &outcome {
                    BuyOutcome::Opened(signal) => info!(
                        %key,
                        signal_id = signal.id,
                        price = entry.entry_price,
                        "opened signal"
                    ),
                    other => debug!(%key, ?other, "buy signal skipped"),
                }
                Ok(outcome)
            }
            Err(TradebotError::DuplicateOpenSignal { .. }) => Ok(BuyOutcome::AlreadyOpen),
            Err(e) => Err(e),
        }
    }

    fn generate_sell_signal(&self, exit: &ExitSignal) -> Result<Signal, TradebotError> {
        if !(exit.exit_price > 0.0) {
            return Err(TradebotError::validation(
                "exit_price",
                format!("must be positive, got {}", exit.exit_price),
            ));
        }

        let key = SignalKey::new(&exit.symbol, exit.strategy_id);
        let mut closed = None;
        self.with_key_lock(&key, || {
            self.store.atomically(&mut |scope: &dyn LedgerScope| {
                let signal = scope
                    .get_open_signal(&exit.symbol, exit.strategy_id)?
                    .ok_or_else(|| TradebotError::SignalNotFound {
                        key: key.to_string(),
                    })?;
                closed = Some(self.settle(scope, signal, exit.exit_price)?);
                Ok(())
            })
        })?;

        let signal = closed.ok_or_else(|| TradebotError::SignalNotFound {
            key: key.to_string(),
        })?;
        info!(
            %key,
            signal_id = signal.id,
            price = exit.exit_price,
            profit = signal.order().map_or(0.0, |o| o.profit),
            "closed signal"
        );
        Ok(signal)
    }
}
