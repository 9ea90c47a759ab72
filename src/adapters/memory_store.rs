//! In-process store implementing every repository port.
//!
//! Account and signal rows live in a ledger guarded by one mutex. `atomically`
//! holds that mutex for the whole unit and restores the ledger if the unit
//! fails; writes made outside a unit wait for it instead of being undone.
//! Strategies and executions are kept apart and never rolled back. Useful for
//! dry runs and tests; nothing survives the process.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};

use parking_lot::Mutex;

use crate::domain::account::Account;
use crate::domain::error::TradebotError;
use crate::domain::signal::{Signal, SignalStatus};
use crate::domain::strategy::{Strategy, StrategyExecution, StrategyId};
use crate::ports::account_port::AccountRepository;
use crate::ports::signal_port::SignalRepository;
use crate::ports::strategy_port::StrategyRepository;
use crate::ports::unit_of_work::{LedgerScope, UnitOfWork};

#[derive(Debug, Default, Clone)]
struct Ledger {
    account: Option<Account>,
    signals: BTreeMap<i64, Signal>,
    next_signal_id: i64,
    next_order_id: i64,
}

impl Ledger {
    fn insert_account(&mut self, account: &Account) -> Result<(), TradebotError> {
        if self.account.is_some() {
            return Err(TradebotError::AccountExists);
        }
        self.account = Some(account.clone());
        Ok(())
    }

    fn account(&self) -> Result<Account, TradebotError> {
        self.account.clone().ok_or(TradebotError::AccountNotFound)
    }

    fn write_account(&mut self, account: &Account) -> Result<(), TradebotError> {
        if self.account.is_none() {
            return Err(TradebotError::AccountNotFound);
        }
        self.account = Some(account.clone());
        Ok(())
    }

    fn insert_signal(&mut self, signal: &Signal) -> Result<Signal, TradebotError> {
        if signal.is_open()
            && self.signals.values().any(|s| {
                s.is_open() && s.symbol == signal.symbol && s.strategy_id == signal.strategy_id
            })
        {
            return Err(TradebotError::DuplicateOpenSignal {
                key: signal.key().to_string(),
            });
        }

        self.next_signal_id += 1;
        let mut created = signal.clone();
        created.id = self.next_signal_id;
        for order in &mut created.orders {
            self.next_order_id += 1;
            order.id = self.next_order_id;
            order.signal_id = created.id;
        }
        self.signals.insert(created.id, created.clone());
        Ok(created)
    }

    fn open_signal(&self, symbol: &str, strategy_id: StrategyId) -> Option<Signal> {
        self.signals
            .values()
            .find(|s| s.is_open() && s.symbol == symbol && s.strategy_id == strategy_id)
            .cloned()
    }

    fn write_signal(&mut self, signal: &Signal) -> Result<(), TradebotError> {
        match self.signals.get_mut(&signal.id) {
            Some(stored) => {
                *stored = signal.clone();
                Ok(())
            }
            None => Err(TradebotError::SignalNotFound {
                key: format!("id {}", signal.id),
            }),
        }
    }

    fn count_open(&self, strategy_id: StrategyId) -> usize {
        self.signals
            .values()
            .filter(|s| s.status == SignalStatus::Open && s.strategy_id == strategy_id)
            .count()
    }
}

#[derive(Debug, Default)]
struct Catalog {
    strategies: HashMap<StrategyId, Strategy>,
    executions: Vec<StrategyExecution>,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    ledger: Mutex<Ledger>,
    catalog: Mutex<Catalog>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Ledger view handed to a unit of work; the store mutex is already held.
struct UnitScope<'a> {
    ledger: RefCell<&'a mut Ledger>,
}

impl UnitOfWork for MemoryStore {
    fn atomically(
        &self,
        work: &mut dyn FnMut(&dyn LedgerScope) -> Result<(), TradebotError>,
    ) -> Result<(), TradebotError> {
        let mut ledger = self.ledger.lock();
        let snapshot = ledger.clone();
        let result = {
            let scope = UnitScope {
                ledger: RefCell::new(&mut *ledger),
            };
            work(&scope)
        };
        if result.is_err() {
            *ledger = snapshot;
        }
        result
    }
}

macro_rules! ledger_repositories {
    ($ty:ty, $this:ident => $get:expr) => {
        impl AccountRepository for $ty {
            fn create_account(&self, account: &Account) -> Result<(), TradebotError> {
                let $this = self;
                $get.insert_account(account)
            }

            fn get_account(&self) -> Result<Account, TradebotError> {
                let $this = self;
                $get.account()
            }

            fn update_account(&self, account: &Account) -> Result<(), TradebotError> {
                let $this = self;
                $get.write_account(account)
            }
        }

        impl SignalRepository for $ty {
            fn create_signal(&self, signal: &Signal) -> Result<Signal, TradebotError> {
                let $this = self;
                $get.insert_signal(signal)
            }

            fn get_open_signal(
                &self,
                symbol: &str,
                strategy_id: StrategyId,
            ) -> Result<Option<Signal>, TradebotError> {
                let $this = self;
                Ok($get.open_signal(symbol, strategy_id))
            }

            fn update_signal(&self, signal: &Signal) -> Result<(), TradebotError> {
                let $this = self;
                $get.write_signal(signal)
            }

            fn get_signal(&self, id: i64) -> Result<Option<Signal>, TradebotError> {
                let $this = self;
                Ok($get.signals.get(&id).cloned())
            }

            fn list_signals(&self) -> Result<Vec<Signal>, TradebotError> {
                let $this = self;
                Ok($get.signals.values().cloned().collect())
            }

            fn count_open_signals(&self, strategy_id: StrategyId) -> Result<usize, TradebotError> {
                let $this = self;
                Ok($get.count_open(strategy_id))
            }
        }
    };
}

ledger_repositories!(MemoryStore, store => store.ledger.lock());
ledger_repositories!(UnitScope<'_>, scope => scope.ledger.borrow_mut());

impl StrategyRepository for MemoryStore {
    fn save_strategy(&self, strategy: &Strategy) -> Result<(), TradebotError> {
        let mut catalog = self.catalog.lock();
        if catalog.strategies.contains_key(&strategy.id) {
            return Err(TradebotError::validation(
                "id",
                format!("strategy {} already exists", strategy.id),
            ));
        }
        catalog.strategies.insert(strategy.id, strategy.clone());
        Ok(())
    }

    fn update_strategy(&self, strategy: &Strategy) -> Result<(), TradebotError> {
        let mut catalog = self.catalog.lock();
        match catalog.strategies.get_mut(&strategy.id) {
            Some(stored) => {
                *stored = strategy.clone();
                Ok(())
            }
            None => Err(TradebotError::StrategyNotFound {
                id: strategy.id.to_string(),
            }),
        }
    }

    fn get_strategy(&self, id: StrategyId) -> Result<Option<Strategy>, TradebotError> {
        Ok(self.catalog.lock().strategies.get(&id).cloned())
    }

    fn list_strategies(&self) -> Result<Vec<Strategy>, TradebotError> {
        let mut strategies: Vec<Strategy> =
            self.catalog.lock().strategies.values().cloned().collect();
        strategies.sort_by_key(|s| s.created_at);
        Ok(strategies)
    }

    fn save_execution(&self, execution: &StrategyExecution) -> Result<(), TradebotError> {
        self.catalog.lock().executions.push(execution.clone());
        Ok(())
    }

    fn list_executions(
        &self,
        strategy_id: StrategyId,
        limit: usize,
    ) -> Result<Vec<StrategyExecution>, TradebotError> {
        Ok(self
            .catalog
            .lock()
            .executions
            .iter()
            .rev()
            .filter(|e| e.strategy_id == strategy_id)
            .take(limit)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::signal::{entry_economics, open_signal, EntrySignal, FeeSchedule, MarginType};
    use crate::domain::strategy::{AlgorithmConfig, Cycle, ExecutionStatus};
    use chrono::Utc;
    use std::sync::Arc;
    use uuid::Uuid;

    fn sample_signal(symbol: &str, strategy_id: StrategyId) -> Signal {
        let entry = EntrySignal {
            symbol: symbol.into(),
            strategy_id,
            entry_price: 100.0,
            leverage: 0.0,
            margin_type: MarginType::Isolated,
        };
        open_signal(
            &entry,
            &entry_economics(100.0, 100.0, 0.0, &FeeSchedule::default()),
            Utc::now(),
        )
    }

    #[test]
    fn create_assigns_ids() {
        let store = MemoryStore::new();
        let created = store.create_signal(&sample_signal("AAA", Uuid::nil())).unwrap();
        assert_eq!(created.id, 1);
        assert_eq!(created.orders[0].signal_id, 1);
        assert_eq!(store.get_signal(1).unwrap(), Some(created));
    }

    #[test]
    fn duplicate_open_signal_rejected() {
        let store = MemoryStore::new();
        let id = Uuid::new_v4();
        store.create_signal(&sample_signal("AAA", id)).unwrap();
        assert!(matches!(
            store.create_signal(&sample_signal("AAA", id)),
            Err(TradebotError::DuplicateOpenSignal { .. })
        ));
        store.create_signal(&sample_signal("BBB", id)).unwrap();
        assert_eq!(store.count_open_signals(id).unwrap(), 2);
    }

    #[test]
    fn failed_unit_rolls_back() {
        let store = MemoryStore::new();
        store.create_account(&Account::new(100.0, 1, "USDT")).unwrap();

        let result = store.atomically(&mut |scope: &dyn LedgerScope| {
            let mut account = scope.get_account()?;
            account.amount = 0.0;
            scope.update_account(&account)?;
            scope.create_signal(&sample_signal("AAA", Uuid::nil()))?;
            Err(TradebotError::NoAvailableOrders)
        });

        assert!(result.is_err());
        assert!((store.get_account().unwrap().amount - 100.0).abs() < f64::EPSILON);
        assert!(store.list_signals().unwrap().is_empty());
    }

    #[test]
    fn rollback_keeps_executions_written_meanwhile() {
        let store = Arc::new(MemoryStore::new());
        let strategy_id = Uuid::new_v4();

        let result = store.atomically(&mut |scope: &dyn LedgerScope| {
            scope.create_signal(&sample_signal("AAA", strategy_id))?;
            let outside = store.clone();
            std::thread::spawn(move || {
                outside.save_execution(&StrategyExecution {
                    strategy_id,
                    executed_at: Utc::now(),
                    status: ExecutionStatus::Error,
                    message: "storage error".into(),
                })
            })
            .join()
            .unwrap()?;
            Err(TradebotError::NoAvailableOrders)
        });

        assert!(result.is_err());
        assert!(store.list_signals().unwrap().is_empty());
        assert_eq!(store.list_executions(strategy_id, 10).unwrap().len(), 1);
    }

    #[test]
    fn outside_ledger_write_waits_for_failed_unit() {
        let store = Arc::new(MemoryStore::new());
        let mut writer = None;

        let result = store.atomically(&mut |scope: &dyn LedgerScope| {
            scope.create_signal(&sample_signal("AAA", Uuid::nil()))?;
            let outside = store.clone();
            writer = Some(std::thread::spawn(move || {
                outside.create_signal(&sample_signal("BBB", Uuid::nil()))
            }));
            std::thread::sleep(std::time::Duration::from_millis(20));
            Err(TradebotError::NoAvailableOrders)
        });
        assert!(result.is_err());

        let written = writer.unwrap().join().unwrap().unwrap();
        let signals = store.list_signals().unwrap();
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].symbol, "BBB");
        assert_eq!(signals[0].id, written.id);
    }

    #[test]
    fn executions_newest_first() {
        let store = MemoryStore::new();
        let strategy = Strategy::new(
            "s",
            "d",
            vec!["AAA".into()],
            Cycle::OneMinute,
            AlgorithmConfig::Volume,
        );
        store.save_strategy(&strategy).unwrap();
        for message in ["first", "second", "third"] {
            store
                .save_execution(&StrategyExecution {
                    strategy_id: strategy.id,
                    executed_at: Utc::now(),
                    status: ExecutionStatus::Ok,
                    message: message.into(),
                })
                .unwrap();
        }
        let executions = store.list_executions(strategy.id, 2).unwrap();
        assert_eq!(executions.len(), 2);
        assert_eq!(executions[0].message, "third");
        assert_eq!(executions[1].message, "second");
    }

    #[test]
    fn update_unknown_strategy_fails() {
        let store = MemoryStore::new();
        let strategy = Strategy::new(
            "s",
            "d",
            vec!["AAA".into()],
            Cycle::OneMinute,
            AlgorithmConfig::Volume,
        );
        assert!(matches!(
            store.update_strategy(&strategy),
            Err(TradebotError::StrategyNotFound { .. })
        ));
    }
}
