//! SQLite store: signals, orders, the account ledger and strategies.
//!
//! Units of work run inside `BEGIN IMMEDIATE` transactions so the account row
//! is read and written under the database write lock. A partial unique index
//! keeps at most one open signal per (symbol, strategy).

use std::time::Duration;

use chrono::{DateTime, Utc};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, TransactionBehavior};
use uuid::Uuid;

use crate::domain::account::{Account, ACCOUNT_ID};
use crate::domain::error::TradebotError;
use crate::domain::signal::{Order, Signal};
use crate::domain::strategy::{
    AlgorithmConfig, Cycle, Strategy, StrategyExecution, StrategyId,
};
use crate::ports::account_port::AccountRepository;
use crate::ports::config_port::ConfigPort;
use crate::ports::signal_port::SignalRepository;
use crate::ports::strategy_port::StrategyRepository;
use crate::ports::unit_of_work::{LedgerScope, UnitOfWork};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS account (
        id INTEGER PRIMARY KEY,
        amount REAL NOT NULL,
        available_orders INTEGER NOT NULL,
        currency TEXT NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );
    CREATE TABLE IF NOT EXISTS signals (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        symbol TEXT NOT NULL,
        strategy_id TEXT NOT NULL,
        status TEXT NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );
    CREATE UNIQUE INDEX IF NOT EXISTS idx_signals_one_open
        ON signals(symbol, strategy_id) WHERE status = 'open';
    CREATE INDEX IF NOT EXISTS idx_signals_strategy_status ON signals(strategy_id, status);
    CREATE TABLE IF NOT EXISTS orders (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        signal_id INTEGER NOT NULL REFERENCES signals(id),
        entry_price REAL NOT NULL,
        exit_price REAL NOT NULL,
        quantity REAL NOT NULL,
        invested_amount REAL NOT NULL,
        margin_type TEXT NOT NULL,
        entry_fee REAL NOT NULL,
        exit_fee REAL NOT NULL,
        leverage REAL NOT NULL,
        is_closing INTEGER NOT NULL,
        profit REAL NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_orders_signal ON orders(signal_id);
    CREATE TABLE IF NOT EXISTS strategies (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        description TEXT NOT NULL,
        algorithm TEXT NOT NULL,
        monitored_symbols TEXT NOT NULL,
        cycle INTEGER NOT NULL,
        status TEXT NOT NULL,
        config TEXT NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );
    CREATE TABLE IF NOT EXISTS strategy_executions (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        strategy_id TEXT NOT NULL,
        executed_at TEXT NOT NULL,
        status TEXT NOT NULL,
        message TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_executions_strategy
        ON strategy_executions(strategy_id, id);";

fn pool_err(e: r2d2::Error) -> TradebotError {
    TradebotError::Database {
        reason: e.to_string(),
    }
}

fn query_err(e: rusqlite::Error) -> TradebotError {
    TradebotError::DatabaseQuery {
        reason: e.to_string(),
    }
}

fn corrupt(column: &str, reason: impl std::fmt::Display) -> TradebotError {
    TradebotError::Database {
        reason: format!("corrupt {column}: {reason}"),
    }
}

fn is_constraint_violation(e: &rusqlite::Error) -> bool {
    matches!(e, rusqlite::Error::SqliteFailure(err, _) if err.code == ErrorCode::ConstraintViolation)
}

fn ts(value: &DateTime<Utc>) -> String {
    value.to_rfc3339()
}

fn parse_ts(column: &str, value: &str) -> Result<DateTime<Utc>, TradebotError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| corrupt(column, e))
}

fn parse_uuid(column: &str, value: &str) -> Result<Uuid, TradebotError> {
    Uuid::parse_str(value).map_err(|e| corrupt(column, e))
}

pub struct SqliteStore {
    pool: Pool<SqliteConnectionManager>,
}

impl SqliteStore {
    pub fn from_config(config: &dyn ConfigPort) -> Result<Self, TradebotError> {
        let db_path =
            config
                .get_string("sqlite", "path")
                .ok_or_else(|| TradebotError::ConfigMissing {
                    section: "sqlite".into(),
                    key: "path".into(),
                })?;

        let pool_size = config.get_int("sqlite", "pool_size", 4) as u32;
        Self::open(&db_path, pool_size)
    }

    pub fn open(db_path: &str, pool_size: u32) -> Result<Self, TradebotError> {
        let manager = SqliteConnectionManager::file(db_path).with_init(|conn| {
            conn.busy_timeout(BUSY_TIMEOUT)?;
            conn.execute_batch("PRAGMA foreign_keys = ON;")
        });
        let pool = Pool::builder()
            .max_size(pool_size.max(1))
            .build(manager)
            .map_err(pool_err)?;

        Ok(Self { pool })
    }

    pub fn in_memory() -> Result<Self, TradebotError> {
        let manager = SqliteConnectionManager::memory()
            .with_init(|conn| conn.execute_batch("PRAGMA foreign_keys = ON;"));
        let pool = Pool::builder()
            .max_size(1)
            .build(manager)
            .map_err(pool_err)?;

        Ok(Self { pool })
    }

    pub fn initialize_schema(&self) -> Result<(), TradebotError> {
        let conn = self.conn()?;
        conn.execute_batch(SCHEMA).map_err(query_err)?;
        Ok(())
    }

    fn conn(&self) -> Result<PooledConnection<SqliteConnectionManager>, TradebotError> {
        self.pool.get().map_err(pool_err)
    }
}

/// Repository view over one open transaction.
struct TxScope<'a> {
    conn: &'a Connection,
}

impl UnitOfWork for SqliteStore {
    fn atomically(
        &self,
        work: &mut dyn FnMut(&dyn LedgerScope) -> Result<(), TradebotError>,
    ) -> Result<(), TradebotError> {
        let mut conn = self.conn()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(query_err)?;

        work(&TxScope { conn: &tx })?;

        tx.commit().map_err(query_err)?;
        Ok(())
    }
}

// -- account -----------------------------------------------------------------

fn insert_account(conn: &Connection, account: &Account) -> Result<(), TradebotError> {
    conn.execute(
        "INSERT INTO account (id, amount, available_orders, currency, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            account.id,
            account.amount,
            account.available_orders,
            account.currency,
            ts(&account.created_at),
            ts(&account.updated_at)
        ],
    )
    .map_err(|e| {
        if is_constraint_violation(&e) {
            TradebotError::AccountExists
        } else {
            query_err(e)
        }
    })?;
    Ok(())
}

fn select_account(conn: &Connection) -> Result<Account, TradebotError> {
    let row: Option<(i64, f64, i64, String, String, String)> = conn
        .query_row(
            "SELECT id, amount, available_orders, currency, created_at, updated_at
             FROM account WHERE id = ?1",
            params![ACCOUNT_ID],
            |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                    row.get(5)?,
                ))
            },
        )
        .optional()
        .map_err(query_err)?;

    let (id, amount, available_orders, currency, created_at, updated_at) =
        row.ok_or(TradebotError::AccountNotFound)?;
    Ok(Account {
        id,
        amount,
        available_orders,
        currency,
        created_at: parse_ts("account.created_at", &created_at)?,
        updated_at: parse_ts("account.updated_at", &updated_at)?,
    })
}

fn write_account(conn: &Connection, account: &Account) -> Result<(), TradebotError> {
    let changed = conn
        .execute(
            "UPDATE account SET amount = ?1, available_orders = ?2, currency = ?3, updated_at = ?4
             WHERE id = ?5",
            params![
                account.amount,
                account.available_orders,
                account.currency,
                ts(&account.updated_at),
                account.id
            ],
        )
        .map_err(query_err)?;
    if changed == 0 {
        return Err(TradebotError::AccountNotFound);
    }
    Ok(())
}

// -- signals -----------------------------------------------------------------

struct SignalRow {
    id: i64,
    symbol: String,
    strategy_id: String,
    status: String,
    created_at: String,
    updated_at: String,
}

const SIGNAL_COLUMNS: &str = "id, symbol, strategy_id, status, created_at, updated_at";

fn signal_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<SignalRow> {
    Ok(SignalRow {
        id: row.get(0)?,
        symbol: row.get(1)?,
        strategy_id: row.get(2)?,
        status: row.get(3)?,
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
    })
}

fn load_orders(conn: &Connection, signal_id: i64) -> Result<Vec<Order>, TradebotError> {
    let mut stmt = conn
        .prepare(
            "SELECT id, signal_id, entry_price, exit_price, quantity, invested_amount,
                    margin_type, entry_fee, exit_fee, leverage, is_closing, profit,
                    created_at, updated_at
             FROM orders WHERE signal_id = ?1 ORDER BY id ASC",
        )
        .map_err(query_err)?;

    type OrderRow = (
        i64,
        i64,
        f64,
        f64,
        f64,
        f64,
        String,
        f64,
        f64,
        f64,
        bool,
        f64,
        String,
        String,
    );
    let rows = stmt
        .query_map(params![signal_id], |row| {
            Ok((
                row.get(0)?,
                row.get(1)?,
                row.get(2)?,
                row.get(3)?,
                row.get(4)?,
                row.get(5)?,
                row.get(6)?,
                row.get(7)?,
                row.get(8)?,
                row.get(9)?,
                row.get(10)?,
                row.get(11)?,
                row.get(12)?,
                row.get(13)?,
            ))
        })
        .map_err(query_err)?;

    let mut orders = Vec::new();
    for row in rows {
        let (
            id,
            signal_id,
            entry_price,
            exit_price,
            quantity,
            invested_amount,
            margin_type,
            entry_fee,
            exit_fee,
            leverage,
            is_closing,
            profit,
            created_at,
            updated_at,
        ): OrderRow = row.map_err(query_err)?;
        orders.push(Order {
            id,
            signal_id,
            entry_price,
            exit_price,
            quantity,
            invested_amount,
            margin_type: margin_type
                .parse()
                .map_err(|e| corrupt("orders.margin_type", e))?,
            entry_fee,
            exit_fee,
            leverage,
            is_closing,
            profit,
            created_at: parse_ts("orders.created_at", &created_at)?,
            updated_at: parse_ts("orders.updated_at", &updated_at)?,
        });
    }
    Ok(orders)
}

fn hydrate_signal(conn: &Connection, row: SignalRow) -> Result<Signal, TradebotError> {
    Ok(Signal {
        id: row.id,
        symbol: row.symbol,
        strategy_id: parse_uuid("signals.strategy_id", &row.strategy_id)?,
        status: row
            .status
            .parse()
            .map_err(|e| corrupt("signals.status", e))?,
        created_at: parse_ts("signals.created_at", &row.created_at)?,
        updated_at: parse_ts("signals.updated_at", &row.updated_at)?,
        orders: load_orders(conn, row.id)?,
    })
}

fn query_signals(
    conn: &Connection,
    filter: &str,
    args: &[&dyn rusqlite::ToSql],
) -> Result<Vec<Signal>, TradebotError> {
    let sql = format!("SELECT {SIGNAL_COLUMNS} FROM signals {filter} ORDER BY id ASC");
    let mut stmt = conn.prepare(&sql).map_err(query_err)?;
    let rows = stmt.query_map(args, signal_row).map_err(query_err)?;

    let mut raw = Vec::new();
    for row in rows {
        raw.push(row.map_err(query_err)?);
    }
    raw.into_iter()
        .map(|row| hydrate_signal(conn, row))
        .collect()
}

fn insert_order(conn: &Connection, signal_id: i64, order: &Order) -> Result<i64, TradebotError> {
    conn.execute(
        "INSERT INTO orders (signal_id, entry_price, exit_price, quantity, invested_amount,
                             margin_type, entry_fee, exit_fee, leverage, is_closing, profit,
                             created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        params![
            signal_id,
            order.entry_price,
            order.exit_price,
            order.quantity,
            order.invested_amount,
            order.margin_type.as_str(),
            order.entry_fee,
            order.exit_fee,
            order.leverage,
            order.is_closing,
            order.profit,
            ts(&order.created_at),
            ts(&order.updated_at)
        ],
    )
    .map_err(query_err)?;
    Ok(conn.last_insert_rowid())
}

fn insert_signal(conn: &Connection, signal: &Signal) -> Result<Signal, TradebotError> {
    conn.execute(
        "INSERT INTO signals (symbol, strategy_id, status, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            signal.symbol,
            signal.strategy_id.to_string(),
            signal.status.as_str(),
            ts(&signal.created_at),
            ts(&signal.updated_at)
        ],
    )
    .map_err(|e| {
        if is_constraint_violation(&e) {
            TradebotError::DuplicateOpenSignal {
                key: signal.key().to_string(),
            }
        } else {
            query_err(e)
        }
    })?;

    let mut created = signal.clone();
    created.id = conn.last_insert_rowid();
    for order in &mut created.orders {
        order.signal_id = created.id;
        order.id = insert_order(conn, created.id, order)?;
    }
    Ok(created)
}

fn write_signal(conn: &Connection, signal: &Signal) -> Result<(), TradebotError> {
    let changed = conn
        .execute(
            "UPDATE signals SET status = ?1, updated_at = ?2 WHERE id = ?3",
            params![signal.status.as_str(), ts(&signal.updated_at), signal.id],
        )
        .map_err(|e| {
            if is_constraint_violation(&e) {
                TradebotError::DuplicateOpenSignal {
                    key: signal.key().to_string(),
                }
            } else {
                query_err(e)
            }
        })?;
    if changed == 0 {
        return Err(TradebotError::SignalNotFound {
            key: format!("id {}", signal.id),
        });
    }

    for order in &signal.orders {
        if order.id == 0 {
            insert_order(conn, signal.id, order)?;
            continue;
        }
        conn.execute(
            "UPDATE orders SET exit_price = ?1, exit_fee = ?2, is_closing = ?3, profit = ?4,
                               quantity = ?5, updated_at = ?6
             WHERE id = ?7 AND signal_id = ?8",
            params![
                order.exit_price,
                order.exit_fee,
                order.is_closing,
                order.profit,
                order.quantity,
                ts(&order.updated_at),
                order.id,
                signal.id
            ],
        )
        .map_err(query_err)?;
    }
    Ok(())
}

fn select_open_signal(
    conn: &Connection,
    symbol: &str,
    strategy_id: StrategyId,
) -> Result<Option<Signal>, TradebotError> {
    let id = strategy_id.to_string();
    Ok(query_signals(
        conn,
        "WHERE symbol = ?1 AND strategy_id = ?2 AND status = 'open'",
        &[&symbol, &id],
    )?
    .into_iter()
    .next())
}

fn select_signal(conn: &Connection, id: i64) -> Result<Option<Signal>, TradebotError> {
    Ok(query_signals(conn, "WHERE id = ?1", &[&id])?.into_iter().next())
}

fn count_open(conn: &Connection, strategy_id: StrategyId) -> Result<usize, TradebotError> {
    let count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM signals WHERE strategy_id = ?1 AND status = 'open'",
            params![strategy_id.to_string()],
            |row| row.get(0),
        )
        .map_err(query_err)?;
    Ok(count as usize)
}

macro_rules! ledger_repositories {
    ($ty:ty, $conn:ident => $get:expr) => {
        impl AccountRepository for $ty {
            fn create_account(&self, account: &Account) -> Result<(), TradebotError> {
                let $conn = self;
                insert_account(&$get, account)
            }

            fn get_account(&self) -> Result<Account, TradebotError> {
                let $conn = self;
                select_account(&$get)
            }

            fn update_account(&self, account: &Account) -> Result<(), TradebotError> {
                let $conn = self;
                write_account(&$get, account)
            }
        }

        impl SignalRepository for $ty {
            fn create_signal(&self, signal: &Signal) -> Result<Signal, TradebotError> {
                let $conn = self;
                insert_signal(&$get, signal)
            }

            fn get_open_signal(
                &self,
                symbol: &str,
                strategy_id: StrategyId,
            ) -> Result<Option<Signal>, TradebotError> {
                let $conn = self;
                select_open_signal(&$get, symbol, strategy_id)
            }

            fn update_signal(&self, signal: &Signal) -> Result<(), TradebotError> {
                let $conn = self;
                write_signal(&$get, signal)
            }

            fn get_signal(&self, id: i64) -> Result<Option<Signal>, TradebotError> {
                let $conn = self;
                select_signal(&$get, id)
            }

            fn list_signals(&self) -> Result<Vec<Signal>, TradebotError> {
                let $conn = self;
                query_signals(&$get, "", &[])
            }

            fn count_open_signals(&self, strategy_id: StrategyId) -> Result<usize, TradebotError> {
                let $conn = self;
                count_open(&$get, strategy_id)
            }
        }
    };
}

// A pooled connection outside any transaction; each call commits on its own.
ledger_repositories!(SqliteStore, store => *store.conn()?);
ledger_repositories!(TxScope<'_>, scope => *scope.conn);

// -- strategies --------------------------------------------------------------

type StrategyRow = (
    String,
    String,
    String,
    String,
    String,
    u32,
    String,
    String,
    String,
    String,
);

fn hydrate_strategy(row: StrategyRow) -> Result<Strategy, TradebotError> {
    let (
        id,
        name,
        description,
        algorithm,
        symbols,
        cycle,
        status,
        config,
        created_at,
        updated_at,
    ) = row;
    let config: AlgorithmConfig =
        serde_json::from_str(&config).map_err(|e| corrupt("strategies.config", e))?;
    Ok(Strategy {
        id: parse_uuid("strategies.id", &id)?,
        name,
        description,
        algorithm: algorithm
            .parse()
            .map_err(|e| corrupt("strategies.algorithm", e))?,
        monitored_symbols: serde_json::from_str(&symbols)
            .map_err(|e| corrupt("strategies.monitored_symbols", e))?,
        cycle: Cycle::try_from(cycle).map_err(|e| corrupt("strategies.cycle", e))?,
        status: status
            .parse()
            .map_err(|e| corrupt("strategies.status", e))?,
        config,
        created_at: parse_ts("strategies.created_at", &created_at)?,
        updated_at: parse_ts("strategies.updated_at", &updated_at)?,
    })
}

impl StrategyRepository for SqliteStore {
    fn save_strategy(&self, strategy: &Strategy) -> Result<(), TradebotError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO strategies (id, name, description, algorithm, monitored_symbols, cycle,
                                     status, config, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                strategy.id.to_string(),
                strategy.name,
                strategy.description,
                strategy.algorithm.as_str(),
                serde_json::to_string(&strategy.monitored_symbols)?,
                strategy.cycle.minutes(),
                strategy.status.as_str(),
                serde_json::to_string(&strategy.config)?,
                ts(&strategy.created_at),
                ts(&strategy.updated_at)
            ],
        )
        .map_err(|e| {
            if is_constraint_violation(&e) {
                TradebotError::validation("id", format!("strategy {} already exists", strategy.id))
            } else {
                query_err(e)
            }
        })?;
        Ok(())
    }

    fn update_strategy(&self, strategy: &Strategy) -> Result<(), TradebotError> {
        let conn = self.conn()?;
        let changed = conn
            .execute(
                "UPDATE strategies SET name = ?1, description = ?2, algorithm = ?3,
                        monitored_symbols = ?4, cycle = ?5, status = ?6, config = ?7,
                        updated_at = ?8
                 WHERE id = ?9",
                params![
                    strategy.name,
                    strategy.description,
                    strategy.algorithm.as_str(),
                    serde_json::to_string(&strategy.monitored_symbols)?,
                    strategy.cycle.minutes(),
                    strategy.status.as_str(),
                    serde_json::to_string(&strategy.config)?,
                    ts(&strategy.updated_at),
                    strategy.id.to_string()
                ],
            )
            .map_err(query_err)?;
        if changed == 0 {
            return Err(TradebotError::StrategyNotFound {
                id: strategy.id.to_string(),
            });
        }
        Ok(())
    }

    fn get_strategy(&self, id: StrategyId) -> Result<Option<Strategy>, TradebotError> {
        let conn = self.conn()?;
        let row: Option<StrategyRow> = conn
            .query_row(
                "SELECT id, name, description, algorithm, monitored_symbols, cycle, status,
                        config, created_at, updated_at
                 FROM strategies WHERE id = ?1",
                params![id.to_string()],
                |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                        row.get(5)?,
                        row.get(6)?,
                        row.get(7)?,
                        row.get(8)?,
                        row.get(9)?,
                    ))
                },
            )
            .optional()
            .map_err(query_err)?;
        row.map(hydrate_strategy).transpose()
    }

    fn list_strategies(&self) -> Result<Vec<Strategy>, TradebotError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, name, description, algorithm, monitored_symbols, cycle, status,
                        config, created_at, updated_at
                 FROM strategies ORDER BY created_at ASC",
            )
            .map_err(query_err)?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                    row.get(5)?,
                    row.get(6)?,
                    row.get(7)?,
                    row.get(8)?,
                    row.get(9)?,
                ))
            })
            .map_err(query_err)?;

        let mut strategies = Vec::new();
        for row in rows {
            strategies.push(hydrate_strategy(row.map_err(query_err)?)?);
        }
        Ok(strategies)
    }

    fn save_execution(&self, execution: &StrategyExecution) -> Result<(), TradebotError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO strategy_executions (strategy_id, executed_at, status, message)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                execution.strategy_id.to_string(),
                ts(&execution.executed_at),
                execution.status.as_str(),
                execution.message
            ],
        )
        .map_err(query_err)?;
        Ok(())
    }

    fn list_executions(
        &self,
        strategy_id: StrategyId,
        limit: usize,
    ) -> Result<Vec<StrategyExecution>, TradebotError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT strategy_id, executed_at, status, message
                 FROM strategy_executions WHERE strategy_id = ?1
                 ORDER BY id DESC LIMIT ?2",
            )
            .map_err(query_err)?;
        let rows = stmt
            .query_map(params![strategy_id.to_string(), limit as i64], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })
            .map_err(query_err)?;

        let mut executions = Vec::new();
        for row in rows {
            let (id, executed_at, status, message) = row.map_err(query_err)?;
            executions.push(StrategyExecution {
                strategy_id: parse_uuid("strategy_executions.strategy_id", &id)?,
                executed_at: parse_ts("strategy_executions.executed_at", &executed_at)?,
                status: status
                    .parse()
                    .map_err(|e| corrupt("strategy_executions.status", e))?,
                message,
            });
        }
        Ok(executions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::signal::{
        close_signal, entry_economics, open_signal, EntrySignal, FeeSchedule, MarginType,
        SignalStatus,
    };
    use crate::domain::strategy::{ExecutionStatus, GridConfig, StrategyStatus};

    struct EmptyConfig;

    impl ConfigPort for EmptyConfig {
        fn get_string(&self, _section: &str, _key: &str) -> Option<String> {
            None
        }
        fn get_int(&self, _section: &str, _key: &str, default: i64) -> i64 {
            default
        }
        fn get_double(&self, _section: &str, _key: &str, default: f64) -> f64 {
            default
        }
        fn get_bool(&self, _section: &str, _key: &str, default: bool) -> bool {
            default
        }
    }

    fn store() -> SqliteStore {
        let store = SqliteStore::in_memory().unwrap();
        store.initialize_schema().unwrap();
        store
    }

    fn sample_signal(symbol: &str, strategy_id: StrategyId) -> Signal {
        let entry = EntrySignal {
            symbol: symbol.into(),
            strategy_id,
            entry_price: 50_000.0,
            leverage: 2.0,
            margin_type: MarginType::Cross,
        };
        open_signal(
            &entry,
            &entry_economics(1000.0, 50_000.0, 2.0, &FeeSchedule::default()),
            Utc::now(),
        )
    }

    fn sample_strategy() -> Strategy {
        Strategy::new(
            "grid",
            "grid strategy",
            vec!["BTCUSDT".into(), "ETHUSDT".into()],
            Cycle::FifteenMinutes,
            AlgorithmConfig::Grid(GridConfig {
                grid_levels: 5,
                grid_spacing_pct: 1.0,
                take_profit_pct: 2.0,
                ..GridConfig::default()
            }),
        )
    }

    #[test]
    fn from_config_missing_path() {
        let config = EmptyConfig;
        let result = SqliteStore::from_config(&config);
        match result {
            Err(TradebotError::ConfigMissing { section, key }) => {
                assert_eq!(section, "sqlite");
                assert_eq!(key, "path");
            }
            Err(other) => panic!("expected ConfigMissing, got: {other}"),
            Ok(_) => panic!("expected error, got Ok"),
        }
    }

    #[test]
    fn in_memory_initialization_is_idempotent() {
        let store = store();
        store.initialize_schema().unwrap();
    }

    #[test]
    fn account_round_trip() {
        let store = store();
        assert!(matches!(
            store.get_account(),
            Err(TradebotError::AccountNotFound)
        ));

        let mut account = Account::new(1000.0, 4, "USDT");
        store.create_account(&account).unwrap();
        assert!(matches!(
            store.create_account(&account),
            Err(TradebotError::AccountExists)
        ));

        account.deduct_order(250.0, Utc::now());
        store.update_account(&account).unwrap();
        let loaded = store.get_account().unwrap();
        assert_eq!(loaded.available_orders, 3);
        assert!((loaded.amount - 750.0).abs() < f64::EPSILON);
        assert_eq!(loaded.currency, "USDT");
    }

    #[test]
    fn signal_round_trip_with_orders() {
        let store = store();
        let strategy_id = Uuid::new_v4();
        let created = store
            .create_signal(&sample_signal("BTCUSDT", strategy_id))
            .unwrap();
        assert!(created.id > 0);
        assert_eq!(created.orders[0].signal_id, created.id);

        let loaded = store.get_signal(created.id).unwrap().unwrap();
        assert_eq!(loaded.strategy_id, strategy_id);
        assert_eq!(loaded.status, SignalStatus::Open);
        let order = loaded.order().unwrap();
        assert_eq!(order.margin_type, MarginType::Cross);
        assert!((order.quantity - 0.04).abs() < 1e-12);
        assert!((order.leverage - 2.0).abs() < f64::EPSILON);

        let open = store.get_open_signal("BTCUSDT", strategy_id).unwrap();
        assert_eq!(open.map(|s| s.id), Some(created.id));
        assert!(store.get_open_signal("ETHUSDT", strategy_id).unwrap().is_none());
    }

    #[test]
    fn unique_index_rejects_second_open_signal() {
        let store = store();
        let strategy_id = Uuid::new_v4();
        store
            .create_signal(&sample_signal("BTCUSDT", strategy_id))
            .unwrap();
        assert!(matches!(
            store.create_signal(&sample_signal("BTCUSDT", strategy_id)),
            Err(TradebotError::DuplicateOpenSignal { .. })
        ));
        // other strategy, same symbol is fine
        store
            .create_signal(&sample_signal("BTCUSDT", Uuid::new_v4()))
            .unwrap();
    }

    #[test]
    fn closed_signal_frees_the_key() {
        let store = store();
        let strategy_id = Uuid::new_v4();
        let mut signal = store
            .create_signal(&sample_signal("BTCUSDT", strategy_id))
            .unwrap();
        close_signal(&mut signal, 55_000.0, &FeeSchedule::default(), Utc::now()).unwrap();
        store.update_signal(&signal).unwrap();

        let loaded = store.get_signal(signal.id).unwrap().unwrap();
        assert_eq!(loaded.status, SignalStatus::Closed);
        let order = loaded.order().unwrap();
        assert!(order.is_closing);
        assert!((order.profit - signal.order().unwrap().profit).abs() < 1e-9);

        assert_eq!(store.count_open_signals(strategy_id).unwrap(), 0);
        store
            .create_signal(&sample_signal("BTCUSDT", strategy_id))
            .unwrap();
        assert_eq!(store.count_open_signals(strategy_id).unwrap(), 1);
        assert_eq!(store.list_signals().unwrap().len(), 2);
    }

    #[test]
    fn update_missing_signal_fails() {
        let store = store();
        let mut signal = sample_signal("BTCUSDT", Uuid::new_v4());
        signal.id = 42;
        assert!(matches!(
            store.update_signal(&signal),
            Err(TradebotError::SignalNotFound { .. })
        ));
    }

    #[test]
    fn failed_unit_of_work_rolls_back() {
        let store = store();
        store
            .create_account(&Account::new(1000.0, 2, "USDT"))
            .unwrap();
        let strategy_id = Uuid::new_v4();

        let result = store.atomically(&mut |scope: &dyn LedgerScope| {
            scope.create_signal(&sample_signal("BTCUSDT", strategy_id))?;
            let mut account = scope.get_account()?;
            account.deduct_order(500.0, Utc::now());
            scope.update_account(&account)?;
            Err(TradebotError::NoAvailableOrders)
        });

        assert!(matches!(result, Err(TradebotError::NoAvailableOrders)));
        assert!(store.list_signals().unwrap().is_empty());
        assert_eq!(store.get_account().unwrap().available_orders, 2);
    }

    #[test]
    fn committed_unit_of_work_is_visible() {
        let store = store();
        store
            .create_account(&Account::new(1000.0, 2, "USDT"))
            .unwrap();

        store
            .atomically(&mut |scope: &dyn LedgerScope| {
                let mut account = scope.get_account()?;
                account.deduct_order(500.0, Utc::now());
                scope.update_account(&account)
            })
            .unwrap();

        assert_eq!(store.get_account().unwrap().available_orders, 1);
    }

    #[test]
    fn strategy_round_trip() {
        let store = store();
        let mut strategy = sample_strategy();
        store.save_strategy(&strategy).unwrap();
        assert!(store.save_strategy(&strategy).is_err());

        let loaded = store.get_strategy(strategy.id).unwrap().unwrap();
        assert_eq!(loaded.monitored_symbols, strategy.monitored_symbols);
        assert_eq!(loaded.config, strategy.config);
        assert_eq!(loaded.cycle, Cycle::FifteenMinutes);

        strategy.status = StrategyStatus::Disabled;
        store.update_strategy(&strategy).unwrap();
        assert!(store.get_strategy(strategy.id).unwrap().unwrap().is_disabled());
        assert_eq!(store.list_strategies().unwrap().len(), 1);
        assert!(store.get_strategy(Uuid::new_v4()).unwrap().is_none());
    }

    #[test]
    fn executions_listed_newest_first() {
        let store = store();
        let strategy = sample_strategy();
        store.save_strategy(&strategy).unwrap();
        for (status, message) in [
            (ExecutionStatus::Ok, "first"),
            (ExecutionStatus::Error, "second"),
            (ExecutionStatus::Ok, "third"),
        ] {
            store
                .save_execution(&StrategyExecution {
                    strategy_id: strategy.id,
                    executed_at: Utc::now(),
                    status,
                    message: message.into(),
                })
                .unwrap();
        }

        let executions = store.list_executions(strategy.id, 2).unwrap();
        assert_eq!(executions.len(), 2);
        assert_eq!(executions[0].message, "third");
        assert_eq!(executions[1].status, ExecutionStatus::Error);
    }
}
