//! Signals, their order legs, and entry/exit economics.
//!
//! A signal is one intended position for a (symbol, strategy) pair. Its first
//! order is canonical: every price, fee and profit figure is read from it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::domain::error::TradebotError;
use crate::domain::strategy::StrategyId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalStatus {
    Open,
    Closed,
}

impl SignalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalStatus::Open => "open",
            SignalStatus::Closed => "closed",
        }
    }
}

impl FromStr for SignalStatus {
    type Err = TradebotError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(SignalStatus::Open),
            "closed" => Ok(SignalStatus::Closed),
            other => Err(TradebotError::validation(
                "signal status",
                format!("unknown status '{other}'"),
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarginType {
    Isolated,
    Cross,
}

impl MarginType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MarginType::Isolated => "isolated",
            MarginType::Cross => "cross",
        }
    }
}

impl FromStr for MarginType {
    type Err = TradebotError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "isolated" => Ok(MarginType::Isolated),
            "cross" => Ok(MarginType::Cross),
            other => Err(TradebotError::validation(
                "margin type",
                format!("unknown margin type '{other}'"),
            )),
        }
    }
}

/// Identifies the open-signal slot a signal occupies.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SignalKey {
    pub symbol: String,
    pub strategy_id: StrategyId,
}

impl SignalKey {
    pub fn new(symbol: &str, strategy_id: StrategyId) -> Self {
        SignalKey {
            symbol: symbol.to_string(),
            strategy_id,
        }
    }
}

impl fmt::Display for SignalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.symbol, self.strategy_id)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Order {
    pub id: i64,
    pub signal_id: i64,
    pub entry_price: f64,
    pub exit_price: f64,
    pub quantity: f64,
    pub invested_amount: f64,
    pub margin_type: MarginType,
    pub entry_fee: f64,
    pub exit_fee: f64,
    pub leverage: f64,
    pub is_closing: bool,
    pub profit: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Leverage-scaled percentage move from entry to `price`.
    pub fn pnl_pct(&self, price: f64) -> f64 {
        if self.entry_price <= 0.0 {
            return 0.0;
        }
        (price - self.entry_price) / self.entry_price * effective_leverage(self.leverage) * 100.0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Signal {
    pub id: i64,
    pub symbol: String,
    pub strategy_id: StrategyId,
    pub status: SignalStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub orders: Vec<Order>,
}

impl Signal {
    pub fn key(&self) -> SignalKey {
        SignalKey::new(&self.symbol, self.strategy_id)
    }

    pub fn is_open(&self) -> bool {
        self.status == SignalStatus::Open
    }

    pub fn order(&self) -> Option<&Order> {
        self.orders.first()
    }

    pub fn order_mut(&mut self) -> Option<&mut Order> {
        self.orders.first_mut()
    }
}

/// Request to open a position.
#[derive(Debug, Clone, PartialEq)]
pub struct EntrySignal {
    pub symbol: String,
    pub strategy_id: StrategyId,
    pub entry_price: f64,
    pub leverage: f64,
    pub margin_type: MarginType,
}

/// Request to close the open position for a key.
#[derive(Debug, Clone, PartialEq)]
pub struct ExitSignal {
    pub symbol: String,
    pub strategy_id: StrategyId,
    pub exit_price: f64,
}

/// Flat fee charged on the notional of each side of a trade.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeeSchedule {
    pub rate_pct: f64,
}

pub const DEFAULT_FEE_RATE_PCT: f64 = 0.1;

impl Default for FeeSchedule {
    fn default() -> Self {
        FeeSchedule {
            rate_pct: DEFAULT_FEE_RATE_PCT,
        }
    }
}

impl FeeSchedule {
    pub fn fee_on(&self, notional: f64) -> f64 {
        notional * self.rate_pct / 100.0
    }
}

/// Leverage of zero or less means an unlevered position.
pub fn effective_leverage(leverage: f64) -> f64 {
    if leverage <= 0.0 { 1.0 } else { leverage }
}

/// Sizing of a new position from the principal committed to it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EntryEconomics {
    pub capital: f64,
    pub leverage: f64,
    pub quantity: f64,
    pub entry_fee: f64,
}

/// quantity = capital × leverage / price; fee charged on the levered notional.
pub fn entry_economics(
    capital: f64,
    entry_price: f64,
    leverage: f64,
    fees: &FeeSchedule,
) -> EntryEconomics {
    let leverage = effective_leverage(leverage);
    let notional = capital * leverage;
    EntryEconomics {
        capital,
        leverage,
        quantity: notional / entry_price,
        entry_fee: fees.fee_on(notional),
    }
}

/// Builds the unsaved open signal for an entry. Ids are assigned on create.
pub fn open_signal(entry: &EntrySignal, economics: &EntryEconomics, now: DateTime<Utc>) -> Signal {
    Signal {
        id: 0,
        symbol: entry.symbol.clone(),
        strategy_id: entry.strategy_id,
        status: SignalStatus::Open,
        created_at: now,
        updated_at: now,
        orders: vec![Order {
            id: 0,
            signal_id: 0,
            entry_price: entry.entry_price,
            exit_price: 0.0,
            quantity: economics.quantity,
            invested_amount: economics.capital,
            margin_type: entry.margin_type,
            entry_fee: economics.entry_fee,
            exit_fee: 0.0,
            leverage: economics.leverage,
            is_closing: false,
            profit: 0.0,
            created_at: now,
            updated_at: now,
        }],
    }
}

/// Closes `signal` at `exit_price` and returns the realized profit.
///
/// profit = (exit − entry) × quantity − (entry fee + exit fee)
pub fn close_signal(
    signal: &mut Signal,
    exit_price: f64,
    fees: &FeeSchedule,
    now: DateTime<Utc>,
) -> Result<f64, TradebotError> {
    let key = signal.key();
    let order = signal
        .order_mut()
        .ok_or_else(|| TradebotError::SignalNotFound {
            key: format!("{key} (no order leg)"),
        })?;

    order.exit_price = exit_price;
    order.exit_fee = fees.fee_on(order.quantity * exit_price);
    order.profit =
        (exit_price - order.entry_price) * order.quantity - (order.entry_fee + order.exit_fee);
    order.is_closing = true;
    order.updated_at = now;
    let profit = order.profit;

    signal.status = SignalStatus::Closed;
    signal.updated_at = now;
    Ok(profit)
}
