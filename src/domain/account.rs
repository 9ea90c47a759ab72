//! Account capital ledger.
//!
//! The account is a single row holding the free capital and the number of
//! position slots still available. Opening a position deducts one slot and its
//! principal; closing returns the slot together with principal plus profit.
//! The ledger does no locking of its own: callers run it inside a
//! [`UnitOfWork`](crate::ports::unit_of_work::UnitOfWork) scope.

use chrono::{DateTime, Utc};

use crate::domain::error::TradebotError;
use crate::domain::signal::{Signal, SignalStatus};
use crate::ports::account_port::AccountRepository;

pub const ACCOUNT_ID: i64 = 1;

#[derive(Debug, Clone, PartialEq)]
pub struct Account {
    pub id: i64,
    pub amount: f64,
    pub available_orders: i64,
    pub currency: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    pub fn new(amount: f64, available_orders: i64, currency: &str) -> Self {
        let now = Utc::now();
        Account {
            id: ACCOUNT_ID,
            amount,
            available_orders,
            currency: currency.to_string(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn can_open_order(&self) -> bool {
        self.available_orders > 0
    }

    /// amount / available_orders. Never divides by a non-positive slot count.
    pub fn capital_per_order(&self) -> Result<f64, TradebotError> {
        if !self.can_open_order() {
            return Err(TradebotError::NoAvailableOrders);
        }
        Ok(self.amount / self.available_orders as f64)
    }

    pub fn deduct_order(&mut self, amount: f64, now: DateTime<Utc>) {
        self.available_orders -= 1;
        self.amount -= amount;
        self.updated_at = now;
    }

    /// `amount` is principal plus realized profit and may be negative.
    pub fn add_order(&mut self, amount: f64, now: DateTime<Utc>) {
        self.available_orders += 1;
        self.amount += amount;
        self.updated_at = now;
    }
}

/// Ledger operations over an account repository.
pub struct AccountLedger<'a, R: AccountRepository + ?Sized> {
    repo: &'a R,
}

impl<'a, R: AccountRepository + ?Sized> AccountLedger<'a, R> {
    pub fn new(repo: &'a R) -> Self {
        AccountLedger { repo }
    }

    pub fn create_account(
        &self,
        amount: f64,
        available_orders: i64,
        currency: &str,
    ) -> Result<Account, TradebotError> {
        if amount < 0.0 {
            return Err(TradebotError::validation("amount", "must be non-negative"));
        }
        if available_orders < 0 {
            return Err(TradebotError::validation(
                "available_orders",
                "must be non-negative",
            ));
        }
        let account = Account::new(amount, available_orders, currency);
        self.repo.create_account(&account)?;
        Ok(account)
    }

    pub fn get_account(&self) -> Result<Account, TradebotError> {
        self.repo.get_account()
    }

    pub fn can_open_order(&self) -> Result<bool, TradebotError> {
        Ok(self.repo.get_account()?.can_open_order())
    }

    pub fn available_capital_per_order(&self) -> Result<f64, TradebotError> {
        self.repo.get_account()?.capital_per_order()
    }

    pub fn deduct_order(&self, amount: f64) -> Result<Account, TradebotError> {
        let mut account = self.repo.get_account()?;
        account.deduct_order(amount, Utc::now());
        self.repo.update_account(&account)?;
        Ok(account)
    }

    pub fn add_order(&self, amount: f64) -> Result<Account, TradebotError> {
        let mut account = self.repo.get_account()?;
        account.add_order(amount, Utc::now());
        self.repo.update_account(&account)?;
        Ok(account)
    }
}

/// Stored account versus the state implied by signal history.
#[derive(Debug, Clone, PartialEq)]
pub struct Reconciliation {
    pub stored_amount: f64,
    pub expected_amount: f64,
    pub stored_orders: i64,
    pub expected_orders: i64,
}

impl Reconciliation {
    pub fn amount_drift(&self) -> f64 {
        self.stored_amount - self.expected_amount
    }

    pub fn orders_drift(&self) -> i64 {
        self.stored_orders - self.expected_orders
    }

    pub fn is_consistent(&self, tolerance: f64) -> bool {
        self.orders_drift() == 0 && self.amount_drift().abs() <= tolerance
    }
}

/// expected amount = initial − Σ invested(open) + Σ profit(closed)
/// expected slots  = total − count(open)
pub fn reconcile(
    account: &Account,
    signals: &[Signal],
    initial_amount: f64,
    total_orders: i64,
) -> Reconciliation {
    let mut expected_amount = initial_amount;
    let mut open = 0i64;

    for signal in signals {
        let Some(order) = signal.order() else {
            continue;
        };
        match signal.status {
            SignalStatus::Open => {
                open += 1;
                expected_amount -= order.invested_amount;
            }
            SignalStatus::Closed => expected_amount += order.profit,
        }
    }

    Reconciliation {
        stored_amount: account.amount,
        expected_amount,
        stored_orders: account.available_orders,
        expected_orders: total_orders - open,
    }
}
