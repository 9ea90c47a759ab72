//! Atomic scope over signal and account storage.

use crate::domain::error::TradebotError;
use crate::ports::account_port::AccountRepository;
use crate::ports::signal_port::SignalRepository;

/// Repositories visible inside one atomic unit.
pub trait LedgerScope: SignalRepository + AccountRepository {}

impl<T: SignalRepository + AccountRepository + ?Sized> LedgerScope for T {}

pub trait UnitOfWork {
    /// Runs `work` so that every write it makes through the scope commits
    /// together or not at all. Concurrent units are serialized.
    fn atomically(
        &self,
        work: &mut dyn FnMut(&dyn LedgerScope) -> Result<(), TradebotError>,
    ) -> Result<(), TradebotError>;
}

/// Full store used by the lifecycle manager.
pub trait TradeStore: UnitOfWork + SignalRepository + AccountRepository {}

impl<T: UnitOfWork + SignalRepository + AccountRepository + ?Sized> TradeStore for T {}
