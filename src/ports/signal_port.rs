//! Signal persistence port.

use crate::domain::error::TradebotError;
use crate::domain::signal::Signal;
use crate::domain::strategy::StrategyId;

pub trait SignalRepository {
    /// Persists a new signal with its orders and returns it with ids assigned.
    ///
    /// Implementations must reject a second open signal for the same
    /// (symbol, strategy) with [`TradebotError::DuplicateOpenSignal`].
    fn create_signal(&self, signal: &Signal) -> Result<Signal, TradebotError>;

    /// The open signal for the key, if any.
    fn get_open_signal(
        &self,
        symbol: &str,
        strategy_id: StrategyId,
    ) -> Result<Option<Signal>, TradebotError>;

    /// Saves status, timestamps and every order of an existing signal.
    fn update_signal(&self, signal: &Signal) -> Result<(), TradebotError>;

    fn get_signal(&self, id: i64) -> Result<Option<Signal>, TradebotError>;

    fn list_signals(&self) -> Result<Vec<Signal>, TradebotError>;

    fn count_open_signals(&self, strategy_id: StrategyId) -> Result<usize, TradebotError>;
}
