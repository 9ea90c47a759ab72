//! Strategy and execution-audit persistence port.

use crate::domain::error::TradebotError;
use crate::domain::strategy::{Strategy, StrategyExecution, StrategyId};

pub trait StrategyRepository {
    fn save_strategy(&self, strategy: &Strategy) -> Result<(), TradebotError>;

    fn update_strategy(&self, strategy: &Strategy) -> Result<(), TradebotError>;

    fn get_strategy(&self, id: StrategyId) -> Result<Option<Strategy>, TradebotError>;

    fn list_strategies(&self) -> Result<Vec<Strategy>, TradebotError>;

    fn save_execution(&self, execution: &StrategyExecution) -> Result<(), TradebotError>;

    /// Executions for a strategy, newest first.
    fn list_executions(
        &self,
        strategy_id: StrategyId,
        limit: usize,
    ) -> Result<Vec<StrategyExecution>, TradebotError>;
}
