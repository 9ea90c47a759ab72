//! Port traits consumed by the domain.

pub mod account_port;
pub mod config_port;
pub mod market_data_port;
pub mod metrics_port;
pub mod signal_port;
pub mod strategy_port;
pub mod task_queue_port;
pub mod unit_of_work;
