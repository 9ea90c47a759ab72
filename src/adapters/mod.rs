//! Concrete adapter implementations for ports.

#[cfg(feature = "binance")]
pub mod binance_adapter;
pub mod file_config_adapter;
pub mod memory_store;
pub mod prometheus_metrics;
#[cfg(feature = "sqlite")]
pub mod sqlite_adapter;
pub mod tokio_queue;
