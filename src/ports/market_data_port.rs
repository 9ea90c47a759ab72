//! Market data / broker port.

use std::time::{Duration, Instant};

use crate::domain::error::TradebotError;
use crate::domain::ohlcv::{Kline, TickerPrice};

/// Deadline carried through a unit of broker work.
#[derive(Debug, Clone, Copy)]
pub struct CallContext {
    deadline: Instant,
}

impl CallContext {
    pub fn with_timeout(timeout: Duration) -> Self {
        CallContext {
            deadline: Instant::now() + timeout,
        }
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Time left before the deadline, or `Timeout` once it has passed.
    pub fn remaining(&self, operation: &str) -> Result<Duration, TradebotError> {
        let now = Instant::now();
        if now >= self.deadline {
            return Err(TradebotError::Timeout {
                operation: operation.to_string(),
            });
        }
        Ok(self.deadline - now)
    }
}

pub trait MarketDataPort {
    fn list_ticker_prices(
        &self,
        ctx: &CallContext,
        symbol: &str,
    ) -> Result<Vec<TickerPrice>, TradebotError>;

    /// Most recent `limit` candles, oldest first.
    fn list_klines(
        &self,
        ctx: &CallContext,
        symbol: &str,
        interval: &str,
        limit: usize,
    ) -> Result<Vec<Kline>, TradebotError>;

    fn get_24h_volume(&self, ctx: &CallContext, symbol: &str) -> Result<f64, TradebotError>;

    /// Price of the first ticker returned for `symbol`.
    fn current_price(&self, ctx: &CallContext, symbol: &str) -> Result<f64, TradebotError> {
        self.list_ticker_prices(ctx, symbol)?
            .first()
            .map(|t| t.price)
            .ok_or_else(|| TradebotError::MarketData {
                symbol: symbol.to_string(),
                reason: "no ticker prices returned".to_string(),
            })
    }
}
