//! Market data value types returned by the broker.

use chrono::{DateTime, Utc};

#[derive(Debug, Clone, PartialEq)]
pub struct Kline {
    pub open_time: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub close_time: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TickerPrice {
    pub symbol: String,
    pub price: f64,
}

pub fn closes(klines: &[Kline]) -> Vec<f64> {
    klines.iter().map(|k| k.close).collect()
}

/// Mean volume of `klines`, zero when empty.
pub fn mean_volume(klines: &[Kline]) -> f64 {
    if klines.is_empty() {
        return 0.0;
    }
    klines.iter().map(|k| k.volume).sum::<f64>() / klines.len() as f64
}
