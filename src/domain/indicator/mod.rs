//! Technical indicators over close-price series.
//!
//! Every series is indexed like its input (oldest first). Points inside the
//! warmup window are `None`.

pub mod bollinger;
pub mod ema;
pub mod rsi;
pub mod stddev;

pub use bollinger::{calculate_bollinger, BollingerBands};
pub use ema::calculate_ema;
pub use rsi::calculate_rsi;
pub use stddev::calculate_stddev;

/// Last valid value of a series.
pub fn latest<T: Copy>(series: &[Option<T>]) -> Option<T> {
    series.last().copied().flatten()
}

/// Simple moving average of the trailing `period` values.
pub fn sma(values: &[f64], period: usize) -> Option<f64> {
    if period == 0 || values.len() < period {
        return None;
    }
    let window = &values[values.len() - period..];
    Some(window.iter().sum::<f64>() / period as f64)
}
