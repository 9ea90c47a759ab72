//! Bollinger Bands.
//!
//! - Middle: SMA over n closes
//! - Upper: Middle + (multiplier × StdDev)
//! - Lower: Middle - (multiplier × StdDev)
//!
//! StdDev is the population standard deviation (divides by N).
//! Warmup: first (period-1) points are `None`.

use crate::domain::indicator::stddev::window_mean_stddev;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BollingerBands {
    pub upper: f64,
    pub middle: f64,
    pub lower: f64,
}

pub fn calculate_bollinger(
    closes: &[f64],
    period: usize,
    multiplier: f64,
) -> Vec<Option<BollingerBands>> {
    if period == 0 {
        return vec![None; closes.len()];
    }

    (0..closes.len())
        .map(|i| {
            if i + 1 < period {
                return None;
            }
            let (middle, stddev) = window_mean_stddev(&closes[i + 1 - period..=i]);
            Some(BollingerBands {
                upper: middle + multiplier * stddev,
                middle,
                lower: middle - multiplier * stddev,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bollinger_warmup() {
        let series = calculate_bollinger(&[10.0, 20.0, 30.0, 40.0, 50.0], 3, 2.0);

        assert!(series[0].is_none());
        assert!(series[1].is_none());
        assert!(series[2].is_some());
        assert!(series[3].is_some());
        assert!(series[4].is_some());
    }

    #[test]
    fn bollinger_constant_values() {
        let series = calculate_bollinger(&[100.0; 5], 3, 2.0);
        let bands = series[2].unwrap();
        assert!((bands.middle - 100.0).abs() < f64::EPSILON);
        assert!((bands.upper - 100.0).abs() < f64::EPSILON);
        assert!((bands.lower - 100.0).abs() < f64::EPSILON);
    }

    #[test]
    fn bollinger_basic_calculation() {
        let series = calculate_bollinger(&[10.0, 20.0, 30.0], 3, 2.0);
        let bands = series[2].unwrap();

        let expected_middle: f64 = 20.0;
        let stddev = (200.0_f64 / 3.0).sqrt();

        assert!((bands.middle - expected_middle).abs() < 1e-10);
        assert!((bands.upper - (expected_middle + 2.0 * stddev)).abs() < 1e-10);
        assert!((bands.lower - (expected_middle - 2.0 * stddev)).abs() < 1e-10);
    }

    #[test]
    fn bollinger_multiplier_variations() {
        let narrow = calculate_bollinger(&[10.0, 20.0, 30.0], 3, 1.0)[2].unwrap();
        let wide = calculate_bollinger(&[10.0, 20.0, 30.0], 3, 2.0)[2].unwrap();
        assert!((wide.upper - wide.middle - 2.0 * (narrow.upper - narrow.middle)).abs() < 1e-10);
    }

    #[test]
    fn bollinger_symmetry() {
        let bands = calculate_bollinger(&[12.0, 15.0, 11.0, 19.0], 4, 2.0)[3].unwrap();
        assert!(((bands.upper - bands.middle) - (bands.middle - bands.lower)).abs() < 1e-10);
    }

    #[test]
    fn bollinger_short_input() {
        let series = calculate_bollinger(&[1.0, 2.0], 20, 2.0);
        assert_eq!(series, vec![None, None]);
    }
}
