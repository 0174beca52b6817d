//! Simple Moving Average indicator.
//!
//! SMA(n)[i] = (P[i-n+1] + ... + P[i]) / n, kept as a sliding window sum.
//! Warmup: first (n-1) defined values are undefined.

use crate::domain::indicator::over_defined_runs;

pub fn calculate_sma(source: &[Option<f64>], length: usize) -> Vec<Option<f64>> {
    if length == 0 {
        return vec![None; source.len()];
    }
    over_defined_runs(source, |prices| sma_run(prices, length))
}

fn sma_run(prices: &[f64], length: usize) -> Vec<Option<f64>> {
    let mut values = Vec::with_capacity(prices.len());
    let mut window_sum = 0.0;

    for (i, price) in prices.iter().enumerate() {
        window_sum += price;
        if i >= length {
            window_sum -= prices[i - length];
        }
        values.push((i + 1 >= length).then(|| window_sum / length as f64));
    }

    values
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn defined(prices: &[f64]) -> Vec<Option<f64>> {
        prices.iter().map(|&p| Some(p)).collect()
    }

    #[test]
    fn sma_warmup() {
        let values = calculate_sma(&defined(&[1.0, 2.0, 3.0, 4.0]), 3);
        assert_eq!(values[0], None);
        assert_eq!(values[1], None);
        assert!(values[2].is_some());
        assert!(values[3].is_some());
    }

    #[test]
    fn sma_sliding_window() {
        let values = calculate_sma(&defined(&[1.0, 2.0, 3.0, 4.0, 5.0]), 3);
        assert_relative_eq!(values[2].unwrap(), 2.0);
        assert_relative_eq!(values[3].unwrap(), 3.0);
        assert_relative_eq!(values[4].unwrap(), 4.0);
    }

    #[test]
    fn sma_flat_prices_exact() {
        let values = calculate_sma(&defined(&[100.0; 20]), 10);
        for v in values.iter().skip(9) {
            assert_eq!(*v, Some(100.0));
        }
    }

    #[test]
    fn sma_period_1_is_identity() {
        let values = calculate_sma(&defined(&[7.0, 8.0]), 1);
        assert_eq!(values, vec![Some(7.0), Some(8.0)]);
    }

    #[test]
    fn sma_longer_than_series() {
        let values = calculate_sma(&defined(&[1.0, 2.0]), 5);
        assert_eq!(values, vec![None, None]);
    }

    #[test]
    fn sma_undefined_input_restarts_window() {
        let source = [None, Some(2.0), Some(4.0), Some(6.0)];
        let values = calculate_sma(&source, 2);
        assert_eq!(values[0], None);
        assert_eq!(values[1], None);
        assert_relative_eq!(values[2].unwrap(), 3.0);
        assert_relative_eq!(values[3].unwrap(), 5.0);
    }

    #[test]
    fn sma_period_0() {
        assert_eq!(calculate_sma(&defined(&[1.0]), 0), vec![None]);
    }

    #[test]
    fn sma_empty() {
        assert!(calculate_sma(&[], 3).is_empty());
    }
}
