//! Weighted Moving Average indicator.
//!
//! O(n) sliding window: weights 1..n from oldest to newest.
//! WMA(n) = (1*P[i-n+1] + 2*P[i-n+2] + ... + n*P[i]) / (n*(n+1)/2)

use crate::domain::indicator::over_defined_runs;

pub fn calculate_wma(source: &[Option<f64>], length: usize) -> Vec<Option<f64>> {
    if length == 0 {
        return vec![None; source.len()];
    }
    over_defined_runs(source, |prices| wma_run(prices, length))
}

fn wma_run(prices: &[f64], length: usize) -> Vec<Option<f64>> {
    let mut values = Vec::with_capacity(prices.len());
    let divisor = (length * (length + 1)) as f64 / 2.0;
    let mut weighted_sum = 0.0;
    let mut window_sum = 0.0;

    for (i, &price) in prices.iter().enumerate() {
        if i < length {
            weighted_sum += (i + 1) as f64 * price;
            window_sum += price;
        } else {
            weighted_sum += length as f64 * price - window_sum;
            window_sum += price - prices[i - length];
        }
        values.push((i + 1 >= length).then(|| weighted_sum / divisor));
    }

    values
}
