//! RSI (Relative Strength Index) indicator.
//!
//! Wilder's smoothing for average gain/loss:
//! - First average: simple mean of the first n changes
//! - Subsequent: avg = (prev_avg * (n-1) + current) / n
//!
//! RSI = 100 - (100 / (1 + avg_gain / avg_loss)), and 100 when avg_loss == 0.
//! Warmup: first n defined values are undefined (n changes are needed).

use crate::domain::indicator::over_defined_runs;

pub fn calculate_rsi(source: &[Option<f64>], length: usize) -> Vec<Option<f64>> {
    if length == 0 {
        return vec![None; source.len()];
    }
    over_defined_runs(source, |prices| rsi_run(prices, length))
}

fn rsi_from_averages(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_loss == 0.0 {
        100.0
    } else {
        100.0 - (100.0 / (1.0 + avg_gain / avg_loss))
    }
}

fn rsi_run(prices: &[f64], length: usize) -> Vec<Option<f64>> {
    let mut values = vec![None; prices.len()];
    if prices.len() <= length {
        return values;
    }

    let changes: Vec<f64> = prices.windows(2).map(|w| w[1] - w[0]).collect();
    let gain = |c: f64| c.max(0.0);
    let loss = |c: f64| (-c).max(0.0);

    let mut avg_gain = changes[..length].iter().map(|&c| gain(c)).sum::<f64>() / length as f64;
    let mut avg_loss = changes[..length].iter().map(|&c| loss(c)).sum::<f64>() / length as f64;
    values[length] = Some(rsi_from_averages(avg_gain, avg_loss));

    for (i, &change) in changes.iter().enumerate().skip(length) {
        avg_gain = (avg_gain * (length - 1) as f64 + gain(change)) / length as f64;
        avg_loss = (avg_loss * (length - 1) as f64 + loss(change)) / length as f64;
        values[i + 1] = Some(rsi_from_averages(avg_gain, avg_loss));
    }

    values
}
