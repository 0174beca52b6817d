//! Exponential Moving Average indicator.
//!
//! k = 2/(n+1), seed with first SMA, then EMA[i] = P[i]*k + EMA[i-1]*(1-k).
//! Warmup: first (n-1) defined values are undefined.

use crate::domain::indicator::over_defined_runs;

pub fn calculate_ema(source: &[Option<f64>], length: usize) -> Vec<Option<f64>> {
    if length == 0 {
        return vec![None; source.len()];
    }
    over_defined_runs(source, |prices| ema_run(prices, length))
}

fn ema_run(prices: &[f64], length: usize) -> Vec<Option<f64>> {
    let mut values = Vec::with_capacity(prices.len());
    let k = 2.0 / (length as f64 + 1.0);
    let mut ema = 0.0;
    let mut sum = 0.0;

    for (i, &price) in prices.iter().enumerate() {
        if i < length - 1 {
            sum += price;
            values.push(None);
        } else if i == length - 1 {
            sum += price;
            ema = sum / length as f64;
            values.push(Some(ema));
        } else {
            ema = price * k + ema * (1.0 - k);
            values.push(Some(ema));
        }
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
    fn ema_warmup() {
        let values = calculate_ema(&defined(&[10.0, 20.0, 30.0, 40.0, 50.0]), 3);
        assert_eq!(values[0], None);
        assert_eq!(values[1], None);
        assert!(values[2..].iter().all(Option::is_some));
    }

    #[test]
    fn ema_seed_is_sma() {
        let values = calculate_ema(&defined(&[10.0, 20.0, 30.0]), 3);
        assert_relative_eq!(values[2].unwrap(), 20.0);
    }

    #[test]
    fn ema_recursive_calculation() {
        let values = calculate_ema(&defined(&[10.0, 20.0, 30.0, 40.0, 50.0]), 3);
        let k = 2.0 / 4.0;
        let ema_3 = 40.0 * k + 20.0 * (1.0 - k);
        let ema_4 = 50.0 * k + ema_3 * (1.0 - k);
        assert_relative_eq!(values[3].unwrap(), ema_3);
        assert_relative_eq!(values[4].unwrap(), ema_4);
    }

    #[test]
    fn ema_period_1() {
        let values = calculate_ema(&defined(&[10.0, 20.0, 30.0]), 1);
        assert_eq!(values, vec![Some(10.0), Some(20.0), Some(30.0)]);
    }

    #[test]
    fn ema_equal_prices() {
        let values = calculate_ema(&defined(&[100.0; 6]), 3);
        for v in &values[2..] {
            assert_relative_eq!(v.unwrap(), 100.0);
        }
    }

    #[test]
    fn ema_is_causal() {
        let base = defined(&[10.0, 11.0, 12.0, 13.0, 14.0]);
        let mut extended = base.clone();
        extended.push(Some(1000.0));
        let short = calculate_ema(&base, 3);
        let long = calculate_ema(&extended, 3);
        assert_eq!(&long[..short.len()], &short[..]);
    }

    #[test]
    fn ema_period_0() {
        assert_eq!(calculate_ema(&defined(&[10.0, 20.0]), 0), vec![None, None]);
    }
}
