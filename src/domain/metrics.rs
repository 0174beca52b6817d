//! Performance metrics over a trade ledger.
//!
//! Sentinels for zero denominators:
//! - win_rate = 0 with no trades
//! - profit_factor = +inf with wins and no losses, 0 with neither
//! - sharpe_ratio = 0 with fewer than two returns or zero deviation
//! - net_profit_percent = 0 when initial capital is not positive

use std::collections::BTreeMap;

use serde::Serialize;

use super::position::Trade;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Metrics {
    pub total_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    pub win_rate: f64,
    /// Serialized as `null` when infinite.
    pub profit_factor: f64,
    pub net_profit_percent: f64,
    pub max_drawdown_percent: f64,
    pub sharpe_ratio: f64,
    pub net_profit: f64,
    pub gross_profit: f64,
    pub gross_loss: f64,
    pub avg_win: f64,
    pub avg_loss: f64,
    pub largest_win: f64,
    pub largest_loss: f64,
    pub avg_trade_duration_days: f64,
}

impl Metrics {
    /// `capital_curve` is the initial capital followed by the capital after
    /// each closed trade.
    pub fn compute(
        trades: &[Trade],
        initial_capital: f64,
        ending_capital: f64,
        capital_curve: &[f64],
    ) -> Self {
        let mut winning_trades = 0usize;
        let mut losing_trades = 0usize;
        let mut gross_profit = 0.0_f64;
        let mut gross_loss = 0.0_f64;
        let mut largest_win = 0.0_f64;
        let mut largest_loss = 0.0_f64;
        let mut total_duration_days = 0.0_f64;

        for trade in trades {
            let pnl = trade.profit_amount;
            if trade.is_win() {
                winning_trades += 1;
                gross_profit += pnl;
                largest_win = largest_win.max(pnl);
            } else {
                losing_trades += 1;
                gross_loss += pnl.abs();
                largest_loss = largest_loss.max(pnl.abs());
            }
            total_duration_days += trade.duration_days();
        }

        let total_trades = trades.len();
        let win_rate = if total_trades > 0 {
            winning_trades as f64 / total_trades as f64 * 100.0
        } else {
            0.0
        };

        let profit_factor = if gross_loss > 0.0 {
            gross_profit / gross_loss
        } else if gross_profit > 0.0 {
            f64::INFINITY
        } else {
            0.0
        };

        let net_profit = ending_capital - initial_capital;
        let net_profit_percent = if initial_capital > 0.0 {
            net_profit / initial_capital * 100.0
        } else {
            0.0
        };

        let avg_win = if winning_trades > 0 {
            gross_profit / winning_trades as f64
        } else {
            0.0
        };
        let avg_loss = if losing_trades > 0 {
            gross_loss / losing_trades as f64
        } else {
            0.0
        };
        let avg_trade_duration_days = if total_trades > 0 {
            total_duration_days / total_trades as f64
        } else {
            0.0
        };

        Metrics {
            total_trades,
            winning_trades,
            losing_trades,
            win_rate,
            profit_factor,
            net_profit_percent,
            max_drawdown_percent: compute_drawdown(capital_curve),
            sharpe_ratio: compute_sharpe(capital_curve),
            net_profit,
            gross_profit,
            gross_loss,
            avg_win,
            avg_loss,
            largest_win,
            largest_loss,
            avg_trade_duration_days,
        }
    }
}

/// Percent below the running peak at each point of the capital curve.
pub fn drawdown_curve(capital_curve: &[f64]) -> Vec<f64> {
    let mut peak = f64::NEG_INFINITY;
    capital_curve
        .iter()
        .map(|&capital| {
            peak = peak.max(capital);
            if peak > 0.0 {
                (peak - capital) / peak * 100.0
            } else {
                0.0
            }
        })
        .collect()
}

/// Realized profit per exit month ("YYYY-MM"), as a percent of initial capital.
pub fn monthly_returns(trades: &[Trade], initial_capital: f64) -> BTreeMap<String, f64> {
    let mut months: BTreeMap<String, f64> = BTreeMap::new();
    for trade in trades {
        *months
            .entry(trade.exit_time.format("%Y-%m").to_string())
            .or_default() += trade.profit_amount;
    }
    if initial_capital > 0.0 {
        for profit in months.values_mut() {
            *profit = *profit / initial_capital * 100.0;
        }
    }
    months
}

/// Largest peak-to-trough decline, as a percent of the running peak.
fn compute_drawdown(capital_curve: &[f64]) -> f64 {
    drawdown_curve(capital_curve).into_iter().fold(0.0, f64::max)
}

/// mean / population stddev of per-trade returns, scaled by sqrt(N).
fn compute_sharpe(capital_curve: &[f64]) -> f64 {
    let returns: Vec<f64> = capital_curve
        .windows(2)
        .map(|w| if w[0] > 0.0 { (w[1] - w[0]) / w[0] } else { 0.0 })
        .collect();

    if returns.len() < 2 {
        return 0.0;
    }

    let n = returns.len() as f64;
    let mean = returns.iter().sum::<f64>() / n;
    let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / n;
    let stddev = variance.sqrt();

    if stddev > 0.0 {
        mean / stddev * n.sqrt()
    } else {
        0.0
    }
}
