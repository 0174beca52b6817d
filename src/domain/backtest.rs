//! Backtest runner.
//!
//! Wires the stages together: parameter validation, date-range bounding,
//! data sufficiency, indicators, signals, simulation and metrics. Independent
//! runs can be executed in parallel with `run_batch`.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use rayon::prelude::*;
use serde::Serialize;
use tracing::info;

use super::error::PinetraderError;
use super::execution::{ExecutionConfig, SkippedSignal, simulate};
use super::indicator::compute_indicators;
use super::metrics::{Metrics, drawdown_curve, monthly_returns};
use super::ohlcv::{Bar, check_ordering};
use super::position::{Position, Trade};
use super::script::Script;
use super::signal::evaluate_signals;

pub use super::execution::CancelToken;

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Every run replays history; live order routing is not supported.
pub const EXECUTION_MODE: &str = "simulation";

#[derive(Debug, Clone, PartialEq)]
pub struct BacktestConfig {
    pub symbol: String,
    pub timeframe: String,
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
    pub initial_capital: f64,
    pub position_size_pct: f64,
    pub commission_pct: f64,
}

impl BacktestConfig {
    /// Reject parameters that make a run meaningless, naming the parameter.
    pub fn validate(&self) -> Result<(), PinetraderError> {
        if !self.initial_capital.is_finite() || self.initial_capital <= 0.0 {
            return Err(PinetraderError::invalid_parameter(
                "initial_capital",
                format!("must be positive, got {}", self.initial_capital),
            ));
        }
        if !(0.0..=100.0).contains(&self.position_size_pct) {
            return Err(PinetraderError::invalid_parameter(
                "position_size_percent",
                format!("must be within [0, 100], got {}", self.position_size_pct),
            ));
        }
        if !self.commission_pct.is_finite() || self.commission_pct < 0.0 {
            return Err(PinetraderError::invalid_parameter(
                "commission_percent",
                format!("must be non-negative, got {}", self.commission_pct),
            ));
        }
        if let Some(end) = self.end_date
            && end < self.start_date
        {
            return Err(PinetraderError::invalid_parameter(
                "end_date",
                format!("{} is before start_date {}", end, self.start_date),
            ));
        }
        Ok(())
    }

    pub fn execution(&self) -> ExecutionConfig {
        ExecutionConfig {
            initial_capital: self.initial_capital,
            position_size_pct: self.position_size_pct,
            commission_pct: self.commission_pct,
        }
    }

    /// Whether a bar falls inside [start_date, end_date].
    pub fn in_range(&self, bar: &Bar) -> bool {
        let date = bar.timestamp.date();
        date >= self.start_date && self.end_date.is_none_or(|end| date <= end)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BacktestResult {
    pub symbol: String,
    pub timeframe: String,
    pub strategy_name: Option<String>,
    pub start_date: String,
    pub end_date: Option<String>,
    pub execution_mode: &'static str,
    pub initial_capital: f64,
    pub position_size_percent: f64,
    pub commission_percent: f64,
    pub ending_capital: f64,
    #[serde(flatten)]
    pub metrics: Metrics,
    pub trades: Vec<Trade>,
    pub open_position: Option<Position>,
    pub skipped_signals: Vec<SkippedSignal>,
    /// Initial capital, then capital after each closed trade.
    pub equity_curve: Vec<f64>,
    /// Percent below the running peak at each point of `equity_curve`.
    pub drawdown_curve: Vec<f64>,
    /// Realized profit per exit month ("YYYY-MM") as a percent of initial capital.
    pub monthly_returns: BTreeMap<String, f64>,
    pub partial: bool,
}

/// Run one backtest of `script` over `bars`.
///
/// Fails before touching any bar when a parameter is invalid, the bars are
/// not strictly increasing, or the requested range holds fewer bars than the
/// largest indicator warm-up window.
pub fn run_backtest(
    script: &Script,
    bars: &[Bar],
    config: &BacktestConfig,
    cancel: &CancelToken,
) -> Result<BacktestResult, PinetraderError> {
    config.validate()?;
    check_ordering(bars)?;

    let bars: Vec<Bar> = bars.iter().filter(|b| config.in_range(b)).cloned().collect();
    let minimum = script.min_bars();
    if bars.len() < minimum {
        return Err(PinetraderError::InsufficientData {
            symbol: config.symbol.clone(),
            bars: bars.len(),
            minimum,
        });
    }

    let table = compute_indicators(script, &bars);
    let signals = evaluate_signals(script, &bars, &table)?;
    let execution = config.execution();
    let outcome = simulate(&bars, &signals, &execution, cancel);
    let metrics = Metrics::compute(
        &outcome.trades,
        config.initial_capital,
        outcome.ending_capital,
        &outcome.capital_curve,
    );

    info!(
        symbol = %config.symbol,
        bars = bars.len(),
        trades = metrics.total_trades,
        net_profit_percent = metrics.net_profit_percent,
        partial = outcome.partial,
        "backtest complete"
    );

    Ok(BacktestResult {
        symbol: config.symbol.clone(),
        timeframe: config.timeframe.clone(),
        strategy_name: script.title.clone(),
        start_date: config.start_date.format(DATE_FORMAT).to_string(),
        end_date: config.end_date.map(|d| d.format(DATE_FORMAT).to_string()),
        execution_mode: EXECUTION_MODE,
        initial_capital: config.initial_capital,
        position_size_percent: config.position_size_pct,
        commission_percent: config.commission_pct,
        ending_capital: outcome.ending_capital,
        metrics,
        monthly_returns: monthly_returns(&outcome.trades, config.initial_capital),
        drawdown_curve: drawdown_curve(&outcome.capital_curve),
        equity_curve: outcome.capital_curve,
        trades: outcome.trades,
        open_position: outcome.open_position,
        skipped_signals: outcome.skipped,
        partial: outcome.partial,
    })
}

/// One independent run of a batch.
#[derive(Debug, Clone)]
pub struct BacktestJob {
    pub config: BacktestConfig,
    pub bars: Vec<Bar>,
}

/// Run independent jobs in parallel; results keep the order of `jobs`.
pub fn run_batch(
    script: &Script,
    jobs: &[BacktestJob],
    cancel: &CancelToken,
) -> Vec<Result<BacktestResult, PinetraderError>> {
    jobs.par_iter()
        .map(|job| run_backtest(script, &job.bars, &job.config, cancel))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::script_parser::parse;
    use chrono::NaiveDateTime;

    const SMA_CROSS: &str = "\
fast = sma(close, 2)
slow = sma(close, 3)
if crossover(fast, slow)
    strategy.entry(\"L\", strategy.long)
if crossunder(fast, slow)
    strategy.close(\"L\")
";

    fn ts(day: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, day)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
    }

    fn make_bars(prices: &[f64]) -> Vec<Bar> {
        prices
            .iter()
            .enumerate()
            .map(|(i, &close)| Bar {
                timestamp: ts(i as u32 + 1),
                open: close,
                high: close,
                low: close,
                close,
                volume: 1000.0,
            })
            .collect()
    }

    fn sample_config() -> BacktestConfig {
        BacktestConfig {
            symbol: "TEST".into(),
            timeframe: "1D".into(),
            start_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            end_date: None,
            initial_capital: 10_000.0,
            position_size_pct: 100.0,
            commission_pct: 0.0,
        }
    }

    #[test]
    fn validate_rejects_zero_capital() {
        let config = BacktestConfig {
            initial_capital: 0.0,
            ..sample_config()
        };
        let err = config.validate().unwrap_err();
        assert!(matches!(
            err,
            PinetraderError::InvalidParameter { ref parameter, .. } if parameter == "initial_capital"
        ));
    }

    #[test]
    fn validate_rejects_position_size_out_of_range() {
        let config = BacktestConfig {
            position_size_pct: 100.5,
            ..sample_config()
        };
        assert!(config.validate().is_err());
        let config = BacktestConfig {
            position_size_pct: 0.0,
            ..sample_config()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validate_rejects_negative_commission() {
        let config = BacktestConfig {
            commission_pct: -0.1,
            ..sample_config()
        };
        assert!(matches!(
            config.validate().unwrap_err(),
            PinetraderError::InvalidParameter { ref parameter, .. } if parameter == "commission_percent"
        ));
    }

    #[test]
    fn validate_rejects_inverted_range() {
        let config = BacktestConfig {
            end_date: Some(NaiveDate::from_ymd_opt(2023, 12, 31).unwrap()),
            ..sample_config()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn date_range_filters_bars() {
        let script = parse(SMA_CROSS).unwrap();
        let config = BacktestConfig {
            start_date: NaiveDate::from_ymd_opt(2024, 1, 3).unwrap(),
            end_date: Some(NaiveDate::from_ymd_opt(2024, 1, 4).unwrap()),
            ..sample_config()
        };
        let err = run_backtest(&script, &make_bars(&[1.0; 10]), &config, &CancelToken::new())
            .unwrap_err();
        assert!(matches!(
            err,
            PinetraderError::InsufficientData {
                bars: 2,
                minimum: 3,
                ..
            }
        ));
    }

    #[test]
    fn empty_range_is_insufficient() {
        let script = parse("strategy.close_all()\n").unwrap();
        let config = BacktestConfig {
            start_date: NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
            ..sample_config()
        };
        let err = run_backtest(&script, &make_bars(&[1.0; 3]), &config, &CancelToken::new())
            .unwrap_err();
        assert!(matches!(err, PinetraderError::InsufficientData { bars: 0, .. }));
    }

    #[test]
    fn unordered_bars_rejected() {
        let script = parse(SMA_CROSS).unwrap();
        let mut bars = make_bars(&[1.0, 2.0, 3.0]);
        bars.swap(0, 2);
        let err = run_backtest(&script, &bars, &sample_config(), &CancelToken::new()).unwrap_err();
        assert!(matches!(err, PinetraderError::UnorderedBars { .. }));
    }

    #[test]
    fn round_trip_trade() {
        let script = parse(SMA_CROSS).unwrap();
        // fast crosses above slow at day 5, back below at day 8
        let bars = make_bars(&[10.0, 9.0, 8.0, 8.0, 12.0, 13.0, 13.0, 6.0, 6.0]);
        let result = run_backtest(&script, &bars, &sample_config(), &CancelToken::new()).unwrap();

        assert_eq!(result.trades.len(), 1);
        let trade = &result.trades[0];
        assert_eq!(trade.entry_time, ts(5));
        assert_eq!(trade.exit_time, ts(8));
        assert!((trade.entry_price - 12.0).abs() < f64::EPSILON);
        assert!((trade.exit_price - 6.0).abs() < f64::EPSILON);
        assert_eq!(result.metrics.losing_trades, 1);
        assert!(result.open_position.is_none());
        assert!(!result.partial);
        assert!((result.ending_capital - 5_000.0).abs() < 1e-9);
    }

    #[test]
    fn result_json_contract() {
        let script = parse(SMA_CROSS).unwrap();
        let bars = make_bars(&[10.0, 9.0, 8.0, 8.0, 12.0, 13.0, 13.0, 6.0, 6.0]);
        let result = run_backtest(&script, &bars, &sample_config(), &CancelToken::new()).unwrap();
        let json = serde_json::to_value(&result).unwrap();

        for key in [
            "symbol",
            "timeframe",
            "total_trades",
            "winning_trades",
            "losing_trades",
            "win_rate",
            "profit_factor",
            "net_profit_percent",
            "max_drawdown_percent",
            "sharpe_ratio",
            "trades",
        ] {
            assert!(json.get(key).is_some(), "missing {}", key);
        }
        assert_eq!(json["symbol"], "TEST");
        assert_eq!(json["start_date"], "2024-01-01");
        assert_eq!(json["trades"][0]["entry_date"], "2024-01-05");
        assert_eq!(json["trades"][0]["side"], "Long");

        assert_eq!(json["execution_mode"], "simulation");
        assert_eq!(json["position_size_percent"], 100.0);
        assert_eq!(json["commission_percent"], 0.0);
        // one losing trade: 12 -> 6 on full capital
        let close_to = |value: &serde_json::Value, expected: f64| {
            (value.as_f64().unwrap() - expected).abs() < 1e-9
        };
        let equity = json["equity_curve"].as_array().unwrap();
        assert_eq!(equity.len(), 2);
        assert!(close_to(&equity[0], 10_000.0));
        assert!(close_to(&equity[1], 5_000.0));
        let drawdown = json["drawdown_curve"].as_array().unwrap();
        assert_eq!(drawdown.len(), 2);
        assert!(close_to(&drawdown[0], 0.0));
        assert!(close_to(&drawdown[1], 50.0));
        let months = json["monthly_returns"].as_object().unwrap();
        assert_eq!(months.len(), 1);
        assert!(close_to(&months["2024-01"], -50.0));
    }

    #[test]
    fn batch_keeps_job_order() {
        let script = parse(SMA_CROSS).unwrap();
        let jobs: Vec<BacktestJob> = ["A", "B", "C"]
            .iter()
            .map(|symbol| BacktestJob {
                config: BacktestConfig {
                    symbol: symbol.to_string(),
                    ..sample_config()
                },
                bars: make_bars(&[10.0, 9.0, 8.0, 8.0, 12.0]),
            })
            .collect();
        let results = run_batch(&script, &jobs, &CancelToken::new());
        let symbols: Vec<_> = results
            .iter()
            .map(|r| r.as_ref().unwrap().symbol.clone())
            .collect();
        assert_eq!(symbols, vec!["A", "B", "C"]);
    }

    #[test]
    fn batch_isolates_failures() {
        let script = parse(SMA_CROSS).unwrap();
        let jobs = vec![
            BacktestJob {
                config: sample_config(),
                bars: make_bars(&[1.0]),
            },
            BacktestJob {
                config: sample_config(),
                bars: make_bars(&[1.0, 2.0, 3.0]),
            },
        ];
        let results = run_batch(&script, &jobs, &CancelToken::new());
        assert!(results[0].is_err());
        assert!(results[1].is_ok());
    }
}
