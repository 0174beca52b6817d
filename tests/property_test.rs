//! Property tests over random price paths.

mod common;

use common::*;
use pinetrader::domain::backtest::{CancelToken, run_backtest};
use pinetrader::domain::indicator::compute_indicators;
use pinetrader::domain::script_parser::parse;
use proptest::prelude::*;

const CROSS_2_5: &str = "\
fast = ta.ema(close, 2)
slow = ta.sma(close, 5)
if ta.crossover(fast, slow)
    strategy.entry(\"L\", strategy.long)
if ta.crossunder(fast, slow)
    strategy.close(\"L\")
    strategy.entry(\"S\", strategy.short, qty_percent=50)
if ta.crossover(fast, slow)
    strategy.close(\"S\")
";

fn price_path() -> impl Strategy<Value = Vec<f64>> {
    prop::collection::vec(1.0f64..1_000.0, 10..120)
}

proptest! {
    #[test]
    fn trades_never_overlap(closes in price_path()) {
        let script = parse(CROSS_2_5).unwrap();
        let result = run_backtest(
            &script,
            &make_bars(&closes),
            &sample_config("P"),
            &CancelToken::new(),
        )
        .unwrap();

        for trade in &result.trades {
            prop_assert!(trade.entry_time < trade.exit_time);
        }
        for pair in result.trades.windows(2) {
            prop_assert!(pair[1].entry_time >= pair[0].exit_time);
        }
        if let (Some(pos), Some(last)) = (&result.open_position, result.trades.last()) {
            prop_assert!(pos.entry_time >= last.exit_time);
        }
    }

    #[test]
    fn sma_undefined_before_warmup(closes in price_path(), length in 1usize..10) {
        let script = parse(&format!("avg = ta.sma(close, {})\n", length)).unwrap();
        let table = compute_indicators(&script, &make_bars(&closes));
        let series = table.get("avg").unwrap();

        for i in 0..closes.len() {
            if i + 1 < length {
                prop_assert_eq!(series.numeric_at(i), None);
            } else {
                prop_assert!(series.numeric_at(i).is_some());
            }
        }
    }

    #[test]
    fn rsi_undefined_before_warmup(closes in price_path(), length in 1usize..8) {
        let script = parse(&format!("r = ta.rsi(close, {})\n", length)).unwrap();
        let table = compute_indicators(&script, &make_bars(&closes));
        let series = table.get("r").unwrap();

        for i in 0..length.min(closes.len()) {
            prop_assert_eq!(series.numeric_at(i), None);
        }
        if let Some(v) = series.numeric_at(length) {
            prop_assert!((0.0..=100.0).contains(&v));
        }
    }

    #[test]
    fn win_rate_identity(closes in price_path()) {
        let script = parse(CROSS_2_5).unwrap();
        let result = run_backtest(
            &script,
            &make_bars(&closes),
            &sample_config("P"),
            &CancelToken::new(),
        )
        .unwrap();
        let m = &result.metrics;

        prop_assert_eq!(m.total_trades, result.trades.len());
        prop_assert_eq!(m.winning_trades + m.losing_trades, m.total_trades);
        if m.total_trades == 0 {
            prop_assert_eq!(m.win_rate, 0.0);
        } else {
            let expected = m.winning_trades as f64 / m.total_trades as f64 * 100.0;
            prop_assert!((m.win_rate - expected).abs() < 1e-9);
        }
    }

    #[test]
    fn identical_inputs_identical_output(closes in price_path()) {
        let script = parse(CROSS_2_5).unwrap();
        let bars = make_bars(&closes);
        let config = sample_config("P");

        let a = run_backtest(&script, &bars, &config, &CancelToken::new()).unwrap();
        let b = run_backtest(&script, &bars, &config, &CancelToken::new()).unwrap();

        prop_assert_eq!(
            serde_json::to_string(&a).unwrap(),
            serde_json::to_string(&b).unwrap()
        );
    }

    #[test]
    fn capital_never_negative(closes in price_path()) {
        let script = parse(CROSS_2_5).unwrap();
        let result = run_backtest(
            &script,
            &make_bars(&closes),
            &sample_config("P"),
            &CancelToken::new(),
        )
        .unwrap();
        prop_assert!(result.ending_capital >= 0.0);
    }
}
