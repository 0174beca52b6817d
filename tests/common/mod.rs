#![allow(dead_code)]

use chrono::{NaiveDate, NaiveDateTime};
use pinetrader::domain::backtest::BacktestConfig;
use pinetrader::domain::error::PinetraderError;
pub use pinetrader::domain::ohlcv::Bar;
use pinetrader::ports::data_port::DataPort;
use std::collections::HashMap;
use std::process::ExitCode;

pub const SMA_CROSS_10_20: &str = r#"//@version=5
strategy("SMA Cross")
fast = ta.sma(close, 10)
slow = ta.sma(close, 20)
if ta.crossover(fast, slow)
    strategy.entry("Long", strategy.long)
if ta.crossunder(fast, slow)
    strategy.close("Long")
"#;

pub const SMA_CROSS_5_10: &str = r#"strategy("Fast Cross")
fast = ta.sma(close, 5)
slow = ta.sma(close, 10)
if ta.crossover(fast, slow)
    strategy.entry("Long", strategy.long)
if ta.crossunder(fast, slow)
    strategy.close("Long")
"#;

pub struct MockDataPort {
    pub data: HashMap<String, Vec<Bar>>,
    pub errors: HashMap<String, String>,
}

impl MockDataPort {
    pub fn new() -> Self {
        Self {
            data: HashMap::new(),
            errors: HashMap::new(),
        }
    }

    pub fn with_bars(mut self, symbol: &str, bars: Vec<Bar>) -> Self {
        self.data.insert(symbol.to_string(), bars);
        self
    }

    pub fn with_error(mut self, symbol: &str, reason: &str) -> Self {
        self.errors.insert(symbol.to_string(), reason.to_string());
        self
    }
}

impl DataPort for MockDataPort {
    fn fetch_bars(&self, symbol: &str, _timeframe: &str) -> Result<Vec<Bar>, PinetraderError> {
        if let Some(reason) = self.errors.get(symbol) {
            return Err(PinetraderError::Data {
                reason: reason.clone(),
            });
        }
        Ok(self.data.get(symbol).cloned().unwrap_or_default())
    }

    fn list_symbols(&self, _timeframe: &str) -> Result<Vec<String>, PinetraderError> {
        let mut symbols: Vec<String> = self.data.keys().cloned().collect();
        symbols.sort();
        Ok(symbols)
    }
}

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

pub fn day(start: NaiveDate, offset: usize) -> NaiveDateTime {
    (start + chrono::Duration::days(offset as i64))
        .and_hms_opt(0, 0, 0)
        .unwrap()
}

/// Daily bars from 2024-01-01 closing at `closes`, with a one-point range.
pub fn make_bars(closes: &[f64]) -> Vec<Bar> {
    let start = date(2024, 1, 1);
    closes
        .iter()
        .enumerate()
        .map(|(i, &close)| Bar {
            timestamp: day(start, i),
            open: close,
            high: close + 1.0,
            low: close - 1.0,
            close,
            volume: 1000.0,
        })
        .collect()
}

pub fn flat_bars(count: usize, price: f64) -> Vec<Bar> {
    make_bars(&vec![price; count])
}

pub fn sample_config(symbol: &str) -> BacktestConfig {
    BacktestConfig {
        symbol: symbol.to_string(),
        timeframe: "1D".to_string(),
        start_date: date(2024, 1, 1),
        end_date: None,
        initial_capital: 10_000.0,
        position_size_pct: 100.0,
        commission_pct: 0.0,
    }
}

/// Render bars as a CSV bar file body.
pub fn bars_to_csv(bars: &[Bar]) -> String {
    let mut out = String::from("timestamp,open,high,low,close,volume\n");
    for b in bars {
        out.push_str(&format!(
            "{},{},{},{},{},{}\n",
            b.timestamp.format("%Y-%m-%d"),
            b.open,
            b.high,
            b.low,
            b.close,
            b.volume
        ));
    }
    out
}

pub fn is_success(code: ExitCode) -> bool {
    format!("{code:?}") == format!("{:?}", ExitCode::SUCCESS)
}

pub fn same_code(a: ExitCode, b: ExitCode) -> bool {
    format!("{a:?}") == format!("{b:?}")
}
