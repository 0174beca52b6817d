//! CSV file bar adapter.
//!
//! Bars live in `<base_path>/<SYMBOL>_<TIMEFRAME>.csv` with a
//! `timestamp,open,high,low,close,volume` header.

use crate::domain::error::PinetraderError;
use crate::domain::ohlcv::Bar;
use crate::ports::data_port::DataPort;
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use std::fs;
use std::path::PathBuf;

const COLUMNS: [&str; 6] = ["timestamp", "open", "high", "low", "close", "volume"];

pub struct CsvAdapter {
    base_path: PathBuf,
}

impl CsvAdapter {
    pub fn new(base_path: PathBuf) -> Self {
        Self { base_path }
    }

    fn csv_path(&self, symbol: &str, timeframe: &str) -> PathBuf {
        self.base_path.join(format!("{}_{}.csv", symbol, timeframe))
    }
}

fn data_error(reason: impl Into<String>) -> PinetraderError {
    PinetraderError::Data {
        reason: reason.into(),
    }
}

/// Accepts `YYYY-MM-DD`, `YYYY-MM-DD HH:MM:SS` or RFC 3339 (normalised to UTC).
pub fn parse_timestamp(value: &str) -> Option<NaiveDateTime> {
    let value = value.trim();
    if let Ok(dt) = NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S") {
        return Some(dt);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.naive_utc());
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

fn parse_field(record: &csv::StringRecord, index: usize, line: u64) -> Result<f64, PinetraderError> {
    let name = COLUMNS[index];
    let raw = record
        .get(index)
        .ok_or_else(|| data_error(format!("line {}: missing {} column", line, name)))?;
    let value: f64 = raw
        .trim()
        .parse()
        .map_err(|e| data_error(format!("line {}: invalid {} value '{}': {}", line, name, raw, e)))?;
    if !value.is_finite() {
        return Err(data_error(format!("line {}: {} is not finite", line, name)));
    }
    Ok(value)
}

impl DataPort for CsvAdapter {
    fn fetch_bars(&self, symbol: &str, timeframe: &str) -> Result<Vec<Bar>, PinetraderError> {
        let path = self.csv_path(symbol, timeframe);
        let content = fs::read_to_string(&path)
            .map_err(|e| data_error(format!("failed to read {}: {}", path.display(), e)))?;

        let mut rdr = csv::Reader::from_reader(content.as_bytes());
        let headers = rdr
            .headers()
            .map_err(|e| data_error(format!("CSV header error: {}", e)))?;
        let found: Vec<String> = headers.iter().map(|h| h.trim().to_lowercase()).collect();
        if found != COLUMNS {
            return Err(data_error(format!(
                "{}: expected header {}, found {}",
                path.display(),
                COLUMNS.join(","),
                found.join(",")
            )));
        }

        let mut bars = Vec::new();
        for result in rdr.records() {
            let record = result.map_err(|e| data_error(format!("CSV parse error: {}", e)))?;
            let line = record.position().map_or(0, |p| p.line());

            let ts_str = record
                .get(0)
                .ok_or_else(|| data_error(format!("line {}: missing timestamp column", line)))?;
            let timestamp = parse_timestamp(ts_str).ok_or_else(|| {
                data_error(format!("line {}: invalid timestamp '{}'", line, ts_str))
            })?;

            bars.push(Bar {
                timestamp,
                open: parse_field(&record, 1, line)?,
                high: parse_field(&record, 2, line)?,
                low: parse_field(&record, 3, line)?,
                close: parse_field(&record, 4, line)?,
                volume: parse_field(&record, 5, line)?,
            });
        }

        Ok(bars)
    }

    fn list_symbols(&self, timeframe: &str) -> Result<Vec<String>, PinetraderError> {
        let entries = fs::read_dir(&self.base_path).map_err(|e| {
            data_error(format!(
                "failed to read directory {}: {}",
                self.base_path.display(),
                e
            ))
        })?;

        let suffix = format!("_{}.csv", timeframe);
        let mut symbols = Vec::new();

        for entry in entries {
            let entry = entry.map_err(|e| data_error(format!("directory entry error: {}", e)))?;

            let name = entry.file_name();
            let name_str = name.to_string_lossy();

            if let Some(symbol) = name_str.strip_suffix(&suffix)
                && !symbol.is_empty()
            {
                symbols.push(symbol.to_string());
            }
        }

        symbols.sort();
        Ok(symbols)
    }
}
