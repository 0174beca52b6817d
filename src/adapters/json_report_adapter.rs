//! JSON result report adapter.

use crate::domain::backtest::BacktestResult;
use crate::domain::error::PinetraderError;
use crate::ports::report_port::ReportPort;
use std::fs;

#[derive(Debug, Default)]
pub struct JsonReportAdapter;

impl JsonReportAdapter {
    pub fn new() -> Self {
        Self
    }

    /// Pretty-printed JSON: a bare object for a single result, an array otherwise.
    pub fn render(&self, results: &[BacktestResult]) -> Result<String, PinetraderError> {
        let json = match results {
            [single] => serde_json::to_string_pretty(single)?,
            _ => serde_json::to_string_pretty(results)?,
        };
        Ok(json)
    }
}

impl ReportPort for JsonReportAdapter {
    fn write(&self, results: &[BacktestResult], output_path: &str) -> Result<(), PinetraderError> {
        let json = self.render(results)?;
        fs::write(output_path, json + "\n")?;
        Ok(())
    }
}
