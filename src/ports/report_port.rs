//! Result report port trait.

use crate::domain::backtest::BacktestResult;
use crate::domain::error::PinetraderError;

pub trait ReportPort {
    fn write(&self, results: &[BacktestResult], output_path: &str) -> Result<(), PinetraderError>;
}
