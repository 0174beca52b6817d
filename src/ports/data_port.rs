//! Bar data access port trait.

use crate::domain::error::PinetraderError;
use crate::domain::ohlcv::Bar;

pub trait DataPort {
    /// Every bar stored for `symbol` at `timeframe`, in source order.
    ///
    /// Date filtering and ordering checks belong to the backtest, so an
    /// out-of-order source surfaces as `UnorderedBars` instead of being
    /// silently repaired here.
    fn fetch_bars(&self, symbol: &str, timeframe: &str) -> Result<Vec<Bar>, PinetraderError>;

    fn list_symbols(&self, timeframe: &str) -> Result<Vec<String>, PinetraderError>;
}
