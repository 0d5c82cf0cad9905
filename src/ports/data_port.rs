//! Market data access port.

use crate::domain::error::FibCyclesError;
use crate::domain::ohlcv::PriceSeries;
use crate::domain::timeframe::Timeframe;

/// A source of price history. Implementations must be shareable across the
/// scan worker pool.
pub trait DataPort: Sync {
    /// The most recent `max_bars` bars for `symbol` at `timeframe`, oldest
    /// first.
    fn fetch_series(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        max_bars: usize,
    ) -> Result<PriceSeries, FibCyclesError>;

    fn list_symbols(&self) -> Result<Vec<String>, FibCyclesError>;
}
