//! Price bar and price series representation.

use chrono::NaiveDateTime;

use super::error::FibCyclesError;
use super::timeframe::Timeframe;

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct PriceBar {
    pub timestamp: NaiveDateTime,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl PriceBar {
    /// (high + low + close) / 3
    pub fn typical_price(&self) -> f64 {
        (self.high + self.low + self.close) / 3.0
    }

    /// max(high - low, |high - prev_close|, |low - prev_close|)
    pub fn true_range(&self, prev_close: f64) -> f64 {
        let hl = self.high - self.low;
        let hc = (self.high - prev_close).abs();
        let lc = (self.low - prev_close).abs();
        hl.max(hc).max(lc)
    }
}

/// Ordered bars for one instrument on one timeframe. Immutable once built;
/// bar indices are the unit of time everywhere downstream.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceSeries {
    symbol: String,
    timeframe: Timeframe,
    bars: Vec<PriceBar>,
}

impl PriceSeries {
    pub fn new(
        symbol: impl Into<String>,
        timeframe: Timeframe,
        bars: Vec<PriceBar>,
    ) -> Result<Self, FibCyclesError> {
        for (i, bar) in bars.iter().enumerate() {
            let prices = [bar.open, bar.high, bar.low, bar.close];
            if prices.iter().any(|p| !p.is_finite()) {
                return Err(FibCyclesError::InvalidSeries {
                    reason: format!("non-finite price at bar {i}"),
                });
            }
            if !bar.volume.is_finite() || bar.volume < 0.0 {
                return Err(FibCyclesError::InvalidSeries {
                    reason: format!("negative or non-finite volume at bar {i}"),
                });
            }
            if i > 0 && bar.timestamp <= bars[i - 1].timestamp {
                return Err(FibCyclesError::InvalidSeries {
                    reason: format!("timestamps not strictly increasing at bar {i}"),
                });
            }
        }
        Ok(PriceSeries {
            symbol: symbol.into(),
            timeframe,
            bars,
        })
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn timeframe(&self) -> Timeframe {
        self.timeframe
    }

    pub fn bars(&self) -> &[PriceBar] {
        &self.bars
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn last(&self) -> Option<&PriceBar> {
        self.bars.last()
    }

    pub fn closes(&self) -> Vec<f64> {
        self.bars.iter().map(|b| b.close).collect()
    }

    pub fn typical_prices(&self) -> Vec<f64> {
        self.bars.iter().map(PriceBar::typical_price).collect()
    }

    /// The trailing `len` bars as a new series (the whole series if shorter).
    pub fn tail(&self, len: usize) -> PriceSeries {
        let start = self.bars.len().saturating_sub(len);
        self.slice(start, self.bars.len())
    }

    /// Bars `[start, end)` as a new series.
    pub fn slice(&self, start: usize, end: usize) -> PriceSeries {
        let end = end.min(self.bars.len());
        let start = start.min(end);
        PriceSeries {
            symbol: self.symbol.clone(),
            timeframe: self.timeframe,
            bars: self.bars[start..end].to_vec(),
        }
    }

    /// Current volume divided by the mean of the `lookback` bars before it.
    /// Returns 1.0 when there is no usable history.
    pub fn relative_volume(&self, index: usize, lookback: usize) -> f64 {
        if index >= self.bars.len() || index == 0 || lookback == 0 {
            return 1.0;
        }
        let start = index.saturating_sub(lookback);
        let window = &self.bars[start..index];
        let avg = window.iter().map(|b| b.volume).sum::<f64>() / window.len() as f64;
        if avg > 0.0 {
            self.bars[index].volume / avg
        } else {
            1.0
        }
    }
}
