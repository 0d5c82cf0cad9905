//! Simulated position and closed trade records.

use std::fmt;

use chrono::NaiveDateTime;

use super::ohlcv::PriceBar;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    pub fn sign(&self) -> f64 {
        match self {
            Direction::Long => 1.0,
            Direction::Short => -1.0,
        }
    }

    pub fn opposite(&self) -> Direction {
        match self {
            Direction::Long => Direction::Short,
            Direction::Short => Direction::Long,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Long => f.write_str("long"),
            Direction::Short => f.write_str("short"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum ExitReason {
    StopLoss,
    TakeProfit,
    OpposingSignal,
    EndOfData,
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExitReason::StopLoss => "stop loss",
            ExitReason::TakeProfit => "take profit",
            ExitReason::OpposingSignal => "opposing signal",
            ExitReason::EndOfData => "end of data",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Position {
    pub direction: Direction,
    pub entry_index: usize,
    pub entry_time: NaiveDateTime,
    pub entry_price: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    /// Fraction of equity committed.
    pub size_fraction: f64,
}

impl Position {
    pub fn is_long(&self) -> bool {
        self.direction == Direction::Long
    }

    /// Signed fractional return if closed at `price`.
    pub fn return_at(&self, price: f64) -> f64 {
        if self.entry_price == 0.0 {
            return 0.0;
        }
        self.direction.sign() * (price - self.entry_price) / self.entry_price
    }

    /// The bar's range touched the stop.
    pub fn stop_touched(&self, bar: &PriceBar) -> bool {
        if self.is_long() {
            bar.low <= self.stop_loss
        } else {
            bar.high >= self.stop_loss
        }
    }

    /// The bar's range touched the target.
    pub fn target_touched(&self, bar: &PriceBar) -> bool {
        if self.is_long() {
            bar.high >= self.take_profit
        } else {
            bar.low <= self.take_profit
        }
    }

    pub fn close(
        self,
        exit_index: usize,
        exit_time: NaiveDateTime,
        exit_price: f64,
        reason: ExitReason,
    ) -> Trade {
        let realized_return = self.return_at(exit_price);
        Trade {
            direction: self.direction,
            entry_index: self.entry_index,
            entry_time: self.entry_time,
            entry_price: self.entry_price,
            exit_index,
            exit_time,
            exit_price,
            exit_reason: reason,
            stop_loss: self.stop_loss,
            take_profit: self.take_profit,
            size_fraction: self.size_fraction,
            realized_return,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Trade {
    pub direction: Direction,
    pub entry_index: usize,
    pub entry_time: NaiveDateTime,
    pub entry_price: f64,
    pub exit_index: usize,
    pub exit_time: NaiveDateTime,
    pub exit_price: f64,
    pub exit_reason: ExitReason,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub size_fraction: f64,
    /// Signed fractional price return before sizing.
    pub realized_return: f64,
}

impl Trade {
    pub fn duration_bars(&self) -> usize {
        self.exit_index - self.entry_index
    }

    /// Return on equity: realized return × size fraction.
    pub fn equity_return(&self) -> f64 {
        self.realized_return * self.size_fraction
    }
}
