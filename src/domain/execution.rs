//! Fill simulation: slippage on entry/exit prices and round-trip commission.

use super::position::Direction;

/// Execution frictions for a backtest run.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionConfig {
    pub commission_pct: f64,
    pub slippage_pct: f64,
    pub allow_shorting: bool,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        ExecutionConfig {
            commission_pct: 0.0,
            slippage_pct: 0.0,
            allow_shorting: true,
        }
    }
}

/// Long entry (buy): execution_price = market_price * (1 + slippage_pct / 100)
pub fn apply_slippage_long_entry(market_price: f64, slippage_pct: f64) -> f64 {
    market_price * (1.0 + slippage_pct / 100.0)
}

/// Short entry (sell short): execution_price = market_price * (1 - slippage_pct / 100)
pub fn apply_slippage_short_entry(market_price: f64, slippage_pct: f64) -> f64 {
    market_price * (1.0 - slippage_pct / 100.0)
}

/// Long exit (sell): execution_price = market_price * (1 - slippage_pct / 100)
pub fn apply_slippage_long_exit(market_price: f64, slippage_pct: f64) -> f64 {
    market_price * (1.0 - slippage_pct / 100.0)
}

/// Short exit (buy to cover): execution_price = market_price * (1 + slippage_pct / 100)
pub fn apply_slippage_short_exit(market_price: f64, slippage_pct: f64) -> f64 {
    market_price * (1.0 + slippage_pct / 100.0)
}

pub fn entry_fill(direction: Direction, market_price: f64, config: &ExecutionConfig) -> f64 {
    match direction {
        Direction::Long => apply_slippage_long_entry(market_price, config.slippage_pct),
        Direction::Short => apply_slippage_short_entry(market_price, config.slippage_pct),
    }
}

pub fn exit_fill(direction: Direction, market_price: f64, config: &ExecutionConfig) -> f64 {
    match direction {
        Direction::Long => apply_slippage_long_exit(market_price, config.slippage_pct),
        Direction::Short => apply_slippage_short_exit(market_price, config.slippage_pct),
    }
}

/// Commission for entry plus exit as a fraction of the position.
pub fn round_trip_commission(config: &ExecutionConfig) -> f64 {
    2.0 * config.commission_pct / 100.0
}
