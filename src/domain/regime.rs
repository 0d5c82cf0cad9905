//! Market regime classification from trend strength, volatility and range
//! width over a trailing window.

use std::fmt;

use super::indicator::adx::{calculate_adx, last_adx};
use super::indicator::bollinger::{calculate_bollinger, last_band_width};
use super::indicator::stddev::population_stddev;
use super::ohlcv::PriceSeries;

const ADX_PERIOD: usize = 14;
const BOLLINGER_PERIOD: usize = 20;
const BOLLINGER_MULT_X100: u32 = 200;
const MIN_REGIME_BARS: usize = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum Regime {
    Trending,
    Ranging,
    Volatile,
    Mixed,
}

impl fmt::Display for Regime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Regime::Trending => "trending",
            Regime::Ranging => "ranging",
            Regime::Volatile => "volatile",
            Regime::Mixed => "mixed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum Level {
    Low,
    Moderate,
    High,
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct RegimeInfo {
    pub regime: Regime,
    /// ADX, 0..=100.
    pub trend_strength: f64,
    /// Annualised standard deviation of log returns.
    pub volatility: f64,
    /// Bollinger width (upper - lower) / middle.
    pub range_width: f64,
    pub trend_level: Level,
    pub volatility_level: Level,
    pub range_level: Level,
}

impl RegimeInfo {
    /// Classification used when there is too little data to measure.
    pub fn neutral() -> Self {
        RegimeInfo {
            regime: Regime::Mixed,
            trend_strength: 0.0,
            volatility: 0.0,
            range_width: 0.0,
            trend_level: Level::Low,
            volatility_level: Level::Low,
            range_level: Level::Moderate,
        }
    }

    /// Bucket the three metrics and apply the decision table.
    pub fn from_metrics(trend_strength: f64, volatility: f64, range_width: f64) -> Self {
        let trend_level = bucket(trend_strength, 20.0, 30.0);
        let volatility_level = bucket(volatility, 0.15, 0.35);
        let range_level = bucket(range_width, 0.05, 0.15);

        let regime = if volatility_level == Level::High {
            Regime::Volatile
        } else if trend_level == Level::High && range_level != Level::Low {
            Regime::Trending
        } else if trend_level == Level::Low && range_level == Level::Low {
            Regime::Ranging
        } else {
            Regime::Mixed
        };

        RegimeInfo {
            regime,
            trend_strength,
            volatility,
            range_width,
            trend_level,
            volatility_level,
            range_level,
        }
    }
}

fn bucket(value: f64, low: f64, high: f64) -> Level {
    if value < low {
        Level::Low
    } else if value < high {
        Level::Moderate
    } else {
        Level::High
    }
}

/// Classify the trailing `lookback` bars of `series`, annualising
/// volatility with the series' timeframe.
pub fn classify_regime(series: &PriceSeries, lookback: usize) -> RegimeInfo {
    classify_regime_with(series, lookback, series.timeframe().bars_per_year())
}

pub fn classify_regime_with(series: &PriceSeries, lookback: usize, bars_per_year: f64) -> RegimeInfo {
    let window = series.tail(lookback);
    if window.len() < MIN_REGIME_BARS {
        return RegimeInfo::neutral();
    }
    let bars = window.bars();

    let log_returns: Vec<f64> = bars
        .windows(2)
        .filter(|w| w[0].close > 0.0 && w[1].close > 0.0)
        .map(|w| (w[1].close / w[0].close).ln())
        .collect();
    let volatility = population_stddev(&log_returns) * bars_per_year.sqrt();

    let trend_strength = last_adx(&calculate_adx(bars, ADX_PERIOD)).unwrap_or(0.0);
    let range_width =
        last_band_width(&calculate_bollinger(bars, BOLLINGER_PERIOD, BOLLINGER_MULT_X100))
            .unwrap_or(0.0);

    RegimeInfo::from_metrics(trend_strength, volatility, range_width)
}
