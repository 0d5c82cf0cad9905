//! Bar timeframes and their alignment weights.

use std::fmt;
use std::str::FromStr;

use super::error::FibCyclesError;

/// Bar granularity. Ordered coarsest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum Timeframe {
    Weekly,
    Daily,
    FourHour,
    OneHour,
    FifteenMinute,
    FiveMinute,
}

impl Timeframe {
    pub const ALL: [Timeframe; 6] = [
        Timeframe::Weekly,
        Timeframe::Daily,
        Timeframe::FourHour,
        Timeframe::OneHour,
        Timeframe::FifteenMinute,
        Timeframe::FiveMinute,
    ];

    /// Identifier used in file names and config keys.
    pub fn as_str(&self) -> &'static str {
        match self {
            Timeframe::Weekly => "weekly",
            Timeframe::Daily => "daily",
            Timeframe::FourHour => "4h",
            Timeframe::OneHour => "1h",
            Timeframe::FifteenMinute => "15m",
            Timeframe::FiveMinute => "5m",
        }
    }

    /// Default alignment weight; coarser timeframes weigh more.
    pub fn default_weight(&self) -> f64 {
        match self {
            Timeframe::Weekly => 3.0,
            Timeframe::Daily => 2.5,
            Timeframe::FourHour => 2.0,
            Timeframe::OneHour => 1.5,
            Timeframe::FifteenMinute => 1.0,
            Timeframe::FiveMinute => 0.5,
        }
    }

    /// Approximate bars per year, used to annualise volatility.
    pub fn bars_per_year(&self) -> f64 {
        match self {
            Timeframe::Weekly => 52.0,
            Timeframe::Daily => 252.0,
            Timeframe::FourHour => 252.0 * 6.0,
            Timeframe::OneHour => 252.0 * 24.0,
            Timeframe::FifteenMinute => 252.0 * 96.0,
            Timeframe::FiveMinute => 252.0 * 288.0,
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Timeframe {
    type Err = FibCyclesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "weekly" | "1w" | "w" => Ok(Timeframe::Weekly),
            "daily" | "1d" | "d" => Ok(Timeframe::Daily),
            "4h" | "4hour" => Ok(Timeframe::FourHour),
            "1h" | "hourly" | "60min" => Ok(Timeframe::OneHour),
            "15m" | "15min" => Ok(Timeframe::FifteenMinute),
            "5m" | "5min" => Ok(Timeframe::FiveMinute),
            other => Err(FibCyclesError::invalid_config(
                "timeframe",
                format!("unknown timeframe '{other}'"),
            )),
        }
    }
}

/// Per-timeframe weights for multi-timeframe alignment.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeframeWeights {
    weights: [f64; 6],
}

impl Default for TimeframeWeights {
    fn default() -> Self {
        let mut weights = [0.0; 6];
        for (slot, tf) in weights.iter_mut().zip(Timeframe::ALL) {
            *slot = tf.default_weight();
        }
        TimeframeWeights { weights }
    }
}

impl TimeframeWeights {
    fn slot(tf: Timeframe) -> usize {
        Timeframe::ALL
            .iter()
            .position(|t| *t == tf)
            .unwrap_or_default()
    }

    pub fn weight(&self, tf: Timeframe) -> f64 {
        self.weights[Self::slot(tf)]
    }

    pub fn set(&mut self, tf: Timeframe, weight: f64) -> Result<(), FibCyclesError> {
        if !weight.is_finite() || weight <= 0.0 {
            return Err(FibCyclesError::invalid_config(
                format!("timeframes.{tf}"),
                "weight must be positive",
            ));
        }
        self.weights[Self::slot(tf)] = weight;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_weights_descend_with_granularity() {
        let weights = TimeframeWeights::default();
        for pair in Timeframe::ALL.windows(2) {
            assert!(weights.weight(pair[0]) > weights.weight(pair[1]));
        }
    }

    #[test]
    fn parse_aliases() {
        assert_eq!("Daily".parse::<Timeframe>().unwrap(), Timeframe::Daily);
        assert_eq!("15min".parse::<Timeframe>().unwrap(), Timeframe::FifteenMinute);
        assert_eq!("4h".parse::<Timeframe>().unwrap(), Timeframe::FourHour);
        assert!("2h".parse::<Timeframe>().is_err());
    }

    #[test]
    fn display_round_trips_through_parse() {
        for tf in Timeframe::ALL {
            assert_eq!(tf.to_string().parse::<Timeframe>().unwrap(), tf);
        }
    }

    #[test]
    fn set_rejects_non_positive_weight() {
        let mut weights = TimeframeWeights::default();
        assert!(weights.set(Timeframe::Daily, 0.0).is_err());
        weights.set(Timeframe::Daily, 4.0).unwrap();
        assert!((weights.weight(Timeframe::Daily) - 4.0).abs() < f64::EPSILON);
    }
}
