//! Exponential Moving Average.
//!
//! k = 2/(n+1), seed with first SMA, then EMA[i] = C[i]*k + EMA[i-1]*(1-k).
//! Warmup: first (n-1) bars are invalid.

use crate::domain::indicator::{IndicatorPoint, IndicatorSeries, IndicatorType, IndicatorValue};
use crate::domain::ohlcv::PriceBar;

/// EMA over closing prices.
pub fn calculate_ema(bars: &[PriceBar], period: usize) -> IndicatorSeries {
    let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
    let values = ema_values(&closes, period)
        .into_iter()
        .zip(bars)
        .map(|(v, bar)| IndicatorPoint {
            timestamp: bar.timestamp,
            valid: v.is_some(),
            value: IndicatorValue::Simple(v.unwrap_or(0.0)),
        })
        .collect();

    IndicatorSeries {
        indicator_type: IndicatorType::Ema(period),
        values,
    }
}

/// EMA over an arbitrary sequence. `None` entries in the output mark warmup.
pub fn ema_values(input: &[f64], period: usize) -> Vec<Option<f64>> {
    if period == 0 {
        return Vec::new();
    }

    let k = 2.0 / (period as f64 + 1.0);
    let mut out = Vec::with_capacity(input.len());
    let mut ema = 0.0;
    let mut sum = 0.0;

    for (i, &x) in input.iter().enumerate() {
        if i < period - 1 {
            sum += x;
            out.push(None);
        } else if i == period - 1 {
            sum += x;
            ema = sum / period as f64;
            out.push(Some(ema));
        } else {
            ema = x * k + ema * (1.0 - k);
            out.push(Some(ema));
        }
    }
    out
}

/// EMA over a sequence with its own warmup gap. Leading `None`s are carried
/// through and the EMA seeds on the first `period` defined values.
pub fn ema_over_defined(input: &[Option<f64>], period: usize) -> Vec<Option<f64>> {
    let first = match input.iter().position(Option::is_some) {
        Some(i) => i,
        None => return vec![None; input.len()],
    };
    let defined: Vec<f64> = input[first..].iter().map(|v| v.unwrap_or(0.0)).collect();
    let mut out = vec![None; first];
    out.extend(ema_values(&defined, period));
    out.resize(input.len(), None);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn make_bars(prices: &[f64]) -> Vec<PriceBar> {
        prices
            .iter()
            .enumerate()
            .map(|(i, &close)| PriceBar {
                timestamp: NaiveDate::from_ymd_opt(2024, 1, (i + 1) as u32)
                    .unwrap()
                    .and_hms_opt(0, 0, 0)
                    .unwrap(),
                open: close,
                high: close,
                low: close,
                close,
                volume: 1000.0,
            })
            .collect()
    }

    #[test]
    fn ema_warmup() {
        let bars = make_bars(&[10.0, 20.0, 30.0, 40.0, 50.0]);
        let series = calculate_ema(&bars, 3);

        assert!(!series.values[0].valid);
        assert!(!series.values[1].valid);
        assert!(series.values[2].valid);
        assert!(series.values[3].valid);
        assert!(series.values[4].valid);
    }

    #[test]
    fn ema_period_1() {
        let values = ema_values(&[10.0, 20.0, 30.0], 1);
        assert_eq!(values, vec![Some(10.0), Some(20.0), Some(30.0)]);
    }

    #[test]
    fn ema_seed_is_sma() {
        let bars = make_bars(&[10.0, 20.0, 30.0]);
        let series = calculate_ema(&bars, 3);
        let expected_sma = (10.0 + 20.0 + 30.0) / 3.0;
        assert!((series.simple_at(2).unwrap() - expected_sma).abs() < f64::EPSILON);
    }

    #[test]
    fn ema_recursive_calculation() {
        let values = ema_values(&[10.0, 20.0, 30.0, 40.0, 50.0], 3);

        let k = 2.0 / 4.0;
        let sma = 20.0;
        let ema_3 = 40.0 * k + sma * (1.0 - k);
        let ema_4 = 50.0 * k + ema_3 * (1.0 - k);

        assert!((values[2].unwrap() - sma).abs() < f64::EPSILON);
        assert!((values[3].unwrap() - ema_3).abs() < f64::EPSILON);
        assert!((values[4].unwrap() - ema_4).abs() < f64::EPSILON);
    }

    #[test]
    fn ema_equal_prices() {
        let values = ema_values(&[100.0; 5], 3);
        for v in values.iter().skip(2) {
            assert!((v.unwrap() - 100.0).abs() < f64::EPSILON);
        }
    }

    #[test]
    fn ema_empty_and_period_0() {
        assert!(ema_values(&[], 3).is_empty());
        assert!(ema_values(&[10.0, 20.0], 0).is_empty());
        assert!(calculate_ema(&make_bars(&[10.0]), 0).values.is_empty());
    }

    #[test]
    fn ema_over_defined_keeps_leading_gap() {
        let input = [None, None, Some(10.0), Some(20.0), Some(30.0)];
        let out = ema_over_defined(&input, 2);
        assert_eq!(out.len(), 5);
        assert_eq!(out[0], None);
        assert_eq!(out[2], None);
        assert!((out[3].unwrap() - 15.0).abs() < f64::EPSILON);
    }

    #[test]
    fn ema_over_defined_all_none() {
        let out = ema_over_defined(&[None, None], 3);
        assert_eq!(out, vec![None, None]);
    }
}
