//! Average True Range with Wilder smoothing.
//!
//! Seed is the SMA of the first n true ranges; afterwards
//! ATR[i] = (ATR[i-1]*(n-1) + TR[i]) / n.

use crate::domain::indicator::{IndicatorPoint, IndicatorSeries, IndicatorType, IndicatorValue};
use crate::domain::ohlcv::PriceBar;

pub fn calculate_atr(bars: &[PriceBar], period: usize) -> IndicatorSeries {
    if bars.len() < period || period == 0 {
        return IndicatorSeries {
            indicator_type: IndicatorType::Atr(period),
            values: vec![],
        };
    }

    let tr_values: Vec<f64> = bars
        .iter()
        .enumerate()
        .map(|(i, bar)| {
            if i == 0 {
                bar.high - bar.low
            } else {
                bar.true_range(bars[i - 1].close)
            }
        })
        .collect();

    let mut results: Vec<IndicatorPoint> = Vec::with_capacity(bars.len());
    let mut atr = 0.0;

    for i in 0..bars.len() {
        let valid = i + 1 >= period;
        if i + 1 == period {
            atr = tr_values[0..=i].iter().sum::<f64>() / period as f64;
        } else if i + 1 > period {
            atr = (atr * (period - 1) as f64 + tr_values[i]) / period as f64;
        }
        results.push(IndicatorPoint {
            timestamp: bars[i].timestamp,
            valid,
            value: IndicatorValue::Simple(if valid { atr } else { 0.0 }),
        });
    }

    IndicatorSeries {
        indicator_type: IndicatorType::Atr(period),
        values: results,
    }
}
