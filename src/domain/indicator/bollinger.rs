//! Bollinger Bands.
//!
//! - Middle: Simple Moving Average (SMA) over n periods
//! - Upper: Middle + (multiplier × StdDev)
//! - Lower: Middle - (multiplier × StdDev)
//!
//! StdDev is population standard deviation (divides by N, not N-1).
//! Warmup: first (period-1) bars are invalid.

use crate::domain::indicator::{IndicatorPoint, IndicatorSeries, IndicatorType, IndicatorValue};
use crate::domain::ohlcv::PriceBar;

pub fn calculate_bollinger(
    bars: &[PriceBar],
    period: usize,
    stddev_mult_x100: u32,
) -> IndicatorSeries {
    let mut values = Vec::with_capacity(bars.len());
    let warmup = period.saturating_sub(1);
    let mult = stddev_mult_x100 as f64 / 100.0;

    for i in 0..bars.len() {
        let valid = period > 0 && i >= warmup;

        let (upper, middle, lower) = if valid {
            let window = &bars[i + 1 - period..=i];
            let middle_val: f64 = window.iter().map(|b| b.close).sum::<f64>() / period as f64;
            let variance: f64 = window
                .iter()
                .map(|b| (b.close - middle_val).powi(2))
                .sum::<f64>()
                / period as f64;
            let stddev = variance.sqrt();
            (middle_val + mult * stddev, middle_val, middle_val - mult * stddev)
        } else {
            (0.0, 0.0, 0.0)
        };

        values.push(IndicatorPoint {
            timestamp: bars[i].timestamp,
            valid,
            value: IndicatorValue::Bollinger {
                upper,
                middle,
                lower,
            },
        });
    }

    IndicatorSeries {
        indicator_type: IndicatorType::Bollinger {
            period,
            stddev_mult_x100,
        },
        values,
    }
}

/// Normalised band width (upper - lower) / middle at the last valid bar.
pub fn last_band_width(series: &IndicatorSeries) -> Option<f64> {
    match series.last_valid()?.value {
        IndicatorValue::Bollinger {
            upper,
            middle,
            lower,
        } if middle.abs() > f64::EPSILON => Some((upper - lower) / middle),
        _ => None,
    }
}
