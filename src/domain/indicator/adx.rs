//! Average Directional Index (Wilder).
//!
//! 1. +DM / -DM and true range from consecutive bars
//! 2. Wilder-smooth +DM, -DM and TR over n bars (seed = sum of first n)
//! 3. +DI = 100 * +DM_s / TR_s, -DI = 100 * -DM_s / TR_s
//! 4. DX = 100 * |+DI - -DI| / (+DI + -DI)
//! 5. ADX = mean of first n DX, then Wilder-smoothed
//!
//! Warmup: the first 2n - 1 bars are invalid.

use crate::domain::indicator::{IndicatorPoint, IndicatorSeries, IndicatorType, IndicatorValue};
use crate::domain::ohlcv::PriceBar;

pub fn calculate_adx(bars: &[PriceBar], period: usize) -> IndicatorSeries {
    let mut values = Vec::with_capacity(bars.len());
    if period == 0 || bars.is_empty() {
        return IndicatorSeries {
            indicator_type: IndicatorType::Adx(period),
            values,
        };
    }

    let n = period as f64;
    let mut s_plus = 0.0;
    let mut s_minus = 0.0;
    let mut s_tr = 0.0;
    let mut dx_sum = 0.0;
    let mut adx = 0.0;

    values.push(invalid_point(&bars[0]));

    for i in 1..bars.len() {
        let bar = &bars[i];
        let prev = &bars[i - 1];
        let up = bar.high - prev.high;
        let down = prev.low - bar.low;
        let plus_dm = if up > down && up > 0.0 { up } else { 0.0 };
        let minus_dm = if down > up && down > 0.0 { down } else { 0.0 };
        let tr = bar.true_range(prev.close);

        if i <= period {
            s_plus += plus_dm;
            s_minus += minus_dm;
            s_tr += tr;
        } else {
            s_plus = s_plus - s_plus / n + plus_dm;
            s_minus = s_minus - s_minus / n + minus_dm;
            s_tr = s_tr - s_tr / n + tr;
        }

        if i < period {
            values.push(invalid_point(bar));
            continue;
        }

        let (plus_di, minus_di) = if s_tr > 0.0 {
            (100.0 * s_plus / s_tr, 100.0 * s_minus / s_tr)
        } else {
            (0.0, 0.0)
        };
        let di_sum = plus_di + minus_di;
        let dx = if di_sum > 0.0 {
            100.0 * (plus_di - minus_di).abs() / di_sum
        } else {
            0.0
        };

        // DX values are available from bar `period`; ADX seeds after n of them.
        let dx_index = i - period + 1;
        let valid = if dx_index < period {
            dx_sum += dx;
            false
        } else if dx_index == period {
            dx_sum += dx;
            adx = dx_sum / n;
            true
        } else {
            adx = (adx * (n - 1.0) + dx) / n;
            true
        };

        values.push(IndicatorPoint {
            timestamp: bar.timestamp,
            valid,
            value: IndicatorValue::Directional {
                adx: if valid { adx } else { 0.0 },
                plus_di,
                minus_di,
            },
        });
    }

    IndicatorSeries {
        indicator_type: IndicatorType::Adx(period),
        values,
    }
}

/// ADX at the last valid bar.
pub fn last_adx(series: &IndicatorSeries) -> Option<f64> {
    match series.last_valid()?.value {
        IndicatorValue::Directional { adx, .. } => Some(adx),
        _ => None,
    }
}

fn invalid_point(bar: &PriceBar) -> IndicatorPoint {
    IndicatorPoint {
        timestamp: bar.timestamp,
        valid: false,
        value: IndicatorValue::Directional {
            adx: 0.0,
            plus_di: 0.0,
            minus_di: 0.0,
        },
    }
}
