//! Future Line of Demarcation per cycle, crossing detection and per-cycle
//! state.

use super::indicator::ema::{ema_over_defined, ema_values};
use super::ohlcv::PriceSeries;
use super::regime::{Regime, RegimeInfo};

/// Extra smoothing pass applied in volatile regimes.
const VOLATILE_SMOOTHING: usize = 3;

#[derive(Debug, Clone, PartialEq)]
pub struct FldConfig {
    /// Crossings within this many trailing bars count as recent.
    pub recent_bars: usize,
    /// Adjust the FLD period by regime.
    pub adaptive: bool,
}

impl Default for FldConfig {
    fn default() -> Self {
        FldConfig {
            recent_bars: 3,
            adaptive: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FldSeries {
    pub cycle_length: usize,
    /// EMA period after regime adjustment.
    pub period: usize,
    /// One entry per bar; `None` until enough history exists.
    pub values: Vec<Option<f64>>,
}

impl FldSeries {
    pub fn value_at(&self, index: usize) -> Option<f64> {
        self.values.get(index).copied().flatten()
    }

    pub fn last(&self) -> Option<f64> {
        self.values.last().copied().flatten()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum CrossingKind {
    /// Price moved from at-or-below to above the FLD.
    Crossover,
    /// Price moved from at-or-above to below the FLD.
    Crossunder,
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct CrossingEvent {
    /// Bar at which price is first on the new side.
    pub index: usize,
    pub kind: CrossingKind,
    pub price: f64,
    pub fld: f64,
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct CycleState {
    pub cycle_length: usize,
    pub bullish: bool,
    pub recent_crossover: bool,
    pub recent_crossunder: bool,
    pub power: f64,
    /// power × period weight.
    pub weight: f64,
    pub fld_value: f64,
}

/// floor(C/2) + 1, lengthened by one in trending regimes and by two in
/// volatile ones.
pub fn fld_period(cycle_length: usize, regime: Option<&RegimeInfo>) -> usize {
    let base = cycle_length / 2 + 1;
    match regime.map(|r| r.regime) {
        Some(Regime::Trending) => base + 1,
        Some(Regime::Volatile) => base + 2,
        _ => base,
    }
}

/// Period weight: longer cycles carry more weight.
pub fn cycle_weight(cycle_length: usize) -> f64 {
    match cycle_length {
        0..34 => 1.0,
        34 => 1.5,
        _ => 2.0,
    }
}

pub fn compute_fld(
    series: &PriceSeries,
    cycle_length: usize,
    regime: Option<&RegimeInfo>,
) -> FldSeries {
    let period = fld_period(cycle_length, regime);
    let mut values = ema_values(&series.closes(), period);
    if matches!(regime.map(|r| r.regime), Some(Regime::Volatile)) {
        values = ema_over_defined(&values, VOLATILE_SMOOTHING);
    }
    FldSeries {
        cycle_length,
        period,
        values,
    }
}

/// Crossings between consecutive bars, evaluated only from index
/// `fld.period` onwards where both FLD values are defined.
pub fn detect_crossings(series: &PriceSeries, fld: &FldSeries) -> Vec<CrossingEvent> {
    let bars = series.bars();
    let mut events = Vec::new();
    for i in fld.period.max(1)..bars.len() {
        let (Some(prev_fld), Some(curr_fld)) = (fld.value_at(i - 1), fld.value_at(i)) else {
            continue;
        };
        let prev_close = bars[i - 1].close;
        let close = bars[i].close;

        let kind = if prev_close <= prev_fld && close > curr_fld {
            CrossingKind::Crossover
        } else if prev_close >= prev_fld && close < curr_fld {
            CrossingKind::Crossunder
        } else {
            continue;
        };
        events.push(CrossingEvent {
            index: i,
            kind,
            price: close,
            fld: curr_fld,
        });
    }
    events
}

/// State of one cycle at the last bar of `series`. `None` while the FLD is
/// still undefined there.
///
/// `detection_power` is the cycle's normalised detection power; without it
/// the distance of price from the FLD is used, capped at 1.
pub fn cycle_state(
    series: &PriceSeries,
    fld: &FldSeries,
    crossings: &[CrossingEvent],
    recent_bars: usize,
    detection_power: Option<f64>,
) -> Option<CycleState> {
    let last_index = series.len().checked_sub(1)?;
    cycle_state_at(series, fld, crossings, last_index, recent_bars, detection_power)
}

/// State of one cycle as of bar `index`, ignoring anything after it.
pub fn cycle_state_at(
    series: &PriceSeries,
    fld: &FldSeries,
    crossings: &[CrossingEvent],
    index: usize,
    recent_bars: usize,
    detection_power: Option<f64>,
) -> Option<CycleState> {
    let close = series.bars().get(index)?.close;
    let fld_value = fld.value_at(index)?;

    let is_recent = |e: &&CrossingEvent| e.index <= index && e.index + recent_bars > index;
    let recent_crossover = crossings
        .iter()
        .filter(is_recent)
        .any(|e| e.kind == CrossingKind::Crossover);
    let recent_crossunder = crossings
        .iter()
        .filter(is_recent)
        .any(|e| e.kind == CrossingKind::Crossunder);

    let power = match detection_power {
        Some(p) => p,
        None if fld_value.abs() > f64::EPSILON => {
            (100.0 * (close - fld_value).abs() / fld_value.abs()).min(1.0)
        }
        None => 0.0,
    };

    Some(CycleState {
        cycle_length: fld.cycle_length,
        bullish: close > fld_value,
        recent_crossover,
        recent_crossunder,
        power,
        weight: power * cycle_weight(fld.cycle_length),
        fld_value,
    })
}
