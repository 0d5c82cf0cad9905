//! Per-symbol analysis pipeline: cycles, regime, FLDs, signal and guidance
//! for one series.

use chrono::NaiveDateTime;

use super::cycle::{CycleCandidate, CycleConfig, detect_cycles};
use super::error::FibCyclesError;
use super::fld::{CrossingEvent, FldConfig, FldSeries, compute_fld, cycle_state, detect_crossings};
use super::ohlcv::PriceSeries;
use super::regime::classify_regime_with;
use super::signal::{
    PositionGuidance, SignalConfig, SignalResult, position_guidance, synthesize_signal,
};
use super::timeframe::Timeframe;

#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisParams {
    pub cycles: CycleConfig,
    pub regime_lookback: usize,
    /// Annualisation for regime volatility; `None` uses the timeframe's.
    pub bars_per_year: Option<f64>,
    pub fld: FldConfig,
    pub signal: SignalConfig,
    /// Series shorter than this are refused outright.
    pub min_bars: usize,
}

impl Default for AnalysisParams {
    fn default() -> Self {
        AnalysisParams {
            cycles: CycleConfig::default(),
            regime_lookback: 100,
            bars_per_year: None,
            fld: FldConfig::default(),
            signal: SignalConfig::default(),
            min_bars: 100,
        }
    }
}

/// One traded cycle with its FLD and crossing history.
#[derive(Debug, Clone, PartialEq)]
pub struct CycleAnalysis {
    pub candidate: CycleCandidate,
    pub fld: FldSeries,
    pub crossings: Vec<CrossingEvent>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SymbolAnalysis {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub last_price: f64,
    pub last_timestamp: NaiveDateTime,
    pub candidates: Vec<CycleCandidate>,
    pub key_cycles: Vec<CycleCandidate>,
    /// Cycles that fed the signal: key cycles when any, else all candidates.
    pub cycles: Vec<CycleAnalysis>,
    /// A 20/21-bar cycle and a 34-bar cycle are both present.
    pub has_key_cycles: bool,
    pub signal: SignalResult,
    pub guidance: PositionGuidance,
}

impl SymbolAnalysis {
    pub fn strength(&self) -> f64 {
        self.signal.strength
    }
}

fn near(period: usize, target: usize, tolerance: usize) -> bool {
    period.abs_diff(target) <= tolerance
}

/// Run the full analysis on one series.
///
/// Fails with `InsufficientData` when the series is shorter than
/// `min_bars` or too short for cycle detection.
pub fn analyze_series(series: &PriceSeries, params: &AnalysisParams) -> Result<SymbolAnalysis, FibCyclesError> {
    params.cycles.validate()?;
    let required = params.min_bars.max(params.cycles.min_bars());
    if series.len() < required {
        return Err(FibCyclesError::insufficient(
            format!("{} {}", series.symbol(), series.timeframe()),
            series.len(),
            required,
        ));
    }
    let Some(last) = series.last() else {
        return Err(FibCyclesError::insufficient(series.symbol(), 0, required));
    };

    let (candidates, key_cycles) = detect_cycles(series, &params.cycles)?;
    let bars_per_year = params
        .bars_per_year
        .unwrap_or_else(|| series.timeframe().bars_per_year());
    let regime = classify_regime_with(series, params.regime_lookback, bars_per_year);
    let fld_regime = params.fld.adaptive.then_some(&regime);

    let traded = if key_cycles.is_empty() {
        &candidates
    } else {
        &key_cycles
    };
    let mut cycles = Vec::with_capacity(traded.len());
    let mut states = Vec::with_capacity(traded.len());
    for candidate in traded {
        let fld = compute_fld(series, candidate.period, fld_regime);
        let crossings = detect_crossings(series, &fld);
        if let Some(state) = cycle_state(
            series,
            &fld,
            &crossings,
            params.fld.recent_bars,
            Some(candidate.power),
        ) {
            states.push(state);
        }
        cycles.push(CycleAnalysis {
            candidate: candidate.clone(),
            fld,
            crossings,
        });
    }

    let relative_volume = series.relative_volume(series.len() - 1, params.signal.volume_lookback);
    let signal = synthesize_signal(&states, &regime, relative_volume, &params.signal);
    let guidance = position_guidance(&signal, last.close);

    let tol = params.cycles.key_tolerance;
    let periods: Vec<usize> = candidates
        .iter()
        .filter(|c| !c.filled)
        .map(|c| c.period)
        .collect();
    let has_key_cycles = periods.iter().any(|&p| near(p, 20, tol) || near(p, 21, tol))
        && periods.iter().any(|&p| near(p, 34, tol));

    log::debug!(
        "{} {}: {} cycles, {} ({:.2})",
        series.symbol(),
        series.timeframe(),
        cycles.len(),
        signal.label,
        signal.strength
    );

    Ok(SymbolAnalysis {
        symbol: series.symbol().to_string(),
        timeframe: series.timeframe(),
        last_price: last.close,
        last_timestamp: last.timestamp,
        candidates,
        key_cycles,
        cycles,
        has_key_cycles,
        signal,
        guidance,
    })
}
