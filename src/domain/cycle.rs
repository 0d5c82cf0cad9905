//! Cycle detection: spectral and wavelet candidates reconciled into a ranked
//! set of dominant cycle lengths.

use std::f64::consts::PI;
use std::fmt;
use std::str::FromStr;

use super::error::FibCyclesError;
use super::indicator::stddev::population_stddev;
use super::ohlcv::PriceSeries;
use super::spectral::{SpectralBackend, linear_detrend, spectral_peaks};
use super::wavelet::wavelet_peaks;

/// Fibonacci-family reference periods.
pub const REFERENCE_PERIODS: [usize; 7] = [20, 21, 34, 55, 89, 144, 233];

/// Periods substituted, in order, when detection finds too few cycles.
pub const FILL_PERIODS: [usize; 6] = [21, 34, 55, 89, 144, 233];

/// Power given to a substituted period.
pub const FILL_POWER: f64 = 0.5;

/// Periods within this many bars of each other count as cross-method
/// agreement.
const AGREEMENT_TOLERANCE: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DetectionMethod {
    Spectral,
    Wavelet,
    #[default]
    Combined,
}

impl fmt::Display for DetectionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DetectionMethod::Spectral => f.write_str("spectral"),
            DetectionMethod::Wavelet => f.write_str("wavelet"),
            DetectionMethod::Combined => f.write_str("combined"),
        }
    }
}

impl FromStr for DetectionMethod {
    type Err = FibCyclesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "spectral" | "fft" => Ok(DetectionMethod::Spectral),
            "wavelet" | "cwt" => Ok(DetectionMethod::Wavelet),
            "combined" => Ok(DetectionMethod::Combined),
            other => Err(FibCyclesError::invalid_config(
                "cycles.method",
                format!("unknown detection method '{other}'"),
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CycleConfig {
    pub min_period: usize,
    pub max_period: usize,
    pub method: DetectionMethod,
    pub max_candidates: usize,
    pub key_tolerance: usize,
    /// Fewer detected candidates than this are topped up from
    /// `FILL_PERIODS`; 0 disables the top-up.
    pub min_cycles: usize,
    pub backend: SpectralBackend,
}

impl Default for CycleConfig {
    fn default() -> Self {
        CycleConfig {
            min_period: 20,
            max_period: 250,
            method: DetectionMethod::Combined,
            max_candidates: 6,
            key_tolerance: 1,
            min_cycles: 1,
            backend: SpectralBackend::Fft,
        }
    }
}

impl CycleConfig {
    pub fn validate(&self) -> Result<(), FibCyclesError> {
        if self.min_period < 2 {
            return Err(FibCyclesError::invalid_config(
                "cycles.min_period",
                "must be at least 2",
            ));
        }
        if self.min_period >= self.max_period {
            return Err(FibCyclesError::invalid_config(
                "cycles.max_period",
                format!(
                    "must be greater than min_period ({} >= {})",
                    self.min_period, self.max_period
                ),
            ));
        }
        if self.max_candidates == 0 {
            return Err(FibCyclesError::invalid_config(
                "cycles.max_candidates",
                "must be at least 1",
            ));
        }
        if self.min_cycles > self.max_candidates {
            return Err(FibCyclesError::invalid_config(
                "cycles.min_cycles",
                format!(
                    "must not exceed max_candidates ({} > {})",
                    self.min_cycles, self.max_candidates
                ),
            ));
        }
        Ok(())
    }

    /// Bars required before detection runs.
    pub fn min_bars(&self) -> usize {
        2 * self.max_period
    }
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct CycleCandidate {
    pub period: usize,
    /// Normalised so the strongest peak of a method is 1.0.
    pub power: f64,
    /// Cross-method agreement score; `None` for single-method runs.
    pub confidence: Option<f64>,
    /// Substituted from `FILL_PERIODS` rather than detected.
    pub filled: bool,
}

impl CycleCandidate {
    pub fn is_reference(&self, tolerance: usize) -> bool {
        reference_distance(self.period) <= tolerance
    }
}

/// Distance in bars to the nearest reference period.
pub fn reference_distance(period: usize) -> usize {
    REFERENCE_PERIODS
        .iter()
        .map(|r| r.abs_diff(period))
        .min()
        .unwrap_or(usize::MAX)
}

/// Detect dominant cycles on the typical price of `series`.
///
/// Returns `(all_candidates, key_candidates)`. A series shorter than
/// `2 * max_period` yields two empty vectors. Otherwise, when fewer than
/// `min_cycles` candidates are found, in-range `FILL_PERIODS` not already
/// covered are added at `FILL_POWER`.
pub fn detect_cycles(
    series: &PriceSeries,
    config: &CycleConfig,
) -> Result<(Vec<CycleCandidate>, Vec<CycleCandidate>), FibCyclesError> {
    config.validate()?;

    if series.len() < config.min_bars() {
        log::debug!(
            "{} {}: {} bars, cycle detection needs {}",
            series.symbol(),
            series.timeframe(),
            series.len(),
            config.min_bars()
        );
        return Ok((Vec::new(), Vec::new()));
    }

    let prices = series.typical_prices();
    let mut candidates = if is_flat(&prices) {
        log::debug!("{}: series is a straight line, no cycles", series.symbol());
        Vec::new()
    } else {
        detect_with_method(&prices, config)
    };

    rank_candidates(&mut candidates);
    candidates.truncate(config.max_candidates);
    if candidates.len() < config.min_cycles {
        fill_reference_periods(&mut candidates, config);
        rank_candidates(&mut candidates);
    }

    let key: Vec<CycleCandidate> = candidates
        .iter()
        .filter(|c| c.is_reference(config.key_tolerance))
        .cloned()
        .collect();

    Ok((candidates, key))
}

fn detect_with_method(prices: &[f64], config: &CycleConfig) -> Vec<CycleCandidate> {
    let (min, max) = (config.min_period, config.max_period);
    match config.method {
        DetectionMethod::Spectral => {
            let transform = config.backend.transform();
            single_method(normalise(spectral_peaks(prices, min, max, transform.as_ref())))
        }
        DetectionMethod::Wavelet => single_method(normalise(wavelet_peaks(prices, min, max))),
        DetectionMethod::Combined => {
            let transform = config.backend.transform();
            let spectral = normalise(spectral_peaks(prices, min, max, transform.as_ref()));
            let wavelet = normalise(wavelet_peaks(prices, min, max));
            merge_methods(&spectral, &wavelet)
        }
    }
}

/// True when a straight line explains `prices` to rounding error.
fn is_flat(prices: &[f64]) -> bool {
    let residual: f64 = linear_detrend(prices).iter().map(|v| v * v).sum();
    let scale: f64 = prices.iter().map(|v| v * v).sum();
    residual <= 1e-20 * scale
}

/// Power descending; ties go to the period nearer a reference period, then
/// to the shorter period.
pub fn rank_candidates(candidates: &mut [CycleCandidate]) {
    candidates.sort_by(|a, b| {
        b.power
            .total_cmp(&a.power)
            .then_with(|| reference_distance(a.period).cmp(&reference_distance(b.period)))
            .then_with(|| a.period.cmp(&b.period))
    });
}

fn normalise(peaks: Vec<(usize, f64)>) -> Vec<(usize, f64)> {
    let max = peaks.iter().map(|(_, p)| *p).fold(0.0, f64::max);
    if max <= 0.0 || !max.is_finite() {
        return Vec::new();
    }
    peaks.into_iter().map(|(period, p)| (period, p / max)).collect()
}

fn single_method(peaks: Vec<(usize, f64)>) -> Vec<CycleCandidate> {
    peaks
        .into_iter()
        .map(|(period, power)| CycleCandidate {
            period,
            power,
            confidence: None,
            filled: false,
        })
        .collect()
}

fn fill_reference_periods(candidates: &mut Vec<CycleCandidate>, config: &CycleConfig) {
    let missing = config.min_cycles - candidates.len();
    let fills: Vec<usize> = FILL_PERIODS
        .iter()
        .copied()
        .filter(|p| (config.min_period..=config.max_period).contains(p))
        .filter(|p| {
            !candidates
                .iter()
                .any(|c| c.period.abs_diff(*p) <= AGREEMENT_TOLERANCE)
        })
        .take(missing)
        .collect();
    if !fills.is_empty() {
        log::debug!(
            "{} cycle(s) detected, below minimum of {}; adding {:?}",
            candidates.len(),
            config.min_cycles,
            fills
        );
    }
    candidates.extend(fills.into_iter().map(|period| CycleCandidate {
        period,
        power: FILL_POWER,
        confidence: None,
        filled: true,
    }));
}

/// Index of the peak nearest `period` within the agreement tolerance.
fn nearest_within(peaks: &[(usize, f64)], period: usize) -> Option<usize> {
    peaks
        .iter()
        .enumerate()
        .filter(|(_, (p, _))| p.abs_diff(period) <= AGREEMENT_TOLERANCE)
        .min_by_key(|(_, (p, _))| p.abs_diff(period))
        .map(|(i, _)| i)
}

/// One candidate per period bucket. Each spectral peak opens a bucket at
/// its own period; a wavelet peak joins the nearest spectral bucket within
/// two bars or opens its own. Power is the larger of the two methods'
/// powers in the bucket. Confidence is `0.5 + 0.5 * min(powers)` when both
/// methods are present, otherwise `0.5 * power`.
fn merge_methods(spectral: &[(usize, f64)], wavelet: &[(usize, f64)]) -> Vec<CycleCandidate> {
    let mut buckets: Vec<(usize, Option<f64>, Option<f64>)> =
        spectral.iter().map(|&(p, power)| (p, Some(power), None)).collect();

    for &(period, power) in wavelet {
        match nearest_within(spectral, period) {
            Some(i) => {
                let slot = &mut buckets[i].2;
                *slot = Some(slot.map_or(power, |w| w.max(power)));
            }
            None => buckets.push((period, None, Some(power))),
        }
    }

    buckets
        .into_iter()
        .map(|(period, s, w)| {
            let power = s.unwrap_or(0.0).max(w.unwrap_or(0.0));
            let confidence = match (s, w) {
                (Some(s), Some(w)) => 0.5 + 0.5 * s.min(w),
                _ => 0.5 * power,
            };
            CycleCandidate {
                period,
                power,
                confidence: Some(confidence),
                filled: false,
            }
        })
        .collect()
}

/// Turning points of one cycle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CycleExtremes {
    pub peaks: Vec<usize>,
    pub troughs: Vec<usize>,
}

/// Peaks and troughs separated by at least `0.6 * cycle_length` bars and
/// with prominence of at least half the standard deviation of `values`.
pub fn detect_cycle_extremes(values: &[f64], cycle_length: usize) -> CycleExtremes {
    if values.len() < 3 || cycle_length == 0 {
        return CycleExtremes::default();
    }
    let distance = ((0.6 * cycle_length as f64).ceil() as usize).max(1);
    let prominence = 0.5 * population_stddev(values);
    let negated: Vec<f64> = values.iter().map(|v| -v).collect();

    CycleExtremes {
        peaks: find_peaks(values, distance, prominence),
        troughs: find_peaks(&negated, distance, prominence),
    }
}

fn find_peaks(values: &[f64], distance: usize, min_prominence: f64) -> Vec<usize> {
    let n = values.len();
    let local: Vec<usize> = (1..n - 1)
        .filter(|&i| values[i] > values[i - 1] && values[i] >= values[i + 1])
        .collect();

    // Keep the tallest peaks first, dropping neighbours closer than `distance`.
    let mut by_height = local.clone();
    by_height.sort_by(|&a, &b| values[b].total_cmp(&values[a]).then(a.cmp(&b)));
    let mut kept = vec![false; n];
    let mut removed = vec![false; n];
    for &i in &by_height {
        if removed[i] {
            continue;
        }
        kept[i] = true;
        for &j in &local {
            if j != i && j.abs_diff(i) < distance {
                removed[j] = true;
            }
        }
    }

    local
        .into_iter()
        .filter(|&i| kept[i] && prominence(values, i) >= min_prominence)
        .collect()
}

fn prominence(values: &[f64], peak: usize) -> f64 {
    let height = values[peak];
    let mut left_min = height;
    for &v in values[..peak].iter().rev() {
        if v > height {
            break;
        }
        left_min = left_min.min(v);
    }
    let mut right_min = height;
    for &v in &values[peak + 1..] {
        if v > height {
            break;
        }
        right_min = right_min.min(v);
    }
    height - left_min.max(right_min)
}

/// Unit sine wave with the given period.
pub fn generate_cycle_wave(cycle_length: usize, points: usize, phase: f64) -> Vec<f64> {
    if cycle_length == 0 {
        return vec![0.0; points];
    }
    (0..points)
        .map(|i| (2.0 * PI * i as f64 / cycle_length as f64 + phase).sin())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ohlcv::PriceBar;
    use crate::domain::timeframe::Timeframe;
    use chrono::{Duration, NaiveDate};

    fn series_from(closes: &[f64]) -> PriceSeries {
        let start = NaiveDate::from_ymd_opt(2020, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        let bars = closes
            .iter()
            .enumerate()
            .map(|(i, &c)| PriceBar {
                timestamp: start + Duration::days(i as i64),
                open: c,
                high: c,
                low: c,
                close: c,
                volume: 1000.0,
            })
            .collect();
        PriceSeries::new("TEST", Timeframe::Daily, bars).unwrap()
    }

    fn sine_series(period: usize, len: usize) -> PriceSeries {
        let wave = generate_cycle_wave(period, len, 0.0);
        let closes: Vec<f64> = wave.iter().map(|w| 100.0 + 5.0 * w).collect();
        series_from(&closes)
    }

    fn config(min: usize, max: usize, method: DetectionMethod) -> CycleConfig {
        CycleConfig {
            min_period: min,
            max_period: max,
            method,
            ..CycleConfig::default()
        }
    }

    #[test]
    fn rejects_inverted_period_range() {
        let series = sine_series(34, 300);
        let err = detect_cycles(&series, &config(100, 50, DetectionMethod::Spectral)).unwrap_err();
        assert!(matches!(err, FibCyclesError::InvalidConfiguration { .. }));
    }

    #[test]
    fn short_series_yields_empty_sets() {
        let series = sine_series(34, 100);
        let (all, key) = detect_cycles(&series, &CycleConfig::default()).unwrap();
        assert!(all.is_empty());
        assert!(key.is_empty());
    }

    #[test]
    fn spectral_only_has_no_confidence() {
        let series = sine_series(34, 400);
        let (all, _) = detect_cycles(&series, &config(10, 100, DetectionMethod::Spectral)).unwrap();
        assert!(!all.is_empty());
        assert!(all.iter().all(|c| c.confidence.is_none()));
        assert!((all[0].power - 1.0).abs() < 1e-12);
    }

    #[test]
    fn combined_agreement_gives_high_confidence() {
        let series = sine_series(34, 400);
        let (all, key) = detect_cycles(&series, &config(10, 100, DetectionMethod::Combined)).unwrap();
        let top = &all[0];
        assert!(top.period.abs_diff(34) <= 1);
        assert!(top.confidence.unwrap() >= 0.5);
        assert!(key.iter().any(|c| c.period.abs_diff(34) <= 1));
    }

    #[test]
    fn ranking_breaks_ties_by_reference_distance() {
        let mut candidates = vec![
            CycleCandidate {
                period: 40,
                power: 1.0,
                confidence: None,
                filled: false,
            },
            CycleCandidate {
                period: 34,
                power: 1.0,
                confidence: None,
                filled: false,
            },
            CycleCandidate {
                period: 60,
                power: 1.5,
                confidence: None,
                filled: false,
            },
        ];
        rank_candidates(&mut candidates);
        let periods: Vec<usize> = candidates.iter().map(|c| c.period).collect();
        assert_eq!(periods, vec![60, 34, 40]);
    }

    #[test]
    fn merge_groups_agreeing_peaks() {
        let merged = merge_methods(&[(34, 1.0), (80, 0.4)], &[(33, 0.9), (36, 0.95)]);
        let periods: Vec<usize> = merged.iter().map(|c| c.period).collect();
        assert_eq!(periods, vec![34, 80]);
        assert!((merged[0].power - 1.0).abs() < 1e-12);
        assert!((merged[0].confidence.unwrap() - 0.975).abs() < 1e-12);
        assert!((merged[1].confidence.unwrap() - 0.2).abs() < 1e-12);
        assert!((merged[1].power - 0.4).abs() < 1e-12);
    }

    #[test]
    fn merge_keeps_wavelet_only_peak() {
        let merged = merge_methods(&[(34, 1.0)], &[(55, 0.6)]);
        let c55 = merged.iter().find(|c| c.period == 55).unwrap();
        assert!((c55.confidence.unwrap() - 0.3).abs() < 1e-12);
    }

    #[test]
    fn sinusoid_sweep_top_candidate_exact() {
        for method in [DetectionMethod::Spectral, DetectionMethod::Combined] {
            for period in 10..=100 {
                let series = sine_series(period, 200);
                let (all, _) = detect_cycles(&series, &config(10, 100, method)).unwrap();
                assert!(
                    all.first().is_some_and(|c| c.period.abs_diff(period) <= 1),
                    "{method} period {period}: {all:?}"
                );
            }
        }
    }

    #[test]
    fn pure_sine_yields_single_candidate() {
        let series = sine_series(34, 400);
        let (all, key) = detect_cycles(&series, &config(10, 100, DetectionMethod::Combined)).unwrap();
        assert_eq!(all.len(), 1, "{all:?}");
        assert_eq!(key.len(), 1);
        assert_eq!(key[0].period, 34);
        assert!(!key[0].filled);
    }

    #[test]
    fn straight_line_gets_reference_fill() {
        let closes: Vec<f64> = (0..200).map(|i| 50.0 + i as f64).collect();
        let mut cfg = config(15, 100, DetectionMethod::Combined);
        cfg.min_cycles = 2;
        let (all, key) = detect_cycles(&series_from(&closes), &cfg).unwrap();
        let periods: Vec<usize> = all.iter().map(|c| c.period).collect();
        assert_eq!(periods, vec![21, 34]);
        assert!(all.iter().all(|c| c.filled && c.power == FILL_POWER));
        assert_eq!(key.len(), 2);
    }

    #[test]
    fn reference_fill_disabled() {
        let closes: Vec<f64> = (0..200).map(|i| 50.0 + i as f64).collect();
        let mut cfg = config(15, 100, DetectionMethod::Spectral);
        cfg.min_cycles = 0;
        let (all, key) = detect_cycles(&series_from(&closes), &cfg).unwrap();
        assert!(all.is_empty());
        assert!(key.is_empty());
    }

    #[test]
    fn reference_fill_skips_detected_period() {
        let series = sine_series(34, 400);
        let mut cfg = config(10, 100, DetectionMethod::Spectral);
        cfg.min_cycles = 3;
        let (all, _) = detect_cycles(&series, &cfg).unwrap();
        let periods: Vec<usize> = all.iter().map(|c| c.period).collect();
        assert_eq!(periods, vec![34, 21, 55]);
        assert!(!all[0].filled);
        assert!(all[1].filled && all[2].filled);
    }

    #[test]
    fn min_cycles_above_max_candidates_rejected() {
        let mut cfg = config(10, 100, DetectionMethod::Spectral);
        cfg.min_cycles = 7;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn reference_distance_values() {
        assert_eq!(reference_distance(34), 0);
        assert_eq!(reference_distance(36), 2);
        assert_eq!(reference_distance(1), 19);
    }

    #[test]
    fn extremes_of_sine_wave() {
        let wave = generate_cycle_wave(20, 100, 0.0);
        let extremes = detect_cycle_extremes(&wave, 20);
        assert_eq!(extremes.peaks.len(), 5);
        assert_eq!(extremes.troughs.len(), 5);
        for pair in extremes.peaks.windows(2) {
            assert!(pair[1] - pair[0] >= 12);
        }
        assert!(extremes.peaks[0].abs_diff(5) <= 1);
    }

    #[test]
    fn extremes_ignore_small_wiggles() {
        let mut wave = generate_cycle_wave(40, 160, 0.0);
        for (i, v) in wave.iter_mut().enumerate() {
            *v += 0.01 * (i as f64 * 2.7).sin();
        }
        let extremes = detect_cycle_extremes(&wave, 40);
        assert_eq!(extremes.peaks.len(), 4);
    }

    #[test]
    fn cycle_wave_shape() {
        let wave = generate_cycle_wave(4, 5, 0.0);
        assert!(wave[0].abs() < 1e-12);
        assert!((wave[1] - 1.0).abs() < 1e-12);
        assert!((wave[3] + 1.0).abs() < 1e-12);
        assert_eq!(generate_cycle_wave(0, 3, 0.0), vec![0.0; 3]);
    }
}
