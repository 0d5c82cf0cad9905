//! Frequency-domain cycle candidates.
//!
//! The input is linearly detrended, Hann-windowed and zero-padded to four
//! times the next power of two before transforming. Two interchangeable
//! transforms produce the power spectrum: `FftTransform` (reference) and
//! `ParallelDftTransform` (direct DFT split across a rayon pool). Any error
//! from a non-reference transform falls back to the FFT.

use std::f64::consts::PI;
use std::fmt;
use std::str::FromStr;

use rayon::prelude::*;
use rustfft::{FftPlanner, num_complex::Complex};

use super::error::FibCyclesError;

const PAD_FACTOR: usize = 4;

/// Relative power below which a peak is discarded.
pub const PEAK_FLOOR: f64 = 0.1;

/// Width of the period bracket searched when pinning a located peak.
const PIN_RATIO: f64 = 1.5;

#[derive(Debug, thiserror::Error)]
pub enum TransformError {
    #[error("empty input signal")]
    EmptyInput,

    #[error("thread pool unavailable: {0}")]
    Pool(String),

    #[error("non-finite power in spectrum")]
    NonFinite,
}

/// Power spectrum contract shared by all backends.
pub trait SpectrumTransform: Send + Sync {
    fn name(&self) -> &'static str;

    /// |X_k|^2 for bins `0..=max_bin` of the DFT of `signal`.
    fn power_spectrum(&self, signal: &[f64], max_bin: usize) -> Result<Vec<f64>, TransformError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FftTransform;

impl SpectrumTransform for FftTransform {
    fn name(&self) -> &'static str {
        "fft"
    }

    fn power_spectrum(&self, signal: &[f64], max_bin: usize) -> Result<Vec<f64>, TransformError> {
        if signal.is_empty() {
            return Err(TransformError::EmptyInput);
        }
        let mut buffer: Vec<Complex<f64>> = signal.iter().map(|&x| Complex::new(x, 0.0)).collect();
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(buffer.len());
        fft.process(&mut buffer);

        let last = max_bin.min(buffer.len() / 2);
        Ok(buffer[..=last].iter().map(|c| c.norm_sqr()).collect())
    }
}

/// Direct DFT over the requested bins, one bin per rayon task.
#[derive(Debug, Clone, Copy, Default)]
pub struct ParallelDftTransform {
    threads: usize,
}

impl ParallelDftTransform {
    /// `threads == 0` lets rayon pick.
    pub fn new(threads: usize) -> Self {
        ParallelDftTransform { threads }
    }
}

impl SpectrumTransform for ParallelDftTransform {
    fn name(&self) -> &'static str {
        "parallel-dft"
    }

    fn power_spectrum(&self, signal: &[f64], max_bin: usize) -> Result<Vec<f64>, TransformError> {
        if signal.is_empty() {
            return Err(TransformError::EmptyInput);
        }
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.threads)
            .build()
            .map_err(|e| TransformError::Pool(e.to_string()))?;

        let n = signal.len();
        let (cos_table, sin_table): (Vec<f64>, Vec<f64>) = (0..n)
            .map(|j| {
                let angle = 2.0 * PI * j as f64 / n as f64;
                (angle.cos(), angle.sin())
            })
            .unzip();
        let last = max_bin.min(n / 2);

        let power: Vec<f64> = pool.install(|| {
            (0..=last)
                .into_par_iter()
                .map(|k| {
                    let (mut re, mut im) = (0.0, 0.0);
                    for (j, &x) in signal.iter().enumerate() {
                        let idx = (k * j) % n;
                        re += x * cos_table[idx];
                        im -= x * sin_table[idx];
                    }
                    re * re + im * im
                })
                .collect()
        });

        if power.iter().any(|p| !p.is_finite()) {
            return Err(TransformError::NonFinite);
        }
        Ok(power)
    }
}

/// Transform backend selected by configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SpectralBackend {
    #[default]
    Fft,
    Parallel {
        threads: usize,
    },
}

impl SpectralBackend {
    pub fn transform(&self) -> Box<dyn SpectrumTransform> {
        match *self {
            SpectralBackend::Fft => Box::new(FftTransform),
            SpectralBackend::Parallel { threads } => Box::new(ParallelDftTransform::new(threads)),
        }
    }
}

impl fmt::Display for SpectralBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpectralBackend::Fft => f.write_str("fft"),
            SpectralBackend::Parallel { .. } => f.write_str("parallel"),
        }
    }
}

impl FromStr for SpectralBackend {
    type Err = FibCyclesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "fft" | "cpu" => Ok(SpectralBackend::Fft),
            "parallel" | "accelerated" => Ok(SpectralBackend::Parallel { threads: 0 }),
            other => Err(FibCyclesError::invalid_config(
                "cycles.backend",
                format!("unknown spectral backend '{other}'"),
            )),
        }
    }
}

/// Run `transform`, substituting the reference FFT if it fails.
pub fn power_with_fallback(
    transform: &dyn SpectrumTransform,
    signal: &[f64],
    max_bin: usize,
) -> Vec<f64> {
    match transform.power_spectrum(signal, max_bin) {
        Ok(power) => power,
        Err(e) => {
            log::warn!(
                "spectral backend '{}' failed ({e}); using reference fft",
                transform.name()
            );
            FftTransform
                .power_spectrum(signal, max_bin)
                .unwrap_or_default()
        }
    }
}

/// Subtract the least-squares line through `values`.
pub fn linear_detrend(values: &[f64]) -> Vec<f64> {
    let n = values.len();
    if n < 2 {
        return vec![0.0; n];
    }
    let nf = n as f64;
    let x_mean = (nf - 1.0) / 2.0;
    let y_mean = values.iter().sum::<f64>() / nf;
    let mut sxy = 0.0;
    let mut sxx = 0.0;
    for (i, &y) in values.iter().enumerate() {
        let dx = i as f64 - x_mean;
        sxy += dx * (y - y_mean);
        sxx += dx * dx;
    }
    let slope = if sxx > 0.0 { sxy / sxx } else { 0.0 };
    values
        .iter()
        .enumerate()
        .map(|(i, &y)| y - (y_mean + slope * (i as f64 - x_mean)))
        .collect()
}

pub fn hann_window(n: usize) -> Vec<f64> {
    if n < 2 {
        return vec![1.0; n];
    }
    (0..n)
        .map(|i| 0.5 - 0.5 * (2.0 * PI * i as f64 / (n - 1) as f64).cos())
        .collect()
}

/// Spectral peaks with periods in `[min_period, max_period]`, one per
/// integer period, sorted by period.
///
/// Peaks of the windowed spectrum are located over twice the period range,
/// since the main lobe of a cycle seen only a few times drifts towards
/// longer periods. Each located peak is then pinned to the integer period
/// in `[period / 1.5, period * 1.5]` whose least-squares sinusoid explains
/// the most variance; pins that are not a local maximum of that fit are
/// leakage and dropped. Powers are explained variance, unnormalised.
pub fn spectral_peaks(
    values: &[f64],
    min_period: usize,
    max_period: usize,
    transform: &dyn SpectrumTransform,
) -> Vec<(usize, f64)> {
    if values.len() < 4 || min_period < 2 || min_period > max_period {
        return Vec::new();
    }

    let detrended = linear_detrend(values);
    let window = hann_window(detrended.len());
    let padded_len = detrended.len().next_power_of_two() * PAD_FACTOR;
    let mut signal = vec![0.0; padded_len];
    for (slot, (x, w)) in signal.iter_mut().zip(detrended.iter().zip(&window)) {
        *slot = x * w;
    }

    let max_bin = padded_len / (min_period / 2).max(2) + 2;
    let power = power_with_fallback(transform, &signal, max_bin);
    if power.len() < 3 {
        return Vec::new();
    }

    let (search_min, search_max) = (min_period as f64 / 2.0, 2.0 * max_period as f64);
    let located: Vec<(f64, f64)> = (1..power.len() - 1)
        .filter(|&k| power[k] > power[k - 1] && power[k] >= power[k + 1])
        .map(|k| (refined_period(&power, k, padded_len), power[k]))
        .filter(|(period, _)| (search_min..=search_max).contains(period))
        .collect();
    let located = drop_weak_peaks(located);

    // Fit powers for min_period - 1 ..= max_period + 1 so every period in
    // range has both neighbours.
    let first = (min_period - 1).max(2);
    let fit: Vec<f64> = (first..=max_period + 1)
        .map(|p| sinusoid_fit_power(&detrended, p as f64))
        .collect();
    let fit_at = |p: usize| p.checked_sub(first).and_then(|i| fit.get(i)).copied();

    let mut buckets: Vec<(usize, f64)> = Vec::new();
    for (period, _) in located {
        let from = ((period / PIN_RATIO).floor() as usize).max(min_period);
        let to = ((period * PIN_RATIO).ceil() as usize).min(max_period);
        let Some(best) = (from..=to).max_by(|&a, &b| {
            fit_at(a)
                .unwrap_or(0.0)
                .total_cmp(&fit_at(b).unwrap_or(0.0))
        }) else {
            continue;
        };
        let Some(value) = fit_at(best) else {
            continue;
        };
        let left = best.checked_sub(1).and_then(fit_at);
        let is_local_max =
            left.is_none_or(|l| value > l) && fit_at(best + 1).is_none_or(|r| value >= r);
        if !is_local_max || value <= 0.0 {
            continue;
        }
        if !buckets.iter().any(|(p, _)| *p == best) {
            buckets.push((best, value));
        }
    }

    let mut peaks = drop_weak_peaks(buckets);
    peaks.sort_by_key(|(p, _)| *p);
    peaks
}

/// Peaks weaker than `PEAK_FLOOR` times the strongest are leakage.
pub fn drop_weak_peaks<P>(peaks: Vec<(P, f64)>) -> Vec<(P, f64)> {
    let strongest = peaks.iter().map(|(_, p)| *p).fold(0.0, f64::max);
    peaks
        .into_iter()
        .filter(|(_, p)| *p > 0.0 && *p >= PEAK_FLOOR * strongest)
        .collect()
}

/// Variance of `detrended` explained by a sinusoid of `period` bars fitted
/// by least squares together with a straight line.
pub fn sinusoid_fit_power(detrended: &[f64], period: f64) -> f64 {
    let n = detrended.len();
    if n < 4 || period <= 0.0 {
        return 0.0;
    }
    let omega = 2.0 * PI / period;
    let cos: Vec<f64> = (0..n).map(|i| (omega * i as f64).cos()).collect();
    let sin: Vec<f64> = (0..n).map(|i| (omega * i as f64).sin()).collect();
    let (cos, sin) = (linear_detrend(&cos), linear_detrend(&sin));

    let dot = |a: &[f64], b: &[f64]| a.iter().zip(b).map(|(x, y)| x * y).sum::<f64>();
    let (cc, ss, cs) = (dot(&cos, &cos), dot(&sin, &sin), dot(&cos, &sin));
    let (yc, ys) = (dot(detrended, &cos), dot(detrended, &sin));

    let det = cc * ss - cs * cs;
    if det <= 1e-12 * cc * ss {
        return 0.0;
    }
    (ss * yc * yc - 2.0 * cs * yc * ys + cc * ys * ys) / det / n as f64
}

/// Period of the peak at bin `k` after parabolic interpolation of the
/// neighbouring bins.
fn refined_period(power: &[f64], k: usize, padded_len: usize) -> f64 {
    let (a, b, c) = (power[k - 1], power[k], power[k + 1]);
    let denom = a - 2.0 * b + c;
    let delta = if denom.abs() > f64::EPSILON {
        (0.5 * (a - c) / denom).clamp(-0.5, 0.5)
    } else {
        0.0
    };
    padded_len as f64 / (k as f64 + delta)
}
