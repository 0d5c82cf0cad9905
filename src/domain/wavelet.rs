//! Morlet continuous wavelet transform over integer periods.
//!
//! The CWT is evaluated in the frequency domain: one forward FFT of the
//! detrended signal, then per scale a multiply by the Morlet's Fourier
//! transform and an inverse FFT. Power is bias-corrected by dividing by the
//! scale and averaged over the bars outside the cone of influence. Periods
//! whose cone leaves less than one full period of interior are not scored.

use std::f64::consts::PI;

use rustfft::{FftPlanner, num_complex::Complex};

use super::spectral::{drop_weak_peaks, linear_detrend};

/// Morlet centre frequency.
const OMEGA0: f64 = 6.0;

/// Cone of influence half-width, in scales.
const CONE_SCALES: f64 = 2.0;

/// Scale whose bias-corrected response peaks at `period` bars.
fn scale_for_period(period: f64) -> f64 {
    period * OMEGA0 / (2.0 * PI)
}

/// Bars at each end of the series affected by edge effects at `scale`.
fn cone_of_influence(scale: f64) -> usize {
    (CONE_SCALES * scale).ceil() as usize
}

/// Mean scale-normalised wavelet power for each integer period in
/// `[min_period, max_period]`, returned as `(period, power)` pairs. Stops at
/// the first period whose cone of influence covers too much of the series.
pub fn wavelet_power(values: &[f64], min_period: usize, max_period: usize) -> Vec<(usize, f64)> {
    let n = values.len();
    if n < 4 || min_period < 2 || min_period > max_period {
        return Vec::new();
    }

    let detrended = linear_detrend(values);
    let padded_len = (2 * n).next_power_of_two();
    let mut spectrum: Vec<Complex<f64>> = detrended
        .iter()
        .map(|&x| Complex::new(x, 0.0))
        .chain(std::iter::repeat(Complex::new(0.0, 0.0)))
        .take(padded_len)
        .collect();

    let mut planner = FftPlanner::new();
    planner.plan_fft_forward(padded_len).process(&mut spectrum);
    let inverse = planner.plan_fft_inverse(padded_len);

    let norm = PI.powf(-0.25);
    let mut out = Vec::with_capacity(max_period - min_period + 1);
    let mut buffer = vec![Complex::new(0.0, 0.0); padded_len];

    for period in min_period..=max_period {
        let scale = scale_for_period(period as f64);
        let edge = cone_of_influence(scale);
        if n < 2 * edge + period {
            break;
        }
        let amplitude = (2.0 * PI * scale).sqrt() * norm;
        for (k, slot) in buffer.iter_mut().enumerate() {
            // Analytic Morlet: zero at non-positive frequencies.
            *slot = if k > 0 && k <= padded_len / 2 {
                let omega = 2.0 * PI * k as f64 / padded_len as f64;
                let psi_hat = amplitude * (-0.5 * (scale * omega - OMEGA0).powi(2)).exp();
                spectrum[k] * psi_hat
            } else {
                Complex::new(0.0, 0.0)
            };
        }
        inverse.process(&mut buffer);

        let inv_n2 = (1.0 / padded_len as f64).powi(2);
        let interior = &buffer[edge..n - edge];
        let mean_power =
            interior.iter().map(|c| c.norm_sqr() * inv_n2).sum::<f64>() / interior.len() as f64;
        out.push((period, mean_power / scale));
    }
    out
}

/// Local maxima of the wavelet power curve within `[min_period, max_period]`,
/// without the weak ones.
pub fn wavelet_peaks(values: &[f64], min_period: usize, max_period: usize) -> Vec<(usize, f64)> {
    let lo = min_period.saturating_sub(1).max(2);
    let hi = max_period + 1;
    let curve = wavelet_power(values, lo, hi);
    if curve.len() < 3 {
        return Vec::new();
    }
    let peaks = curve
        .windows(3)
        .filter(|w| w[1].1 > w[0].1 && w[1].1 >= w[2].1)
        .map(|w| w[1])
        .filter(|(p, _)| (min_period..=max_period).contains(p))
        .collect();
    drop_weak_peaks(peaks)
}
