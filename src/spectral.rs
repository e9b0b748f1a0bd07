//! Spectral estimation
//!
//! Welch-averaged periodograms, cross-spectral density, magnitude-squared
//! coherence, band integration and the analytic signal. All transforms run on
//! `rustfft`.

use crate::error::AnalysisError;
use num_complex::Complex64;
use rustfft::FftPlanner;
use std::f64::consts::PI;

/// One-sided spectrum with its frequency axis
#[derive(Debug, Clone, PartialEq)]
pub struct Spectrum {
    pub freqs: Vec<f64>,
    pub values: Vec<f64>,
}

impl Spectrum {
    /// Trapezoidal integral over bins with `low <= f < high`
    pub fn band_power(&self, low: f64, high: f64) -> f64 {
        let (freqs, values): (Vec<f64>, Vec<f64>) = self
            .freqs
            .iter()
            .zip(&self.values)
            .filter(|(f, _)| **f >= low && **f < high)
            .map(|(f, v)| (*f, *v))
            .unzip();
        trapezoid(&values, &freqs)
    }

    /// Mean value over bins with `low <= f < high`, 0 when the band holds no bin
    pub fn band_mean(&self, low: f64, high: f64) -> f64 {
        let selected: Vec<f64> = self
            .freqs
            .iter()
            .zip(&self.values)
            .filter(|(f, _)| **f >= low && **f < high)
            .map(|(_, v)| *v)
            .collect();
        if selected.is_empty() {
            0.0
        } else {
            selected.iter().sum::<f64>() / selected.len() as f64
        }
    }

    /// Trapezoidal integral over the whole axis
    pub fn total_power(&self) -> f64 {
        trapezoid(&self.values, &self.freqs)
    }
}

/// Trapezoidal rule; fewer than two points integrate to zero
pub fn trapezoid(y: &[f64], x: &[f64]) -> f64 {
    y.windows(2)
        .zip(x.windows(2))
        .map(|(yw, xw)| 0.5 * (yw[0] + yw[1]) * (xw[1] - xw[0]))
        .sum()
}

/// Periodic Hann window
fn hann(n: usize) -> Vec<f64> {
    (0..n)
        .map(|k| 0.5 - 0.5 * (2.0 * PI * k as f64 / n as f64).cos())
        .collect()
}

/// Shared segmentation, windowing and scaling of the Welch estimators
struct Welch {
    nperseg: usize,
    step: usize,
    window: Vec<f64>,
    scale: f64,
    fs: f64,
}

impl Welch {
    fn new(len: usize, fs: f64, nperseg: usize) -> Result<Self, AnalysisError> {
        if !(fs > 0.0) {
            return Err(AnalysisError::InvalidParameter(format!(
                "sampling frequency must be positive, got {}",
                fs
            )));
        }
        if len < 2 || nperseg < 2 {
            return Err(AnalysisError::InsufficientData(format!(
                "spectral estimate needs at least 2 samples, got {}",
                len
            )));
        }
        let nperseg = nperseg.min(len);
        let window = hann(nperseg);
        let scale = 1.0 / (fs * window.iter().map(|w| w * w).sum::<f64>());
        Ok(Self {
            nperseg,
            step: nperseg - nperseg / 2,
            window,
            scale,
            fs,
        })
    }

    fn n_bins(&self) -> usize {
        self.nperseg / 2 + 1
    }

    fn freqs(&self) -> Vec<f64> {
        (0..self.n_bins())
            .map(|k| k as f64 * self.fs / self.nperseg as f64)
            .collect()
    }

    /// Windowed, mean-detrended one-sided spectra of every segment
    fn segment_spectra(&self, x: &[f64], planner: &mut FftPlanner<f64>) -> Vec<Vec<Complex64>> {
        let fft = planner.plan_fft_forward(self.nperseg);
        let noverlap = self.nperseg / 2;
        let n_segments = (x.len() - noverlap) / self.step;

        (0..n_segments)
            .map(|i| {
                let segment = &x[i * self.step..i * self.step + self.nperseg];
                let mean = segment.iter().sum::<f64>() / self.nperseg as f64;
                let mut buffer: Vec<Complex64> = segment
                    .iter()
                    .zip(&self.window)
                    .map(|(v, w)| Complex64::new((v - mean) * w, 0.0))
                    .collect();
                fft.process(&mut buffer);
                buffer.truncate(self.n_bins());
                buffer
            })
            .collect()
    }

    /// Averaged, density-scaled one-sided cross spectrum `conj(X) * Y`
    fn average(&self, xs: &[Vec<Complex64>], ys: &[Vec<Complex64>]) -> Vec<Complex64> {
        let n_bins = self.n_bins();
        let mut acc = vec![Complex64::new(0.0, 0.0); n_bins];
        for (x, y) in xs.iter().zip(ys) {
            for k in 0..n_bins {
                acc[k] += x[k].conj() * y[k];
            }
        }
        let n_segments = xs.len().max(1) as f64;
        // DC and (for even lengths) Nyquist are not mirrored
        let last_doubled = if self.nperseg % 2 == 0 { n_bins - 1 } else { n_bins };
        acc.iter()
            .enumerate()
            .map(|(k, v)| {
                let fold = if k > 0 && k < last_doubled { 2.0 } else { 1.0 };
                v * (self.scale * fold / n_segments)
            })
            .collect()
    }
}

/// Welch power spectral density (periodic Hann, 50 % overlap, mean detrend)
///
/// `nperseg` is clamped to the signal length.
pub fn welch(x: &[f64], fs: f64, nperseg: usize) -> Result<Spectrum, AnalysisError> {
    let estimator = Welch::new(x.len(), fs, nperseg)?;
    let mut planner = FftPlanner::new();
    let spectra = estimator.segment_spectra(x, &mut planner);
    let values = estimator
        .average(&spectra, &spectra)
        .into_iter()
        .map(|v| v.re)
        .collect();
    Ok(Spectrum {
        freqs: estimator.freqs(),
        values,
    })
}

/// Welch cross-spectral density of `x` and `y`
pub fn csd(x: &[f64], y: &[f64], fs: f64, nperseg: usize) -> Result<(Vec<f64>, Vec<Complex64>), AnalysisError> {
    if x.len() != y.len() {
        return Err(AnalysisError::InvalidParameter(format!(
            "cross spectrum of signals with lengths {} and {}",
            x.len(),
            y.len()
        )));
    }
    let estimator = Welch::new(x.len(), fs, nperseg)?;
    let mut planner = FftPlanner::new();
    let sx = estimator.segment_spectra(x, &mut planner);
    let sy = estimator.segment_spectra(y, &mut planner);
    Ok((estimator.freqs(), estimator.average(&sx, &sy)))
}

/// Magnitude-squared coherence `|Pxy|^2 / (Pxx * Pyy)`
pub fn coherence(x: &[f64], y: &[f64], fs: f64, nperseg: usize) -> Result<Spectrum, AnalysisError> {
    let (freqs, pxy) = csd(x, y, fs, nperseg)?;
    let pxx = welch(x, fs, nperseg)?;
    let pyy = welch(y, fs, nperseg)?;

    let values = pxy
        .iter()
        .zip(pxx.values.iter().zip(&pyy.values))
        .map(|(cross, (a, b))| {
            let denom = a * b;
            if denom > 0.0 {
                cross.norm_sqr() / denom
            } else {
                0.0
            }
        })
        .collect();

    Ok(Spectrum { freqs, values })
}

/// Analytic signal of a real sequence (FFT-based Hilbert transform)
pub fn analytic_signal(x: &[f64]) -> Vec<Complex64> {
    let n = x.len();
    if n == 0 {
        return Vec::new();
    }
    let mut planner = FftPlanner::new();
    let mut buffer: Vec<Complex64> = x.iter().map(|&v| Complex64::new(v, 0.0)).collect();
    planner.plan_fft_forward(n).process(&mut buffer);

    let half = n / 2;
    for (k, v) in buffer.iter_mut().enumerate() {
        let h = if k == 0 || (n % 2 == 0 && k == half) {
            1.0
        } else if k < (n + 1) / 2 {
            2.0
        } else {
            0.0
        };
        *v *= h;
    }

    planner.plan_fft_inverse(n).process(&mut buffer);
    let norm = 1.0 / n as f64;
    buffer.into_iter().map(|v| v * norm).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn sine(freq: f64, amp: f64, fs: f64, n: usize) -> Vec<f64> {
        (0..n)
            .map(|i| amp * (2.0 * PI * freq * i as f64 / fs).sin())
            .collect()
    }

    #[test]
    fn test_trapezoid() {
        assert_abs_diff_eq!(trapezoid(&[0.0, 1.0, 2.0], &[0.0, 1.0, 2.0]), 2.0);
        assert_eq!(trapezoid(&[5.0], &[1.0]), 0.0);
    }

    #[test]
    fn test_welch_parseval() {
        // Integrated density of a sine equals its variance
        let x = sine(0.1, 2.0, 10.0, 8192);
        let psd = welch(&x, 10.0, 4096).unwrap();
        assert_eq!(psd.freqs.len(), 2049);
        assert_abs_diff_eq!(psd.freqs[1], 10.0 / 4096.0, epsilon = 1e-12);
        assert_abs_diff_eq!(psd.total_power(), 2.0, epsilon = 0.05);
    }

    #[test]
    fn test_welch_peak_location() {
        let x = sine(0.25, 1.0, 10.0, 4096);
        let psd = welch(&x, 10.0, 1024).unwrap();
        let (peak, _) = psd
            .values
            .iter()
            .enumerate()
            .fold((0, f64::MIN), |acc, (i, v)| if *v > acc.1 { (i, *v) } else { acc });
        assert_abs_diff_eq!(psd.freqs[peak], 0.25, epsilon = 10.0 / 1024.0);
    }

    #[test]
    fn test_welch_clamps_segment_length() {
        let x = sine(0.5, 1.0, 10.0, 100);
        let psd = welch(&x, 10.0, 4096).unwrap();
        assert_eq!(psd.freqs.len(), 51);
        assert!(welch(&[1.0], 10.0, 4096).is_err());
    }

    #[test]
    fn test_coherence_of_identical_signals() {
        let x: Vec<f64> = (0..4096)
            .map(|i| ((i * 7919) % 101) as f64 + (i as f64 * 0.3).sin())
            .collect();
        let coh = coherence(&x, &x, 10.0, 256).unwrap();
        for v in coh.values.iter().skip(1) {
            assert_abs_diff_eq!(*v, 1.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_coherence_bounded() {
        let x = sine(0.2, 1.0, 10.0, 4096);
        let y: Vec<f64> = (0..4096).map(|i| ((i * 31) % 17) as f64).collect();
        let coh = coherence(&x, &y, 10.0, 512).unwrap();
        assert!(coh.values.iter().all(|v| (0.0..=1.0 + 1e-9).contains(v)));
    }

    #[test]
    fn test_analytic_signal_envelope_of_sine() {
        // Integer number of periods: the envelope is exactly the amplitude
        let x = sine(0.125, 3.0, 1.0, 256);
        let analytic = analytic_signal(&x);
        for (a, v) in analytic.iter().zip(&x) {
            assert_abs_diff_eq!(a.norm(), 3.0, epsilon = 1e-9);
            assert_abs_diff_eq!(a.re, *v, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_band_helpers() {
        let spectrum = Spectrum {
            freqs: vec![0.0, 0.1, 0.2, 0.3],
            values: vec![1.0, 2.0, 3.0, 4.0],
        };
        assert_abs_diff_eq!(spectrum.band_power(0.1, 0.3), 0.25, epsilon = 1e-12);
        assert_abs_diff_eq!(spectrum.band_mean(0.1, 0.3), 2.5);
        assert_eq!(spectrum.band_mean(0.5, 0.6), 0.0);
    }
}
