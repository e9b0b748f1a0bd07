//! IIR filter design and zero-phase filtering
//!
//! Butterworth lowpass sections come from `sci_rs`. The phase-normalized
//! Bessel bandpass is built from its analog prototype, moved to the target
//! band and discretized with a pre-warped bilinear transform. Both end up as
//! `sci_rs` second-order sections and run through `sosfiltfilt_dyn`, which
//! filters forward and backward so that the result has no phase distortion.

use crate::error::AnalysisError;
use num_complex::Complex64;
use sci_rs::signal::filter::design::{
    butter_dyn, DigitalFilter, FilterBandType, FilterOutputType, Sos, SosFormatFilter,
};
use sci_rs::signal::filter::sosfiltfilt_dyn;
use std::f64::consts::PI;

/// Sampling rate of the normalized-frequency design domain (Nyquist = 1)
const DESIGN_FS: f64 = 2.0;

/// Imaginary parts below this are treated as real poles
const REAL_POLE_TOL: f64 = 1e-12;

/// Phase-normalized Bessel prototype poles, upper half-plane and real axis only
fn bessel_prototype(order: usize) -> Result<Vec<Complex64>, AnalysisError> {
    let poles = match order {
        1 => vec![Complex64::new(-1.0, 0.0)],
        2 => vec![Complex64::new(-0.866_025_403_784_438_6, 0.5)],
        3 => vec![
            Complex64::new(-0.941_600_026_533_206_7, 0.0),
            Complex64::new(-0.745_640_385_848_076_6, 0.711_366_624_972_835_2),
        ],
        4 => vec![
            Complex64::new(-0.657_211_171_671_882_9, 0.830_161_435_004_873_3),
            Complex64::new(-0.904_758_796_788_244_9, 0.270_918_733_003_874_6),
        ],
        _ => {
            return Err(AnalysisError::InvalidParameter(format!(
                "Bessel filters are supported up to order 4, got {}",
                order
            )))
        }
    };
    let mut all = Vec::with_capacity(poles.len() * 2);
    for p in poles {
        all.push(p);
        if p.im.abs() > REAL_POLE_TOL {
            all.push(p.conj());
        }
    }
    Ok(all)
}

/// Pre-warp a normalized frequency (fraction of Nyquist) for the bilinear transform
fn prewarp(wn: f64) -> f64 {
    2.0 * DESIGN_FS * (PI * wn / DESIGN_FS).tan()
}

fn bilinear(p: Complex64) -> Complex64 {
    let fs2 = Complex64::new(2.0 * DESIGN_FS, 0.0);
    (fs2 + p) / (fs2 - p)
}

fn check_normalized(wn: f64) -> Result<(), AnalysisError> {
    if wn > 0.0 && wn < 1.0 {
        Ok(())
    } else {
        Err(AnalysisError::InvalidParameter(format!(
            "normalized frequency {} must lie strictly between 0 and Nyquist",
            wn
        )))
    }
}

/// Complex response of one section at digital frequency `omega` (radians per sample)
fn section_response(s: &Sos<f64>, omega: f64) -> Complex64 {
    let z1 = Complex64::from_polar(1.0, -omega);
    let z2 = z1 * z1;
    let num = s.b[0] + z1 * s.b[1] + z2 * s.b[2];
    let den = s.a[0] + z1 * s.a[1] + z2 * s.a[2];
    num / den
}

/// Section with denominator from one real pole or a conjugate pair
fn section_from_poles(poles: &[Complex64], b: [f64; 3]) -> Sos<f64> {
    let a = match poles {
        [p] => [1.0, -p.re, 0.0],
        [p, q] => [1.0, -(p + q).re, (p * q).re],
        _ => [1.0, 0.0, 0.0],
    };
    Sos::new(b, a)
}

/// Cascade of second-order sections
#[derive(Debug, Clone)]
pub struct SosCascade {
    sections: Vec<Sos<f64>>,
}

impl SosCascade {
    pub fn new(sections: Vec<Sos<f64>>) -> Self {
        Self { sections }
    }

    pub fn sections(&self) -> &[Sos<f64>] {
        &self.sections
    }

    /// Complex response of the cascade at `omega` (radians per sample)
    pub fn response(&self, omega: f64) -> Complex64 {
        self.sections
            .iter()
            .fold(Complex64::new(1.0, 0.0), |acc, s| acc * section_response(s, omega))
    }

    /// Edge padding used by [`SosCascade::filtfilt`]
    pub fn padlen(&self) -> usize {
        let trailing_b = self.sections.iter().filter(|s| s.b[2] == 0.0).count();
        let trailing_a = self.sections.iter().filter(|s| s.a[2] == 0.0).count();
        3 * (2 * self.sections.len() + 1 - trailing_b.min(trailing_a))
    }

    /// Zero-phase forward-backward filtering with odd-extension edge padding
    pub fn filtfilt(&self, x: &[f64]) -> Result<Vec<f64>, AnalysisError> {
        let edge = self.padlen();
        if x.len() <= edge {
            return Err(AnalysisError::SignalTooShort {
                len: x.len(),
                min: edge,
            });
        }
        Ok(sosfiltfilt_dyn(x.iter(), &self.sections))
    }

    /// Scale each section to unit magnitude at `omega`
    fn normalized_at(self, omega: f64) -> Self {
        let sections = self
            .sections
            .into_iter()
            .map(|s| {
                let mag = section_response(&s, omega).norm();
                if mag > 0.0 {
                    Sos::new([s.b[0] / mag, s.b[1] / mag, s.b[2] / mag], s.a)
                } else {
                    s
                }
            })
            .collect();
        Self { sections }
    }
}

/// Butterworth lowpass with cutoff `cutoff_hz`
pub fn butter_lowpass(order: usize, cutoff_hz: f64, sfreq: f64) -> Result<SosCascade, AnalysisError> {
    if order == 0 {
        return Err(AnalysisError::InvalidParameter("filter order must be positive".to_string()));
    }
    check_normalized(cutoff_hz / (0.5 * sfreq))?;

    match butter_dyn(
        order,
        vec![cutoff_hz],
        Some(FilterBandType::Lowpass),
        Some(false),
        Some(FilterOutputType::Sos),
        Some(sfreq),
    ) {
        DigitalFilter::Sos(SosFormatFilter { sos }) => Ok(SosCascade::new(sos)),
        _ => Err(AnalysisError::InvalidParameter(
            "Butterworth design did not produce second-order sections".to_string(),
        )),
    }
}

/// Phase-normalized Bessel bandpass between `low_hz` and `high_hz`
pub fn bessel_bandpass(order: usize, low_hz: f64, high_hz: f64, sfreq: f64) -> Result<SosCascade, AnalysisError> {
    let nyquist = 0.5 * sfreq;
    let (w_low, w_high) = (low_hz / nyquist, high_hz / nyquist);
    check_normalized(w_low)?;
    check_normalized(w_high)?;
    if w_low >= w_high {
        return Err(AnalysisError::InvalidParameter(format!(
            "band edges {} Hz and {} Hz are inverted",
            low_hz, high_hz
        )));
    }

    let (warped_low, warped_high) = (prewarp(w_low), prewarp(w_high));
    let bw = warped_high - warped_low;
    let wo = (warped_low * warped_high).sqrt();

    let mut poles = Vec::new();
    for p in bessel_prototype(order)? {
        let shifted = p * (bw / 2.0);
        let root = (shifted * shifted - wo * wo).sqrt();
        poles.push(bilinear(shifted + root));
        poles.push(bilinear(shifted - root));
    }

    let mut complex: Vec<Complex64> = poles.iter().copied().filter(|p| p.im > REAL_POLE_TOL).collect();
    let mut real: Vec<Complex64> = poles
        .iter()
        .copied()
        .filter(|p| p.im.abs() <= REAL_POLE_TOL)
        .map(|p| Complex64::new(p.re, 0.0))
        .collect();
    // Poles closest to the unit circle last
    complex.sort_by(|a, b| a.norm().total_cmp(&b.norm()));
    real.sort_by(|a, b| a.re.abs().total_cmp(&b.re.abs()));

    // One zero at z = 1 and one at z = -1 per section
    let zeros = [1.0, 0.0, -1.0];
    let mut sections: Vec<Sos<f64>> = real.chunks(2).map(|pair| section_from_poles(pair, zeros)).collect();
    sections.extend(complex.into_iter().map(|p| section_from_poles(&[p, p.conj()], zeros)));

    let center = 2.0 * (wo / (2.0 * DESIGN_FS)).atan();
    Ok(SosCascade::new(sections).normalized_at(center))
}

/// Zero-phase Butterworth lowpass of a signal
pub fn butter_lowpass_filter(signal: &[f64], cutoff_hz: f64, sfreq: f64, order: usize) -> Result<Vec<f64>, AnalysisError> {
    butter_lowpass(order, cutoff_hz, sfreq)?.filtfilt(signal)
}
