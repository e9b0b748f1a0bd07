//! Heart-rate variability
//!
//! Corrects and aligns inter-beat intervals (IBIs) with the respiration
//! recording, then derives spectral band powers, respiration coherence and a
//! time-domain local power proxy from the dense IBI series.

use crate::artifacts::PeakCorrector;
use crate::config::IbiConfig;
use crate::error::AnalysisError;
use crate::events::{event_samples, sync_fit, IBI_EVENT};
use crate::filters::butter_lowpass_filter;
use crate::interpolate::{interp_flat, interp_samples};
use crate::spectral::{coherence, welch};
use crate::stats::{mean, median};
use crate::types::EventLog;
use serde::{Deserialize, Serialize};

/// Very-low-frequency band (Hz), lower edge inclusive
pub const VLF_BAND: (f64, f64) = (0.003, 0.04);
/// Low-frequency band (Hz)
pub const LF_BAND: (f64, f64) = (0.04, 0.15);
/// High-frequency band (Hz)
pub const HF_BAND: (f64, f64) = (0.15, 0.40);

fn cumsum(x: &[f64]) -> Vec<f64> {
    x.iter()
        .scan(0.0, |acc, v| {
            *acc += v;
            Some(*acc)
        })
        .collect()
}

/// Repair artifacts in a sequence of IBIs.
///
/// # Arguments
/// * `ibis` - Intervals in milliseconds, at least two
/// * `corrector` - Peak repair strategy applied to the cumulative beat times
///
/// # Returns
/// Intervals between the corrected beats. The first has no predecessor peak
/// and takes the value of the second.
pub fn correct_ibis(ibis: &[f64], corrector: &dyn PeakCorrector) -> Result<Vec<f64>, AnalysisError> {
    if ibis.len() < 2 {
        return Err(AnalysisError::InsufficientData(format!(
            "IBI correction needs at least 2 intervals, got {}",
            ibis.len()
        )));
    }

    let peaks = corrector.correct(&cumsum(ibis));
    if peaks.len() < 2 {
        return Err(AnalysisError::InsufficientData(
            "artifact correction left fewer than 2 peaks".to_string(),
        ));
    }

    let mut corrected: Vec<f64> = std::iter::once(0.0)
        .chain(peaks.windows(2).map(|w| w[1] - w[0]))
        .collect();
    corrected[0] = corrected[1];
    Ok(corrected)
}

/// Sample of the heartbeat behind each IBI.
///
/// Beats are rebuilt from the cumulative intervals, mapped through the log's
/// synchronization fit and shifted as a whole so that the first beat lands on
/// the sample of the first recorded IBI notification.
///
/// # Arguments
/// * `ibis` - Corrected intervals in milliseconds
/// * `events` - Sample-mapped event log holding the sync pulses and IBIs
///
/// # Returns
/// One sample index per interval, or `SyncMismatch` if the first beat cannot
/// be placed on the first IBI notification
pub fn ibis_to_rpeaks(ibis: &[f64], events: &EventLog) -> Result<Vec<i64>, AnalysisError> {
    if ibis.is_empty() {
        return Err(AnalysisError::InsufficientData("no IBIs to align".to_string()));
    }
    let fit = sync_fit(events)?;

    let peaks_ms = cumsum(ibis);
    let first_ms = peaks_ms[0];
    let mut peaks: Vec<i64> = peaks_ms
        .iter()
        .map(|ms| fit.to_sample((ms - first_ms) / 1000.0))
        .collect();

    let anchor = *event_samples(events, IBI_EVENT)?
        .first()
        .ok_or_else(|| AnalysisError::MissingEvent(IBI_EVENT.to_string()))?;
    let offset = anchor - peaks[0];
    peaks.iter_mut().for_each(|p| *p += offset);

    if peaks[0] != anchor {
        return Err(AnalysisError::SyncMismatch(format!(
            "first beat at sample {} does not match first IBI at sample {}",
            peaks[0], anchor
        )));
    }
    Ok(peaks)
}

/// Dense IBI series over `0..n_samples`, smoothed with a zero-phase lowpass
pub fn interpolate_ibis(
    peaks: &[i64],
    ibis: &[f64],
    n_samples: usize,
    config: &IbiConfig,
    sfreq: f64,
) -> Result<Vec<f64>, AnalysisError> {
    let dense = interp_samples(peaks, ibis, n_samples)?;
    butter_lowpass_filter(&dense, config.lowpass_hz, sfreq, config.lowpass_order)
}

/// Spectral and time-domain HRV measures of a dense IBI series
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HrvStats {
    pub hrv_vlf: f64,
    pub hrv_lf: f64,
    pub hrv_hf: f64,
    pub hrv_lf_hf_ratio: f64,
    pub hrv_lf_nu: f64,
    pub hrv_hf_nu: f64,
    pub median_heart_period: f64,
    pub rmssd: f64,
}

/// Ratio that degrades to 0 when the denominator vanishes
fn ratio(num: f64, denom: f64) -> f64 {
    if denom > 0.0 {
        num / denom
    } else {
        0.0
    }
}

/// Band powers, ratios and normalized units of an IBI series
pub fn compute_hrv_stats(ibis: &[f64], sfreq: f64, nperseg: usize) -> Result<HrvStats, AnalysisError> {
    let psd = welch(ibis, sfreq, nperseg)?;
    let hrv_vlf = psd.band_power(VLF_BAND.0, VLF_BAND.1);
    let hrv_lf = psd.band_power(LF_BAND.0, LF_BAND.1);
    let hrv_hf = psd.band_power(HF_BAND.0, HF_BAND.1);

    let successive: Vec<f64> = ibis.windows(2).map(|w| (w[1] - w[0]).powi(2)).collect();

    Ok(HrvStats {
        hrv_vlf,
        hrv_lf,
        hrv_hf,
        hrv_lf_hf_ratio: ratio(hrv_lf, hrv_hf),
        hrv_lf_nu: 100.0 * ratio(hrv_lf, hrv_lf + hrv_hf),
        hrv_hf_nu: 100.0 * ratio(hrv_hf, hrv_lf + hrv_hf),
        median_heart_period: median(ibis),
        rmssd: mean(&successive).sqrt(),
    })
}

/// Mean respiration and IBI coherence within the LF and HF bands
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoherenceStats {
    pub coherence_lf: f64,
    pub coherence_hf: f64,
}

pub fn compute_coherence(
    resp: &[f64],
    ibis: &[f64],
    sfreq: f64,
    nperseg: usize,
) -> Result<CoherenceStats, AnalysisError> {
    // The IBI series may end before the respiration recording
    let n = resp.len().min(ibis.len());
    let coh = coherence(&resp[..n], &ibis[..n], sfreq, nperseg)?;
    Ok(CoherenceStats {
        coherence_lf: coh.band_mean(LF_BAND.0, LF_BAND.1),
        coherence_hf: coh.band_mean(HF_BAND.0, HF_BAND.1),
    })
}

/// Indices of local peaks and troughs; plateaus count once, at their first sample
pub fn local_extrema(x: &[f64]) -> Vec<usize> {
    let mut extrema = Vec::new();
    let mut direction = 0.0_f64;
    let mut candidate = 0;
    for i in 1..x.len() {
        let step = x[i] - x[i - 1];
        if step == 0.0 {
            continue;
        }
        let sign = step.signum();
        if direction != 0.0 && sign != direction {
            extrema.push(candidate);
        }
        direction = sign;
        candidate = i;
    }
    extrema
}

/// Absolute swing between consecutive IBI extrema, spread over every sample
pub fn compute_local_power(ibis: &[f64]) -> Result<Vec<f64>, AnalysisError> {
    let extrema = local_extrema(ibis);
    if extrema.len() < 2 {
        return Err(AnalysisError::InsufficientData(format!(
            "local power needs at least 2 extrema, found {}",
            extrema.len()
        )));
    }

    let mut power: Vec<f64> = std::iter::once(0.0)
        .chain(extrema.windows(2).map(|w| (ibis[w[1]] - ibis[w[0]]).abs()))
        .collect();
    power[0] = power[1];

    let anchors: Vec<f64> = extrema.iter().map(|&i| i as f64).collect();
    let queries: Vec<f64> = (0..ibis.len()).map(|i| i as f64).collect();
    interp_flat(&anchors, &power, &queries)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalPowerHrvStats {
    pub median_local_power_hrv: f64,
    pub mean_local_power_hrv: f64,
}

pub fn compute_local_power_hrv_stats(local_power: &[f64]) -> LocalPowerHrvStats {
    LocalPowerHrvStats {
        median_local_power_hrv: median(local_power),
        mean_local_power_hrv: mean(local_power),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::{ArtifactCorrector, NoCorrection};
    use crate::events::SYNC_EVENT;
    use crate::types::{EventRecord, EventValue};
    use approx::assert_abs_diff_eq;
    use pretty_assertions::assert_eq;
    use std::f64::consts::PI;

    fn record(event: &str, value: f64, timestamp: f64, sample: i64) -> EventRecord {
        EventRecord {
            event: event.to_string(),
            value: EventValue::Number(value),
            timestamp,
            sample: Some(sample),
        }
    }

    /// 10 Hz recording whose first event is 2 s in; first IBI notified at 1.7 s
    fn aligned_log() -> EventLog {
        EventLog::new(vec![
            record(SYNC_EVENT, 20.0, 0.0, 20),
            record(IBI_EVENT, 800.0, 1.7, 37),
            record(SYNC_EVENT, 30.0, 1.0, 30),
            record(SYNC_EVENT, 40.0, 2.0, 40),
        ])
    }

    #[test]
    fn test_correct_ibis_backfills_first() {
        let ibis = [700.0, 800.0, 820.0, 790.0];
        let corrected = correct_ibis(&ibis, &NoCorrection).unwrap();
        assert_eq!(corrected, vec![800.0, 800.0, 820.0, 790.0]);
        assert!(correct_ibis(&[800.0], &NoCorrection).is_err());
    }

    #[test]
    fn test_correct_ibis_idempotent_on_clean_input() {
        let ibis: Vec<f64> = (0..150)
            .map(|i| 800.0 + 40.0 * (2.0 * PI * i as f64 / 6.0).sin())
            .collect();
        let corrected = correct_ibis(&ibis, &ArtifactCorrector::default()).unwrap();
        assert_eq!(corrected.len(), ibis.len());
        assert_abs_diff_eq!(corrected[0], ibis[1], epsilon = 1e-9);
        for (c, raw) in corrected.iter().zip(&ibis).skip(1) {
            assert_abs_diff_eq!(*c, *raw, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_correct_ibis_keeps_quantized_steady_rhythm() {
        let ibis: Vec<f64> = (0..200)
            .map(|i| if i > 0 && i % 37 == 0 { 821.0 } else { 820.0 })
            .map(|ticks| ticks * 1000.0 / 1024.0)
            .collect();
        let corrected = correct_ibis(&ibis, &ArtifactCorrector::default()).unwrap();
        assert_eq!(corrected, ibis);
    }

    #[test]
    fn test_ibis_to_rpeaks_anchors_first_beat() {
        let peaks = ibis_to_rpeaks(&[800.0, 1000.0, 500.0], &aligned_log()).unwrap();
        assert_eq!(peaks, vec![37, 47, 52]);
    }

    #[test]
    fn test_ibis_to_rpeaks_needs_ibi_event() {
        let mut log = aligned_log();
        log.records.retain(|r| r.event != IBI_EVENT);
        assert!(matches!(
            ibis_to_rpeaks(&[800.0, 900.0], &log),
            Err(AnalysisError::MissingEvent(_))
        ));
    }

    #[test]
    fn test_interpolate_ibis_holds_edges() {
        let config = IbiConfig::default();
        let dense = interpolate_ibis(&[50, 150], &[800.0, 800.0], 300, &config, 10.0).unwrap();
        assert_eq!(dense.len(), 300);
        for v in dense {
            assert_abs_diff_eq!(v, 800.0, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_lf_oscillation_lands_in_lf_band() {
        let sfreq = 10.0;
        let ibis: Vec<f64> = (0..8192)
            .map(|i| 800.0 + 50.0 * (2.0 * PI * 0.1 * i as f64 / sfreq).sin())
            .collect();
        let stats = compute_hrv_stats(&ibis, sfreq, 4096).unwrap();
        let total = stats.hrv_vlf + stats.hrv_lf + stats.hrv_hf;

        assert_abs_diff_eq!(stats.hrv_lf / total, 1.0, epsilon = 1e-3);
        assert_abs_diff_eq!(stats.hrv_lf_nu, 100.0, epsilon = 0.1);
        assert_abs_diff_eq!(stats.hrv_hf_nu, 0.0, epsilon = 0.1);
        assert_abs_diff_eq!(stats.hrv_lf, 1250.0, epsilon = 30.0);
        assert_abs_diff_eq!(stats.median_heart_period, 800.0, epsilon = 5.0);
    }

    #[test]
    fn test_flat_series_has_zero_ratios() {
        let stats = compute_hrv_stats(&[800.0; 512], 10.0, 256).unwrap();
        assert_eq!(stats.hrv_lf_hf_ratio, 0.0);
        assert_eq!(stats.hrv_lf_nu, 0.0);
        assert_eq!(stats.rmssd, 0.0);
    }

    #[test]
    fn test_coherence_of_coupled_series() {
        let sfreq = 10.0;
        let resp: Vec<f64> = (0..4096)
            .map(|i| (2.0 * PI * 0.1 * i as f64 / sfreq).sin())
            .collect();
        let ibis: Vec<f64> = resp.iter().map(|r| 800.0 + 30.0 * r).collect();
        let stats = compute_coherence(&resp, &ibis, sfreq, 1024).unwrap();
        assert!(stats.coherence_lf > 0.99);
    }

    #[test]
    fn test_local_extrema() {
        let x = [0.0, 2.0, 1.0, 1.0, 3.0, 3.0, 0.0];
        assert_eq!(local_extrema(&x), vec![1, 2, 4]);
    }

    #[test]
    fn test_local_power_tracks_swing() {
        let ibis: Vec<f64> = (0..200)
            .map(|i| 800.0 + 25.0 * (2.0 * PI * i as f64 / 40.0).sin())
            .collect();
        let power = compute_local_power(&ibis).unwrap();
        assert_eq!(power.len(), ibis.len());
        for v in &power {
            assert_abs_diff_eq!(*v, 50.0, epsilon = 1e-6);
        }
        let stats = compute_local_power_hrv_stats(&power);
        assert_abs_diff_eq!(stats.median_local_power_hrv, 50.0, epsilon = 1e-6);
        assert!(compute_local_power(&[1.0, 2.0, 3.0]).is_err());
    }
}
