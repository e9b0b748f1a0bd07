//! Respiration features
//!
//! Band-limits the breathing signal the same way the live biofeedback did,
//! extracts its amplitude envelope and segments sustained amplitude bursts.
//! Breath-by-breath rate and amplitude come from alternating troughs and peaks
//! of a lightly smoothed signal.

use crate::config::RespBandConfig;
use crate::error::AnalysisError;
use crate::filters::{bessel_bandpass, butter_lowpass_filter};
use crate::interpolate::interp_flat;
use crate::spectral::analytic_signal;
use crate::stats::{mean, median, moving_average, std_dev};
use serde::{Deserialize, Serialize};

/// Cutoff of the smoothing applied before breath detection (Hz)
const EXTREMA_LOWPASS_HZ: f64 = 2.0;
/// Width of the moving mean that breaths are detected against (seconds)
const EXTREMA_BASELINE_SEC: f64 = 15.0;

/// Zero-phase Bessel bandpass over the biofeedback breathing band
pub fn biofeedback_filter(resp: &[f64], sfreq: f64, band: &RespBandConfig) -> Result<Vec<f64>, AnalysisError> {
    bessel_bandpass(band.order, band.low_bpm / 60.0, band.high_bpm / 60.0, sfreq)?.filtfilt(resp)
}

/// Magnitude of the analytic signal
pub fn instantaneous_amplitude(signal: &[f64]) -> Vec<f64> {
    analytic_signal(signal).iter().map(|c| c.norm()).collect()
}

/// Half-open run `[begin, end)` of samples
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    pub begin: usize,
    pub end: usize,
}

impl Segment {
    pub fn duration(&self) -> usize {
        self.end - self.begin
    }
}

/// Contiguous runs of `true`
pub fn find_segments(mask: &[bool]) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut begin = None;
    for (i, &on) in mask.iter().enumerate() {
        match (on, begin) {
            (true, None) => begin = Some(i),
            (false, Some(b)) => {
                segments.push(Segment { begin: b, end: i });
                begin = None;
            }
            _ => {}
        }
    }
    if let Some(b) = begin {
        segments.push(Segment {
            begin: b,
            end: mask.len(),
        });
    }
    segments
}

/// Dual-threshold hysteresis burst detection
///
/// A run above `low` becomes a burst when it lasts at least `min_duration`
/// samples and some sample in it exceeds `high`. The whole low-threshold run is
/// marked.
pub fn bursts_dual_threshold(inst_amp: &[f64], low: f64, high: f64, min_duration: usize) -> Vec<bool> {
    let above_low: Vec<bool> = inst_amp.iter().map(|&a| a > low).collect();
    let mut bursts = vec![false; inst_amp.len()];

    for segment in find_segments(&above_low) {
        if segment.duration() < min_duration {
            continue;
        }
        if inst_amp[segment.begin..segment.end].iter().any(|&a| a > high) {
            bursts[segment.begin..segment.end].fill(true);
        }
    }
    bursts
}

/// Envelope thresholds shared by all recordings of a subject
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BurstThresholds {
    pub low: f64,
    pub high: f64,
}

/// Low threshold = mean of the per-recording median envelopes
pub fn burst_thresholds(median_amplitudes: &[f64], high_factor: f64) -> Result<BurstThresholds, AnalysisError> {
    if median_amplitudes.is_empty() {
        return Err(AnalysisError::InsufficientData(
            "burst thresholds need at least one recording".to_string(),
        ));
    }
    let low = mean(median_amplitudes);
    Ok(BurstThresholds {
        low,
        high: high_factor * low,
    })
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BurstStats {
    pub n_bursts: f64,
    /// Seconds
    pub mean_duration_bursts: f64,
    /// Seconds (population standard deviation)
    pub std_duration_bursts: f64,
    pub percent_bursts: f64,
}

/// Count, duration and coverage of bursts; all zero when there are none
pub fn compute_burst_stats(bursts: &[bool], sfreq: f64) -> BurstStats {
    let durations: Vec<f64> = find_segments(bursts)
        .iter()
        .map(|s| s.duration() as f64)
        .collect();
    if durations.is_empty() {
        return BurstStats {
            n_bursts: 0.0,
            mean_duration_bursts: 0.0,
            std_duration_bursts: 0.0,
            percent_bursts: 0.0,
        };
    }

    let covered = bursts.iter().filter(|&&b| b).count() as f64;
    BurstStats {
        n_bursts: durations.len() as f64,
        mean_duration_bursts: mean(&durations) / sfreq,
        std_duration_bursts: std_dev(&durations) / sfreq,
        percent_bursts: 100.0 * covered / bursts.len() as f64,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RespPowerStats {
    pub normalized_median_resp_power: f64,
}

/// Median envelope relative to the subject's low burst threshold
///
/// An empty envelope is `InsufficientData`, so the statistic stays missing
/// instead of reading as zero power.
pub fn compute_resp_power_stats(inst_amp: &[f64], normalize_by: f64) -> Result<RespPowerStats, AnalysisError> {
    if inst_amp.is_empty() {
        return Err(AnalysisError::InsufficientData(
            "no respiration envelope inside the game segment".to_string(),
        ));
    }
    let normalized_median_resp_power = if normalize_by > 0.0 {
        median(inst_amp) / normalize_by
    } else {
        0.0
    };
    Ok(RespPowerStats {
        normalized_median_resp_power,
    })
}

/// Breath landmarks in samples
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RespExtrema {
    pub peaks: Vec<usize>,
    pub troughs: Vec<usize>,
}

/// Locate one trough or peak per half-breath
///
/// The signal is smoothed, centred on a moving mean and split at its
/// mean-crossings; every positive half-wave contributes its maximum and every
/// negative one its minimum.
pub fn resp_extrema(resp: &[f64], sfreq: f64) -> Result<RespExtrema, AnalysisError> {
    let cutoff = EXTREMA_LOWPASS_HZ.min(0.4 * sfreq);
    let smooth = butter_lowpass_filter(resp, cutoff, sfreq, 2)?;
    let window = (EXTREMA_BASELINE_SEC * sfreq).round() as usize;
    let baseline = moving_average(&smooth, window);
    let centred: Vec<f64> = smooth.iter().zip(&baseline).map(|(s, b)| s - b).collect();

    let crossings: Vec<usize> = (1..centred.len())
        .filter(|&i| (centred[i] > 0.0) != (centred[i - 1] > 0.0))
        .collect();

    let mut extrema = RespExtrema::default();
    for w in crossings.windows(2) {
        let half_wave = &centred[w[0]..w[1]];
        let rising = centred[w[0]] > 0.0;
        let offset = half_wave
            .iter()
            .enumerate()
            .fold(0, |best, (i, v)| {
                let better = if rising { *v > half_wave[best] } else { *v < half_wave[best] };
                if better {
                    i
                } else {
                    best
                }
            });
        if rising {
            extrema.peaks.push(w[0] + offset);
        } else {
            extrema.troughs.push(w[0] + offset);
        }
    }
    Ok(extrema)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RespStats {
    /// Breaths per minute
    pub median_resp_rate: f64,
    pub median_resp_amp: f64,
    pub mean_resp_rate: f64,
}

/// Breathing rate and amplitude, interpolated over every sample before averaging
pub fn compute_resp_stats(resp: &[f64], sfreq: f64) -> Result<RespStats, AnalysisError> {
    let extrema = resp_extrema(resp, sfreq)?;

    // Keep only peaks preceded by a trough so that every breath has an amplitude
    let breaths: Vec<(usize, usize)> = extrema
        .peaks
        .iter()
        .filter_map(|&peak| {
            extrema
                .troughs
                .iter()
                .rev()
                .find(|&&t| t < peak)
                .map(|&trough| (trough, peak))
        })
        .collect();
    if breaths.len() < 2 {
        return Err(AnalysisError::InsufficientData(format!(
            "breathing statistics need at least 2 breaths, found {}",
            breaths.len()
        )));
    }

    let anchors: Vec<f64> = breaths.iter().map(|&(_, p)| p as f64).collect();
    let mut rate: Vec<f64> = std::iter::once(0.0)
        .chain(anchors.windows(2).map(|w| 60.0 * sfreq / (w[1] - w[0])))
        .collect();
    rate[0] = mean(&rate[1..]);
    let amp: Vec<f64> = breaths.iter().map(|&(t, p)| resp[p] - resp[t]).collect();

    let queries: Vec<f64> = (0..resp.len()).map(|i| i as f64).collect();
    let rate = interp_flat(&anchors, &rate, &queries)?;
    let amp = interp_flat(&anchors, &amp, &queries)?;

    Ok(RespStats {
        median_resp_rate: median(&rate),
        median_resp_amp: median(&amp),
        mean_resp_rate: mean(&rate),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use pretty_assertions::assert_eq;
    use std::f64::consts::PI;

    fn breathing(bpm: f64, amp: f64, sfreq: f64, seconds: f64) -> Vec<f64> {
        let n = (seconds * sfreq) as usize;
        (0..n)
            .map(|i| amp * (2.0 * PI * bpm / 60.0 * i as f64 / sfreq).sin())
            .collect()
    }

    #[test]
    fn test_find_segments() {
        let mask = [true, true, false, false, true, false, true];
        assert_eq!(
            find_segments(&mask),
            vec![
                Segment { begin: 0, end: 2 },
                Segment { begin: 4, end: 5 },
                Segment { begin: 6, end: 7 },
            ]
        );
        assert!(find_segments(&[false; 4]).is_empty());
    }

    /// Plateau of `plateau` samples above high inside `plateau + shoulder` above low
    fn plateau_envelope(plateau: usize, shoulder: usize) -> Vec<f64> {
        let mut env = vec![0.5; 20];
        env.extend(vec![1.2; shoulder / 2]);
        env.extend(vec![2.0; plateau]);
        env.extend(vec![1.2; shoulder - shoulder / 2]);
        env.extend(vec![0.5; 20]);
        env
    }

    #[test]
    fn test_burst_marks_whole_low_extent() {
        let env = plateau_envelope(10, 6);
        let bursts = bursts_dual_threshold(&env, 1.0, 1.5, 16);
        assert_eq!(bursts.iter().filter(|&&b| b).count(), 16);
        assert!(bursts[20..36].iter().all(|&b| b));
    }

    #[test]
    fn test_short_burst_is_rejected() {
        let env = plateau_envelope(10, 5);
        let bursts = bursts_dual_threshold(&env, 1.0, 1.5, 16);
        assert!(bursts.iter().all(|&b| !b));
    }

    #[test]
    fn test_run_without_high_crossing_is_not_a_burst() {
        let env = vec![1.2; 50];
        assert!(bursts_dual_threshold(&env, 1.0, 1.5, 10).iter().all(|&b| !b));
    }

    #[test]
    fn test_burst_stats_without_bursts_are_zero() {
        let stats = compute_burst_stats(&[false; 100], 10.0);
        assert_eq!(stats.n_bursts, 0.0);
        assert_eq!(stats.mean_duration_bursts, 0.0);
        assert_eq!(stats.std_duration_bursts, 0.0);
        assert_eq!(stats.percent_bursts, 0.0);
        assert_eq!(compute_burst_stats(&[], 10.0).n_bursts, 0.0);
    }

    #[test]
    fn test_burst_stats() {
        let mut bursts = vec![false; 100];
        bursts[10..30].fill(true);
        bursts[60..100].fill(true);
        let stats = compute_burst_stats(&bursts, 10.0);
        assert_eq!(stats.n_bursts, 2.0);
        assert_abs_diff_eq!(stats.mean_duration_bursts, 3.0);
        assert_abs_diff_eq!(stats.std_duration_bursts, 1.0);
        assert_abs_diff_eq!(stats.percent_bursts, 60.0);
    }

    #[test]
    fn test_thresholds_and_power() {
        let thresholds = burst_thresholds(&[1.0, 2.0, 3.0], 1.5).unwrap();
        assert_eq!(thresholds, BurstThresholds { low: 2.0, high: 3.0 });
        assert!(burst_thresholds(&[], 1.5).is_err());

        let power = compute_resp_power_stats(&[1.0, 4.0, 3.0], 2.0).unwrap();
        assert_abs_diff_eq!(power.normalized_median_resp_power, 1.5);
        assert!(matches!(
            compute_resp_power_stats(&[], 2.0),
            Err(AnalysisError::InsufficientData(_))
        ));
    }

    #[test]
    fn test_envelope_of_band_limited_breathing() {
        let sfreq = 10.0;
        let resp = breathing(6.0, 2.0, sfreq, 400.0);
        let filtered = biofeedback_filter(&resp, sfreq, &RespBandConfig::default()).unwrap();
        let envelope = instantaneous_amplitude(&filtered);
        assert_eq!(envelope.len(), resp.len());
        // Away from the edges the envelope is flat at the passband gain
        let middle = &envelope[1000..3000];
        let spread = middle.iter().cloned().fold(f64::MIN, f64::max)
            - middle.iter().cloned().fold(f64::MAX, f64::min);
        assert!(spread < 0.1);
        assert!(median(middle) > 1.5);
    }

    #[test]
    fn test_resp_stats_of_regular_breathing() {
        let sfreq = 10.0;
        // Period of 40 samples puts every peak and trough exactly on a sample
        let resp = breathing(15.0, 1.0, sfreq, 300.0);
        let extrema = resp_extrema(&resp, sfreq).unwrap();
        assert!(extrema.peaks.len() >= 70);
        assert!(extrema.troughs.len() >= 70);

        let stats = compute_resp_stats(&resp, sfreq).unwrap();
        assert_abs_diff_eq!(stats.median_resp_rate, 15.0, epsilon = 0.1);
        assert_abs_diff_eq!(stats.mean_resp_rate, 15.0, epsilon = 0.2);
        assert_abs_diff_eq!(stats.median_resp_amp, 2.0, epsilon = 0.02);
    }

    #[test]
    fn test_resp_stats_need_breaths() {
        assert!(compute_resp_stats(&vec![0.0; 200], 10.0).is_err());
    }
}
