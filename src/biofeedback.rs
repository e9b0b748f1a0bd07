//! Biofeedback score model
//!
//! Scores follow a Hill equation with coefficient 3: a physiological quantity
//! equal to the target maps to 0.5, lower values fall towards 0 and higher
//! values saturate towards 1.

use crate::config::HrvBiofeedbackConfig;
use crate::error::AnalysisError;
use crate::interpolate::interp_samples;
use crate::stats::{mean, median, moving_average};
use serde::{Deserialize, Serialize};

/// Hill coefficient; sets the steepness of the score around the target
pub const HILL_COEFFICIENT: i32 = 3;

/// Score of a single value
pub fn compute_biofeedback_score(signal: f64, target: f64) -> f64 {
    let s = signal.powi(HILL_COEFFICIENT);
    let t = target.powi(HILL_COEFFICIENT);
    s / (t + s)
}

pub fn compute_biofeedback_scores(signal: &[f64], target: f64) -> Vec<f64> {
    signal
        .iter()
        .map(|&s| compute_biofeedback_score(s, target))
        .collect()
}

/// Spread logged feedback scores over `0..n_samples`
pub fn interpolate_biofeedback(samples: &[i64], values: &[f64], n_samples: usize) -> Result<Vec<f64>, AnalysisError> {
    interp_samples(samples, values, n_samples)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OriginalRespBiofeedbackStats {
    pub median_original_resp_biofeedback: f64,
    pub mean_original_resp_biofeedback: f64,
}

pub fn compute_original_resp_biofeedback_stats(biofeedback: &[f64]) -> OriginalRespBiofeedbackStats {
    OriginalRespBiofeedbackStats {
        median_original_resp_biofeedback: median(biofeedback),
        mean_original_resp_biofeedback: mean(biofeedback),
    }
}

/// Offline HRV biofeedback: smoothed local power mapped through the score model
///
/// Without a configured target the median smoothed power of the recording is
/// used, which centres the scores on 0.5.
pub fn hrv_biofeedback(
    local_power: &[f64],
    config: &HrvBiofeedbackConfig,
    sfreq: f64,
) -> Result<Vec<f64>, AnalysisError> {
    if local_power.is_empty() {
        return Err(AnalysisError::InsufficientData(
            "no local power samples to score".to_string(),
        ));
    }
    let window = (config.smoothing_sec * sfreq).round() as usize;
    let smooth = moving_average(local_power, window);

    let target = config.target.unwrap_or_else(|| median(&smooth));
    if !(target > 0.0) {
        return Err(AnalysisError::InvalidParameter(format!(
            "biofeedback target must be positive, got {}",
            target
        )));
    }
    Ok(compute_biofeedback_scores(&smooth, target))
}
