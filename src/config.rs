//! Analysis configuration
//!
//! Subject lists, session/condition pairings, the sample rate and all filter
//! and detector parameters live in one explicit value that is passed into every
//! stage. Test fixtures and production directories can therefore coexist.

use crate::error::AnalysisError;
use crate::types::RecordingId;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Default sample rate of the respiration recording (Hz)
pub const DEFAULT_SAMPLE_RATE: f64 = 10.0;

/// Condition of each of the ten sessions, in session order
const DEFAULT_CONDITIONS: [&str; 10] = [
    "cond-A", "cond-B", "cond-B", "cond-A", "cond-B", "cond-A", "cond-B", "cond-A", "cond-B",
    "cond-A",
];

/// A session and the condition it was recorded under
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSpec {
    pub session: String,
    pub condition: String,
}

/// Breathing band used by the biofeedback filter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RespBandConfig {
    /// Lower edge (breaths per minute)
    pub low_bpm: f64,
    /// Upper edge (breaths per minute)
    pub high_bpm: f64,
    /// Bessel filter order
    pub order: usize,
}

impl Default for RespBandConfig {
    fn default() -> Self {
        Self {
            low_bpm: 4.0,
            high_bpm: 12.0,
            order: 2,
        }
    }
}

/// Smoothing of the interpolated IBI series
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IbiConfig {
    /// Lowpass cutoff (Hz)
    pub lowpass_hz: f64,
    /// Butterworth order
    pub lowpass_order: usize,
}

impl Default for IbiConfig {
    fn default() -> Self {
        Self {
            lowpass_hz: 1.0,
            lowpass_order: 12,
        }
    }
}

/// Dual-threshold burst detection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BurstConfig {
    /// High threshold as a multiple of the low threshold
    pub high_factor: f64,
    /// Minimum duration of the low-threshold run (seconds)
    pub min_duration_sec: f64,
}

impl Default for BurstConfig {
    fn default() -> Self {
        Self {
            high_factor: 1.5,
            min_duration_sec: 10.0,
        }
    }
}

/// Segment lengths of the spectral estimators
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpectralConfig {
    pub welch_nperseg: usize,
    pub coherence_nperseg: usize,
}

impl Default for SpectralConfig {
    fn default() -> Self {
        Self {
            welch_nperseg: 4096,
            coherence_nperseg: 1024,
        }
    }
}

/// Offline HRV biofeedback recomputation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HrvBiofeedbackConfig {
    /// Local power at which the score is 0.5; median of the recording if unset
    pub target: Option<f64>,
    /// Width of the centred moving mean applied to local power (seconds)
    pub smoothing_sec: f64,
}

impl Default for HrvBiofeedbackConfig {
    fn default() -> Self {
        Self {
            target: None,
            smoothing_sec: 10.0,
        }
    }
}

/// Complete configuration of a study analysis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Sample rate of the physiological recording (Hz)
    pub sample_rate: f64,
    pub subjects: Vec<String>,
    pub sessions: Vec<SessionSpec>,
    /// Root of the raw recordings (one directory per subject)
    pub raw_dir: PathBuf,
    /// Root of the processed artifacts (one directory per subject)
    pub processed_dir: PathBuf,
    pub resp_band: RespBandConfig,
    pub ibi: IbiConfig,
    pub bursts: BurstConfig,
    pub spectral: SpectralConfig,
    pub hrv_biofeedback: HrvBiofeedbackConfig,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        let subjects = (1..=9).map(|i| format!("subj-{:02}", i)).collect();
        let sessions = DEFAULT_CONDITIONS
            .iter()
            .enumerate()
            .map(|(i, cond)| SessionSpec {
                session: format!("sess-{:02}", i + 1),
                condition: cond.to_string(),
            })
            .collect();

        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            subjects,
            sessions,
            raw_dir: PathBuf::from("raw"),
            processed_dir: PathBuf::from("processed"),
            resp_band: RespBandConfig::default(),
            ibi: IbiConfig::default(),
            bursts: BurstConfig::default(),
            spectral: SpectralConfig::default(),
            hrv_biofeedback: HrvBiofeedbackConfig::default(),
        }
    }
}

impl AnalysisConfig {
    /// Load configuration from JSON; missing fields fall back to defaults
    pub fn from_json(json: &str) -> Result<Self, AnalysisError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize configuration to JSON
    pub fn to_json(&self) -> Result<String, AnalysisError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Check that parameters are physically meaningful
    pub fn validate(&self) -> Result<(), AnalysisError> {
        if !(self.sample_rate > 0.0) {
            return Err(AnalysisError::InvalidParameter(format!(
                "sample_rate must be positive, got {}",
                self.sample_rate
            )));
        }
        let nyquist_bpm = self.sample_rate / 2.0 * 60.0;
        let band = &self.resp_band;
        if !(band.low_bpm > 0.0 && band.low_bpm < band.high_bpm && band.high_bpm < nyquist_bpm) {
            return Err(AnalysisError::InvalidParameter(format!(
                "respiration band {}-{} breaths/min is invalid at {} Hz",
                band.low_bpm, band.high_bpm, self.sample_rate
            )));
        }
        if !(self.ibi.lowpass_hz > 0.0 && self.ibi.lowpass_hz < self.sample_rate / 2.0) {
            return Err(AnalysisError::InvalidParameter(format!(
                "IBI lowpass cutoff {} Hz must lie below Nyquist",
                self.ibi.lowpass_hz
            )));
        }
        if self.bursts.high_factor < 1.0 {
            return Err(AnalysisError::InvalidParameter(
                "burst high_factor must be at least 1".to_string(),
            ));
        }
        if self.spectral.welch_nperseg < 2 || self.spectral.coherence_nperseg < 2 {
            return Err(AnalysisError::InvalidParameter(
                "spectral segment lengths must be at least 2".to_string(),
            ));
        }
        Ok(())
    }

    /// Minimum burst duration in samples
    pub fn burst_min_samples(&self) -> usize {
        (self.bursts.min_duration_sec * self.sample_rate).round() as usize
    }

    /// All recordings the study expects for one subject
    pub fn recordings_for(&self, subject: &str) -> Vec<RecordingId> {
        self.sessions
            .iter()
            .map(|s| RecordingId::new(subject, s.session.as_str(), s.condition.as_str()))
            .collect()
    }

    /// All recordings of the study (subjects × sessions)
    pub fn all_recordings(&self) -> Vec<RecordingId> {
        self.subjects
            .iter()
            .flat_map(|subject| self.recordings_for(subject))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_study_layout() {
        let config = AnalysisConfig::default();
        assert_eq!(config.subjects.len(), 9);
        assert_eq!(config.subjects[0], "subj-01");
        assert_eq!(config.sessions.len(), 10);
        assert_eq!(config.sessions[1].session, "sess-02");
        assert_eq!(config.sessions[1].condition, "cond-B");
        assert_eq!(config.all_recordings().len(), 90);
        assert_eq!(config.burst_min_samples(), 100);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = AnalysisConfig::from_json(
            r#"{"sample_rate": 20.0, "subjects": ["subj-07"], "bursts": {"high_factor": 2.0}}"#,
        )
        .unwrap();
        assert_eq!(config.sample_rate, 20.0);
        assert_eq!(config.subjects, vec!["subj-07".to_string()]);
        assert_eq!(config.bursts.high_factor, 2.0);
        assert_eq!(config.bursts.min_duration_sec, 10.0);
        assert_eq!(config.spectral.welch_nperseg, 4096);
    }

    #[test]
    fn test_json_roundtrip() {
        let config = AnalysisConfig::default();
        let json = config.to_json().unwrap();
        assert_eq!(AnalysisConfig::from_json(&json).unwrap(), config);
    }

    #[test]
    fn test_validate_rejects_bad_rate() {
        let result = AnalysisConfig::from_json(r#"{"sample_rate": 0.0}"#);
        assert!(matches!(result, Err(AnalysisError::InvalidParameter(_))));

        let result = AnalysisConfig::from_json(r#"{"resp_band": {"low_bpm": 12.0, "high_bpm": 4.0}}"#);
        assert!(result.is_err());
    }
}
