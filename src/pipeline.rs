//! Pipeline orchestration
//!
//! Preprocessing stages turn one raw recording into aligned per-sample
//! artifacts. Summary stages slice those artifacts to the game segment and
//! write their statistics into the [`SummaryTable`]. [`StudyProcessor`] runs
//! both for all recordings of a subject.
//!
//! Stages distinguish three outcomes: updated, skipped because the recording
//! lacks the data a stage needs, and already computed. Invariant violations
//! (synchronization mismatch, ambiguous summary rows) abort with an error.

use crate::artifacts::ArtifactCorrector;
use crate::biofeedback::{
    compute_original_resp_biofeedback_stats, hrv_biofeedback, interpolate_biofeedback,
    OriginalRespBiofeedbackStats,
};
use crate::config::AnalysisConfig;
use crate::error::AnalysisError;
use crate::events::{event_samples, event_values, format_events, game_segment, slice_segment};
use crate::events::{FEEDBACK_EVENT, IBI_EVENT};
use crate::hrv::{
    compute_coherence, compute_hrv_stats, compute_local_power, compute_local_power_hrv_stats,
    correct_ibis, ibis_to_rpeaks, interpolate_ibis, CoherenceStats, HrvStats, LocalPowerHrvStats,
};
use crate::resp::{
    biofeedback_filter, burst_thresholds, bursts_dual_threshold, compute_burst_stats,
    compute_resp_power_stats, compute_resp_stats, instantaneous_amplitude, BurstStats,
    BurstThresholds, RespPowerStats, RespStats,
};
use crate::stats::median;
use crate::summary::{SummaryStats, SummaryTable};
use crate::types::{EventLog, RawEventLog, RecordingId};
use tracing::{debug, info, warn};

/// One raw recording: the game's event log and the respiration channel
#[derive(Debug, Clone, PartialEq)]
pub struct Recording {
    pub id: RecordingId,
    pub raw_events: RawEventLog,
    pub resp: Vec<f64>,
}

/// Band-limited respiration and its envelope
#[derive(Debug, Clone, PartialEq)]
pub struct RespArtifact {
    pub resp_filt: Vec<f64>,
    pub inst_amp: Vec<f64>,
}

/// Local HRV power and the offline score computed from it
#[derive(Debug, Clone, PartialEq)]
pub struct HrvBiofeedbackArtifact {
    pub local_power_hrv: Vec<f64>,
    pub hrv_biofeedback: Vec<f64>,
}

/// All per-sample artifacts of one recording
#[derive(Debug, Clone, PartialEq)]
pub struct Preprocessed {
    pub id: RecordingId,
    pub events: EventLog,
    /// Unfiltered respiration
    pub resp: Vec<f64>,
    pub resp_artifact: RespArtifact,
    pub ibis: Option<Vec<f64>>,
    pub hrv_biofeedback: Option<HrvBiofeedbackArtifact>,
    pub original_resp_biofeedback: Option<Vec<f64>>,
}

/// Result of running one stage on one recording
#[derive(Debug, Clone, PartialEq)]
pub enum StageOutcome {
    Updated,
    Skipped(String),
    AlreadyComputed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StageReport {
    pub id: RecordingId,
    pub stage: &'static str,
    pub outcome: StageOutcome,
}

/// Turn a recoverable failure into `None` with a warning
fn recoverable<T>(
    result: Result<T, AnalysisError>,
    id: &RecordingId,
    what: &str,
) -> Result<Option<T>, AnalysisError> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.is_recoverable() => {
            warn!(recording = %id, reason = %e, "Skipping {}", what);
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

/// Reconcile the event log with the respiration sample clock.
///
/// # Arguments
/// * `raw` - Game log as recorded, with wall-clock timestamps
///
/// # Returns
/// The log with relative times, a sample index per event, wrapped
/// `UnityEvent` markers renamed to the event they carry and IBIs in
/// milliseconds
///
/// # Example
/// ```ignore
/// let events = preprocess_events(&recording.raw_events)?;
/// let (begin, end) = game_segment(&events)?;
/// ```
pub fn preprocess_events(raw: &RawEventLog) -> Result<EventLog, AnalysisError> {
    format_events(raw)
}

/// Corrected IBIs interpolated from sample 0 up to the last beat.
///
/// # Arguments
/// * `events` - Sample-mapped event log of the recording
/// * `config` - Analysis configuration (sample rate, IBI lowpass)
///
/// # Returns
/// The dense, lowpass-filtered IBI series in milliseconds, or `None` when the
/// log holds no IBI events
pub fn preprocess_ibis(events: &EventLog, config: &AnalysisConfig) -> Result<Option<Vec<f64>>, AnalysisError> {
    let ibis = event_values(events, IBI_EVENT)?;
    if ibis.is_empty() {
        return Ok(None);
    }

    // IBIs are in milliseconds, so peaks are too
    let corrector = ArtifactCorrector::new(1.0);
    let corrected = correct_ibis(&ibis, &corrector)?;
    let peaks = ibis_to_rpeaks(&corrected, events)?;
    let last = peaks.last().copied().unwrap_or(0).max(0) as usize;

    interpolate_ibis(&peaks, &corrected, last, &config.ibi, config.sample_rate).map(Some)
}

/// Band-limited respiration and its amplitude envelope.
///
/// # Arguments
/// * `resp` - Raw respiration channel
/// * `config` - Analysis configuration (sample rate, biofeedback band)
///
/// # Returns
/// Filtered signal and envelope, both as long as `resp`
pub fn preprocess_resp(resp: &[f64], config: &AnalysisConfig) -> Result<RespArtifact, AnalysisError> {
    let resp_filt = biofeedback_filter(resp, config.sample_rate, &config.resp_band)?;
    let inst_amp = instantaneous_amplitude(&resp_filt);
    Ok(RespArtifact { resp_filt, inst_amp })
}

/// Local HRV power and the offline HRV biofeedback score derived from it.
///
/// # Arguments
/// * `ibis` - Dense IBI series from [`preprocess_ibis`]
/// * `config` - Analysis configuration (score target and smoothing)
pub fn preprocess_hrv_biofeedback(ibis: &[f64], config: &AnalysisConfig) -> Result<HrvBiofeedbackArtifact, AnalysisError> {
    let local_power_hrv = compute_local_power(ibis)?;
    let hrv_biofeedback = hrv_biofeedback(&local_power_hrv, &config.hrv_biofeedback, config.sample_rate)?;
    Ok(HrvBiofeedbackArtifact {
        local_power_hrv,
        hrv_biofeedback,
    })
}

/// Logged feedback scores interpolated from sample 0 up to the last score.
///
/// # Returns
/// One score per sample, or `None` when the log holds no feedback events
pub fn preprocess_resp_biofeedback(events: &EventLog) -> Result<Option<Vec<f64>>, AnalysisError> {
    let values = event_values(events, FEEDBACK_EVENT)?;
    if values.is_empty() {
        return Ok(None);
    }
    let samples = event_samples(events, FEEDBACK_EVENT)?;
    let last = samples.last().copied().unwrap_or(0).max(0) as usize;
    interpolate_biofeedback(&samples, &values, last).map(Some)
}

/// Shared skeleton of the summary stages
fn run_stage<F>(
    stage: &'static str,
    table: &mut SummaryTable,
    rec: &Preprocessed,
    columns: &[&str],
    recompute: bool,
    compute: F,
) -> Result<StageOutcome, AnalysisError>
where
    F: FnOnce((usize, usize)) -> Result<Vec<(&'static str, f64)>, AnalysisError>,
{
    if !recompute && table.is_computed(&rec.id, columns)? {
        debug!(stage, recording = %rec.id, "Not re-computing");
        return Ok(StageOutcome::AlreadyComputed);
    }

    match game_segment(&rec.events).and_then(compute) {
        Ok(entries) => {
            table.update_entries(&rec.id, &entries)?;
            info!(stage, recording = %rec.id, "Updated summary");
            Ok(StageOutcome::Updated)
        }
        Err(e) if e.is_recoverable() => {
            warn!(stage, recording = %rec.id, reason = %e, "Skipping summary stage");
            Ok(StageOutcome::Skipped(e.to_string()))
        }
        Err(e) => Err(e),
    }
}

fn required<'a, T>(value: &'a Option<T>, event: &str) -> Result<&'a T, AnalysisError> {
    value
        .as_ref()
        .ok_or_else(|| AnalysisError::MissingEvent(event.to_string()))
}

/// Breathing rate and amplitude of the raw respiration during the game.
///
/// # Arguments
/// * `table` - Summary table receiving the statistics
/// * `rec` - Preprocessed recording
/// * `config` - Analysis configuration
/// * `recompute` - Overwrite statistics that are already present
///
/// # Returns
/// [`StageOutcome::Skipped`] when the game markers are missing or too few
/// breaths are found; errors only for invariant violations
pub fn summary_resp(
    table: &mut SummaryTable,
    rec: &Preprocessed,
    config: &AnalysisConfig,
    recompute: bool,
) -> Result<StageOutcome, AnalysisError> {
    run_stage("resp", table, rec, RespStats::COLUMNS, recompute, |segment| {
        let resp = slice_segment(&rec.resp, segment);
        Ok(compute_resp_stats(resp, config.sample_rate)?.entries())
    })
}

/// Envelope thresholds of a subject from all of its recordings
pub fn subject_burst_thresholds(
    recordings: &[Preprocessed],
    config: &AnalysisConfig,
) -> Result<BurstThresholds, AnalysisError> {
    let medians: Vec<f64> = recordings
        .iter()
        .map(|r| median(&r.resp_artifact.inst_amp))
        .collect();
    burst_thresholds(&medians, config.bursts.high_factor)
}

/// Burst statistics and normalized envelope power during the game.
///
/// # Arguments
/// * `table` - Summary table receiving the statistics
/// * `rec` - Preprocessed recording
/// * `thresholds` - Envelope thresholds of the recording's subject
/// * `config` - Analysis configuration (minimum burst duration)
/// * `recompute` - Overwrite statistics that are already present
///
/// # Returns
/// [`StageOutcome::Skipped`] when the game segment holds no envelope samples
pub fn summary_bursts(
    table: &mut SummaryTable,
    rec: &Preprocessed,
    thresholds: &BurstThresholds,
    config: &AnalysisConfig,
    recompute: bool,
) -> Result<StageOutcome, AnalysisError> {
    let columns = [RespPowerStats::COLUMNS, BurstStats::COLUMNS].concat();
    run_stage("bursts", table, rec, &columns, recompute, |segment| {
        let inst_amp = slice_segment(&rec.resp_artifact.inst_amp, segment);
        let power = compute_resp_power_stats(inst_amp, thresholds.low)?;
        let bursts = bursts_dual_threshold(
            inst_amp,
            thresholds.low,
            thresholds.high,
            config.burst_min_samples(),
        );
        let mut entries = compute_burst_stats(&bursts, config.sample_rate).entries();
        entries.extend(power.entries());
        Ok(entries)
    })
}

/// HRV band powers during the game.
///
/// Skipped for recordings without IBIs.
pub fn summary_heart(
    table: &mut SummaryTable,
    rec: &Preprocessed,
    config: &AnalysisConfig,
    recompute: bool,
) -> Result<StageOutcome, AnalysisError> {
    run_stage("heart", table, rec, HrvStats::COLUMNS, recompute, |segment| {
        let ibis = slice_segment(required(&rec.ibis, IBI_EVENT)?, segment);
        Ok(compute_hrv_stats(ibis, config.sample_rate, config.spectral.welch_nperseg)?.entries())
    })
}

/// Respiration and IBI coherence during the game
pub fn summary_coherence(
    table: &mut SummaryTable,
    rec: &Preprocessed,
    config: &AnalysisConfig,
    recompute: bool,
) -> Result<StageOutcome, AnalysisError> {
    run_stage(
        "coherence",
        table,
        rec,
        CoherenceStats::COLUMNS,
        recompute,
        |segment| {
            let ibis = slice_segment(required(&rec.ibis, IBI_EVENT)?, segment);
            let resp = slice_segment(&rec.resp, segment);
            Ok(compute_coherence(resp, ibis, config.sample_rate, config.spectral.coherence_nperseg)?.entries())
        },
    )
}

/// Local HRV power during the game
pub fn summary_hrv_biofeedback(
    table: &mut SummaryTable,
    rec: &Preprocessed,
    recompute: bool,
) -> Result<StageOutcome, AnalysisError> {
    run_stage(
        "hrv_biofeedback",
        table,
        rec,
        LocalPowerHrvStats::COLUMNS,
        recompute,
        |segment| {
            let artifact = required(&rec.hrv_biofeedback, IBI_EVENT)?;
            let local_power = slice_segment(&artifact.local_power_hrv, segment);
            if local_power.is_empty() {
                return Err(AnalysisError::InsufficientData(
                    "no local HRV power inside the game segment".to_string(),
                ));
            }
            Ok(compute_local_power_hrv_stats(local_power).entries())
        },
    )
}

/// Logged respiration feedback during the game
pub fn summary_resp_biofeedback(
    table: &mut SummaryTable,
    rec: &Preprocessed,
    recompute: bool,
) -> Result<StageOutcome, AnalysisError> {
    run_stage(
        "resp_biofeedback",
        table,
        rec,
        OriginalRespBiofeedbackStats::COLUMNS,
        recompute,
        |segment| {
            let scores = slice_segment(required(&rec.original_resp_biofeedback, FEEDBACK_EVENT)?, segment);
            if scores.is_empty() {
                return Err(AnalysisError::InsufficientData(
                    "no feedback scores inside the game segment".to_string(),
                ));
            }
            Ok(compute_original_resp_biofeedback_stats(scores).entries())
        },
    )
}

/// Stateful processor owning the configuration and the summary table
///
/// Recordings are processed one at a time; the table is the only state shared
/// between them.
pub struct StudyProcessor {
    config: AnalysisConfig,
    table: SummaryTable,
    recompute: bool,
}

impl StudyProcessor {
    /// Create a processor with an empty table covering the whole study
    pub fn new(config: AnalysisConfig) -> Self {
        let table = SummaryTable::instantiate(&config);
        Self::with_table(config, table)
    }

    /// Continue filling an existing table
    pub fn with_table(config: AnalysisConfig, table: SummaryTable) -> Self {
        Self {
            config,
            table,
            recompute: false,
        }
    }

    /// Recompute statistics that are already present in the table
    pub fn with_recompute(mut self, recompute: bool) -> Self {
        self.recompute = recompute;
        self
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    pub fn table(&self) -> &SummaryTable {
        &self.table
    }

    pub fn into_table(self) -> SummaryTable {
        self.table
    }

    /// Run every preprocessing stage on one recording
    ///
    /// Missing IBI or feedback events leave the matching artifacts empty; a
    /// respiration channel too short to filter is an error.
    pub fn preprocess(&self, recording: &Recording) -> Result<Preprocessed, AnalysisError> {
        let id = &recording.id;
        let events = preprocess_events(&recording.raw_events)?;
        let resp_artifact = preprocess_resp(&recording.resp, &self.config)?;

        let ibis = match recoverable(preprocess_ibis(&events, &self.config), id, "IBIs")? {
            Some(None) => {
                warn!(recording = %id, "Didn't find InterBeatInterval events");
                None
            }
            other => other.flatten(),
        };
        let hrv_biofeedback = match &ibis {
            Some(ibis) => recoverable(preprocess_hrv_biofeedback(ibis, &self.config), id, "HRV biofeedback")?,
            None => None,
        };
        let original_resp_biofeedback = preprocess_resp_biofeedback(&events)?;
        if original_resp_biofeedback.is_none() {
            warn!(recording = %id, "Didn't find Feedback events");
        }

        Ok(Preprocessed {
            id: id.clone(),
            events,
            resp: recording.resp.clone(),
            resp_artifact,
            ibis,
            hrv_biofeedback,
            original_resp_biofeedback,
        })
    }

    /// Like [`StudyProcessor::preprocess`], but an unusable recording yields
    /// `Ok(None)` with a warning
    pub fn try_preprocess(&self, recording: &Recording) -> Result<Option<Preprocessed>, AnalysisError> {
        recoverable(self.preprocess(recording), &recording.id, "recording")
    }

    /// Run every summary stage for all recordings of one subject
    pub fn summarize_subject(&mut self, recordings: &[Preprocessed]) -> Result<Vec<StageReport>, AnalysisError> {
        if recordings.is_empty() {
            warn!("No recordings to summarize");
            return Ok(Vec::new());
        }

        let thresholds = subject_burst_thresholds(recordings, &self.config)?;
        let config = &self.config;
        let table = &mut self.table;
        let recompute = self.recompute;
        let mut reports = Vec::new();

        for rec in recordings {
            let outcomes = [
                ("resp", summary_resp(table, rec, config, recompute)?),
                ("bursts", summary_bursts(table, rec, &thresholds, config, recompute)?),
                ("heart", summary_heart(table, rec, config, recompute)?),
                ("coherence", summary_coherence(table, rec, config, recompute)?),
                ("hrv_biofeedback", summary_hrv_biofeedback(table, rec, recompute)?),
                ("resp_biofeedback", summary_resp_biofeedback(table, rec, recompute)?),
            ];
            reports.extend(outcomes.into_iter().map(|(stage, outcome)| StageReport {
                id: rec.id.clone(),
                stage,
                outcome,
            }));
        }
        Ok(reports)
    }

    /// Preprocess and summarize all recordings of one subject
    pub fn process_subject(&mut self, recordings: &[Recording]) -> Result<Vec<StageReport>, AnalysisError> {
        let mut preprocessed = Vec::new();
        for recording in recordings {
            preprocessed.extend(self.try_preprocess(recording)?);
        }
        self.summarize_subject(&preprocessed)
    }
}
