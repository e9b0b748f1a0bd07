//! On-disk tables and workspace layout
//!
//! Every artifact is a tab-separated table with a header row. Raw recordings
//! live under `<raw>/<subject>/` as `<id>_events.tsv` plus `<id>_resp.tsv`;
//! processed artifacts mirror that layout under the processed root. File names
//! are the only place recording identifiers are parsed from paths.

use crate::config::AnalysisConfig;
use crate::error::AnalysisError;
use crate::pipeline::{HrvBiofeedbackArtifact, Preprocessed, Recording, RespArtifact, StudyProcessor};
use crate::summary::SummaryTable;
use crate::types::{EventLog, EventRecord, EventValue, RawEvent, RawEventLog, RecordingId};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const RAW_EVENTS_SUFFIX: &str = "_events.tsv";
const RAW_RESP_SUFFIX: &str = "_resp.tsv";
/// Column holding the respiration channel of a raw recording
pub const RESP_COLUMN: &str = "resp";
pub const SUMMARY_FILE: &str = "summary_all_subjects.tsv";

fn tsv_reader(path: &Path) -> Result<csv::Reader<fs::File>, AnalysisError> {
    Ok(csv::ReaderBuilder::new().delimiter(b'\t').from_path(path)?)
}

fn tsv_writer(path: &Path) -> Result<csv::Writer<fs::File>, AnalysisError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    Ok(csv::WriterBuilder::new().delimiter(b'\t').from_path(path)?)
}

/// Positions of the named columns in a header row
fn column_positions(path: &Path, headers: &csv::StringRecord, names: &[&str]) -> Result<Vec<usize>, AnalysisError> {
    names
        .iter()
        .map(|name| {
            headers.iter().position(|h| h == *name).ok_or_else(|| {
                AnalysisError::Table(format!("{} has no column '{}'", path.display(), name))
            })
        })
        .collect()
}

fn parse_number<T: std::str::FromStr>(path: &Path, raw: &str) -> Result<T, AnalysisError> {
    raw.trim()
        .parse()
        .map_err(|_| AnalysisError::Table(format!("non-numeric cell '{}' in {}", raw, path.display())))
}

/// Read a game log with `event`, `value` and `timestamp` columns
pub fn read_raw_events(path: &Path) -> Result<RawEventLog, AnalysisError> {
    let mut rdr = tsv_reader(path)?;
    let headers = rdr.headers()?.clone();
    let pos = column_positions(path, &headers, &["event", "value", "timestamp"])?;

    let mut events = Vec::new();
    for record in rdr.records() {
        let record = record?;
        let cell = |i: usize| record.get(pos[i]).unwrap_or_default();
        events.push(RawEvent {
            event: cell(0).to_string(),
            value: EventValue::parse(cell(1)),
            timestamp: cell(2).to_string(),
        });
    }
    Ok(RawEventLog::new(events))
}

pub fn write_raw_events(path: &Path, log: &RawEventLog) -> Result<(), AnalysisError> {
    let mut wtr = tsv_writer(path)?;
    wtr.write_record(["event", "value", "timestamp"])?;
    for e in &log.events {
        wtr.write_record([&e.event, &e.value.to_string(), &e.timestamp])?;
    }
    wtr.flush()?;
    Ok(())
}

/// Write a formatted event log; unmapped samples are empty cells
pub fn write_events(path: &Path, log: &EventLog) -> Result<(), AnalysisError> {
    let mut wtr = tsv_writer(path)?;
    wtr.write_record(["event", "value", "timestamp", "sample"])?;
    for r in &log.records {
        let sample = r.sample.map(|s| s.to_string()).unwrap_or_default();
        wtr.write_record([&r.event, &r.value.to_string(), &r.timestamp.to_string(), &sample])?;
    }
    wtr.flush()?;
    Ok(())
}

pub fn read_events(path: &Path) -> Result<EventLog, AnalysisError> {
    let mut rdr = tsv_reader(path)?;
    let headers = rdr.headers()?.clone();
    let pos = column_positions(path, &headers, &["event", "value", "timestamp", "sample"])?;

    let mut records = Vec::new();
    for record in rdr.records() {
        let record = record?;
        let cell = |i: usize| record.get(pos[i]).unwrap_or_default();
        let sample = match cell(3).trim() {
            "" => None,
            raw => Some(parse_number(path, raw)?),
        };
        records.push(EventRecord {
            event: cell(0).to_string(),
            value: EventValue::parse(cell(1)),
            timestamp: parse_number(path, cell(2))?,
            sample,
        });
    }
    Ok(EventLog::new(records))
}

/// Write equal-length numeric columns with four decimals
pub fn write_columns(path: &Path, columns: &[(&str, &[f64])]) -> Result<(), AnalysisError> {
    let len = columns.first().map(|(_, c)| c.len()).unwrap_or(0);
    if let Some((name, _)) = columns.iter().find(|(_, c)| c.len() != len) {
        return Err(AnalysisError::Table(format!(
            "column '{}' does not have {} rows",
            name, len
        )));
    }

    let mut wtr = tsv_writer(path)?;
    wtr.write_record(columns.iter().map(|(name, _)| *name))?;
    for i in 0..len {
        wtr.write_record(columns.iter().map(|(_, c)| format!("{:.4}", c[i])))?;
    }
    wtr.flush()?;
    Ok(())
}

/// Read the named numeric columns of a table
pub fn read_columns(path: &Path, names: &[&str]) -> Result<Vec<Vec<f64>>, AnalysisError> {
    let mut rdr = tsv_reader(path)?;
    let headers = rdr.headers()?.clone();
    let pos = column_positions(path, &headers, names)?;

    let mut columns = vec![Vec::new(); names.len()];
    for record in rdr.records() {
        let record = record?;
        for (column, &p) in columns.iter_mut().zip(&pos) {
            column.push(parse_number(path, record.get(p).unwrap_or_default())?);
        }
    }
    Ok(columns)
}

pub fn read_column(path: &Path, name: &str) -> Result<Vec<f64>, AnalysisError> {
    Ok(read_columns(path, &[name])?.pop().unwrap_or_default())
}

/// Per-recording artifacts written by preprocessing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Artifact {
    Events,
    Ibis,
    Resp,
    HrvBiofeedback,
    RespBiofeedback,
}

impl Artifact {
    pub fn suffix(&self) -> &'static str {
        match self {
            Artifact::Events => "events",
            Artifact::Ibis => "ibis",
            Artifact::Resp => "resp",
            Artifact::HrvBiofeedback => "hrv_biofeedback",
            Artifact::RespBiofeedback => "resp_biofeedback",
        }
    }
}

/// A raw recording found on disk
#[derive(Debug, Clone, PartialEq)]
pub struct RawFiles {
    pub id: RecordingId,
    pub events: PathBuf,
    pub resp: PathBuf,
}

/// Raw and processed directory roots of a study
#[derive(Debug, Clone, PartialEq)]
pub struct Workspace {
    raw_dir: PathBuf,
    processed_dir: PathBuf,
}

impl Workspace {
    pub fn new(raw_dir: impl Into<PathBuf>, processed_dir: impl Into<PathBuf>) -> Self {
        Self {
            raw_dir: raw_dir.into(),
            processed_dir: processed_dir.into(),
        }
    }

    pub fn from_config(config: &AnalysisConfig) -> Self {
        Self::new(config.raw_dir.clone(), config.processed_dir.clone())
    }

    pub fn raw_dir(&self) -> &Path {
        &self.raw_dir
    }

    pub fn processed_dir(&self) -> &Path {
        &self.processed_dir
    }

    pub fn artifact_path(&self, id: &RecordingId, artifact: Artifact) -> PathBuf {
        self.processed_dir
            .join(&id.subject)
            .join(format!("{}_{}.tsv", id, artifact.suffix()))
    }

    pub fn summary_path(&self) -> PathBuf {
        self.processed_dir.join(SUMMARY_FILE)
    }

    /// Create the processed directory of every configured subject
    pub fn ensure_dirs(&self, config: &AnalysisConfig) -> Result<(), AnalysisError> {
        for subject in &config.subjects {
            fs::create_dir_all(self.processed_dir.join(subject))?;
        }
        Ok(())
    }

    /// Raw recordings of one subject, sorted by identifier
    ///
    /// Event logs without a respiration companion (and vice versa) are skipped
    /// with a warning.
    pub fn discover(&self, subject: &str) -> Result<Vec<RawFiles>, AnalysisError> {
        let dir = self.raw_dir.join(subject);
        if !dir.is_dir() {
            warn!(subject, dir = %dir.display(), "No raw directory for subject");
            return Ok(Vec::new());
        }

        let mut names: Vec<String> = fs::read_dir(&dir)?
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| entry.file_name().into_string().ok())
            .collect();
        names.sort();

        let mut found = Vec::new();
        for name in &names {
            if let Some(prefix) = name.strip_suffix(RAW_RESP_SUFFIX) {
                if !names.contains(&format!("{}{}", prefix, RAW_EVENTS_SUFFIX)) {
                    warn!(file = %name, "Respiration file has no matching event log");
                }
                continue;
            }
            let Some(prefix) = name.strip_suffix(RAW_EVENTS_SUFFIX) else {
                continue;
            };
            let Some(id) = RecordingId::from_prefix(prefix) else {
                warn!(file = %name, "Could not parse a recording identifier");
                continue;
            };
            if id.subject != subject {
                warn!(file = %name, subject, "Recording filed under the wrong subject");
                continue;
            }
            let resp = dir.join(format!("{}{}", prefix, RAW_RESP_SUFFIX));
            if !resp.is_file() {
                warn!(recording = %id, "Event log has no matching respiration file");
                continue;
            }
            found.push(RawFiles {
                id,
                events: dir.join(name),
                resp,
            });
        }
        found.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(found)
    }

    pub fn load_recording(&self, files: &RawFiles) -> Result<Recording, AnalysisError> {
        Ok(Recording {
            id: files.id.clone(),
            raw_events: read_raw_events(&files.events)?,
            resp: read_column(&files.resp, RESP_COLUMN)?,
        })
    }

    /// Whether the mandatory artifacts of a recording exist
    pub fn has_preprocessed(&self, id: &RecordingId) -> bool {
        [Artifact::Events, Artifact::Resp]
            .iter()
            .all(|a| self.artifact_path(id, *a).is_file())
    }

    /// Write every artifact of a recording, returning the written paths
    pub fn save_preprocessed(&self, rec: &Preprocessed) -> Result<Vec<PathBuf>, AnalysisError> {
        let mut saved = Vec::new();

        let path = self.artifact_path(&rec.id, Artifact::Events);
        write_events(&path, &rec.events)?;
        saved.push(path);

        let path = self.artifact_path(&rec.id, Artifact::Resp);
        write_columns(
            &path,
            &[
                ("resp", &rec.resp),
                ("resp_filt", &rec.resp_artifact.resp_filt),
                ("inst_amp", &rec.resp_artifact.inst_amp),
            ],
        )?;
        saved.push(path);

        if let Some(ibis) = &rec.ibis {
            let path = self.artifact_path(&rec.id, Artifact::Ibis);
            write_columns(&path, &[("ibis", ibis)])?;
            saved.push(path);
        }
        if let Some(hrv) = &rec.hrv_biofeedback {
            let path = self.artifact_path(&rec.id, Artifact::HrvBiofeedback);
            write_columns(
                &path,
                &[
                    ("local_power_hrv", &hrv.local_power_hrv),
                    ("hrv_biofeedback", &hrv.hrv_biofeedback),
                ],
            )?;
            saved.push(path);
        }
        if let Some(scores) = &rec.original_resp_biofeedback {
            let path = self.artifact_path(&rec.id, Artifact::RespBiofeedback);
            write_columns(&path, &[("original_resp_biofeedback", scores)])?;
            saved.push(path);
        }

        for path in &saved {
            info!(path = %path.display(), "Saved");
        }
        Ok(saved)
    }

    /// Read the artifacts of a recording back; optional ones may be absent
    pub fn load_preprocessed(&self, id: &RecordingId) -> Result<Preprocessed, AnalysisError> {
        let optional = |artifact: Artifact| {
            let path = self.artifact_path(id, artifact);
            path.is_file().then_some(path)
        };

        let events = read_events(&self.artifact_path(id, Artifact::Events))?;
        let mut resp = read_columns(
            &self.artifact_path(id, Artifact::Resp),
            &["resp", "resp_filt", "inst_amp"],
        )?;
        let inst_amp = resp.pop().unwrap_or_default();
        let resp_filt = resp.pop().unwrap_or_default();
        let resp = resp.pop().unwrap_or_default();

        let ibis = optional(Artifact::Ibis)
            .map(|path| read_column(&path, "ibis"))
            .transpose()?;
        let hrv_biofeedback = optional(Artifact::HrvBiofeedback)
            .map(|path| {
                let mut cols = read_columns(&path, &["local_power_hrv", "hrv_biofeedback"])?;
                let hrv_biofeedback = cols.pop().unwrap_or_default();
                let local_power_hrv = cols.pop().unwrap_or_default();
                Ok::<_, AnalysisError>(HrvBiofeedbackArtifact {
                    local_power_hrv,
                    hrv_biofeedback,
                })
            })
            .transpose()?;
        let original_resp_biofeedback = optional(Artifact::RespBiofeedback)
            .map(|path| read_column(&path, "original_resp_biofeedback"))
            .transpose()?;

        Ok(Preprocessed {
            id: id.clone(),
            events,
            resp,
            resp_artifact: RespArtifact { resp_filt, inst_amp },
            ibis,
            hrv_biofeedback,
            original_resp_biofeedback,
        })
    }

    /// Preprocess every raw recording of a subject, reusing saved artifacts
    /// unless `recompute` is set
    pub fn preprocess_subject(
        &self,
        processor: &StudyProcessor,
        subject: &str,
        recompute: bool,
    ) -> Result<Vec<Preprocessed>, AnalysisError> {
        let mut preprocessed = Vec::new();
        for files in self.discover(subject)? {
            if !recompute && self.has_preprocessed(&files.id) {
                debug!(recording = %files.id, "Not re-computing preprocessed artifacts");
                preprocessed.push(self.load_preprocessed(&files.id)?);
                continue;
            }
            let recording = self.load_recording(&files)?;
            if let Some(rec) = processor.try_preprocess(&recording)? {
                self.save_preprocessed(&rec)?;
                preprocessed.push(rec);
            }
        }
        Ok(preprocessed)
    }

    /// Saved artifacts of every discovered recording of a subject
    pub fn load_subject(&self, subject: &str) -> Result<Vec<Preprocessed>, AnalysisError> {
        let mut loaded = Vec::new();
        for files in self.discover(subject)? {
            if self.has_preprocessed(&files.id) {
                loaded.push(self.load_preprocessed(&files.id)?);
            } else {
                warn!(recording = %files.id, "Recording has not been preprocessed");
            }
        }
        Ok(loaded)
    }

    /// Load the study summary, or start an empty one
    pub fn load_or_instantiate_summary(&self, config: &AnalysisConfig) -> Result<SummaryTable, AnalysisError> {
        let path = self.summary_path();
        if path.is_file() {
            debug!(path = %path.display(), "Loading existing summary");
            SummaryTable::load(&path)
        } else {
            Ok(SummaryTable::instantiate(config))
        }
    }

    pub fn save_summary(&self, table: &SummaryTable) -> Result<PathBuf, AnalysisError> {
        let path = self.summary_path();
        fs::create_dir_all(&self.processed_dir)?;
        table.save(&path)?;
        info!(path = %path.display(), "Saved");
        Ok(path)
    }
}
