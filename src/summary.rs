//! Summary table
//!
//! One row per (subject, session, condition). Statistic cells start out empty
//! and are filled by independent summary stages; an empty cell means "not yet
//! computed", which is distinct from a computed zero.

use crate::biofeedback::OriginalRespBiofeedbackStats;
use crate::config::AnalysisConfig;
use crate::error::AnalysisError;
use crate::hrv::{CoherenceStats, HrvStats, LocalPowerHrvStats};
use crate::resp::{BurstStats, RespPowerStats, RespStats};
use crate::types::RecordingId;
use std::io;
use std::path::Path;

/// Identifier columns, in file order
pub const ID_COLUMNS: [&str; 3] = ["subj", "sess", "cond"];

/// Statistic columns, in file order
pub const STAT_COLUMNS: [&str; 22] = [
    "median_resp_amp",
    "median_resp_rate",
    "normalized_median_resp_power",
    "n_bursts",
    "mean_duration_bursts",
    "std_duration_bursts",
    "percent_bursts",
    "hrv_lf",
    "hrv_hf",
    "hrv_vlf",
    "hrv_lf_hf_ratio",
    "hrv_lf_nu",
    "hrv_hf_nu",
    "median_heart_period",
    "coherence_lf",
    "coherence_hf",
    "median_original_resp_biofeedback",
    "median_local_power_hrv",
    "mean_original_resp_biofeedback",
    "mean_local_power_hrv",
    "rmssd",
    "mean_resp_rate",
];

/// A group of named statistics that lands in the summary table together
pub trait SummaryStats {
    /// Columns this group writes
    const COLUMNS: &'static [&'static str];

    fn entries(&self) -> Vec<(&'static str, f64)>;
}

impl SummaryStats for RespStats {
    const COLUMNS: &'static [&'static str] = &["median_resp_rate", "median_resp_amp", "mean_resp_rate"];

    fn entries(&self) -> Vec<(&'static str, f64)> {
        vec![
            ("median_resp_rate", self.median_resp_rate),
            ("median_resp_amp", self.median_resp_amp),
            ("mean_resp_rate", self.mean_resp_rate),
        ]
    }
}

impl SummaryStats for BurstStats {
    const COLUMNS: &'static [&'static str] = &[
        "n_bursts",
        "mean_duration_bursts",
        "std_duration_bursts",
        "percent_bursts",
    ];

    fn entries(&self) -> Vec<(&'static str, f64)> {
        vec![
            ("n_bursts", self.n_bursts),
            ("mean_duration_bursts", self.mean_duration_bursts),
            ("std_duration_bursts", self.std_duration_bursts),
            ("percent_bursts", self.percent_bursts),
        ]
    }
}

impl SummaryStats for RespPowerStats {
    const COLUMNS: &'static [&'static str] = &["normalized_median_resp_power"];

    fn entries(&self) -> Vec<(&'static str, f64)> {
        vec![("normalized_median_resp_power", self.normalized_median_resp_power)]
    }
}

impl SummaryStats for HrvStats {
    const COLUMNS: &'static [&'static str] = &[
        "hrv_vlf",
        "hrv_lf",
        "hrv_hf",
        "hrv_lf_hf_ratio",
        "hrv_lf_nu",
        "hrv_hf_nu",
        "median_heart_period",
        "rmssd",
    ];

    fn entries(&self) -> Vec<(&'static str, f64)> {
        vec![
            ("hrv_vlf", self.hrv_vlf),
            ("hrv_lf", self.hrv_lf),
            ("hrv_hf", self.hrv_hf),
            ("hrv_lf_hf_ratio", self.hrv_lf_hf_ratio),
            ("hrv_lf_nu", self.hrv_lf_nu),
            ("hrv_hf_nu", self.hrv_hf_nu),
            ("median_heart_period", self.median_heart_period),
            ("rmssd", self.rmssd),
        ]
    }
}

impl SummaryStats for CoherenceStats {
    const COLUMNS: &'static [&'static str] = &["coherence_lf", "coherence_hf"];

    fn entries(&self) -> Vec<(&'static str, f64)> {
        vec![
            ("coherence_lf", self.coherence_lf),
            ("coherence_hf", self.coherence_hf),
        ]
    }
}

impl SummaryStats for LocalPowerHrvStats {
    const COLUMNS: &'static [&'static str] = &["median_local_power_hrv", "mean_local_power_hrv"];

    fn entries(&self) -> Vec<(&'static str, f64)> {
        vec![
            ("median_local_power_hrv", self.median_local_power_hrv),
            ("mean_local_power_hrv", self.mean_local_power_hrv),
        ]
    }
}

impl SummaryStats for OriginalRespBiofeedbackStats {
    const COLUMNS: &'static [&'static str] = &[
        "median_original_resp_biofeedback",
        "mean_original_resp_biofeedback",
    ];

    fn entries(&self) -> Vec<(&'static str, f64)> {
        vec![
            ("median_original_resp_biofeedback", self.median_original_resp_biofeedback),
            ("mean_original_resp_biofeedback", self.mean_original_resp_biofeedback),
        ]
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SummaryRow {
    pub id: RecordingId,
    /// One cell per statistic column; `None` until computed
    pub values: Vec<Option<f64>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SummaryTable {
    columns: Vec<String>,
    rows: Vec<SummaryRow>,
}

impl SummaryTable {
    /// Empty table with the standard statistic columns
    pub fn new(ids: Vec<RecordingId>) -> Self {
        let columns: Vec<String> = STAT_COLUMNS.iter().map(|c| c.to_string()).collect();
        let rows = ids
            .into_iter()
            .map(|id| SummaryRow {
                id,
                values: vec![None; columns.len()],
            })
            .collect();
        Self { columns, rows }
    }

    /// One empty row per subject and session of the study
    pub fn instantiate(config: &AnalysisConfig) -> Self {
        Self::new(config.all_recordings())
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[SummaryRow] {
        &self.rows
    }

    /// Index of the single row identified by `id`
    pub fn row_index(&self, id: &RecordingId) -> Result<usize, AnalysisError> {
        let matches: Vec<usize> = self
            .rows
            .iter()
            .enumerate()
            .filter(|(_, row)| row.id == *id)
            .map(|(i, _)| i)
            .collect();
        match matches.as_slice() {
            [only] => Ok(*only),
            _ => Err(AnalysisError::RowLookup {
                id: id.to_string(),
                matches: matches.len(),
            }),
        }
    }

    fn column_index(&self, column: &str) -> Result<usize, AnalysisError> {
        self.columns
            .iter()
            .position(|c| c == column)
            .ok_or_else(|| AnalysisError::UnknownColumn(column.to_string()))
    }

    /// Overwrite the named cells of one row, leaving the others untouched
    pub fn update_entries(&mut self, id: &RecordingId, entries: &[(&str, f64)]) -> Result<(), AnalysisError> {
        let row = self.row_index(id)?;
        let cells = entries
            .iter()
            .map(|(column, value)| Ok((self.column_index(column)?, *value)))
            .collect::<Result<Vec<_>, AnalysisError>>()?;
        for (col, value) in cells {
            self.rows[row].values[col] = Some(value);
        }
        Ok(())
    }

    pub fn update<S: SummaryStats>(&mut self, id: &RecordingId, stats: &S) -> Result<(), AnalysisError> {
        self.update_entries(id, &stats.entries())
    }

    /// Whether any of `columns` already holds a value for `id`
    pub fn is_computed(&self, id: &RecordingId, columns: &[&str]) -> Result<bool, AnalysisError> {
        let row = self.row_index(id)?;
        for column in columns {
            if self.rows[row].values[self.column_index(column)?].is_some() {
                return Ok(true);
            }
        }
        Ok(false)
    }

    pub fn value(&self, id: &RecordingId, column: &str) -> Result<Option<f64>, AnalysisError> {
        let row = self.row_index(id)?;
        Ok(self.rows[row].values[self.column_index(column)?])
    }

    /// Write as a tab-separated table; missing values are empty cells
    pub fn to_writer<W: io::Write>(&self, writer: W) -> Result<(), AnalysisError> {
        let mut wtr = csv::WriterBuilder::new().delimiter(b'\t').from_writer(writer);
        wtr.write_record(ID_COLUMNS.iter().copied().chain(self.columns.iter().map(String::as_str)))?;
        for row in &self.rows {
            let mut record = vec![
                row.id.subject.clone(),
                row.id.session.clone(),
                row.id.condition.clone(),
            ];
            record.extend(
                row.values
                    .iter()
                    .map(|v| v.map(|x| x.to_string()).unwrap_or_default()),
            );
            wtr.write_record(&record)?;
        }
        wtr.flush()?;
        Ok(())
    }

    pub fn from_reader<R: io::Read>(reader: R) -> Result<Self, AnalysisError> {
        let mut rdr = csv::ReaderBuilder::new().delimiter(b'\t').from_reader(reader);
        let headers = rdr.headers()?.clone();
        let names: Vec<&str> = headers.iter().collect();
        if names.len() < ID_COLUMNS.len() || names[..ID_COLUMNS.len()] != ID_COLUMNS {
            return Err(AnalysisError::Table(format!(
                "summary header must start with {}, got {:?}",
                ID_COLUMNS.join(", "),
                names
            )));
        }
        let columns: Vec<String> = names[ID_COLUMNS.len()..].iter().map(|c| c.to_string()).collect();

        let mut rows = Vec::new();
        for record in rdr.records() {
            let record = record?;
            let cell = |i: usize| record.get(i).unwrap_or_default();
            let id = RecordingId::new(cell(0), cell(1), cell(2));
            let values = (ID_COLUMNS.len()..ID_COLUMNS.len() + columns.len())
                .map(|i| parse_cell(cell(i)))
                .collect::<Result<Vec<_>, _>>()?;
            rows.push(SummaryRow { id, values });
        }
        Ok(Self { columns, rows })
    }

    pub fn save(&self, path: &Path) -> Result<(), AnalysisError> {
        let file = std::fs::File::create(path)?;
        self.to_writer(io::BufWriter::new(file))
    }

    pub fn load(path: &Path) -> Result<Self, AnalysisError> {
        let file = std::fs::File::open(path)?;
        Self::from_reader(io::BufReader::new(file))
    }
}

fn parse_cell(raw: &str) -> Result<Option<f64>, AnalysisError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    trimmed
        .parse::<f64>()
        .map(Some)
        .map_err(|_| AnalysisError::Table(format!("non-numeric summary cell '{}'", trimmed)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn id(subject: &str, session: &str, condition: &str) -> RecordingId {
        RecordingId::new(subject, session, condition)
    }

    fn small_table() -> SummaryTable {
        SummaryTable::new(vec![
            id("subj-01", "sess-01", "cond-A"),
            id("subj-01", "sess-02", "cond-B"),
        ])
    }

    #[test]
    fn test_instantiate_covers_study() {
        let table = SummaryTable::instantiate(&AnalysisConfig::default());
        assert_eq!(table.rows().len(), 90);
        assert_eq!(table.columns().len(), STAT_COLUMNS.len());
        assert!(table.rows().iter().all(|r| r.values.iter().all(Option::is_none)));
    }

    #[test]
    fn test_row_lookup() {
        let mut table = small_table();
        assert_eq!(table.row_index(&id("subj-01", "sess-02", "cond-B")).unwrap(), 1);

        let missing = table.row_index(&id("subj-01", "sess-02", "cond-A"));
        assert!(matches!(missing, Err(AnalysisError::RowLookup { matches: 0, .. })));

        table.rows.push(table.rows[0].clone());
        let duplicate = table.row_index(&id("subj-01", "sess-01", "cond-A"));
        assert!(matches!(duplicate, Err(AnalysisError::RowLookup { matches: 2, .. })));
    }

    #[test]
    fn test_update_touches_only_named_columns() {
        let mut table = small_table();
        let target = id("subj-01", "sess-01", "cond-A");
        let stats = CoherenceStats {
            coherence_lf: 0.4,
            coherence_hf: 0.0,
        };
        assert!(!table.is_computed(&target, CoherenceStats::COLUMNS).unwrap());
        table.update(&target, &stats).unwrap();

        assert!(table.is_computed(&target, CoherenceStats::COLUMNS).unwrap());
        assert_eq!(table.value(&target, "coherence_lf").unwrap(), Some(0.4));
        assert_eq!(table.value(&target, "coherence_hf").unwrap(), Some(0.0));
        assert_eq!(table.value(&target, "hrv_lf").unwrap(), None);
        assert!(table.rows()[1].values.iter().all(Option::is_none));
    }

    #[test]
    fn test_unknown_column_leaves_row_untouched() {
        let mut table = small_table();
        let target = id("subj-01", "sess-01", "cond-A");
        let result = table.update_entries(&target, &[("hrv_lf", 1.0), ("bogus", 2.0)]);
        assert!(matches!(result, Err(AnalysisError::UnknownColumn(_))));
        assert_eq!(table.value(&target, "hrv_lf").unwrap(), None);
    }

    #[test]
    fn test_tsv_preserves_missing_and_zero() {
        let mut table = small_table();
        let target = id("subj-01", "sess-02", "cond-B");
        table.update_entries(&target, &[("n_bursts", 0.0), ("hrv_lf", 12.5)]).unwrap();

        let mut buffer = Vec::new();
        table.to_writer(&mut buffer).unwrap();
        let text = String::from_utf8(buffer.clone()).unwrap();
        assert!(text.starts_with("subj\tsess\tcond\tmedian_resp_amp\t"));

        let loaded = SummaryTable::from_reader(buffer.as_slice()).unwrap();
        assert_eq!(loaded, table);
        assert_eq!(loaded.value(&target, "n_bursts").unwrap(), Some(0.0));
        assert_eq!(loaded.value(&target, "median_resp_amp").unwrap(), None);
    }

    #[test]
    fn test_rejects_malformed_header() {
        let result = SummaryTable::from_reader("subject\tsess\tcond\n".as_bytes());
        assert!(matches!(result, Err(AnalysisError::Table(_))));
    }
}
