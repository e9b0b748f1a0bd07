//! Error types for biofeedback analyses

use thiserror::Error;

/// Errors that can occur while reconciling, filtering or summarizing a recording
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("Failed to parse timestamp: {0}")]
    TimestampParse(String),

    #[error("Need at least two synchronization pulses, found {0}")]
    InsufficientSyncPulses(usize),

    #[error("Synchronization fit is degenerate: {0}")]
    DegenerateSyncFit(String),

    #[error("Synchronization mismatch: {0}")]
    SyncMismatch(String),

    #[error("Event log has not been mapped to samples")]
    MissingSamples,

    #[error("Missing required event: {0}")]
    MissingEvent(String),

    #[error("Ambiguous event: {0}")]
    AmbiguousEvent(String),

    #[error("Expected exactly one summary row for {id}, found {matches}")]
    RowLookup { id: String, matches: usize },

    #[error("Unknown summary column: {0}")]
    UnknownColumn(String),

    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Signal of length {len} is too short, need more than {min} samples")]
    SignalTooShort { len: usize, min: usize },

    #[error("Malformed table: {0}")]
    Table(String),

    #[error("Invalid JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Delimited table error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl AnalysisError {
    /// Data-availability gaps that skip one recording's stage instead of
    /// aborting the run
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            AnalysisError::MissingEvent(_)
                | AnalysisError::AmbiguousEvent(_)
                | AnalysisError::InsufficientData(_)
                | AnalysisError::SignalTooShort { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_taxonomy() {
        assert!(AnalysisError::MissingEvent("GameStart".to_string()).is_recoverable());
        assert!(AnalysisError::SignalTooShort { len: 3, min: 9 }.is_recoverable());
        assert!(!AnalysisError::SyncMismatch("pulse".to_string()).is_recoverable());
        let lookup = AnalysisError::RowLookup {
            id: "subj-01_sess-01_cond-A".to_string(),
            matches: 2,
        };
        assert!(!lookup.is_recoverable());
        assert_eq!(
            lookup.to_string(),
            "Expected exactly one summary row for subj-01_sess-01_cond-A, found 2"
        );
    }
}
