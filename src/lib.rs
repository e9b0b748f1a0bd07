//! Biofeedback Analyses - Offline re-analysis of respiration and HRV biofeedback sessions
//!
//! Each recording pairs a game event log with a respiration channel. The
//! analysis reconciles both time bases, derives per-sample physiological
//! series and aggregates them over the game segment into one summary row:
//! event reconciliation → IBI correction → interpolation → respiration and HRV
//! features → biofeedback scores → summary table.
//!
//! ## Modules
//!
//! - **Signal stages**: `events`, `hrv`, `resp`, `biofeedback` and their numeric
//!   building blocks (`filters`, `spectral`, `interpolate`, `artifacts`, `stats`)
//! - **Orchestration**: `pipeline` runs the stages per recording, `summary`
//!   holds the study table and `io` maps recordings to files

pub mod artifacts;
pub mod biofeedback;
pub mod config;
pub mod error;
pub mod events;
pub mod filters;
pub mod hrv;
pub mod interpolate;
pub mod io;
pub mod pipeline;
pub mod resp;
pub mod spectral;
pub mod stats;
pub mod summary;
pub mod types;

pub use config::AnalysisConfig;
pub use error::AnalysisError;
pub use io::Workspace;
pub use pipeline::{Preprocessed, Recording, StageOutcome, StageReport, StudyProcessor};
pub use summary::{SummaryStats, SummaryTable};
pub use types::{EventLog, RawEventLog, RecordingId};

/// Crate version reported by the CLI
pub const ANALYSIS_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Name reported by the CLI
pub const PRODUCER_NAME: &str = "biofeedback-analyses";
