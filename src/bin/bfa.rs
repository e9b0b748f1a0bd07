//! bfa CLI - Command-line interface for the biofeedback analyses
//!
//! Commands:
//! - init-summary: Write an empty summary table for the configured study
//! - preprocess: Derive per-sample artifacts from the raw recordings
//! - summarize: Aggregate saved artifacts into the summary table
//! - run: Preprocess and summarize in one pass
//! - doctor: Diagnose configuration and workspace layout

use clap::{Parser, Subcommand, ValueEnum};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::info;

use biofeedback_analyses::pipeline::{StageOutcome, StageReport};
use biofeedback_analyses::{
    AnalysisConfig, AnalysisError, StudyProcessor, SummaryTable, Workspace, ANALYSIS_VERSION,
    PRODUCER_NAME,
};

/// bfa - Offline re-analysis of respiration and HRV biofeedback sessions
#[derive(Parser)]
#[command(name = "bfa")]
#[command(version = ANALYSIS_VERSION)]
#[command(about = "Summarize biofeedback game recordings", long_about = None)]
struct Cli {
    /// Analysis configuration (JSON); study defaults when omitted
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log verbosity
    #[arg(long, global = true, default_value = "info")]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write an empty summary table for the configured study
    InitSummary {
        /// Overwrite an existing summary
        #[arg(long)]
        force: bool,
    },

    /// Derive per-sample artifacts from the raw recordings
    Preprocess {
        /// Only process these subjects
        #[arg(short, long)]
        subject: Vec<String>,

        /// Overwrite existing artifacts
        #[arg(long)]
        recompute: bool,
    },

    /// Aggregate saved artifacts into the summary table
    Summarize {
        /// Only process these subjects
        #[arg(short, long)]
        subject: Vec<String>,

        /// Recompute statistics already present in the table
        #[arg(long)]
        recompute: bool,
    },

    /// Preprocess and summarize in one pass
    Run {
        /// Only process these subjects
        #[arg(short, long)]
        subject: Vec<String>,

        /// Recompute artifacts and statistics
        #[arg(long)]
        recompute: bool,
    },

    /// Diagnose configuration and workspace layout
    Doctor {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::from(cli.log_level))
        .with_target(false)
        .with_thread_ids(false)
        .with_writer(std::io::stderr)
        .init();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", serde_json::to_string(&CliError::from(e)).unwrap_or_else(|_| "Unknown error".to_string()));
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), BfaCliError> {
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::InitSummary { force } => cmd_init_summary(&config, force),
        Commands::Preprocess { subject, recompute } => cmd_preprocess(&config, &subject, recompute),
        Commands::Summarize { subject, recompute } => cmd_summarize(&config, &subject, recompute, false),
        Commands::Run { subject, recompute } => cmd_summarize(&config, &subject, recompute, true),
        Commands::Doctor { json } => cmd_doctor(&config, cli.config.as_deref(), json),
    }
}

fn load_config(path: Option<&Path>) -> Result<AnalysisConfig, BfaCliError> {
    match path {
        Some(path) => {
            let json = fs::read_to_string(path)?;
            Ok(AnalysisConfig::from_json(&json)?)
        }
        None => Ok(AnalysisConfig::default()),
    }
}

/// Requested subjects, or every configured one
fn select_subjects(config: &AnalysisConfig, requested: &[String]) -> Result<Vec<String>, BfaCliError> {
    if requested.is_empty() {
        return Ok(config.subjects.clone());
    }
    match requested.iter().find(|s| !config.subjects.contains(*s)) {
        Some(unknown) => Err(BfaCliError::UnknownSubject(unknown.clone())),
        None => Ok(requested.to_vec()),
    }
}

fn cmd_init_summary(config: &AnalysisConfig, force: bool) -> Result<(), BfaCliError> {
    let workspace = Workspace::from_config(config);
    let path = workspace.summary_path();
    if path.exists() && !force {
        return Err(BfaCliError::SummaryExists(path));
    }
    workspace.ensure_dirs(config)?;
    workspace.save_summary(&SummaryTable::instantiate(config))?;
    Ok(())
}

fn cmd_preprocess(config: &AnalysisConfig, subjects: &[String], recompute: bool) -> Result<(), BfaCliError> {
    let workspace = Workspace::from_config(config);
    let processor = StudyProcessor::new(config.clone());
    workspace.ensure_dirs(config)?;

    for subject in select_subjects(config, subjects)? {
        let recordings = workspace.preprocess_subject(&processor, &subject, recompute)?;
        info!(subject = %subject, recordings = recordings.len(), "Preprocessed subject");
    }
    Ok(())
}

/// Summarize saved artifacts, preprocessing first when `preprocess` is set
fn cmd_summarize(
    config: &AnalysisConfig,
    subjects: &[String],
    recompute: bool,
    preprocess: bool,
) -> Result<(), BfaCliError> {
    let workspace = Workspace::from_config(config);
    let table = workspace.load_or_instantiate_summary(config)?;
    let mut processor = StudyProcessor::with_table(config.clone(), table).with_recompute(recompute);
    if preprocess {
        workspace.ensure_dirs(config)?;
    }

    let mut reports: Vec<StageReport> = Vec::new();
    for subject in select_subjects(config, subjects)? {
        let recordings = if preprocess {
            workspace.preprocess_subject(&processor, &subject, recompute)?
        } else {
            workspace.load_subject(&subject)?
        };
        reports.extend(processor.summarize_subject(&recordings)?);
        // Saved per subject
        workspace.save_summary(processor.table())?;
    }

    let count = |f: fn(&StageOutcome) -> bool| reports.iter().filter(|r| f(&r.outcome)).count();
    info!(
        updated = count(|o| matches!(o, StageOutcome::Updated)),
        skipped = count(|o| matches!(o, StageOutcome::Skipped(_))),
        cached = count(|o| matches!(o, StageOutcome::AlreadyComputed)),
        "Summary complete"
    );
    Ok(())
}

fn cmd_doctor(config: &AnalysisConfig, config_path: Option<&Path>, json: bool) -> Result<(), BfaCliError> {
    let workspace = Workspace::from_config(config);
    let mut checks = vec![DoctorCheck::new(
        "config",
        CheckStatus::Ok,
        match config_path {
            Some(path) => format!("Loaded {}", path.display()),
            None => "Using study defaults".to_string(),
        },
    )];

    checks.push(match config.validate() {
        Ok(()) => DoctorCheck::new(
            "parameters",
            CheckStatus::Ok,
            format!(
                "{} Hz, {} subjects × {} sessions",
                config.sample_rate,
                config.subjects.len(),
                config.sessions.len()
            ),
        ),
        Err(e) => DoctorCheck::new("parameters", CheckStatus::Error, e.to_string()),
    });

    checks.push(if workspace.raw_dir().is_dir() {
        let mut found = 0;
        for subject in &config.subjects {
            found += workspace.discover(subject)?.len();
        }
        let expected = config.all_recordings().len();
        let status = if found == expected { CheckStatus::Ok } else { CheckStatus::Warning };
        DoctorCheck::new("raw_recordings", status, format!("Found {} of {} recordings", found, expected))
    } else {
        DoctorCheck::new(
            "raw_recordings",
            CheckStatus::Error,
            format!("Raw directory {} does not exist", workspace.raw_dir().display()),
        )
    });

    let summary_path = workspace.summary_path();
    checks.push(if !summary_path.is_file() {
        DoctorCheck::new("summary", CheckStatus::Warning, "Summary does not exist yet".to_string())
    } else {
        match SummaryTable::load(&summary_path) {
            Ok(table) => DoctorCheck::new(
                "summary",
                CheckStatus::Ok,
                format!("Summary has {} rows", table.rows().len()),
            ),
            Err(e) => DoctorCheck::new("summary", CheckStatus::Error, format!("Cannot read summary: {}", e)),
        }
    });

    let report = DoctorReport {
        producer: PRODUCER_NAME.to_string(),
        version: ANALYSIS_VERSION.to_string(),
        checks,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{} {} doctor", report.producer, report.version);
        for check in &report.checks {
            println!("  {:<7} {:<15} {}", check.status.label(), check.name, check.message);
        }
    }

    if report.has_errors() {
        Err(BfaCliError::DoctorFailed)
    } else {
        Ok(())
    }
}

// Error types

#[derive(Debug, thiserror::Error)]
enum BfaCliError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Analysis(#[from] AnalysisError),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("Subject {0} is not part of the configured study")]
    UnknownSubject(String),
    #[error("{} already exists", .0.display())]
    SummaryExists(PathBuf),
    #[error("One or more health checks failed")]
    DoctorFailed,
}

impl BfaCliError {
    fn code(&self) -> &'static str {
        match self {
            BfaCliError::Io(_) => "IO_ERROR",
            BfaCliError::Json(_) => "JSON_ERROR",
            BfaCliError::UnknownSubject(_) => "UNKNOWN_SUBJECT",
            BfaCliError::SummaryExists(_) => "SUMMARY_EXISTS",
            BfaCliError::DoctorFailed => "DOCTOR_FAILED",
            BfaCliError::Analysis(e) => match e {
                AnalysisError::SyncMismatch(_)
                | AnalysisError::InsufficientSyncPulses(_)
                | AnalysisError::DegenerateSyncFit(_) => "SYNC_ERROR",
                AnalysisError::RowLookup { .. } | AnalysisError::UnknownColumn(_) | AnalysisError::Table(_) => {
                    "TABLE_ERROR"
                }
                AnalysisError::InvalidParameter(_) => "CONFIG_ERROR",
                _ => "ANALYSIS_ERROR",
            },
        }
    }

    fn hint(&self) -> Option<&'static str> {
        match self {
            BfaCliError::Io(_) => Some("Check raw_dir, processed_dir and file permissions"),
            BfaCliError::Json(_) => Some("Check the configuration file's JSON syntax"),
            BfaCliError::UnknownSubject(_) => Some("Add it to 'subjects' in the configuration"),
            BfaCliError::SummaryExists(_) => Some("Pass --force to overwrite it"),
            BfaCliError::DoctorFailed => Some("Fix the checks marked ERR"),
            BfaCliError::Analysis(AnalysisError::SyncMismatch(_)) => {
                Some("Check that the event log belongs to the respiration recording")
            }
            BfaCliError::Analysis(AnalysisError::RowLookup { .. }) => {
                Some("Re-create the summary with 'bfa init-summary --force'")
            }
            BfaCliError::Analysis(AnalysisError::InvalidParameter(_)) => {
                Some("Run 'bfa doctor' to check the configuration")
            }
            BfaCliError::Analysis(_) => None,
        }
    }
}

/// Error as printed to stderr
#[derive(serde::Serialize)]
struct CliError {
    code: &'static str,
    message: String,
    hint: Option<&'static str>,
}

impl From<BfaCliError> for CliError {
    fn from(e: BfaCliError) -> Self {
        CliError {
            code: e.code(),
            message: e.to_string(),
            hint: e.hint(),
        }
    }
}

// Report types

#[derive(serde::Serialize)]
struct DoctorReport {
    producer: String,
    version: String,
    checks: Vec<DoctorCheck>,
}

impl DoctorReport {
    fn has_errors(&self) -> bool {
        self.checks.iter().any(|c| matches!(c.status, CheckStatus::Error))
    }
}

#[derive(serde::Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: CheckStatus,
    message: String,
}

impl DoctorCheck {
    fn new(name: &'static str, status: CheckStatus, message: String) -> Self {
        Self { name, status, message }
    }
}

#[derive(serde::Serialize)]
#[serde(rename_all = "lowercase")]
enum CheckStatus {
    Ok,
    Warning,
    Error,
}

impl CheckStatus {
    fn label(&self) -> &'static str {
        match self {
            CheckStatus::Ok => "[OK]",
            CheckStatus::Warning => "[WARN]",
            CheckStatus::Error => "[ERR]",
        }
    }
}
