//! End-to-end run over a synthetic recording on disk

use biofeedback_analyses::config::SessionSpec;
use biofeedback_analyses::io::{write_columns, write_raw_events, Artifact, RESP_COLUMN};
use biofeedback_analyses::types::{EventValue, RawEvent};
use biofeedback_analyses::{
    AnalysisConfig, RawEventLog, RecordingId, StageOutcome, StudyProcessor, SummaryTable, Workspace,
};
use chrono::{Duration, NaiveDate};
use pretty_assertions::assert_eq;
use std::f64::consts::PI;
use tempfile::TempDir;

const SFREQ: f64 = 10.0;
/// Device sample count at the first logged event
const DEVICE_OFFSET: f64 = 50.0;
const BREATH_HZ: f64 = 0.1;

fn timestamp(seconds: f64) -> String {
    let t0 = NaiveDate::from_ymd_opt(2022, 5, 3)
        .and_then(|d| d.and_hms_opt(10, 0, 0))
        .unwrap();
    (t0 + Duration::milliseconds((seconds * 1000.0).round() as i64))
        .format("%Y-%m-%dT%H:%M:%S%.3f")
        .to_string()
}

fn event(event: &str, value: EventValue, seconds: f64) -> (f64, RawEvent) {
    (
        seconds,
        RawEvent {
            event: event.to_string(),
            value,
            timestamp: timestamp(seconds),
        },
    )
}

/// Six breaths per minute with heart period following the breathing cycle
fn synthetic_recording() -> (RawEventLog, Vec<f64>) {
    let mut events = Vec::new();
    for k in 0..40 {
        let t = 10.0 * k as f64;
        events.push(event(
            "bitalino.synchronize",
            EventValue::Number(DEVICE_OFFSET + SFREQ * t),
            t,
        ));
    }
    events.push(event("UnityEvent", EventValue::Text("0;0;GameStart".to_string()), 20.0));
    events.push(event("UnityEvent", EventValue::Text("0;0;GameEnd".to_string()), 380.0));
    for k in 20..380 {
        events.push(event("Feedback", EventValue::Number(0.6), k as f64));
    }

    let mut t = 1.0;
    while t < 385.0 {
        let ibi_ms = 1000.0 + 50.0 * (2.0 * PI * BREATH_HZ * t).sin();
        t += ibi_ms / 1000.0;
        let ticks = (ibi_ms * 1.024).round();
        events.push(event("InterBeatInterval", EventValue::Number(ticks), t));
    }

    events.sort_by(|a, b| a.0.total_cmp(&b.0));
    let log = RawEventLog::new(events.into_iter().map(|(_, e)| e).collect());

    let n = (DEVICE_OFFSET + SFREQ * 400.0) as usize;
    let resp = (0..n)
        .map(|i| {
            let t = (i as f64 - DEVICE_OFFSET) / SFREQ;
            (2.0 * PI * BREATH_HZ * t).sin()
        })
        .collect();
    (log, resp)
}

fn study(dir: &TempDir) -> (AnalysisConfig, RecordingId) {
    let config = AnalysisConfig {
        subjects: vec!["subj-01".to_string()],
        sessions: vec![SessionSpec {
            session: "sess-01".to_string(),
            condition: "cond-A".to_string(),
        }],
        raw_dir: dir.path().join("raw"),
        processed_dir: dir.path().join("processed"),
        ..AnalysisConfig::default()
    };
    let id = RecordingId::new("subj-01", "sess-01", "cond-A");

    let (log, resp) = synthetic_recording();
    let subject_dir = config.raw_dir.join("subj-01");
    write_raw_events(&subject_dir.join(format!("{}_events.tsv", id)), &log).unwrap();
    write_columns(&subject_dir.join(format!("{}_resp.tsv", id)), &[(RESP_COLUMN, &resp[..])]).unwrap();
    (config, id)
}

#[test]
fn test_study_end_to_end() {
    let dir = TempDir::new().unwrap();
    let (config, id) = study(&dir);
    let workspace = Workspace::from_config(&config);
    let mut processor = StudyProcessor::new(config.clone());

    let recordings = workspace.preprocess_subject(&processor, "subj-01", false).unwrap();
    assert_eq!(recordings.len(), 1);
    let rec = &recordings[0];
    assert!(rec.ibis.is_some());
    assert!(rec.hrv_biofeedback.is_some());
    assert!(rec.original_resp_biofeedback.is_some());
    for artifact in [
        Artifact::Events,
        Artifact::Resp,
        Artifact::Ibis,
        Artifact::HrvBiofeedback,
        Artifact::RespBiofeedback,
    ] {
        assert!(workspace.artifact_path(&id, artifact).is_file());
    }

    let reports = processor.summarize_subject(&recordings).unwrap();
    assert_eq!(reports.len(), 6);
    for report in &reports {
        assert_eq!(report.outcome, StageOutcome::Updated, "stage {}", report.stage);
    }

    let table = processor.table();
    let value = |column: &str| table.value(&id, column).unwrap().unwrap();
    assert!((value("median_resp_rate") - 6.0).abs() < 0.5);
    assert!((value("median_heart_period") - 1000.0).abs() < 20.0);
    assert!(value("hrv_lf") > value("hrv_hf"));
    assert!(value("hrv_lf_nu") > 50.0);
    assert!((value("median_original_resp_biofeedback") - 0.6).abs() < 1e-9);
    assert!(value("median_local_power_hrv") > 0.0);
    assert!((0.0..=1.0).contains(&value("coherence_lf")));
    assert_eq!(value("n_bursts"), 0.0);

    workspace.save_summary(table).unwrap();
    let reloaded = SummaryTable::load(&workspace.summary_path()).unwrap();
    assert_eq!(reloaded.rows().len(), 1);
    assert_eq!(
        reloaded.value(&id, "median_heart_period").unwrap(),
        table.value(&id, "median_heart_period").unwrap()
    );
}

#[test]
fn test_rerun_reuses_saved_work() {
    let dir = TempDir::new().unwrap();
    let (config, id) = study(&dir);
    let workspace = Workspace::from_config(&config);
    let mut processor = StudyProcessor::new(config.clone());

    let recordings = workspace.preprocess_subject(&processor, "subj-01", false).unwrap();
    processor.summarize_subject(&recordings).unwrap();
    let first = processor.table().value(&id, "median_resp_rate").unwrap();

    let cached = workspace.load_subject("subj-01").unwrap();
    assert_eq!(cached.len(), 1);
    assert_eq!(cached[0].events, recordings[0].events);

    let reports = processor.summarize_subject(&cached).unwrap();
    assert!(reports
        .iter()
        .all(|r| r.outcome == StageOutcome::AlreadyComputed));
    assert_eq!(processor.table().value(&id, "median_resp_rate").unwrap(), first);
}

#[test]
fn test_recording_without_heart_data_is_skipped() {
    let dir = TempDir::new().unwrap();
    let (config, id) = study(&dir);

    let (log, resp) = synthetic_recording();
    let log = RawEventLog::new(
        log.events
            .into_iter()
            .filter(|e| e.event != "InterBeatInterval")
            .collect(),
    );
    let recording = biofeedback_analyses::Recording {
        id: id.clone(),
        raw_events: log,
        resp,
    };

    let mut processor = StudyProcessor::new(config);
    let reports = processor.process_subject(&[recording]).unwrap();
    let outcome = |stage: &str| {
        reports
            .iter()
            .find(|r| r.stage == stage)
            .map(|r| r.outcome.clone())
            .unwrap()
    };
    assert_eq!(outcome("resp"), StageOutcome::Updated);
    assert!(matches!(outcome("heart"), StageOutcome::Skipped(_)));
    assert!(matches!(outcome("coherence"), StageOutcome::Skipped(_)));
    assert!(matches!(outcome("hrv_biofeedback"), StageOutcome::Skipped(_)));
    assert_eq!(processor.table().value(&id, "rmssd").unwrap(), None);
}
