//! Core types for the biofeedback analyses
//!
//! This module defines the data structures that flow through each stage of the
//! analysis: recording identifiers, event logs before and after time-base
//! reconciliation, and the affine synchronization fit.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Structured identity of a single recording
///
/// Threaded through every stage instead of being re-derived from file names.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordingId {
    /// Subject label (e.g. "subj-01")
    pub subject: String,
    /// Session label (e.g. "sess-03")
    pub session: String,
    /// Condition label (e.g. "cond-B")
    pub condition: String,
}

impl RecordingId {
    pub fn new(
        subject: impl Into<String>,
        session: impl Into<String>,
        condition: impl Into<String>,
    ) -> Self {
        Self {
            subject: subject.into(),
            session: session.into(),
            condition: condition.into(),
        }
    }

    /// Parse an identifier from the `subj-XX_sess-XX_cond-X` prefix of a name
    ///
    /// Only used at the file-system boundary.
    pub fn from_prefix(name: &str) -> Option<Self> {
        let mut parts = name.split('_');
        let subject = parts.next().filter(|s| s.starts_with("subj-"))?;
        let session = parts.next().filter(|s| s.starts_with("sess-"))?;
        let condition = parts.next().filter(|s| s.starts_with("cond-"))?;
        Some(Self::new(subject, session, condition))
    }
}

impl fmt::Display for RecordingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}_{}", self.subject, self.session, self.condition)
    }
}

/// Value column of an event record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EventValue {
    Number(f64),
    Text(String),
}

impl EventValue {
    /// Parse a raw table cell, preferring a numeric interpretation
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        match trimmed.parse::<f64>() {
            Ok(v) => EventValue::Number(v),
            Err(_) => EventValue::Text(trimmed.to_string()),
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            EventValue::Number(v) => Some(*v),
            EventValue::Text(s) => s.trim().parse().ok(),
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            EventValue::Text(s) => Some(s.as_str()),
            EventValue::Number(_) => None,
        }
    }
}

impl fmt::Display for EventValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventValue::Number(v) => write!(f, "{}", v),
            EventValue::Text(s) => f.write_str(s),
        }
    }
}

/// An event as logged by the game, before any time-base reconciliation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawEvent {
    pub event: String,
    pub value: EventValue,
    /// ISO-8601 wall-clock timestamp
    pub timestamp: String,
}

/// Event log as read from the game's trigger file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawEventLog {
    pub events: Vec<RawEvent>,
}

impl RawEventLog {
    pub fn new(events: Vec<RawEvent>) -> Self {
        Self { events }
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

/// A single event on the recording-relative time base
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub event: String,
    pub value: EventValue,
    /// Seconds since the first event of the log
    pub timestamp: f64,
    /// Sample of the physiological recording, once mapped
    pub sample: Option<i64>,
}

/// Event log on the recording-relative time base
///
/// Produced by the formatting stages in [`crate::events`]; each stage returns a
/// new log rather than mutating its input.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventLog {
    pub records: Vec<EventRecord>,
}

impl EventLog {
    pub fn new(records: Vec<EventRecord>) -> Self {
        Self { records }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Iterate over the records of a given event kind
    pub fn of_kind<'a>(&'a self, event: &'a str) -> impl Iterator<Item = &'a EventRecord> + 'a {
        self.records.iter().filter(move |r| r.event == event)
    }

    /// Whether every record carries a sample index
    pub fn has_samples(&self) -> bool {
        self.records.iter().all(|r| r.sample.is_some())
    }
}

/// Affine mapping from recording-relative seconds to physiological samples
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SyncFit {
    /// Samples per second
    pub slope: f64,
    /// Sample at which the first event occurred
    pub intercept: f64,
}

impl SyncFit {
    /// Sample (unrounded) corresponding to `seconds`
    pub fn predict(&self, seconds: f64) -> f64 {
        self.intercept + seconds * self.slope
    }

    /// Sample index (rounded to nearest) corresponding to `seconds`
    pub fn to_sample(&self, seconds: f64) -> i64 {
        self.predict(seconds).round() as i64
    }
}
