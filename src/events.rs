//! Time-base reconciliation
//!
//! The game logs events with wall-clock timestamps, while the physiological
//! recording counts samples. Synchronization pulses pair both clocks; an affine
//! least-squares fit over the pulses maps every event onto the sample axis.
//!
//! Formatting is a sequence of pure transformations:
//! relative times → sample mapping → wrapped-event specialization → IBI units.

use crate::error::AnalysisError;
use crate::types::{EventLog, EventRecord, EventValue, RawEventLog, SyncFit};
use chrono::{DateTime, NaiveDateTime, Utc};
use tracing::warn;

/// Synchronization pulse; value is the device sample count
pub const SYNC_EVENT: &str = "bitalino.synchronize";
/// Inter-beat interval notification; value in 1/1024 s ticks (ms once formatted)
pub const IBI_EVENT: &str = "InterBeatInterval";
/// Generic game event whose name is the third `;`-field of its value
pub const WRAPPED_EVENT: &str = "UnityEvent";
/// Real-time biofeedback score in [0, 1]
pub const FEEDBACK_EVENT: &str = "Feedback";
pub const GAME_START_EVENT: &str = "GameStart";
pub const GAME_END_EVENT: &str = "GameEnd";

/// IBI tick duration of the chest belt (1/1024 s) expressed in milliseconds
const IBI_TICK_MS: f64 = 1000.0 / 1024.0;

/// Parse an ISO-8601 timestamp, with or without offset (naive times are UTC)
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, AnalysisError> {
    let trimmed = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Ok(naive.and_utc());
        }
    }
    Err(AnalysisError::TimestampParse(trimmed.to_string()))
}

/// Convert wall-clock timestamps to seconds elapsed since the first event
pub fn to_relative_times(raw: &RawEventLog) -> Result<EventLog, AnalysisError> {
    let instants = raw
        .events
        .iter()
        .map(|e| parse_timestamp(&e.timestamp))
        .collect::<Result<Vec<_>, _>>()?;

    let Some(&t_zero) = instants.first() else {
        return Ok(EventLog::default());
    };

    let records = raw
        .events
        .iter()
        .zip(&instants)
        .map(|(event, instant)| {
            let elapsed = *instant - t_zero;
            let seconds = elapsed
                .num_microseconds()
                .map(|us| us as f64 / 1e6)
                .unwrap_or_else(|| elapsed.num_milliseconds() as f64 / 1e3);
            EventRecord {
                event: event.event.clone(),
                value: event.value.clone(),
                timestamp: seconds,
                sample: None,
            }
        })
        .collect();

    Ok(EventLog::new(records))
}

/// Least-squares fit of device samples against recording-relative seconds
pub fn fit_sync(seconds: &[f64], samples: &[f64]) -> Result<SyncFit, AnalysisError> {
    if seconds.len() != samples.len() {
        return Err(AnalysisError::InvalidParameter(format!(
            "{} pulse times but {} pulse samples",
            seconds.len(),
            samples.len()
        )));
    }
    let n = seconds.len();
    if n < 2 {
        return Err(AnalysisError::InsufficientSyncPulses(n));
    }

    let mean_x = seconds.iter().sum::<f64>() / n as f64;
    let mean_y = samples.iter().sum::<f64>() / n as f64;
    let (mut sxx, mut sxy) = (0.0, 0.0);
    for (x, y) in seconds.iter().zip(samples) {
        sxx += (x - mean_x) * (x - mean_x);
        sxy += (x - mean_x) * (y - mean_y);
    }
    if sxx <= f64::EPSILON {
        return Err(AnalysisError::DegenerateSyncFit(
            "all synchronization pulses share the same timestamp".to_string(),
        ));
    }

    let slope = sxy / sxx;
    Ok(SyncFit {
        slope,
        intercept: mean_y - slope * mean_x,
    })
}

/// Fit the seconds-to-samples mapping from the log's synchronization pulses
pub fn sync_fit(log: &EventLog) -> Result<SyncFit, AnalysisError> {
    let seconds = event_times(log, SYNC_EVENT);
    let samples = event_values(log, SYNC_EVENT)?;
    fit_sync(&seconds, &samples)
}

/// Map every event onto the physiological sample axis
///
/// The fit is checked against the pulses it was derived from: each pulse's
/// predicted sample must lie within `n_pulses` of its recorded sample. With
/// `drop_after_last_pulse`, events logged after the recording stopped are removed.
pub fn map_to_samples(log: &EventLog, drop_after_last_pulse: bool) -> Result<EventLog, AnalysisError> {
    let fit = sync_fit(log)?;
    let pulse_samples = event_values(log, SYNC_EVENT)?;
    let tolerance = pulse_samples.len() as f64;

    for (record, recorded) in log.of_kind(SYNC_EVENT).zip(&pulse_samples) {
        let predicted = fit.to_sample(record.timestamp) as f64;
        if (predicted - recorded).abs() > tolerance {
            return Err(AnalysisError::SyncMismatch(format!(
                "pulse at {:.3} s maps to sample {} but was recorded at sample {}",
                record.timestamp, predicted, recorded
            )));
        }
    }

    let last_pulse = pulse_samples.iter().copied().fold(f64::MIN, f64::max);
    let records = log
        .records
        .iter()
        .map(|r| EventRecord {
            sample: Some(fit.to_sample(r.timestamp)),
            ..r.clone()
        })
        .filter(|r| !drop_after_last_pulse || r.sample.map_or(true, |s| s as f64 <= last_pulse))
        .collect();

    Ok(EventLog::new(records))
}

/// Replace generic wrapped events with the specific name carried in their value
pub fn specify_wrapped_events(log: &EventLog) -> Result<EventLog, AnalysisError> {
    let records = log
        .records
        .iter()
        .map(|r| {
            if r.event != WRAPPED_EVENT {
                return Ok(r.clone());
            }
            let value = r.value.to_string();
            let name = value.split(';').nth(2).ok_or_else(|| {
                AnalysisError::MissingEvent(format!(
                    "wrapped event value '{}' has no name field",
                    value
                ))
            })?;
            Ok(EventRecord {
                event: name.trim().to_string(),
                ..r.clone()
            })
        })
        .collect::<Result<Vec<_>, AnalysisError>>()?;

    Ok(EventLog::new(records))
}

/// Convert IBIs from 1/1024 s ticks to milliseconds
pub fn ibis_to_ms(log: &EventLog) -> Result<EventLog, AnalysisError> {
    let records = log
        .records
        .iter()
        .map(|r| {
            if r.event != IBI_EVENT {
                return Ok(r.clone());
            }
            let ticks = r.value.as_f64().ok_or_else(|| {
                AnalysisError::InvalidParameter(format!("non-numeric IBI value '{}'", r.value))
            })?;
            Ok(EventRecord {
                value: EventValue::Number(ticks.trunc() * IBI_TICK_MS),
                ..r.clone()
            })
        })
        .collect::<Result<Vec<_>, AnalysisError>>()?;

    Ok(EventLog::new(records))
}

/// Run all formatting stages on a raw log
pub fn format_events(raw: &RawEventLog) -> Result<EventLog, AnalysisError> {
    let relative = to_relative_times(raw)?;
    let sampled = map_to_samples(&relative, true)?;
    let specified = specify_wrapped_events(&sampled)?;
    ibis_to_ms(&specified)
}

/// Occurrences of an event in recording-relative seconds
pub fn event_times(log: &EventLog, event: &str) -> Vec<f64> {
    log.of_kind(event).map(|r| r.timestamp).collect()
}

/// Occurrences of an event as physiological samples
pub fn event_samples(log: &EventLog, event: &str) -> Result<Vec<i64>, AnalysisError> {
    log.of_kind(event)
        .map(|r| r.sample.ok_or(AnalysisError::MissingSamples))
        .collect()
}

/// Numeric values of an event
pub fn event_values(log: &EventLog, event: &str) -> Result<Vec<f64>, AnalysisError> {
    log.of_kind(event)
        .map(|r| {
            r.value.as_f64().ok_or_else(|| {
                AnalysisError::InvalidParameter(format!(
                    "non-numeric value '{}' for event {}",
                    r.value, event
                ))
            })
        })
        .collect()
}

/// Sample range `[begin, end)` of the game segment
///
/// A restarted game logs several starts; the latest one is used.
pub fn game_segment(log: &EventLog) -> Result<(usize, usize), AnalysisError> {
    let begins = event_samples(log, GAME_START_EVENT)?;
    let ends = event_samples(log, GAME_END_EVENT)?;

    let begin = match begins.as_slice() {
        [] => return Err(AnalysisError::MissingEvent(GAME_START_EVENT.to_string())),
        [only] => *only,
        [.., last] => {
            warn!(count = begins.len(), "found several GameStart events, using the latest");
            *last
        }
    };
    let end = match ends.as_slice() {
        [] => return Err(AnalysisError::MissingEvent(GAME_END_EVENT.to_string())),
        [only] => *only,
        _ => {
            return Err(AnalysisError::AmbiguousEvent(format!(
                "found {} GameEnd events",
                ends.len()
            )))
        }
    };
    if end < begin {
        return Err(AnalysisError::AmbiguousEvent(format!(
            "GameEnd (sample {}) precedes GameStart (sample {})",
            end, begin
        )));
    }

    Ok((begin.max(0) as usize, end.max(0) as usize))
}

/// Slice a per-sample series to a segment, clamped to its length
pub fn slice_segment(series: &[f64], (begin, end): (usize, usize)) -> &[f64] {
    let end = end.min(series.len());
    let begin = begin.min(end);
    &series[begin..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RawEvent;
    use pretty_assertions::assert_eq;

    fn raw(event: &str, value: &str, timestamp: &str) -> RawEvent {
        RawEvent {
            event: event.to_string(),
            value: EventValue::parse(value),
            timestamp: timestamp.to_string(),
        }
    }

    /// Pulses every second at 10 Hz, with the first event 2.5 s into the recording
    fn sample_log() -> RawEventLog {
        RawEventLog::new(vec![
            raw(SYNC_EVENT, "25", "2019-11-26T14:00:00.000"),
            raw(IBI_EVENT, "1024", "2019-11-26T14:00:00.300"),
            raw(WRAPPED_EVENT, "x;y;GameStart;z", "2019-11-26T14:00:00.500"),
            raw(SYNC_EVENT, "35", "2019-11-26T14:00:01.000"),
            raw(FEEDBACK_EVENT, "0.5", "2019-11-26T14:00:01.200"),
            raw(SYNC_EVENT, "45", "2019-11-26T14:00:02.000"),
            raw(WRAPPED_EVENT, "x;y;GameEnd;z", "2019-11-26T14:00:02.000"),
            raw(SYNC_EVENT, "55", "2019-11-26T14:00:03.000"),
            raw(FEEDBACK_EVENT, "0.7", "2019-11-26T14:00:04.000"),
        ])
    }

    #[test]
    fn test_parse_timestamp_variants() {
        let a = parse_timestamp("2019-11-26T14:00:00.250").unwrap();
        let b = parse_timestamp("2019-11-26 14:00:00.250").unwrap();
        let c = parse_timestamp("2019-11-26T15:00:00.250+01:00").unwrap();
        assert_eq!(a, b);
        assert_eq!(a, c);
        assert!(parse_timestamp("yesterday").is_err());
    }

    #[test]
    fn test_relative_times_start_at_zero() {
        let log = to_relative_times(&sample_log()).unwrap();
        assert_eq!(log.records[0].timestamp, 0.0);
        assert!((log.records[1].timestamp - 0.3).abs() < 1e-9);
        assert!((log.records[8].timestamp - 4.0).abs() < 1e-9);
    }

    #[test]
    fn test_fit_recovers_exact_affine_mapping() {
        let seconds = [0.0, 1.0, 2.0, 3.0, 7.5];
        let samples: Vec<f64> = seconds.iter().map(|s| 10.0 * s + 25.0).collect();
        let fit = fit_sync(&seconds, &samples).unwrap();
        assert!((fit.slope - 10.0).abs() < 1e-12);
        assert!((fit.intercept - 25.0).abs() < 1e-12);
        for (s, expected) in seconds.iter().zip(&samples) {
            assert_eq!(fit.to_sample(*s) as f64, *expected);
        }
    }

    #[test]
    fn test_fit_needs_two_pulses() {
        assert!(matches!(
            fit_sync(&[1.0], &[10.0]),
            Err(AnalysisError::InsufficientSyncPulses(1))
        ));
        assert!(matches!(
            fit_sync(&[1.0, 1.0], &[10.0, 20.0]),
            Err(AnalysisError::DegenerateSyncFit(_))
        ));
    }

    #[test]
    fn test_map_to_samples_and_drop_trailing() {
        let relative = to_relative_times(&sample_log()).unwrap();

        let kept = map_to_samples(&relative, false).unwrap();
        assert_eq!(kept.len(), 9);
        assert_eq!(kept.records[1].sample, Some(28));
        assert_eq!(kept.records[8].sample, Some(65));

        let dropped = map_to_samples(&relative, true).unwrap();
        assert_eq!(dropped.len(), 8);
        assert!(dropped.records.iter().all(|r| r.sample.unwrap() <= 55));
    }

    #[test]
    fn test_map_to_samples_rejects_wrong_pulse() {
        let mut log = to_relative_times(&sample_log()).unwrap();
        // Corrupt one pulse far beyond tolerance
        log.records[5].value = EventValue::Number(145.0);
        assert!(matches!(
            map_to_samples(&log, false),
            Err(AnalysisError::SyncMismatch(_))
        ));
    }

    #[test]
    fn test_format_events() {
        let log = format_events(&sample_log()).unwrap();

        let names: Vec<&str> = log.records.iter().map(|r| r.event.as_str()).collect();
        assert!(names.contains(&GAME_START_EVENT));
        assert!(names.contains(&GAME_END_EVENT));
        assert!(!names.contains(&WRAPPED_EVENT));

        let ibis = event_values(&log, IBI_EVENT).unwrap();
        assert_eq!(ibis, vec![1000.0]);

        assert_eq!(game_segment(&log).unwrap(), (30, 45));
        assert_eq!(event_samples(&log, FEEDBACK_EVENT).unwrap(), vec![37]);
    }

    #[test]
    fn test_game_segment_restart_and_missing() {
        let mut log = format_events(&sample_log()).unwrap();
        let mut restart = log.records[2].clone();
        restart.sample = Some(40);
        log.records.insert(3, restart);
        assert_eq!(game_segment(&log).unwrap(), (40, 45));

        log.records.retain(|r| r.event != GAME_START_EVENT);
        assert!(matches!(
            game_segment(&log),
            Err(AnalysisError::MissingEvent(_))
        ));
    }

    #[test]
    fn test_event_samples_require_mapping() {
        let log = to_relative_times(&sample_log()).unwrap();
        assert!(matches!(
            event_samples(&log, SYNC_EVENT),
            Err(AnalysisError::MissingSamples)
        ));
    }

    #[test]
    fn test_slice_segment_clamps() {
        let series = [0.0, 1.0, 2.0, 3.0];
        assert_eq!(slice_segment(&series, (1, 3)), &[1.0, 2.0]);
        assert_eq!(slice_segment(&series, (2, 10)), &[2.0, 3.0]);
        assert!(slice_segment(&series, (6, 10)).is_empty());
    }
}
