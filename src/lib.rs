//! Unattended Object Triage
//!
//! This crate watches per-frame object detections from an upstream vision model
//! and decides which objects have been left unattended in a monitored scene.
//!
//! # Pipeline
//!
//! Each processed frame flows through four stages:
//!
//! 1. **Normalize**: raw detector output becomes `DetectionEvent`s (`detect`).
//! 2. **Fold**: events update the per-class sighting history (`tracker`).
//! 3. **Evaluate**: the history yields a discrete `Priority` (`priority`).
//! 4. **Export**: a point-in-time snapshot is written to disk (`report`).
//!
//! The engine is single-writer: `TriageEngine` owns its `TrackerState` and
//! nothing else mutates it. Exports read from an owned snapshot.
//!
//! # Module Structure
//!
//! - `detect`: class table, detection events, normalizer
//! - `ingest`: detection batch sources (replay logs, stdin bridge, stub scene)
//! - `tracker`: sightings, clearing rule, unattended determination
//! - `priority`: staleness thresholds and escalation policy
//! - `engine`: per-frame fold/evaluate driver and run logs
//! - `report`: report records and the artifact exporter
//! - `config`: layered file + environment configuration

use anyhow::{anyhow, Result};
use chrono::{Local, NaiveDateTime, Timelike};
use std::time::Duration;

pub mod config;
pub mod detect;
pub mod engine;
pub mod ingest;
pub mod priority;
pub mod report;
pub mod tracker;

pub use detect::{ClassMap, DetectionEvent, NormalizedFrame, Normalizer, RawDetection};
pub use engine::{FrameSummary, TriageEngine};
pub use ingest::{
    DetectionSource, FrameClock, RawBatch, ReplaySource, SourceReader, SourceStats, StubSource,
};
pub use priority::{EscalationPolicy, Priority, PriorityEvaluator, PriorityThresholds};
pub use report::{ArtifactPaths, ExportSummary, ReportExporter, TriageSnapshot};
pub use tracker::{ClassState, FoldOutcome, Sighting, TrackedRanges, TrackerSettings, TrackerState};

// -------------------- Timestamps --------------------

/// Frame capture time, local wall clock, one-second resolution.
pub type Timestamp = NaiveDateTime;

/// Serialized form of every timestamp in reports and replay logs.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Current local time truncated to the second.
pub fn now_local() -> Timestamp {
    truncate_to_second(Local::now().naive_local())
}

pub fn truncate_to_second(ts: Timestamp) -> Timestamp {
    ts.with_nanosecond(0).unwrap_or(ts)
}

pub fn format_timestamp(ts: &Timestamp) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

pub fn parse_timestamp(raw: &str) -> Result<Timestamp> {
    NaiveDateTime::parse_from_str(raw.trim(), TIMESTAMP_FORMAT)
        .map_err(|e| anyhow!("invalid timestamp '{}': {}", raw, e))
}

/// Whole seconds from `earlier` to `later`. Negative when the clock ran backwards.
pub fn seconds_between(later: &Timestamp, earlier: &Timestamp) -> i64 {
    later.signed_duration_since(*earlier).num_seconds()
}

/// Whole seconds in `d` as a signed staleness bound, saturating at `i64::MAX`.
pub fn duration_secs(d: Duration) -> i64 {
    i64::try_from(d.as_secs()).unwrap_or(i64::MAX)
}

/// Reject settings that cannot be compared against a signed staleness.
pub fn check_secs(what: &str, d: Duration) -> Result<()> {
    if d.as_secs() > i64::MAX as u64 {
        return Err(anyhow!("{} of {}s is out of range", what, d.as_secs()));
    }
    Ok(())
}

/// Serde adapter for `Timestamp` fields using `TIMESTAMP_FORMAT`.
pub mod timestamp_format {
    use serde::{Deserialize, Deserializer, Serializer};

    use super::Timestamp;

    pub fn serialize<S: Serializer>(ts: &Timestamp, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::format_timestamp(ts))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Timestamp, D::Error> {
        let raw = String::deserialize(deserializer)?;
        super::parse_timestamp(&raw).map_err(serde::de::Error::custom)
    }

    /// Optional variant: `None` serializes as `null`.
    pub mod option {
        use serde::{Deserialize, Deserializer, Serializer};

        use super::super::Timestamp;

        pub fn serialize<S: Serializer>(
            ts: &Option<Timestamp>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match ts {
                Some(ts) => serializer.serialize_str(&super::super::format_timestamp(ts)),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<Timestamp>, D::Error> {
            let raw: Option<String> = Option::deserialize(deserializer)?;
            match raw.as_deref().map(str::trim) {
                None | Some("") => Ok(None),
                Some(raw) => super::super::parse_timestamp(raw)
                    .map(Some)
                    .map_err(serde::de::Error::custom),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamps_round_trip_at_second_resolution() -> Result<()> {
        let ts = parse_timestamp("2024-03-01 10:00:00")?;
        assert_eq!(format_timestamp(&ts), "2024-03-01 10:00:00");
        Ok(())
    }

    #[test]
    fn rejects_malformed_timestamp() {
        assert!(parse_timestamp("10:00:00").is_err());
        assert!(parse_timestamp("2024-03-01T10:00:00").is_err());
    }

    #[test]
    fn seconds_between_is_signed() -> Result<()> {
        let a = parse_timestamp("2024-03-01 10:00:00")?;
        let b = parse_timestamp("2024-03-01 10:00:15")?;
        assert_eq!(seconds_between(&b, &a), 15);
        assert_eq!(seconds_between(&a, &b), -15);
        Ok(())
    }

    #[test]
    fn huge_durations_saturate_and_fail_checks() {
        let huge = Duration::from_secs(u64::MAX);
        assert_eq!(duration_secs(huge), i64::MAX);
        assert_eq!(duration_secs(Duration::from_secs(30)), 30);
        assert!(check_secs("window", huge).is_err());
        assert!(check_secs("window", Duration::from_secs(i64::MAX as u64)).is_ok());
    }

    #[test]
    fn now_local_has_no_subsecond_part() {
        assert_eq!(now_local().nanosecond(), 0);
    }
}
