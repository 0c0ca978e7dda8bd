//! Per-frame driver: normalize, fold, evaluate.
//!
//! `TriageEngine` is the only writer of its `TrackerState`. One frame is
//! processed to completion before the next is accepted.

use anyhow::Result;

use crate::config::TriageConfig;
use crate::detect::{ClassMap, Normalizer};
use crate::ingest::RawBatch;
use crate::priority::{Priority, PriorityEvaluator};
use crate::report::{FrameReport, TriageSnapshot};
use crate::tracker::{FoldOutcome, TrackerSettings, TrackerState};
use crate::{format_timestamp, Timestamp};

/// What happened in one processed frame.
#[derive(Clone, Debug, PartialEq)]
pub struct FrameSummary {
    pub timestamp: Timestamp,
    pub detections: usize,
    /// Raw detections the normalizer could not resolve.
    pub malformed: usize,
    pub fold: FoldOutcome,
    pub priority: Option<Priority>,
    pub unattended: Vec<String>,
}

pub struct TriageEngine {
    normalizer: Normalizer,
    state: TrackerState,
    evaluator: PriorityEvaluator,
    frames: Vec<FrameReport>,
    terminal_log: Vec<String>,
    last_priority: Option<Priority>,
    last_evaluated_at: Option<Timestamp>,
    frames_processed: u64,
}

impl TriageEngine {
    pub fn new(classes: ClassMap, tracker: TrackerSettings, evaluator: PriorityEvaluator) -> Self {
        Self {
            normalizer: Normalizer::new(classes),
            state: TrackerState::new(tracker),
            evaluator,
            frames: Vec::new(),
            terminal_log: Vec::new(),
            last_priority: None,
            last_evaluated_at: None,
            frames_processed: 0,
        }
    }

    pub fn from_config(cfg: &TriageConfig) -> Result<Self> {
        let classes = match &cfg.class_names_path {
            Some(path) => ClassMap::load(path)?,
            None => ClassMap::coco(),
        };
        Ok(Self::new(classes, cfg.tracker.clone(), cfg.evaluator()))
    }

    /// Process one frame's detections as of `now`.
    pub fn process_batch(&mut self, batch: &RawBatch, now: Timestamp) -> FrameSummary {
        let normalized = self
            .normalizer
            .normalize(batch.timestamp, &batch.detections);
        self.frames
            .push(FrameReport::from_events(batch.timestamp, &normalized.events));

        let fold = self.state.fold(&normalized.events, now);
        for class_name in &fold.cleared {
            log::info!("{} cleared: person detected nearby in time", class_name);
        }

        let priority = self.evaluator.evaluate(&self.state, &now);
        self.record_priority(priority, &now);
        self.last_evaluated_at = Some(now);
        self.frames_processed += 1;

        let summary = FrameSummary {
            timestamp: batch.timestamp,
            detections: batch.detections.len(),
            malformed: normalized.malformed,
            unattended: self
                .state
                .unattended_classes(&now)
                .into_iter()
                .map(str::to_string)
                .collect(),
            fold,
            priority,
        };
        log::debug!(
            "frame {} at {}: detections={} accepted={} malformed={} out_of_order={} priority={:?}",
            self.frames_processed,
            format_timestamp(&summary.timestamp),
            summary.detections,
            summary.fold.accepted,
            summary.malformed + summary.fold.malformed,
            summary.fold.out_of_order,
            summary.priority
        );
        summary
    }

    fn record_priority(&mut self, priority: Option<Priority>, now: &Timestamp) {
        if priority != self.last_priority {
            match priority {
                Some(Priority::P1) => log::warn!("priority escalated to P1"),
                Some(level) => log::info!("priority now {}", level),
                None => log::info!("priority cleared"),
            }
            self.last_priority = priority;
        }
        if let Some(level) = priority {
            self.terminal_log
                .push(format!("{} Priority: {}", format_timestamp(now), level));
        }
    }

    pub fn state(&self) -> &TrackerState {
        &self.state
    }

    pub fn evaluator(&self) -> &PriorityEvaluator {
        &self.evaluator
    }

    pub fn priority(&self, now: &Timestamp) -> Option<Priority> {
        self.evaluator.evaluate(&self.state, now)
    }

    pub fn frames_processed(&self) -> u64 {
        self.frames_processed
    }

    /// The `now` the most recent frame was evaluated at.
    pub fn last_evaluated_at(&self) -> Option<Timestamp> {
        self.last_evaluated_at
    }

    /// Owned copy of the engine state for export.
    pub fn snapshot(&self, now: Timestamp) -> TriageSnapshot {
        TriageSnapshot {
            taken_at: now,
            state: self.state.clone(),
            evaluator: self.evaluator,
            frames: self.frames.clone(),
            terminal_log: self.terminal_log.clone(),
        }
    }
}

impl Default for TriageEngine {
    fn default() -> Self {
        Self::new(
            ClassMap::coco(),
            TrackerSettings::default(),
            PriorityEvaluator::default(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::RawDetection;
    use crate::parse_timestamp;

    fn batch(at: &str, detections: Vec<RawDetection>) -> RawBatch {
        RawBatch {
            timestamp: parse_timestamp(&format!("2024-03-01 {}", at)).unwrap(),
            detections,
        }
    }

    #[test]
    fn frame_log_keeps_resolved_detections() {
        let mut engine = TriageEngine::default();
        assert_eq!(engine.last_evaluated_at(), None);
        let b = batch(
            "10:00:00",
            vec![RawDetection::with_id(24, 0.7), RawDetection::with_id(500, 0.9)],
        );
        let summary = engine.process_batch(&b, b.timestamp);
        assert_eq!(summary.detections, 2);
        assert_eq!(summary.malformed, 1);
        assert_eq!(summary.fold.accepted, 1);

        let snap = engine.snapshot(b.timestamp);
        assert_eq!(snap.frames.len(), 1);
        assert_eq!(snap.frames[0].detections[0].class_name, "backpack");
    }

    #[test]
    fn terminal_log_records_each_alerting_frame() {
        let mut engine = TriageEngine::default();
        let first = batch("10:00:00", vec![RawDetection::with_id(24, 0.7)]);
        engine.process_batch(&first, first.timestamp);
        for at in ["10:00:05", "10:00:12", "10:00:31"] {
            let b = batch(at, Vec::new());
            engine.process_batch(&b, b.timestamp);
        }
        let snap = engine.snapshot(engine_time("10:00:31"));
        assert_eq!(
            snap.terminal_log,
            vec![
                "2024-03-01 10:00:12 Priority: P3".to_string(),
                "2024-03-01 10:00:31 Priority: P1".to_string(),
            ]
        );
        assert_eq!(engine.frames_processed(), 4);
        assert_eq!(engine.last_evaluated_at(), Some(engine_time("10:00:31")));
    }

    #[test]
    fn snapshot_is_detached_from_later_frames() {
        let mut engine = TriageEngine::default();
        let b = batch("10:00:00", vec![RawDetection::with_id(24, 0.7)]);
        engine.process_batch(&b, b.timestamp);
        let snap = engine.snapshot(b.timestamp);

        let person = batch("10:00:02", vec![RawDetection::with_id(0, 0.9)]);
        engine.process_batch(&person, person.timestamp);

        assert!(snap.state.class("backpack").unwrap().open_sighting().is_some());
        assert!(engine
            .state()
            .class("backpack")
            .unwrap()
            .open_sighting()
            .is_none());
    }

    fn engine_time(at: &str) -> Timestamp {
        parse_timestamp(&format!("2024-03-01 {}", at)).unwrap()
    }
}
