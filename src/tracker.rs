//! Per-class sighting history and the unattended/cleared state machine.
//!
//! Objects are tracked by class only: a class has at most one open sighting
//! at a time. A sighting opens on the first detection of its class, is kept
//! alive by later detections, and is cleared when a person shows up while the
//! sighting was reconfirmed recently. Cleared sightings stay in the history
//! for export but take no further part in unattended or priority checks.

use std::collections::BTreeMap;
use std::fmt;
use std::ops::RangeInclusive;
use std::time::Duration;

use anyhow::{anyhow, Result};
use serde::Serialize;

use crate::detect::DetectionEvent;
use crate::{seconds_between, Timestamp};

pub const DEFAULT_UNATTENDED_THRESHOLD: Duration = Duration::from_secs(10);
pub const DEFAULT_CLEAR_WINDOW: Duration = Duration::from_secs(10);

// -------------------- Tracked Ranges --------------------

/// Class id bands eligible for unattended tracking.
///
/// The default bands cover COCO animals, bags and personal items (14-55) and
/// electronics and household items (62-79), leaving out people, vehicles and
/// furniture.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TrackedRanges {
    ranges: Vec<RangeInclusive<u32>>,
}

impl TrackedRanges {
    pub fn new(ranges: Vec<RangeInclusive<u32>>) -> Result<Self> {
        if ranges.is_empty() {
            return Err(anyhow!("at least one tracked class range is required"));
        }
        for range in &ranges {
            if range.start() > range.end() {
                return Err(anyhow!(
                    "tracked class range {}-{} is inverted",
                    range.start(),
                    range.end()
                ));
            }
        }
        Ok(Self { ranges })
    }

    /// Parse `"14-55,62-79"`. A bare id (`"24"`) is a one-class range.
    pub fn parse(spec: &str) -> Result<Self> {
        let mut ranges = Vec::new();
        for part in spec.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let (start, end) = match part.split_once('-') {
                Some((start, end)) => (start.trim(), end.trim()),
                None => (part, part),
            };
            let start: u32 = start
                .parse()
                .map_err(|_| anyhow!("invalid tracked range '{}'", part))?;
            let end: u32 = end
                .parse()
                .map_err(|_| anyhow!("invalid tracked range '{}'", part))?;
            ranges.push(start..=end);
        }
        Self::new(ranges)
    }

    pub fn contains(&self, class_id: u32) -> bool {
        self.ranges.iter().any(|range| range.contains(&class_id))
    }
}

impl Default for TrackedRanges {
    fn default() -> Self {
        Self {
            ranges: vec![14..=55, 62..=79],
        }
    }
}

impl fmt::Display for TrackedRanges {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .ranges
            .iter()
            .map(|r| format!("{}-{}", r.start(), r.end()))
            .collect();
        write!(f, "{}", parts.join(","))
    }
}

// -------------------- Settings --------------------

#[derive(Clone, Debug, PartialEq)]
pub struct TrackerSettings {
    /// Open time after which a sighting counts as unattended.
    pub unattended_threshold: Duration,
    /// A person clears sightings reconfirmed within this window.
    pub clear_window: Duration,
    pub tracked: TrackedRanges,
    /// Detections below this confidence are counted but not tracked.
    pub min_confidence: f32,
}

impl Default for TrackerSettings {
    fn default() -> Self {
        Self {
            unattended_threshold: DEFAULT_UNATTENDED_THRESHOLD,
            clear_window: DEFAULT_CLEAR_WINDOW,
            tracked: TrackedRanges::default(),
            min_confidence: 0.0,
        }
    }
}

// -------------------- Sightings --------------------

/// Record that an object of some class was observed and not yet cleared.
///
/// Invariant: `last_seen >= first_seen`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Sighting {
    #[serde(with = "crate::timestamp_format")]
    first_seen: Timestamp,
    #[serde(with = "crate::timestamp_format")]
    last_seen: Timestamp,
    #[serde(with = "crate::timestamp_format::option")]
    cleared_at: Option<Timestamp>,
}

impl Sighting {
    fn open(at: Timestamp) -> Self {
        Self {
            first_seen: at,
            last_seen: at,
            cleared_at: None,
        }
    }

    pub fn first_seen(&self) -> Timestamp {
        self.first_seen
    }

    pub fn last_seen(&self) -> Timestamp {
        self.last_seen
    }

    pub fn is_cleared(&self) -> bool {
        self.cleared_at.is_some()
    }

    pub fn cleared_at(&self) -> Option<Timestamp> {
        self.cleared_at
    }

    /// Seconds since the last reconfirming detection.
    pub fn staleness_secs(&self, now: &Timestamp) -> i64 {
        seconds_between(now, &self.last_seen)
    }

    /// Seconds since the sighting opened.
    pub fn open_secs(&self, now: &Timestamp) -> i64 {
        seconds_between(now, &self.first_seen)
    }

    fn reconfirm(&mut self, at: Timestamp) {
        self.last_seen = at;
    }

    fn clear(&mut self, at: Timestamp) {
        self.cleared_at = Some(at);
    }
}

/// Ordered sighting history of one class, oldest first.
///
/// Only the newest sighting can be open.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ClassState {
    sightings: Vec<Sighting>,
}

impl ClassState {
    pub fn sightings(&self) -> &[Sighting] {
        &self.sightings
    }

    pub fn open_sighting(&self) -> Option<&Sighting> {
        self.sightings.last().filter(|s| !s.is_cleared())
    }

    fn open_sighting_mut(&mut self) -> Option<&mut Sighting> {
        self.sightings.last_mut().filter(|s| !s.is_cleared())
    }

    /// Most recent `last_seen` across the whole history, cleared or not.
    fn latest_seen(&self) -> Option<Timestamp> {
        self.sightings.last().map(Sighting::last_seen)
    }

    pub fn is_unattended(&self, now: &Timestamp, threshold: Duration) -> bool {
        self.open_sighting()
            .is_some_and(|s| s.open_secs(now) >= crate::duration_secs(threshold))
    }

    pub fn cleared_count(&self) -> usize {
        self.sightings.iter().filter(|s| s.is_cleared()).count()
    }
}

// -------------------- Tracker State --------------------

/// What one fold did with its events.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FoldOutcome {
    /// Events that opened or reconfirmed a sighting.
    pub accepted: usize,
    /// Events outside the tracked ranges (people, vehicles, ...).
    pub untracked: usize,
    pub below_confidence: usize,
    /// Events with no class name; dropped.
    pub malformed: usize,
    /// Events older than their class's latest sighting; ignored.
    pub out_of_order: usize,
    pub person_present: bool,
    /// Classes whose open sighting was cleared by a person in this frame.
    pub cleared: Vec<String>,
}

/// Process-wide tracking state. Single writer: the fold.
#[derive(Clone, Debug, PartialEq)]
pub struct TrackerState {
    settings: TrackerSettings,
    classes: BTreeMap<String, ClassState>,
    class_counts: BTreeMap<Timestamp, BTreeMap<String, u32>>,
}

impl TrackerState {
    pub fn new(settings: TrackerSettings) -> Self {
        Self {
            settings,
            classes: BTreeMap::new(),
            class_counts: BTreeMap::new(),
        }
    }

    pub fn settings(&self) -> &TrackerSettings {
        &self.settings
    }

    /// Fold one frame's events into the state.
    ///
    /// Data problems never fail the fold: unknown classes and clock anomalies
    /// are skipped and reported in the returned `FoldOutcome`.
    pub fn fold(&mut self, events: &[DetectionEvent], now: Timestamp) -> FoldOutcome {
        let mut outcome = FoldOutcome {
            person_present: events.iter().any(DetectionEvent::is_person),
            ..FoldOutcome::default()
        };

        for event in events {
            if event.class_name.is_empty() {
                outcome.malformed += 1;
                continue;
            }
            *self
                .class_counts
                .entry(event.timestamp)
                .or_default()
                .entry(event.class_name.clone())
                .or_insert(0) += 1;

            if !self.settings.tracked.contains(event.class_id) {
                outcome.untracked += 1;
                continue;
            }
            if event.confidence < self.settings.min_confidence {
                outcome.below_confidence += 1;
                continue;
            }
            if self.record_sighting(event) {
                outcome.accepted += 1;
            } else {
                log::debug!(
                    "ignoring out-of-order {} detection at {}",
                    event.class_name,
                    crate::format_timestamp(&event.timestamp)
                );
                outcome.out_of_order += 1;
            }
        }

        if outcome.person_present {
            outcome.cleared = self.clear_recent(now);
        }
        outcome
    }

    fn record_sighting(&mut self, event: &DetectionEvent) -> bool {
        let class = self.classes.entry(event.class_name.clone()).or_default();
        if class.latest_seen().is_some_and(|seen| event.timestamp < seen) {
            return false;
        }
        match class.open_sighting_mut() {
            Some(sighting) => sighting.reconfirm(event.timestamp),
            None => class.sightings.push(Sighting::open(event.timestamp)),
        }
        true
    }

    /// Clear every open sighting reconfirmed within the clear window.
    ///
    /// Sightings older than the window stay open even though a person is in
    /// frame: the person is taken to be unrelated to a long-stale object.
    fn clear_recent(&mut self, now: Timestamp) -> Vec<String> {
        let window = crate::duration_secs(self.settings.clear_window);
        let mut cleared = Vec::new();
        for (name, class) in self.classes.iter_mut() {
            if let Some(sighting) = class.open_sighting_mut() {
                if sighting.staleness_secs(&now) < window {
                    sighting.clear(now);
                    cleared.push(name.clone());
                }
            }
        }
        cleared
    }

    pub fn class(&self, class_name: &str) -> Option<&ClassState> {
        self.classes.get(class_name)
    }

    pub fn classes(&self) -> impl Iterator<Item = (&str, &ClassState)> {
        self.classes.iter().map(|(name, class)| (name.as_str(), class))
    }

    pub fn open_sightings(&self) -> impl Iterator<Item = (&str, &Sighting)> {
        self.classes()
            .filter_map(|(name, class)| class.open_sighting().map(|s| (name, s)))
    }

    pub fn is_unattended(&self, class_name: &str, now: &Timestamp) -> bool {
        self.class(class_name)
            .is_some_and(|class| class.is_unattended(now, self.settings.unattended_threshold))
    }

    /// Classes currently unattended, by name.
    pub fn unattended_classes(&self, now: &Timestamp) -> Vec<&str> {
        self.classes()
            .filter(|(_, class)| class.is_unattended(now, self.settings.unattended_threshold))
            .map(|(name, _)| name)
            .collect()
    }

    /// Per-timestamp detection counts by class name.
    pub fn class_counts(&self) -> &BTreeMap<Timestamp, BTreeMap<String, u32>> {
        &self.class_counts
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }
}

impl Default for TrackerState {
    fn default() -> Self {
        Self::new(TrackerSettings::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse_timestamp;

    fn ts(hms: &str) -> Timestamp {
        parse_timestamp(&format!("2024-03-01 {}", hms)).unwrap()
    }

    fn event(name: &str, id: u32, at: &str) -> DetectionEvent {
        DetectionEvent {
            timestamp: ts(at),
            class_id: id,
            class_name: name.to_string(),
            confidence: 0.9,
        }
    }

    #[test]
    fn parses_and_formats_ranges() -> Result<()> {
        let ranges = TrackedRanges::parse("14-55, 62-79")?;
        assert_eq!(ranges, TrackedRanges::default());
        assert_eq!(ranges.to_string(), "14-55,62-79");
        let single = TrackedRanges::parse("24")?;
        assert!(single.contains(24));
        assert!(!single.contains(25));
        assert!(TrackedRanges::parse("55-14").is_err());
        assert!(TrackedRanges::parse("").is_err());
        assert!(TrackedRanges::parse("a-b").is_err());
        Ok(())
    }

    #[test]
    fn default_ranges_exclude_people_and_vehicles() {
        let ranges = TrackedRanges::default();
        for id in [0, 1, 2, 3, 5, 7, 56, 61, 80] {
            assert!(!ranges.contains(id), "id {} should be untracked", id);
        }
        for id in [14, 24, 26, 28, 55, 62, 63, 79] {
            assert!(ranges.contains(id), "id {} should be tracked", id);
        }
    }

    #[test]
    fn reconfirmation_moves_last_seen_only() {
        let mut state = TrackerState::default();
        state.fold(&[event("backpack", 24, "10:00:00")], ts("10:00:00"));
        state.fold(&[event("backpack", 24, "10:00:04")], ts("10:00:04"));
        state.fold(&[event("backpack", 24, "10:00:08")], ts("10:00:08"));

        let class = state.class("backpack").unwrap();
        assert_eq!(class.sightings().len(), 1);
        let sighting = class.open_sighting().unwrap();
        assert_eq!(sighting.first_seen(), ts("10:00:00"));
        assert_eq!(sighting.last_seen(), ts("10:00:08"));
    }

    #[test]
    fn out_of_order_event_is_ignored() {
        let mut state = TrackerState::default();
        state.fold(&[event("backpack", 24, "10:00:05")], ts("10:00:05"));
        let outcome = state.fold(&[event("backpack", 24, "10:00:02")], ts("10:00:06"));

        assert_eq!(outcome.out_of_order, 1);
        assert_eq!(outcome.accepted, 0);
        let sighting = state.class("backpack").unwrap().open_sighting().unwrap();
        assert_eq!(sighting.first_seen(), ts("10:00:05"));
        assert_eq!(sighting.last_seen(), ts("10:00:05"));
    }

    #[test]
    fn untracked_and_unnamed_events_are_not_sighted() {
        let mut state = TrackerState::default();
        let unnamed = event("", 24, "10:00:00");
        let outcome = state.fold(
            &[event("car", 2, "10:00:00"), unnamed],
            ts("10:00:00"),
        );
        assert_eq!(outcome.untracked, 1);
        assert_eq!(outcome.malformed, 1);
        assert!(state.is_empty());
        assert_eq!(state.class_counts()[&ts("10:00:00")]["car"], 1);
    }

    #[test]
    fn low_confidence_events_are_counted_not_tracked() {
        let mut state = TrackerState::new(TrackerSettings {
            min_confidence: 0.5,
            ..TrackerSettings::default()
        });
        let mut weak = event("backpack", 24, "10:00:00");
        weak.confidence = 0.3;
        let outcome = state.fold(&[weak], ts("10:00:00"));
        assert_eq!(outcome.below_confidence, 1);
        assert!(state.class("backpack").is_none());
        assert_eq!(state.class_counts()[&ts("10:00:00")]["backpack"], 1);
    }

    #[test]
    fn unattended_after_threshold_from_first_seen() {
        let mut state = TrackerState::default();
        state.fold(&[event("backpack", 24, "10:00:00")], ts("10:00:00"));
        assert!(!state.is_unattended("backpack", &ts("10:00:09")));
        assert!(state.is_unattended("backpack", &ts("10:00:10")));
        assert_eq!(state.unattended_classes(&ts("10:00:15")), vec!["backpack"]);
        assert!(!state.is_unattended("suitcase", &ts("10:00:15")));
    }

    #[test]
    fn huge_threshold_never_reports_unattended() {
        let mut state = TrackerState::new(TrackerSettings {
            unattended_threshold: Duration::from_secs(u64::MAX),
            clear_window: Duration::from_secs(u64::MAX),
            ..TrackerSettings::default()
        });
        state.fold(&[event("backpack", 24, "10:00:00")], ts("10:00:00"));
        assert!(!state.is_unattended("backpack", &ts("10:00:00")));
        assert!(state.unattended_classes(&ts("11:00:00")).is_empty());

        let outcome = state.fold(&[event("person", 0, "11:00:00")], ts("11:00:00"));
        assert_eq!(outcome.cleared, vec!["backpack".to_string()]);
    }

    #[test]
    fn person_clears_recently_reconfirmed_sighting() {
        let mut state = TrackerState::default();
        state.fold(&[event("backpack", 24, "10:00:00")], ts("10:00:00"));
        state.fold(&[event("backpack", 24, "10:00:25")], ts("10:00:25"));
        let outcome = state.fold(&[event("person", 0, "10:00:30")], ts("10:00:30"));

        assert!(outcome.person_present);
        assert_eq!(outcome.cleared, vec!["backpack".to_string()]);
        let class = state.class("backpack").unwrap();
        assert!(class.open_sighting().is_none());
        assert_eq!(class.sightings()[0].cleared_at(), Some(ts("10:00:30")));
        assert!(!state.is_unattended("backpack", &ts("10:00:45")));
    }

    #[test]
    fn person_leaves_stale_sighting_open() {
        let mut state = TrackerState::default();
        state.fold(&[event("backpack", 24, "10:00:00")], ts("10:00:00"));
        let outcome = state.fold(&[event("person", 0, "10:00:33")], ts("10:00:33"));

        assert!(outcome.cleared.is_empty());
        assert!(state.class("backpack").unwrap().open_sighting().is_some());
        assert!(state.is_unattended("backpack", &ts("10:00:33")));
    }

    #[test]
    fn clear_window_boundary_is_exclusive() {
        let mut state = TrackerState::default();
        state.fold(&[event("handbag", 26, "10:00:00")], ts("10:00:00"));
        let outcome = state.fold(&[event("person", 0, "10:00:10")], ts("10:00:10"));
        assert!(outcome.cleared.is_empty());

        let mut state = TrackerState::default();
        state.fold(&[event("handbag", 26, "10:00:00")], ts("10:00:00"));
        let outcome = state.fold(&[event("person", 0, "10:00:09")], ts("10:00:09"));
        assert_eq!(outcome.cleared, vec!["handbag".to_string()]);
    }

    #[test]
    fn detection_after_clearing_opens_new_sighting() {
        let mut state = TrackerState::default();
        state.fold(&[event("suitcase", 28, "10:00:00")], ts("10:00:00"));
        state.fold(&[event("person", 0, "10:00:02")], ts("10:00:02"));
        state.fold(&[event("suitcase", 28, "10:00:05")], ts("10:00:05"));

        let class = state.class("suitcase").unwrap();
        assert_eq!(class.sightings().len(), 2);
        assert_eq!(class.cleared_count(), 1);
        assert_eq!(class.open_sighting().unwrap().first_seen(), ts("10:00:05"));
    }

    #[test]
    fn empty_fold_leaves_state_unchanged() {
        let mut state = TrackerState::default();
        state.fold(&[event("backpack", 24, "10:00:00")], ts("10:00:00"));
        let before = state.clone();
        let outcome = state.fold(&[], ts("10:05:00"));
        assert_eq!(outcome, FoldOutcome::default());
        assert_eq!(state, before);
    }
}
