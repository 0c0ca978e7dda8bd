//! Staleness-based priority scoring.
//!
//! Priority reflects how long it has been since an open sighting was last
//! reconfirmed. Thresholds are checked highest first, so the most severe
//! matching level wins.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

use crate::tracker::{ClassState, TrackerState};
use crate::Timestamp;

/// Alert level. `P1` is the most severe; the derived ordering sorts it first.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Priority {
    P1,
    P2,
    P3,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::P1 => "P1",
            Priority::P2 => "P2",
            Priority::P3 => "P3",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PriorityThresholds {
    pub p3: Duration,
    pub p2: Duration,
    pub p1: Duration,
}

impl PriorityThresholds {
    pub fn new(p3: Duration, p2: Duration, p1: Duration) -> Result<Self> {
        let thresholds = Self { p3, p2, p1 };
        thresholds.validate()?;
        Ok(thresholds)
    }

    pub fn validate(&self) -> Result<()> {
        if self.p3.as_secs() == 0 {
            return Err(anyhow!("P3 threshold must be greater than zero"));
        }
        if !(self.p3 < self.p2 && self.p2 < self.p1) {
            return Err(anyhow!(
                "priority thresholds must increase strictly (P3 < P2 < P1), got {}s/{}s/{}s",
                self.p3.as_secs(),
                self.p2.as_secs(),
                self.p1.as_secs()
            ));
        }
        crate::check_secs("P1 threshold", self.p1)
    }

    /// Map staleness in seconds to a priority.
    pub fn classify(&self, staleness_secs: i64) -> Option<Priority> {
        if staleness_secs >= crate::duration_secs(self.p1) {
            Some(Priority::P1)
        } else if staleness_secs >= crate::duration_secs(self.p2) {
            Some(Priority::P2)
        } else if staleness_secs >= crate::duration_secs(self.p3) {
            Some(Priority::P3)
        } else {
            None
        }
    }
}

impl Default for PriorityThresholds {
    fn default() -> Self {
        Self {
            p3: Duration::from_secs(10),
            p2: Duration::from_secs(20),
            p1: Duration::from_secs(30),
        }
    }
}

/// How the global priority is derived from the open sightings.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EscalationPolicy {
    /// Staleness of the most recently reconfirmed open sighting across all
    /// classes. Any fresh detection keeps the whole scene quiet.
    #[default]
    Global,
    /// Most severe of the per-class priorities.
    PerClass,
}

impl FromStr for EscalationPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "global" => Ok(EscalationPolicy::Global),
            "per-class" | "per_class" | "perclass" => Ok(EscalationPolicy::PerClass),
            other => Err(anyhow!(
                "unknown escalation policy '{}' (expected global|per-class)",
                other
            )),
        }
    }
}

impl fmt::Display for EscalationPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EscalationPolicy::Global => f.write_str("global"),
            EscalationPolicy::PerClass => f.write_str("per-class"),
        }
    }
}

/// Reads tracker state and produces priorities. Never mutates the state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PriorityEvaluator {
    pub thresholds: PriorityThresholds,
    pub policy: EscalationPolicy,
}

impl PriorityEvaluator {
    pub fn new(thresholds: PriorityThresholds, policy: EscalationPolicy) -> Self {
        Self { thresholds, policy }
    }

    /// Priority for the whole scene. `None` when nothing is open.
    pub fn evaluate(&self, state: &TrackerState, now: &Timestamp) -> Option<Priority> {
        match self.policy {
            EscalationPolicy::Global => {
                let last_seen = state.open_sightings().map(|(_, s)| s.last_seen()).max()?;
                self.thresholds
                    .classify(crate::seconds_between(now, &last_seen))
            }
            EscalationPolicy::PerClass => state
                .classes()
                .filter_map(|(_, class)| self.evaluate_for(class, now))
                .min(),
        }
    }

    /// Priority scoped to a single class.
    pub fn evaluate_for(&self, class: &ClassState, now: &Timestamp) -> Option<Priority> {
        let sighting = class.open_sighting()?;
        self.thresholds.classify(sighting.staleness_secs(now))
    }
}

/// Scene priority with default thresholds and global escalation.
pub fn evaluate(state: &TrackerState, now: &Timestamp) -> Option<Priority> {
    PriorityEvaluator::default().evaluate(state, now)
}

/// Class priority with default thresholds.
pub fn evaluate_for(class: &ClassState, now: &Timestamp) -> Option<Priority> {
    PriorityEvaluator::default().evaluate_for(class, now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::DetectionEvent;
    use crate::parse_timestamp;

    fn ts(hms: &str) -> Timestamp {
        parse_timestamp(&format!("2024-03-01 {}", hms)).unwrap()
    }

    fn sighted(items: &[(&str, u32, &str)]) -> TrackerState {
        let mut state = TrackerState::default();
        for (name, id, at) in items {
            let event = DetectionEvent {
                timestamp: ts(at),
                class_id: *id,
                class_name: name.to_string(),
                confidence: 0.9,
            };
            state.fold(&[event], ts(at));
        }
        state
    }

    #[test]
    fn empty_state_has_no_priority() {
        let state = TrackerState::default();
        assert_eq!(evaluate(&state, &ts("10:00:00")), None);
        let per_class = PriorityEvaluator::new(PriorityThresholds::default(), EscalationPolicy::PerClass);
        assert_eq!(per_class.evaluate(&state, &ts("10:00:00")), None);
    }

    #[test]
    fn staleness_bands() {
        let state = sighted(&[("backpack", 24, "10:00:00")]);
        assert_eq!(evaluate(&state, &ts("10:00:09")), None);
        assert_eq!(evaluate(&state, &ts("10:00:10")), Some(Priority::P3));
        assert_eq!(evaluate(&state, &ts("10:00:19")), Some(Priority::P3));
        assert_eq!(evaluate(&state, &ts("10:00:20")), Some(Priority::P2));
        assert_eq!(evaluate(&state, &ts("10:00:29")), Some(Priority::P2));
        assert_eq!(evaluate(&state, &ts("10:00:30")), Some(Priority::P1));
        assert_eq!(evaluate(&state, &ts("10:05:00")), Some(Priority::P1));
    }

    #[test]
    fn global_policy_uses_most_recent_sighting() {
        let state = sighted(&[("backpack", 24, "10:00:00"), ("suitcase", 28, "10:00:25")]);
        let now = ts("10:00:36");
        // backpack is 36s stale but the suitcase was seen 11s ago.
        assert_eq!(evaluate(&state, &now), Some(Priority::P3));

        let per_class = PriorityEvaluator::new(PriorityThresholds::default(), EscalationPolicy::PerClass);
        assert_eq!(per_class.evaluate(&state, &now), Some(Priority::P1));

        let backpack = state.class("backpack").unwrap();
        assert_eq!(evaluate_for(backpack, &now), Some(Priority::P1));
        let suitcase = state.class("suitcase").unwrap();
        assert_eq!(evaluate_for(suitcase, &now), Some(Priority::P3));
    }

    #[test]
    fn cleared_sightings_do_not_escalate() {
        let mut state = sighted(&[("backpack", 24, "10:00:00")]);
        let person = DetectionEvent {
            timestamp: ts("10:00:05"),
            class_id: 0,
            class_name: "person".to_string(),
            confidence: 0.8,
        };
        state.fold(&[person], ts("10:00:05"));
        assert_eq!(evaluate(&state, &ts("10:01:00")), None);
        assert_eq!(evaluate_for(state.class("backpack").unwrap(), &ts("10:01:00")), None);
    }

    #[test]
    fn thresholds_must_increase() {
        let secs = Duration::from_secs;
        assert!(PriorityThresholds::new(secs(10), secs(20), secs(30)).is_ok());
        assert!(PriorityThresholds::new(secs(10), secs(10), secs(30)).is_err());
        assert!(PriorityThresholds::new(secs(0), secs(20), secs(30)).is_err());
        assert!(PriorityThresholds::new(secs(30), secs(20), secs(10)).is_err());
    }

    #[test]
    fn out_of_range_thresholds_are_rejected() {
        let secs = Duration::from_secs;
        assert!(PriorityThresholds::new(secs(10), secs(20), secs(u64::MAX)).is_err());

        // Built without validation, a huge P1 still never fires at zero staleness.
        let unchecked = PriorityThresholds {
            p3: secs(10),
            p2: secs(20),
            p1: secs(u64::MAX),
        };
        assert_eq!(unchecked.classify(0), None);
        assert_eq!(unchecked.classify(25), Some(Priority::P2));
    }

    #[test]
    fn parses_escalation_policy() -> Result<()> {
        assert_eq!("global".parse::<EscalationPolicy>()?, EscalationPolicy::Global);
        assert_eq!("Per-Class".parse::<EscalationPolicy>()?, EscalationPolicy::PerClass);
        assert!("loudest".parse::<EscalationPolicy>().is_err());
        assert_eq!(EscalationPolicy::PerClass.to_string(), "per-class");
        Ok(())
    }

    #[test]
    fn p1_sorts_first() {
        let mut levels = vec![Priority::P3, Priority::P1, Priority::P2];
        levels.sort();
        assert_eq!(levels, vec![Priority::P1, Priority::P2, Priority::P3]);
    }
}
