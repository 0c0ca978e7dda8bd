use super::classes::ClassMap;
use super::event::{DetectionEvent, RawDetection};
use crate::Timestamp;

/// Output of normalizing one frame.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct NormalizedFrame {
    pub events: Vec<DetectionEvent>,
    /// Detections dropped because the class could not be resolved or the
    /// confidence was not a number.
    pub malformed: usize,
}

/// Turns raw detector output into canonical `DetectionEvent`s.
#[derive(Clone, Debug, Default)]
pub struct Normalizer {
    classes: ClassMap,
}

impl Normalizer {
    pub fn new(classes: ClassMap) -> Self {
        Self { classes }
    }

    pub fn classes(&self) -> &ClassMap {
        &self.classes
    }

    pub fn normalize(&self, timestamp: Timestamp, detections: &[RawDetection]) -> NormalizedFrame {
        let mut frame = NormalizedFrame::default();
        for raw in detections {
            match self.resolve(timestamp, raw) {
                Some(event) => frame.events.push(event),
                None => {
                    log::debug!(
                        "dropping unresolvable detection id={:?} name={:?}",
                        raw.class_id,
                        raw.class_name
                    );
                    frame.malformed += 1;
                }
            }
        }
        frame
    }

    fn resolve(&self, timestamp: Timestamp, raw: &RawDetection) -> Option<DetectionEvent> {
        if raw.confidence.is_nan() {
            return None;
        }
        let class_id = match (raw.class_id, raw.class_name.as_deref()) {
            (Some(id), _) => id,
            (None, Some(name)) => self.classes.id(name.trim())?,
            (None, None) => return None,
        };
        let class_name = self.classes.name(class_id)?;
        // An id and a label that disagree cannot be trusted either way.
        if let Some(name) = raw.class_name.as_deref() {
            if name.trim() != class_name {
                return None;
            }
        }
        Some(DetectionEvent {
            timestamp,
            class_id,
            class_name: class_name.to_string(),
            confidence: raw.confidence.clamp(0.0, 1.0),
        })
    }
}
