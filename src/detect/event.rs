use serde::{Deserialize, Serialize};

use crate::Timestamp;

/// One detection as reported by the upstream model.
///
/// The detector may report the class by id, by label, or both. Boxes are
/// carried for completeness but never used: tracking is temporal only.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RawDetection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class_id: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class_name: Option<String>,
    #[serde(default)]
    pub confidence: f32,
    /// `[x, y, w, h]` in detector coordinates.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bbox: Option<[f32; 4]>,
}

impl RawDetection {
    pub fn with_id(class_id: u32, confidence: f32) -> Self {
        Self {
            class_id: Some(class_id),
            confidence,
            ..Self::default()
        }
    }

    pub fn with_name(class_name: &str, confidence: f32) -> Self {
        Self {
            class_name: Some(class_name.to_string()),
            confidence,
            ..Self::default()
        }
    }
}

/// One resolved detection in one frame. Consumed once by the tracker fold.
#[derive(Clone, Debug, PartialEq)]
pub struct DetectionEvent {
    pub timestamp: Timestamp,
    pub class_id: u32,
    pub class_name: String,
    /// 0..=1
    pub confidence: f32,
}

impl DetectionEvent {
    pub fn is_person(&self) -> bool {
        self.class_name == super::PERSON_CLASS
    }
}
