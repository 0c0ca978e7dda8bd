use std::collections::HashMap;
use std::path::Path;

use anyhow::{anyhow, Result};

/// Label the detector uses for people. Its presence drives the clearing rule.
pub const PERSON_CLASS: &str = "person";

/// COCO-80 label table, index = class id.
pub const COCO_CLASS_NAMES: [&str; 80] = [
    "person",
    "bicycle",
    "car",
    "motorcycle",
    "airplane",
    "bus",
    "train",
    "truck",
    "boat",
    "traffic light",
    "fire hydrant",
    "stop sign",
    "parking meter",
    "bench",
    "bird",
    "cat",
    "dog",
    "horse",
    "sheep",
    "cow",
    "elephant",
    "bear",
    "zebra",
    "giraffe",
    "backpack",
    "umbrella",
    "handbag",
    "tie",
    "suitcase",
    "frisbee",
    "skis",
    "snowboard",
    "sports ball",
    "kite",
    "baseball bat",
    "baseball glove",
    "skateboard",
    "surfboard",
    "tennis racket",
    "bottle",
    "wine glass",
    "cup",
    "fork",
    "knife",
    "spoon",
    "bowl",
    "banana",
    "apple",
    "sandwich",
    "orange",
    "broccoli",
    "carrot",
    "hot dog",
    "pizza",
    "donut",
    "cake",
    "chair",
    "couch",
    "potted plant",
    "bed",
    "dining table",
    "toilet",
    "tv",
    "laptop",
    "mouse",
    "remote",
    "keyboard",
    "cell phone",
    "microwave",
    "oven",
    "toaster",
    "sink",
    "refrigerator",
    "book",
    "clock",
    "vase",
    "scissors",
    "teddy bear",
    "hair drier",
    "toothbrush",
];

/// Bidirectional class id <-> name table, built once at startup.
#[derive(Clone, Debug)]
pub struct ClassMap {
    names: Vec<String>,
    ids: HashMap<String, u32>,
}

impl ClassMap {
    pub fn coco() -> Self {
        // The static table is non-empty with unique, non-empty names.
        Self::from_names(COCO_CLASS_NAMES.iter().map(|name| name.to_string()))
            .expect("COCO class table is well-formed")
    }

    /// Build from names in class id order.
    ///
    /// Names must be non-empty and unique so the reverse lookup is exact.
    pub fn from_names<I>(names: I) -> Result<Self>
    where
        I: IntoIterator<Item = String>,
    {
        let names: Vec<String> = names.into_iter().map(|n| n.trim().to_string()).collect();
        if names.is_empty() {
            return Err(anyhow!("class table must not be empty"));
        }
        let mut ids = HashMap::with_capacity(names.len());
        for (idx, name) in names.iter().enumerate() {
            if name.is_empty() {
                return Err(anyhow!("class table entry {} has an empty name", idx));
            }
            let id = u32::try_from(idx).map_err(|_| anyhow!("class table too large"))?;
            if ids.insert(name.clone(), id).is_some() {
                return Err(anyhow!("class table has duplicate name '{}'", name));
            }
        }
        Ok(Self { names, ids })
    }

    /// Load a JSON array of class names (index = class id).
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| anyhow!("failed to read class table {}: {}", path.display(), e))?;
        let names: Vec<String> = serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid class table {}: {}", path.display(), e))?;
        Self::from_names(names)
    }

    pub fn name(&self, id: u32) -> Option<&str> {
        self.names.get(id as usize).map(String::as_str)
    }

    pub fn id(&self, name: &str) -> Option<u32> {
        self.ids.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

impl Default for ClassMap {
    fn default() -> Self {
        Self::coco()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coco_lookup_is_bidirectional() {
        let map = ClassMap::coco();
        assert_eq!(map.len(), 80);
        assert_eq!(map.name(0), Some(PERSON_CLASS));
        assert_eq!(map.name(24), Some("backpack"));
        assert_eq!(map.id("suitcase"), Some(28));
        assert_eq!(map.name(80), None);
        assert_eq!(map.id("forklift"), None);
    }

    #[test]
    fn rejects_duplicate_and_empty_names() {
        let dup = ClassMap::from_names(vec!["person".to_string(), "person".to_string()]);
        assert!(dup.is_err());
        let empty = ClassMap::from_names(vec!["person".to_string(), " ".to_string()]);
        assert!(empty.is_err());
        assert!(ClassMap::from_names(Vec::<String>::new()).is_err());
    }
}
