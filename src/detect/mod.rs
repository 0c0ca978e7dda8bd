mod classes;
mod event;
mod normalize;

pub use classes::{ClassMap, COCO_CLASS_NAMES, PERSON_CLASS};
pub use event::{DetectionEvent, RawDetection};
pub use normalize::{NormalizedFrame, Normalizer};
