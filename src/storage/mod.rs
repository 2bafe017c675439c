mod detection_history;

pub use detection_history::{DetectionEvent, DetectionHistory, DetectionRecord};
