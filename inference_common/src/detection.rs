use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::bbox::Bbox;
use crate::coco_classes;

/// A single object found by a detector.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub class_id: usize,
    pub bbox: Bbox,
}

impl Detection {
    pub fn new(class_id: usize, bbox: Bbox) -> Self {
        Self { class_id, bbox }
    }

    pub fn label(&self) -> String {
        coco_classes::label(self.class_id).into_owned()
    }
}

/// Occurrences per human readable class label.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DetectionCounts(BTreeMap<String, usize>);

impl DetectionCounts {
    pub fn from_detections(detections: &[Detection]) -> Self {
        let mut counts = BTreeMap::new();
        for detection in detections {
            *counts.entry(detection.label()).or_insert(0) += 1;
        }
        Self(counts)
    }

    pub fn get(&self, label: &str) -> usize {
        self.0.get(label).copied().unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.0.values().sum()
    }
}

/// Number of detections with the given class id.
pub fn count_class(detections: &[Detection], class_id: usize) -> usize {
    detections.iter().filter(|d| d.class_id == class_id).count()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(class_id: usize) -> Detection {
        Detection::new(class_id, Bbox::new(0.0, 0.0, 1.0, 1.0, 0.5))
    }

    #[test]
    fn counts_by_label_with_fallback() {
        let detections = [det(0), det(0), det(2), det(999)];
        let counts = DetectionCounts::from_detections(&detections);
        assert_eq!(counts.get("person"), 2);
        assert_eq!(counts.get("car"), 1);
        assert_eq!(counts.get("Class 999"), 1);
        assert_eq!(counts.total(), 4);
    }

    #[test]
    fn serializes_as_plain_map() {
        let counts = DetectionCounts::from_detections(&[det(16), det(16)]);
        let json = serde_json::to_value(&counts).unwrap();
        assert_eq!(json, serde_json::json!({ "dog": 2 }));
    }

    #[test]
    fn counts_one_class() {
        assert_eq!(count_class(&[det(0), det(1), det(0)], 0), 2);
    }
}
