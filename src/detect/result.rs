use serde::{Deserialize, Serialize};

/// Labels mapped to `DetectionKind::Animal`.
const ANIMAL_LABELS: &[&str] = &[
    "bird", "cat", "dog", "horse", "sheep", "cow", "elephant", "bear", "zebra", "giraffe",
];

/// Bounding box in normalized 0..1 coordinates.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
}

/// One raw backend output.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DetectedObject {
    pub bbox: BoundingBox,
    pub class_name: String,
    pub confidence: f32,
}

impl DetectedObject {
    pub fn new(class_name: impl Into<String>, confidence: f32, bbox: BoundingBox) -> Self {
        Self {
            bbox,
            class_name: class_name.into(),
            confidence,
        }
    }
}

/// Result of running detection on a frame.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DetectionResult {
    pub objects: Vec<DetectedObject>,
}

impl DetectionResult {
    pub fn new(objects: Vec<DetectedObject>) -> Self {
        Self { objects }
    }

    /// Classes of interest at or above `min_confidence`.
    pub fn events(&self, min_confidence: f32) -> Vec<DetectionEvent> {
        self.objects
            .iter()
            .filter(|o| o.confidence.is_finite() && o.confidence >= min_confidence)
            .filter_map(|o| {
                classify_label(&o.class_name).map(|kind| DetectionEvent {
                    kind,
                    class_name: o.class_name.clone(),
                    confidence: o.confidence.clamp(0.0, 1.0),
                    bbox: o.bbox,
                })
            })
            .collect()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionKind {
    Person,
    Animal,
}

/// Detector output the kernel acts on.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DetectionEvent {
    pub kind: DetectionKind,
    pub class_name: String,
    pub confidence: f32,
    pub bbox: BoundingBox,
}

impl DetectionEvent {
    pub fn person(confidence: f32) -> Self {
        Self {
            kind: DetectionKind::Person,
            class_name: "person".to_string(),
            confidence,
            bbox: BoundingBox::default(),
        }
    }

    pub fn animal(class_name: &str, confidence: f32) -> Self {
        Self {
            kind: DetectionKind::Animal,
            class_name: class_name.to_string(),
            confidence,
            bbox: BoundingBox::default(),
        }
    }
}

/// Map a backend label onto a class of interest.
pub fn classify_label(label: &str) -> Option<DetectionKind> {
    let label = label.trim().to_ascii_lowercase();
    if label == "person" {
        Some(DetectionKind::Person)
    } else if ANIMAL_LABELS.contains(&label.as_str()) {
        Some(DetectionKind::Animal)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_map_to_classes_of_interest() {
        assert_eq!(classify_label("Person"), Some(DetectionKind::Person));
        assert_eq!(classify_label("dog"), Some(DetectionKind::Animal));
        assert_eq!(classify_label("car"), None);
    }

    #[test]
    fn events_filter_confidence_and_class() {
        let result = DetectionResult::new(vec![
            DetectedObject::new("person", 0.9, BoundingBox::default()),
            DetectedObject::new("person", 0.2, BoundingBox::default()),
            DetectedObject::new("cat", 0.7, BoundingBox::default()),
            DetectedObject::new("chair", 0.99, BoundingBox::default()),
            DetectedObject::new("dog", f32::NAN, BoundingBox::default()),
        ]);
        let events = result.events(0.5);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].kind, DetectionKind::Person);
        assert_eq!(events[1].kind, DetectionKind::Animal);
    }
}
