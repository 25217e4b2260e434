use crate::geometry::BoundingBox;

/// Label the detector uses for subjects.
pub const SUBJECT_LABEL: &str = "person";
/// Label the detector uses for targets.
pub const TARGET_LABEL: &str = "cell phone";

/// Classes the decision logic cares about. Everything else is `Other` and is
/// only ever drawn.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ObjectClass {
    Person,
    CellPhone,
    Other,
}

impl ObjectClass {
    pub fn from_label(label: &str) -> Self {
        match label {
            SUBJECT_LABEL => ObjectClass::Person,
            TARGET_LABEL => ObjectClass::CellPhone,
            _ => ObjectClass::Other,
        }
    }
}

/// One detected object in one frame.
#[derive(Clone, Debug, PartialEq)]
pub struct Detection {
    pub class: ObjectClass,
    pub label: String,
    pub bbox: BoundingBox,
    /// Detector score, carried for display only.
    pub confidence: Option<f32>,
}

impl Detection {
    pub fn new(label: impl Into<String>, bbox: BoundingBox) -> Self {
        let label = label.into();
        Self {
            class: ObjectClass::from_label(&label),
            label,
            bbox,
            confidence: None,
        }
    }

    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = Some(confidence);
        self
    }
}

/// Subject and target boxes pulled out of a frame's detections.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Classified {
    pub subjects: Vec<BoundingBox>,
    pub targets: Vec<BoundingBox>,
}

/// All detections for one source frame.
#[derive(Clone, Debug, Default)]
pub struct DetectionFrame {
    detections: Vec<Detection>,
}

impl DetectionFrame {
    pub fn new(detections: Vec<Detection>) -> Self {
        Self { detections }
    }

    pub fn detections(&self) -> &[Detection] {
        &self.detections
    }

    pub fn len(&self) -> usize {
        self.detections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.detections.is_empty()
    }

    /// Partition into subjects and targets, dropping other classes.
    pub fn classify(&self) -> Classified {
        let mut classified = Classified::default();
        for detection in &self.detections {
            match detection.class {
                ObjectClass::Person => classified.subjects.push(detection.bbox),
                ObjectClass::CellPhone => classified.targets.push(detection.bbox),
                ObjectClass::Other => {}
            }
        }
        classified
    }
}
