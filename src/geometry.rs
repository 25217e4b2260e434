//! Box geometry and the touch heuristic.
//!
//! A target "touches" a subject when the target's center point lies strictly
//! inside the subject's box after the subject box has been grown about its
//! own center by the proximity factor. Only the target's center is tested;
//! the subject never contributes its center and no overlap area is computed.

use anyhow::{anyhow, Result};

/// Axis-aligned box in frame pixel coordinates.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoundingBox {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl BoundingBox {
    /// Build a box, rejecting non-finite corners and inverted axes.
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Result<Self> {
        if ![min_x, min_y, max_x, max_y].iter().all(|v| v.is_finite()) {
            return Err(anyhow!("bounding box corners must be finite"));
        }
        if min_x > max_x || min_y > max_y {
            return Err(anyhow!(
                "bounding box is inverted: ({}, {})-({}, {})",
                min_x,
                min_y,
                max_x,
                max_y
            ));
        }
        Ok(Self {
            min_x,
            min_y,
            max_x,
            max_y,
        })
    }

    /// Build a box from a center point and a size (YOLO-style `cx, cy, w, h`).
    pub fn from_center(cx: f64, cy: f64, width: f64, height: f64) -> Result<Self> {
        let half_w = width.abs() / 2.0;
        let half_h = height.abs() / 2.0;
        Self::new(cx - half_w, cy - half_h, cx + half_w, cy + half_h)
    }

    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    pub fn area(&self) -> f64 {
        self.width() * self.height()
    }

    pub fn center(&self) -> (f64, f64) {
        (
            (self.min_x + self.max_x) / 2.0,
            (self.min_y + self.max_y) / 2.0,
        )
    }

    /// Grow the box symmetrically about its center.
    ///
    /// Each horizontal edge moves outward by `width * (factor - 1) / 2` and each
    /// vertical edge by `height * (factor - 1) / 2`. A zero-width or zero-height
    /// box gains no margin on that axis.
    pub fn expanded(&self, factor: f64) -> Self {
        let margin_x = self.width() * (factor - 1.0) / 2.0;
        let margin_y = self.height() * (factor - 1.0) / 2.0;
        Self {
            min_x: self.min_x - margin_x,
            min_y: self.min_y - margin_y,
            max_x: self.max_x + margin_x,
            max_y: self.max_y + margin_y,
        }
    }

    /// Strict containment: points on an edge are outside.
    pub fn contains_strict(&self, x: f64, y: f64) -> bool {
        self.min_x < x && x < self.max_x && self.min_y < y && y < self.max_y
    }

    /// Intersection-over-union, used by non-maximum suppression.
    pub fn iou(&self, other: &BoundingBox) -> f64 {
        let ix = (self.max_x.min(other.max_x) - self.min_x.max(other.min_x)).max(0.0);
        let iy = (self.max_y.min(other.max_y) - self.min_y.max(other.min_y)).max(0.0);
        let inter = ix * iy;
        let union = self.area() + other.area() - inter;
        if union <= 0.0 {
            0.0
        } else {
            inter / union
        }
    }

    /// Clamp the box into a `width` x `height` frame.
    pub fn clamped(&self, width: u32, height: u32) -> Self {
        let w = f64::from(width);
        let h = f64::from(height);
        Self {
            min_x: self.min_x.clamp(0.0, w),
            min_y: self.min_y.clamp(0.0, h),
            max_x: self.max_x.clamp(0.0, w),
            max_y: self.max_y.clamp(0.0, h),
        }
    }
}

/// Returns true when the target's center lies strictly inside the subject box
/// expanded by `proximity`.
pub fn touches(subject: &BoundingBox, target: &BoundingBox, proximity: f64) -> bool {
    let (cx, cy) = target.center();
    subject.expanded(proximity).contains_strict(cx, cy)
}

/// Returns true when any subject/target pair touches.
///
/// Stops at the first match. Either side being empty yields false without
/// evaluating a single pair.
pub fn any_touching(subjects: &[BoundingBox], targets: &[BoundingBox], proximity: f64) -> bool {
    if subjects.is_empty() || targets.is_empty() {
        return false;
    }
    subjects
        .iter()
        .any(|subject| targets.iter().any(|target| touches(subject, target, proximity)))
}
