#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::imageops::{self, FilterType};
use tract_onnx::prelude::*;

use crate::detect::backend::DetectorBackend;
use crate::detect::labels::coco_label;
use crate::detect::result::Detection;
use crate::frame::Frame;
use crate::geometry::BoundingBox;

/// Tuning knobs for the YOLO post-processing.
#[derive(Clone, Copy, Debug)]
pub struct TractSettings {
    /// Square model input edge in pixels.
    pub input_size: u32,
    pub confidence_threshold: f32,
    pub iou_threshold: f32,
}

impl Default for TractSettings {
    fn default() -> Self {
        Self {
            input_size: 640,
            confidence_threshold: 0.25,
            iou_threshold: 0.45,
        }
    }
}

/// Tract-based backend for YOLOv8 ONNX exports.
///
/// Expects a `[1, 3, S, S]` RGB input in 0..1 and a `[1, 4 + classes, N]`
/// output of `cx, cy, w, h` followed by per-class scores. Loads the model once
/// and performs no I/O afterwards.
pub struct TractBackend {
    model: TypedRunnableModel<TypedModel>,
    settings: TractSettings,
}

impl TractBackend {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(model_path: P, settings: TractSettings) -> Result<Self> {
        let model_path = model_path.as_ref();
        let size = settings.input_size as usize;
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(f32::datum_type(), tvec!(1, 3, size, size)),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self { model, settings })
    }

    fn build_input(&self, frame: &Frame) -> Tensor {
        let size = self.settings.input_size;
        let resized = imageops::resize(frame.image(), size, size, FilterType::Triangle);
        let edge = size as usize;
        let input = tract_ndarray::Array4::from_shape_fn((1, 3, edge, edge), |(_, c, y, x)| {
            resized.get_pixel(x as u32, y as u32)[c] as f32 / 255.0
        });
        input.into_tensor()
    }

    fn decode_output(&self, output: &Tensor, frame: &Frame) -> Result<Vec<Detection>> {
        let view = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?
            .into_dimensionality::<tract_ndarray::Ix3>()
            .context("model output was not rank 3")?;
        let (_, rows, anchors) = view.dim();
        if rows < 5 {
            return Err(anyhow!("model output has {} rows, expected at least 5", rows));
        }

        let scale_x = f64::from(frame.width()) / f64::from(self.settings.input_size);
        let scale_y = f64::from(frame.height()) / f64::from(self.settings.input_size);

        let mut candidates = Vec::new();
        for i in 0..anchors {
            let (class_index, score) = (4..rows)
                .map(|row| (row - 4, view[[0, row, i]]))
                .fold((0, f32::NEG_INFINITY), |best, cur| if cur.1 > best.1 { cur } else { best });
            if !score.is_finite() || score < self.settings.confidence_threshold {
                continue;
            }
            let bbox = BoundingBox::from_center(
                f64::from(view[[0, 0, i]]) * scale_x,
                f64::from(view[[0, 1, i]]) * scale_y,
                f64::from(view[[0, 2, i]]) * scale_x,
                f64::from(view[[0, 3, i]]) * scale_y,
            );
            let Ok(bbox) = bbox else {
                continue;
            };
            candidates.push(Candidate {
                class_index,
                score,
                bbox: bbox.clamped(frame.width(), frame.height()),
            });
        }

        Ok(non_max_suppression(candidates, f64::from(self.settings.iou_threshold))
            .into_iter()
            .map(|c| {
                Detection::new(coco_label(c.class_index).unwrap_or("unknown"), c.bbox)
                    .with_confidence(c.score)
            })
            .collect())
    }
}

impl DetectorBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        let input = self.build_input(frame);
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        self.decode_output(output, frame)
    }

    fn warm_up(&mut self) -> Result<()> {
        let size = self.settings.input_size;
        self.detect(&Frame::blank(size, size, 0)).map(|_| ())
    }
}

#[derive(Clone, Debug)]
struct Candidate {
    class_index: usize,
    score: f32,
    bbox: BoundingBox,
}

/// Greedy per-class suppression, highest score first.
fn non_max_suppression(mut candidates: Vec<Candidate>, iou_threshold: f64) -> Vec<Candidate> {
    candidates.sort_by(|a, b| b.score.total_cmp(&a.score));
    let mut kept: Vec<Candidate> = Vec::new();
    for candidate in candidates {
        let overlapped = kept.iter().any(|k| {
            k.class_index == candidate.class_index && k.bbox.iou(&candidate.bbox) > iou_threshold
        });
        if !overlapped {
            kept.push(candidate);
        }
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(class_index: usize, score: f32, x: f64) -> Candidate {
        Candidate {
            class_index,
            score,
            bbox: BoundingBox::new(x, 0.0, x + 10.0, 10.0).unwrap(),
        }
    }

    #[test]
    fn nms_keeps_best_of_overlapping_same_class() {
        let kept = non_max_suppression(
            vec![
                candidate(0, 0.6, 1.0),
                candidate(0, 0.9, 0.0),
                candidate(67, 0.5, 0.0),
                candidate(0, 0.4, 50.0),
            ],
            0.45,
        );
        let scores: Vec<f32> = kept.iter().map(|c| c.score).collect();
        assert_eq!(scores, vec![0.9, 0.5, 0.4]);
    }
}
