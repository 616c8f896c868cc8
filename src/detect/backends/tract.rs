#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::imageops::FilterType;
use image::RgbImage;
use tract_onnx::prelude::*;

use crate::detect::backend::{DetectorBackend, LabelNames};
use crate::detect::result::RawDetection;

/// Post-processing parameters for YOLO-style outputs.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TractParams {
    /// Square model input edge in pixels.
    pub input_size: u32,
    /// Detector-level score floor. The request threshold is applied later.
    pub score_floor: f32,
    /// IoU above which a lower-scoring box of the same class is suppressed.
    pub iou_threshold: f32,
    /// Upper bound on boxes returned per image.
    pub max_detections: usize,
}

impl Default for TractParams {
    fn default() -> Self {
        Self {
            input_size: 640,
            score_floor: 0.25,
            iou_threshold: 0.45,
            max_detections: 300,
        }
    }
}

/// Tract-based backend for YOLOv8-style ONNX detectors.
///
/// Expects a single output of shape `[1, 4 + classes, anchors]` where the first
/// four rows are `cx, cy, w, h` in input pixels and the rest are class scores.
/// No network I/O; the only disk access is loading the model.
pub struct TractBackend {
    model: TypedRunnableModel<TypedModel>,
    labels: LabelNames,
    params: TractParams,
}

impl TractBackend {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(
        model_path: P,
        labels: LabelNames,
        params: TractParams,
    ) -> Result<Self> {
        let model_path = model_path.as_ref();
        let size = params.input_size as usize;
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

        Ok(Self {
            model,
            labels,
            params,
        })
    }

    fn build_input(&self, image: &RgbImage) -> Tensor {
        let size = self.params.input_size;
        let resized = image::imageops::resize(image, size, size, FilterType::Triangle);
        let input = tract_ndarray::Array4::from_shape_fn(
            (1, 3, size as usize, size as usize),
            |(_, channel, y, x)| resized.get_pixel(x as u32, y as u32)[channel] as f32 / 255.0,
        );
        input.into_tensor()
    }

    fn decode(
        &self,
        outputs: TVec<TValue>,
        width: u32,
        height: u32,
    ) -> Result<Vec<RawDetection>> {
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let view = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?
            .into_dimensionality::<tract_ndarray::Ix3>()
            .context("model output must have shape [1, 4 + classes, anchors]")?;
        let rows = view.shape()[1];
        let anchors = view.shape()[2];
        if rows <= 4 {
            return Err(anyhow!("model output has {} rows, expected more than 4", rows));
        }

        let size = self.params.input_size as f32;
        let scale_x = width as f32 / size;
        let scale_y = height as f32 / size;

        let mut candidates = Vec::new();
        for anchor in 0..anchors {
            let (class_id, score) = (4..rows)
                .map(|row| (row - 4, view[[0, row, anchor]]))
                .fold((0usize, f32::NEG_INFINITY), |best, cur| {
                    if cur.1 > best.1 {
                        cur
                    } else {
                        best
                    }
                });
            if !score.is_finite() || score < self.params.score_floor {
                continue;
            }
            let cx = view[[0, 0, anchor]];
            let cy = view[[0, 1, anchor]];
            let w = view[[0, 2, anchor]];
            let h = view[[0, 3, anchor]];
            candidates.push(RawDetection::new(
                class_id as u32,
                score,
                [
                    ((cx - w / 2.0) * scale_x).clamp(0.0, width as f32),
                    ((cy - h / 2.0) * scale_y).clamp(0.0, height as f32),
                    ((cx + w / 2.0) * scale_x).clamp(0.0, width as f32),
                    ((cy + h / 2.0) * scale_y).clamp(0.0, height as f32),
                ],
            ));
        }

        Ok(non_max_suppression(
            candidates,
            self.params.iou_threshold,
            self.params.max_detections,
        ))
    }
}

impl DetectorBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn label_names(&self) -> &LabelNames {
        &self.labels
    }

    fn infer(&self, image: &RgbImage) -> Result<Vec<RawDetection>> {
        let (width, height) = image.dimensions();
        let input = self.build_input(image);
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        self.decode(outputs, width, height)
    }

    fn warm_up(&self) -> Result<()> {
        let size = self.params.input_size;
        self.infer(&RgbImage::new(size, size)).map(|_| ())
    }
}

fn iou(a: &[f32], b: &[f32]) -> f32 {
    let ix = (a[2].min(b[2]) - a[0].max(b[0])).max(0.0);
    let iy = (a[3].min(b[3]) - a[1].max(b[1])).max(0.0);
    let inter = ix * iy;
    let area = |r: &[f32]| (r[2] - r[0]).max(0.0) * (r[3] - r[1]).max(0.0);
    let union = area(a) + area(b) - inter;
    if union <= 0.0 {
        0.0
    } else {
        inter / union
    }
}

/// Greedy per-class suppression, highest score first.
fn non_max_suppression(
    mut candidates: Vec<RawDetection>,
    iou_threshold: f32,
    max_detections: usize,
) -> Vec<RawDetection> {
    candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    let mut kept: Vec<RawDetection> = Vec::new();
    for cand in candidates {
        if kept.len() >= max_detections {
            break;
        }
        let suppressed = kept
            .iter()
            .any(|k| k.class_id == cand.class_id && iou(&k.bbox, &cand.bbox) > iou_threshold);
        if !suppressed {
            kept.push(cand);
        }
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nms_keeps_best_box_per_cluster() {
        let boxes = vec![
            RawDetection::new(1, 0.6, [0.0, 0.0, 10.0, 10.0]),
            RawDetection::new(1, 0.9, [1.0, 1.0, 11.0, 11.0]),
            RawDetection::new(2, 0.7, [1.0, 1.0, 11.0, 11.0]),
            RawDetection::new(1, 0.8, [50.0, 50.0, 60.0, 60.0]),
        ];
        let kept = non_max_suppression(boxes, 0.45, 10);
        let scores: Vec<f32> = kept.iter().map(|d| d.confidence).collect();
        assert_eq!(scores, vec![0.9, 0.8, 0.7]);
    }

    #[test]
    fn nms_respects_max_detections() {
        let boxes = (0..5)
            .map(|i| {
                let x = i as f32 * 20.0;
                RawDetection::new(0, 0.5, [x, 0.0, x + 10.0, 10.0])
            })
            .collect();
        assert_eq!(non_max_suppression(boxes, 0.45, 3).len(), 3);
    }
}
