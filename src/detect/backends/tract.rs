#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use tract_onnx::prelude::*;

use crate::detect::backend::Classifier;
use crate::detect::labels::LabelTable;
use crate::detect::result::Detection;
use crate::frame::Frame;

const NMS_IOU: f32 = 0.45;

/// Tract-based backend for YOLO-style ONNX detectors.
///
/// Expects an exported model with input `[1, 3, H, W]` (RGB, 0..1) and a
/// single output `[1, 4 + classes, anchors]` holding centre/size boxes
/// followed by per-class scores.
pub struct TractClassifier {
    model: SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>,
    width: u32,
    height: u32,
    labels: LabelTable,
}

#[derive(Clone, Copy, Debug)]
struct Candidate {
    class_id: u32,
    score: f32,
    cx: f32,
    cy: f32,
    w: f32,
    h: f32,
}

impl TractClassifier {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(
        model_path: P,
        width: u32,
        height: u32,
        labels: LabelTable,
    ) -> Result<Self> {
        let model_path = model_path.as_ref();
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(
                    f32::datum_type(),
                    tvec!(1, 3, height as usize, width as usize),
                ),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        log::info!(
            "tract classifier loaded {} ({}x{}, {} labels)",
            model_path.display(),
            width,
            height,
            labels.len()
        );
        Ok(Self {
            model,
            width,
            height,
            labels,
        })
    }

    fn build_input(&self, frame: &Frame) -> Result<Tensor> {
        if frame.width != self.width || frame.height != self.height {
            return Err(anyhow!(
                "frame size {}x{} does not match model input {}x{}",
                frame.width,
                frame.height,
                self.width,
                self.height
            ));
        }
        let pixels = frame.pixels();
        let width = frame.width as usize;
        let input = tract_ndarray::Array4::from_shape_fn(
            (1, 3, frame.height as usize, width),
            |(_, channel, y, x)| pixels[(y * width + x) * 3 + channel] as f32 / 255.0,
        );
        Ok(input.into_tensor())
    }

    fn decode(&self, outputs: TVec<TValue>, threshold: f32) -> Result<Vec<Candidate>> {
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let view = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?;
        let shape = view.shape().to_vec();
        if shape.len() != 3 || shape[0] != 1 || shape[1] <= 4 {
            return Err(anyhow!("unexpected detector output shape {:?}", shape));
        }
        let classes = shape[1] - 4;
        let anchors = shape[2];

        let mut candidates = Vec::new();
        for i in 0..anchors {
            let mut best = (0usize, f32::NEG_INFINITY);
            for c in 0..classes {
                let score = view[[0, 4 + c, i]];
                if score > best.1 {
                    best = (c, score);
                }
            }
            if best.1 >= threshold {
                candidates.push(Candidate {
                    class_id: best.0 as u32,
                    score: best.1,
                    cx: view[[0, 0, i]],
                    cy: view[[0, 1, i]],
                    w: view[[0, 2, i]],
                    h: view[[0, 3, i]],
                });
            }
        }
        Ok(non_max_suppression(candidates, NMS_IOU))
    }
}

impl Classifier for TractClassifier {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn predict(&mut self, frame: &Frame, threshold: f32) -> Result<Vec<Detection>> {
        let input = self.build_input(frame)?;
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        let kept = self.decode(outputs, threshold)?;
        Ok(kept
            .into_iter()
            .map(|c| Detection {
                class_id: c.class_id,
                score: c.score,
                label: self.labels.label(c.class_id),
            })
            .collect())
    }
}

/// Class-agnostic NMS; survivors are sorted by descending score.
fn non_max_suppression(mut candidates: Vec<Candidate>, iou_limit: f32) -> Vec<Candidate> {
    candidates.sort_by(|a, b| b.score.total_cmp(&a.score));
    let mut kept: Vec<Candidate> = Vec::new();
    for cand in candidates {
        if kept.iter().all(|k| iou(k, &cand) <= iou_limit) {
            kept.push(cand);
        }
    }
    kept
}

fn iou(a: &Candidate, b: &Candidate) -> f32 {
    let (ax0, ay0, ax1, ay1) = corners(a);
    let (bx0, by0, bx1, by1) = corners(b);
    let iw = (ax1.min(bx1) - ax0.max(bx0)).max(0.0);
    let ih = (ay1.min(by1) - ay0.max(by0)).max(0.0);
    let inter = iw * ih;
    let union = a.w * a.h + b.w * b.h - inter;
    if union <= 0.0 {
        0.0
    } else {
        inter / union
    }
}

fn corners(c: &Candidate) -> (f32, f32, f32, f32) {
    (
        c.cx - c.w / 2.0,
        c.cy - c.h / 2.0,
        c.cx + c.w / 2.0,
        c.cy + c.h / 2.0,
    )
}
