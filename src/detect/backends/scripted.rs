//! Scripted classifier backend.
//!
//! Replays a fixed sequence of per-frame detections instead of running a
//! model. Used for bench runs of the actuator, dashboard demos and tests.
//! Like a real detector, it only returns boxes at or above the threshold it
//! is called with, so escalation has a visible effect.

use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::Path;

use crate::detect::backend::Classifier;
use crate::detect::labels::LabelTable;
use crate::detect::result::Detection;
use crate::frame::Frame;

/// Detections scripted for one frame, in classifier order.
pub type ScriptedFrame = Vec<Detection>;

#[derive(Debug, Deserialize)]
struct ScriptFile {
    frames: Vec<Vec<ScriptBox>>,
    #[serde(default = "default_repeat")]
    repeat: bool,
}

#[derive(Debug, Deserialize)]
struct ScriptBox {
    class_id: u32,
    score: f32,
    label: Option<String>,
}

fn default_repeat() -> bool {
    true
}

pub struct ScriptedClassifier {
    frames: Vec<ScriptedFrame>,
    cursor: usize,
    repeat: bool,
}

impl ScriptedClassifier {
    /// Replay `frames` once; calls past the end return no detections.
    pub fn new(frames: Vec<ScriptedFrame>) -> Self {
        Self {
            frames,
            cursor: 0,
            repeat: false,
        }
    }

    /// Replay `frames` forever.
    pub fn cycling(frames: Vec<ScriptedFrame>) -> Self {
        Self {
            repeat: true,
            ..Self::new(frames)
        }
    }

    /// Load a JSON script: `{"frames": [[{"class_id": 3, "score": 0.9}], []], "repeat": true}`.
    /// Missing labels are filled from the label table.
    pub fn from_path(path: &Path, labels: &LabelTable) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| anyhow!("failed to read classifier script {}: {}", path.display(), e))?;
        let script: ScriptFile = serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid classifier script {}: {}", path.display(), e))?;
        if script.frames.is_empty() {
            return Err(anyhow!("classifier script {} has no frames", path.display()));
        }
        let frames = script
            .frames
            .into_iter()
            .map(|boxes| {
                boxes
                    .into_iter()
                    .map(|b| Detection {
                        label: b.label.unwrap_or_else(|| labels.label(b.class_id)),
                        class_id: b.class_id,
                        score: b.score,
                    })
                    .collect()
            })
            .collect();
        Ok(Self {
            frames,
            cursor: 0,
            repeat: script.repeat,
        })
    }

    /// Built-in bench script: an empty belt, a confident can, an empty belt,
    /// then a battery the model is unsure about.
    pub fn bench(labels: &LabelTable) -> Self {
        let mut frames: Vec<ScriptedFrame> = Vec::new();
        frames.extend(std::iter::repeat_with(Vec::new).take(40));
        frames.extend(
            std::iter::repeat_with(|| vec![Detection::new(3, 0.91, &labels.label(3))]).take(60),
        );
        frames.extend(std::iter::repeat_with(Vec::new).take(40));
        frames.extend(
            std::iter::repeat_with(|| vec![Detection::new(2, 0.62, &labels.label(2))]).take(120),
        );
        Self::cycling(frames)
    }

    /// Number of scripted frames.
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    fn next_scripted(&mut self) -> Option<&ScriptedFrame> {
        if self.frames.is_empty() {
            return None;
        }
        if self.cursor >= self.frames.len() {
            if !self.repeat {
                return None;
            }
            self.cursor = 0;
        }
        let frame = &self.frames[self.cursor];
        self.cursor += 1;
        Some(frame)
    }
}

impl Classifier for ScriptedClassifier {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn predict(&mut self, _frame: &Frame, threshold: f32) -> Result<Vec<Detection>> {
        Ok(self
            .next_scripted()
            .map(|boxes| {
                boxes
                    .iter()
                    .filter(|d| d.score >= threshold)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn frame() -> Frame {
        Frame::from_rgb(vec![0u8; 12], 2, 2, 1).unwrap()
    }

    #[test]
    fn filters_by_threshold() {
        let mut classifier = ScriptedClassifier::cycling(vec![vec![
            Detection::new(1, 0.9, "brick"),
            Detection::new(2, 0.6, "battery"),
        ]]);

        let strict = classifier.predict(&frame(), 0.8).unwrap();
        assert_eq!(strict.len(), 1);
        assert_eq!(strict[0].class_id, 1);

        let relaxed = classifier.predict(&frame(), 0.5).unwrap();
        assert_eq!(relaxed.len(), 2);
    }

    #[test]
    fn one_shot_script_runs_dry() {
        let mut classifier = ScriptedClassifier::new(vec![vec![Detection::new(1, 0.9, "brick")]]);
        assert_eq!(classifier.predict(&frame(), 0.5).unwrap().len(), 1);
        assert!(classifier.predict(&frame(), 0.5).unwrap().is_empty());
    }

    #[test]
    fn loads_script_and_fills_labels() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(
            br#"{"frames": [[{"class_id": 3, "score": 0.95}], [{"class_id": 7, "score": 0.9, "label": "tablet"}]], "repeat": false}"#,
        )
        .unwrap();

        let mut classifier =
            ScriptedClassifier::from_path(file.path(), &LabelTable::default()).unwrap();
        assert_eq!(classifier.len(), 2);
        assert_eq!(classifier.predict(&frame(), 0.8).unwrap()[0].label, "can");
        assert_eq!(classifier.predict(&frame(), 0.8).unwrap()[0].label, "tablet");
        assert!(classifier.predict(&frame(), 0.8).unwrap().is_empty());
    }

    #[test]
    fn rejects_empty_script() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(br#"{"frames": []}"#).unwrap();
        assert!(ScriptedClassifier::from_path(file.path(), &LabelTable::default()).is_err());
    }
}
