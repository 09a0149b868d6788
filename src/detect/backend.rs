use anyhow::{anyhow, Result};

use crate::config::{ClassifierSettings, SourceSettings};
use crate::detect::labels::LabelTable;
use crate::detect::result::Detection;
use crate::frame::Frame;

/// Classifier adapter contract.
///
/// The detector model is a black box: given a frame and the confidence
/// threshold chosen by the escalation machine, it returns the boxes it found,
/// in its own order. Calls are synchronous and happen once per frame.
///
/// A failing call is contained to its frame by the pipeline; implementations
/// should return `Err` rather than panic.
pub trait Classifier: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run detection on a frame, keeping boxes with `score >= threshold`.
    fn predict(&mut self, frame: &Frame, threshold: f32) -> Result<Vec<Detection>>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Build the classifier selected by configuration.
pub fn open_classifier(
    settings: &ClassifierSettings,
    source: &SourceSettings,
    labels: &LabelTable,
) -> Result<Box<dyn Classifier>> {
    match settings.backend.as_str() {
        "scripted" => {
            let classifier = match &settings.script_path {
                Some(path) => super::ScriptedClassifier::from_path(path, labels)?,
                None => super::ScriptedClassifier::bench(labels),
            };
            Ok(Box::new(classifier))
        }
        "tract" => open_tract(settings, source, labels),
        other => Err(anyhow!("unknown classifier backend '{}'", other)),
    }
}

#[cfg(feature = "backend-tract")]
fn open_tract(
    settings: &ClassifierSettings,
    source: &SourceSettings,
    labels: &LabelTable,
) -> Result<Box<dyn Classifier>> {
    let model_path = settings
        .model_path
        .as_ref()
        .ok_or_else(|| anyhow!("classifier backend 'tract' requires a model path"))?;
    let classifier =
        super::TractClassifier::new(model_path, source.width, source.height, labels.clone())?;
    Ok(Box::new(classifier))
}

#[cfg(not(feature = "backend-tract"))]
fn open_tract(
    _settings: &ClassifierSettings,
    _source: &SourceSettings,
    _labels: &LabelTable,
) -> Result<Box<dyn Classifier>> {
    Err(anyhow!(
        "classifier backend 'tract' requires the backend-tract feature"
    ))
}
