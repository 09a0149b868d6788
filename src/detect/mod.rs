mod backend;
mod backends;
mod labels;
mod result;

pub use backend::{open_classifier, Classifier};
pub use backends::{ScriptedClassifier, ScriptedFrame};
pub use labels::{Category, LabelTable};
pub use result::Detection;

#[cfg(feature = "backend-tract")]
pub use backends::TractClassifier;
