pub mod scripted;

#[cfg(feature = "backend-tract")]
pub mod tract;

pub use scripted::{ScriptedClassifier, ScriptedFrame};

#[cfg(feature = "backend-tract")]
pub use tract::TractClassifier;
