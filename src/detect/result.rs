use serde::{Deserialize, Serialize};

/// One detected box from a single classifier invocation.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Detection {
    pub class_id: u32,
    /// Confidence in [0, 1].
    pub score: f32,
    pub label: String,
}

impl Detection {
    pub fn new(class_id: u32, score: f32, label: &str) -> Self {
        Self {
            class_id,
            score,
            label: label.to_string(),
        }
    }
}
