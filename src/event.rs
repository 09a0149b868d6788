use serde::{Deserialize, Serialize};

use crate::detect::Detection;

// -------------------- Events --------------------

/// Why an event was produced.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EventOrigin {
    /// N consecutive detection-bearing frames agreed on the class.
    Debounced,
    /// Motion persisted past the escalation timeout without a stable class.
    TimeoutFallback,
}

/// A confirmed classification handed to the dispatcher.
///
/// Events are one-shot: sinks receive clones and the pipeline never retries
/// delivery.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ClassificationEvent {
    pub class_id: u32,
    pub score: f32,
    pub label: String,
    pub origin: EventOrigin,
}

impl ClassificationEvent {
    pub fn debounced(detection: Detection) -> Self {
        Self {
            class_id: detection.class_id,
            score: detection.score,
            label: detection.label,
            origin: EventOrigin::Debounced,
        }
    }

    pub fn timeout_fallback(class_id: u32, score: f32, label: &str) -> Self {
        Self {
            class_id,
            score,
            label: label.to_string(),
            origin: EventOrigin::TimeoutFallback,
        }
    }

    /// Dashboard payload for this event.
    pub fn broadcast_payload(&self) -> BroadcastPayload {
        BroadcastPayload {
            cls_id: self.class_id,
            score: self.score,
            label: self.label.clone(),
        }
    }
}

/// JSON structure published to dashboard observers.
///
/// Field names are part of the dashboard contract and must not change.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct BroadcastPayload {
    pub cls_id: u32,
    pub score: f32,
    pub label: String,
}
