use crate::detect::Detection;

/// Single-slot debounce state.
///
/// `consecutive_count` is the number of immediately preceding observations,
/// the current one included, that agreed on `last_class_id`. It drops to 0
/// after a stable report while `last_class_id` is kept.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DebounceState {
    pub last_class_id: Option<u32>,
    pub consecutive_count: u32,
}

pub struct Debouncer {
    threshold: u32,
    state: DebounceState,
}

impl Debouncer {
    /// `threshold` is the number of agreeing observations required; values
    /// below 1 are treated as 1.
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold: threshold.max(1),
            state: DebounceState::default(),
        }
    }

    /// Feed one frame's detections, in classifier order.
    ///
    /// A frame without detections is skipped entirely. With several boxes
    /// only the last one's outcome persists, and if more than one becomes
    /// stable in the same frame the last is reported.
    pub fn observe(&mut self, detections: &[Detection]) -> Option<Detection> {
        let mut stable = None;
        for detection in detections {
            if self.state.last_class_id == Some(detection.class_id) {
                self.state.consecutive_count += 1;
            } else {
                self.state = DebounceState {
                    last_class_id: Some(detection.class_id),
                    consecutive_count: 1,
                };
            }
            if self.state.consecutive_count >= self.threshold {
                self.state.consecutive_count = 0;
                stable = Some(detection.clone());
            }
        }
        if let Some(detection) = &stable {
            log::debug!(
                "stable classification {} ({}) at {:.2}",
                detection.class_id,
                detection.label,
                detection.score
            );
        }
        stable
    }

    pub fn state(&self) -> DebounceState {
        self.state
    }
}
