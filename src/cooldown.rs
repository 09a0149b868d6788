use std::time::{Duration, Instant};

use crate::event::ClassificationEvent;

/// At most one accepted event per cooldown period.
///
/// `last_emit` only moves on acceptance; rejected candidates do not extend
/// the window.
pub struct CooldownGate {
    period: Duration,
    last_emit: Option<Instant>,
}

impl CooldownGate {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            last_emit: None,
        }
    }

    /// Hand `event` back for dispatch if the gate is open at `now`.
    pub fn try_emit(
        &mut self,
        event: ClassificationEvent,
        now: Instant,
    ) -> Option<ClassificationEvent> {
        if let Some(last) = self.last_emit {
            let since = now.saturating_duration_since(last);
            if since < self.period {
                log::debug!(
                    "cooldown rejected class {} ({:?} origin), {:.1}s since last event",
                    event.class_id,
                    event.origin,
                    since.as_secs_f32()
                );
                return None;
            }
        }
        self.last_emit = Some(now);
        Some(event)
    }

    pub fn last_emit(&self) -> Option<Instant> {
        self.last_emit
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::Detection;

    fn event(class_id: u32) -> ClassificationEvent {
        ClassificationEvent::debounced(Detection::new(class_id, 0.9, "x"))
    }

    #[test]
    fn first_event_always_passes() {
        let mut gate = CooldownGate::new(Duration::from_secs(7));
        let now = Instant::now();
        assert!(gate.try_emit(event(3), now).is_some());
        assert_eq!(gate.last_emit(), Some(now));
    }

    #[test]
    fn rejects_within_period_regardless_of_class() {
        let mut gate = CooldownGate::new(Duration::from_secs(7));
        let t0 = Instant::now();
        assert!(gate.try_emit(event(3), t0).is_some());
        assert!(gate.try_emit(event(3), t0 + Duration::from_secs(2)).is_none());
        assert!(gate.try_emit(event(5), t0 + Duration::from_millis(6999)).is_none());
        assert_eq!(gate.last_emit(), Some(t0));
        assert!(gate.try_emit(event(5), t0 + Duration::from_secs(7)).is_some());
    }
}
