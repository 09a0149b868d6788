//! Confidence escalation.
//!
//! A motion episode starts at the onset reported by the motion gate. While
//! it stays open (motion active, no event since onset) the classifier
//! threshold drops from the normal to the reduced confidence once
//! `reduce_after` has elapsed, and a synthetic fallback event is produced
//! once `timeout_after` has elapsed. Both timers count from onset.
//!
//! An episode closes in one of three ways:
//! - an event is accepted (`resolve`), which parks the machine at `Normal`
//!   until the next onset;
//! - the timeout fires, which produces the fallback event and parks the
//!   machine the same way;
//! - motion ends first (abandoned), which resets to `Normal` with no event.

use std::time::{Duration, Instant};

use crate::config::EscalationSettings;
use crate::event::ClassificationEvent;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum EscalationLevel {
    Normal,
    ReducedConfidence,
    TimedOut,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EscalationTimers {
    pub reduce_after: Duration,
    pub timeout_after: Duration,
}

impl EscalationTimers {
    pub fn from_settings(settings: &EscalationSettings) -> Self {
        Self {
            reduce_after: settings.reduce_after,
            timeout_after: settings.timeout_after,
        }
    }
}

/// Level for `elapsed` time since onset. Never lower than `current`.
pub fn level_for(
    current: EscalationLevel,
    elapsed: Duration,
    timers: &EscalationTimers,
) -> EscalationLevel {
    let by_time = if elapsed >= timers.timeout_after {
        EscalationLevel::TimedOut
    } else if elapsed >= timers.reduce_after {
        EscalationLevel::ReducedConfidence
    } else {
        EscalationLevel::Normal
    };
    current.max(by_time)
}

/// Result of advancing the machine for one frame.
#[derive(Clone, Debug, PartialEq)]
pub struct EscalationStep {
    /// Level reached on this frame, before any reset.
    pub level: EscalationLevel,
    /// Threshold the classifier must use for this frame.
    pub threshold: f32,
    /// Synthetic event produced when the timeout fired on this frame.
    pub fallback: Option<ClassificationEvent>,
}

pub struct Escalation {
    settings: EscalationSettings,
    timers: EscalationTimers,
    level: EscalationLevel,
    episode_onset: Option<Instant>,
    resolved: bool,
}

impl Escalation {
    pub fn new(settings: EscalationSettings) -> Self {
        Self {
            timers: EscalationTimers::from_settings(&settings),
            settings,
            level: EscalationLevel::Normal,
            episode_onset: None,
            resolved: false,
        }
    }

    pub fn level(&self) -> EscalationLevel {
        self.level
    }

    /// Classifier threshold for the current level.
    pub fn threshold(&self) -> f32 {
        self.threshold_for(self.level)
    }

    /// Whether the current episode already produced its event.
    pub fn is_resolved(&self) -> bool {
        self.resolved
    }

    pub fn timers(&self) -> EscalationTimers {
        self.timers
    }

    /// Advance using the motion state observed for this frame.
    pub fn advance(
        &mut self,
        motion_active: bool,
        onset: Option<Instant>,
        now: Instant,
    ) -> EscalationStep {
        let onset = match (motion_active, onset) {
            (true, Some(onset)) => onset,
            _ => {
                self.abandon();
                return self.step(EscalationLevel::Normal, None);
            }
        };

        if self.episode_onset != Some(onset) {
            self.episode_onset = Some(onset);
            self.level = EscalationLevel::Normal;
            self.resolved = false;
        }
        if self.resolved {
            return self.step(EscalationLevel::Normal, None);
        }

        let elapsed = now.saturating_duration_since(onset);
        let next = level_for(self.level, elapsed, &self.timers);
        if next != self.level {
            log::info!(
                "escalation {:?} -> {:?} after {:.1}s of motion",
                self.level,
                next,
                elapsed.as_secs_f32()
            );
        }

        if next == EscalationLevel::TimedOut {
            let fallback = ClassificationEvent::timeout_fallback(
                self.settings.fallback_class_id,
                self.settings.fallback_score,
                &self.settings.fallback_label,
            );
            self.level = EscalationLevel::Normal;
            self.resolved = true;
            return EscalationStep {
                level: EscalationLevel::TimedOut,
                threshold: self.threshold(),
                fallback: Some(fallback),
            };
        }

        self.level = next;
        self.step(next, None)
    }

    /// An event fired for the current episode: back to `Normal`, and stay
    /// there until motion ends and a new onset occurs.
    pub fn resolve(&mut self) {
        if self.episode_onset.is_some() {
            self.resolved = true;
        }
        self.level = EscalationLevel::Normal;
    }

    /// Motion ended: forget the episode.
    pub fn abandon(&mut self) {
        if self.episode_onset.is_some() && !self.resolved && self.level != EscalationLevel::Normal
        {
            log::debug!("escalation episode abandoned at {:?}", self.level);
        }
        self.level = EscalationLevel::Normal;
        self.episode_onset = None;
        self.resolved = false;
    }

    fn threshold_for(&self, level: EscalationLevel) -> f32 {
        match level {
            EscalationLevel::Normal => self.settings.normal_confidence,
            EscalationLevel::ReducedConfidence | EscalationLevel::TimedOut => {
                self.settings.reduced_confidence
            }
        }
    }

    fn step(
        &self,
        level: EscalationLevel,
        fallback: Option<ClassificationEvent>,
    ) -> EscalationStep {
        EscalationStep {
            level,
            threshold: self.threshold_for(level),
            fallback,
        }
    }
}
