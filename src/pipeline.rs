//! The frame loop.
//!
//! `Pipeline` owns every piece of per-stream state (motion baseline,
//! escalation episode, debounce slot, cooldown clock) and drives them in a
//! fixed order for each frame:
//!
//! motion gate → escalation → classifier → debouncer → cooldown → dispatcher
//!
//! Nothing here is global, so independent pipelines can run side by side.

use anyhow::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::config::{RuntimeSettings, SorterConfig};
use crate::cooldown::CooldownGate;
use crate::debounce::Debouncer;
use crate::detect::{Classifier, Detection};
use crate::dispatch::{DispatchStats, Dispatcher, SinkRole};
use crate::escalation::{Escalation, EscalationLevel};
use crate::event::{ClassificationEvent, EventOrigin};
use crate::frame::{Frame, FrameSource};
use crate::motion::{MotionGate, MotionObservation, MotionTransition};

/// What happened to one frame.
#[derive(Clone, Debug, PartialEq)]
pub struct FrameOutcome {
    pub frame_index: u64,
    pub motion: MotionObservation,
    /// Escalation level reached on this frame.
    pub level: EscalationLevel,
    /// Threshold the classifier was called with.
    pub threshold: f32,
    pub detections: usize,
    pub classifier_failed: bool,
    /// Stable classification reported by the debouncer, if any.
    pub stable: Option<Detection>,
    /// Event accepted by the cooldown gate and handed to the dispatcher.
    pub emitted: Option<ClassificationEvent>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub frames: u64,
    pub events: u64,
    pub fallbacks: u64,
    pub classifier_failures: u64,
    /// The loop ended because shutdown was requested.
    pub interrupted: bool,
}

pub struct Pipeline {
    motion: MotionGate,
    escalation: Escalation,
    debouncer: Debouncer,
    cooldown: CooldownGate,
    dispatcher: Dispatcher,
    runtime: RuntimeSettings,
    frame_interval: Option<Duration>,
    summary: RunSummary,
}

impl Pipeline {
    pub fn new(config: &SorterConfig, dispatcher: Dispatcher) -> Self {
        let frame_interval = match config.source.target_fps {
            0 => None,
            fps => Some(Duration::from_secs_f64(1.0 / fps as f64)),
        };
        Self {
            motion: MotionGate::new(config.motion),
            escalation: Escalation::new(config.escalation.clone()),
            debouncer: Debouncer::new(config.debounce_frames),
            cooldown: CooldownGate::new(config.cooldown),
            dispatcher,
            runtime: config.runtime,
            frame_interval,
            summary: RunSummary::default(),
        }
    }

    /// Run every stage for one frame at `now`.
    ///
    /// A classifier error is contained to this frame: it is logged, the
    /// debouncer is not fed, and escalation keeps its clock.
    pub fn process_frame(
        &mut self,
        frame: &Frame,
        classifier: &mut dyn Classifier,
        now: Instant,
    ) -> FrameOutcome {
        self.summary.frames += 1;

        let motion = self.motion.observe(frame, now);
        match motion.transition {
            MotionTransition::Started => {
                log::debug!(
                    "motion started on frame {} ({:.1}% changed)",
                    frame.index,
                    motion.changed_ratio * 100.0
                );
            }
            MotionTransition::Ended => log::debug!("motion ended on frame {}", frame.index),
            MotionTransition::None => {}
        }

        let step = self.escalation.advance(motion.active, motion.onset, now);
        let mut emitted = None;
        if let Some(fallback) = step.fallback {
            log::info!(
                "no stable classification after {:?} of motion; forcing class {}",
                self.escalation.timers().timeout_after,
                fallback.class_id
            );
            emitted = self.submit(fallback, now);
        }

        let started = Instant::now();
        let predicted = classifier.predict(frame, step.threshold);
        let took = started.elapsed();
        if took > self.runtime.inference_budget {
            log::warn!(
                "{} inference took {:?} on frame {} (budget {:?}); escalation timing may drift",
                classifier.name(),
                took,
                frame.index,
                self.runtime.inference_budget
            );
        }

        let (detections, classifier_failed) = match predicted {
            Ok(detections) => (detections, false),
            Err(err) => {
                self.summary.classifier_failures += 1;
                log::warn!(
                    "{} failed on frame {}: {:#}",
                    classifier.name(),
                    frame.index,
                    err
                );
                (Vec::new(), true)
            }
        };

        let mut stable = None;
        if !classifier_failed {
            stable = self.debouncer.observe(&detections);
            if let Some(detection) = &stable {
                let event = ClassificationEvent::debounced(detection.clone());
                if let Some(accepted) = self.submit(event, now) {
                    self.escalation.resolve();
                    emitted = Some(accepted);
                }
            }
        }

        FrameOutcome {
            frame_index: frame.index,
            motion,
            level: step.level,
            threshold: step.threshold,
            detections: detections.len(),
            classifier_failed,
            stable,
            emitted,
        }
    }

    /// Pull frames until the source ends, `stop` is set, or `max_frames`
    /// frames have been processed. The source is released on every exit
    /// path; a source error is returned after release.
    pub fn run(
        &mut self,
        source: &mut dyn FrameSource,
        classifier: &mut dyn Classifier,
        stop: &AtomicBool,
        max_frames: Option<u64>,
    ) -> Result<RunSummary> {
        log::info!(
            "pipeline running on {} with {} classifier",
            source.describe(),
            classifier.name()
        );
        let first_frame = self.summary.frames;
        let mut last_health = Instant::now();

        loop {
            if stop.load(Ordering::SeqCst) {
                log::info!("shutdown requested; leaving frame loop");
                self.summary.interrupted = true;
                break;
            }
            if let Some(max) = max_frames {
                if self.summary.frames - first_frame >= max {
                    log::info!("frame limit {} reached", max);
                    break;
                }
            }

            let tick = Instant::now();
            let frame = match source.next_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    log::info!("{} exhausted", source.describe());
                    break;
                }
                Err(err) => {
                    log::error!("frame source {} failed: {:#}", source.describe(), err);
                    source.release();
                    return Err(err.context("frame source failed"));
                }
            };

            self.process_frame(&frame, classifier, frame.captured_at);

            if last_health.elapsed() >= self.runtime.health_interval {
                self.log_health();
                last_health = Instant::now();
            }
            if let Some(interval) = self.frame_interval {
                let spent = tick.elapsed();
                if spent < interval {
                    std::thread::sleep(interval - spent);
                }
            }
        }

        source.release();
        Ok(self.summary())
    }

    /// Drain sink workers within the configured grace period.
    pub fn shutdown(&mut self) {
        self.dispatcher.shutdown(self.runtime.dispatch_grace);
    }

    pub fn summary(&self) -> RunSummary {
        self.summary.clone()
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn stats(&self) -> DispatchStats {
        self.dispatcher.stats()
    }

    pub fn escalation(&self) -> &Escalation {
        &self.escalation
    }

    pub fn debouncer(&self) -> &Debouncer {
        &self.debouncer
    }

    fn submit(&mut self, event: ClassificationEvent, now: Instant) -> Option<ClassificationEvent> {
        let accepted = self.cooldown.try_emit(event, now)?;
        self.dispatcher.emit(&accepted);
        self.summary.events += 1;
        if accepted.origin == EventOrigin::TimeoutFallback {
            self.summary.fallbacks += 1;
        }
        Some(accepted)
    }

    fn log_health(&self) {
        let stats = self.dispatcher.stats();
        log::info!(
            "health: frames={} events={} fallbacks={} classifier_failures={} motion={} level={:?} broadcast={}/{} actuator={}/{}",
            self.summary.frames,
            self.summary.events,
            self.summary.fallbacks,
            self.summary.classifier_failures,
            self.motion.is_active(),
            self.escalation.level(),
            stats.delivered(SinkRole::Broadcast),
            stats.failed(SinkRole::Broadcast),
            stats.delivered(SinkRole::Actuator),
            stats.failed(SinkRole::Actuator),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::ScriptedClassifier;
    use anyhow::anyhow;

    struct Broken;

    impl Classifier for Broken {
        fn name(&self) -> &'static str {
            "broken"
        }

        fn predict(&mut self, _frame: &Frame, _threshold: f32) -> Result<Vec<Detection>> {
            Err(anyhow!("accelerator reset"))
        }
    }

    /// Yields one frame, then fails.
    #[derive(Default)]
    struct Unplugged {
        produced: u64,
        released: bool,
    }

    impl FrameSource for Unplugged {
        fn describe(&self) -> String {
            "unplugged".to_string()
        }

        fn next_frame(&mut self) -> Result<Option<Frame>> {
            if self.produced > 0 {
                return Err(anyhow!("device disconnected"));
            }
            self.produced += 1;
            Ok(Some(frame(1)))
        }

        fn frames_captured(&self) -> u64 {
            self.produced
        }

        fn release(&mut self) {
            self.released = true;
        }
    }

    fn frame(index: u64) -> Frame {
        Frame::from_rgb(vec![50u8; 16 * 12 * 3], 16, 12, index).unwrap()
    }

    fn pipeline() -> Pipeline {
        let mut config = SorterConfig::default();
        config.source.target_fps = 0;
        Pipeline::new(&config, Dispatcher::new(None, None).unwrap())
    }

    #[test]
    fn classifier_failure_is_contained() {
        let mut pipeline = pipeline();
        let outcome = pipeline.process_frame(&frame(1), &mut Broken, Instant::now());
        assert!(outcome.classifier_failed);
        assert!(outcome.emitted.is_none());
        assert_eq!(pipeline.summary().classifier_failures, 1);
        assert_eq!(pipeline.debouncer().state().consecutive_count, 0);
    }

    #[test]
    fn debounced_detection_is_emitted_once() {
        let mut pipeline = pipeline();
        let mut classifier =
            ScriptedClassifier::cycling(vec![vec![Detection::new(3, 0.9, "can")]]);
        let t0 = Instant::now();
        let mut emitted = Vec::new();
        for i in 1..=12 {
            let now = t0 + Duration::from_millis(100 * i);
            let outcome = pipeline.process_frame(&frame(i), &mut classifier, now);
            if let Some(event) = outcome.emitted {
                emitted.push((i, event));
            }
        }
        assert_eq!(emitted.len(), 1);
        assert_eq!(emitted[0].0, 5);
        assert_eq!(emitted[0].1.origin, EventOrigin::Debounced);
        assert_eq!(pipeline.stats().emitted(), 1);
    }

    #[test]
    fn run_stops_at_frame_limit_and_releases_source() {
        let mut pipeline = pipeline();
        let mut source = crate::ingest::SyntheticSource::new("t", 32, 24);
        let mut classifier = ScriptedClassifier::new(Vec::new());
        let stop = AtomicBool::new(false);
        let summary = pipeline
            .run(&mut source, &mut classifier, &stop, Some(7))
            .unwrap();
        assert_eq!(summary.frames, 7);
        assert!(!summary.interrupted);
        assert!(source.next_frame().unwrap().is_none());
    }

    #[test]
    fn run_honours_stop_flag() {
        let mut pipeline = pipeline();
        let mut source = crate::ingest::SyntheticSource::new("t", 32, 24);
        let mut classifier = ScriptedClassifier::new(Vec::new());
        let stop = AtomicBool::new(true);
        let summary = pipeline
            .run(&mut source, &mut classifier, &stop, None)
            .unwrap();
        assert_eq!(summary.frames, 0);
        assert!(summary.interrupted);
    }

    #[test]
    fn source_error_releases_source_and_is_returned() {
        let mut pipeline = pipeline();
        let mut source = Unplugged::default();
        let mut classifier = ScriptedClassifier::new(Vec::new());
        let stop = AtomicBool::new(false);
        let err = pipeline
            .run(&mut source, &mut classifier, &stop, None)
            .unwrap_err();
        assert!(err.to_string().contains("frame source failed"));
        assert!(source.released);
        assert_eq!(pipeline.summary().frames, 1);
    }
}
