//! Sorter Kernel
//!
//! Turns the noisy per-frame output of an object detector into a small number
//! of debounced classification events, and hands those events to a serial
//! actuator and to dashboard observers.
//!
//! # Architecture
//!
//! One frame flows through the stages in order:
//!
//! 1. **Motion gate**: single-step frame differencing decides whether the
//!    scene is changing and reports motion onset.
//! 2. **Escalation**: while an episode of motion stays unresolved, the
//!    confidence threshold is lowered after T1 and a fallback event is forced
//!    at the timeout.
//! 3. **Classifier**: external detector invoked with the current threshold.
//! 4. **Debouncer**: N consecutive detection-bearing frames of one class make
//!    a stable classification.
//! 5. **Cooldown gate**: at most one event per cooldown period.
//! 6. **Dispatcher**: fans the event out to isolated sink workers.
//!
//! # Module Structure
//!
//! - `frame` / `ingest`: frames and the pull-based sources that produce them
//! - `motion`, `escalation`, `debounce`, `cooldown`: pipeline state machines
//! - `detect`: classifier contract, label table and backends
//! - `dispatch` / `transport`: sinks, worker threads and MQTT broker plumbing
//! - `pipeline`: the frame loop that owns all state

pub mod config;
pub mod cooldown;
pub mod debounce;
pub mod detect;
pub mod dispatch;
pub mod escalation;
pub mod event;
pub mod frame;
pub mod ingest;
pub mod motion;
pub mod pipeline;
pub mod transport;

pub use config::SorterConfig;
pub use cooldown::CooldownGate;
pub use debounce::{DebounceState, Debouncer};
pub use detect::{Classifier, Detection, LabelTable, ScriptedClassifier};
pub use dispatch::{DispatchStats, Dispatcher, EventSink, SinkRole};
pub use escalation::{Escalation, EscalationLevel, EscalationStep, EscalationTimers};
pub use event::{BroadcastPayload, ClassificationEvent, EventOrigin};
pub use frame::{Frame, FrameSource};
pub use ingest::{open_source, ImageDirSource, SyntheticSource};
pub use motion::{MotionGate, MotionObservation, MotionTransition};
pub use pipeline::{FrameOutcome, Pipeline, RunSummary};
