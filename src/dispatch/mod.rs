//! Event fan-out.
//!
//! Each configured sink gets its own worker thread and channel. `emit` only
//! enqueues, so a slow serial write or a stalled broker never holds up the
//! frame loop. Sink errors and panics stay inside the worker that raised
//! them.

mod encoding;
mod mqtt;
mod serial;

pub use encoding::ActuatorEncoding;
pub use mqtt::MqttBroadcast;
pub use serial::{open_port, SerialActuator};

use anyhow::{Context, Result};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::event::ClassificationEvent;

/// Consumer of confirmed events.
///
/// A sink is owned by its worker thread. Returning `Err` marks the delivery
/// failed; the event is not retried.
pub trait EventSink: Send {
    fn name(&self) -> &str;

    fn deliver(&mut self, event: &ClassificationEvent) -> Result<()>;

    /// Called once on the worker thread after the last delivery.
    fn close(&mut self) {}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SinkRole {
    Broadcast,
    Actuator,
}

impl SinkRole {
    pub fn as_str(self) -> &'static str {
        match self {
            SinkRole::Broadcast => "broadcast",
            SinkRole::Actuator => "actuator",
        }
    }
}

// -------------------- Stats --------------------

#[derive(Debug, Default)]
struct SinkCounters {
    delivered: AtomicU64,
    failed: AtomicU64,
}

/// Shared delivery counters, readable while workers run.
#[derive(Clone, Debug, Default)]
pub struct DispatchStats {
    emitted: Arc<AtomicU64>,
    broadcast: Arc<SinkCounters>,
    actuator: Arc<SinkCounters>,
}

impl DispatchStats {
    /// Events handed to `emit`.
    pub fn emitted(&self) -> u64 {
        self.emitted.load(Ordering::SeqCst)
    }

    pub fn delivered(&self, role: SinkRole) -> u64 {
        self.counters(role).delivered.load(Ordering::SeqCst)
    }

    pub fn failed(&self, role: SinkRole) -> u64 {
        self.counters(role).failed.load(Ordering::SeqCst)
    }

    fn counters(&self, role: SinkRole) -> &Arc<SinkCounters> {
        match role {
            SinkRole::Broadcast => &self.broadcast,
            SinkRole::Actuator => &self.actuator,
        }
    }
}

// -------------------- Workers --------------------

struct SinkWorker {
    role: SinkRole,
    name: String,
    tx: Option<Sender<ClassificationEvent>>,
    done_rx: Receiver<()>,
    handle: Option<JoinHandle<()>>,
}

impl SinkWorker {
    fn spawn(role: SinkRole, mut sink: Box<dyn EventSink>, stats: &DispatchStats) -> Result<Self> {
        let name = sink.name().to_string();
        let (tx, rx) = mpsc::channel::<ClassificationEvent>();
        let (done_tx, done_rx) = mpsc::channel();
        let counters = stats.counters(role).clone();
        let thread_name = format!("sink-{}", role.as_str());
        let worker_name = name.clone();

        let handle = std::thread::Builder::new()
            .name(thread_name)
            .spawn(move || {
                for event in rx {
                    let outcome = panic::catch_unwind(AssertUnwindSafe(|| sink.deliver(&event)));
                    match outcome {
                        Ok(Ok(())) => {
                            counters.delivered.fetch_add(1, Ordering::SeqCst);
                        }
                        Ok(Err(err)) => {
                            counters.failed.fetch_add(1, Ordering::SeqCst);
                            log::warn!(
                                "{} sink {} failed to deliver class {}: {:#}",
                                role.as_str(),
                                worker_name,
                                event.class_id,
                                err
                            );
                        }
                        Err(_) => {
                            counters.failed.fetch_add(1, Ordering::SeqCst);
                            log::error!(
                                "{} sink {} panicked delivering class {}",
                                role.as_str(),
                                worker_name,
                                event.class_id
                            );
                        }
                    }
                }
                if panic::catch_unwind(AssertUnwindSafe(|| sink.close())).is_err() {
                    log::error!("{} sink {} panicked while closing", role.as_str(), worker_name);
                }
                let _ = done_tx.send(());
            })
            .with_context(|| format!("failed to start {} sink worker", role.as_str()))?;

        Ok(Self {
            role,
            name,
            tx: Some(tx),
            done_rx,
            handle: Some(handle),
        })
    }

    fn send(&self, event: &ClassificationEvent) {
        let Some(tx) = &self.tx else {
            return;
        };
        if tx.send(event.clone()).is_err() {
            log::warn!(
                "{} sink {} is no longer running; event for class {} dropped",
                self.role.as_str(),
                self.name,
                event.class_id
            );
        }
    }
}

// -------------------- Dispatcher --------------------

pub struct Dispatcher {
    broadcast: Option<SinkWorker>,
    actuator: Option<SinkWorker>,
    stats: DispatchStats,
}

impl Dispatcher {
    /// Start a worker per available sink. A missing sink is logged here, once.
    pub fn new(
        broadcast: Option<Box<dyn EventSink>>,
        actuator: Option<Box<dyn EventSink>>,
    ) -> Result<Self> {
        let stats = DispatchStats::default();
        let broadcast = broadcast
            .map(|sink| SinkWorker::spawn(SinkRole::Broadcast, sink, &stats))
            .transpose()?;
        let actuator = actuator
            .map(|sink| SinkWorker::spawn(SinkRole::Actuator, sink, &stats))
            .transpose()?;

        match (&broadcast, &actuator) {
            (Some(_), Some(_)) => {}
            (Some(_), None) => {
                log::warn!("actuator unavailable; dispatching in broadcast-only mode")
            }
            (None, Some(_)) => {
                log::warn!("broadcast sink unavailable; dispatching to actuator only")
            }
            (None, None) => log::warn!("no sinks configured; events will only be logged"),
        }
        for worker in broadcast.iter().chain(actuator.iter()) {
            log::info!("{} sink ready: {}", worker.role.as_str(), worker.name);
        }

        Ok(Self {
            broadcast,
            actuator,
            stats,
        })
    }

    /// Enqueue `event` for every sink. Never blocks on sink I/O.
    pub fn emit(&self, event: &ClassificationEvent) {
        self.stats.emitted.fetch_add(1, Ordering::SeqCst);
        log::info!(
            "event class={} label={} score={:.2} origin={:?}",
            event.class_id,
            event.label,
            event.score,
            event.origin
        );
        for worker in self.workers() {
            worker.send(event);
        }
    }

    pub fn stats(&self) -> DispatchStats {
        self.stats.clone()
    }

    pub fn has_sink(&self, role: SinkRole) -> bool {
        match role {
            SinkRole::Broadcast => self.broadcast.is_some(),
            SinkRole::Actuator => self.actuator.is_some(),
        }
    }

    /// True when the actuator is missing.
    pub fn is_degraded(&self) -> bool {
        self.actuator.is_none()
    }

    /// Close the channels and wait up to `grace` in total for in-flight
    /// deliveries. Workers still busy after that are detached.
    pub fn shutdown(&mut self, grace: Duration) {
        let deadline = Instant::now() + grace;
        for worker in self.workers_mut() {
            worker.tx.take();
        }
        for worker in self.workers_mut() {
            let Some(handle) = worker.handle.take() else {
                continue;
            };
            let remaining = deadline.saturating_duration_since(Instant::now());
            match worker.done_rx.recv_timeout(remaining) {
                Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                    if handle.join().is_err() {
                        log::error!("{} sink worker panicked", worker.role.as_str());
                    }
                }
                Err(RecvTimeoutError::Timeout) => {
                    log::warn!(
                        "{} sink {} still busy after {:?}; detaching",
                        worker.role.as_str(),
                        worker.name,
                        grace
                    );
                }
            }
        }
    }

    fn workers(&self) -> impl Iterator<Item = &SinkWorker> {
        self.broadcast.iter().chain(self.actuator.iter())
    }

    fn workers_mut(&mut self) -> impl Iterator<Item = &mut SinkWorker> {
        self.broadcast.iter_mut().chain(self.actuator.iter_mut())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::Detection;
    use anyhow::anyhow;
    use std::sync::Mutex;

    struct Recording {
        seen: Arc<Mutex<Vec<ClassificationEvent>>>,
    }

    impl EventSink for Recording {
        fn name(&self) -> &str {
            "recording"
        }

        fn deliver(&mut self, event: &ClassificationEvent) -> Result<()> {
            self.seen.lock().unwrap().push(event.clone());
            Ok(())
        }
    }

    struct Failing;

    impl EventSink for Failing {
        fn name(&self) -> &str {
            "failing"
        }

        fn deliver(&mut self, _event: &ClassificationEvent) -> Result<()> {
            Err(anyhow!("serial port unplugged"))
        }
    }

    struct Panicking;

    impl EventSink for Panicking {
        fn name(&self) -> &str {
            "panicking"
        }

        fn deliver(&mut self, _event: &ClassificationEvent) -> Result<()> {
            panic!("firmware exploded");
        }
    }

    struct Stalled;

    impl EventSink for Stalled {
        fn name(&self) -> &str {
            "stalled"
        }

        fn deliver(&mut self, _event: &ClassificationEvent) -> Result<()> {
            std::thread::sleep(Duration::from_secs(5));
            Ok(())
        }
    }

    fn event(class_id: u32) -> ClassificationEvent {
        ClassificationEvent::debounced(Detection::new(class_id, 0.9, "can"))
    }

    #[test]
    fn failing_actuator_does_not_affect_broadcast() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut dispatcher = Dispatcher::new(
            Some(Box::new(Recording { seen: seen.clone() })),
            Some(Box::new(Failing)),
        )
        .unwrap();

        for class_id in 0..3 {
            dispatcher.emit(&event(class_id));
        }
        dispatcher.shutdown(Duration::from_secs(2));

        let stats = dispatcher.stats();
        assert_eq!(stats.emitted(), 3);
        assert_eq!(stats.delivered(SinkRole::Broadcast), 3);
        assert_eq!(stats.failed(SinkRole::Actuator), 3);
        assert_eq!(seen.lock().unwrap().len(), 3);
    }

    #[test]
    fn panicking_sink_keeps_worker_alive() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut dispatcher = Dispatcher::new(
            Some(Box::new(Recording { seen: seen.clone() })),
            Some(Box::new(Panicking)),
        )
        .unwrap();

        dispatcher.emit(&event(1));
        dispatcher.emit(&event(2));
        dispatcher.shutdown(Duration::from_secs(2));

        let stats = dispatcher.stats();
        assert_eq!(stats.failed(SinkRole::Actuator), 2);
        assert_eq!(stats.delivered(SinkRole::Broadcast), 2);
    }

    #[test]
    fn missing_actuator_is_degraded_mode() {
        let dispatcher = Dispatcher::new(
            Some(Box::new(Recording {
                seen: Arc::new(Mutex::new(Vec::new())),
            })),
            None,
        )
        .unwrap();
        assert!(dispatcher.is_degraded());
        assert!(dispatcher.has_sink(SinkRole::Broadcast));
        assert!(!dispatcher.has_sink(SinkRole::Actuator));
    }

    #[test]
    fn emit_does_not_wait_for_slow_sink_and_shutdown_is_bounded() {
        let mut dispatcher = Dispatcher::new(None, Some(Box::new(Stalled))).unwrap();

        let started = Instant::now();
        dispatcher.emit(&event(1));
        dispatcher.emit(&event(2));
        assert!(started.elapsed() < Duration::from_secs(1));

        dispatcher.shutdown(Duration::from_millis(200));
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(dispatcher.stats().delivered(SinkRole::Actuator), 0);
    }
}
