//! sorterd - sorting line daemon
//!
//! This daemon:
//! 1. Pulls frames from the configured source
//! 2. Gates on motion and escalates the classifier threshold per episode
//! 3. Debounces detections into classification events, one per cooldown
//! 4. Publishes events to dashboards (MQTT) and the sorting actuator (serial)

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use sorter_kernel::detect::open_classifier;
use sorter_kernel::dispatch::{MqttBroadcast, SerialActuator};
use sorter_kernel::{
    open_source, Dispatcher, EventSink, LabelTable, Pipeline, SinkRole, SorterConfig,
};

#[path = "../ui.rs"]
mod ui;

#[derive(Parser, Debug)]
#[command(author, version, about = "Debounced classification daemon for a sorting line")]
struct Args {
    /// Configuration file (.toml or .json).
    #[arg(long, env = "SORTER_CONFIG")]
    config: Option<PathBuf>,

    /// Frame source (stub://<name> or an image directory). Overrides config.
    #[arg(long)]
    source: Option<String>,

    /// Serial port of the actuator. Overrides config; empty disables it.
    #[arg(long)]
    serial_port: Option<String>,

    /// MQTT broker for dashboards. Overrides config; empty disables it.
    #[arg(long)]
    mqtt_broker: Option<String>,

    /// Stop after this many frames.
    #[arg(long)]
    max_frames: Option<u64>,

    /// UI mode for stderr progress (auto|plain|pretty).
    #[arg(long, default_value = "auto", value_name = "MODE")]
    ui: String,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let ui = ui::Ui::detect(&args.ui);

    let stage = ui.stage("Load configuration");
    let mut cfg = SorterConfig::load_from(args.config.as_deref())?;
    if let Some(uri) = &args.source {
        cfg.source.uri = uri.clone();
    }
    if let Some(port) = &args.serial_port {
        cfg.set_serial_port(port);
    }
    if let Some(addr) = &args.mqtt_broker {
        cfg.set_broker(addr);
    }
    cfg.validate()?;
    stage.ok();

    let stage = ui.stage("Load classifier");
    let labels = LabelTable::from_settings(&cfg.labels);
    let mut classifier = open_classifier(&cfg.classifier, &cfg.source, &labels)?;
    classifier
        .warm_up()
        .with_context(|| format!("{} classifier warm-up failed", classifier.name()))?;
    ui.note(&format!("{} backend, {} labels", classifier.name(), labels.len()));
    stage.ok();

    let broadcast: Option<Box<dyn EventSink>> = match &cfg.broadcast {
        Some(settings) => {
            let stage = ui.stage("Connect dashboard broadcast");
            match MqttBroadcast::connect(settings) {
                Ok(sink) => {
                    stage.ok();
                    Some(Box::new(sink))
                }
                Err(err) => {
                    log::warn!("dashboard broadcast disabled: {:#}", err);
                    stage.warn("disabled");
                    None
                }
            }
        }
        None => None,
    };

    let actuator: Option<Box<dyn EventSink>> = match &cfg.actuator {
        Some(settings) => {
            let stage = ui.stage("Open actuator");
            match SerialActuator::open(settings, labels.clone()) {
                Ok(sink) => {
                    stage.ok();
                    Some(Box::new(sink))
                }
                Err(err) => {
                    log::warn!("actuator disabled: {:#}", err);
                    stage.warn("disabled");
                    None
                }
            }
        }
        None => None,
    };

    let dispatcher = Dispatcher::new(broadcast, actuator)?;
    let mut pipeline = Pipeline::new(&cfg, dispatcher);

    let stop = Arc::new(AtomicBool::new(false));
    let stop_handler = stop.clone();
    ctrlc::set_handler(move || {
        stop_handler.store(true, Ordering::SeqCst);
    })
    .expect("error setting Ctrl-C handler");

    // Opened last so an earlier startup failure never holds the device.
    let stage = ui.stage("Open frame source");
    let mut source = match open_source(&cfg.source) {
        Ok(source) => source,
        Err(err) => {
            pipeline.shutdown();
            return Err(err);
        }
    };
    ui.note(&source.describe());
    stage.ok();

    log::info!(
        "sorterd running (debounce {} frames, cooldown {:?}, escalation {:?}/{:?})",
        cfg.debounce_frames,
        cfg.cooldown,
        cfg.escalation.reduce_after,
        cfg.escalation.timeout_after
    );
    let outcome = pipeline.run(source.as_mut(), classifier.as_mut(), &stop, args.max_frames);
    pipeline.shutdown();

    let summary = pipeline.summary();
    let stats = pipeline.stats();
    log::info!(
        "sorterd stopped: frames={} events={} fallbacks={} classifier_failures={}",
        summary.frames,
        summary.events,
        summary.fallbacks,
        summary.classifier_failures
    );
    for role in [SinkRole::Broadcast, SinkRole::Actuator] {
        if pipeline.dispatcher().has_sink(role) {
            log::info!(
                "{} sink: delivered={} failed={}",
                role.as_str(),
                stats.delivered(role),
                stats.failed(role)
            );
        }
    }
    outcome.map(|_| ())
}
