use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::dispatch::ActuatorEncoding;

const DEFAULT_SOURCE: &str = "stub://bench";
const DEFAULT_WIDTH: u32 = crate::frame::DEFAULT_WIDTH;
const DEFAULT_HEIGHT: u32 = crate::frame::DEFAULT_HEIGHT;
const DEFAULT_TARGET_FPS: u32 = 10;

const DEFAULT_PIXEL_THRESHOLD: u8 = 30;
const DEFAULT_AREA_RATIO: f32 = 0.02;
const DEFAULT_DILATION: u8 = 2;
const DEFAULT_BLUR_SIGMA: f32 = 3.5;

const DEFAULT_DEBOUNCE_FRAMES: u32 = 5;
const DEFAULT_COOLDOWN_SECS: f64 = 7.0;

const DEFAULT_NORMAL_CONFIDENCE: f32 = 0.8;
const DEFAULT_REDUCED_CONFIDENCE: f32 = 0.5;
const DEFAULT_REDUCE_AFTER_SECS: f64 = 7.0;
const DEFAULT_TIMEOUT_AFTER_SECS: f64 = 14.0;
const DEFAULT_FALLBACK_CLASS_ID: u32 = 4;
const DEFAULT_FALLBACK_SCORE: f32 = 0.5;
const DEFAULT_FALLBACK_LABEL: &str = "other";

const DEFAULT_CLASSIFIER_BACKEND: &str = "scripted";

const DEFAULT_BROKER_ADDR: &str = "127.0.0.1:1883";
const DEFAULT_TOPIC_PREFIX: &str = "sorter";
const DEFAULT_CLIENT_ID: &str = "sorterd";

const DEFAULT_BAUD_RATE: u32 = 9600;
const DEFAULT_SETTLE_MS: u64 = 2000;
const DEFAULT_WRITE_TIMEOUT_MS: u64 = 1000;

const DEFAULT_DISPATCH_GRACE_MS: u64 = 3000;
const DEFAULT_INFERENCE_BUDGET_MS: u64 = 500;
const DEFAULT_HEALTH_INTERVAL_SECS: u64 = 5;

// -------------------- File representation --------------------

#[derive(Debug, Deserialize, Default)]
struct SorterConfigFile {
    source: Option<SourceConfigFile>,
    motion: Option<MotionConfigFile>,
    debounce: Option<DebounceConfigFile>,
    cooldown: Option<CooldownConfigFile>,
    escalation: Option<EscalationConfigFile>,
    classifier: Option<ClassifierConfigFile>,
    labels: Option<LabelsConfigFile>,
    broadcast: Option<BroadcastConfigFile>,
    actuator: Option<ActuatorConfigFile>,
    runtime: Option<RuntimeConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct SourceConfigFile {
    uri: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    target_fps: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct MotionConfigFile {
    pixel_threshold: Option<u8>,
    area_ratio: Option<f32>,
    dilation: Option<u8>,
    blur_sigma: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
struct DebounceConfigFile {
    frames: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct CooldownConfigFile {
    seconds: Option<f64>,
}

#[derive(Debug, Deserialize, Default)]
struct EscalationConfigFile {
    normal_confidence: Option<f32>,
    reduced_confidence: Option<f32>,
    reduce_after_secs: Option<f64>,
    timeout_after_secs: Option<f64>,
    fallback_class_id: Option<u32>,
    fallback_score: Option<f32>,
    fallback_label: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct ClassifierConfigFile {
    backend: Option<String>,
    model_path: Option<PathBuf>,
    script_path: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
struct LabelsConfigFile {
    names: Option<Vec<String>>,
    categories: Option<HashMap<String, u8>>,
}

#[derive(Debug, Deserialize, Default)]
struct BroadcastConfigFile {
    enabled: Option<bool>,
    broker_addr: Option<String>,
    topic_prefix: Option<String>,
    client_id: Option<String>,
    allow_remote: Option<bool>,
    username: Option<String>,
    password: Option<String>,
    use_tls: Option<bool>,
    tls_ca_path: Option<PathBuf>,
    tls_client_cert_path: Option<PathBuf>,
    tls_client_key_path: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
struct ActuatorConfigFile {
    port: Option<String>,
    baud_rate: Option<u32>,
    encoding: Option<String>,
    settle_ms: Option<u64>,
    write_timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct RuntimeConfigFile {
    dispatch_grace_ms: Option<u64>,
    inference_budget_ms: Option<u64>,
    health_interval_secs: Option<u64>,
}

// -------------------- Resolved configuration --------------------

#[derive(Debug, Clone)]
pub struct SorterConfig {
    pub source: SourceSettings,
    pub motion: MotionSettings,
    pub debounce_frames: u32,
    pub cooldown: Duration,
    pub escalation: EscalationSettings,
    pub classifier: ClassifierSettings,
    pub labels: LabelSettings,
    /// `None` when no dashboard broker is configured.
    pub broadcast: Option<BroadcastSettings>,
    /// `None` when no serial actuator is configured.
    pub actuator: Option<ActuatorSettings>,
    pub runtime: RuntimeSettings,
}

#[derive(Debug, Clone)]
pub struct SourceSettings {
    pub uri: String,
    pub width: u32,
    pub height: u32,
    /// Frame pacing for the loop; 0 disables pacing.
    pub target_fps: u32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotionSettings {
    /// Per-pixel absolute difference above which a pixel counts as changed.
    pub pixel_threshold: u8,
    /// Fraction of changed pixels above which the scene is moving.
    pub area_ratio: f32,
    /// Dilation radius (L-infinity) applied to the change mask.
    pub dilation: u8,
    /// Gaussian blur sigma applied before differencing.
    pub blur_sigma: f32,
}

impl Default for MotionSettings {
    fn default() -> Self {
        Self {
            pixel_threshold: DEFAULT_PIXEL_THRESHOLD,
            area_ratio: DEFAULT_AREA_RATIO,
            dilation: DEFAULT_DILATION,
            blur_sigma: DEFAULT_BLUR_SIGMA,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EscalationSettings {
    pub normal_confidence: f32,
    pub reduced_confidence: f32,
    /// Time since motion onset after which the reduced threshold applies.
    pub reduce_after: Duration,
    /// Time since motion onset after which the fallback event fires.
    pub timeout_after: Duration,
    pub fallback_class_id: u32,
    pub fallback_score: f32,
    pub fallback_label: String,
}

impl Default for EscalationSettings {
    fn default() -> Self {
        Self {
            normal_confidence: DEFAULT_NORMAL_CONFIDENCE,
            reduced_confidence: DEFAULT_REDUCED_CONFIDENCE,
            reduce_after: Duration::from_secs_f64(DEFAULT_REDUCE_AFTER_SECS),
            timeout_after: Duration::from_secs_f64(DEFAULT_TIMEOUT_AFTER_SECS),
            fallback_class_id: DEFAULT_FALLBACK_CLASS_ID,
            fallback_score: DEFAULT_FALLBACK_SCORE,
            fallback_label: DEFAULT_FALLBACK_LABEL.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClassifierSettings {
    /// `scripted` or `tract`.
    pub backend: String,
    pub model_path: Option<PathBuf>,
    pub script_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default)]
pub struct LabelSettings {
    /// Class names indexed by class id. Empty means the built-in table.
    pub names: Vec<String>,
    /// Label to sorting category overrides.
    pub categories: HashMap<String, u8>,
}

#[derive(Debug, Clone)]
pub struct BroadcastSettings {
    pub broker_addr: String,
    pub topic_prefix: String,
    pub client_id: String,
    pub allow_remote: bool,
    pub username: Option<String>,
    pub password: Option<String>,
    pub use_tls: bool,
    pub tls_ca_path: Option<PathBuf>,
    pub tls_client_cert_path: Option<PathBuf>,
    pub tls_client_key_path: Option<PathBuf>,
}

impl BroadcastSettings {
    fn with_broker(broker_addr: String) -> Self {
        Self {
            broker_addr,
            topic_prefix: DEFAULT_TOPIC_PREFIX.to_string(),
            client_id: DEFAULT_CLIENT_ID.to_string(),
            allow_remote: false,
            username: None,
            password: None,
            use_tls: false,
            tls_ca_path: None,
            tls_client_cert_path: None,
            tls_client_key_path: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ActuatorSettings {
    pub port: String,
    pub baud_rate: u32,
    pub encoding: ActuatorEncoding,
    /// Wait after opening the port while the microcontroller resets.
    pub settle: Duration,
    pub write_timeout: Duration,
}

impl ActuatorSettings {
    fn with_port(port: String) -> Self {
        Self {
            port,
            baud_rate: DEFAULT_BAUD_RATE,
            encoding: ActuatorEncoding::default(),
            settle: Duration::from_millis(DEFAULT_SETTLE_MS),
            write_timeout: Duration::from_millis(DEFAULT_WRITE_TIMEOUT_MS),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RuntimeSettings {
    /// Upper bound on waiting for sink workers at shutdown.
    pub dispatch_grace: Duration,
    /// `predict` calls slower than this are logged.
    pub inference_budget: Duration,
    pub health_interval: Duration,
}

impl Default for SorterConfig {
    fn default() -> Self {
        Self {
            source: SourceSettings {
                uri: DEFAULT_SOURCE.to_string(),
                width: DEFAULT_WIDTH,
                height: DEFAULT_HEIGHT,
                target_fps: DEFAULT_TARGET_FPS,
            },
            motion: MotionSettings::default(),
            debounce_frames: DEFAULT_DEBOUNCE_FRAMES,
            cooldown: Duration::from_secs_f64(DEFAULT_COOLDOWN_SECS),
            escalation: EscalationSettings::default(),
            classifier: ClassifierSettings {
                backend: DEFAULT_CLASSIFIER_BACKEND.to_string(),
                model_path: None,
                script_path: None,
            },
            labels: LabelSettings::default(),
            broadcast: None,
            actuator: None,
            runtime: RuntimeSettings {
                dispatch_grace: Duration::from_millis(DEFAULT_DISPATCH_GRACE_MS),
                inference_budget: Duration::from_millis(DEFAULT_INFERENCE_BUDGET_MS),
                health_interval: Duration::from_secs(DEFAULT_HEALTH_INTERVAL_SECS),
            },
        }
    }
}

impl SorterConfig {
    /// Load from `SORTER_CONFIG` (if set), apply environment overrides, validate.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("SORTER_CONFIG").ok();
        Self::load_from(config_path.as_deref().map(Path::new))
    }

    /// Load from an explicit file (or defaults), apply environment overrides, validate.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => read_config_file(path)?,
            None => SorterConfigFile::default(),
        };
        let mut cfg = Self::from_file(file_cfg)?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: SorterConfigFile) -> Result<Self> {
        let source_file = file.source.unwrap_or_default();
        let source = SourceSettings {
            uri: source_file
                .uri
                .unwrap_or_else(|| DEFAULT_SOURCE.to_string()),
            width: source_file.width.unwrap_or(DEFAULT_WIDTH),
            height: source_file.height.unwrap_or(DEFAULT_HEIGHT),
            target_fps: source_file.target_fps.unwrap_or(DEFAULT_TARGET_FPS),
        };

        let motion_file = file.motion.unwrap_or_default();
        let motion = MotionSettings {
            pixel_threshold: motion_file
                .pixel_threshold
                .unwrap_or(DEFAULT_PIXEL_THRESHOLD),
            area_ratio: motion_file.area_ratio.unwrap_or(DEFAULT_AREA_RATIO),
            dilation: motion_file.dilation.unwrap_or(DEFAULT_DILATION),
            blur_sigma: motion_file.blur_sigma.unwrap_or(DEFAULT_BLUR_SIGMA),
        };

        let debounce_frames = file
            .debounce
            .and_then(|debounce| debounce.frames)
            .unwrap_or(DEFAULT_DEBOUNCE_FRAMES);
        let cooldown = secs(
            "cooldown.seconds",
            file.cooldown
                .and_then(|cooldown| cooldown.seconds)
                .unwrap_or(DEFAULT_COOLDOWN_SECS),
        )?;

        let esc_file = file.escalation.unwrap_or_default();
        let escalation = EscalationSettings {
            normal_confidence: esc_file
                .normal_confidence
                .unwrap_or(DEFAULT_NORMAL_CONFIDENCE),
            reduced_confidence: esc_file
                .reduced_confidence
                .unwrap_or(DEFAULT_REDUCED_CONFIDENCE),
            reduce_after: secs(
                "escalation.reduce_after_secs",
                esc_file
                    .reduce_after_secs
                    .unwrap_or(DEFAULT_REDUCE_AFTER_SECS),
            )?,
            timeout_after: secs(
                "escalation.timeout_after_secs",
                esc_file
                    .timeout_after_secs
                    .unwrap_or(DEFAULT_TIMEOUT_AFTER_SECS),
            )?,
            fallback_class_id: esc_file
                .fallback_class_id
                .unwrap_or(DEFAULT_FALLBACK_CLASS_ID),
            fallback_score: esc_file.fallback_score.unwrap_or(DEFAULT_FALLBACK_SCORE),
            fallback_label: esc_file
                .fallback_label
                .unwrap_or_else(|| DEFAULT_FALLBACK_LABEL.to_string()),
        };

        let classifier_file = file.classifier.unwrap_or_default();
        let classifier = ClassifierSettings {
            backend: classifier_file
                .backend
                .unwrap_or_else(|| DEFAULT_CLASSIFIER_BACKEND.to_string()),
            model_path: classifier_file.model_path,
            script_path: classifier_file.script_path,
        };

        let labels_file = file.labels.unwrap_or_default();
        let labels = LabelSettings {
            names: labels_file.names.unwrap_or_default(),
            categories: labels_file.categories.unwrap_or_default(),
        };

        let broadcast = match file.broadcast {
            Some(b) if b.enabled.unwrap_or(true) => {
                let defaults = BroadcastSettings::with_broker(
                    b.broker_addr
                        .unwrap_or_else(|| DEFAULT_BROKER_ADDR.to_string()),
                );
                Some(BroadcastSettings {
                    topic_prefix: b.topic_prefix.unwrap_or(defaults.topic_prefix),
                    client_id: b.client_id.unwrap_or(defaults.client_id),
                    allow_remote: b.allow_remote.unwrap_or(false),
                    username: b.username,
                    password: b.password,
                    use_tls: b.use_tls.unwrap_or(false),
                    tls_ca_path: b.tls_ca_path,
                    tls_client_cert_path: b.tls_client_cert_path,
                    tls_client_key_path: b.tls_client_key_path,
                    broker_addr: defaults.broker_addr,
                })
            }
            _ => None,
        };

        let actuator = match file.actuator {
            Some(a) => match a.port {
                Some(port) if !port.trim().is_empty() => {
                    let encoding = match a.encoding.as_deref() {
                        Some(raw) => raw.parse()?,
                        None => ActuatorEncoding::default(),
                    };
                    Some(ActuatorSettings {
                        baud_rate: a.baud_rate.unwrap_or(DEFAULT_BAUD_RATE),
                        encoding,
                        settle: Duration::from_millis(a.settle_ms.unwrap_or(DEFAULT_SETTLE_MS)),
                        write_timeout: Duration::from_millis(
                            a.write_timeout_ms.unwrap_or(DEFAULT_WRITE_TIMEOUT_MS),
                        ),
                        port,
                    })
                }
                _ => None,
            },
            None => None,
        };

        let runtime_file = file.runtime.unwrap_or_default();
        let runtime = RuntimeSettings {
            dispatch_grace: Duration::from_millis(
                runtime_file
                    .dispatch_grace_ms
                    .unwrap_or(DEFAULT_DISPATCH_GRACE_MS),
            ),
            inference_budget: Duration::from_millis(
                runtime_file
                    .inference_budget_ms
                    .unwrap_or(DEFAULT_INFERENCE_BUDGET_MS),
            ),
            health_interval: Duration::from_secs(
                runtime_file
                    .health_interval_secs
                    .unwrap_or(DEFAULT_HEALTH_INTERVAL_SECS),
            ),
        };

        Ok(Self {
            source,
            motion,
            debounce_frames,
            cooldown,
            escalation,
            classifier,
            labels,
            broadcast,
            actuator,
            runtime,
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(uri) = std::env::var("SORTER_SOURCE") {
            if !uri.trim().is_empty() {
                self.source.uri = uri;
            }
        }
        if let Ok(fps) = std::env::var("SORTER_TARGET_FPS") {
            self.source.target_fps = fps
                .trim()
                .parse()
                .map_err(|_| anyhow!("SORTER_TARGET_FPS must be a non-negative integer"))?;
        }
        if let Ok(port) = std::env::var("SORTER_SERIAL_PORT") {
            self.set_serial_port(&port);
        }
        if let Ok(addr) = std::env::var("SORTER_MQTT_BROKER") {
            self.set_broker(&addr);
        }
        if let Ok(frames) = std::env::var("SORTER_DEBOUNCE_FRAMES") {
            self.debounce_frames = frames
                .trim()
                .parse()
                .map_err(|_| anyhow!("SORTER_DEBOUNCE_FRAMES must be an integer"))?;
        }
        if let Ok(cooldown) = std::env::var("SORTER_COOLDOWN_SECS") {
            let seconds: f64 = cooldown
                .trim()
                .parse()
                .map_err(|_| anyhow!("SORTER_COOLDOWN_SECS must be a number of seconds"))?;
            self.cooldown = secs("SORTER_COOLDOWN_SECS", seconds)?;
        }
        if let Ok(class_id) = std::env::var("SORTER_FALLBACK_CLASS_ID") {
            self.escalation.fallback_class_id = class_id
                .trim()
                .parse()
                .map_err(|_| anyhow!("SORTER_FALLBACK_CLASS_ID must be an integer"))?;
        }
        Ok(())
    }

    /// Point the actuator at `port`, keeping other actuator settings.
    /// An empty value disables the actuator.
    pub fn set_serial_port(&mut self, port: &str) {
        let port = port.trim();
        if port.is_empty() {
            self.actuator = None;
            return;
        }
        match self.actuator.as_mut() {
            Some(actuator) => actuator.port = port.to_string(),
            None => self.actuator = Some(ActuatorSettings::with_port(port.to_string())),
        }
    }

    /// Point the broadcast sink at `addr`, keeping other broadcast settings.
    /// An empty value disables broadcasting.
    pub fn set_broker(&mut self, addr: &str) {
        let addr = addr.trim();
        if addr.is_empty() {
            self.broadcast = None;
            return;
        }
        match self.broadcast.as_mut() {
            Some(broadcast) => broadcast.broker_addr = addr.to_string(),
            None => self.broadcast = Some(BroadcastSettings::with_broker(addr.to_string())),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.source.uri.trim().is_empty() {
            return Err(anyhow!("source uri must not be empty"));
        }
        if self.source.width == 0 || self.source.height == 0 {
            return Err(anyhow!(
                "source resolution must be non-zero (got {}x{})",
                self.source.width,
                self.source.height
            ));
        }
        check_unit("motion.area_ratio", self.motion.area_ratio)?;
        if self.motion.blur_sigma.is_nan() || self.motion.blur_sigma <= 0.0 {
            return Err(anyhow!("motion.blur_sigma must be greater than zero"));
        }
        if self.debounce_frames == 0 {
            return Err(anyhow!("debounce frames must be at least 1"));
        }
        if self.cooldown.is_zero() {
            return Err(anyhow!("cooldown must be greater than zero"));
        }

        let esc = &self.escalation;
        check_unit("escalation.normal_confidence", esc.normal_confidence)?;
        check_unit("escalation.reduced_confidence", esc.reduced_confidence)?;
        check_unit("escalation.fallback_score", esc.fallback_score)?;
        if esc.reduced_confidence > esc.normal_confidence {
            return Err(anyhow!(
                "escalation.reduced_confidence ({}) must not exceed normal_confidence ({})",
                esc.reduced_confidence,
                esc.normal_confidence
            ));
        }
        if esc.reduce_after.is_zero() || esc.timeout_after.is_zero() {
            return Err(anyhow!("escalation timers must be greater than zero"));
        }
        if esc.timeout_after <= esc.reduce_after {
            return Err(anyhow!(
                "escalation.timeout_after ({:?}) must be later than reduce_after ({:?})",
                esc.timeout_after,
                esc.reduce_after
            ));
        }

        match self.classifier.backend.as_str() {
            "scripted" | "tract" => {}
            other => {
                return Err(anyhow!(
                    "unknown classifier backend '{}': expected 'scripted' or 'tract'",
                    other
                ))
            }
        }
        if self.classifier.backend == "tract" && self.classifier.model_path.is_none() {
            return Err(anyhow!("classifier backend 'tract' requires classifier.model_path"));
        }

        if let Some(actuator) = &self.actuator {
            if actuator.baud_rate == 0 {
                return Err(anyhow!("actuator.baud_rate must be greater than zero"));
            }
        }
        if self.runtime.dispatch_grace.is_zero() {
            return Err(anyhow!("runtime.dispatch_grace_ms must be greater than zero"));
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<SorterConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

fn secs(name: &str, value: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(value).map_err(|_| {
        anyhow!(
            "{} must be a non-negative number of seconds (got {})",
            name,
            value
        )
    })
}

fn check_unit(name: &str, value: f32) -> Result<()> {
    if !(0.0..=1.0).contains(&value) {
        return Err(anyhow!("{} must be within [0, 1] (got {})", name, value));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = SorterConfig::default();
        assert_eq!(cfg.source.uri, "stub://bench");
        assert_eq!((cfg.source.width, cfg.source.height), (640, 480));
        assert_eq!(cfg.motion.pixel_threshold, 30);
        assert_eq!(cfg.motion.area_ratio, 0.02);
        assert_eq!(cfg.debounce_frames, 5);
        assert_eq!(cfg.cooldown, Duration::from_secs(7));
        assert_eq!(cfg.escalation.normal_confidence, 0.8);
        assert_eq!(cfg.escalation.reduced_confidence, 0.5);
        assert_eq!(cfg.escalation.reduce_after, Duration::from_secs(7));
        assert_eq!(cfg.escalation.timeout_after, Duration::from_secs(14));
        assert!(cfg.broadcast.is_none());
        assert!(cfg.actuator.is_none());
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn validate_rejects_out_of_range_confidence() {
        let mut cfg = SorterConfig::default();
        cfg.escalation.normal_confidence = 1.2;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_rejects_reduced_above_normal() {
        let mut cfg = SorterConfig::default();
        cfg.escalation.reduced_confidence = 0.9;
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("must not exceed"));
    }

    #[test]
    fn validate_rejects_timeout_before_reduction() {
        let mut cfg = SorterConfig::default();
        cfg.escalation.timeout_after = Duration::from_secs(5);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_rejects_zero_periods() {
        let mut cfg = SorterConfig::default();
        cfg.cooldown = Duration::ZERO;
        assert!(cfg.validate().is_err());

        let mut cfg = SorterConfig::default();
        cfg.debounce_frames = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_requires_model_for_tract() {
        let mut cfg = SorterConfig::default();
        cfg.classifier.backend = "tract".to_string();
        assert!(cfg.validate().is_err());
        cfg.classifier.model_path = Some(PathBuf::from("models/trashcan.onnx"));
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn set_serial_port_creates_and_clears_actuator() {
        let mut cfg = SorterConfig::default();
        cfg.set_serial_port("/dev/ttyUSB0");
        let actuator = cfg.actuator.as_ref().unwrap();
        assert_eq!(actuator.port, "/dev/ttyUSB0");
        assert_eq!(actuator.baud_rate, 9600);

        cfg.set_serial_port("  ");
        assert!(cfg.actuator.is_none());
    }

    #[test]
    fn toml_file_is_parsed_by_extension() {
        let raw = r#"
            [debounce]
            frames = 3

            [escalation]
            fallback_class_id = 9
            fallback_label = "unknown"

            [actuator]
            port = "/dev/ttyACM0"
            encoding = "triple"
        "#;
        let file: SorterConfigFile = toml::from_str(raw).unwrap();
        let cfg = SorterConfig::from_file(file).unwrap();
        assert_eq!(cfg.debounce_frames, 3);
        assert_eq!(cfg.escalation.fallback_class_id, 9);
        assert_eq!(cfg.escalation.fallback_label, "unknown");
        let actuator = cfg.actuator.unwrap();
        assert_eq!(actuator.encoding, ActuatorEncoding::Triple);
    }

    #[test]
    fn default_matches_an_empty_file() {
        let from_empty = SorterConfig::from_file(SorterConfigFile::default()).unwrap();
        let default = SorterConfig::default();
        assert_eq!(from_empty.source.uri, default.source.uri);
        assert_eq!(from_empty.source.target_fps, default.source.target_fps);
        assert_eq!(from_empty.motion, default.motion);
        assert_eq!(from_empty.debounce_frames, default.debounce_frames);
        assert_eq!(from_empty.cooldown, default.cooldown);
        assert_eq!(from_empty.escalation, default.escalation);
        assert_eq!(from_empty.classifier.backend, default.classifier.backend);
        assert_eq!(from_empty.runtime.dispatch_grace, default.runtime.dispatch_grace);
        assert_eq!(from_empty.runtime.health_interval, default.runtime.health_interval);
    }

    #[test]
    fn seconds_out_of_duration_range_are_errors() {
        assert!(secs("cooldown.seconds", 1e30).is_err());
        assert!(secs("cooldown.seconds", -1.0).is_err());
        assert!(secs("cooldown.seconds", f64::NAN).is_err());
        assert!(secs("cooldown.seconds", f64::INFINITY).is_err());
        assert_eq!(secs("cooldown.seconds", 2.5).unwrap(), Duration::from_millis(2500));
    }

    #[test]
    fn disabled_broadcast_section_resolves_to_none() {
        let file: SorterConfigFile =
            serde_json::from_str(r#"{"broadcast": {"enabled": false}}"#).unwrap();
        let cfg = SorterConfig::from_file(file).unwrap();
        assert!(cfg.broadcast.is_none());
    }
}
