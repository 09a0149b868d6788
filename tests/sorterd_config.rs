use std::sync::Mutex;
use std::time::Duration;

use tempfile::NamedTempFile;

use sorter_kernel::dispatch::ActuatorEncoding;
use sorter_kernel::SorterConfig;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "SORTER_CONFIG",
        "SORTER_SOURCE",
        "SORTER_TARGET_FPS",
        "SORTER_SERIAL_PORT",
        "SORTER_MQTT_BROKER",
        "SORTER_DEBOUNCE_FRAMES",
        "SORTER_COOLDOWN_SECS",
        "SORTER_FALLBACK_CLASS_ID",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn loads_json_config_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let json = r#"{
        "source": { "uri": "stub://line2", "width": 320, "height": 240, "target_fps": 15 },
        "motion": { "pixel_threshold": 25, "area_ratio": 0.05 },
        "debounce": { "frames": 4 },
        "cooldown": { "seconds": 5.5 },
        "escalation": { "reduce_after_secs": 6, "timeout_after_secs": 12, "fallback_class_id": 11 },
        "broadcast": { "broker_addr": "mqtt://127.0.0.1:1884", "topic_prefix": "line2" },
        "actuator": { "port": "/dev/ttyACM0", "baud_rate": 115200, "encoding": "category" }
    }"#;
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");

    std::env::set_var("SORTER_CONFIG", file.path());
    std::env::set_var("SORTER_DEBOUNCE_FRAMES", "6");
    std::env::set_var("SORTER_COOLDOWN_SECS", "9");
    std::env::set_var("SORTER_SERIAL_PORT", "/dev/ttyUSB1");

    let cfg = SorterConfig::load().expect("load config");

    assert_eq!(cfg.source.uri, "stub://line2");
    assert_eq!((cfg.source.width, cfg.source.height), (320, 240));
    assert_eq!(cfg.source.target_fps, 15);
    assert_eq!(cfg.motion.pixel_threshold, 25);
    assert_eq!(cfg.motion.area_ratio, 0.05);
    assert_eq!(cfg.debounce_frames, 6);
    assert_eq!(cfg.cooldown, Duration::from_secs(9));
    assert_eq!(cfg.escalation.reduce_after, Duration::from_secs(6));
    assert_eq!(cfg.escalation.timeout_after, Duration::from_secs(12));
    assert_eq!(cfg.escalation.fallback_class_id, 11);

    let broadcast = cfg.broadcast.expect("broadcast configured");
    assert_eq!(broadcast.broker_addr, "mqtt://127.0.0.1:1884");
    assert_eq!(broadcast.topic_prefix, "line2");

    let actuator = cfg.actuator.expect("actuator configured");
    assert_eq!(actuator.port, "/dev/ttyUSB1");
    assert_eq!(actuator.baud_rate, 115200);
    assert_eq!(actuator.encoding, ActuatorEncoding::Category);

    clear_env();
}

#[test]
fn loads_toml_config() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = tempfile::Builder::new()
        .suffix(".toml")
        .tempfile()
        .expect("temp config");
    let raw = r#"
        [escalation]
        normal_confidence = 0.75
        reduced_confidence = 0.4
        fallback_label = "unsorted"

        [labels]
        names = ["cup", "phone"]

        [labels.categories]
        phone = 2

        [runtime]
        dispatch_grace_ms = 1500
    "#;
    std::io::Write::write_all(&mut file, raw.as_bytes()).expect("write config");

    let cfg = SorterConfig::load_from(Some(file.path())).expect("load config");
    assert_eq!(cfg.escalation.normal_confidence, 0.75);
    assert_eq!(cfg.escalation.reduced_confidence, 0.4);
    assert_eq!(cfg.escalation.fallback_label, "unsorted");
    assert_eq!(cfg.labels.names, vec!["cup", "phone"]);
    assert_eq!(cfg.labels.categories.get("phone"), Some(&2));
    assert_eq!(cfg.runtime.dispatch_grace, Duration::from_millis(1500));
    assert!(cfg.actuator.is_none());

    clear_env();
}

#[test]
fn env_can_disable_broker_and_rejects_bad_numbers() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("SORTER_MQTT_BROKER", "127.0.0.1:1883");
    let cfg = SorterConfig::load().expect("load config");
    assert_eq!(cfg.broadcast.unwrap().broker_addr, "127.0.0.1:1883");

    std::env::set_var("SORTER_MQTT_BROKER", "");
    let cfg = SorterConfig::load().expect("load config");
    assert!(cfg.broadcast.is_none());

    std::env::set_var("SORTER_DEBOUNCE_FRAMES", "five");
    assert!(SorterConfig::load().is_err());

    clear_env();
}

#[test]
fn invalid_file_values_fail_validation() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let json = r#"{ "escalation": { "reduce_after_secs": 10, "timeout_after_secs": 8 } }"#;
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");

    let err = SorterConfig::load_from(Some(file.path())).unwrap_err();
    assert!(err.to_string().contains("must be later than"));

    clear_env();
}

#[test]
fn oversized_durations_are_rejected_not_panicked() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let json = r#"{ "cooldown": { "seconds": 1e30 } }"#;
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");

    let err = SorterConfig::load_from(Some(file.path())).unwrap_err();
    assert!(err.to_string().contains("cooldown.seconds"));

    std::env::set_var("SORTER_COOLDOWN_SECS", "1e30");
    let err = SorterConfig::load().unwrap_err();
    assert!(err.to_string().contains("SORTER_COOLDOWN_SECS"));

    clear_env();
}
