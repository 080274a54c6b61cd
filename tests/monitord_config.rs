use std::io::Write;
use std::sync::Mutex;

use tempfile::Builder;

use monitor_kernel::config::MonitordConfig;
use monitor_kernel::{QuietMode, Scenario, Severity};

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "MONITOR_CONFIG",
        "MONITOR_DB_PATH",
        "MONITOR_SCENARIO",
        "MONITOR_STREAM_ID",
        "MONITOR_TICK_MS",
        "MONITOR_MOTION_SENSITIVITY",
        "MONITOR_QUIET_HOURS",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn loads_json_config_with_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = Builder::new().suffix(".json").tempfile().expect("temp config");
    let json = r#"{
        "db_path": "nursery.db",
        "stream_id": "nursery_cam",
        "scenario": "baby",
        "tick_ms": 250,
        "capture": { "width": 640, "height": 480 },
        "policy": {
            "quiet_hours": "21:30-06:45",
            "quiet_mode": "reduced",
            "inactivity_minutes": 45,
            "inactivity_severity": "low"
        },
        "sound": { "max_concurrent": 2 },
        "retention": { "seconds": 3600 }
    }"#;
    file.write_all(json.as_bytes()).expect("write config");

    std::env::set_var("MONITOR_CONFIG", file.path());
    std::env::set_var("MONITOR_MOTION_SENSITIVITY", "150");
    std::env::set_var("MONITOR_TICK_MS", "100");

    let cfg = MonitordConfig::load().expect("load config");

    assert_eq!(cfg.db_path, "nursery.db");
    assert_eq!(cfg.stream_id, "nursery_cam");
    assert_eq!(cfg.scenario, Scenario::Baby);
    assert_eq!(cfg.tick.as_millis(), 100);
    assert_eq!(cfg.capture.width, 640);
    assert_eq!(cfg.capture.fft_size, 2048);
    assert_eq!(cfg.sound.max_concurrent, 2);
    assert_eq!(cfg.retention.as_secs(), 3600);

    // Out-of-range sensitivity is clamped, not rejected.
    assert_eq!(cfg.policy.motion_sensitivity, 100);
    assert!(cfg.policy.quiet_hours.enabled);
    assert_eq!(cfg.policy.quiet_hours.start_minute, 21 * 60 + 30);
    assert_eq!(cfg.policy.quiet_hours.end_minute, 6 * 60 + 45);
    assert_eq!(cfg.policy.quiet_hours.mode, QuietMode::Reduced);
    assert!(cfg.policy.inactivity_enabled);
    assert_eq!(cfg.policy.inactivity_alert_minutes, 45);
    assert_eq!(cfg.policy.inactivity_severity, Severity::Low);
    assert!(cfg.security.is_none());

    clear_env();
}

#[test]
fn loads_toml_and_security_scenario_defaults() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = Builder::new().suffix(".toml").tempfile().expect("temp config");
    let toml = r#"
        stream_id = "front_door"

        [security]
        allowed_persons = 1
        alert_mode = "silent"
    "#;
    file.write_all(toml.as_bytes()).expect("write config");
    std::env::set_var("MONITOR_CONFIG", file.path());
    std::env::set_var("MONITOR_SCENARIO", "security");

    let cfg = MonitordConfig::load().expect("load config");
    assert_eq!(cfg.scenario, Scenario::Security);
    assert_eq!(cfg.policy.motion_sensitivity, 84);
    let security = cfg.security.expect("security settings");
    assert_eq!(security.allowed_persons, 1);
    assert_eq!(security.arming_countdown_secs, 30);

    clear_env();
}

#[test]
fn rejects_bad_env_values() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("MONITOR_TICK_MS", "fast");
    assert!(MonitordConfig::load().is_err());
    std::env::set_var("MONITOR_TICK_MS", "0");
    assert!(MonitordConfig::load().is_err());
    clear_env();

    std::env::set_var("MONITOR_STREAM_ID", "../etc");
    assert!(MonitordConfig::load().is_err());
    clear_env();

    std::env::set_var("MONITOR_QUIET_HOURS", "late");
    assert!(MonitordConfig::load().is_err());
    clear_env();

    let cfg = MonitordConfig::load().expect("defaults");
    assert_eq!(cfg.scenario, Scenario::General);
    assert!(!cfg.policy.quiet_hours.enabled);
}
