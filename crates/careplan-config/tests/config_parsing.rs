use std::{env, fs};

use careplan_config::{ConfigError, apply_logging_level, init_tracing_from, load_config};

#[test]
fn config_parsing_and_env_overrides_and_validation() {
    let dir = tempfile::tempdir().expect("tmp dir");
    let path = dir.path().join("careplan.toml");

    let toml_content = r#"
[engine]
max_condition_depth = 8
delay_poll_interval_ms = 250
default_dedup_window_minutes = 1440

[suggestions]
latency_ms = 50
timeout_ms = 2000

[logging]
level = "debug"
"#;
    fs::write(&path, toml_content).expect("write toml");

    // File values parse
    let cfg = load_config(path.to_str()).expect("should parse config");
    assert_eq!(cfg.engine.max_condition_depth, 8);
    assert_eq!(cfg.engine.delay_poll_interval_ms, 250);
    assert_eq!(cfg.engine.default_dedup_window_minutes, Some(1440));
    assert_eq!(cfg.suggestions.timeout_ms, 2000);
    assert_eq!(cfg.logging.level, "debug");

    // Env override wins over file
    unsafe {
        env::set_var("CAREPLAN__SUGGESTIONS__LATENCY_MS", "5");
    }
    let cfg_env = load_config(path.to_str()).expect("should parse config with env overrides");
    assert_eq!(cfg_env.suggestions.latency_ms, 5);
    unsafe {
        env::remove_var("CAREPLAN__SUGGESTIONS__LATENCY_MS");
    }

    // Invalid value fails validation
    let bad = dir.path().join("bad.toml");
    fs::write(&bad, "[suggestions]\ntimeout_ms = 0\n").expect("write bad toml");
    let err = load_config(bad.to_str()).expect_err("zero timeout must be rejected");
    assert!(matches!(err, ConfigError::Validation(_)));
}

#[test]
fn missing_file_falls_back_to_defaults() {
    let dir = tempfile::tempdir().expect("tmp dir");
    let path = dir.path().join("absent.toml");

    let cfg = careplan_config::AppConfig::load(path.to_str()).expect("defaults");
    assert_eq!(cfg.engine.max_condition_depth, 16);
    assert_eq!(cfg.suggestions.timeout_ms, 10_000);
}

#[test]
fn tracing_level_can_be_reloaded() {
    let cfg = careplan_config::AppConfig::default();
    init_tracing_from(&cfg.logging);
    assert!(apply_logging_level("debug"));
}
