//! Integration tests for configuration management
//!
//! These tests verify that the Config struct can be loaded from disk,
//! validated and converted into the engine's runtime settings.

use std::time::Duration;
use tempfile::TempDir;

use pilot_engine::config::Config;

fn write_config(dir: &TempDir, body: &str) -> std::path::PathBuf {
    let path = dir.path().join("config.toml");
    let data_dir = dir.path().join("data");
    let contents = format!(
        "[core]\ndata_dir = \"{}\"\n{}",
        data_dir.display().to_string().replace('\\', "/"),
        body
    );
    std::fs::write(&path, contents).unwrap();
    path
}

#[test]
fn test_partial_file_uses_defaults() {
    let dir = TempDir::new().unwrap();
    let path = write_config(
        &dir,
        r#"
[runtime]
max_iterations = 25
auto_approve = true

[model]
model_id = "qwen2.5-coder:7b"
"#,
    );

    let config = Config::load_from_path(&path).unwrap();
    assert_eq!(config.runtime.max_iterations, 25);
    assert!(config.runtime.auto_approve);
    assert_eq!(config.model.model_id, "qwen2.5-coder:7b");
    assert_eq!(config.model.provider, "ollama");
    assert_eq!(config.core.log_level, "info");
    assert_eq!(config.core.project_id, "default");
    assert_eq!(config.runtime.loop_threshold, 3);
    assert!(dir.path().join("data").is_dir());

    let run = config.to_run_config();
    assert_eq!(run.max_iterations, 25);
    assert!(run.auto_approve);
    assert!(run.loop_detection);
    assert_eq!(config.storage_dir(), dir.path().join("data").join("storage"));
}

#[test]
fn test_conversions() {
    let dir = TempDir::new().unwrap();
    let path = write_config(
        &dir,
        r#"
[runtime]
max_conversation_messages = 8
context_window_tokens = 4000

[retry]
max_attempts = 5
initial_delay_ms = 250
max_delay_ms = 2000

[capabilities]
enabled = ["read_file", "grep"]
shell_timeout_secs = 15
"#,
    );

    let config = Config::load_from_path(&path).unwrap();
    let limits = config.context_limits();
    assert_eq!(limits.max_messages, 8);
    assert_eq!(limits.max_tokens, 4000);

    let policy = config.retry_policy();
    assert_eq!(policy.max_attempts, 5);
    assert_eq!(policy.initial_delay, Duration::from_millis(250));
    assert_eq!(policy.max_delay, Duration::from_secs(2));

    assert_eq!(config.capabilities.enabled, vec!["read_file", "grep"]);
    assert_eq!(config.shell_timeout(), Duration::from_secs(15));
}

#[test]
fn test_invalid_values_are_rejected() {
    let cases = [
        ("[core]\nlog_level = \"loud\"\n", "log level"),
        ("[model]\nprovider = \"openai\"\n", "provider"),
        ("[runtime]\nmax_iterations = 0\n", "max_iterations"),
        ("[runtime]\nloop_threshold = 1\n", "loop_threshold"),
        ("[retry]\nmax_attempts = 0\n", "max_attempts"),
        ("[capabilities]\nenabled = [\"teleport\"]\n", "teleport"),
    ];

    for (body, expected) in cases {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, body).unwrap();
        let err = Config::load_from_path(&path).unwrap_err();
        assert!(
            err.to_string().contains(expected),
            "expected '{}' in error for {:?}, got: {}",
            expected,
            body,
            err
        );
    }
}

#[test]
fn test_malformed_toml_is_an_error() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "[runtime\nmax_iterations = ").unwrap();
    assert!(Config::load_from_path(&path).is_err());
}

#[test]
fn test_save_and_reload() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nested").join("config.toml");

    let mut config = Config::default();
    config.core.data_dir = dir.path().join("data");
    config.core.project_id = "webapp".into();
    config.runtime.verbose = false;
    config.save(&path).unwrap();

    let reloaded = Config::load_or_create_at(&path).unwrap();
    assert_eq!(reloaded, config);
}
