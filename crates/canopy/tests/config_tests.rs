//! Configuration loading tests.

use std::fs;
use std::time::Duration;

use canopy::config::{AppConfig, AppPaths, load_config, load_or_init_config};

#[test]
fn test_file_overrides_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    fs::write(
        &path,
        r#"
[channel]
url = "wss://example.test/ws"
reconnect_delay_ms = 1500
token = "secret"

[router]
progress_clear_ms = 250

[api]
base_url = "https://example.test"
"#,
    )
    .unwrap();

    let config = load_config(&path).unwrap();
    assert_eq!(config.channel.url, "wss://example.test/ws");
    assert_eq!(config.channel.token.as_deref(), Some("secret"));
    assert_eq!(config.api.base_url, "https://example.test");
    assert_eq!(config.api.token, None);
    assert_eq!(config.logging.level, "info");

    let coordinator = config.coordinator();
    assert_eq!(coordinator.reconnect_delay, Duration::from_millis(1500));
    assert_eq!(coordinator.progress_clear_delay, Duration::from_millis(250));
}

#[test]
fn test_missing_file_is_created_with_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("config.toml");
    let paths = AppPaths::discover(Some(path.clone())).unwrap();

    let config = load_or_init_config(&paths).unwrap();

    assert!(path.exists());
    assert_eq!(config, AppConfig::default());
}

#[test]
fn test_invalid_value_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    fs::write(&path, "[channel]\nreconnect_delay_ms = \"soon\"\n").unwrap();

    assert!(load_config(&path).is_err());
}

#[test]
fn test_default_file_lists_only_known_keys() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    canopy::config::write_default_config(&path).unwrap();

    let written: toml::Value = toml::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
    let logging = written["logging"].as_table().unwrap();
    assert_eq!(logging.keys().collect::<Vec<_>>(), vec!["level"]);
    assert!(written["channel"].get("url").is_some());
    assert!(written["router"].get("progress_clear_ms").is_some());
}
