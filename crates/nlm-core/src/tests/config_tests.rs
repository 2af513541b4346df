//! Tests for configuration loading and defaults
//!
//! Tests the config system including:
//! - Defaults and partial files
//! - Poll profile conversion and validation
//! - Environment overrides
//! - Directories layout

use std::time::Duration;

use tempfile::{NamedTempFile, TempDir};

use crate::Error;
use crate::config::{BASE_URL_ENV, Config, Directories, PollProfile};
use crate::poll::PollConfig;

#[test]
fn test_config_default() {
    let config = Config::default();

    assert_eq!(config.base_url, "https://notebooklm.google.com");
    assert_eq!(config.upload_url, "https://notebooklm.google.com/upload/_/");
    assert_eq!(config.request_timeout(), Duration::from_secs(30));
    assert_eq!(config.health_call_delay(), Duration::from_secs(1));
    assert_eq!(config.home_url(), "https://notebooklm.google.com/");
    assert_eq!(config.poll.sources.to_poll_config().unwrap(), PollConfig::SOURCES);
    assert_eq!(config.poll.generation.to_poll_config().unwrap(), PollConfig::GENERATION);
    assert_eq!(config.poll.research.to_poll_config().unwrap(), PollConfig::RESEARCH);
}

#[test]
fn test_config_parse_minimal() {
    let config: Config = serde_json::from_str("{}").unwrap();
    assert_eq!(config, Config::default());
}

#[test]
fn test_config_parse_partial() {
    let json = r#"{
        "requestTimeoutSecs": 5,
        "poll": {
            "generation": {
                "initialIntervalSecs": 0.5,
                "maxIntervalSecs": 4,
                "multiplier": 2,
                "timeoutSecs": 90
            }
        }
    }"#;
    let config: Config = serde_json::from_str(json).unwrap();

    assert_eq!(config.request_timeout_secs, 5);
    let generation = config.poll.generation.to_poll_config().unwrap();
    assert_eq!(generation.initial_interval, Duration::from_millis(500));
    assert_eq!(generation.timeout, Duration::from_secs(90));
    assert_eq!(config.poll.sources, PollProfile::from(PollConfig::SOURCES));
}

#[test]
fn test_incomplete_profile_is_rejected() {
    let json = r#"{"poll": {"sources": {"initialIntervalSecs": 1}}}"#;
    assert!(serde_json::from_str::<Config>(json).is_err());
}

#[test]
fn test_load_missing_file_gives_defaults() {
    let dir = TempDir::new().unwrap();
    let config = Config::load(&dir.path().join("config.json")).unwrap();
    assert_eq!(config, Config::default());
}

#[test]
fn test_load_from_file_ignores_unknown_keys() {
    let file = NamedTempFile::new().unwrap();
    std::fs::write(
        file.path(),
        r#"{"baseUrl": "https://staging.example", "healthCallDelayMs": 250, "colour": "blue"}"#,
    )
    .unwrap();

    let config = Config::load(file.path()).unwrap();
    assert_eq!(config.base_url, "https://staging.example");
    assert_eq!(config.health_call_delay(), Duration::from_millis(250));
}

#[test]
fn test_load_rejects_invalid_values() {
    let file = NamedTempFile::new().unwrap();

    std::fs::write(file.path(), r#"{"requestTimeoutSecs": 0}"#).unwrap();
    assert!(matches!(Config::load(file.path()), Err(Error::Config(_))));

    std::fs::write(
        file.path(),
        r#"{"poll": {"research": {"initialIntervalSecs": 5, "maxIntervalSecs": 1, "multiplier": 1.5, "timeoutSecs": 60}}}"#,
    )
    .unwrap();
    assert!(matches!(Config::load(file.path()), Err(Error::Config(_))));

    std::fs::write(
        file.path(),
        r#"{"poll": {"sources": {"initialIntervalSecs": -1, "maxIntervalSecs": 1, "multiplier": 1.5, "timeoutSecs": 60}}}"#,
    )
    .unwrap();
    assert!(matches!(Config::load(file.path()), Err(Error::Config(_))));

    std::fs::write(file.path(), "{not json").unwrap();
    assert!(matches!(Config::load(file.path()), Err(Error::Json(_))));
}

#[test]
fn test_env_override_base_url() {
    let config = Config::default().with_env_overrides(|key| {
        (key == BASE_URL_ENV).then(|| " https://proxy.example/ ".to_string())
    });
    assert_eq!(config.base_url, "https://proxy.example");
    assert_eq!(config.home_url(), "https://proxy.example/");

    let untouched = Config::default().with_env_overrides(|_| Some("   ".to_string()));
    assert_eq!(untouched.base_url, Config::default().base_url);
}

#[test]
fn test_directories_with_base() {
    let dir = TempDir::new().unwrap();
    let dirs = Directories::with_base(dir.path().join("nlm"));

    assert_eq!(dirs.config_file, dir.path().join("nlm/config.json"));
    assert_eq!(dirs.storage_state, dir.path().join("nlm/storage_state.json"));

    dirs.ensure_exists().unwrap();
    assert!(dirs.config.is_dir());
    assert!(dirs.data.is_dir());
}
