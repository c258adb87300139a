//! Unit tests for relay configuration parsing and validation.

use std::io::Write;
use std::time::Duration;

use lsp_tcp_bridge::{AppError, RelayConfig};

fn sample_toml() -> &'static str {
    r#"
host = "192.168.1.20"
port = 6008
staging_capacity = 64
normalize_uris = false

[timing]
connect_timeout_ms = 750
initial_retry_attempts = 5
initial_retry_delay_ms = 200
reconnect_delay_ms = 3000
warmup_delay_ms = 900
max_reconnect_attempts = 12
"#
}

#[test]
fn full_config_parses() {
    let config = RelayConfig::from_toml_str(sample_toml()).expect("valid config");
    assert_eq!(config.peer_addr(), "192.168.1.20:6008");
    assert_eq!(config.staging_capacity, 64);
    assert!(!config.normalize_uris);
    assert_eq!(config.connect_timeout(), Duration::from_millis(750));

    let policy = config.retry_policy();
    assert_eq!(policy.initial_retry_attempts, 5);
    assert_eq!(policy.initial_retry_delay, Duration::from_millis(200));
    assert_eq!(policy.reconnect_delay, Duration::from_millis(3000));
    assert_eq!(policy.warmup_delay, Duration::from_millis(900));
    assert_eq!(policy.max_reconnect_attempts, Some(12));
}

#[test]
fn empty_config_uses_defaults() {
    let config = RelayConfig::from_toml_str("").expect("defaults");
    assert_eq!(config, RelayConfig::default());
    assert_eq!(config.peer_addr(), "127.0.0.1:6005");
    assert!(config.normalize_uris);
    assert_eq!(
        config.retry_policy().max_reconnect_attempts,
        None,
        "reconnect loop is unbounded by default"
    );
}

#[test]
fn partial_timing_table_keeps_other_defaults() {
    let config = RelayConfig::from_toml_str("[timing]\nwarmup_delay_ms = 10\n").expect("valid");
    assert_eq!(config.timing.warmup_delay_ms, 10);
    assert_eq!(config.timing.reconnect_delay_ms, 5_000);
}

#[test]
fn zero_port_is_rejected() {
    let err = RelayConfig::from_toml_str("port = 0").expect_err("invalid port");
    assert!(matches!(err, AppError::Config(ref msg) if msg.contains("port")));
}

#[test]
fn zero_staging_capacity_is_rejected() {
    let err = RelayConfig::from_toml_str("staging_capacity = 0").expect_err("invalid");
    assert!(matches!(err, AppError::Config(ref msg) if msg.contains("staging_capacity")));
}

#[test]
fn zero_connect_timeout_is_rejected() {
    let err =
        RelayConfig::from_toml_str("[timing]\nconnect_timeout_ms = 0\n").expect_err("invalid");
    assert!(matches!(err, AppError::Config(_)));
}

#[test]
fn malformed_toml_is_a_config_error() {
    let err = RelayConfig::from_toml_str("port = \"six\"").expect_err("wrong type");
    assert!(err.to_string().starts_with("config: invalid config"));
}

#[test]
fn overrides_replace_file_values() {
    let config = RelayConfig::from_toml_str(sample_toml())
        .expect("valid")
        .with_overrides(Some("localhost".into()), Some(7000))
        .expect("valid overrides");
    assert_eq!(config.peer_addr(), "localhost:7000");
}

#[test]
fn overrides_are_validated() {
    let err = RelayConfig::default()
        .with_overrides(Some("  ".into()), None)
        .expect_err("blank host");
    assert!(matches!(err, AppError::Config(_)));
}

#[test]
fn load_from_path_reads_file() {
    let mut file = tempfile::NamedTempFile::new().expect("tempfile");
    file.write_all(sample_toml().as_bytes()).expect("write");

    let config = RelayConfig::load_from_path(file.path()).expect("load");
    assert_eq!(config.port, 6008);
}

#[test]
fn load_from_missing_path_fails() {
    let dir = tempfile::tempdir().expect("tempdir");
    let err = RelayConfig::load_from_path(dir.path().join("absent.toml")).expect_err("missing");
    assert!(err.to_string().contains("failed to read config"));
}
