//! Integration tests for configuration loading

use std::io::Write;
use std::time::Duration;
use swap_ledger_sdk::settings::{LogFormat, Settings};

fn write_config(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(".toml")
        .tempfile()
        .unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

#[test]
fn test_partial_file_keeps_defaults() {
    let file = write_config(
        r#"
[idempotency]
ttl_seconds = 600
in_flight_ttl_seconds = 15

[log]
format = "json"
"#,
    );

    let settings = Settings::from_path(file.path()).unwrap();
    assert_eq!(settings.idempotency.ttl(), Duration::from_secs(600));
    assert_eq!(settings.idempotency.in_flight_ttl(), Duration::from_secs(15));
    assert_eq!(settings.idempotency.max_key_length, 255);
    assert_eq!(settings.idempotency.backend, "memory");
    assert_eq!(settings.log.format, LogFormat::Json);
    assert_eq!(settings.log.level, "info");
    assert!(settings.merge.auto_merge_enabled);
    assert_eq!(settings.pool_directory.stale_after(), Duration::from_secs(30));
}

#[test]
fn test_full_file() {
    let file = write_config(
        r#"
[idempotency]
backend = "redis"

[redis]
url = "redis://cache:6380"
key_prefix = "swap:idem:"

[merge]
auto_merge_enabled = false

[volume]
average_swap_size = 0.25
"#,
    );

    let settings = Settings::from_path(file.path()).unwrap();
    assert_eq!(settings.idempotency.backend, "redis");
    assert_eq!(settings.redis.url, "redis://cache:6380");
    assert_eq!(settings.redis.key_prefix, "swap:idem:");
    assert!(!settings.merge.auto_merge_enabled);
    assert_eq!(settings.volume.average_swap_size, 0.25);
}

#[test]
fn test_missing_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    assert!(Settings::from_path(dir.path().join("absent.toml")).is_err());
}
