use config::{Config, ConfigError, File, FileFormat};
use serde::Deserialize;
use std::env;
use std::path::Path;
use std::time::Duration;

use crate::fingerprint::DEFAULT_MAX_KEY_LENGTH;
use crate::volume::DEFAULT_AVERAGE_SWAP_SIZE;

#[derive(Debug, Deserialize, Clone)]
pub struct IdempotencySettings {
    #[serde(default = "default_idempotency_ttl_seconds")]
    pub ttl_seconds: u64,
    /// Lifetime of a reservation held by an executing request
    #[serde(default = "default_in_flight_ttl_seconds")]
    pub in_flight_ttl_seconds: u64,
    #[serde(default = "default_max_key_length")]
    pub max_key_length: usize,
    /// "memory" or "redis"
    #[serde(default = "default_idempotency_backend")]
    pub backend: String,
}

fn default_idempotency_ttl_seconds() -> u64 {
    86_400 // 24 hours
}
fn default_in_flight_ttl_seconds() -> u64 {
    300
}
fn default_max_key_length() -> usize {
    DEFAULT_MAX_KEY_LENGTH
}
fn default_idempotency_backend() -> String {
    "memory".to_string()
}

impl IdempotencySettings {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds)
    }

    pub fn in_flight_ttl(&self) -> Duration {
        Duration::from_secs(self.in_flight_ttl_seconds)
    }
}

impl Default for IdempotencySettings {
    fn default() -> Self {
        Self {
            ttl_seconds: default_idempotency_ttl_seconds(),
            in_flight_ttl_seconds: default_in_flight_ttl_seconds(),
            max_key_length: default_max_key_length(),
            backend: default_idempotency_backend(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RedisSettings {
    #[serde(default = "default_redis_url")]
    pub url: String,
    #[serde(default = "default_redis_key_prefix")]
    pub key_prefix: String,
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}
fn default_redis_key_prefix() -> String {
    "idem:".to_string()
}

impl Default for RedisSettings {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
            key_prefix: default_redis_key_prefix(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct MergeSettings {
    #[serde(default = "default_true")]
    pub auto_merge_enabled: bool,
}

fn default_true() -> bool {
    true
}

impl Default for MergeSettings {
    fn default() -> Self {
        Self {
            auto_merge_enabled: default_true(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct VolumeSettings {
    #[serde(default = "default_average_swap_size")]
    pub average_swap_size: f64,
}

fn default_average_swap_size() -> f64 {
    DEFAULT_AVERAGE_SWAP_SIZE
}

impl Default for VolumeSettings {
    fn default() -> Self {
        Self {
            average_swap_size: default_average_swap_size(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct PoolDirectorySettings {
    #[serde(default = "default_stale_after_seconds")]
    pub stale_after_seconds: u64,
}

fn default_stale_after_seconds() -> u64 {
    30
}

impl PoolDirectorySettings {
    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_seconds)
    }
}

impl Default for PoolDirectorySettings {
    fn default() -> Self {
        Self {
            stale_after_seconds: default_stale_after_seconds(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[serde(rename = "json")]
    Json,
    #[default]
    #[serde(rename = "pretty")]
    Pretty,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LogSettings {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Settings {
    #[serde(default)]
    pub idempotency: IdempotencySettings,
    #[serde(default)]
    pub redis: RedisSettings,
    #[serde(default)]
    pub merge: MergeSettings,
    #[serde(default)]
    pub volume: VolumeSettings,
    #[serde(default)]
    pub pool_directory: PoolDirectorySettings,
    #[serde(default)]
    pub log: LogSettings,
}

impl Settings {
    /// Loads `Config.toml` from the working directory (optional) plus `SDK_*` overrides.
    pub fn new() -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::with_name("Config.toml").required(false))
            .build()?;

        let mut settings: Self = s.try_deserialize()?;
        settings.apply_env_overrides();
        Ok(settings)
    }

    /// Loads an explicit TOML file; it must exist.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let s = Config::builder()
            .add_source(File::from(path).format(FileFormat::Toml))
            .build()?;

        let mut settings: Self = s.try_deserialize()?;
        settings.apply_env_overrides();
        Ok(settings)
    }

    fn apply_env_overrides(&mut self) {
        if let Some(ttl) = env_parse::<u64>("SDK_IDEMPOTENCY_TTL_SECONDS") {
            self.idempotency.ttl_seconds = ttl;
        }
        if let Some(ttl) = env_parse::<u64>("SDK_IDEMPOTENCY_IN_FLIGHT_TTL_SECONDS") {
            self.idempotency.in_flight_ttl_seconds = ttl;
        }
        if let Some(backend) = env_string("SDK_IDEMPOTENCY_BACKEND") {
            self.idempotency.backend = backend;
        }
        if let Some(url) = env_string("SDK_REDIS_URL") {
            self.redis.url = url;
        }
        if let Some(enabled) = env_parse::<bool>("SDK_MERGE_AUTO_MERGE_ENABLED") {
            self.merge.auto_merge_enabled = enabled;
        }
        if let Some(size) = env_parse::<f64>("SDK_VOLUME_AVERAGE_SWAP_SIZE") {
            self.volume.average_swap_size = size;
        }
        if let Some(level) = env_string("SDK_LOG_LEVEL") {
            self.log.level = level;
        }
    }
}

fn env_string(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    let raw = env_string(name)?;
    match raw.parse() {
        Ok(v) => Some(v),
        Err(_) => {
            log::warn!("Ignoring invalid value for {}: {}", name, raw);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.idempotency.ttl(), Duration::from_secs(86_400));
        assert_eq!(settings.idempotency.max_key_length, 255);
        assert!(settings.idempotency.in_flight_ttl() < settings.idempotency.ttl());
        assert!(settings.merge.auto_merge_enabled);
        assert_eq!(settings.volume.average_swap_size, 0.1);
        assert_eq!(settings.log.format, LogFormat::Pretty);
    }
}
