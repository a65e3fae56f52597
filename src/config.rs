//! Runtime configuration: JSON file layer with defaults, then environment
//! overrides.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::resilience::RetryPolicy;

/// Origin storage quota most browsers grant a single site.
pub const DEFAULT_CAPACITY_CEILING_BYTES: u64 = 5 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub remote_timeout_ms: u64,
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub background_retry_interval_ms: u64,
    pub capacity_ceiling_bytes: u64,
    pub capacity_warn_fraction: f64,
    /// Key prefix for the durable mirror.
    pub mirror_namespace: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            remote_timeout_ms: 10_000,
            max_attempts: 3,
            initial_backoff_ms: 500,
            max_backoff_ms: 8_000,
            background_retry_interval_ms: 30_000,
            capacity_ceiling_bytes: DEFAULT_CAPACITY_CEILING_BYTES,
            capacity_warn_fraction: 0.9,
            mirror_namespace: "financeflow".to_string(),
        }
    }
}

impl SyncConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: SyncConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a JSON config file, then apply environment overrides.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let mut config = Self::from_json_str(&contents)?;
        config.apply_env_overrides();
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.remote_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "remote_timeout_ms must be greater than zero".into(),
            ));
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "max_attempts must be at least 1".into(),
            ));
        }
        if self.initial_backoff_ms > self.max_backoff_ms {
            return Err(ConfigError::Invalid(
                "initial_backoff_ms must not exceed max_backoff_ms".into(),
            ));
        }
        if self.background_retry_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "background_retry_interval_ms must be greater than zero".into(),
            ));
        }
        if self.capacity_ceiling_bytes == 0 {
            return Err(ConfigError::Invalid(
                "capacity_ceiling_bytes must be greater than zero".into(),
            ));
        }
        if !(self.capacity_warn_fraction > 0.0 && self.capacity_warn_fraction <= 1.0) {
            return Err(ConfigError::Invalid(
                "capacity_warn_fraction must be in (0, 1]".into(),
            ));
        }
        if self.mirror_namespace.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "mirror_namespace must not be empty".into(),
            ));
        }
        Ok(())
    }

    /// Apply `FINANCEFLOW_*` environment overrides. Invalid values are ignored.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        override_number(&lookup, "FINANCEFLOW_REMOTE_TIMEOUT_MS", &mut self.remote_timeout_ms);
        override_number(&lookup, "FINANCEFLOW_MAX_ATTEMPTS", &mut self.max_attempts);
        override_number(
            &lookup,
            "FINANCEFLOW_BACKGROUND_RETRY_MS",
            &mut self.background_retry_interval_ms,
        );
        override_number(
            &lookup,
            "FINANCEFLOW_CAPACITY_CEILING_BYTES",
            &mut self.capacity_ceiling_bytes,
        );
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms),
            timeout: Duration::from_millis(self.remote_timeout_ms),
        }
    }

    pub fn background_retry_interval(&self) -> Duration {
        Duration::from_millis(self.background_retry_interval_ms)
    }
}

fn override_number<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, slot: &mut T)
where
    T: std::str::FromStr + PartialOrd + Default,
    T::Err: std::fmt::Display,
{
    let Some(raw) = lookup(key) else {
        return;
    };
    match raw.trim().parse::<T>() {
        Ok(value) if value > T::default() => *slot = value,
        Ok(_) => tracing::warn!("invalid {key}, ignoring: must be greater than zero"),
        Err(err) => tracing::warn!("invalid {key}, ignoring: {err}"),
    }
}
