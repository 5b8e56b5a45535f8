//! Configuration for the synchronization layer.
//!
//! All structs deserialize with defaults for every field, so a partial JSON
//! document is enough:
//!
//! ```
//! use helios_index_sync::config::IndexSyncConfig;
//!
//! let config = IndexSyncConfig::from_json_str(r#"{
//!     "sync": { "max_concurrency": 8, "retry": { "initial_delay": "250ms" } }
//! }"#).unwrap();
//!
//! assert_eq!(config.sync.max_concurrency, 8);
//! assert_eq!(config.sync.retry.max_retries, 3);
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[cfg(feature = "elasticsearch")]
use crate::client::ElasticsearchConfig;

/// Retry policy for transient index and store failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retry attempts after the first try.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Delay before the first retry.
    #[serde(with = "humantime_serde", default = "default_initial_delay")]
    pub initial_delay: Duration,

    /// Upper bound for the delay between retries.
    #[serde(with = "humantime_serde", default = "default_max_delay")]
    pub max_delay: Duration,

    /// Factor applied to the delay after each failed attempt.
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
}

fn default_max_retries() -> u32 {
    3
}

fn default_initial_delay() -> Duration {
    Duration::from_millis(100)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(5)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
        }
    }
}

impl RetryConfig {
    /// A policy that never retries.
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// Returns the delay to wait after `delay`, capped at `max_delay`.
    pub fn next_delay(&self, delay: Duration) -> Duration {
        Duration::try_from_secs_f64(delay.as_secs_f64() * self.backoff_multiplier)
            .map_or(self.max_delay, |next| next.min(self.max_delay))
    }
}

/// Dispatcher configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Maximum number of index mutations executing at once.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Maximum number of accepted but unfinished tasks. Submissions beyond
    /// this are refused with `SyncError::QueueFull`.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Retry configuration for failed index mutations.
    #[serde(default)]
    pub retry: RetryConfig,
}

fn default_max_concurrency() -> usize {
    16
}

fn default_queue_capacity() -> usize {
    10_000
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            queue_capacity: default_queue_capacity(),
            retry: RetryConfig::default(),
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndexSyncConfig {
    /// Dispatcher and retry settings.
    #[serde(default)]
    pub sync: SyncConfig,

    /// Search engine connection settings.
    #[cfg(feature = "elasticsearch")]
    #[serde(default)]
    pub elasticsearch: ElasticsearchConfig,
}

/// Errors raised while loading configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The document is not valid JSON or does not fit the schema.
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),

    /// The configuration parsed but contains invalid values.
    #[error("invalid configuration: {}", .0.join("; "))]
    Invalid(Vec<String>),
}

impl IndexSyncConfig {
    /// Parses and validates a JSON configuration document.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate().map_err(ConfigError::Invalid)?;
        Ok(config)
    }

    /// Validates the configuration and returns every problem found.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.sync.max_concurrency == 0 {
            errors.push("Max concurrency cannot be 0".to_string());
        }

        if self.sync.queue_capacity == 0 {
            errors.push("Queue capacity cannot be 0".to_string());
        }

        let retry = &self.sync.retry;
        if retry.backoff_multiplier < 1.0 || !retry.backoff_multiplier.is_finite() {
            errors.push("Backoff multiplier must be a finite number >= 1.0".to_string());
        }

        if retry.initial_delay > retry.max_delay {
            errors.push("Initial retry delay cannot exceed max delay".to_string());
        }

        #[cfg(feature = "elasticsearch")]
        {
            let es = &self.elasticsearch;
            if es.nodes.is_empty() {
                errors.push("At least one Elasticsearch node is required".to_string());
            }
            if es.index_prefix.is_empty() {
                errors.push("Index prefix cannot be empty".to_string());
            } else if es.index_prefix != es.index_prefix.to_lowercase() {
                errors.push("Index prefix must be lowercase".to_string());
            }
            if es.number_of_shards == 0 {
                errors.push("Number of shards cannot be 0".to_string());
            }
            if es.page_size == 0 {
                errors.push("Page size cannot be 0".to_string());
            }
            if es.request_timeout_ms == 0 {
                errors.push("Request timeout cannot be 0".to_string());
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Serde module for Duration with humantime format.
mod humantime_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}
