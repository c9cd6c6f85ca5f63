//! Session configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Records buffered before a batch is flushed without waiting for the timer.
pub const DEFAULT_BATCH_SIZE_THRESHOLD: usize = 5;

/// Maximum delay before a non-empty pending batch is flushed.
pub const DEFAULT_BATCH_INTERVAL_MS: u64 = 1000;

/// Bound of the channel feeding the consumer task.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 64;

/// Configuration error.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),
    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Tuning for one history session.
///
/// Every field has a default, so `{}` is a valid JSON configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Records buffered before a forced flush.
    pub batch_size_threshold: usize,

    /// Max delay before a non-empty pending batch is flushed regardless of size.
    pub batch_interval_ms: u64,

    /// Cap on retained records. `None` means unbounded.
    pub max_records: Option<usize>,

    /// Snapshots that may queue up for the consumer before publishing waits.
    pub channel_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            batch_size_threshold: DEFAULT_BATCH_SIZE_THRESHOLD,
            batch_interval_ms: DEFAULT_BATCH_INTERVAL_MS,
            max_records: None,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

impl SessionConfig {
    /// Create a configuration with default batching and no cap.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a JSON configuration and validate it.
    ///
    /// # Errors
    /// Returns error if the JSON is malformed or a value is out of range.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Set the retained record cap.
    #[must_use]
    pub const fn with_max_records(mut self, max_records: usize) -> Self {
        self.max_records = Some(max_records);
        self
    }

    /// Set the batch size threshold.
    #[must_use]
    pub const fn with_batch_size_threshold(mut self, threshold: usize) -> Self {
        self.batch_size_threshold = threshold;
        self
    }

    /// Set the batch interval.
    #[must_use]
    pub const fn with_batch_interval_ms(mut self, interval_ms: u64) -> Self {
        self.batch_interval_ms = interval_ms;
        self
    }

    #[must_use]
    pub const fn batch_interval(&self) -> Duration {
        Duration::from_millis(self.batch_interval_ms)
    }

    /// Check that every value is usable.
    ///
    /// # Errors
    /// Returns error naming the first invalid field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size_threshold == 0 {
            return Err(ConfigError::Invalid(
                "batch_size_threshold must be at least 1".to_string(),
            ));
        }
        if self.batch_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "batch_interval_ms must be at least 1".to_string(),
            ));
        }
        if self.max_records == Some(0) {
            return Err(ConfigError::Invalid(
                "max_records must be at least 1 when set".to_string(),
            ));
        }
        if self.channel_capacity == 0 {
            return Err(ConfigError::Invalid(
                "channel_capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_json() {
        let config = SessionConfig::from_json("{}").unwrap();
        assert_eq!(config, SessionConfig::default());
        assert_eq!(config.batch_size_threshold, 5);
        assert_eq!(config.batch_interval(), Duration::from_secs(1));
        assert_eq!(config.max_records, None);
    }

    #[test]
    fn test_partial_json_keeps_other_defaults() {
        let config = SessionConfig::from_json(r#"{"max_records": 500}"#).unwrap();
        assert_eq!(config.max_records, Some(500));
        assert_eq!(config.batch_interval_ms, DEFAULT_BATCH_INTERVAL_MS);
    }

    #[test]
    fn test_rejects_zero_values() {
        let err = SessionConfig::from_json(r#"{"batch_size_threshold": 0}"#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        assert!(SessionConfig::new().with_max_records(0).validate().is_err());
        assert!(SessionConfig::new().with_batch_interval_ms(0).validate().is_err());
    }

    #[test]
    fn test_malformed_json() {
        let err = SessionConfig::from_json("{not json").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}
