//! Replication Configuration
//!
//! - Replication can be switched off entirely; every entry point then
//!   becomes a no-op instead of swapping in a second implementation
//! - Batch size bounds how much sync data is in flight per node
//! - Collector disable retry is bounded and observable

use super::errors::{ReplicationError, ReplicationResult};
use crate::gc::GcRetryPolicy;
use crate::observability::{log_event_with_fields, Event};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Object replication configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicationConfig {
    /// Whether object replication runs at all (default: true)
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Objects per sync batch (default: 500)
    #[serde(default = "default_object_sync_batch_size")]
    pub object_sync_batch_size: usize,

    /// Attempts to disable the collector before giving up (default: 10)
    #[serde(default = "default_gc_disable_max_attempts")]
    pub gc_disable_max_attempts: u32,

    /// First retry delay in milliseconds (default: 50)
    #[serde(default = "default_gc_disable_backoff_ms")]
    pub gc_disable_backoff_ms: u64,

    /// Retry delay ceiling in milliseconds (default: 2000)
    #[serde(default = "default_gc_disable_max_backoff_ms")]
    pub gc_disable_max_backoff_ms: u64,
}

fn default_enabled() -> bool {
    true
}

fn default_object_sync_batch_size() -> usize {
    500
}

fn default_gc_disable_max_attempts() -> u32 {
    10
}

fn default_gc_disable_backoff_ms() -> u64 {
    50
}

fn default_gc_disable_max_backoff_ms() -> u64 {
    2000
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            object_sync_batch_size: default_object_sync_batch_size(),
            gc_disable_max_attempts: default_gc_disable_max_attempts(),
            gc_disable_backoff_ms: default_gc_disable_backoff_ms(),
            gc_disable_max_backoff_ms: default_gc_disable_max_backoff_ms(),
        }
    }
}

impl ReplicationConfig {
    /// Create an enabled configuration with defaults.
    pub fn enabled() -> Self {
        Self::default()
    }

    /// Create a disabled configuration.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Parse and validate a JSON document. Missing fields take defaults.
    pub fn from_json_str(json: &str) -> ReplicationResult<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| ReplicationError::configuration_error(format!("invalid config: {}", e)))?;
        config.validate()?;
        log_event_with_fields(
            Event::ConfigLoaded,
            &[
                ("enabled", &config.enabled.to_string()),
                ("object_sync_batch_size", &config.object_sync_batch_size.to_string()),
            ],
        );
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> ReplicationResult<()> {
        if self.object_sync_batch_size == 0 {
            return Err(ReplicationError::configuration_error(
                "object_sync_batch_size must be greater than zero",
            ));
        }
        if self.gc_disable_max_attempts == 0 {
            return Err(ReplicationError::configuration_error(
                "gc_disable_max_attempts must be greater than zero",
            ));
        }
        if self.gc_disable_max_backoff_ms < self.gc_disable_backoff_ms {
            return Err(ReplicationError::configuration_error(
                "gc_disable_max_backoff_ms must not be below gc_disable_backoff_ms",
            ));
        }
        Ok(())
    }

    /// Check if replication is enabled.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Retry policy for disabling the collector.
    pub fn gc_retry_policy(&self) -> GcRetryPolicy {
        GcRetryPolicy {
            max_attempts: self.gc_disable_max_attempts,
            backoff: Duration::from_millis(self.gc_disable_backoff_ms),
            max_backoff: Duration::from_millis(self.gc_disable_max_backoff_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ReplicationConfig::default();
        assert!(config.enabled);
        assert_eq!(config.object_sync_batch_size, 500);
        assert_eq!(config.gc_disable_max_attempts, 10);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_disabled_config() {
        let config = ReplicationConfig::disabled();
        assert!(!config.is_enabled());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_takes_defaults() {
        let config = ReplicationConfig::from_json_str(r#"{"object_sync_batch_size": 3}"#).unwrap();
        assert_eq!(config.object_sync_batch_size, 3);
        assert!(config.enabled);
        assert_eq!(config.gc_disable_backoff_ms, 50);
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let err = ReplicationConfig::from_json_str(r#"{"object_sync_batch_size": 0}"#).unwrap_err();
        assert!(err.message.contains("object_sync_batch_size"));
    }

    #[test]
    fn test_backoff_ceiling_below_floor_rejected() {
        let config = ReplicationConfig {
            gc_disable_backoff_ms: 100,
            gc_disable_max_backoff_ms: 10,
            ..ReplicationConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_malformed_json_is_configuration_error() {
        let err = ReplicationConfig::from_json_str("{").unwrap_err();
        assert_eq!(
            err.kind,
            crate::replication::ReplicationErrorKind::ConfigurationError
        );
    }

    #[test]
    fn test_retry_policy_from_config() {
        let policy = ReplicationConfig::default().gc_retry_policy();
        assert_eq!(policy.max_attempts, 10);
        assert_eq!(policy.backoff, Duration::from_millis(50));
        assert_eq!(policy.max_backoff, Duration::from_millis(2000));
    }
}
