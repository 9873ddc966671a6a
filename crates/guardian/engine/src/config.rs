//! Engine configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{EngineError, Result};

/// Runtime configuration for one governed project
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Quiet period after the last change notification (default: 900 ms)
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// Backoff for a locked source
    #[serde(default)]
    pub retry: RetryPolicy,

    /// Override lifetime from its submission timestamp (default: 3600 s)
    #[serde(default = "default_override_ttl_secs")]
    pub override_ttl_secs: u64,

    /// How often expired overrides are looked for (default: 1000 ms)
    #[serde(default = "default_expiry_sweep_interval_ms")]
    pub expiry_sweep_interval_ms: u64,

    /// Polling notifier interval (default: 250 ms)
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Upper bound on the source read of one cycle (default: 30 s)
    #[serde(default = "default_cycle_timeout_secs")]
    pub cycle_timeout_secs: u64,

    /// Time an in-flight cycle gets to finish on shutdown (default: 10 s)
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,

    /// Accepted clock skew on override timestamps (default: 300 s)
    #[serde(default = "default_future_skew_secs")]
    pub future_skew_secs: u64,

    /// Ledger file. Defaults to `audit_log.jsonl` next to the manifest.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ledger_path: Option<PathBuf>,

    /// Buffered governance events per subscriber (default: 256)
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

fn default_debounce_ms() -> u64 {
    900
}

fn default_override_ttl_secs() -> u64 {
    3600
}

fn default_expiry_sweep_interval_ms() -> u64 {
    1000
}

fn default_poll_interval_ms() -> u64 {
    250
}

fn default_cycle_timeout_secs() -> u64 {
    30
}

fn default_shutdown_grace_secs() -> u64 {
    10
}

fn default_future_skew_secs() -> u64 {
    300
}

fn default_event_capacity() -> usize {
    256
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            retry: RetryPolicy::default(),
            override_ttl_secs: default_override_ttl_secs(),
            expiry_sweep_interval_ms: default_expiry_sweep_interval_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            cycle_timeout_secs: default_cycle_timeout_secs(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
            future_skew_secs: default_future_skew_secs(),
            ledger_path: None,
            event_capacity: default_event_capacity(),
        }
    }
}

impl EngineConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn override_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.override_ttl_secs as i64)
    }

    pub fn expiry_sweep_interval(&self) -> Duration {
        Duration::from_millis(self.expiry_sweep_interval_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn cycle_timeout(&self) -> Duration {
        Duration::from_secs(self.cycle_timeout_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    pub fn future_skew(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.future_skew_secs as i64)
    }

    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("override_ttl_secs", self.override_ttl_secs),
            ("expiry_sweep_interval_ms", self.expiry_sweep_interval_ms),
            ("poll_interval_ms", self.poll_interval_ms),
            ("cycle_timeout_secs", self.cycle_timeout_secs),
            ("event_capacity", self.event_capacity as u64),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(EngineError::Configuration(format!("{name} must be positive")));
            }
        }
        // Keeps chrono arithmetic on timestamps in range.
        if self.override_ttl_secs > i64::MAX as u64 / 1000 || self.future_skew_secs > i64::MAX as u64 / 1000 {
            return Err(EngineError::Configuration("durations out of range".into()));
        }
        self.retry.validate()
    }
}

/// Exponential backoff for a locked source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total read attempts, including the first (default: 5)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the first retry (default: 500 ms)
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Cap on any single delay (default: 8000 ms)
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_max_attempts() -> u32 {
    5
}

fn default_base_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    8000
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl RetryPolicy {
    /// Delay after failed attempt number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(32);
        let delay = self.base_delay_ms.saturating_mul(1u64 << shift);
        Duration::from_millis(delay.min(self.max_delay_ms))
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(EngineError::Configuration(
                "retry.max_attempts must be at least 1".into(),
            ));
        }
        if self.base_delay_ms > self.max_delay_ms {
            return Err(EngineError::Configuration(
                "retry.base_delay_ms exceeds retry.max_delay_ms".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.debounce(), Duration::from_millis(900));
        assert_eq!(config.override_ttl(), chrono::Duration::hours(1));
        assert_eq!(config.retry.max_attempts, 5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let config: EngineConfig = serde_json::from_str(r#"{"debounce_ms": 50}"#).unwrap();
        assert_eq!(config.debounce_ms, 50);
        assert_eq!(config.override_ttl_secs, 3600);
        assert_eq!(config.retry, RetryPolicy::default());
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_millis(500));
        assert_eq!(policy.delay_for(2), Duration::from_millis(1000));
        assert_eq!(policy.delay_for(4), Duration::from_millis(4000));
        assert_eq!(policy.delay_for(5), Duration::from_millis(8000));
        assert_eq!(policy.delay_for(40), Duration::from_millis(8000));
    }

    #[test]
    fn test_invalid_config() {
        let config = EngineConfig {
            override_ttl_secs: 0,
            ..EngineConfig::default()
        };
        assert!(config.validate().is_err());

        let config = EngineConfig {
            retry: RetryPolicy {
                max_attempts: 0,
                ..RetryPolicy::default()
            },
            ..EngineConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
