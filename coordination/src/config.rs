//! Runtime configuration for coordination handlers

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::resilience::RetryPolicy;

/// Tunables shared by every reactor handler
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinationConfig {
    /// Maximum commit attempts per transaction
    pub tx_max_attempts: u32,
    /// Delay before the first retry of a conflicting transaction
    pub tx_retry_delay_ms: u64,
    /// Multiplier applied to the retry delay per attempt (1.0 = fixed delay)
    pub tx_backoff: f64,
    /// Upper bound on a single time-limit wait before re-arming
    pub timer_max_wait_secs: u64,
    /// Whether agent replies wait out a simulated typing delay
    pub typing_delay: bool,
    /// Upper bound on a single typing delay
    pub max_typing_delay_secs: u64,
}

impl Default for CoordinationConfig {
    fn default() -> Self {
        Self {
            tx_max_attempts: 3,
            tx_retry_delay_ms: 100,
            tx_backoff: 1.0,
            timer_max_wait_secs: 300,
            typing_delay: true,
            max_typing_delay_secs: 60,
        }
    }
}

impl CoordinationConfig {
    /// Build from defaults overridden by `COORDINATION_*` environment variables
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// Apply `COORDINATION_*` environment overrides on top of this config
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(val) = std::env::var("COORDINATION_TX_MAX_ATTEMPTS") {
            if let Ok(n) = val.parse() {
                self.tx_max_attempts = n;
            }
        }
        if let Ok(val) = std::env::var("COORDINATION_TX_RETRY_DELAY_MS") {
            if let Ok(n) = val.parse() {
                self.tx_retry_delay_ms = n;
            }
        }
        if let Ok(val) = std::env::var("COORDINATION_TX_BACKOFF") {
            if let Ok(n) = val.parse() {
                self.tx_backoff = n;
            }
        }
        if let Ok(val) = std::env::var("COORDINATION_TIMER_MAX_WAIT_SECS") {
            if let Ok(n) = val.parse() {
                self.timer_max_wait_secs = n;
            }
        }
        if let Ok(val) = std::env::var("COORDINATION_TYPING_DELAY") {
            self.typing_delay = val.to_lowercase() == "true" || val == "1";
        }
        if let Ok(val) = std::env::var("COORDINATION_MAX_TYPING_DELAY_SECS") {
            if let Ok(n) = val.parse() {
                self.max_typing_delay_secs = n;
            }
        }
        self
    }

    /// Retry policy for transactional handlers
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.tx_max_attempts,
            Duration::from_millis(self.tx_retry_delay_ms),
            self.tx_backoff,
        )
    }

    /// Upper bound on one time-limit wait
    pub fn timer_max_wait(&self) -> Duration {
        Duration::from_secs(self.timer_max_wait_secs)
    }

    /// Upper bound on one typing delay
    pub fn max_typing_delay(&self) -> Duration {
        Duration::from_secs(self.max_typing_delay_secs)
    }

    /// Config for tests: no typing delay, tight retries
    pub fn immediate() -> Self {
        Self {
            tx_retry_delay_ms: 1,
            typing_delay: false,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CoordinationConfig::default();
        assert_eq!(config.tx_max_attempts, 3);
        assert_eq!(config.tx_retry_delay_ms, 100);
        assert_eq!(config.timer_max_wait(), Duration::from_secs(300));
        assert!(config.typing_delay);
    }

    #[test]
    fn test_partial_deserialize_uses_defaults() {
        let config: CoordinationConfig =
            serde_json::from_str(r#"{"tx_max_attempts": 5}"#).unwrap();
        assert_eq!(config.tx_max_attempts, 5);
        assert_eq!(config.max_typing_delay_secs, 60);
    }

    #[test]
    fn test_retry_policy_from_config() {
        let policy = CoordinationConfig::default().retry_policy();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(100));
    }
}
