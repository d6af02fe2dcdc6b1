//! Runtime configuration types.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::retry::RetryPolicy;
use crate::wiring::DEFAULT_CHANNEL_CAPACITY;

fn default_agents() -> u32 {
    1
}

fn default_channel_capacity() -> usize {
    DEFAULT_CHANNEL_CAPACITY
}

/// Top-level runtime configuration.
///
/// Every section is optional; omitted values take their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuntimeConfig {
    /// Number of container agents started in this process.
    #[serde(default = "default_agents")]
    pub agents: u32,
    #[serde(default)]
    pub claims: ClaimsConfig,
    /// Buffer size of each data channel between stages.
    #[serde(default = "default_channel_capacity")]
    pub data_channel_capacity: usize,
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            agents: default_agents(),
            claims: ClaimsConfig::default(),
            data_channel_capacity: default_channel_capacity(),
            retry: RetryConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClaimBackend {
    #[default]
    Memory,
    Sqlite,
}

/// Where stage ownership claims are kept.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClaimsConfig {
    #[serde(default)]
    pub backend: ClaimBackend,
    /// Database file, required for the `sqlite` backend.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

/// Backoff settings for claim store calls and deployment publishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetryConfig {
    #[serde(default = "RetryConfig::default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "RetryConfig::default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "RetryConfig::default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl RetryConfig {
    fn default_max_attempts() -> u32 {
        RetryPolicy::default().max_attempts
    }

    #[allow(clippy::cast_possible_truncation)]
    fn default_base_delay_ms() -> u64 {
        RetryPolicy::default().base_delay.as_millis() as u64
    }

    #[allow(clippy::cast_possible_truncation)]
    fn default_max_delay_ms() -> u64 {
        RetryPolicy::default().max_delay.as_millis() as u64
    }

    #[must_use]
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: Self::default_max_attempts(),
            base_delay_ms: Self::default_base_delay_ms(),
            max_delay_ms: Self::default_max_delay_ms(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_retry_policy() {
        let config = RuntimeConfig::default();
        assert_eq!(config.agents, 1);
        assert_eq!(config.claims.backend, ClaimBackend::Memory);
        assert_eq!(config.retry.policy(), RetryPolicy::default());
    }

    #[test]
    fn empty_document_uses_defaults() {
        let config: RuntimeConfig = serde_yaml::from_str("{}").unwrap();
        assert_eq!(config, RuntimeConfig::default());
    }

    #[test]
    fn unknown_fields_rejected() {
        assert!(serde_yaml::from_str::<RuntimeConfig>("workers: 3").is_err());
        assert!(serde_yaml::from_str::<RuntimeConfig>("claims:\n  backend: redis").is_err());
    }
}
