//! Semantic validation for parsed runtime configuration.

use anyhow::{bail, Result};

use crate::config::types::{ClaimBackend, RuntimeConfig};

/// Validate a parsed runtime configuration, reporting every problem found.
///
/// # Errors
///
/// Returns an error listing all validation failures.
pub fn validate_config(config: &RuntimeConfig) -> Result<()> {
    let mut errors = Vec::new();

    if config.agents == 0 {
        errors.push("agents must be at least 1".to_string());
    }

    if config.data_channel_capacity == 0 {
        errors.push("data_channel_capacity must be at least 1".to_string());
    }

    match (config.claims.backend, &config.claims.path) {
        (ClaimBackend::Sqlite, None) => {
            errors.push("claims.path is required for the sqlite backend".to_string());
        }
        (ClaimBackend::Memory, Some(path)) => errors.push(format!(
            "claims.path '{}' is only used by the sqlite backend",
            path.display()
        )),
        _ => {}
    }

    let retry = &config.retry;
    if retry.max_attempts == 0 {
        errors.push("retry.max_attempts must be at least 1".to_string());
    }
    if retry.base_delay_ms > retry.max_delay_ms {
        errors.push(format!(
            "retry.base_delay_ms ({}) must not exceed retry.max_delay_ms ({})",
            retry.base_delay_ms, retry.max_delay_ms
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        bail!("Runtime config validation failed:\n  - {}", errors.join("\n  - "));
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use rstest::rstest;

    use super::*;

    #[test]
    fn default_config_is_valid() {
        validate_config(&RuntimeConfig::default()).unwrap();
    }

    #[test]
    fn sqlite_requires_path() {
        let mut config = RuntimeConfig::default();
        config.claims.backend = ClaimBackend::Sqlite;
        let err = validate_config(&config).unwrap_err().to_string();
        assert!(err.contains("claims.path is required"), "got: {err}");

        config.claims.path = Some(PathBuf::from("/tmp/claims.db"));
        validate_config(&config).unwrap();
    }

    #[test]
    fn memory_backend_rejects_path() {
        let mut config = RuntimeConfig::default();
        config.claims.path = Some(PathBuf::from("claims.db"));
        assert!(validate_config(&config).is_err());
    }

    #[rstest]
    #[case("agents: 0", "agents must be at least 1")]
    #[case("data_channel_capacity: 0", "data_channel_capacity must be at least 1")]
    #[case("retry:\n  max_attempts: 0", "retry.max_attempts must be at least 1")]
    #[case("retry:\n  base_delay_ms: 500\n  max_delay_ms: 100", "must not exceed")]
    #[case("claims:\n  backend: sqlite", "claims.path is required")]
    fn single_problem_is_reported(#[case] yaml: &str, #[case] expected: &str) {
        let config = crate::config::parse_config_str(yaml).unwrap();
        let err = validate_config(&config).unwrap_err().to_string();
        assert!(err.contains(expected), "got: {err}");
    }

    #[test]
    fn all_errors_are_collected() {
        let mut config = RuntimeConfig::default();
        config.agents = 0;
        config.data_channel_capacity = 0;
        config.retry.max_attempts = 0;
        config.retry.base_delay_ms = 10;
        config.retry.max_delay_ms = 5;
        let err = validate_config(&config).unwrap_err().to_string();
        assert!(err.starts_with("Runtime config validation failed"));
        assert_eq!(err.matches("\n  - ").count(), 4, "got: {err}");
    }
}
