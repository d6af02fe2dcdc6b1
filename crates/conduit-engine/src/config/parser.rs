//! Runtime YAML parsing with environment variable substitution.

use std::path::Path;
use std::sync::LazyLock;

use anyhow::{Context, Result};
use regex::Regex;

use crate::config::types::RuntimeConfig;

static ENV_VAR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("valid env var regex"));

/// Substitute `${VAR_NAME}` patterns with environment variable values.
///
/// # Errors
///
/// Returns an error naming every referenced variable that is not set.
pub fn substitute_env_vars(input: &str) -> Result<String> {
    let mut missing = Vec::new();
    let result = ENV_VAR_RE.replace_all(input, |cap: &regex::Captures<'_>| {
        std::env::var(&cap[1]).unwrap_or_else(|_| {
            missing.push(cap[1].to_string());
            String::new()
        })
    });

    if !missing.is_empty() {
        anyhow::bail!("Missing environment variable(s): {}", missing.join(", "));
    }
    Ok(result.into_owned())
}

/// Parse a runtime YAML string (after env var substitution).
///
/// # Errors
///
/// Returns an error if env var substitution fails or the YAML is invalid.
pub fn parse_config_str(yaml: &str) -> Result<RuntimeConfig> {
    let substituted = substitute_env_vars(yaml)?;
    if substituted.trim().is_empty() {
        return Ok(RuntimeConfig::default());
    }
    serde_yaml::from_str(&substituted).context("Failed to parse runtime YAML")
}

/// Read, parse and validate a runtime YAML file.
///
/// # Errors
///
/// Returns an error if the file cannot be read, the YAML is invalid, or
/// validation fails.
pub fn load_config(path: &Path) -> Result<RuntimeConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read runtime config: {}", path.display()))?;
    let config = parse_config_str(&content)?;
    crate::config::validate_config(&config)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;
    use crate::config::types::ClaimBackend;

    #[test]
    fn env_vars_are_substituted() {
        std::env::set_var("CONDUIT_TEST_CLAIMS", "/tmp/claims.db");
        let out = substitute_env_vars("path: ${CONDUIT_TEST_CLAIMS}").unwrap();
        assert_eq!(out, "path: /tmp/claims.db");
        std::env::remove_var("CONDUIT_TEST_CLAIMS");
    }

    #[test]
    fn all_missing_vars_reported() {
        let err = substitute_env_vars("${CONDUIT_MISSING_A} ${CONDUIT_MISSING_B}").unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("CONDUIT_MISSING_A"));
        assert!(msg.contains("CONDUIT_MISSING_B"));
    }

    #[test]
    fn text_without_vars_passes_through() {
        assert_eq!(substitute_env_vars("agents: 2").unwrap(), "agents: 2");
    }

    #[test]
    fn parses_full_document() {
        std::env::set_var("CONDUIT_TEST_AGENTS", "3");
        let yaml = r"
agents: ${CONDUIT_TEST_AGENTS}
claims:
  backend: sqlite
  path: /var/lib/conduit/claims.db
data_channel_capacity: 64
retry:
  max_attempts: 7
  base_delay_ms: 10
";
        let config = parse_config_str(yaml).unwrap();
        assert_eq!(config.agents, 3);
        assert_eq!(config.claims.backend, ClaimBackend::Sqlite);
        assert_eq!(config.data_channel_capacity, 64);
        assert_eq!(config.retry.max_attempts, 7);
        assert_eq!(config.retry.base_delay_ms, 10);
        assert_eq!(config.retry.max_delay_ms, 60_000);
        std::env::remove_var("CONDUIT_TEST_AGENTS");
    }

    #[test]
    fn blank_file_is_default() {
        assert_eq!(parse_config_str("  \n").unwrap(), RuntimeConfig::default());
    }

    #[test]
    fn invalid_yaml_errors() {
        assert!(parse_config_str("agents: [1, 2").is_err());
    }

    #[test]
    fn load_config_validates() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "agents: 0").unwrap();
        let err = load_config(file.path()).unwrap_err();
        assert!(format!("{err:#}").contains("agents"));
    }
}
