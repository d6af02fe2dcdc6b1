//! Runtime configuration: YAML types, parsing and validation.

pub mod parser;
pub mod types;
pub mod validator;

pub use parser::{load_config, parse_config_str, substitute_env_vars};
pub use types::{ClaimBackend, ClaimsConfig, RetryConfig, RuntimeConfig};
pub use validator::validate_config;
