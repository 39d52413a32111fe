//! Configuration loading from disk.

use std::fs;
use std::path::Path;

use thiserror::Error;

use crate::config::schema::ClientConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Environment variable overriding `api.base_url`.
pub const ENV_BASE_URL: &str = "RESILIENT_CLIENT_BASE_URL";
/// Environment variable overriding `api.timeout_secs`.
pub const ENV_TIMEOUT_SECS: &str = "RESILIENT_CLIENT_TIMEOUT_SECS";

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid value for {var}: {value}")]
    Env { var: &'static str, value: String },

    #[error("Validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<ClientConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    let mut config: ClientConfig = toml::from_str(&content)?;

    apply_env_overrides(&mut config, |var| std::env::var(var).ok())?;
    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

/// Build a configuration from defaults plus environment overrides.
pub fn load_from_env() -> Result<ClientConfig, ConfigError> {
    let mut config = ClientConfig::default();
    apply_env_overrides(&mut config, |var| std::env::var(var).ok())?;
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

/// Apply environment overrides using `lookup` to read variables.
pub fn apply_env_overrides<F>(config: &mut ClientConfig, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(base_url) = lookup(ENV_BASE_URL) {
        config.api.base_url = base_url;
    }

    if let Some(raw) = lookup(ENV_TIMEOUT_SECS) {
        config.api.timeout_secs = raw.trim().parse().map_err(|_| ConfigError::Env {
            var: ENV_TIMEOUT_SECS,
            value: raw.clone(),
        })?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            (ENV_BASE_URL, "https://staging.example.com/api/v1"),
            (ENV_TIMEOUT_SECS, "15"),
        ]
        .into_iter()
        .collect();

        let mut config = ClientConfig::default();
        apply_env_overrides(&mut config, |k| vars.get(k).map(|v| v.to_string())).unwrap();

        assert_eq!(config.api.base_url, "https://staging.example.com/api/v1");
        assert_eq!(config.api.timeout_secs, 15);
    }

    #[test]
    fn test_bad_timeout_override_is_rejected() {
        let mut config = ClientConfig::default();
        let err = apply_env_overrides(&mut config, |k| {
            (k == ENV_TIMEOUT_SECS).then(|| "soon".to_string())
        })
        .unwrap_err();
        assert!(matches!(err, ConfigError::Env { var: ENV_TIMEOUT_SECS, .. }));
    }

    #[test]
    fn test_load_config_reports_validation_errors() {
        let path = std::env::temp_dir().join(format!("client-config-{}.toml", uuid::Uuid::new_v4()));
        fs::write(&path, "[retries]\nmax_attempts = 0\n").unwrap();

        let result = load_config(&path);
        fs::remove_file(&path).unwrap_or_default();

        match result {
            Err(ConfigError::Validation(errors)) => {
                assert!(errors.iter().any(|e| e.field == "retries.max_attempts"));
            }
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let result = load_config(Path::new("/definitely/not/here.toml"));
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }
}
