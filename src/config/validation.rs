//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, at least one attempt)
//! - Check the base URL, header name and persistence keys are usable
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ClientConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::fmt;

use reqwest::header::HeaderName;
use url::Url;

use crate::config::schema::ClientConfig;

/// A single semantic problem in a configuration document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self { field, message: message.into() }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Validate a parsed configuration, collecting every error.
pub fn validate_config(config: &ClientConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    match Url::parse(&config.api.base_url) {
        Ok(url) if url.scheme() == "http" || url.scheme() == "https" => {}
        Ok(url) => errors.push(ValidationError::new(
            "api.base_url",
            format!("unsupported scheme '{}'", url.scheme()),
        )),
        Err(e) => errors.push(ValidationError::new("api.base_url", e.to_string())),
    }

    if config.api.timeout_secs == 0 {
        errors.push(ValidationError::new("api.timeout_secs", "must be greater than 0"));
    }

    if HeaderName::from_bytes(config.api.correlation_header.as_bytes()).is_err() {
        errors.push(ValidationError::new(
            "api.correlation_header",
            format!("'{}' is not a valid header name", config.api.correlation_header),
        ));
    }

    if !config.auth.refresh_path.starts_with('/') {
        errors.push(ValidationError::new("auth.refresh_path", "must start with '/'"));
    }

    if config.auth.access_key.is_empty() || config.auth.refresh_key.is_empty() {
        errors.push(ValidationError::new("auth", "persistence keys must not be empty"));
    } else if config.auth.access_key == config.auth.refresh_key {
        errors.push(ValidationError::new("auth", "access_key and refresh_key must differ"));
    }

    if config.retries.max_attempts == 0 {
        errors.push(ValidationError::new("retries.max_attempts", "must be at least 1"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate_config(&ClientConfig::default()).is_ok());
    }

    #[test]
    fn test_collects_all_errors() {
        let mut config = ClientConfig::default();
        config.api.base_url = "ftp://files.example.com".into();
        config.api.timeout_secs = 0;
        config.api.correlation_header = "bad header".into();
        config.auth.refresh_path = "auth/refresh".into();
        config.auth.refresh_key = config.auth.access_key.clone();
        config.retries.max_attempts = 0;

        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<_> = errors.iter().map(|e| e.field).collect();
        assert_eq!(
            fields,
            vec![
                "api.base_url",
                "api.timeout_secs",
                "api.correlation_header",
                "auth.refresh_path",
                "auth",
                "retries.max_attempts",
            ]
        );
    }

    #[test]
    fn test_unparseable_base_url() {
        let mut config = ClientConfig::default();
        config.api.base_url = "not a url".into();
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "api.base_url");
    }
}
