//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check the separator matches the storage mode
//! - Keep the designator usable as a key segment
//! - Validate value ranges and addresses
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: StoreConfig → Result<(), Vec<ValidationError>>
//! - Runs after normalization, before config is accepted into the system

use std::fmt;
use std::net::SocketAddr;

use crate::config::schema::{StorageMode, StoreConfig};

/// One semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted config key, e.g. `kv.timeout_ms`.
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

pub fn validate_config(config: &StoreConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    let expected = config.expected_separator();
    if let Some(separator) = config.storage.separator {
        if separator != expected {
            errors.push(ValidationError::new(
                "storage.separator",
                format!(
                    "'{}' does not match mode '{}' (expected '{}')",
                    separator.as_str(),
                    config.storage.mode,
                    expected.as_str()
                ),
            ));
        }
    }

    if !config
        .storage
        .designator
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        errors.push(ValidationError::new(
            "storage.designator",
            format!(
                "'{}' may only contain ASCII letters, digits, '-' and '_'",
                config.storage.designator
            ),
        ));
    }

    match config.storage.mode {
        StorageMode::File => {
            if config.file.path.as_os_str().is_empty() {
                errors.push(ValidationError::new("file.path", "must not be empty"));
            }
        }
        StorageMode::Kv => {
            if config.kv.timeout_ms == 0 {
                errors.push(ValidationError::new("kv.timeout_ms", "must be greater than 0"));
            }
            if let Err(e) = url::Url::parse(&config.kv.endpoint) {
                errors.push(ValidationError::new(
                    "kv.endpoint",
                    format!("'{}' is not a URL: {e}", config.kv.endpoint),
                ));
            }
            if config.kv.meta_prefix.starts_with(&config.kv.prefix)
                || config.kv.prefix.starts_with(&config.kv.meta_prefix)
            {
                errors.push(ValidationError::new(
                    "kv.meta_prefix",
                    format!(
                        "'{}' overlaps the proxy prefix '{}'",
                        config.kv.meta_prefix, config.kv.prefix
                    ),
                ));
            }
        }
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("'{}' is not a socket address", config.observability.metrics_address),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
