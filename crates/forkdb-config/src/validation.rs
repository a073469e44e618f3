// SPDX-FileCopyrightText: 2026 Forkdb Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Post-deserialization validation for configuration values.
//!
//! Validates semantic constraints that cannot be expressed via serde attributes,
//! such as buffer sizes that must fit the wire format.

use crate::diagnostic::ConfigError;
use crate::model::{ForkdbConfig, MIN_SHARED_BUFFER_BYTES};

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error", "off"];

/// Validate a deserialized configuration for semantic correctness.
///
/// Returns `Ok(())` if all validations pass, or `Err(Vec<ConfigError>)` with
/// all collected validation errors (does not fail fast).
pub fn validate_config(config: &ForkdbConfig) -> Result<(), Vec<ConfigError>> {
    let mut errors = Vec::new();

    if config.cache.capacity == 0 {
        errors.push(ConfigError::Validation {
            message: "cache.capacity must be at least 1".to_string(),
        });
    }

    // Session indices travel as i32.
    if config.cache.capacity > i32::MAX as usize {
        errors.push(ConfigError::Validation {
            message: format!(
                "cache.capacity must not exceed {}, got {}",
                i32::MAX,
                config.cache.capacity
            ),
        });
    }

    let shared = config.worker.shared_buffer_bytes;
    if shared < MIN_SHARED_BUFFER_BYTES {
        errors.push(ConfigError::Validation {
            message: format!(
                "worker.shared_buffer_bytes must be at least {MIN_SHARED_BUFFER_BYTES}, got {shared}"
            ),
        });
    }

    // The chunk sentinel is the negated capacity, sent as an i32.
    if shared > i32::MAX as usize {
        errors.push(ConfigError::Validation {
            message: format!(
                "worker.shared_buffer_bytes must not exceed {}, got {shared}",
                i32::MAX
            ),
        });
    }

    if config.worker.error_buffer_bytes < 64 {
        errors.push(ConfigError::Validation {
            message: format!(
                "worker.error_buffer_bytes must be at least 64, got {}",
                config.worker.error_buffer_bytes
            ),
        });
    }

    if config.worker.process_title.trim().is_empty() {
        errors.push(ConfigError::Validation {
            message: "worker.process_title must not be empty".to_string(),
        });
    }

    for name in config.engine.defaults.keys() {
        if !is_property_name(name) {
            errors.push(ConfigError::Validation {
                message: format!(
                    "engine.defaults key `{name}` must be letters, digits and underscores"
                ),
            });
        }
    }

    let level = config.log.level.trim().to_ascii_lowercase();
    if !LOG_LEVELS.contains(&level.as_str()) {
        errors.push(ConfigError::Validation {
            message: format!(
                "log.level `{}` is not one of {}",
                config.log.level,
                LOG_LEVELS.join(", ")
            ),
        });
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Property names are plain identifiers: they are spliced into engine statements.
pub fn is_property_name(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_pass_validation() {
        assert!(validate_config(&ForkdbConfig::default()).is_ok());
    }

    #[test]
    fn collects_every_error() {
        let mut config = ForkdbConfig::default();
        config.cache.capacity = 0;
        config.worker.shared_buffer_bytes = 8;
        config.log.level = "loud".to_string();

        let errors = validate_config(&config).expect_err("should fail");
        assert_eq!(errors.len(), 3);
    }

    #[test]
    fn property_names_are_identifiers() {
        assert!(is_property_name("cache_size"));
        assert!(is_property_name("_x1"));
        assert!(!is_property_name("1x"));
        assert!(!is_property_name("a; drop table t"));
        assert!(!is_property_name(""));
    }
}
