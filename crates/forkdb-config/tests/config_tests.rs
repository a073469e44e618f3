// SPDX-FileCopyrightText: 2026 Forkdb Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Integration tests for the forkdb configuration system.

use std::io::Write;

use forkdb_config::diagnostic::ConfigError;
use forkdb_config::model::ForkdbConfig;
use forkdb_config::{load_and_validate_path, load_and_validate_str, load_config_from_str};
use forkdb_core::EvictionPolicy;

/// Valid TOML with all known fields deserializes successfully.
#[test]
fn valid_toml_deserializes_into_forkdb_config() {
    let toml = r#"
[cache]
capacity = 16
eviction = "least_recently_used"

[worker]
shared_buffer_bytes = 4096
error_buffer_bytes = 512
in_process_worker = 3
fork_all = true
request_timeout_ms = 2500
process_title = "db-worker"

[engine]
busy_timeout_ms = 100

[engine.defaults]
cache_size = "-2000"

[log]
level = "debug"
"#;

    let config = load_config_from_str(toml).expect("valid TOML should deserialize");
    assert_eq!(config.cache.capacity, 16);
    assert_eq!(config.cache.eviction, EvictionPolicy::LeastRecentlyUsed);
    assert_eq!(config.worker.shared_buffer_bytes, 4096);
    assert_eq!(config.worker.error_buffer_bytes, 512);
    assert_eq!(config.worker.in_process_worker, 3);
    assert!(config.worker.fork_all);
    assert_eq!(config.worker.request_timeout_ms, 2500);
    assert_eq!(config.worker.process_title, "db-worker");
    assert_eq!(config.engine.busy_timeout_ms, 100);
    assert_eq!(
        config.engine.defaults.get("cache_size").map(String::as_str),
        Some("-2000")
    );
    assert_eq!(config.log.level, "debug");
}

/// Missing sections fall back to defaults.
#[test]
fn missing_sections_use_defaults() {
    let config = load_config_from_str("").expect("empty TOML should deserialize");
    assert_eq!(config, ForkdbConfig::default());
    assert_eq!(config.cache.capacity, 128);
    assert_eq!(config.cache.eviction, EvictionPolicy::FirstFree);
    assert_eq!(config.worker.shared_buffer_bytes, 1024 * 1024);
    assert_eq!(config.worker.request_timeout_ms, 0);
    assert_eq!(config.worker.in_process_worker, 0);
}

/// Unknown field in [cache] produces an UnknownKey diagnostic with a suggestion.
#[test]
fn unknown_field_suggests_correction() {
    let toml = r#"
[cache]
capacty = 4
"#;

    let errors = load_and_validate_str(toml).expect_err("typo should fail");
    let found = errors.iter().any(|e| {
        matches!(
            e,
            ConfigError::UnknownKey { key, suggestion, .. }
                if key == "capacty" && suggestion.as_deref() == Some("capacity")
        )
    });
    assert!(found, "expected an unknown key suggestion, got: {errors:?}");
}

/// Unknown top-level sections are rejected.
#[test]
fn deny_unknown_fields_at_top_level() {
    let toml = r#"
[storage]
path = "x.db"
"#;

    assert!(load_config_from_str(toml).is_err());
}

/// Wrong value types surface as InvalidType.
#[test]
fn invalid_type_is_reported() {
    let toml = r#"
[worker]
shared_buffer_bytes = "big"
"#;

    let errors = load_and_validate_str(toml).expect_err("string for integer should fail");
    assert!(
        errors
            .iter()
            .any(|e| matches!(e, ConfigError::InvalidType { key, .. } if key.contains("shared_buffer_bytes"))),
        "got: {errors:?}"
    );
}

/// Unknown eviction policies are rejected.
#[test]
fn unknown_eviction_policy_is_rejected() {
    let toml = r#"
[cache]
eviction = "random"
"#;

    assert!(load_and_validate_str(toml).is_err());
}

/// Dotted overrides (the shape env vars map to) win over TOML.
#[test]
fn dotted_override_wins_over_toml() {
    use figment::{
        Figment,
        providers::{Format, Serialized, Toml},
    };

    let config: ForkdbConfig = Figment::new()
        .merge(Serialized::defaults(ForkdbConfig::default()))
        .merge(Toml::string("[worker]\nshared_buffer_bytes = 4096\n"))
        .merge(("worker.shared_buffer_bytes", 8192))
        .extract()
        .expect("should merge override");

    assert_eq!(config.worker.shared_buffer_bytes, 8192);
}

/// Validation rejects buffers too small for the wire header.
#[test]
fn validation_rejects_tiny_shared_buffer() {
    let toml = r#"
[worker]
shared_buffer_bytes = 16
"#;

    let errors = load_and_validate_str(toml).expect_err("tiny buffer should fail");
    assert!(errors.iter().any(|e| {
        matches!(e, ConfigError::Validation { message } if message.contains("shared_buffer_bytes"))
    }));
}

/// Validation rejects property names that are not identifiers.
#[test]
fn validation_rejects_bad_default_property() {
    let toml = r#"
[engine.defaults]
"x = 1; --" = "2"
"#;

    let errors = load_and_validate_str(toml).expect_err("bad key should fail");
    assert!(errors.iter().any(|e| {
        matches!(e, ConfigError::Validation { message } if message.contains("engine.defaults"))
    }));
}

/// An explicit config file is loaded and validated.
#[test]
fn explicit_path_is_loaded() {
    let mut file = tempfile::NamedTempFile::new().expect("temp file");
    writeln!(file, "[cache]\ncapacity = 7").expect("write config");

    let config = load_and_validate_path(file.path()).expect("file should load");
    assert_eq!(config.cache.capacity, 7);
}

/// ConfigError renders with miette.
#[test]
fn config_error_renders_with_miette() {
    use miette::{Diagnostic, GraphicalReportHandler};

    let error = ConfigError::UnknownKey {
        key: "capacty".to_string(),
        suggestion: Some("capacity".to_string()),
        valid_keys: "capacity, eviction".to_string(),
        span: None,
        src: None,
    };
    assert!(error.code().is_some());
    let help = error.help().expect("help text").to_string();
    assert!(help.contains("did you mean `capacity`"), "got: {help}");

    let mut buf = String::new();
    GraphicalReportHandler::new()
        .render_report(&mut buf, &error)
        .expect("should render");
    assert!(buf.contains("capacty"));
}
